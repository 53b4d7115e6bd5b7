//! Atomic writes for service definition files.

use std::fs;
use std::io::Write;
use std::path::Path;

use crate::error::{DistError, Result};

/// Write `content` next to `path`, sync, set `mode`, then rename over `path`.
/// Readers see either the previous definition or the new one.
pub(crate) fn write_file_atomic(path: &Path, content: &[u8], mode: u32) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| DistError::io("failed to create directory", parent, e))?;
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp_path = path.with_file_name(format!(".{file_name}.tmp"));

    {
        let mut file =
            fs::File::create(&temp_path).map_err(|e| DistError::io("failed to create temp file", &temp_path, e))?;
        file.write_all(content)
            .map_err(|e| DistError::io("failed to write temp file", &temp_path, e))?;
        file.sync_all()
            .map_err(|e| DistError::io("failed to sync temp file", &temp_path, e))?;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&temp_path, fs::Permissions::from_mode(mode))
            .map_err(|e| DistError::io("failed to set permissions on", &temp_path, e))?;
    }
    #[cfg(not(unix))]
    let _ = mode;

    fs::rename(&temp_path, path).map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        DistError::io("failed to move definition into place at", path, e)
    })
}

/// Remove `path`; a file that is already gone is not an error.
pub(crate) fn remove_if_present(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(DistError::io("failed to remove", path, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overwrites_in_place_without_leaving_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("femtobot.service");

        write_file_atomic(&path, b"first", 0o644).unwrap();
        write_file_atomic(&path, b"second", 0o644).unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "second");
        let entries: Vec<_> = fs::read_dir(path.parent().unwrap()).unwrap().collect();
        assert_eq!(entries.len(), 1);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o644);
        }
    }

    #[test]
    fn removing_twice_is_fine() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.plist");
        fs::write(&path, "x").unwrap();
        assert!(remove_if_present(&path).unwrap());
        assert!(!remove_if_present(&path).unwrap());
    }
}
