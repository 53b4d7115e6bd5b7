//! Run-scoped temporary directory.

use std::path::{Path, PathBuf};

use crate::error::{DistError, Result};

/// Removed when dropped: on success, on `?` propagation, and when `main`
/// abandons the run future on a termination signal.
#[derive(Debug)]
pub struct ScratchDir {
    dir: tempfile::TempDir,
}

impl ScratchDir {
    pub fn new(prefix: &str) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix(prefix)
            .tempdir()
            .map_err(|e| DistError::io("failed to create temporary directory in", std::env::temp_dir(), e))?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn join(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_is_removed_on_drop() {
        let scratch = ScratchDir::new("femtodist-test.").unwrap();
        let path = scratch.path().to_path_buf();
        std::fs::write(scratch.join("partial"), b"x").unwrap();
        assert!(path.is_dir());

        drop(scratch);
        assert!(!path.exists());
    }

    #[test]
    fn directory_is_removed_on_error_path() {
        fn failing_step(seen: &mut Option<PathBuf>) -> Result<()> {
            let scratch = ScratchDir::new("femtodist-test.")?;
            *seen = Some(scratch.path().to_path_buf());
            Err(DistError::Config("boom".into()))
        }

        let mut seen = None;
        assert!(failing_step(&mut seen).is_err());
        assert!(!seen.unwrap().exists());
    }
}
