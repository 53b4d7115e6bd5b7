//! Error taxonomy shared by the publisher, installer and service manager.
//!
//! Every variant that involves the filesystem, a URL or an external tool
//! carries it, so a failure can be diagnosed from the message alone.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DistError {
    /// A requirement checked before any network call was not met.
    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("unsupported platform '{platform}' (supported: {supported})")]
    UnsupportedPlatform { platform: String, supported: String },

    #[error("failed to fetch {url}; attempts: {}", attempts.join("; "))]
    Fetch { url: String, attempts: Vec<String> },

    #[error("checksum mismatch for {asset}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        asset: String,
        expected: String,
        actual: String,
    },

    #[error("malformed checksum file {source_name}: {reason}")]
    MalformedChecksum { source_name: String, reason: String },

    /// The release API answered, but not with what we need. The raw body is
    /// kept so the operator can see what the server actually said.
    #[error("release API error ({context}); response: {response}")]
    RemoteApi { context: String, response: String },

    #[error("HTTP request failed ({context}): {source}")]
    Http {
        context: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{tool} failed during {step}: {detail}")]
    ServiceTool {
        tool: String,
        step: String,
        detail: String,
    },

    #[error("{tool} could not hash {}: {detail}", path.display())]
    DigestTool {
        tool: String,
        path: PathBuf,
        detail: String,
    },

    #[error("failed to run {tool}: {source}")]
    ToolUnavailable {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{action} {}: {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid version '{0}'")]
    InvalidVersion(String),
}

impl DistError {
    pub(crate) fn io(action: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            action,
            path: path.into(),
            source,
        }
    }

    pub(crate) fn http(context: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Http {
            context: context.into(),
            source,
        }
    }
}

pub type Result<T, E = DistError> = std::result::Result<T, E>;
