//! femtobot distribution: release publishing, installation and background
//! service management.
//!
//! - `release` - get-or-create a tagged release and sync per-platform assets
//! - `install` - detect, download, verify and install the binary
//! - `control` - systemd / launchd service lifecycle

pub mod asset;
pub mod checksum;
pub mod config;
pub mod control;
pub mod download;
pub mod error;
pub mod exec;
pub mod install;
pub mod platform;
pub mod release;
pub mod shutdown;

pub use error::{DistError, Result};
