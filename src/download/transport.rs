//! Interchangeable HTTP transports.
//!
//! The native client is always compiled in; `curl` and `wget` are found on
//! `PATH` at probe time. Each transport has a plain and a strict variant.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use futures::StreamExt;
use log::{debug, warn};
use tokio::io::AsyncWriteExt;
use tokio::time::timeout;

use crate::error::DistError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const INACTIVITY_TIMEOUT: Duration = Duration::from_secs(300);
const STRICT_RETRIES: &str = "3";

fn user_agent() -> String {
    format!("femtodist/{}", env!("CARGO_PKG_VERSION"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Native,
    Curl,
    Wget,
}

/// Fixed preference order.
pub const DEFAULT_TRANSPORTS: &[TransportKind] =
    &[TransportKind::Native, TransportKind::Curl, TransportKind::Wget];

impl FromStr for TransportKind {
    type Err = DistError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "native" | "reqwest" => Ok(Self::Native),
            "curl" => Ok(Self::Curl),
            "wget" => Ok(Self::Wget),
            other => Err(DistError::Config(format!(
                "unknown transport '{other}' (expected native, curl or wget)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strictness {
    Plain,
    /// HTTPS only, TLS 1.2 minimum, with retries.
    Strict,
}

pub enum Transport {
    Native {
        plain: reqwest::Client,
        strict: reqwest::Client,
    },
    Curl(PathBuf),
    Wget(PathBuf),
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Native { .. } => f.write_str("Native"),
            Transport::Curl(path) => write!(f, "Curl({})", path.display()),
            Transport::Wget(path) => write!(f, "Wget({})", path.display()),
        }
    }
}

impl Transport {
    /// Returns `None` when the transport cannot be used on this host.
    pub fn probe(kind: TransportKind) -> Option<Self> {
        match kind {
            TransportKind::Native => match Self::native() {
                Ok(t) => Some(t),
                Err(e) => {
                    warn!("native HTTP client unavailable: {e}");
                    None
                }
            },
            TransportKind::Curl => which::which("curl").ok().map(Transport::Curl),
            TransportKind::Wget => which::which("wget").ok().map(Transport::Wget),
        }
    }

    pub fn native() -> Result<Self, reqwest::Error> {
        let plain = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(user_agent())
            .build()?;
        let strict = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(user_agent())
            .https_only(true)
            .min_tls_version(reqwest::tls::Version::TLS_1_2)
            .build()?;
        Ok(Transport::Native { plain, strict })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Transport::Native { .. } => "native",
            Transport::Curl(_) => "curl",
            Transport::Wget(_) => "wget",
        }
    }

    /// Fetch `url` into `dest`. The error is a one-line diagnostic; the
    /// caller aggregates attempts into a `FetchError`.
    pub async fn fetch(&self, url: &str, dest: &Path, strictness: Strictness) -> Result<(), String> {
        match self {
            Transport::Native { plain, strict } => {
                let client = match strictness {
                    Strictness::Plain => plain,
                    Strictness::Strict => strict,
                };
                fetch_native(client, url, dest).await
            }
            Transport::Curl(program) => {
                let dest = dest.to_string_lossy();
                fetch_with_tool(program, &curl_args(&dest, url, strictness)).await
            }
            Transport::Wget(program) => {
                let dest = dest.to_string_lossy();
                fetch_with_tool(program, &wget_args(&dest, url, strictness)).await
            }
        }
    }
}

fn curl_args(dest: &str, url: &str, strictness: Strictness) -> Vec<String> {
    let mut args = Vec::new();
    if strictness == Strictness::Strict {
        args.extend(["--proto", "=https", "--tlsv1.2", "--retry", STRICT_RETRIES].map(String::from));
    }
    args.extend(["-fsSL", "-o", dest, url].map(String::from));
    args
}

fn wget_args(dest: &str, url: &str, strictness: Strictness) -> Vec<String> {
    let mut args = Vec::new();
    if strictness == Strictness::Strict {
        args.push("--https-only".to_string());
        args.push("--secure-protocol=TLSv1_2".to_string());
        args.push(format!("--tries={STRICT_RETRIES}"));
    }
    args.extend(["-q", "-O", dest, url].map(String::from));
    args
}

async fn fetch_native(client: &reqwest::Client, url: &str, dest: &Path) -> Result<(), String> {
    let response = client
        .get(url)
        .send()
        .await
        .and_then(reqwest::Response::error_for_status)
        .map_err(|e| e.to_string())?;

    let mut file = tokio::fs::File::create(dest)
        .await
        .map_err(|e| format!("cannot create {}: {e}", dest.display()))?;
    let mut stream = response.bytes_stream();
    let mut downloaded: u64 = 0;

    loop {
        let chunk = match timeout(INACTIVITY_TIMEOUT, stream.next()).await {
            Ok(Some(Ok(chunk))) => chunk,
            Ok(Some(Err(e))) => return Err(e.to_string()),
            Ok(None) => break,
            Err(_) => {
                return Err(format!(
                    "no data received for {} seconds after {downloaded} bytes",
                    INACTIVITY_TIMEOUT.as_secs()
                ));
            }
        };
        file.write_all(&chunk)
            .await
            .map_err(|e| format!("cannot write {}: {e}", dest.display()))?;
        downloaded += chunk.len() as u64;
    }

    file.flush()
        .await
        .map_err(|e| format!("cannot flush {}: {e}", dest.display()))?;
    debug!("downloaded {downloaded} bytes from {url}");
    Ok(())
}

async fn fetch_with_tool(program: &Path, args: &[String]) -> Result<(), String> {
    let output = tokio::process::Command::new(program)
        .args(args)
        .stdin(std::process::Stdio::null())
        .output()
        .await
        .map_err(|e| format!("cannot run {}: {e}", program.display()))?;

    if output.status.success() {
        Ok(())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(format!("{} exited with {}: {}", program.display(), output.status, stderr.trim()))
    }
}
