//! Field extraction from release API responses.
//!
//! Two interchangeable accessors: a structured one backed by `serde_json`
//! and a pattern one that reads the same fields with regexes over a
//! depth-flattened view of the payload. Both must agree on well-formed input.

use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::error::DistError;

/// The server's view of an asset already attached to a release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteAssetRecord {
    pub id: String,
    pub name: String,
}

pub trait JsonAccessor {
    fn name(&self) -> &'static str;

    /// Top-level `id` of a release object.
    fn release_id(&self, body: &str) -> Option<String>;

    /// Top-level `upload_url` of a release object, as sent (URI template included).
    fn upload_url(&self, body: &str) -> Option<String>;

    /// `(id, name)` of every element of a top-level asset array.
    fn assets(&self, body: &str) -> Vec<RemoteAssetRecord>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JsonMode {
    #[default]
    Auto,
    Structured,
    Pattern,
}

impl FromStr for JsonMode {
    type Err = DistError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "auto" => Ok(Self::Auto),
            "structured" | "serde" => Ok(Self::Structured),
            "pattern" | "regex" => Ok(Self::Pattern),
            other => Err(DistError::Config(format!(
                "unknown JSON mode '{other}' (expected auto, structured or pattern)"
            ))),
        }
    }
}

/// Chosen once per run.
pub fn select_accessor(mode: JsonMode) -> Box<dyn JsonAccessor + Send + Sync> {
    match mode {
        JsonMode::Auto | JsonMode::Structured => Box::new(StructuredAccessor),
        JsonMode::Pattern => Box::new(PatternAccessor),
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StructuredAccessor;

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

impl JsonAccessor for StructuredAccessor {
    fn name(&self) -> &'static str {
        "structured"
    }

    fn release_id(&self, body: &str) -> Option<String> {
        let value: Value = serde_json::from_str(body).ok()?;
        scalar(value.as_object()?.get("id")?)
    }

    fn upload_url(&self, body: &str) -> Option<String> {
        let value: Value = serde_json::from_str(body).ok()?;
        match value.as_object()?.get("upload_url")? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            _ => None,
        }
    }

    fn assets(&self, body: &str) -> Vec<RemoteAssetRecord> {
        let Ok(Value::Array(items)) = serde_json::from_str::<Value>(body) else {
            return Vec::new();
        };
        items
            .iter()
            .filter_map(|item| {
                let obj = item.as_object()?;
                Some(RemoteAssetRecord {
                    id: scalar(obj.get("id")?)?,
                    name: obj.get("name")?.as_str()?.to_string(),
                })
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PatternAccessor;

/// One `"key": value` pair of a flattened object. Nested containers have
/// already been cut out, so a bare value is a number, literal or nothing.
static FIELD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#""((?:[^"\\]|\\.)*)"\s*:\s*(?:"((?:[^"\\]|\\.)*)"|([^,\s"]*))"#)
        .expect("valid field pattern")
});

#[derive(Debug, Clone, PartialEq, Eq)]
enum Field {
    Text(String),
    Bare(String),
}

impl PatternAccessor {
    /// Last occurrence wins, as with `serde_json` maps.
    fn field(segment: &str, key: &str) -> Option<Field> {
        FIELD_RE
            .captures_iter(segment)
            .filter(|caps| caps.get(1).is_some_and(|k| unescape(k.as_str()) == key))
            .last()
            .map(|caps| match caps.get(2) {
                Some(text) => Field::Text(unescape(text.as_str())),
                None => Field::Bare(caps.get(3).map_or("", |m| m.as_str()).to_string()),
            })
    }

    fn id_in(segment: &str) -> Option<String> {
        match Self::field(segment, "id")? {
            Field::Text(text) if !text.is_empty() => Some(text),
            Field::Bare(raw) if is_integer(&raw) => Some(raw),
            _ => None,
        }
    }

    fn text_in(segment: &str, key: &str) -> Option<String> {
        match Self::field(segment, key)? {
            Field::Text(text) => Some(text),
            Field::Bare(_) => None,
        }
    }
}

fn is_integer(raw: &str) -> bool {
    let digits = raw.strip_prefix('-').unwrap_or(raw);
    !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
}

impl JsonAccessor for PatternAccessor {
    fn name(&self) -> &'static str {
        "pattern"
    }

    fn release_id(&self, body: &str) -> Option<String> {
        if !body.trim_start().starts_with('{') {
            return None;
        }
        let top = shallow_segments(body, 1).into_iter().next()?;
        Self::id_in(&top)
    }

    fn upload_url(&self, body: &str) -> Option<String> {
        if !body.trim_start().starts_with('{') {
            return None;
        }
        let top = shallow_segments(body, 1).into_iter().next()?;
        Self::text_in(&top, "upload_url").filter(|url| !url.is_empty())
    }

    fn assets(&self, body: &str) -> Vec<RemoteAssetRecord> {
        if !body.trim_start().starts_with('[') {
            return Vec::new();
        }
        shallow_segments(body, 2)
            .iter()
            .filter_map(|segment| {
                Some(RemoteAssetRecord {
                    id: Self::id_in(segment)?,
                    name: Self::text_in(segment, "name")?,
                })
            })
            .collect()
    }
}

/// Text of every container opened at `depth`, with anything nested deeper
/// cut out. Brackets inside string literals are not structure.
fn shallow_segments(body: &str, depth: usize) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut level = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for c in body.chars() {
        if in_string {
            if level == depth {
                current.push(c);
            }
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' => {
                in_string = true;
                if level == depth {
                    current.push(c);
                }
            }
            '{' | '[' => {
                level += 1;
                if level == depth {
                    current.clear();
                }
            }
            '}' | ']' => {
                if level == depth {
                    segments.push(std::mem::take(&mut current));
                }
                level = level.saturating_sub(1);
            }
            _ if level == depth => current.push(c),
            _ => {}
        }
    }
    segments
}

fn hex4(chars: &mut std::str::Chars<'_>) -> Option<u32> {
    let hex: String = chars.by_ref().take(4).collect();
    if hex.len() != 4 {
        return None;
    }
    u32::from_str_radix(&hex, 16).ok()
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('b') => out.push('\u{8}'),
            Some('f') => out.push('\u{c}'),
            Some('u') => {
                let decoded = hex4(&mut chars).and_then(|high| {
                    if !(0xD800..0xDC00).contains(&high) {
                        return char::from_u32(high);
                    }
                    // High surrogate: the low half must follow as another `\u` escape.
                    let mut rest = chars.clone();
                    if rest.next() != Some('\\') || rest.next() != Some('u') {
                        return None;
                    }
                    let low = hex4(&mut rest).filter(|low| (0xDC00..0xE000).contains(low))?;
                    chars = rest;
                    char::from_u32(0x10000 + ((high - 0xD800) << 10) + (low - 0xDC00))
                });
                out.push(decoded.unwrap_or(char::REPLACEMENT_CHARACTER));
            }
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
pub(crate) mod fixtures {
    /// Trimmed `GET /releases/tags/{tag}` response. The nested author `id`
    /// comes before the release `id`, as it does on the real API.
    pub(crate) const RELEASE: &str = r#"{
  "url": "https://api.github.com/repos/femtobot/femtobot/releases/170001",
  "assets_url": "https://api.github.com/repos/femtobot/femtobot/releases/170001/assets",
  "upload_url": "https://uploads.github.com/repos/femtobot/femtobot/releases/170001/assets{?name,label}",
  "author": { "login": "release-bot", "id": 4242, "type": "Bot" },
  "id": 170001,
  "tag_name": "v1.2.0",
  "name": "femtobot v1.2.0",
  "body": "Fixes {braces} and [brackets] in \"notes\"",
  "draft": false,
  "prerelease": false,
  "assets": [
    { "id": 9001, "name": "femtobot-linux-x86_64", "uploader": { "id": 4242 } }
  ]
}"#;

    /// `POST /releases` response, compact and with keys in another order.
    pub(crate) const CREATED: &str = r#"{"id":170002,"tag_name":"v1.2.0-beta.1","author":{"id":7},"upload_url":"https:\/\/uploads.github.com\/repos\/femtobot\/femtobot\/releases\/170002\/assets{?name,label}","assets":[]}"#;

    /// `GET /releases/{id}/assets` response.
    pub(crate) const ASSETS: &str = r#"[
  {
    "url": "https://api.github.com/repos/femtobot/femtobot/releases/assets/9001",
    "id": 9001,
    "name": "femtobot-linux-x86_64",
    "label": "name",
    "uploader": { "login": "release-bot", "id": 4242, "name": "bot" },
    "content_type": "application/octet-stream",
    "size": 1048576
  },
  {
    "id": 9002,
    "uploader": { "id": 4242 },
    "name": "femtobot-linux-x86_64.sha256",
    "size": 88
  },
  { "name": "weird \"quoted\" name", "id": "node-9003" }
]"#;

    pub(crate) const EMPTY_ASSETS: &str = "[]";

    /// Escaped keys, a surrogate pair and a duplicated key.
    pub(crate) const ESCAPED_ASSETS: &str = r#"[
  { "\u0069d": 7, "n\u0061me": "femtobot-\ud83d\ude00" },
  { "id": 8, "name": "caf\u00e9", "name": "femtobot-\u00e9" },
  { "id": null, "name": "no-id" },
  { "id": 9, "name": "" }
]"#;

    pub(crate) const ESCAPED_RELEASE: &str =
        r#"{"\u0069d":170003,"upload_\u0075rl":"https:\/\/uploads.example\/r\ud83d\ude00{?name}","draft":false}"#;

    pub(crate) const NOT_FOUND: &str =
        r#"{"message":"Not Found","documentation_url":"https://docs.github.com/rest"}"#;
}
