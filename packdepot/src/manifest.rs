//! Installed-pack manifest.
//!
//! The manifest is a small JSON object written next to an installed pack's
//! data file:
//!
//! ```text
//! {"id":"tiles-eu","version":"1.2.0","installedAt":1718000000000}
//! ```
//!
//! It is only ever written and read back by this crate, so reading is
//! deliberately forgiving: each field is extracted on its own, whitespace is
//! ignored, unknown fields are skipped and a missing or malformed field reads
//! as `None` instead of failing the whole record.

use std::sync::OnceLock;

use chrono::{DateTime, TimeZone, Utc};
use regex::Regex;
use serde::Serialize;

/// Metadata recorded for an installed pack.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstalledManifest {
    /// Pack id the data belongs to.
    pub id: Option<String>,
    /// Installed version.
    pub version: Option<String>,
    /// Install time in milliseconds since the Unix epoch.
    pub installed_at: Option<i64>,
}

fn string_field(name: &str) -> Regex {
    Regex::new(&format!(r#""{}"\s*:\s*"((?:[^"\\]|\\.)*)""#, name)).unwrap()
}

fn id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| string_field("id"))
}

fn version_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| string_field("version"))
}

fn installed_at_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r#""installedAt"\s*:\s*(-?\d+)"#).unwrap())
}

/// Decode the body of a JSON string literal, keeping the raw text if the
/// escapes are malformed.
fn unescape(raw: &str) -> String {
    serde_json::from_str::<String>(&format!("\"{}\"", raw)).unwrap_or_else(|_| raw.to_string())
}

impl InstalledManifest {
    /// Create a manifest for `id` at `version`, installed at `installed_at`.
    pub fn new(id: impl Into<String>, version: impl Into<String>, installed_at: DateTime<Utc>) -> Self {
        Self {
            id: Some(id.into()),
            version: Some(version.into()),
            installed_at: Some(installed_at.timestamp_millis()),
        }
    }

    /// Parse manifest text, tolerating missing or malformed fields.
    pub fn parse(text: &str) -> Self {
        let id = id_pattern()
            .captures(text)
            .map(|caps| unescape(&caps[1]));
        let version = version_pattern()
            .captures(text)
            .map(|caps| unescape(&caps[1]));
        let installed_at = installed_at_pattern()
            .captures(text)
            .and_then(|caps| caps[1].parse::<i64>().ok());

        Self {
            id,
            version,
            installed_at,
        }
    }

    /// Render the manifest as JSON.
    pub fn to_json(&self) -> String {
        // Serializing a struct of strings and integers cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Install time as a UTC timestamp.
    pub fn installed_at_utc(&self) -> Option<DateTime<Utc>> {
        self.installed_at
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single())
    }

    /// Whether the manifest records an installed version.
    pub fn has_version(&self) -> bool {
        self.version.as_deref().is_some_and(|v| !v.is_empty())
    }
}
