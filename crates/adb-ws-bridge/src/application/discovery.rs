//! Upstream URL discovery and validation.
//!
//! The URL comes from one of two places, first hit wins:
//!
//! 1. An explicit value (CLI flag or the `GENYMOTION_WEBSOCKET_URL`
//!    environment variable, both surfaced through clap).
//! 2. A connection file of `KEY=value` lines, as written by the device
//!    provisioning scripts:
//!
//! ```text
//! # written by the provisioning step
//! export GENYMOTION_ADB_URL="wss://adb.example.net/device/1234"
//! publicAdbUrl=wss://adb.example.net/device/1234
//! ```
//!
//! Everything here is pure: the caller reads the file (see
//! [`crate::infrastructure::connection_file`]) and hands over its contents.
//! Validation runs before any socket is opened, so a bad or missing URL
//! never causes network traffic.

use std::fmt;
use std::path::Path;

use url::Url;

use crate::domain::ConfigError;

/// Keys recognised in the connection file, in no particular priority:
/// the first matching *line* wins.
pub const CONNECTION_FILE_KEYS: [&str; 2] = ["GENYMOTION_ADB_URL", "publicAdbUrl"];

/// A validated `wss://` URL for the upstream session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamUrl(Url);

impl UpstreamUrl {
    /// Parses and validates `raw`.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::InvalidUrl`] if `raw` is not a URL.
    /// - [`ConfigError::InvalidScheme`] if the scheme is anything but `wss`.
    /// - [`ConfigError::MissingHost`] if there is no host.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let url = Url::parse(raw).map_err(|source| ConfigError::InvalidUrl {
            url: raw.to_string(),
            source,
        })?;

        if url.scheme() != "wss" {
            return Err(ConfigError::InvalidScheme {
                url: raw.to_string(),
                scheme: url.scheme().to_string(),
            });
        }

        if url.host_str().map_or(true, str::is_empty) {
            return Err(ConfigError::MissingHost {
                url: raw.to_string(),
            });
        }

        Ok(Self(url))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn host(&self) -> &str {
        self.0.host_str().unwrap_or_default()
    }
}

impl fmt::Display for UpstreamUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_str())
    }
}

/// Extracts the upstream URL from connection-file contents.
///
/// Lines are trimmed; blank lines and `#` comments are skipped; a leading
/// `export ` is ignored.  The first line whose key is one of
/// [`CONNECTION_FILE_KEYS`] and whose value is non-empty wins.  Surrounding
/// single or double quotes are removed from the value.
pub fn parse_connection_file(contents: &str) -> Option<String> {
    contents.lines().find_map(|line| {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }

        let line = line.strip_prefix("export ").unwrap_or(line);
        let (key, value) = line.split_once('=')?;
        if !CONNECTION_FILE_KEYS.contains(&key.trim()) {
            return None;
        }

        let value = unquote(value.trim());
        (!value.is_empty()).then(|| value.to_string())
    })
}

/// Resolves and validates the upstream URL.
///
/// `explicit` is the CLI/environment value; `file_contents` is the
/// connection file (or `None` if it does not exist).  `connection_file` is
/// only used for the error message.
///
/// # Errors
///
/// [`ConfigError::MissingUrl`] when no source yields a URL, or any
/// validation error from [`UpstreamUrl::parse`].
pub fn resolve_upstream_url(
    explicit: Option<&str>,
    file_contents: Option<&str>,
    connection_file: &Path,
) -> Result<UpstreamUrl, ConfigError> {
    let explicit = explicit.map(str::trim).filter(|s| !s.is_empty());

    let raw = match explicit {
        Some(url) => url.to_string(),
        None => file_contents
            .and_then(parse_connection_file)
            .ok_or_else(|| ConfigError::MissingUrl {
                connection_file: connection_file.to_path_buf(),
            })?,
    };

    UpstreamUrl::parse(&raw)
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if let Some(inner) = value
            .strip_prefix(quote)
            .and_then(|v| v.strip_suffix(quote))
        {
            return inner;
        }
    }
    value.trim_matches('"')
}

// ── Tests ─────────────────────────────────────────────────────────────────────
