//! tsync-config
//!
//! Per-server configuration for a sync run.
//!
//! The server list is a JSON array, one object per panel:
//!
//! ```json
//! [
//!   { "name": "de-1", "base_url": "https://de1.example:2053/panel", "user": "admin", "pass": "..." },
//!   { "name": "nl-1", "base_url": "https://nl1.example:2053", "user": "admin", "pass_env": "NL1_PASS",
//!     "verify_tls": true, "timeout_secs": 60 }
//! ]
//! ```
//!
//! Entries missing a required key are dropped with a warning; the run goes on
//! with the rest. A list with no usable entry is a fatal [`ConfigError`].

pub mod secrets;

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::warn;

pub const DEFAULT_SERVERS_PATH: &str = "servers.json";
pub const ENV_SERVERS_PATH: &str = "TSYNC_SERVERS";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Keys a server entry may carry. Anything else is reported as unused.
const KNOWN_KEYS: &[&str] = &[
    "name",
    "base_url",
    "user",
    "pass",
    "pass_env",
    "verify_tls",
    "timeout_secs",
];

// ---------------------------------------------------------------------------
// Server entry
// ---------------------------------------------------------------------------

/// One panel to pull a snapshot from.
///
/// **`pass` is redacted in `Debug` output.**
#[derive(Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub name: String,
    pub base_url: String,
    pub user: String,
    pub pass: String,
    /// Panels commonly run on self-signed certificates; verification is opt-in.
    pub verify_tls: bool,
    pub timeout: Duration,
    /// Where the downloaded panel database is stored inside the work dir:
    /// `downloaded{n}.db`, `n` being the 1-based position in the server list.
    pub snapshot_file: String,
}

impl ServerConfig {
    pub fn new(
        position: usize,
        name: impl Into<String>,
        base_url: impl Into<String>,
        user: impl Into<String>,
        pass: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            user: user.into(),
            pass: pass.into(),
            verify_tls: false,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            snapshot_file: format!("downloaded{position}.db"),
        }
    }

    /// Base URL without trailing slashes, ready for path joins.
    pub fn base_url_trimmed(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("name", &self.name)
            .field("base_url", &self.base_url)
            .field("user", &self.user)
            .field("pass", &secrets::REDACTED)
            .field("verify_tls", &self.verify_tls)
            .field("timeout", &self.timeout)
            .field("snapshot_file", &self.snapshot_file)
            .finish()
    }
}

/// A server entry that was skipped, with the reason.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DroppedEntry {
    /// 1-based position in the server list.
    pub position: usize,
    pub reason: String,
}

/// Result of loading a server list.
#[derive(Clone, Debug)]
pub struct LoadedServers {
    pub servers: Vec<ServerConfig>,
    pub dropped: Vec<DroppedEntry>,
    /// JSON pointers of keys no code reads (typos, stale keys), sorted.
    pub unused_keys: Vec<String>,
    /// SHA-256 over the accepted entries, secrets excluded. Stable across
    /// password rotations; changes when the server set changes.
    pub config_hash: String,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Fatal configuration errors. The run aborts before any server is contacted.
#[derive(Debug)]
pub enum ConfigError {
    NotFound { path: PathBuf },
    Read { path: PathBuf, source: io::Error },
    Parse { path: PathBuf, source: serde_json::Error },
    NotAnArray { path: PathBuf },
    NoValidServers { path: PathBuf, dropped: usize },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { path } => write!(f, "config file not found: {}", path.display()),
            Self::Read { path, source } => {
                write!(f, "failed to read config {}: {source}", path.display())
            }
            Self::Parse { path, source } => {
                write!(f, "failed to parse JSON in {}: {source}", path.display())
            }
            Self::NotAnArray { path } => {
                write!(f, "config {} must be a JSON array of servers", path.display())
            }
            Self::NoValidServers { path, dropped } => write!(
                f,
                "no valid server entries in {} ({dropped} dropped)",
                path.display()
            ),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Read { source, .. } => Some(source),
            Self::Parse { source, .. } => Some(source),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Load the server list from a JSON file.
pub fn load_servers(path: impl AsRef<Path>) -> Result<LoadedServers, ConfigError> {
    let path = path.as_ref();
    let raw = fs::read(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => ConfigError::NotFound {
            path: path.to_path_buf(),
        },
        _ => ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        },
    })?;

    // Strip UTF-8 BOM if present (files saved by Windows editors).
    let raw = raw.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(&raw);
    let text = String::from_utf8_lossy(raw);
    load_servers_from_str(path, &text)
}

/// Load the server list from already-read JSON text. `origin` is only used in
/// error messages.
pub fn load_servers_from_str(origin: &Path, raw: &str) -> Result<LoadedServers, ConfigError> {
    let doc: Value = serde_json::from_str(raw).map_err(|e| ConfigError::Parse {
        path: origin.to_path_buf(),
        source: e,
    })?;

    let Value::Array(entries) = doc else {
        return Err(ConfigError::NotAnArray {
            path: origin.to_path_buf(),
        });
    };

    let mut servers = Vec::new();
    let mut dropped = Vec::new();
    let mut unused_keys = Vec::new();

    for (i, entry) in entries.iter().enumerate() {
        let position = i + 1;

        if let Value::Object(obj) = entry {
            for k in obj.keys() {
                if !KNOWN_KEYS.contains(&k.as_str()) {
                    unused_keys.push(format!("/{i}/{}", escape_pointer_token(k)));
                }
            }
        }

        match parse_entry(position, entry) {
            Ok(server) => servers.push(server),
            Err(reason) => {
                warn!(position, %reason, "server entry dropped");
                dropped.push(DroppedEntry { position, reason });
            }
        }
    }

    unused_keys.sort();
    if !unused_keys.is_empty() {
        warn!(
            count = unused_keys.len(),
            keys = ?unused_keys,
            "server list has unused keys"
        );
    }

    if servers.is_empty() {
        return Err(ConfigError::NoValidServers {
            path: origin.to_path_buf(),
            dropped: dropped.len(),
        });
    }

    let config_hash = servers_hash(&servers);
    Ok(LoadedServers {
        servers,
        dropped,
        unused_keys,
        config_hash,
    })
}

/// Read a non-blank string at `key`, trimmed.
pub(crate) fn read_str(obj: &Map<String, Value>, key: &str) -> Option<String> {
    let s = obj.get(key)?.as_str()?;
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn required(obj: &Map<String, Value>, key: &str) -> Result<String, String> {
    read_str(obj, key).ok_or_else(|| format!("missing key '{key}'"))
}

/// Like [`required`], but the value is kept as written. Credentials go to the
/// panel byte for byte.
fn required_verbatim(obj: &Map<String, Value>, key: &str) -> Result<String, String> {
    match obj.get(key).and_then(Value::as_str) {
        Some(s) if !s.trim().is_empty() => Ok(s.to_string()),
        _ => Err(format!("missing key '{key}'")),
    }
}

fn parse_entry(position: usize, entry: &Value) -> Result<ServerConfig, String> {
    let Value::Object(obj) = entry else {
        return Err("entry is not a JSON object".to_string());
    };

    let name = required(obj, "name")?;
    let base_url = required(obj, "base_url")?;
    let user = required_verbatim(obj, "user")?;
    let pass = secrets::resolve_password(obj)?;

    let mut server = ServerConfig::new(position, name, base_url, user, pass);

    match obj.get("verify_tls") {
        None | Some(Value::Null) => {}
        Some(Value::Bool(b)) => server.verify_tls = *b,
        Some(_) => return Err("'verify_tls' must be a boolean".to_string()),
    }

    match obj.get("timeout_secs") {
        None | Some(Value::Null) => {}
        Some(v) => match v.as_u64() {
            Some(secs) if secs > 0 => server.timeout = Duration::from_secs(secs),
            _ => return Err("'timeout_secs' must be a positive integer".to_string()),
        },
    }

    Ok(server)
}

fn servers_hash(servers: &[ServerConfig]) -> String {
    let canonical: Vec<Value> = servers
        .iter()
        .map(|s| {
            serde_json::json!({
                "name": s.name,
                "base_url": s.base_url,
                "user": s.user,
                "verify_tls": s.verify_tls,
                "timeout_secs": s.timeout.as_secs(),
            })
        })
        .collect();
    let mut hasher = Sha256::new();
    hasher.update(Value::Array(canonical).to_string().as_bytes());
    hex::encode(hasher.finalize())
}

fn escape_pointer_token(s: &str) -> String {
    s.replace('~', "~0").replace('/', "~1")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load(raw: &str) -> Result<LoadedServers, ConfigError> {
        load_servers_from_str(Path::new("servers.json"), raw)
    }

    #[test]
    fn accepts_minimal_entry_with_defaults() {
        let loaded = load(r#"[{"name":"a","base_url":"https://a/","user":"u","pass":"p"}]"#).unwrap();
        let s = &loaded.servers[0];
        assert_eq!(s.name, "a");
        assert_eq!(s.base_url_trimmed(), "https://a");
        assert!(!s.verify_tls);
        assert_eq!(s.timeout, Duration::from_secs(DEFAULT_TIMEOUT_SECS));
        assert_eq!(s.snapshot_file, "downloaded1.db");
        assert!(loaded.dropped.is_empty());
    }

    #[test]
    fn snapshot_file_follows_list_position_including_dropped_entries() {
        let loaded = load(
            r#"[
                {"name":"bad"},
                {"name":"b","base_url":"https://b","user":"u","pass":"p"}
            ]"#,
        )
        .unwrap();
        assert_eq!(loaded.servers.len(), 1);
        assert_eq!(loaded.servers[0].snapshot_file, "downloaded2.db");
    }

    #[test]
    fn optional_keys_are_validated() {
        let err = load(
            r#"[{"name":"a","base_url":"https://a","user":"u","pass":"p","timeout_secs":0}]"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::NoValidServers { dropped: 1, .. }));

        let loaded = load(
            r#"[{"name":"a","base_url":"https://a","user":"u","pass":"p","verify_tls":true,"timeout_secs":5}]"#,
        )
        .unwrap();
        assert!(loaded.servers[0].verify_tls);
        assert_eq!(loaded.servers[0].timeout, Duration::from_secs(5));
    }

    #[test]
    fn unknown_keys_are_reported() {
        let loaded = load(
            r#"[{"name":"a","base_url":"https://a","user":"u","pass":"p","baseurl":"typo"}]"#,
        )
        .unwrap();
        assert_eq!(loaded.unused_keys, vec!["/0/baseurl".to_string()]);
    }

    #[test]
    fn non_array_document_is_fatal() {
        let err = load(r#"{"name":"a"}"#).unwrap_err();
        assert!(matches!(err, ConfigError::NotAnArray { .. }));
    }

    #[test]
    fn invalid_json_is_fatal() {
        let err = load("[{").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().starts_with("failed to parse JSON in servers.json"));
    }

    #[test]
    fn user_is_kept_as_written() {
        let loaded = load(
            r#"[{"name":" a ","base_url":" https://a ","user":" admin ","pass":"p"}]"#,
        )
        .unwrap();
        let s = &loaded.servers[0];
        assert_eq!(s.name, "a");
        assert_eq!(s.base_url, "https://a");
        assert_eq!(s.user, " admin ");

        let err = load(r#"[{"name":"a","base_url":"https://a","user":"  ","pass":"p"}]"#).unwrap_err();
        assert!(matches!(err, ConfigError::NoValidServers { dropped: 1, .. }));
    }

    #[test]
    fn config_hash_ignores_password() {
        let a = load(r#"[{"name":"a","base_url":"https://a","user":"u","pass":"one"}]"#).unwrap();
        let b = load(r#"[{"name":"a","base_url":"https://a","user":"u","pass":"two"}]"#).unwrap();
        let c = load(r#"[{"name":"c","base_url":"https://a","user":"u","pass":"one"}]"#).unwrap();
        assert_eq!(a.config_hash, b.config_hash);
        assert_ne!(a.config_hash, c.config_hash);
        assert_eq!(a.config_hash.len(), 64);
    }
}
