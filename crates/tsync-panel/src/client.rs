//! HTTP client for one x-ui panel.

use std::fmt;
use std::path::Path;

use serde::Deserialize;
use tracing::{debug, info};
use tsync_config::secrets::REDACTED;
use tsync_config::ServerConfig;

use crate::{SnapshotUnavailable, UnavailableKind};

/// First bytes of every SQLite 3 database file.
const SQLITE_MAGIC: &[u8] = b"SQLite format 3\0";

/// Verdict x-ui returns from `/login` (HTTP 200 either way).
#[derive(Debug, Deserialize)]
struct LoginVerdict {
    success: bool,
    #[serde(default)]
    msg: Option<String>,
}

/// Session-holding client for one panel.
///
/// Credentials are passed in by the caller; never log them.
pub struct PanelClient {
    server: String,
    base_url: String,
    user: String,
    pass: String,
    http: reqwest::Client,
}

impl fmt::Debug for PanelClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PanelClient")
            .field("server", &self.server)
            .field("base_url", &self.base_url)
            .field("user", &self.user)
            .field("pass", &REDACTED)
            .finish()
    }
}

impl PanelClient {
    pub fn new(server: &ServerConfig) -> Result<Self, SnapshotUnavailable> {
        let http = reqwest::Client::builder()
            .cookie_store(true)
            .danger_accept_invalid_certs(!server.verify_tls)
            .timeout(server.timeout)
            .build()
            .map_err(|e| {
                SnapshotUnavailable::new(&server.name, UnavailableKind::Transport, e.to_string())
            })?;

        Ok(Self {
            server: server.name.clone(),
            base_url: server.base_url_trimmed().to_string(),
            user: server.user.clone(),
            pass: server.pass.clone(),
            http,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn fail(&self, kind: UnavailableKind, detail: impl Into<String>) -> SnapshotUnavailable {
        SnapshotUnavailable::new(&self.server, kind, detail)
    }

    fn transport(&self, e: reqwest::Error) -> SnapshotUnavailable {
        self.fail(UnavailableKind::Transport, e.to_string())
    }

    /// Open a session. The session cookie is kept in the client's jar.
    pub async fn login(&self) -> Result<(), SnapshotUnavailable> {
        let resp = self
            .http
            .post(self.url("login"))
            .form(&[("username", self.user.as_str()), ("password", self.pass.as_str())])
            .send()
            .await
            .map_err(|e| self.transport(e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(self.fail(
                UnavailableKind::Status(status.as_u16()),
                format!("login rejected by {}", self.base_url),
            ));
        }

        let body = resp.bytes().await.map_err(|e| self.transport(e))?;
        // Panels without a JSON verdict are judged by the download that follows.
        match serde_json::from_slice::<LoginVerdict>(&body) {
            Ok(v) if !v.success => {
                return Err(self.fail(
                    UnavailableKind::Auth,
                    v.msg.unwrap_or_else(|| "login refused".to_string()),
                ));
            }
            Ok(_) => {}
            Err(e) => debug!(server = %self.server, error = %e, "login response is not a json verdict"),
        }

        info!(server = %self.server, user = %self.user, "logged in");
        Ok(())
    }

    /// Download the panel database into `dest`. Returns the number of bytes.
    pub async fn download_db(&self, dest: &Path) -> Result<u64, SnapshotUnavailable> {
        let resp = self
            .http
            .get(self.url("server/getDb"))
            .send()
            .await
            .map_err(|e| self.transport(e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(self.fail(
                UnavailableKind::Status(status.as_u16()),
                "database download rejected",
            ));
        }

        let body = resp.bytes().await.map_err(|e| self.transport(e))?;
        if !body.starts_with(SQLITE_MAGIC) {
            return Err(self.fail(
                UnavailableKind::Decode,
                format!("response is not a sqlite database ({} bytes)", body.len()),
            ));
        }

        tokio::fs::write(dest, &body).await.map_err(|e| {
            self.fail(
                UnavailableKind::Io,
                format!("cannot write {}: {e}", dest.display()),
            )
        })?;

        info!(server = %self.server, path = %dest.display(), bytes = body.len(), "database saved");
        Ok(body.len() as u64)
    }
}
