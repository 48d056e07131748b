//! tsync-panel
//!
//! Snapshot Source: obtains a remote panel's full traffic table.
//!
//! The production source logs into the x-ui web panel, downloads its SQLite
//! database and reads `client_traffics` out of the downloaded copy. The
//! [`SnapshotSource`] trait is the seam the runtime depends on so tests can
//! substitute canned snapshots.

mod client;
mod source;

pub use client::PanelClient;
pub use source::PanelSnapshotSource;

use std::fmt;

use tsync_config::ServerConfig;
use tsync_reconcile::RemoteTraffic;

/// Produces the remote traffic snapshot of one server.
#[async_trait::async_trait]
pub trait SnapshotSource: Send + Sync {
    fn source_name(&self) -> &'static str;

    async fn fetch_snapshot(
        &self,
        server: &ServerConfig,
    ) -> Result<Vec<RemoteTraffic>, SnapshotUnavailable>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnavailableKind {
    /// The panel rejected the credentials.
    Auth,
    /// Connect, TLS, timeout or body transfer failure.
    Transport,
    /// Non-2xx HTTP status.
    Status(u16),
    /// Local filesystem failure while storing the snapshot.
    Io,
    /// The downloaded payload is not a readable panel database.
    Decode,
}

impl fmt::Display for UnavailableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnavailableKind::Auth => write!(f, "auth"),
            UnavailableKind::Transport => write!(f, "transport"),
            UnavailableKind::Status(code) => write!(f, "http status {code}"),
            UnavailableKind::Io => write!(f, "io"),
            UnavailableKind::Decode => write!(f, "decode"),
        }
    }
}

/// A remote snapshot could not be obtained. Fatal to that server only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotUnavailable {
    pub server: String,
    pub kind: UnavailableKind,
    pub detail: String,
}

impl SnapshotUnavailable {
    pub fn new(server: impl Into<String>, kind: UnavailableKind, detail: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            kind,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for SnapshotUnavailable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "snapshot of {} unavailable ({}): {}",
            self.server, self.kind, self.detail
        )
    }
}

impl std::error::Error for SnapshotUnavailable {}
