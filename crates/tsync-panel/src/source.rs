//! Snapshot source backed by live panels.

use std::path::PathBuf;

use tracing::debug;
use tsync_config::ServerConfig;
use tsync_reconcile::RemoteTraffic;

use crate::{PanelClient, SnapshotSource, SnapshotUnavailable, UnavailableKind};

/// Live source: login, download into `work_dir`, read the copy.
///
/// Downloaded files are left in place after the run, named per server
/// (`downloaded{n}.db`).
#[derive(Debug, Clone)]
pub struct PanelSnapshotSource {
    work_dir: PathBuf,
}

impl PanelSnapshotSource {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
        }
    }

    pub fn snapshot_path(&self, server: &ServerConfig) -> PathBuf {
        self.work_dir.join(&server.snapshot_file)
    }
}

#[async_trait::async_trait]
impl SnapshotSource for PanelSnapshotSource {
    fn source_name(&self) -> &'static str {
        "x-ui-panel"
    }

    async fn fetch_snapshot(
        &self,
        server: &ServerConfig,
    ) -> Result<Vec<RemoteTraffic>, SnapshotUnavailable> {
        tokio::fs::create_dir_all(&self.work_dir).await.map_err(|e| {
            SnapshotUnavailable::new(
                &server.name,
                UnavailableKind::Io,
                format!("cannot create {}: {e}", self.work_dir.display()),
            )
        })?;

        let client = PanelClient::new(server)?;
        client.login().await?;

        let dest = self.snapshot_path(server);
        client.download_db(&dest).await?;

        let rows = tsync_db::read_remote_snapshot(&dest).await.map_err(|e| {
            SnapshotUnavailable::new(&server.name, UnavailableKind::Decode, e.to_string())
        })?;
        debug!(server = %server.name, rows = rows.len(), "snapshot read");
        Ok(rows)
    }
}
