//! tsync-testkit
//!
//! In-memory and on-disk fakes for scenario tests:
//! - [`FakeSnapshotSource`]: canned per-server snapshots or failures
//! - [`PanelDbFixture`]: a throwaway x-ui database in a temp dir
//! - [`write_remote_snapshot`]: a "downloaded" panel database file

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use tsync_config::ServerConfig;
use tsync_db::LocalDb;
use tsync_panel::{SnapshotSource, SnapshotUnavailable, UnavailableKind};
use tsync_reconcile::RemoteTraffic;

pub use tsync_db::fixtures::{
    create_panel_db, insert_client, insert_inbound, settings_with_clients, XUI_SCHEMA_SQL,
};

// ---------------------------------------------------------------------------
// Snapshot source
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
enum Canned {
    Rows(Vec<RemoteTraffic>),
    Fail(UnavailableKind, String),
}

/// Snapshot source answering from a per-server table.
///
/// Servers without an entry fail with a transport error.
#[derive(Debug, Default)]
pub struct FakeSnapshotSource {
    canned: BTreeMap<String, Canned>,
    calls: Mutex<Vec<String>>,
}

impl FakeSnapshotSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows(mut self, server: &str, rows: Vec<RemoteTraffic>) -> Self {
        self.canned.insert(server.to_string(), Canned::Rows(rows));
        self
    }

    pub fn with_failure(mut self, server: &str, kind: UnavailableKind, detail: &str) -> Self {
        self.canned
            .insert(server.to_string(), Canned::Fail(kind, detail.to_string()));
        self
    }

    /// Server names in the order they were fetched.
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .map(|c| c.clone())
            .unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl SnapshotSource for FakeSnapshotSource {
    fn source_name(&self) -> &'static str {
        "fake"
    }

    async fn fetch_snapshot(
        &self,
        server: &ServerConfig,
    ) -> Result<Vec<RemoteTraffic>, SnapshotUnavailable> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(server.name.clone());
        }
        match self.canned.get(&server.name) {
            Some(Canned::Rows(rows)) => Ok(rows.clone()),
            Some(Canned::Fail(kind, detail)) => {
                Err(SnapshotUnavailable::new(&server.name, *kind, detail.clone()))
            }
            None => Err(SnapshotUnavailable::new(
                &server.name,
                UnavailableKind::Transport,
                "no canned snapshot",
            )),
        }
    }
}

/// One `ServerConfig` per name, positions 1..=n.
pub fn servers(names: &[&str]) -> Vec<ServerConfig> {
    names
        .iter()
        .enumerate()
        .map(|(i, name)| {
            ServerConfig::new(i + 1, *name, format!("https://{name}.invalid:2053"), "admin", "admin")
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Databases
// ---------------------------------------------------------------------------

/// A local x-ui database in its own temp dir. Dropping it deletes the file.
pub struct PanelDbFixture {
    _dir: tempfile::TempDir,
    path: PathBuf,
    seed: SqlitePool,
}

impl PanelDbFixture {
    pub async fn new() -> Result<Self> {
        let dir = tempfile::tempdir().context("create temp dir")?;
        let path = dir.path().join("x-ui.db");
        let seed = create_panel_db(&path).await.context("create panel db")?;
        Ok(Self {
            _dir: dir,
            path,
            seed,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Seeding pool, for raw SQL in tests.
    pub fn pool(&self) -> &SqlitePool {
        &self.seed
    }

    /// Inbound with `(email, totalGB, enable)` quota entries.
    pub async fn inbound(&self, id: i64, clients: &[(&str, i64, bool)]) -> Result<&Self> {
        insert_inbound(&self.seed, id, &settings_with_clients(clients))
            .await
            .with_context(|| format!("insert inbound {id}"))?;
        Ok(self)
    }

    /// Inbound with a raw settings document.
    pub async fn raw_inbound(&self, id: i64, settings: &str) -> Result<&Self> {
        insert_inbound(&self.seed, id, settings)
            .await
            .with_context(|| format!("insert inbound {id}"))?;
        Ok(self)
    }

    pub async fn client(
        &self,
        inbound_id: i64,
        email: &str,
        down: i64,
        up: i64,
        total: i64,
    ) -> Result<&Self> {
        insert_client(&self.seed, inbound_id, email, down, up, total)
            .await
            .with_context(|| format!("insert client {email}"))?;
        Ok(self)
    }

    pub async fn open(&self) -> Result<LocalDb> {
        LocalDb::connect(&self.path)
            .await
            .context("open fixture db")
    }

    /// Quota entry of `email` in inbound `inbound_id`; `None` if either is absent.
    pub async fn quota_entry(
        &self,
        inbound_id: i64,
        email: &str,
    ) -> Result<Option<tsync_reconcile::QuotaEntry>> {
        let row: Option<(String,)> = sqlx::query_as("select settings from inbounds where id = ?1")
            .bind(inbound_id)
            .fetch_optional(&self.seed)
            .await?;
        let Some((raw,)) = row else {
            return Ok(None);
        };
        let doc = tsync_reconcile::EnforcementDoc::parse(inbound_id, &raw)?;
        Ok(doc.entry(email))
    }

    pub async fn raw_settings(&self, inbound_id: i64) -> Result<String> {
        let (raw,): (String,) = sqlx::query_as("select settings from inbounds where id = ?1")
            .bind(inbound_id)
            .fetch_one(&self.seed)
            .await?;
        Ok(raw)
    }
}

/// Write a panel database at `path` holding only `client_traffics` rows,
/// as a downloaded remote snapshot would.
pub async fn write_remote_snapshot(path: &Path, rows: &[RemoteTraffic]) -> Result<()> {
    let pool = create_panel_db(path).await?;
    for (i, r) in rows.iter().enumerate() {
        insert_client(&pool, i as i64 + 1, &r.email, r.down, r.up, r.total)
            .await
            .with_context(|| format!("insert remote row {}", r.email))?;
    }
    pool.close().await;
    Ok(())
}
