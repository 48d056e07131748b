//! tsync-db
//!
//! Local Store over the panel's SQLite database (`x-ui.db`).
//!
//! The panel owns the schema; this crate never creates or migrates tables in
//! production. It reads and writes two tables:
//! - `client_traffics`: per-client `down` / `up` / `total` counters
//! - `inbounds`: one `settings` JSON document per inbound, embedding the
//!   per-client quota entries
//!
//! Every write goes through one transaction per reconciliation pass, taken
//! with `BEGIN IMMEDIATE` so the panel process cannot slip a write between
//! our read and our update. Within this process, passes are additionally
//! serialized by a write guard so concurrent server workers never interleave.

#[cfg(any(test, feature = "testkit"))]
pub mod fixtures;
pub mod remote;

pub use remote::read_remote_snapshot;

use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{Row, Sqlite, SqliteConnection};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use tsync_reconcile::{
    reconcile, ClientTraffic, LocalSnapshot, ReconcileOutcome, RemoteTraffic, UpdateBatch,
};

pub const ENV_LOCAL_DB: &str = "TSYNC_LOCAL_DB";
pub const DEFAULT_LOCAL_DB: &str = "/etc/x-ui/x-ui.db";

/// How long to wait on the panel's own write lock before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A store operation failed. Fatal to the current server's batch: nothing of
/// that batch is applied.
#[derive(Debug)]
pub struct StoreError {
    /// Operation that failed (`"begin"`, `"load client_traffics"`, ...).
    pub op: &'static str,
    pub source: sqlx::Error,
}

impl StoreError {
    fn at(op: &'static str) -> impl FnOnce(sqlx::Error) -> StoreError {
        move |source| StoreError { op, source }
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "local store {} failed: {}", self.op, self.source)
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Shared handle to the local panel database.
///
/// Cheap to share behind an `Arc`; all methods take `&self`.
pub struct LocalDb {
    pool: SqlitePool,
    write_guard: Mutex<()>,
}

impl LocalDb {
    /// Open an existing panel database. Fails if the file does not exist.
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let opts = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(false)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(opts)
            .await
            .map_err(StoreError::at("connect"))?;

        Ok(Self::from_pool(pool))
    }

    /// Open the database named by `TSYNC_LOCAL_DB`.
    pub async fn connect_from_env() -> anyhow::Result<Self> {
        let path = std::env::var(ENV_LOCAL_DB)
            .with_context(|| format!("missing env var {ENV_LOCAL_DB}"))?;
        Self::connect(&path)
            .await
            .with_context(|| format!("failed to open local db {path}"))
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self {
            pool,
            write_guard: Mutex::new(()),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Connectivity + schema presence + row counts.
    pub async fn status(&self) -> Result<DbStatus, StoreError> {
        let (one,): (i64,) = sqlx::query_as("select 1")
            .fetch_one(&self.pool)
            .await
            .map_err(StoreError::at("status connectivity"))?;

        let has_client_traffics = table_exists(&self.pool, "client_traffics").await?;
        let has_inbounds = table_exists(&self.pool, "inbounds").await?;

        let client_count = if has_client_traffics {
            count_rows(&self.pool, "select count(*) from client_traffics").await?
        } else {
            0
        };
        let inbound_count = if has_inbounds {
            count_rows(&self.pool, "select count(*) from inbounds").await?
        } else {
            0
        };

        Ok(DbStatus {
            ok: one == 1,
            has_client_traffics,
            has_inbounds,
            client_count,
            inbound_count,
        })
    }

    /// Point lookup of one client's counters.
    pub async fn get_traffic_record(
        &self,
        email: &str,
    ) -> Result<Option<ClientTraffic>, StoreError> {
        let mut conn = self.acquire().await?;
        fetch_traffic(&mut conn, email).await
    }

    /// Raw settings document of one inbound.
    pub async fn get_enforcement_config(
        &self,
        inbound_id: i64,
    ) -> Result<Option<String>, StoreError> {
        let mut conn = self.acquire().await?;
        fetch_inbound_settings(&mut conn, inbound_id).await
    }

    /// Apply a batch atomically: all of it or none of it.
    pub async fn apply_batch(&self, batch: &UpdateBatch) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }
        let _guard = self.write_guard.lock().await;
        let mut tx = self.begin_immediate().await?;
        let result = apply_batch_in_tx(tx.conn(), batch).await;
        finish(tx, result).await
    }

    /// One full reconciliation pass for one remote snapshot.
    ///
    /// Holds the write guard and a single immediate transaction for the whole
    /// load → reconcile → apply sequence, so the engine always sees the local
    /// values current at apply time.
    pub async fn reconcile_snapshot(
        &self,
        remote: &[RemoteTraffic],
    ) -> Result<ReconcileOutcome, StoreError> {
        let _guard = self.write_guard.lock().await;
        let mut tx = self.begin_immediate().await?;

        let result = async {
            let local = load_local_snapshot(tx.conn(), remote).await?;
            let outcome = reconcile(remote, &local);
            apply_batch_in_tx(tx.conn(), &outcome.batch).await?;
            Ok::<_, StoreError>(outcome)
        }
        .await;

        finish(tx, result).await
    }

    /// Compute what a pass would do without writing anything.
    pub async fn plan_snapshot(
        &self,
        remote: &[RemoteTraffic],
    ) -> Result<ReconcileOutcome, StoreError> {
        let mut conn = self.acquire().await?;
        let local = load_local_snapshot(&mut conn, remote).await?;
        Ok(reconcile(remote, &local))
    }

    async fn acquire(&self) -> Result<PoolConnection<Sqlite>, StoreError> {
        self.pool.acquire().await.map_err(StoreError::at("acquire"))
    }

    async fn begin_immediate(&self) -> Result<ImmediateTx, StoreError> {
        let conn = self.acquire().await?;
        ImmediateTx::begin(conn).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbStatus {
    pub ok: bool,
    pub has_client_traffics: bool,
    pub has_inbounds: bool,
    pub client_count: i64,
    pub inbound_count: i64,
}

// ---------------------------------------------------------------------------
// Transaction plumbing
// ---------------------------------------------------------------------------

/// An open `BEGIN IMMEDIATE` transaction on one pooled connection.
///
/// If it is dropped while still open (the pass future was cancelled between
/// `BEGIN` and `COMMIT`, or a rollback failed), the connection is closed
/// instead of going back to the pool. Closing it makes SQLite roll back and
/// release the write lock the panel process is waiting on.
struct ImmediateTx {
    conn: PoolConnection<Sqlite>,
    open: bool,
}

impl ImmediateTx {
    async fn begin(conn: PoolConnection<Sqlite>) -> Result<Self, StoreError> {
        // Armed before BEGIN is sent: a cancelled BEGIN may still have run.
        let mut tx = Self { conn, open: true };
        match sqlx::query("BEGIN IMMEDIATE").execute(tx.conn()).await {
            Ok(_) => Ok(tx),
            Err(e) => {
                tx.open = false;
                Err(StoreError::at("begin")(e))
            }
        }
    }

    fn conn(&mut self) -> &mut SqliteConnection {
        &mut *self.conn
    }

    /// Commit; a failed commit is rolled back.
    async fn commit(mut self) -> Result<(), StoreError> {
        match sqlx::query("COMMIT").execute(self.conn()).await {
            Ok(_) => {
                self.open = false;
                Ok(())
            }
            Err(e) => {
                self.rollback().await;
                Err(StoreError::at("commit")(e))
            }
        }
    }

    async fn rollback(mut self) {
        match sqlx::query("ROLLBACK").execute(self.conn()).await {
            Ok(_) => self.open = false,
            Err(e) => warn!(error = %e, "rollback failed; discarding connection"),
        }
    }
}

impl Drop for ImmediateTx {
    fn drop(&mut self) {
        if self.open {
            warn!("transaction left open; closing its connection");
            self.conn.close_on_drop();
        }
    }
}

async fn finish<T>(tx: ImmediateTx, result: Result<T, StoreError>) -> Result<T, StoreError> {
    match result {
        Ok(v) => tx.commit().await.map(|()| v),
        Err(e) => {
            tx.rollback().await;
            Err(e)
        }
    }
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

async fn table_exists(pool: &SqlitePool, name: &str) -> Result<bool, StoreError> {
    let (n,): (i64,) =
        sqlx::query_as("select count(*) from sqlite_master where type = 'table' and name = ?1")
            .bind(name)
            .fetch_one(pool)
            .await
            .map_err(StoreError::at("status table-exists"))?;
    Ok(n > 0)
}

async fn count_rows(pool: &SqlitePool, sql: &'static str) -> Result<i64, StoreError> {
    let (n,): (i64,) = sqlx::query_as(sql)
        .fetch_one(pool)
        .await
        .map_err(StoreError::at("status count"))?;
    Ok(n)
}

async fn fetch_traffic(
    conn: &mut SqliteConnection,
    email: &str,
) -> Result<Option<ClientTraffic>, StoreError> {
    let row = sqlx::query(
        r#"
        select coalesce(inbound_id, 0) as inbound_id,
               coalesce(down, 0)  as down,
               coalesce(up, 0)    as up,
               coalesce(total, 0) as total
        from client_traffics
        where email = ?1
        "#,
    )
    .bind(email)
    .fetch_optional(&mut *conn)
    .await
    .map_err(StoreError::at("load client_traffics"))?;

    let Some(row) = row else {
        return Ok(None);
    };

    let decode = StoreError::at("decode client_traffics");
    let rec = (|| -> Result<ClientTraffic, sqlx::Error> {
        Ok(ClientTraffic {
            email: email.to_string(),
            inbound_id: row.try_get("inbound_id")?,
            down: row.try_get("down")?,
            up: row.try_get("up")?,
            total: row.try_get("total")?,
        })
    })()
    .map_err(decode)?;

    Ok(Some(rec))
}

async fn fetch_inbound_settings(
    conn: &mut SqliteConnection,
    inbound_id: i64,
) -> Result<Option<String>, StoreError> {
    let row: Option<(Option<String>,)> =
        sqlx::query_as("select settings from inbounds where id = ?1")
            .bind(inbound_id)
            .fetch_optional(&mut *conn)
            .await
            .map_err(StoreError::at("load inbounds"))?;

    // A NULL settings column is surfaced as an empty document, which the
    // engine reports as malformed.
    Ok(row.map(|(settings,)| settings.unwrap_or_default()))
}

/// Load exactly the local state a snapshot needs: one traffic record per
/// remote identity, one settings document per referenced inbound.
async fn load_local_snapshot(
    conn: &mut SqliteConnection,
    remote: &[RemoteTraffic],
) -> Result<LocalSnapshot, StoreError> {
    let mut local = LocalSnapshot::empty();
    let mut seen: BTreeSet<&str> = BTreeSet::new();
    let mut inbound_ids: BTreeSet<i64> = BTreeSet::new();

    for r in remote {
        if !seen.insert(r.email.as_str()) {
            continue;
        }
        if let Some(rec) = fetch_traffic(conn, &r.email).await? {
            inbound_ids.insert(rec.inbound_id);
            local.insert_traffic(rec);
        }
    }

    for id in inbound_ids {
        if let Some(settings) = fetch_inbound_settings(conn, id).await? {
            local.insert_inbound(id, settings);
        }
    }

    debug!(
        clients = local.traffic.len(),
        inbounds = local.inbounds.len(),
        "local snapshot loaded"
    );
    Ok(local)
}

async fn apply_batch_in_tx(
    conn: &mut SqliteConnection,
    batch: &UpdateBatch,
) -> Result<(), StoreError> {
    // Raises are written as max(current, new): even a value raised by someone
    // else since the load can never be regressed.
    for u in &batch.traffic {
        sqlx::query(
            r#"
            update client_traffics
            set down  = case when ?1 is null then down else max(coalesce(down, 0), ?1) end,
                up    = case when ?2 is null then up   else max(coalesce(up, 0), ?2)   end,
                total = coalesce(?3, total)
            where email = ?4
            "#,
        )
        .bind(u.down)
        .bind(u.up)
        .bind(u.total)
        .bind(&u.email)
        .execute(&mut *conn)
        .await
        .map_err(StoreError::at("update client_traffics"))?;
    }

    for u in &batch.inbounds {
        sqlx::query("update inbounds set settings = ?1 where id = ?2")
            .bind(&u.settings)
            .bind(u.inbound_id)
            .execute(&mut *conn)
            .await
            .map_err(StoreError::at("update inbounds"))?;
    }

    debug!(
        traffic = batch.traffic.len(),
        inbounds = batch.inbounds.len(),
        "batch applied"
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
