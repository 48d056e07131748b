//! Reader for a downloaded remote panel database.

use std::path::Path;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::Row;
use tracing::debug;
use tsync_reconcile::RemoteTraffic;

use crate::StoreError;

/// Read every `(email, down, up, total)` row of a remote snapshot.
///
/// The file is opened read-only and never modified. Rows without an email
/// cannot be matched locally and are skipped; NULL counters read as 0.
pub async fn read_remote_snapshot(path: impl AsRef<Path>) -> Result<Vec<RemoteTraffic>, StoreError> {
    let opts = SqliteConnectOptions::new()
        .filename(path.as_ref())
        .read_only(true)
        .create_if_missing(false);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(opts)
        .await
        .map_err(|source| StoreError { op: "open snapshot", source })?;

    let rows = sqlx::query(
        r#"
        select email,
               coalesce(down, 0)  as down,
               coalesce(up, 0)    as up,
               coalesce(total, 0) as total
        from client_traffics
        where email is not null
        order by id
        "#,
    )
    .fetch_all(&pool)
    .await
    .map_err(|source| StoreError { op: "read snapshot", source });

    pool.close().await;
    let rows = rows?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let rec = (|| -> Result<RemoteTraffic, sqlx::Error> {
            Ok(RemoteTraffic {
                email: row.try_get("email")?,
                down: row.try_get("down")?,
                up: row.try_get("up")?,
                total: row.try_get("total")?,
            })
        })()
        .map_err(|source| StoreError { op: "decode snapshot", source })?;
        out.push(rec);
    }

    debug!(path = %path.as_ref().display(), rows = out.len(), "remote snapshot read");
    Ok(out)
}
