//! Panel database fixtures for tests.
//!
//! Only compiled with `cfg(test)` or the `testkit` feature. Mirrors the two
//! tables of the x-ui schema this crate touches, with the same column names
//! and constraints.

use std::path::Path;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

/// x-ui tables, one statement per entry.
pub const XUI_SCHEMA_SQL: &[&str] = &[
    r#"
    create table if not exists inbounds (
        id              integer primary key autoincrement,
        user_id         integer,
        up              integer,
        down            integer,
        total           integer,
        remark          text,
        enable          numeric,
        expiry_time     integer,
        listen          text,
        port            integer,
        protocol        text,
        settings        text,
        stream_settings text,
        tag             text unique,
        sniffing        text
    )
    "#,
    r#"
    create table if not exists client_traffics (
        id          integer primary key autoincrement,
        inbound_id  integer,
        enable      numeric,
        email       text unique,
        up          integer,
        down        integer,
        expiry_time integer,
        total       integer,
        reset       integer default 0
    )
    "#,
];

/// Create a fresh panel database file with the x-ui schema.
pub async fn create_panel_db(path: &Path) -> Result<SqlitePool, sqlx::Error> {
    let opts = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(opts)
        .await?;
    for stmt in XUI_SCHEMA_SQL {
        sqlx::query(stmt).execute(&pool).await?;
    }
    Ok(pool)
}

pub async fn insert_inbound(
    pool: &SqlitePool,
    id: i64,
    settings: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        insert into inbounds (id, user_id, up, down, total, remark, enable, expiry_time,
                              port, protocol, settings, tag)
        values (?1, 1, 0, 0, 0, ?2, 1, 0, ?3, 'vless', ?4, ?5)
        "#,
    )
    .bind(id)
    .bind(format!("inbound-{id}"))
    .bind(10_000 + id)
    .bind(settings)
    .bind(format!("inbound-{}", 10_000 + id))
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn insert_client(
    pool: &SqlitePool,
    inbound_id: i64,
    email: &str,
    down: i64,
    up: i64,
    total: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        insert into client_traffics (inbound_id, enable, email, up, down, expiry_time, total, reset)
        values (?1, 1, ?2, ?3, ?4, 0, ?5, 0)
        "#,
    )
    .bind(inbound_id)
    .bind(email)
    .bind(up)
    .bind(down)
    .bind(total)
    .execute(pool)
    .await?;
    Ok(())
}

/// Build an inbound settings document: `(email, totalGB, enable)` per client,
/// plus the unrelated keys a real panel writes.
pub fn settings_with_clients(clients: &[(&str, i64, bool)]) -> String {
    let clients: Vec<serde_json::Value> = clients
        .iter()
        .enumerate()
        .map(|(i, (email, quota, enable))| {
            serde_json::json!({
                "id": format!("00000000-0000-0000-0000-{:012}", i),
                "flow": "",
                "email": email,
                "limitIp": 0,
                "totalGB": quota,
                "expiryTime": 0,
                "enable": enable,
                "subId": "",
            })
        })
        .collect();
    serde_json::json!({
        "clients": clients,
        "decryption": "none",
        "fallbacks": [],
    })
    .to_string()
}
