//! Command handler modules for tsync.
//!
//! Shared utilities used by multiple command paths live here.
//! Command-specific logic lives in the submodules.

mod logfile;
pub mod sync;

use anyhow::{Context, Result};
use logfile::{RotatingFile, LOG_BACKUPS, LOG_MAX_BYTES};
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Console logging on stderr (stdout carries `key=value` results), plus an
/// optional log file capped at 30 MiB with 5 numbered backups.
pub fn init_tracing(log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());

    let file_layer = match log_file {
        Some(path) => {
            let file = RotatingFile::open(path, LOG_MAX_BYTES, LOG_BACKUPS)
                .with_context(|| format!("open log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();
    Ok(())
}

/// `tsync check-config`: accepted servers (no secrets), dropped entries,
/// unused keys.
pub fn check_config(path: &Path) -> Result<()> {
    let loaded = tsync_config::load_servers(path)?;

    println!("config_hash={}", loaded.config_hash);
    println!(
        "servers={} dropped={} unused_keys={}",
        loaded.servers.len(),
        loaded.dropped.len(),
        loaded.unused_keys.len()
    );
    for s in &loaded.servers {
        println!(
            "server={} base_url={} user={} verify_tls={} timeout_secs={} snapshot_file={}",
            s.name,
            s.base_url,
            s.user,
            s.verify_tls,
            s.timeout.as_secs(),
            s.snapshot_file
        );
    }
    for d in &loaded.dropped {
        println!("dropped position={} reason={:?}", d.position, d.reason);
    }
    for k in &loaded.unused_keys {
        println!("unused_key={k}");
    }
    Ok(())
}
