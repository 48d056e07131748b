//! `tsync run` and `tsync reconcile-file`.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tsync_db::LocalDb;
use tsync_panel::PanelSnapshotSource;
use tsync_reconcile::ReconcileOutcome;
use tsync_runtime::{RunSummary, ServerOutcome, SyncRunner};

pub struct RunArgs {
    pub servers: PathBuf,
    pub local_db: PathBuf,
    pub work_dir: PathBuf,
    pub concurrency: usize,
    pub every: Option<u64>,
}

async fn open_local(path: &Path) -> Result<LocalDb> {
    LocalDb::connect(path)
        .await
        .with_context(|| format!("open local db {}", path.display()))
}

fn print_summary(summary: &RunSummary) {
    for o in &summary.outcomes {
        println!("{}", o.summary_line());
    }
    println!(
        "run_id={} servers={} synced={} failed={} updated={} malformed={}",
        summary.run_id,
        summary.outcomes.len(),
        summary.synced_count(),
        summary.failed_count(),
        summary.total_updated(),
        summary.total_malformed()
    );
}

/// Per-server failures are reported, never returned: only an unusable config
/// or local database fails the command.
pub async fn run(args: RunArgs) -> Result<()> {
    let loaded = tsync_config::load_servers(&args.servers)?;
    info!(
        servers = loaded.servers.len(),
        dropped = loaded.dropped.len(),
        config_hash = %loaded.config_hash,
        "server list loaded"
    );

    let store = Arc::new(open_local(&args.local_db).await?);
    let source = Arc::new(PanelSnapshotSource::new(&args.work_dir));
    let runner = SyncRunner::new(source, store).with_concurrency(args.concurrency);

    match args.every {
        None => {
            let summary = runner.run_once(&loaded.servers).await;
            print_summary(&summary);
        }
        Some(secs) => {
            let interval = Duration::from_secs(secs.max(1));
            let runs = runner
                .run_every(&loaded.servers, interval, tsync_runtime::ctrl_c(), print_summary)
                .await;
            info!(runs, "stopped");
        }
    }
    Ok(())
}

fn print_batch(outcome: &ReconcileOutcome) {
    let opt = |v: Option<i64>| v.map_or_else(|| "-".to_string(), |v| v.to_string());
    for t in &outcome.batch.traffic {
        println!(
            "traffic email={} down={} up={} total={}",
            t.email,
            opt(t.down),
            opt(t.up),
            opt(t.total)
        );
    }
    for i in &outcome.batch.inbounds {
        println!("inbound id={} settings_bytes={}", i.inbound_id, i.settings.len());
    }
}

pub async fn reconcile_file(snapshot: &Path, local_db: &Path, dry_run: bool) -> Result<()> {
    let remote = tsync_db::read_remote_snapshot(snapshot)
        .await
        .with_context(|| format!("read snapshot {}", snapshot.display()))?;
    let store = open_local(local_db).await?;

    let outcome = if dry_run {
        store.plan_snapshot(&remote).await?
    } else {
        store.reconcile_snapshot(&remote).await?
    };

    for m in &outcome.report.malformed {
        println!("malformed inbound_id={} reason={:?}", m.inbound_id, m.reason);
    }
    if dry_run {
        print_batch(&outcome);
    }

    let line = ServerOutcome::Synced {
        server: snapshot.display().to_string(),
        report: outcome.report,
    }
    .summary_line();
    println!("dry_run={dry_run} {line}");
    Ok(())
}
