//! tsync-runtime
//!
//! One run = one reconciliation pass per configured server.
//!
//! Servers are processed by up to `concurrency` independent workers. Each
//! worker fetches its own snapshot (the only network IO), then hands it to the
//! local store, which serializes passes on its write guard. A failed server
//! is logged and recorded in the [`RunSummary`]; it never aborts the run.

mod summary;

pub use summary::{FailureStage, RunSummary, ServerOutcome};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{self, StreamExt};
use tracing::{error, info, info_span, warn, Instrument};
use tsync_config::ServerConfig;
use tsync_db::LocalDb;
use tsync_panel::SnapshotSource;

pub const DEFAULT_CONCURRENCY: usize = 4;

pub struct SyncRunner {
    source: Arc<dyn SnapshotSource>,
    store: Arc<LocalDb>,
    concurrency: usize,
}

impl SyncRunner {
    pub fn new(source: Arc<dyn SnapshotSource>, store: Arc<LocalDb>) -> Self {
        Self {
            source,
            store,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    /// Number of servers fetched in parallel. Clamped to at least 1.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Process every server once. Outcomes come back in configuration order.
    pub async fn run_once(&self, servers: &[ServerConfig]) -> RunSummary {
        let mut summary = RunSummary::start();
        info!(
            run_id = %summary.run_id,
            servers = servers.len(),
            concurrency = self.concurrency,
            source = self.source.source_name(),
            "run started"
        );

        let mut indexed: Vec<(usize, ServerOutcome)> = stream::iter(servers.iter().enumerate())
            .map(|(pos, server)| async move { (pos, self.sync_server(server).await) })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;
        indexed.sort_by_key(|(pos, _)| *pos);
        summary.outcomes = indexed.into_iter().map(|(_, o)| o).collect();

        info!(
            run_id = %summary.run_id,
            synced = summary.synced_count(),
            failed = summary.failed_count(),
            updated = summary.total_updated(),
            "run finished"
        );
        summary
    }

    async fn sync_server(&self, server: &ServerConfig) -> ServerOutcome {
        let span = info_span!("server", name = %server.name);
        async {
            info!("processing");

            let remote = match self.source.fetch_snapshot(server).await {
                Ok(rows) => rows,
                Err(e) => {
                    error!(kind = %e.kind, reason = %e.detail, "snapshot unavailable; server skipped");
                    return ServerOutcome::Failed {
                        server: server.name.clone(),
                        stage: FailureStage::Snapshot,
                        reason: e.to_string(),
                    };
                }
            };

            match self.store.reconcile_snapshot(&remote).await {
                Ok(outcome) => {
                    let report = outcome.report;
                    for m in &report.malformed {
                        warn!(inbound_id = m.inbound_id, reason = %m.reason, "enforcement skipped for malformed inbound");
                    }
                    info!(
                        examined = report.examined,
                        updated = report.updated,
                        skipped = report.skipped_unknown,
                        quota_raised = report.quota_raised,
                        disabled = report.disabled,
                        malformed = report.malformed.len(),
                        "synced"
                    );
                    ServerOutcome::Synced {
                        server: server.name.clone(),
                        report,
                    }
                }
                Err(e) => {
                    error!(op = e.op, error = %e.source, "batch not applied");
                    ServerOutcome::Failed {
                        server: server.name.clone(),
                        stage: FailureStage::Store,
                        reason: e.to_string(),
                    }
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Repeat [`run_once`](Self::run_once) every `interval` until `shutdown`
    /// resolves, handing each summary to `on_run`. The first run starts
    /// immediately; a run in progress is finished before shutdown is honoured.
    /// Returns the number of completed runs.
    pub async fn run_every<F, C>(
        &self,
        servers: &[ServerConfig],
        interval: Duration,
        shutdown: F,
        mut on_run: C,
    ) -> usize
    where
        F: Future<Output = ()>,
        C: FnMut(&RunSummary),
    {
        let mut runs = 0;
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!(runs, "shutdown requested");
                    break;
                }
                _ = ticker.tick() => {
                    let summary = self.run_once(servers).await;
                    on_run(&summary);
                    runs += 1;
                }
            }
        }
        runs
    }
}

/// Resolves on ctrl-c. A failure to install the handler is logged and the
/// future never resolves, leaving the loop to be killed externally.
pub async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
