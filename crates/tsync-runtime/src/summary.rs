use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tsync_reconcile::ReconcileReport;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    /// Login, download or snapshot read.
    Snapshot,
    /// Local transaction; nothing of the batch was applied.
    Store,
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureStage::Snapshot => write!(f, "snapshot"),
            FailureStage::Store => write!(f, "store"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ServerOutcome {
    Synced {
        server: String,
        report: ReconcileReport,
    },
    Failed {
        server: String,
        stage: FailureStage,
        reason: String,
    },
}

impl ServerOutcome {
    pub fn server(&self) -> &str {
        match self {
            ServerOutcome::Synced { server, .. } | ServerOutcome::Failed { server, .. } => server,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, ServerOutcome::Failed { .. })
    }

    /// One `key=value` line for operators.
    pub fn summary_line(&self) -> String {
        match self {
            ServerOutcome::Synced { server, report } => format!(
                "server={server} status=synced examined={} updated={} skipped={} quota_raised={} disabled={} malformed={}",
                report.examined,
                report.updated,
                report.skipped_unknown,
                report.quota_raised,
                report.disabled,
                report.malformed.len()
            ),
            ServerOutcome::Failed {
                server,
                stage,
                reason,
            } => format!("server={server} status=failed stage={stage} reason={reason:?}"),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub outcomes: Vec<ServerOutcome>,
}

impl RunSummary {
    pub(crate) fn start() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            outcomes: Vec::new(),
        }
    }

    pub fn synced_count(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.is_failed()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_failed()).count()
    }

    /// Sum of `updated` across synced servers.
    pub fn total_updated(&self) -> usize {
        self.reports().map(|r| r.updated).sum()
    }

    pub fn total_malformed(&self) -> usize {
        self.reports().map(|r| r.malformed.len()).sum()
    }

    fn reports(&self) -> impl Iterator<Item = &ReconcileReport> {
        self.outcomes.iter().filter_map(|o| match o {
            ServerOutcome::Synced { report, .. } => Some(report),
            ServerOutcome::Failed { .. } => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_lines() {
        let ok = ServerOutcome::Synced {
            server: "de-1".into(),
            report: ReconcileReport {
                examined: 3,
                updated: 1,
                skipped_unknown: 2,
                ..Default::default()
            },
        };
        assert_eq!(
            ok.summary_line(),
            "server=de-1 status=synced examined=3 updated=1 skipped=2 quota_raised=0 disabled=0 malformed=0"
        );

        let failed = ServerOutcome::Failed {
            server: "nl-2".into(),
            stage: FailureStage::Snapshot,
            reason: "login refused".into(),
        };
        assert_eq!(
            failed.summary_line(),
            r#"server=nl-2 status=failed stage=snapshot reason="login refused""#
        );
    }

    #[test]
    fn counts_split_by_outcome() {
        let mut s = RunSummary::start();
        s.outcomes.push(ServerOutcome::Failed {
            server: "a".into(),
            stage: FailureStage::Store,
            reason: "locked".into(),
        });
        s.outcomes.push(ServerOutcome::Synced {
            server: "b".into(),
            report: ReconcileReport {
                updated: 4,
                ..Default::default()
            },
        });
        assert_eq!((s.synced_count(), s.failed_count(), s.total_updated()), (1, 1, 4));
    }
}
