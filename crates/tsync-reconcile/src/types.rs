use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Quota sentinel: a `total` of zero means the client has no cap.
pub const UNLIMITED: i64 = 0;

/// One row of a remote panel's `client_traffics` table, as observed in a snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteTraffic {
    pub email: String,
    pub down: i64,
    pub up: i64,
    pub total: i64,
}

impl RemoteTraffic {
    pub fn new(email: impl Into<String>, down: i64, up: i64, total: i64) -> Self {
        Self {
            email: email.into(),
            down,
            up,
            total,
        }
    }

    /// Remote-observed usage, saturating rather than wrapping on hostile input.
    pub fn used(&self) -> i64 {
        self.down.saturating_add(self.up)
    }
}

/// Local traffic counters for one client.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientTraffic {
    pub email: String,
    pub inbound_id: i64,
    pub down: i64,
    pub up: i64,
    pub total: i64,
}

impl ClientTraffic {
    pub fn new(email: impl Into<String>, inbound_id: i64, down: i64, up: i64, total: i64) -> Self {
        Self {
            email: email.into(),
            inbound_id,
            down,
            up,
            total,
        }
    }

    pub fn is_unlimited(&self) -> bool {
        self.total == UNLIMITED
    }
}

/// Read half of the local store, as seen by the engine.
///
/// Implementations answer point lookups only; the engine never enumerates.
pub trait LocalView {
    /// Local traffic record for `email`, if the client exists locally.
    fn traffic(&self, email: &str) -> Option<ClientTraffic>;

    /// Raw settings document of inbound `inbound_id`, if the inbound exists.
    fn inbound_settings(&self, inbound_id: i64) -> Option<String>;
}

/// In-memory local state. The DB layer loads one of these inside its write
/// transaction; tests build them directly.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LocalSnapshot {
    /// Keyed by email.
    pub traffic: BTreeMap<String, ClientTraffic>,
    /// Raw inbound settings JSON keyed by inbound id.
    pub inbounds: BTreeMap<i64, String>,
}

impl LocalSnapshot {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn insert_traffic(&mut self, rec: ClientTraffic) {
        self.traffic.insert(rec.email.clone(), rec);
    }

    pub fn insert_inbound(&mut self, inbound_id: i64, settings: impl Into<String>) {
        self.inbounds.insert(inbound_id, settings.into());
    }

    /// Apply a computed batch to this snapshot, the same way the store applies it.
    ///
    /// Used by tests and dry runs to observe post-reconcile state.
    pub fn apply(&mut self, batch: &UpdateBatch) {
        for u in &batch.traffic {
            if let Some(rec) = self.traffic.get_mut(&u.email) {
                if let Some(down) = u.down {
                    rec.down = rec.down.max(down);
                }
                if let Some(up) = u.up {
                    rec.up = rec.up.max(up);
                }
                if let Some(total) = u.total {
                    rec.total = total;
                }
            }
        }
        for u in &batch.inbounds {
            if let Some(settings) = self.inbounds.get_mut(&u.inbound_id) {
                *settings = u.settings.clone();
            }
        }
    }
}

impl LocalView for LocalSnapshot {
    fn traffic(&self, email: &str) -> Option<ClientTraffic> {
        self.traffic.get(email).cloned()
    }

    fn inbound_settings(&self, inbound_id: i64) -> Option<String> {
        self.inbounds.get(&inbound_id).cloned()
    }
}

/// Counter raises for one client. Only raised columns are `Some`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficUpdate {
    pub email: String,
    pub down: Option<i64>,
    pub up: Option<i64>,
    pub total: Option<i64>,
}

impl TrafficUpdate {
    pub fn is_empty(&self) -> bool {
        self.down.is_none() && self.up.is_none() && self.total.is_none()
    }
}

/// Rewritten settings document for one inbound.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundSettingsUpdate {
    pub inbound_id: i64,
    pub settings: String,
}

/// All writes staged by one reconciliation pass. Applied atomically by the store.
///
/// Ordering is deterministic: traffic by email, inbounds by id.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateBatch {
    pub traffic: Vec<TrafficUpdate>,
    pub inbounds: Vec<InboundSettingsUpdate>,
}

impl UpdateBatch {
    pub fn is_empty(&self) -> bool {
        self.traffic.is_empty() && self.inbounds.is_empty()
    }

    pub fn len(&self) -> usize {
        self.traffic.len() + self.inbounds.len()
    }
}

/// An inbound's settings document could not be interpreted.
///
/// The inbound's enforcement update is skipped; counter raises for its
/// clients still go through.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MalformedEnforcementConfig {
    pub inbound_id: i64,
    pub reason: String,
}

impl std::fmt::Display for MalformedEnforcementConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "inbound {} has malformed settings: {}",
            self.inbound_id, self.reason
        )
    }
}

impl std::error::Error for MalformedEnforcementConfig {}

/// Summary of one reconciliation pass.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    /// Remote records looked at.
    pub examined: usize,
    /// Remote records that produced at least one staged write.
    pub updated: usize,
    /// Remote records with no matching local client.
    pub skipped_unknown: usize,
    /// Quota entries whose display quota was raised.
    pub quota_raised: usize,
    /// Quota entries switched from enabled to disabled.
    pub disabled: usize,
    /// One entry per inbound whose settings document failed to parse.
    pub malformed: Vec<MalformedEnforcementConfig>,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.malformed.is_empty()
    }
}

/// Engine output: the batch to apply plus its summary.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub batch: UpdateBatch,
    pub report: ReconcileReport,
}
