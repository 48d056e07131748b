use std::collections::BTreeMap;

use crate::settings::EnforcementDoc;
use crate::{
    ClientTraffic, InboundSettingsUpdate, LocalView, MalformedEnforcementConfig, ReconcileOutcome,
    ReconcileReport, RemoteTraffic, TrafficUpdate, UpdateBatch, UNLIMITED,
};

/// Per-inbound parse state, cached for the whole pass.
enum InboundState {
    Parsed(EnforcementDoc),
    Malformed,
    Missing,
}

/// Counter raises for one remote record against the current local value.
///
/// `total` is only raised from a finite local quota; an unlimited local quota
/// is never replaced by a finite remote one.
fn plan_counters(local: &ClientTraffic, remote: &RemoteTraffic) -> TrafficUpdate {
    TrafficUpdate {
        email: local.email.clone(),
        down: (remote.down > local.down).then_some(remote.down),
        up: (remote.up > local.up).then_some(remote.up),
        total: (remote.total > local.total && local.total != UNLIMITED).then_some(remote.total),
    }
}

fn merge_max(slot: &mut Option<i64>, v: Option<i64>) {
    if let Some(v) = v {
        *slot = Some(slot.map_or(v, |cur| cur.max(v)));
    }
}

fn stage(staged: &mut BTreeMap<String, TrafficUpdate>, raise: TrafficUpdate) {
    match staged.get_mut(&raise.email) {
        Some(cur) => {
            merge_max(&mut cur.down, raise.down);
            merge_max(&mut cur.up, raise.up);
            merge_max(&mut cur.total, raise.total);
        }
        None => {
            staged.insert(raise.email.clone(), raise);
        }
    }
}

fn inbound_doc<'a, V: LocalView + ?Sized>(
    docs: &'a mut BTreeMap<i64, InboundState>,
    local: &V,
    inbound_id: i64,
    malformed: &mut Vec<MalformedEnforcementConfig>,
) -> Option<&'a mut EnforcementDoc> {
    let state = docs.entry(inbound_id).or_insert_with(|| {
        match local.inbound_settings(inbound_id) {
            None => InboundState::Missing,
            Some(raw) => match EnforcementDoc::parse(inbound_id, &raw) {
                Ok(doc) => InboundState::Parsed(doc),
                Err(e) => {
                    malformed.push(e);
                    InboundState::Malformed
                }
            },
        }
    });
    match state {
        InboundState::Parsed(doc) => Some(doc),
        InboundState::Malformed | InboundState::Missing => None,
    }
}

/// Recompute enforcement for one client. Returns `true` if the document changed.
///
/// Usage is the remote-observed `down + up`, checked against the final
/// (possibly just raised) total, so a quota raise and a disable can land in
/// the same pass.
fn enforce(
    doc: &mut EnforcementDoc,
    local: &ClientTraffic,
    remote: &RemoteTraffic,
    raised_total: Option<i64>,
    report: &mut ReconcileReport,
) -> bool {
    if !doc.contains(&remote.email) {
        return false;
    }

    let mut changed = false;
    let total_final = raised_total.unwrap_or(local.total);

    if raised_total.is_some() && doc.set_quota(&remote.email, total_final) {
        report.quota_raised += 1;
        changed = true;
    }

    if total_final != UNLIMITED && remote.used() > total_final && doc.disable(&remote.email) {
        report.disabled += 1;
        changed = true;
    }

    changed
}

/// Reconcile one remote snapshot against the local view.
///
/// - Remote records with no local client are skipped and counted.
/// - Counters are raised independently; nothing is ever lowered.
/// - Each inbound document is parsed at most once and serialized only if it
///   changed. A malformed document is reported once; counter raises for its
///   clients still go through.
/// - Output ordering is deterministic regardless of input order.
pub fn reconcile<V: LocalView + ?Sized>(remote: &[RemoteTraffic], local: &V) -> ReconcileOutcome {
    let mut report = ReconcileReport::default();
    let mut effective: BTreeMap<String, ClientTraffic> = BTreeMap::new();
    let mut staged: BTreeMap<String, TrafficUpdate> = BTreeMap::new();
    let mut docs: BTreeMap<i64, InboundState> = BTreeMap::new();

    for rec in remote {
        report.examined += 1;

        // Duplicate identities in one snapshot compare against the value left
        // by earlier raises, so the outcome does not depend on order.
        let current = match effective.get(&rec.email) {
            Some(c) => c.clone(),
            None => match local.traffic(&rec.email) {
                Some(c) => c,
                None => {
                    report.skipped_unknown += 1;
                    continue;
                }
            },
        };

        let raise = plan_counters(&current, rec);

        let enforcement_changed =
            match inbound_doc(&mut docs, local, current.inbound_id, &mut report.malformed) {
                Some(doc) => enforce(doc, &current, rec, raise.total, &mut report),
                None => false,
            };

        let counters_changed = !raise.is_empty();
        if counters_changed || enforcement_changed {
            report.updated += 1;
        }

        let mut next = current;
        if counters_changed {
            merge_max_into(&mut next, &raise);
            stage(&mut staged, raise);
        }
        effective.insert(next.email.clone(), next);
    }

    let inbounds = docs
        .into_iter()
        .filter_map(|(inbound_id, state)| match state {
            InboundState::Parsed(doc) if doc.is_dirty() => Some(InboundSettingsUpdate {
                inbound_id,
                settings: doc.into_json(),
            }),
            _ => None,
        })
        .collect();

    ReconcileOutcome {
        batch: UpdateBatch {
            traffic: staged.into_values().collect(),
            inbounds,
        },
        report,
    }
}

fn merge_max_into(rec: &mut ClientTraffic, raise: &TrafficUpdate) {
    if let Some(down) = raise.down {
        rec.down = rec.down.max(down);
    }
    if let Some(up) = raise.up {
        rec.up = rec.up.max(up);
    }
    if let Some(total) = raise.total {
        rec.total = total;
    }
}
