//! Enforcement document: the `settings` column of an inbound.
//!
//! x-ui stores each inbound's client list as a JSON document embedded in the
//! `inbounds.settings` column. Per-client quota enforcement lives inside that
//! document:
//!
//! ```json
//! { "clients": [ { "email": "a@x", "totalGB": 1073741824, "enable": true, ... } ], ... }
//! ```
//!
//! [`EnforcementDoc`] parses the document once, indexes `clients` by email and
//! rewrites only the two fields this crate owns (`totalGB`, `enable`). Every
//! other key, including unknown ones, is carried through untouched and in its
//! original order.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::MalformedEnforcementConfig;

const CLIENTS_KEY: &str = "clients";
const EMAIL_KEY: &str = "email";
const QUOTA_KEY: &str = "totalGB";
const ENABLE_KEY: &str = "enable";

/// Read-only view of one client's quota entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QuotaEntry {
    pub email: String,
    /// Display quota (`totalGB`). x-ui stores bytes here despite the name.
    pub quota: i64,
    /// A missing `enable` key reads as enabled.
    pub enabled: bool,
}

/// Parsed settings document of one inbound.
#[derive(Clone, Debug)]
pub struct EnforcementDoc {
    inbound_id: i64,
    root: Map<String, Value>,
    /// email -> position in `clients`. First occurrence wins.
    index: BTreeMap<String, usize>,
    dirty: bool,
}

fn malformed(inbound_id: i64, reason: impl Into<String>) -> MalformedEnforcementConfig {
    MalformedEnforcementConfig {
        inbound_id,
        reason: reason.into(),
    }
}

impl EnforcementDoc {
    /// Parse a raw settings document.
    ///
    /// A document without a `clients` key is valid and has no entries.
    pub fn parse(inbound_id: i64, raw: &str) -> Result<Self, MalformedEnforcementConfig> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|e| malformed(inbound_id, format!("invalid json: {e}")))?;

        let Value::Object(root) = value else {
            return Err(malformed(inbound_id, "settings is not a JSON object"));
        };

        let mut index = BTreeMap::new();
        match root.get(CLIENTS_KEY) {
            None => {}
            Some(Value::Array(clients)) => {
                for (pos, client) in clients.iter().enumerate() {
                    let Value::Object(obj) = client else {
                        return Err(malformed(
                            inbound_id,
                            format!("clients[{pos}] is not an object"),
                        ));
                    };
                    // Entries without a string email cannot be matched; keep them verbatim.
                    if let Some(Value::String(email)) = obj.get(EMAIL_KEY) {
                        index.entry(email.clone()).or_insert(pos);
                    }
                }
            }
            Some(_) => return Err(malformed(inbound_id, "`clients` is not an array")),
        }

        Ok(Self {
            inbound_id,
            root,
            index,
            dirty: false,
        })
    }

    pub fn inbound_id(&self) -> i64 {
        self.inbound_id
    }

    /// Number of addressable (email-keyed) entries.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn contains(&self, email: &str) -> bool {
        self.index.contains_key(email)
    }

    /// `true` once any setter actually changed the document.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn entry(&self, email: &str) -> Option<QuotaEntry> {
        let obj = self.client(email)?;
        Some(QuotaEntry {
            email: email.to_string(),
            quota: obj.get(QUOTA_KEY).and_then(Value::as_i64).unwrap_or(0),
            enabled: obj.get(ENABLE_KEY).and_then(Value::as_bool).unwrap_or(true),
        })
    }

    /// Set the display quota. Returns `true` if the document changed.
    pub fn set_quota(&mut self, email: &str, quota: i64) -> bool {
        let Some(obj) = self.client_mut(email) else {
            return false;
        };
        if obj.get(QUOTA_KEY).and_then(Value::as_i64) == Some(quota) {
            return false;
        }
        obj.insert(QUOTA_KEY.to_string(), Value::from(quota));
        self.dirty = true;
        true
    }

    /// Disable the client. Returns `true` if it was not already disabled.
    pub fn disable(&mut self, email: &str) -> bool {
        let Some(obj) = self.client_mut(email) else {
            return false;
        };
        if obj.get(ENABLE_KEY) == Some(&Value::Bool(false)) {
            return false;
        }
        obj.insert(ENABLE_KEY.to_string(), Value::Bool(false));
        self.dirty = true;
        true
    }

    /// Serialize back to the settings column format.
    pub fn into_json(self) -> String {
        Value::Object(self.root).to_string()
    }

    fn client(&self, email: &str) -> Option<&Map<String, Value>> {
        let pos = *self.index.get(email)?;
        self.root
            .get(CLIENTS_KEY)?
            .as_array()?
            .get(pos)?
            .as_object()
    }

    fn client_mut(&mut self, email: &str) -> Option<&mut Map<String, Value>> {
        let pos = *self.index.get(email)?;
        self.root
            .get_mut(CLIENTS_KEY)?
            .as_array_mut()?
            .get_mut(pos)?
            .as_object_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"{"clients":[{"id":"u-1","email":"a@x","totalGB":1000,"enable":true,"flow":""},{"id":"u-2","email":"b@x","totalGB":0}],"decryption":"none","fallbacks":[]}"#;

    #[test]
    fn parse_indexes_clients_by_email() {
        let doc = EnforcementDoc::parse(1, DOC).unwrap();
        assert_eq!(doc.len(), 2);
        assert!(doc.contains("a@x"));
        assert!(!doc.contains("c@x"));

        let b = doc.entry("b@x").unwrap();
        assert_eq!(b.quota, 0);
        assert!(b.enabled, "missing enable must read as enabled");
    }

    #[test]
    fn untouched_doc_is_not_dirty() {
        let doc = EnforcementDoc::parse(1, DOC).unwrap();
        assert!(!doc.is_dirty());
    }

    #[test]
    fn rewrite_preserves_unknown_keys_and_order() {
        let mut doc = EnforcementDoc::parse(1, DOC).unwrap();
        assert!(doc.disable("a@x"));
        let out = doc.into_json();
        assert_eq!(
            out,
            r#"{"clients":[{"id":"u-1","email":"a@x","totalGB":1000,"enable":false,"flow":""},{"id":"u-2","email":"b@x","totalGB":0}],"decryption":"none","fallbacks":[]}"#
        );
    }

    #[test]
    fn setters_report_no_change_when_value_already_holds() {
        let mut doc = EnforcementDoc::parse(1, DOC).unwrap();
        assert!(!doc.set_quota("a@x", 1000));
        assert!(doc.disable("a@x"));
        assert!(!doc.disable("a@x"));
        assert!(doc.set_quota("a@x", 2000));
        assert_eq!(doc.entry("a@x").unwrap().quota, 2000);
    }

    #[test]
    fn setters_ignore_unknown_email() {
        let mut doc = EnforcementDoc::parse(1, DOC).unwrap();
        assert!(!doc.disable("nobody@x"));
        assert!(!doc.set_quota("nobody@x", 5));
        assert!(!doc.is_dirty());
    }

    #[test]
    fn duplicate_email_first_entry_wins() {
        let raw = r#"{"clients":[{"email":"a@x","totalGB":1},{"email":"a@x","totalGB":2}]}"#;
        let mut doc = EnforcementDoc::parse(9, raw).unwrap();
        assert_eq!(doc.entry("a@x").unwrap().quota, 1);
        doc.disable("a@x");
        assert_eq!(
            doc.into_json(),
            r#"{"clients":[{"email":"a@x","totalGB":1,"enable":false},{"email":"a@x","totalGB":2}]}"#
        );
    }

    #[test]
    fn doc_without_clients_is_valid_and_empty() {
        let doc = EnforcementDoc::parse(3, r#"{"decryption":"none"}"#).unwrap();
        assert!(doc.is_empty());
    }

    #[test]
    fn entries_without_email_are_kept_but_unindexed() {
        let raw = r#"{"clients":[{"password":"p"},{"email":"a@x"}]}"#;
        let doc = EnforcementDoc::parse(3, raw).unwrap();
        assert_eq!(doc.len(), 1);
        assert_eq!(doc.into_json(), raw);
    }

    #[test]
    fn malformed_documents_are_rejected_with_inbound_id() {
        let cases = [
            "{not json",
            "[1,2,3]",
            r#"{"clients":{"email":"a@x"}}"#,
            r#"{"clients":["a@x"]}"#,
        ];
        for raw in cases {
            let err = EnforcementDoc::parse(42, raw).unwrap_err();
            assert_eq!(err.inbound_id, 42, "case {raw}");
            assert!(err.to_string().starts_with("inbound 42 has malformed settings"));
        }
    }
}
