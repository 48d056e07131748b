//! Panel password resolution.
//!
//! A server entry carries its password either inline (`"pass"`) or as the
//! NAME of an environment variable (`"pass_env"`). The inline form wins when
//! both are present.
//!
//! Error messages reference the env var **name**, never a value, and every
//! secret-holding type redacts it in `Debug`.

use serde_json::{Map, Value};

pub const REDACTED: &str = "<REDACTED>";

/// Resolve a named environment variable.
/// Returns `None` if the variable is unset or its value is blank.
fn resolve_env(var_name: &str) -> Option<String> {
    match std::env::var(var_name) {
        Ok(v) if !v.trim().is_empty() => Some(v),
        _ => None,
    }
}

/// Password for one server entry.
///
/// Inline passwords are taken verbatim (no trimming); a blank one counts as
/// missing.
pub(crate) fn resolve_password(obj: &Map<String, Value>) -> Result<String, String> {
    if let Some(pass) = obj.get("pass").and_then(Value::as_str) {
        if !pass.trim().is_empty() {
            return Ok(pass.to_string());
        }
    }

    if let Some(var) = crate::read_str(obj, "pass_env") {
        return resolve_env(&var)
            .ok_or_else(|| format!("env var {var} named by 'pass_env' is unset or blank"));
    }

    Err("missing key 'pass'".to_string())
}
