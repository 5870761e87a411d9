//! Lenient parsing of generated plans.
//!
//! Plan text comes back from a language model in JSON mode. Anything that
//! does not parse degrades to an empty plan with a warning; the redesign
//! still succeeds with an empty inventory rather than failing outright.

use serde_json::Value;

use super::types::MaintenancePlan;

/// Parse plan JSON, returning an empty plan for malformed input.
///
/// Accepts a bare object or one wrapped in a Markdown code fence. Fields
/// that are missing or `null` become empty lists.
pub fn parse_plan(text: &str) -> MaintenancePlan {
    let trimmed = strip_code_fence(text.trim());
    if trimmed.is_empty() {
        tracing::warn!("plan response was empty, using empty plan");
        return MaintenancePlan::default();
    }

    let value: Value = match serde_json::from_str(trimmed) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(error = %e, "failed to parse plan JSON, using empty plan");
            return MaintenancePlan::default();
        }
    };

    let Value::Object(mut map) = value else {
        tracing::warn!("plan JSON is not an object, using empty plan");
        return MaintenancePlan::default();
    };

    // `null` arrays are treated like missing ones.
    map.retain(|_, v| !v.is_null());

    match serde_json::from_value::<MaintenancePlan>(Value::Object(map)) {
        Ok(plan) => plan,
        Err(e) => {
            tracing::warn!(error = %e, "plan JSON has unexpected shape, using empty plan");
            MaintenancePlan::default()
        }
    }
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Drop an optional language tag on the opening fence line.
    let body = rest.split_once('\n').map(|(_, body)| body).unwrap_or("");
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}
