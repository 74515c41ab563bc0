//! Model-backed pipeline stages. Each stage builds its context, calls the
//! backend once, and validates the reply into a typed artifact. Deadlines and
//! cancellation are applied by the pipeline, not here.

pub mod advocacy;
pub mod audit;
pub mod extraction;

use serde_json::Value;

use crate::agent::{GenerationBackend, PromptRole};
use crate::error::GuardError;

/// Strip a surrounding markdown code fence, if any.
pub fn strip_fences(text: &str) -> &str {
    let t = text.trim();
    if !t.starts_with("```") {
        return t;
    }
    let nl = match t.find('\n') {
        Some(i) => i,
        None => return t,
    };
    let inner = &t[nl + 1..];
    if let Some(body) = inner.trim_end().strip_suffix("```") {
        body.trim_end()
    } else {
        inner
    }
}

/// Collapse whitespace runs so quotes survive line wrapping.
pub(crate) fn squash_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

async fn generate(backend: &dyn GenerationBackend, role: PromptRole, context: &str) -> Result<String, GuardError> {
    backend
        .generate(role, context)
        .await
        .map_err(|e| GuardError::Backend { stage: role.stage(), message: format!("{e:#}") })
}

/// Accept either a bare array or an object holding the array under `key`.
fn list_under<'a>(v: &'a Value, key: &str) -> Option<&'a Value> {
    match v {
        Value::Array(_) => Some(v),
        Value::Object(map) => map.get(key).filter(|items| items.is_array()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_json_fence() {
        assert_eq!(strip_fences("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_fences("  {\"a\": 1} "), "{\"a\": 1}");
        assert_eq!(strip_fences("```\n[1]\n```\n"), "[1]");
    }

    #[test]
    fn list_under_accepts_both_shapes() {
        let bare = serde_json::json!([1, 2]);
        let wrapped = serde_json::json!({"claims": [1]});
        assert!(list_under(&bare, "claims").is_some());
        assert!(list_under(&wrapped, "claims").is_some());
        assert!(list_under(&wrapped, "flags").is_none());
        assert!(list_under(&serde_json::json!("x"), "claims").is_none());
    }
}
