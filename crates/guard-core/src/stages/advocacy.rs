use serde_json::Value;

use crate::agent::{GenerationBackend, PromptRole};
use crate::error::GuardError;
use crate::types::{ArgumentSet, Claim, Stage, TermSheet};

use super::{generate, list_under, strip_fences};

pub fn context(term_sheet: &TermSheet) -> Result<String, GuardError> {
    serde_json::to_string_pretty(term_sheet)
        .map_err(|e| GuardError::Schema { stage: Stage::Advocacy, message: format!("serializing term sheet: {e}") })
}

/// Argue for accepting the contract. An empty claim list is a valid outcome.
pub async fn advocate(backend: &dyn GenerationBackend, term_sheet: &TermSheet) -> Result<ArgumentSet, GuardError> {
    let reply = generate(backend, PromptRole::Advocate, &context(term_sheet)?).await?;
    parse(&reply)
}

pub fn parse(reply: &str) -> Result<ArgumentSet, GuardError> {
    let schema = |message: String| GuardError::Schema { stage: Stage::Advocacy, message };

    let v: Value = serde_json::from_str(strip_fences(reply)).map_err(|e| schema(format!("reply is not JSON: {e}")))?;
    let items = list_under(&v, "claims").ok_or_else(|| schema("expected a `claims` array".into()))?;
    let claims: Vec<Claim> =
        serde_json::from_value(items.clone()).map_err(|e| schema(format!("claim does not match schema: {e}")))?;

    if let Some(i) = claims.iter().position(|c| c.assertion.trim().is_empty()) {
        return Err(schema(format!("claim {i} has an empty assertion")));
    }
    Ok(ArgumentSet::new(claims))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ClaimStrength;

    #[test]
    fn parses_wrapped_and_bare_claims() {
        let wrapped = r#"{"claims": [{"category": "payment", "assertion": "Net 45 is market standard",
            "term_ref": "payment_term_days", "strength": "strong"}]}"#;
        let set = parse(wrapped).unwrap();
        assert_eq!(set.claims.len(), 1);
        assert_eq!(set.claims[0].strength, ClaimStrength::Strong);

        let bare = r#"[{"category": "renewal", "assertion": "Renewal is mutual", "term_ref": "renewal"}]"#;
        let set = parse(bare).unwrap();
        assert_eq!(set.claims[0].strength, ClaimStrength::Moderate);
    }

    #[test]
    fn empty_claims_are_valid() {
        assert!(parse(r#"{"claims": []}"#).unwrap().claims.is_empty());
    }

    #[test]
    fn malformed_claims_are_schema_errors() {
        let err = parse(r#"{"claims": [{"category": "x"}]}"#).unwrap_err();
        assert!(matches!(err, GuardError::Schema { stage: Stage::Advocacy, .. }));
        let err = parse(r#"{"arguments": []}"#).unwrap_err();
        assert_eq!(err.kind(), "schema");
        let err = parse(r#"[{"category": "x", "assertion": "  ", "term_ref": "y"}]"#).unwrap_err();
        assert!(err.to_string().contains("empty assertion"));
    }
}
