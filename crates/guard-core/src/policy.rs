use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::error::GuardError;
use crate::types::RiskCategory;

/// Company policy limits that audit and resolution read.
///
/// Loaded once per process and shared read-only; unknown top-level keys in the
/// policy document are ignored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolicyThresholds {
    pub payment_terms_max_days: u32,
    pub return_period_max_days: u32,
    pub auto_escalation_max_percent: f64,
    pub requires_legal_review: BTreeSet<RiskCategory>,
    /// ASC 606 paragraph references attached to flags of each category.
    pub asc_606_references: BTreeMap<RiskCategory, String>,
}

impl PolicyThresholds {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, GuardError> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path)
            .map_err(|e| GuardError::Config(format!("cannot read policy {}: {e}", path.display())))?;
        let policy = Self::from_json(&data)?;
        info!(
            path = %path.display(),
            payment_days = policy.payment_terms_max_days,
            return_days = policy.return_period_max_days,
            escalation = policy.auto_escalation_max_percent,
            review_categories = policy.requires_legal_review.len(),
            "loaded policy"
        );
        Ok(policy)
    }

    pub fn from_json(data: &str) -> Result<Self, GuardError> {
        let v: Value =
            serde_json::from_str(data).map_err(|e| GuardError::Config(format!("policy is not valid JSON: {e}")))?;
        Self::from_value(&v)
    }

    pub fn from_value(v: &Value) -> Result<Self, GuardError> {
        if !v.is_object() {
            return Err(GuardError::Config("policy document must be a JSON object".into()));
        }

        let requires_legal_review = match v.get("requires_legal_review") {
            None => return Err(GuardError::Config("missing required key `requires_legal_review`".into())),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_str().and_then(RiskCategory::from_tag).ok_or_else(|| {
                        GuardError::Config(format!("`requires_legal_review` has unknown risk category {item}"))
                    })
                })
                .collect::<Result<BTreeSet<_>, _>>()?,
            Some(other) => {
                return Err(GuardError::Config(format!("`requires_legal_review` must be an array, got {other}")))
            }
        };

        let mut asc_606_references = BTreeMap::new();
        match v.get("asc_606_references") {
            None | Some(Value::Null) => {}
            Some(Value::Object(map)) => {
                for (tag, reference) in map {
                    let category = RiskCategory::from_tag(tag).ok_or_else(|| {
                        GuardError::Config(format!("`asc_606_references` has unknown risk category {tag:?}"))
                    })?;
                    let reference = reference.as_str().ok_or_else(|| {
                        GuardError::Config(format!("`asc_606_references.{tag}` must be a string"))
                    })?;
                    asc_606_references.insert(category, reference.to_string());
                }
            }
            Some(other) => {
                return Err(GuardError::Config(format!("`asc_606_references` must be an object, got {other}")))
            }
        }

        Ok(Self {
            payment_terms_max_days: positive_days(v, "payment_terms_max_days")?,
            return_period_max_days: positive_days(v, "return_period_max_days")?,
            auto_escalation_max_percent: positive_number(v, "auto_escalation_max_percent")?,
            requires_legal_review,
            asc_606_references,
        })
    }

    pub fn requires_review(&self, category: RiskCategory) -> bool {
        self.requires_legal_review.contains(&category)
    }

    pub fn reference_for(&self, category: RiskCategory) -> Option<&str> {
        self.asc_606_references.get(&category).map(String::as_str)
    }
}

fn positive_days(v: &Value, key: &str) -> Result<u32, GuardError> {
    let raw = v.get(key).ok_or_else(|| GuardError::Config(format!("missing required key `{key}`")))?;
    raw.as_u64()
        .filter(|n| *n > 0)
        .and_then(|n| u32::try_from(n).ok())
        .ok_or_else(|| GuardError::Config(format!("`{key}` must be a positive integer, got {raw}")))
}

fn positive_number(v: &Value, key: &str) -> Result<f64, GuardError> {
    let raw = v.get(key).ok_or_else(|| GuardError::Config(format!("missing required key `{key}`")))?;
    raw.as_f64()
        .filter(|n| n.is_finite() && *n > 0.0)
        .ok_or_else(|| GuardError::Config(format!("`{key}` must be a positive number, got {raw}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"{
        "payment_terms_max_days": 60,
        "return_period_max_days": 30,
        "auto_escalation_max_percent": 3,
        "requires_legal_review": ["unlimited-liability", "unconditional_return"],
        "asc_606_references": { "extended-payment": "ASC 606-10-32-15" },
        "owner": "finance"
    }"#;

    #[test]
    fn parses_valid_policy_and_ignores_extra_keys() {
        let p = PolicyThresholds::from_json(VALID).unwrap();
        assert_eq!(p.payment_terms_max_days, 60);
        assert_eq!(p.return_period_max_days, 30);
        assert_eq!(p.auto_escalation_max_percent, 3.0);
        assert!(p.requires_review(RiskCategory::UnconditionalReturn));
        assert!(!p.requires_review(RiskCategory::Consignment));
        assert_eq!(p.reference_for(RiskCategory::ExtendedPayment), Some("ASC 606-10-32-15"));
        assert_eq!(p.reference_for(RiskCategory::Consignment), None);
    }

    #[test]
    fn rejects_missing_key() {
        let err = PolicyThresholds::from_json(r#"{"return_period_max_days": 30, "auto_escalation_max_percent": 3, "requires_legal_review": []}"#)
            .unwrap_err();
        assert!(matches!(err, GuardError::Config(ref m) if m.contains("payment_terms_max_days")));
    }

    #[test]
    fn rejects_non_positive_values() {
        for bad in ["0", "-5", "12.5", "\"60\""] {
            let doc = format!(
                r#"{{"payment_terms_max_days": {bad}, "return_period_max_days": 30, "auto_escalation_max_percent": 3, "requires_legal_review": []}}"#
            );
            assert!(PolicyThresholds::from_json(&doc).is_err(), "accepted {bad}");
        }
        let doc = r#"{"payment_terms_max_days": 60, "return_period_max_days": 30, "auto_escalation_max_percent": 0, "requires_legal_review": []}"#;
        assert!(PolicyThresholds::from_json(doc).is_err());
    }

    #[test]
    fn rejects_unknown_category() {
        let doc = r#"{"payment_terms_max_days": 60, "return_period_max_days": 30, "auto_escalation_max_percent": 3, "requires_legal_review": ["rebates"]}"#;
        let err = PolicyThresholds::from_json(doc).unwrap_err();
        assert_eq!(err.kind(), "config");
        assert!(err.to_string().contains("rebates"));
    }

    #[test]
    fn load_reports_missing_file() {
        let err = PolicyThresholds::load("/nonexistent/policy.json").unwrap_err();
        assert!(matches!(err, GuardError::Config(_)));
    }
}
