use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agent::{GenerationBackend, PromptRole};
use crate::error::GuardError;
use crate::policy::PolicyThresholds;
use crate::types::{Classification, Flag, FlagSet, RiskCategory, Severity, Stage, TermSheet};

use super::{generate, list_under, squash_whitespace, strip_fences};

/// What the auditor sees: the term sheet and the policy limits it is held to.
#[derive(Serialize)]
pub struct AuditContext<'a> {
    pub term_sheet: &'a TermSheet,
    pub policy: &'a PolicyThresholds,
}

pub fn context(term_sheet: &TermSheet, policy: &PolicyThresholds) -> Result<String, GuardError> {
    serde_json::to_string_pretty(&AuditContext { term_sheet, policy })
        .map_err(|e| GuardError::Schema { stage: Stage::Audit, message: format!("serializing audit context: {e}") })
}

/// Argue against accepting the contract.
pub async fn audit(
    backend: &dyn GenerationBackend,
    term_sheet: &TermSheet,
    policy: &PolicyThresholds,
) -> Result<FlagSet, GuardError> {
    let reply = generate(backend, PromptRole::Auditor, &context(term_sheet, policy)?).await?;
    parse(&reply, term_sheet, policy)
}

#[derive(Deserialize)]
struct RawFlag {
    category: String,
    severity: Severity,
    quote: String,
    #[serde(default)]
    remediation: Option<String>,
    #[serde(default)]
    classification: Option<Classification>,
    #[serde(default)]
    finding: String,
    #[serde(default)]
    reference: Option<String>,
}

/// Validate auditor output against the term sheet.
///
/// Every quote must appear in some clause excerpt (whitespace-insensitive);
/// a declared classification must agree with the category's.
pub fn parse(reply: &str, term_sheet: &TermSheet, policy: &PolicyThresholds) -> Result<FlagSet, GuardError> {
    let schema = |message: String| GuardError::Schema { stage: Stage::Audit, message };

    let v: Value = serde_json::from_str(strip_fences(reply)).map_err(|e| schema(format!("reply is not JSON: {e}")))?;
    let items = list_under(&v, "flags").ok_or_else(|| schema("expected a `flags` array".into()))?;
    let raw: Vec<RawFlag> =
        serde_json::from_value(items.clone()).map_err(|e| schema(format!("flag does not match schema: {e}")))?;

    let excerpts: Vec<String> = term_sheet.clauses.iter().map(|c| squash_whitespace(&c.text)).collect();

    let mut flags = Vec::with_capacity(raw.len());
    for f in raw {
        let category = RiskCategory::from_tag(&f.category)
            .ok_or_else(|| schema(format!("unknown risk category {:?}", f.category)))?;

        let derived = category.classification();
        if let Some(declared) = f.classification {
            if declared != derived {
                return Err(schema(format!("{category} is {derived:?}, flag declared {declared:?}")));
            }
        }

        let quote = squash_whitespace(f.quote.trim().trim_matches('"'));
        if quote.is_empty() {
            return Err(schema(format!("{category} flag has an empty quote")));
        }
        if !excerpts.iter().any(|e| e.contains(&quote)) {
            return Err(GuardError::UnsupportedFlag { category, quote });
        }

        let remediation = f
            .remediation
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| category.default_remediation().to_string());
        let reference = f
            .reference
            .filter(|r| !r.trim().is_empty())
            .or_else(|| policy.reference_for(category).map(String::from));

        flags.push(Flag {
            category,
            severity: f.severity,
            quote,
            remediation,
            classification: derived,
            finding: f.finding,
            reference,
        });
    }
    Ok(FlagSet::new(flags))
}
