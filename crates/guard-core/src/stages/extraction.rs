use crate::agent::{GenerationBackend, PromptRole};
use crate::error::GuardError;
use crate::types::TermSheet;

use super::{generate, strip_fences};

/// Turn raw contract text into a validated [`TermSheet`].
///
/// Any failure here is fatal to the run; there is no partial term sheet.
pub async fn extract(backend: &dyn GenerationBackend, raw_text: &str) -> Result<TermSheet, GuardError> {
    if raw_text.trim().is_empty() {
        return Err(GuardError::Extraction("contract text is empty".into()));
    }
    let reply = generate(backend, PromptRole::Extractor, raw_text).await?;
    parse(&reply)
}

/// Parse and validate an extractor reply. Missing required fields, wrong
/// types and inconsistent values are rejected, never coerced.
pub fn parse(reply: &str) -> Result<TermSheet, GuardError> {
    let sheet: TermSheet = serde_json::from_str(strip_fences(reply))
        .map_err(|e| GuardError::Extraction(format!("reply does not match the term sheet schema: {e}")))?;
    validate(&sheet)?;
    Ok(sheet)
}

fn validate(sheet: &TermSheet) -> Result<(), GuardError> {
    if sheet.parties.iter().any(|p| p.trim().is_empty()) {
        return Err(GuardError::Extraction("party names must be non-empty".into()));
    }
    if let Some(a) = sheet.amounts.iter().find(|a| a.value.is_sign_negative() || a.currency.trim().is_empty()) {
        return Err(GuardError::Extraction(format!(
            "amount {} {:?} must be non-negative with a currency",
            a.value, a.currency
        )));
    }
    if let (Some(start), Some(end)) = (sheet.effective_date, sheet.expiration_date) {
        if end < start {
            return Err(GuardError::Extraction(format!("expiration {end} precedes effective date {start}")));
        }
    }
    if let Some(p) = sheet.escalation_percent {
        if !p.is_finite() || p < 0.0 {
            return Err(GuardError::Extraction(format!("escalation_percent must be a non-negative number, got {p}")));
        }
    }
    if sheet.clauses.iter().any(|c| c.text.trim().is_empty()) {
        return Err(GuardError::Extraction("clause excerpts must carry text".into()));
    }
    Ok(())
}
