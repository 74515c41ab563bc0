//! Deterministic, offline generation backend.
//!
//! Stands in for a model: pattern extraction for the extractor role and
//! policy rules for the advocate and auditor. Replies use the same JSON shapes
//! the model prompts ask for, so they go through the same stage validation.

pub mod extract;
pub mod review;

use anyhow::{Context, Result};
use async_trait::async_trait;
use guard_core::agent::{GenerationBackend, PromptRole};
use guard_core::policy::PolicyThresholds;
use guard_core::TermSheet;
use serde_json::{json, Value};
use tracing::debug;

pub use extract::TermExtractor;

pub struct RuleBackend {
    extractor: TermExtractor,
}

impl RuleBackend {
    pub fn new() -> Result<Self> {
        Ok(Self { extractor: TermExtractor::new().context("compiling extraction patterns")? })
    }

    fn extract(&self, raw_text: &str) -> Result<String> {
        let sheet = self.extractor.extract(raw_text);
        Ok(serde_json::to_string_pretty(&sheet)?)
    }

    fn advocate(&self, context: &str) -> Result<String> {
        let sheet: TermSheet = serde_json::from_str(context).context("advocate context is not a term sheet")?;
        Ok(serde_json::to_string_pretty(&json!({ "claims": review::advocate(&sheet) }))?)
    }

    fn audit(&self, context: &str) -> Result<String> {
        let v: Value = serde_json::from_str(context).context("audit context is not JSON")?;
        let sheet: TermSheet =
            serde_json::from_value(v["term_sheet"].clone()).context("audit context lacks a term sheet")?;
        let policy = PolicyThresholds::from_value(&v["policy"]).context("audit context lacks a policy")?;
        Ok(serde_json::to_string_pretty(&json!({ "flags": review::audit(&sheet, &policy) }))?)
    }
}

#[async_trait]
impl GenerationBackend for RuleBackend {
    fn name(&self) -> &str {
        "rules"
    }

    async fn generate(&self, role: PromptRole, context: &str) -> Result<String> {
        let reply = match role {
            PromptRole::Extractor => self.extract(context)?,
            PromptRole::Advocate => self.advocate(context)?,
            PromptRole::Auditor => self.audit(context)?,
        };
        debug!(role = role.as_str(), output_len = reply.len(), "rule reply generated");
        Ok(reply)
    }
}
