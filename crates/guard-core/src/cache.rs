use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::GuardError;
use crate::samples;
use crate::types::{ArgumentSet, FlagSet, Recommendation, RiskVerdict, TermSheet};

/// A complete, pre-computed analysis of one bundled sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedAnalysis {
    pub sample_id: String,
    pub name: String,
    pub term_sheet: TermSheet,
    pub arguments: ArgumentSet,
    pub flags: FlagSet,
    pub verdict: RiskVerdict,
}

/// Sidebar-level view of a cached analysis.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampleSummary {
    pub id: String,
    pub name: String,
    pub fingerprint: String,
    pub score: u32,
    pub recommendation: Recommendation,
    pub parties: Vec<String>,
    pub headline_value: Option<Decimal>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PortfolioSummary {
    pub contracts: usize,
    pub approve: usize,
    pub legal_review: usize,
    pub reject: usize,
    pub total_value: Decimal,
}

/// Read-only map from text fingerprint to a cached analysis.
///
/// Loaded once at startup and shared behind an `Arc`; `insert` and `save` are
/// only used by the offline population tool.
#[derive(Debug, Clone, Default)]
pub struct ResultCache {
    entries: BTreeMap<String, CachedAnalysis>,
}

impl ResultCache {
    pub fn empty() -> Self {
        Self::default()
    }

    /// A missing file yields an empty cache; an unreadable or malformed one
    /// is an error.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, GuardError> {
        let path = path.as_ref();
        let data = match std::fs::read_to_string(path) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("demo cache: {} not found; demo mode will reject every submission", path.display());
                return Ok(Self::empty());
            }
            Err(e) => return Err(GuardError::Config(format!("demo cache {}: {e}", path.display()))),
        };
        let cache = Self::from_json(&data)
            .map_err(|e| GuardError::Config(format!("demo cache {}: {e}", path.display())))?;
        info!("demo cache: loaded {} analyses from {}", cache.len(), path.display());
        Ok(cache)
    }

    pub fn from_json(data: &str) -> Result<Self, serde_json::Error> {
        let entries: BTreeMap<String, CachedAnalysis> = serde_json::from_str(data)?;
        Ok(Self { entries })
    }

    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(&self.entries)?;
        std::fs::write(path, json + "\n").with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }

    pub fn insert(&mut self, fingerprint: String, analysis: CachedAnalysis) -> Option<CachedAnalysis> {
        self.entries.insert(fingerprint, analysis)
    }

    pub fn get(&self, fingerprint: &str) -> Option<&CachedAnalysis> {
        self.entries.get(fingerprint)
    }

    pub fn contains(&self, fingerprint: &str) -> bool {
        self.entries.contains_key(fingerprint)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Summaries in catalog order.
    pub fn summaries(&self) -> Vec<SampleSummary> {
        let mut out: Vec<SampleSummary> = self
            .entries
            .iter()
            .map(|(fingerprint, a)| SampleSummary {
                id: a.sample_id.clone(),
                name: a.name.clone(),
                fingerprint: fingerprint.clone(),
                score: a.verdict.score,
                recommendation: a.verdict.recommendation,
                parties: a.term_sheet.parties.iter().cloned().collect(),
                headline_value: a.term_sheet.headline_amount().map(|m| m.value),
            })
            .collect();
        out.sort_by(|a, b| samples::position(&a.id).cmp(&samples::position(&b.id)).then_with(|| a.id.cmp(&b.id)));
        out
    }

    pub fn portfolio(&self) -> PortfolioSummary {
        self.entries.values().fold(PortfolioSummary::default(), |mut acc, a| {
            acc.contracts += 1;
            match a.verdict.recommendation {
                Recommendation::Approve => acc.approve += 1,
                Recommendation::LegalReview => acc.legal_review += 1,
                Recommendation::Reject => acc.reject += 1,
            }
            if let Some(m) = a.term_sheet.headline_amount() {
                acc.total_value += m.value;
            }
            acc
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::types::{ClauseExcerpt, MonetaryAmount};

    fn analysis(id: &str, score: u32, value: i64) -> CachedAnalysis {
        CachedAnalysis {
            sample_id: id.into(),
            name: id.to_uppercase(),
            term_sheet: TermSheet {
                parties: BTreeSet::from(["Acme".to_string()]),
                effective_date: None,
                expiration_date: None,
                amounts: vec![MonetaryAmount { currency: "USD".into(), value: Decimal::from(value) }],
                payment_term_days: 30,
                return_window_days: None,
                renewal: None,
                escalation_percent: None,
                liability_cap: None,
                clauses: vec![ClauseExcerpt { clause_type: "payment".into(), text: "Net 30 days".into() }],
            },
            arguments: ArgumentSet::default(),
            flags: FlagSet::default(),
            verdict: RiskVerdict {
                score,
                confidence: 0.5,
                recommendation: Recommendation::from_score(score),
                contributions: vec![],
                rationale: String::new(),
            },
        }
    }

    #[test]
    fn missing_file_is_empty_cache() {
        let cache = ResultCache::load("/nonexistent/demo_results.json").unwrap();
        assert!(cache.is_empty());
    }

    #[test]
    fn malformed_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("demo.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = ResultCache::load(&path).unwrap_err();
        assert_eq!(err.kind(), "config");
    }

    #[test]
    fn unreadable_path_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ResultCache::load(dir.path()).unwrap_err();
        assert_eq!(err.kind(), "config");
        assert!(err.to_string().contains(&dir.path().display().to_string()));
    }

    #[test]
    fn save_then_load_preserves_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/demo.json");
        let mut cache = ResultCache::empty();
        cache.insert("fp-a".into(), analysis("consignment", 80, 500));
        cache.save(&path).unwrap();

        let loaded = ResultCache::load(&path).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.get("fp-a"), cache.get("fp-a"));
    }

    #[test]
    fn summaries_follow_catalog_order_and_portfolio_counts() {
        let mut cache = ResultCache::empty();
        cache.insert("zz".into(), analysis("standard_saas", 10, 100));
        cache.insert("aa".into(), analysis("consignment", 85, 1000));
        cache.insert("mm".into(), analysis("extended_payment", 45, 250));

        let ids: Vec<_> = cache.summaries().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, ["standard_saas", "extended_payment", "consignment"]);

        let p = cache.portfolio();
        assert_eq!((p.contracts, p.approve, p.legal_review, p.reject), (3, 1, 1, 1));
        assert_eq!(p.total_value, Decimal::from(1350));
    }
}
