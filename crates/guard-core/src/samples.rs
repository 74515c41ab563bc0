use std::path::Path;

use anyhow::{Context, Result};

/// A bundled sample contract served by demo mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleContract {
    pub id: &'static str,
    pub file: &'static str,
    pub name: &'static str,
}

pub const SAMPLE_CONTRACTS: [SampleContract; 8] = [
    SampleContract { id: "standard_saas", file: "standard_saas.txt", name: "Standard SaaS Agreement" },
    SampleContract {
        id: "extended_payment",
        file: "extended_payment.txt",
        name: "Enterprise Software License (Net 120)",
    },
    SampleContract {
        id: "right_of_return",
        file: "right_of_return.txt",
        name: "Distribution Agreement (90-day Returns)",
    },
    SampleContract {
        id: "milestone_payment",
        file: "milestone_payment.txt",
        name: "Custom Development (Milestone-based)",
    },
    SampleContract {
        id: "price_protection",
        file: "price_protection.txt",
        name: "Strategic Supply (MFC Clause)",
    },
    SampleContract {
        id: "auto_renewal",
        file: "auto_renewal.txt",
        name: "Managed IT Services (5% Escalation)",
    },
    SampleContract { id: "consignment", file: "consignment.txt", name: "Consignment Agreement" },
    SampleContract { id: "clean_license", file: "clean_license.txt", name: "Software License (Clean)" },
];

pub fn find(id: &str) -> Option<&'static SampleContract> {
    SAMPLE_CONTRACTS.iter().find(|s| s.id == id)
}

/// Position in the catalog, used to keep listings in a stable order.
pub fn position(id: &str) -> usize {
    SAMPLE_CONTRACTS.iter().position(|s| s.id == id).unwrap_or(SAMPLE_CONTRACTS.len())
}

impl SampleContract {
    pub fn read(&self, dir: impl AsRef<Path>) -> Result<String> {
        let path = dir.as_ref().join(self.file);
        std::fs::read_to_string(&path).with_context(|| format!("reading sample {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_ids_are_unique() {
        let mut ids: Vec<_> = SAMPLE_CONTRACTS.iter().map(|s| s.id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), SAMPLE_CONTRACTS.len());
    }

    #[test]
    fn find_and_position() {
        assert_eq!(find("consignment").map(|s| s.name), Some("Consignment Agreement"));
        assert!(find("nda").is_none());
        assert_eq!(position("standard_saas"), 0);
        assert_eq!(position("nda"), SAMPLE_CONTRACTS.len());
    }
}
