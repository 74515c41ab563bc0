//! Deterministic verdict computation. No model call, no I/O: identical inputs
//! always produce an identical [`RiskVerdict`].

use crate::error::GuardError;
use crate::policy::PolicyThresholds;
use crate::types::{
    ArgumentSet, Contribution, ContributionSource, FlagSet, Recommendation, RiskCategory, RiskVerdict, TermSheet,
};

pub const REVIEW_SURCHARGE: u32 = 10;
pub const PAYMENT_BLOCK_DAYS: u32 = 30;
pub const PAYMENT_BLOCK_WEIGHT: u32 = 10;
pub const PAYMENT_BREACH_CAP: u32 = 30;
pub const RETURN_BREACH_WEIGHT: u32 = 20;
pub const ESCALATION_POINT_WEIGHT: u32 = 10;
pub const ESCALATION_BREACH_CAP: u32 = 30;
pub const UNLIMITED_LIABILITY_WEIGHT: u32 = 25;
pub const MAX_SCORE: u32 = 100;

const CONFIDENCE_PER_MISSING_FIELD: f64 = 0.1;
const CONFIDENCE_PER_FAILED_STAGE: f64 = 0.2;
const CONFIDENCE_FLOOR: f64 = 0.3;
const RATIONALE_TOP: usize = 3;

/// Combine the term sheet, both debate outputs and the policy into a verdict.
///
/// Empty argument or flag sets are valid inputs; absent ones are not.
pub fn resolve(
    term_sheet: Option<&TermSheet>,
    arguments: Option<&ArgumentSet>,
    flags: Option<&FlagSet>,
    policy: &PolicyThresholds,
) -> Result<RiskVerdict, GuardError> {
    let term_sheet = term_sheet.ok_or(GuardError::IncompleteState { missing: "term sheet" })?;
    let arguments = arguments.ok_or(GuardError::IncompleteState { missing: "argument set" })?;
    let flags = flags.ok_or(GuardError::IncompleteState { missing: "flag set" })?;

    let mut contributions = flag_contributions(flags, policy);
    contributions.extend(policy_breaches(term_sheet, policy));
    rank(&mut contributions);

    let score = contributions.iter().fold(0u32, |acc, c| acc.saturating_add(c.weight)).min(MAX_SCORE);
    let recommendation = Recommendation::from_score(score);
    let confidence = confidence(term_sheet, arguments, flags);
    let rationale = rationale(score, recommendation, &contributions, arguments, flags);

    Ok(RiskVerdict { score, confidence, recommendation, contributions, rationale })
}

pub fn flag_contributions(flags: &FlagSet, policy: &PolicyThresholds) -> Vec<Contribution> {
    flags
        .flags
        .iter()
        .map(|f| {
            let review_required = policy.requires_review(f.category);
            let surcharge = if review_required { REVIEW_SURCHARGE } else { 0 };
            Contribution {
                category: f.category,
                weight: f.severity.weight() + surcharge,
                source: ContributionSource::Flag { severity: f.severity, review_required },
            }
        })
        .collect()
}

/// Direct comparisons of term-sheet values against policy limits.
pub fn policy_breaches(term_sheet: &TermSheet, policy: &PolicyThresholds) -> Vec<Contribution> {
    let mut out = Vec::new();
    let mut push = |category, weight: u32, detail: String| {
        if weight > 0 {
            out.push(Contribution { category, weight, source: ContributionSource::PolicyBreach { detail } });
        }
    };

    let limit = policy.payment_terms_max_days;
    if term_sheet.payment_term_days > limit {
        let blocks = ((term_sheet.payment_term_days - limit) / PAYMENT_BLOCK_DAYS)
            .min(PAYMENT_BREACH_CAP / PAYMENT_BLOCK_WEIGHT);
        push(
            RiskCategory::ExtendedPayment,
            blocks * PAYMENT_BLOCK_WEIGHT,
            format!("Net {} exceeds the {limit}-day limit", term_sheet.payment_term_days),
        );
    }

    if let Some(days) = term_sheet.return_window_days {
        let limit = policy.return_period_max_days;
        if days > limit {
            push(
                RiskCategory::UnconditionalReturn,
                RETURN_BREACH_WEIGHT,
                format!("{days}-day return window exceeds the {limit}-day limit"),
            );
        }
    }

    if let Some(pct) = term_sheet.escalation_percent {
        let limit = policy.auto_escalation_max_percent;
        let over = pct - limit;
        if over > 0.0 {
            // Whole points only; capped before the cast so huge values can't wrap.
            let max_points = ESCALATION_BREACH_CAP / ESCALATION_POINT_WEIGHT;
            let points = (over + 1e-9).floor().clamp(0.0, f64::from(max_points)) as u32;
            push(
                RiskCategory::ExcessiveEscalation,
                points * ESCALATION_POINT_WEIGHT,
                format!("{pct}% escalation exceeds the {limit}% limit"),
            );
        }
    }

    if term_sheet.liability_cap.as_ref().is_some_and(|c| c.is_unlimited()) {
        push(RiskCategory::UnlimitedLiability, UNLIMITED_LIABILITY_WEIGHT, "liability is uncapped".to_string());
    }

    out
}

/// Weight descending, then category enumeration order. Stable, so equal
/// entries keep their input order.
pub fn rank(contributions: &mut [Contribution]) {
    contributions.sort_by(|a, b| b.weight.cmp(&a.weight).then(a.category.cmp(&b.category)));
}

pub fn confidence(term_sheet: &TermSheet, arguments: &ArgumentSet, flags: &FlagSet) -> f64 {
    let missing = term_sheet.unextracted_fields().len() as f64;
    let failed = [arguments.stage_failed.is_some(), flags.stage_failed.is_some()]
        .iter()
        .filter(|f| **f)
        .count() as f64;
    let raw = 1.0 - CONFIDENCE_PER_MISSING_FIELD * missing - CONFIDENCE_PER_FAILED_STAGE * failed;
    (raw.clamp(CONFIDENCE_FLOOR, 1.0) * 100.0).round() / 100.0
}

fn rationale(
    score: u32,
    recommendation: Recommendation,
    contributions: &[Contribution],
    arguments: &ArgumentSet,
    flags: &FlagSet,
) -> String {
    let mut parts = vec![format!("Risk score {score}/100, recommendation {recommendation}.")];

    if contributions.is_empty() {
        parts.push("No risk factors identified.".to_string());
    } else {
        let top: Vec<String> = contributions.iter().take(RATIONALE_TOP).map(Contribution::describe).collect();
        parts.push(format!("Top factors: {}.", top.join("; ")));
    }

    if let Some(claim) = arguments.strongest() {
        parts.push(format!(
            "Strongest mitigating argument ({}, {}): {}",
            claim.strength.as_str(),
            claim.term_ref,
            claim.assertion.trim_end_matches('.')
        ) + ".");
    }

    for (stage, failed) in [("Advocacy", &arguments.stage_failed), ("Audit", &flags.stage_failed)] {
        if let Some(reason) = failed {
            parts.push(format!("{stage} did not complete ({reason}); verdict is degraded."));
        }
    }

    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::types::{Claim, ClaimStrength, Classification, Flag, LiabilityCap, Severity};

    fn policy() -> PolicyThresholds {
        PolicyThresholds::from_json(
            r#"{"payment_terms_max_days": 60, "return_period_max_days": 30, "auto_escalation_max_percent": 3,
                "requires_legal_review": ["unconditional-return", "unlimited-liability"]}"#,
        )
        .unwrap()
    }

    fn sheet() -> TermSheet {
        TermSheet {
            parties: BTreeSet::from(["A".to_string(), "B".to_string()]),
            effective_date: None,
            expiration_date: None,
            amounts: vec![],
            payment_term_days: 30,
            return_window_days: None,
            renewal: None,
            escalation_percent: None,
            liability_cap: None,
            clauses: vec![],
        }
    }

    fn flag(category: RiskCategory, severity: Severity) -> Flag {
        Flag {
            category,
            severity,
            quote: "q".into(),
            remediation: "r".into(),
            classification: category.classification(),
            finding: String::new(),
            reference: None,
        }
    }

    #[test]
    fn high_flag_in_review_category_scores_forty() {
        let flags = FlagSet::new(vec![flag(RiskCategory::UnconditionalReturn, Severity::High)]);
        let v = resolve(Some(&sheet()), Some(&ArgumentSet::default()), Some(&flags), &policy()).unwrap();
        assert_eq!(v.score, 40);
        assert_eq!(v.recommendation, Recommendation::LegalReview);
    }

    #[test]
    fn payment_breach_counts_full_blocks() {
        let mut ts = sheet();
        ts.payment_term_days = 120;
        let c = policy_breaches(&ts, &policy());
        assert_eq!(c.len(), 1);
        assert_eq!(c[0].weight, 20);
        assert_eq!(c[0].category, RiskCategory::ExtendedPayment);

        ts.payment_term_days = 75;
        assert!(policy_breaches(&ts, &policy()).is_empty());

        ts.payment_term_days = 365;
        assert_eq!(policy_breaches(&ts, &policy())[0].weight, PAYMENT_BREACH_CAP);
    }

    #[test]
    fn escalation_counts_whole_points() {
        let mut ts = sheet();
        ts.escalation_percent = Some(5.0);
        assert_eq!(policy_breaches(&ts, &policy())[0].weight, 20);
        ts.escalation_percent = Some(5.9);
        assert_eq!(policy_breaches(&ts, &policy())[0].weight, 20);
        ts.escalation_percent = Some(3.5);
        assert!(policy_breaches(&ts, &policy()).is_empty());
        ts.escalation_percent = Some(4.0);
        assert_eq!(policy_breaches(&ts, &policy())[0].weight, 10);
        ts.escalation_percent = Some(3.0);
        assert!(policy_breaches(&ts, &policy()).is_empty());
        ts.escalation_percent = Some(12.0);
        assert_eq!(policy_breaches(&ts, &policy())[0].weight, ESCALATION_BREACH_CAP);
    }

    #[test]
    fn huge_escalation_hits_the_cap() {
        let mut ts = sheet();
        ts.escalation_percent = Some(429_496_733.0);
        assert_eq!(policy_breaches(&ts, &policy())[0].weight, ESCALATION_BREACH_CAP);
        ts.escalation_percent = Some(f64::MAX);
        assert_eq!(policy_breaches(&ts, &policy())[0].weight, ESCALATION_BREACH_CAP);
    }

    #[test]
    fn extreme_breaches_keep_score_in_range() {
        let extremes = [
            (u32::MAX, Some(u32::MAX), Some(f64::MAX)),
            (u32::MAX, None, Some(1e12)),
            (61, Some(31), Some(3.0 + 1e-12)),
            (0, Some(0), Some(0.0)),
        ];
        let flags = FlagSet::new(RiskCategory::ALL.iter().map(|c| flag(*c, Severity::High)).collect());
        for (payment, returns, escalation) in extremes {
            let mut ts = sheet();
            ts.payment_term_days = payment;
            ts.return_window_days = returns;
            ts.escalation_percent = escalation;
            ts.liability_cap = Some(LiabilityCap::Unlimited);
            for fs in [&flags, &FlagSet::default()] {
                let v = resolve(Some(&ts), Some(&ArgumentSet::default()), Some(fs), &policy()).unwrap();
                assert!(v.score <= MAX_SCORE, "{payment} {returns:?} {escalation:?}");
                assert!((0.3..=1.0).contains(&v.confidence));
                for c in v.contributions.iter().filter(|c| matches!(c.source, ContributionSource::PolicyBreach { .. })) {
                    assert!(c.weight <= PAYMENT_BREACH_CAP.max(ESCALATION_BREACH_CAP).max(UNLIMITED_LIABILITY_WEIGHT));
                }
            }
        }
    }

    #[test]
    fn return_breach_adds_to_flag_weight() {
        let mut ts = sheet();
        ts.return_window_days = Some(90);
        let flags = FlagSet::new(vec![flag(RiskCategory::UnconditionalReturn, Severity::High)]);
        let v = resolve(Some(&ts), Some(&ArgumentSet::default()), Some(&flags), &policy()).unwrap();
        assert_eq!(v.score, 60);
        assert_eq!(v.contributions.len(), 2);
        assert_eq!(v.contributions[0].weight, 40);
    }

    #[test]
    fn empty_inputs_approve() {
        let v = resolve(Some(&sheet()), Some(&ArgumentSet::default()), Some(&FlagSet::default()), &policy()).unwrap();
        assert_eq!(v.score, 0);
        assert_eq!(v.recommendation, Recommendation::Approve);
        assert!(v.rationale.contains("No risk factors"));
    }

    #[test]
    fn missing_term_sheet_is_incomplete() {
        let err = resolve(None, Some(&ArgumentSet::default()), Some(&FlagSet::default()), &policy()).unwrap_err();
        assert!(matches!(err, GuardError::IncompleteState { missing: "term sheet" }));
        let err = resolve(Some(&sheet()), Some(&ArgumentSet::default()), None, &policy()).unwrap_err();
        assert_eq!(err.kind(), "incomplete_state");
    }

    #[test]
    fn score_is_clamped_and_ranked() {
        let mut ts = sheet();
        ts.liability_cap = Some(LiabilityCap::Unlimited);
        ts.payment_term_days = 180;
        let flags = FlagSet::new(
            RiskCategory::ALL.iter().map(|c| flag(*c, Severity::High)).collect(),
        );
        let v = resolve(Some(&ts), Some(&ArgumentSet::default()), Some(&flags), &policy()).unwrap();
        assert_eq!(v.score, MAX_SCORE);
        assert_eq!(v.recommendation, Recommendation::Reject);
        let weights: Vec<u32> = v.contributions.iter().map(|c| c.weight).collect();
        let mut sorted = weights.clone();
        sorted.sort_by(|a, b| b.cmp(a));
        assert_eq!(weights, sorted);
        // Equal weights fall back to enumeration order.
        let thirties: Vec<RiskCategory> =
            v.contributions.iter().filter(|c| c.weight == 30).map(|c| c.category).collect();
        let mut ordered = thirties.clone();
        ordered.sort();
        assert_eq!(thirties, ordered);
    }

    #[test]
    fn resolution_is_deterministic() {
        let mut ts = sheet();
        ts.return_window_days = Some(45);
        let flags = FlagSet::new(vec![
            flag(RiskCategory::Consignment, Severity::Medium),
            flag(RiskCategory::ExtendedPayment, Severity::Medium),
        ]);
        let args = ArgumentSet::new(vec![Claim {
            category: "returns".into(),
            assertion: "Returns are limited to unsold stock.".into(),
            term_ref: "return_window_days".into(),
            strength: ClaimStrength::Strong,
        }]);
        let a = resolve(Some(&ts), Some(&args), Some(&flags), &policy()).unwrap();
        let b = resolve(Some(&ts), Some(&args), Some(&flags), &policy()).unwrap();
        assert_eq!(a, b);
        assert!(a.rationale.contains("Returns are limited to unsold stock."));
        assert_eq!(a.contributions[0].category, RiskCategory::UnconditionalReturn);
        assert_eq!(a.contributions[1].category, RiskCategory::ExtendedPayment);
    }

    #[test]
    fn confidence_drops_with_missing_fields_and_failed_stages() {
        let ts = sheet();
        // effective, expiration, amounts, return window, renewal, escalation, liability
        assert_eq!(confidence(&ts, &ArgumentSet::default(), &FlagSet::default()), 0.3);

        let mut full = sheet();
        full.effective_date = chrono::NaiveDate::from_ymd_opt(2024, 1, 1);
        full.expiration_date = chrono::NaiveDate::from_ymd_opt(2025, 1, 1);
        full.amounts = vec![crate::types::MonetaryAmount { currency: "USD".into(), value: 1.into() }];
        full.return_window_days = Some(30);
        full.escalation_percent = Some(2.0);
        full.liability_cap = Some(LiabilityCap::Capped("fees paid".into()));
        assert_eq!(confidence(&full, &ArgumentSet::default(), &FlagSet::default()), 0.9);

        let degraded = ArgumentSet { claims: vec![], stage_failed: Some("timeout".into()) };
        assert_eq!(confidence(&full, &degraded, &FlagSet::default()), 0.7);
    }

    #[test]
    fn verdict_round_trips_through_json() {
        let flags = FlagSet::new(vec![flag(RiskCategory::BillAndHold, Severity::Low)]);
        let v = resolve(Some(&sheet()), Some(&ArgumentSet::default()), Some(&flags), &policy()).unwrap();
        let json = serde_json::to_string(&v).unwrap();
        let back: RiskVerdict = serde_json::from_str(&json).unwrap();
        assert_eq!(back, v);
        assert_eq!(v.contributions[0].source, ContributionSource::Flag { severity: Severity::Low, review_required: false });
        assert_eq!(flags.flags[0].classification, Classification::Asc606);
    }
}
