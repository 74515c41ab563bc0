use guard_core::policy::PolicyThresholds;
use guard_core::{ClaimStrength, RiskCategory, Severity, TermSheet};
use serde::Serialize;

/// Payment terms generally accepted without negotiation.
const MARKET_PAYMENT_DAYS: u32 = 60;
const MARKET_RETURN_DAYS: u32 = 30;
const MARKET_ESCALATION_PERCENT: f64 = 3.0;

#[derive(Debug, Serialize)]
pub struct RuleClaim {
    pub category: &'static str,
    pub assertion: String,
    pub term_ref: &'static str,
    pub strength: ClaimStrength,
}

#[derive(Debug, Serialize)]
pub struct RuleFlag {
    pub category: RiskCategory,
    pub severity: Severity,
    pub quote: String,
    pub finding: String,
}

/// Best-case reading of each term.
pub fn advocate(ts: &TermSheet) -> Vec<RuleClaim> {
    let mut claims = Vec::new();

    let days = ts.payment_term_days;
    let (strength, assertion) = if days <= MARKET_PAYMENT_DAYS {
        (ClaimStrength::Strong, format!("Net {days} payment terms are market standard and carry no financing component."))
    } else if days <= MARKET_PAYMENT_DAYS + 30 {
        (ClaimStrength::Moderate, format!("Net {days} is common for enterprise buyers and the counterparty is creditworthy."))
    } else {
        (ClaimStrength::Weak, format!("Net {days} can be offset by invoice factoring or an early-payment discount."))
    };
    claims.push(RuleClaim { category: "payment", assertion, term_ref: "payment_term_days", strength });

    match ts.return_window_days {
        None if !has_clause(ts, "returns") => claims.push(RuleClaim {
            category: "returns",
            assertion: "The contract grants no right of return, so revenue is not subject to return estimates.".into(),
            term_ref: "return_window_days",
            strength: ClaimStrength::Strong,
        }),
        Some(d) if d <= MARKET_RETURN_DAYS => claims.push(RuleClaim {
            category: "returns",
            assertion: format!("A {d}-day return window is a standard acceptance period."),
            term_ref: "return_window_days",
            strength: ClaimStrength::Moderate,
        }),
        Some(d) => claims.push(RuleClaim {
            category: "returns",
            assertion: format!("Historical return rates make the {d}-day window estimable as variable consideration."),
            term_ref: "return_window_days",
            strength: ClaimStrength::Weak,
        }),
        None => {}
    }

    match &ts.liability_cap {
        Some(cap) if !cap.is_unlimited() => claims.push(RuleClaim {
            category: "liability",
            assertion: format!("Liability is capped at {}.", String::from(cap.clone())),
            term_ref: "liability_cap",
            strength: ClaimStrength::Strong,
        }),
        Some(_) => claims.push(RuleClaim {
            category: "liability",
            assertion: "Uncapped liability is backed by the provider's insurance coverage.".into(),
            term_ref: "liability_cap",
            strength: ClaimStrength::Weak,
        }),
        None => {}
    }

    if let Some(pct) = ts.escalation_percent {
        let (strength, assertion) = if pct <= MARKET_ESCALATION_PERCENT {
            (ClaimStrength::Moderate, format!("A {pct}% escalation tracks inflation."))
        } else {
            (ClaimStrength::Weak, format!("A {pct}% escalation reflects rising service delivery costs."))
        };
        claims.push(RuleClaim { category: "pricing", assertion, term_ref: "escalation_percent", strength });
    }

    match &ts.renewal {
        Some(r) if r.automatic => claims.push(RuleClaim {
            category: "renewal",
            assertion: "Automatic renewal secures recurring revenue and avoids service gaps.".into(),
            term_ref: "renewal",
            strength: ClaimStrength::Weak,
        }),
        Some(_) | None => claims.push(RuleClaim {
            category: "renewal",
            assertion: "There is no automatic renewal; both parties must agree to extend.".into(),
            term_ref: "renewal",
            strength: ClaimStrength::Moderate,
        }),
    }

    claims
}

/// Policy-driven findings. Every quote is a full clause excerpt of `ts`.
pub fn audit(ts: &TermSheet, policy: &PolicyThresholds) -> Vec<RuleFlag> {
    let mut flags = Vec::new();
    let mut flag = |category, severity, kind: &str, finding: String| {
        if let Some(quote) = clause(ts, kind) {
            flags.push(RuleFlag { category, severity, quote: quote.to_string(), finding });
        }
    };

    let limit = policy.payment_terms_max_days;
    if ts.payment_term_days > limit {
        let excess = ts.payment_term_days - limit;
        let severity = if excess <= 30 { Severity::Medium } else { Severity::High };
        flag(
            RiskCategory::ExtendedPayment,
            severity,
            "payment",
            format!("Net {} exceeds the {limit}-day policy limit and may contain a significant financing component.", ts.payment_term_days),
        );
    }

    let return_limit = policy.return_period_max_days;
    match ts.return_window_days {
        Some(d) if d > return_limit => flag(
            RiskCategory::UnconditionalReturn,
            if d > 60 { Severity::High } else { Severity::Medium },
            "returns",
            format!("{d}-day return right exceeds the {return_limit}-day policy limit; revenue is variable consideration."),
        ),
        None if clause(ts, "returns").is_some_and(|c| c.to_ascii_lowercase().contains("unconditional")) => flag(
            RiskCategory::UnconditionalReturn,
            Severity::High,
            "returns",
            "Open-ended unconditional return right prevents estimating variable consideration.".into(),
        ),
        _ => {}
    }

    flag(
        RiskCategory::PriceProtection,
        Severity::High,
        "pricing",
        "Price protection creates open-ended variable consideration.".into(),
    );
    flag(
        RiskCategory::MilestoneContingency,
        Severity::Medium,
        "milestone",
        "Payments contingent on acceptance constrain when revenue can be recognized.".into(),
    );
    flag(
        RiskCategory::Consignment,
        Severity::High,
        "consignment",
        "Title and control stay with the seller until resale, so no revenue on shipment.".into(),
    );
    flag(
        RiskCategory::BillAndHold,
        Severity::High,
        "bill-and-hold",
        "Bill-and-hold requires all transfer-of-control criteria to be documented.".into(),
    );

    if ts.liability_cap.as_ref().is_some_and(|c| c.is_unlimited()) {
        flag(RiskCategory::UnlimitedLiability, Severity::High, "liability", "Liability is not capped.".into());
    }

    let escalation_limit = policy.auto_escalation_max_percent;
    if let Some(pct) = ts.escalation_percent.filter(|p| *p > escalation_limit) {
        flag(
            RiskCategory::ExcessiveEscalation,
            Severity::Medium,
            "escalation",
            format!("{pct}% escalation exceeds the {escalation_limit}% policy threshold."),
        );
        if ts.renewal.as_ref().is_some_and(|r| r.automatic) {
            flag(
                RiskCategory::UnfavorableRenewal,
                Severity::Low,
                "renewal",
                "Automatic renewal locks in above-policy escalation.".into(),
            );
        }
    }

    flag(
        RiskCategory::OneSidedTermination,
        Severity::Medium,
        "termination",
        "Termination for convenience is available to one party only.".into(),
    );

    flags
}

fn clause<'a>(ts: &'a TermSheet, kind: &str) -> Option<&'a str> {
    ts.clauses.iter().find(|c| c.clause_type == kind).map(|c| c.text.as_str())
}

fn has_clause(ts: &TermSheet, kind: &str) -> bool {
    clause(ts, kind).is_some()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use guard_core::{ClauseExcerpt, LiabilityCap, RenewalClause};

    use super::*;

    fn policy() -> PolicyThresholds {
        PolicyThresholds::from_json(
            r#"{"payment_terms_max_days": 60, "return_period_max_days": 30, "auto_escalation_max_percent": 3,
                "requires_legal_review": []}"#,
        )
        .unwrap()
    }

    fn sheet(clauses: &[(&str, &str)]) -> TermSheet {
        TermSheet {
            parties: BTreeSet::new(),
            effective_date: None,
            expiration_date: None,
            amounts: vec![],
            payment_term_days: 30,
            return_window_days: None,
            renewal: None,
            escalation_percent: None,
            liability_cap: None,
            clauses: clauses
                .iter()
                .map(|(k, t)| ClauseExcerpt { clause_type: k.to_string(), text: t.to_string() })
                .collect(),
        }
    }

    #[test]
    fn clean_sheet_raises_no_flags() {
        assert!(audit(&sheet(&[("payment", "Payment is due Net 30.")]), &policy()).is_empty());
    }

    #[test]
    fn escalation_and_renewal_flags() {
        let mut ts = sheet(&[
            ("renewal", "This Agreement shall automatically renew."),
            ("escalation", "Fees shall increase by 5% each year."),
        ]);
        ts.escalation_percent = Some(5.0);
        ts.renewal = Some(RenewalClause { automatic: true, term_months: Some(12), description: String::new() });
        let flags = audit(&ts, &policy());
        let cats: Vec<_> = flags.iter().map(|f| f.category).collect();
        assert_eq!(cats, [RiskCategory::ExcessiveEscalation, RiskCategory::UnfavorableRenewal]);
        assert_eq!(flags[0].quote, "Fees shall increase by 5% each year.");
    }

    #[test]
    fn breach_without_clause_is_left_to_resolution() {
        let mut ts = sheet(&[]);
        ts.payment_term_days = 120;
        assert!(audit(&ts, &policy()).is_empty());
    }

    #[test]
    fn advocate_always_argues_payment_and_renewal() {
        let mut ts = sheet(&[]);
        ts.liability_cap = Some(LiabilityCap::Capped("fees paid".into()));
        let claims = advocate(&ts);
        assert_eq!(claims[0].category, "payment");
        assert_eq!(claims[0].strength, ClaimStrength::Strong);
        assert!(claims.iter().any(|c| c.assertion == "Liability is capped at fees paid."));
        assert!(claims.iter().any(|c| c.category == "renewal"));
    }
}
