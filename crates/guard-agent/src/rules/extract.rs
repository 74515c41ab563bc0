use std::collections::BTreeSet;
use std::str::FromStr;

use chrono::{Months, NaiveDate};
use guard_core::{ClauseExcerpt, LiabilityCap, MonetaryAmount, RenewalClause, TermSheet};
use regex::{Captures, Regex};
use rust_decimal::Decimal;

/// Payment terms assumed when a contract states none.
pub const DEFAULT_PAYMENT_DAYS: u32 = 30;

/// Pattern-based term extraction over raw contract text.
///
/// Every clause excerpt is a verbatim sentence of the input, so audit quotes
/// drawn from excerpts always match.
pub struct TermExtractor {
    party: Regex,
    effective_date: Regex,
    term_months: Regex,
    net_days: Regex,
    amount: Regex,
    return_right: Regex,
    return_days: Regex,
    auto_renewal: Regex,
    renewal_months: Regex,
    escalation: Regex,
    liability_cap: Regex,
    unlimited_liability: Regex,
    clause_kinds: Vec<(&'static str, Regex)>,
}

impl TermExtractor {
    pub fn new() -> Result<Self, regex::Error> {
        let return_right = r"(?i)right\s+(?:of|to)\s+return|unconditional\s+return|may\s+return";
        let auto_renewal = r"(?i)auto(?:matic(?:ally)?)?[\s-]?renew";
        let escalation = r"(?i)(?:increase|escalat\w*)\s+(?:(?:by|of)\s+)?(\d+(?:\.\d+)?)\s*(?:percent|%)";
        Ok(Self {
            // Role label, then the name up to a parenthetical, comma or line end.
            party: Regex::new(
                r"(?im)^\s*(?:Provider|Licensor|Supplier|Vendor|Consignor|Manufacturer|Developer|Customer|Licensee|Distributor|Consignee|Buyer|Client)\s*:\s*([^(\n,]+?)\s*(?:\(|,|$)",
            )?,
            effective_date: Regex::new(r"(?i)EFFECTIVE\s+DATE:\s*([A-Za-z]+ \d{1,2}, \d{4}|\d{4}-\d{2}-\d{2})")?,
            term_months: Regex::new(r"(?i)(?:INITIAL\s+)?TERM:\s*(?:[a-z\-]+\s+\()?(\d+)\)?\s*months")?,
            net_days: Regex::new(r"(?i)\bNet[\s-]?(\d+)\b")?,
            amount: Regex::new(
                r"(?i)(?:Total[^:\n]*|Annual[^:\n]*|license fee|subscription fee|contract value):\s*(\$|USD\s*|EUR\s*|€)?\s*([\d,]+(?:\.\d{2})?)",
            )?,
            return_right: Regex::new(return_right)?,
            return_days: Regex::new(
                r"(?i)(\d+)\)?\s*(?:calendar\s+)?days?\s+(?:of|from|after|following)\s+(?:the\s+)?(?:delivery|receipt|shipment)",
            )?,
            auto_renewal: Regex::new(auto_renewal)?,
            renewal_months: Regex::new(
                r"(?i)renew\w*\s+for\s+(?:successive\s+|additional\s+)?(?:[a-z\-]+\s+\()?(\d+)\)?[\s-]*months?",
            )?,
            escalation: Regex::new(escalation)?,
            liability_cap: Regex::new(
                r"(?i)liability[^.]*not\s+exceed[^.]*?(\d+\s+months?\s+(?:of\s+)?fees(?:\s+paid)?|fees\s+paid|(?:the\s+)?license\s+fee)",
            )?,
            unlimited_liability: Regex::new(
                r"(?i)unlimited\s+liability|liability\s+(?:shall\s+be|is)\s+unlimited|without\s+limitation\s+of\s+liability",
            )?,
            clause_kinds: vec![
                ("payment", Regex::new(r"(?i)\bNet[\s-]?\d+\b|payment\s+(?:is\s+)?due")?),
                ("returns", Regex::new(return_right)?),
                ("pricing", Regex::new(r"(?i)most\s+favou?red\s+customer|\bMFC\b|price\s+protection|price\s+match")?),
                (
                    "milestone",
                    Regex::new(r"(?i)milestone[\s-]?(?:based|payment)|contingent\s+(?:on|upon)|upon\s+(?:written\s+)?acceptance")?,
                ),
                (
                    "consignment",
                    Regex::new(r"(?i)\bconsignment\b|title\s+retention|retains?\s+(?:full\s+)?(?:legal\s+)?title")?,
                ),
                ("bill-and-hold", Regex::new(r"(?i)bill[\s-]and[\s-]hold")?),
                ("renewal", Regex::new(auto_renewal)?),
                ("escalation", Regex::new(escalation)?),
                (
                    "liability",
                    Regex::new(r"(?i)unlimited\s+liability|liability\s+(?:shall\s+be|is)\s+unlimited|liability[^.\n]*not\s+exceed")?,
                ),
                (
                    "termination",
                    Regex::new(r"(?i)terminate\s+(?:this\s+agreement\s+)?(?:at\s+any\s+time|for\s+(?:any\s+reason|convenience))")?,
                ),
            ],
        })
    }

    pub fn extract(&self, text: &str) -> TermSheet {
        let parties: BTreeSet<String> = self
            .party
            .captures_iter(text)
            .filter_map(|c| c.get(1))
            .map(|m| m.as_str().trim().trim_matches('"').to_string())
            .filter(|p| !p.is_empty())
            .collect();

        let effective_date = self.effective_date.captures(text).and_then(|c| parse_date(&c[1]));
        let expiration_date = match (effective_date, self.term_months.captures(text).and_then(|c| first_u32(&c))) {
            (Some(start), Some(months)) if months > 0 => start.checked_add_months(Months::new(months)),
            _ => None,
        };

        let payment_term_days =
            self.net_days.captures(text).and_then(|c| first_u32(&c)).unwrap_or(DEFAULT_PAYMENT_DAYS);

        let mut amounts: Vec<MonetaryAmount> = Vec::new();
        for c in self.amount.captures_iter(text) {
            let currency = match c.get(1).map(|m| m.as_str().trim()) {
                Some("EUR") | Some("€") => "EUR",
                _ => "USD",
            };
            let Ok(value) = Decimal::from_str(&c[2].replace(',', "")) else {
                continue;
            };
            if !amounts.iter().any(|a| a.value == value && a.currency == currency) {
                amounts.push(MonetaryAmount { currency: currency.to_string(), value });
            }
        }

        let return_window_days = if self.return_right.is_match(text) {
            self.return_days.captures(text).and_then(|c| first_u32(&c))
        } else {
            None
        };

        let renewal = self.auto_renewal.find(text).map(|m| RenewalClause {
            automatic: true,
            term_months: self.renewal_months.captures(text).and_then(|c| first_u32(&c)),
            description: sentence_at(text, m.start(), m.end()).to_string(),
        });

        let escalation_percent =
            self.escalation.captures(text).and_then(|c| c.get(1)).and_then(|m| m.as_str().parse::<f64>().ok());

        let liability_cap = if let Some(c) = self.liability_cap.captures(text) {
            Some(LiabilityCap::Capped(c[1].to_string()))
        } else if self.unlimited_liability.is_match(text) {
            Some(LiabilityCap::Unlimited)
        } else {
            None
        };

        TermSheet {
            parties,
            effective_date,
            expiration_date,
            amounts,
            payment_term_days,
            return_window_days,
            renewal,
            escalation_percent,
            liability_cap,
            clauses: self.clauses(text),
        }
    }

    /// One excerpt per clause kind: the first full sentence that matches it,
    /// else the first matching line (a heading).
    fn clauses(&self, text: &str) -> Vec<ClauseExcerpt> {
        let mut out: Vec<ClauseExcerpt> = Vec::new();
        for (kind, re) in &self.clause_kinds {
            let candidates: Vec<&str> = re
                .find_iter(text)
                .map(|m| sentence_at(text, m.start(), m.end()))
                .filter(|s| !s.is_empty())
                .collect();
            let Some(sentence) = candidates.iter().find(|s| s.ends_with('.')).or(candidates.first()) else {
                continue;
            };
            out.push(ClauseExcerpt { clause_type: (*kind).to_string(), text: (*sentence).to_string() });
        }
        out
    }
}

fn first_u32(c: &Captures<'_>) -> Option<u32> {
    c.get(1).and_then(|m| m.as_str().parse().ok())
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(s, "%B %d, %Y"))
        .ok()
}

/// The sentence around `start..end`, bounded by a period followed by
/// whitespace or by a line break.
pub fn sentence_at(text: &str, start: usize, end: usize) -> &str {
    let before = &text[..start];
    let from = [". ", "\n"]
        .iter()
        .filter_map(|p| before.rfind(p).map(|i| i + p.len()))
        .max()
        .unwrap_or(0);

    let after = &text[end..];
    let to = [(". ", 1), (".\n", 1), ("\n", 0)]
        .iter()
        .filter_map(|(p, keep)| after.find(p).map(|i| end + i + keep))
        .min()
        .unwrap_or(text.len());

    text[from..to].trim()
}
