use std::collections::BTreeSet;
use std::fmt;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ── Run Mode ─────────────────────────────────────────────────────────────

/// Whether a run is served from the pre-computed demo cache or executed live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Demo,
    Live,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Demo => "demo",
            Self::Live => "live",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "demo" => Some(Self::Demo),
            "live" => Some(Self::Live),
            _ => None,
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Stages ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Extraction,
    Advocacy,
    Audit,
    Resolution,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Extraction => "extraction",
            Self::Advocacy => "advocacy",
            Self::Audit => "audit",
            Self::Resolution => "resolution",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress of one of the two debate stages inside a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl StageStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

/// Lifecycle of a pipeline run.
///
/// `Pending → Extracting → Debating → Resolving → Completed`, with `Failed`
/// reachable from every non-terminal state. While `Debating`, advocacy and
/// audit progress independently (see [`StageStatus`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Pending,
    Extracting,
    Debating,
    Resolving,
    Completed,
    Failed,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Extracting => "extracting",
            Self::Debating => "debating",
            Self::Resolving => "resolving",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Risk Taxonomy ────────────────────────────────────────────────────────

/// Fixed risk-category enumeration. Declaration order is the tie-break order
/// used when ranking contributions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RiskCategory {
    #[serde(alias = "extended_payment")]
    ExtendedPayment,
    #[serde(alias = "unconditional_return")]
    UnconditionalReturn,
    #[serde(alias = "price_protection")]
    PriceProtection,
    #[serde(alias = "milestone_contingency")]
    MilestoneContingency,
    Consignment,
    #[serde(alias = "bill_and_hold")]
    BillAndHold,
    #[serde(alias = "unlimited_liability")]
    UnlimitedLiability,
    #[serde(alias = "unfavorable_renewal")]
    UnfavorableRenewal,
    #[serde(alias = "excessive_escalation")]
    ExcessiveEscalation,
    #[serde(alias = "one_sided_termination")]
    OneSidedTermination,
}

impl RiskCategory {
    pub const ALL: [RiskCategory; 10] = [
        Self::ExtendedPayment,
        Self::UnconditionalReturn,
        Self::PriceProtection,
        Self::MilestoneContingency,
        Self::Consignment,
        Self::BillAndHold,
        Self::UnlimitedLiability,
        Self::UnfavorableRenewal,
        Self::ExcessiveEscalation,
        Self::OneSidedTermination,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExtendedPayment => "extended-payment",
            Self::UnconditionalReturn => "unconditional-return",
            Self::PriceProtection => "price-protection",
            Self::MilestoneContingency => "milestone-contingency",
            Self::Consignment => "consignment",
            Self::BillAndHold => "bill-and-hold",
            Self::UnlimitedLiability => "unlimited-liability",
            Self::UnfavorableRenewal => "unfavorable-renewal",
            Self::ExcessiveEscalation => "excessive-escalation",
            Self::OneSidedTermination => "one-sided-termination",
        }
    }

    /// Parse a category tag, accepting kebab-case or snake_case in any case.
    pub fn from_tag(tag: &str) -> Option<Self> {
        let normalized = tag.trim().to_ascii_lowercase().replace('_', "-");
        Self::ALL.into_iter().find(|c| c.as_str() == normalized)
    }

    /// Revenue-recognition categories are ASC 606; the rest are commercial.
    pub fn classification(&self) -> Classification {
        match self {
            Self::ExtendedPayment
            | Self::UnconditionalReturn
            | Self::PriceProtection
            | Self::MilestoneContingency
            | Self::Consignment
            | Self::BillAndHold => Classification::Asc606,
            Self::UnlimitedLiability
            | Self::UnfavorableRenewal
            | Self::ExcessiveEscalation
            | Self::OneSidedTermination => Classification::Commercial,
        }
    }

    /// Remediation used when the auditor does not supply one.
    pub fn default_remediation(&self) -> &'static str {
        match self {
            Self::ExtendedPayment => "Shorten payment terms to the policy maximum or add a financing charge.",
            Self::UnconditionalReturn => "Limit returns to defective goods within the policy return window.",
            Self::PriceProtection => "Remove most-favored-customer pricing or cap it to a fixed term and amount.",
            Self::MilestoneContingency => "Tie payments to objective deliverables rather than customer acceptance.",
            Self::Consignment => "Transfer title and control on delivery instead of on resale.",
            Self::BillAndHold => "Document a substantive reason for the arrangement and segregate held goods.",
            Self::UnlimitedLiability => "Cap liability at twelve months of fees paid.",
            Self::UnfavorableRenewal => "Require affirmative renewal or add a termination-for-convenience window.",
            Self::ExcessiveEscalation => "Cap annual escalation at the policy maximum.",
            Self::OneSidedTermination => "Make termination rights mutual with equal notice periods.",
        }
    }
}

impl fmt::Display for RiskCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    /// Base score weight of a flag at this severity.
    pub fn weight(&self) -> u32 {
        match self {
            Self::Low => 5,
            Self::Medium => 15,
            Self::High => 30,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Classification {
    #[serde(rename = "asc-606", alias = "asc_606", alias = "asc606")]
    Asc606,
    #[serde(rename = "commercial")]
    Commercial,
}

// ── Term Sheet ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonetaryAmount {
    pub currency: String,
    pub value: Decimal,
}

/// Renewal clause as extracted from the contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenewalClause {
    /// Renews without an affirmative act by either party.
    pub automatic: bool,
    #[serde(default)]
    pub term_months: Option<u32>,
    #[serde(default)]
    pub description: String,
}

/// Liability cap descriptor; the literal `"unlimited"` (any case) is special.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum LiabilityCap {
    Unlimited,
    Capped(String),
}

impl LiabilityCap {
    pub fn is_unlimited(&self) -> bool {
        matches!(self, Self::Unlimited)
    }
}

impl From<String> for LiabilityCap {
    fn from(s: String) -> Self {
        if s.trim().eq_ignore_ascii_case("unlimited") {
            Self::Unlimited
        } else {
            Self::Capped(s)
        }
    }
}

impl From<LiabilityCap> for String {
    fn from(cap: LiabilityCap) -> Self {
        match cap {
            LiabilityCap::Unlimited => "unlimited".into(),
            LiabilityCap::Capped(s) => s,
        }
    }
}

/// A verbatim span of contract text tagged with its clause type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClauseExcerpt {
    pub clause_type: String,
    pub text: String,
}

/// Structured facts extracted from a contract. Written once by extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TermSheet {
    pub parties: BTreeSet<String>,
    #[serde(default)]
    pub effective_date: Option<NaiveDate>,
    #[serde(default)]
    pub expiration_date: Option<NaiveDate>,
    pub amounts: Vec<MonetaryAmount>,
    pub payment_term_days: u32,
    #[serde(default)]
    pub return_window_days: Option<u32>,
    #[serde(default)]
    pub renewal: Option<RenewalClause>,
    #[serde(default)]
    pub escalation_percent: Option<f64>,
    #[serde(default)]
    pub liability_cap: Option<LiabilityCap>,
    pub clauses: Vec<ClauseExcerpt>,
}

impl TermSheet {
    /// Names of fields that extraction left null or empty.
    pub fn unextracted_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.parties.is_empty() {
            missing.push("parties");
        }
        if self.effective_date.is_none() {
            missing.push("effective_date");
        }
        if self.expiration_date.is_none() {
            missing.push("expiration_date");
        }
        if self.amounts.is_empty() {
            missing.push("amounts");
        }
        if self.return_window_days.is_none() {
            missing.push("return_window_days");
        }
        if self.renewal.is_none() {
            missing.push("renewal");
        }
        if self.escalation_percent.is_none() {
            missing.push("escalation_percent");
        }
        if self.liability_cap.is_none() {
            missing.push("liability_cap");
        }
        missing
    }

    /// Headline contract value (the first extracted amount).
    pub fn headline_amount(&self) -> Option<&MonetaryAmount> {
        self.amounts.first()
    }
}

// ── Debate Outputs ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClaimStrength {
    Weak,
    #[default]
    Moderate,
    Strong,
}

impl ClaimStrength {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Weak => "weak",
            Self::Moderate => "moderate",
            Self::Strong => "strong",
        }
    }
}

/// One argument in favour of accepting the contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    pub category: String,
    pub assertion: String,
    /// The term-sheet field or clause the claim relies on.
    pub term_ref: String,
    #[serde(default)]
    pub strength: ClaimStrength,
}

/// Advocacy output.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ArgumentSet {
    pub claims: Vec<Claim>,
    /// Set when the stage failed and the run continued degraded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage_failed: Option<String>,
}

impl ArgumentSet {
    pub fn new(claims: Vec<Claim>) -> Self {
        Self { claims, stage_failed: None }
    }

    /// Strongest claim; the earliest wins among equals.
    pub fn strongest(&self) -> Option<&Claim> {
        self.claims.iter().fold(None, |best: Option<&Claim>, c| match best {
            Some(b) if b.strength >= c.strength => Some(b),
            _ => Some(c),
        })
    }
}

/// A single risk finding from the audit stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flag {
    pub category: RiskCategory,
    pub severity: Severity,
    /// Verbatim text drawn from one of the term sheet's clause excerpts.
    pub quote: String,
    pub remediation: String,
    pub classification: Classification,
    #[serde(default)]
    pub finding: String,
    /// ASC 606 paragraph reference, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

/// Audit output.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FlagSet {
    pub flags: Vec<Flag>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage_failed: Option<String>,
}

impl FlagSet {
    pub fn new(flags: Vec<Flag>) -> Self {
        Self { flags, stage_failed: None }
    }
}

// ── Verdict ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Recommendation {
    Approve,
    #[serde(alias = "legal_review")]
    LegalReview,
    Reject,
}

impl Recommendation {
    /// Boundaries resolve to the stricter category.
    pub fn from_score(score: u32) -> Self {
        match score {
            0..=29 => Self::Approve,
            30..=69 => Self::LegalReview,
            _ => Self::Reject,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::LegalReview => "legal-review",
            Self::Reject => "reject",
        }
    }
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContributionSource {
    Flag { severity: Severity, review_required: bool },
    PolicyBreach { detail: String },
}

/// One weighted term in the risk score.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contribution {
    pub category: RiskCategory,
    pub weight: u32,
    pub source: ContributionSource,
}

impl Contribution {
    pub fn describe(&self) -> String {
        match &self.source {
            ContributionSource::Flag { severity, review_required } => {
                let review = if *review_required { ", requires legal review" } else { "" };
                format!("{} flag ({} severity{review}) +{}", self.category, severity.as_str(), self.weight)
            }
            ContributionSource::PolicyBreach { detail } => {
                format!("{} policy breach ({detail}) +{}", self.category, self.weight)
            }
        }
    }
}

/// Terminal artifact of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskVerdict {
    pub score: u32,
    pub confidence: f64,
    pub recommendation: Recommendation,
    /// Ranked by weight, then category order.
    pub contributions: Vec<Contribution>,
    pub rationale: String,
}

// ── Pipeline Events ──────────────────────────────────────────────────────

/// Broadcast event emitted after each significant run state change.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    RunStarted {
        run_id: String,
        mode: RunMode,
    },
    StateChanged {
        run_id: String,
        state: RunState,
    },
    StageChanged {
        run_id: String,
        stage: Stage,
        status: StageStatus,
    },
    Completed {
        run_id: String,
        score: u32,
        recommendation: Recommendation,
    },
    Failed {
        run_id: String,
        stage: Option<Stage>,
        kind: String,
        message: String,
    },
}

impl PipelineEvent {
    pub fn kind(&self) -> &str {
        match self {
            Self::RunStarted { .. } => "run_started",
            Self::StateChanged { .. } => "state_changed",
            Self::StageChanged { .. } => "stage_changed",
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
        }
    }

    pub fn run_id(&self) -> &str {
        match self {
            Self::RunStarted { run_id, .. }
            | Self::StateChanged { run_id, .. }
            | Self::StageChanged { run_id, .. }
            | Self::Completed { run_id, .. }
            | Self::Failed { run_id, .. } => run_id,
        }
    }
}
