use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{RiskCategory, RunState, Stage};

/// Where a failure came from, so callers can tell a bad model reply from bad
/// input or a broken policy file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorOrigin {
    /// The generation backend misbehaved: bad output, timeout or transport error.
    Upstream,
    /// The policy or cache configuration is invalid.
    Policy,
    /// The submitted text or mode cannot be served.
    Input,
    /// The caller cancelled the run.
    Caller,
    /// Orchestration bug: a guard rejected an operation.
    Internal,
}

#[derive(Debug, Error)]
pub enum GuardError {
    #[error("policy config error: {0}")]
    Config(String),

    #[error("no cached analysis for fingerprint {fingerprint}; demo mode only serves the bundled samples")]
    UnknownSample { fingerprint: String },

    #[error("extraction output rejected: {0}")]
    Extraction(String),

    #[error("{stage} output rejected: {message}")]
    Schema { stage: Stage, message: String },

    #[error("{category} flag quotes text absent from every clause excerpt: {quote:?}")]
    UnsupportedFlag { category: RiskCategory, quote: String },

    #[error("{stage} stage exceeded its {}s deadline", .after.as_secs_f64())]
    Timeout { stage: Stage, after: Duration },

    #[error("{stage} generation failed: {message}")]
    Backend { stage: Stage, message: String },

    #[error("{stage} stage cancelled")]
    Cancelled { stage: Stage },

    #[error("resolution requires the {missing}")]
    IncompleteState { missing: &'static str },

    #[error("invalid run transition {from} -> {to}")]
    InvalidTransition { from: RunState, to: RunState },

    #[error("{field} was already recorded for this run")]
    AlreadyRecorded { field: &'static str },
}

impl GuardError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::UnknownSample { .. } => "unknown_sample",
            Self::Extraction(_) => "extraction",
            Self::Schema { .. } => "schema",
            Self::UnsupportedFlag { .. } => "unsupported_flag",
            Self::Timeout { .. } => "timeout",
            Self::Backend { .. } => "backend",
            Self::Cancelled { .. } => "cancelled",
            Self::IncompleteState { .. } => "incomplete_state",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::AlreadyRecorded { .. } => "already_recorded",
        }
    }

    pub fn origin(&self) -> ErrorOrigin {
        match self {
            Self::Config(_) => ErrorOrigin::Policy,
            Self::UnknownSample { .. } => ErrorOrigin::Input,
            Self::Extraction(_)
            | Self::Schema { .. }
            | Self::UnsupportedFlag { .. }
            | Self::Timeout { .. }
            | Self::Backend { .. } => ErrorOrigin::Upstream,
            Self::Cancelled { .. } => ErrorOrigin::Caller,
            Self::IncompleteState { .. }
            | Self::InvalidTransition { .. }
            | Self::AlreadyRecorded { .. } => ErrorOrigin::Internal,
        }
    }

    /// The stage the failure is attributed to, if any.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Extraction(_) => Some(Stage::Extraction),
            Self::Schema { stage, .. }
            | Self::Timeout { stage, .. }
            | Self::Backend { stage, .. }
            | Self::Cancelled { stage } => Some(*stage),
            Self::UnsupportedFlag { .. } => Some(Stage::Audit),
            Self::IncompleteState { .. } => Some(Stage::Resolution),
            Self::Config(_)
            | Self::UnknownSample { .. }
            | Self::InvalidTransition { .. }
            | Self::AlreadyRecorded { .. } => None,
        }
    }

    /// Failures a debate stage may be degraded past when the run allows it.
    /// Malformed output never qualifies.
    pub fn is_degradable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Backend { .. } | Self::Cancelled { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origins_distinguish_model_from_input() {
        let e = GuardError::Schema { stage: Stage::Audit, message: "bad".into() };
        assert_eq!(e.origin(), ErrorOrigin::Upstream);
        assert_eq!(e.stage(), Some(Stage::Audit));

        let e = GuardError::UnknownSample { fingerprint: "abc".into() };
        assert_eq!(e.origin(), ErrorOrigin::Input);
        assert_eq!(e.kind(), "unknown_sample");
        assert_eq!(e.stage(), None);

        let e = GuardError::Config("payment_terms_max_days missing".into());
        assert_eq!(e.origin(), ErrorOrigin::Policy);
    }

    #[test]
    fn only_transport_failures_degrade() {
        assert!(GuardError::Timeout { stage: Stage::Advocacy, after: Duration::from_secs(1) }.is_degradable());
        assert!(GuardError::Backend { stage: Stage::Audit, message: "503".into() }.is_degradable());
        assert!(!GuardError::Schema { stage: Stage::Audit, message: "x".into() }.is_degradable());
        assert!(!GuardError::UnsupportedFlag {
            category: RiskCategory::Consignment,
            quote: "x".into()
        }
        .is_degradable());
    }

    #[test]
    fn timeout_message_names_stage() {
        let e = GuardError::Timeout { stage: Stage::Extraction, after: Duration::from_millis(1500) };
        assert_eq!(e.to_string(), "extraction stage exceeded its 1.5s deadline");
    }
}
