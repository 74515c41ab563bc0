use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::cache::CachedAnalysis;
use crate::error::{ErrorOrigin, GuardError};
use crate::types::{ArgumentSet, FlagSet, RiskVerdict, RunMode, RunState, Stage, StageStatus, TermSheet};

/// One entry in a run's audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceStep {
    pub step: u32,
    /// None for steps no single stage owns, such as a cache hit or a demo miss.
    pub stage: Option<Stage>,
    pub summary: String,
    pub at: DateTime<Utc>,
}

/// Structured failure recorded on a failed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunFailure {
    pub stage: Option<Stage>,
    pub kind: String,
    pub origin: ErrorOrigin,
    pub message: String,
}

impl From<&GuardError> for RunFailure {
    fn from(e: &GuardError) -> Self {
        Self { stage: e.stage(), kind: e.kind().to_string(), origin: e.origin(), message: e.to_string() }
    }
}

/// A single analysis run and every artifact it produced.
///
/// Artifacts are write-once and each setter checks the run is in the state
/// that owns that artifact; `transition` enforces the lifecycle graph and the
/// preconditions for leaving each state. Once terminal, nothing changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    id: String,
    mode: RunMode,
    fingerprint: String,
    state: RunState,
    advocacy: StageStatus,
    audit: StageStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sample_id: Option<String>,
    term_sheet: Option<TermSheet>,
    arguments: Option<ArgumentSet>,
    flags: Option<FlagSet>,
    verdict: Option<RiskVerdict>,
    failure: Option<RunFailure>,
    trace: Vec<TraceStep>,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
}

impl PipelineRun {
    pub fn new(mode: RunMode, fingerprint: impl Into<String>) -> Self {
        let now = Utc::now();
        let suffix: u32 = rand::thread_rng().gen();
        Self {
            id: format!("run-{}-{:08x}", now.format("%Y%m%d%H%M%S"), suffix),
            mode,
            fingerprint: fingerprint.into(),
            state: RunState::Pending,
            advocacy: StageStatus::Pending,
            audit: StageStatus::Pending,
            sample_id: None,
            term_sheet: None,
            arguments: None,
            flags: None,
            verdict: None,
            failure: None,
            trace: Vec::new(),
            started_at: now,
            finished_at: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn mode(&self) -> RunMode {
        self.mode
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn stage_status(&self, stage: Stage) -> Option<StageStatus> {
        match stage {
            Stage::Advocacy => Some(self.advocacy),
            Stage::Audit => Some(self.audit),
            Stage::Extraction | Stage::Resolution => None,
        }
    }

    pub fn sample_id(&self) -> Option<&str> {
        self.sample_id.as_deref()
    }

    pub fn term_sheet(&self) -> Option<&TermSheet> {
        self.term_sheet.as_ref()
    }

    pub fn arguments(&self) -> Option<&ArgumentSet> {
        self.arguments.as_ref()
    }

    pub fn flags(&self) -> Option<&FlagSet> {
        self.flags.as_ref()
    }

    pub fn verdict(&self) -> Option<&RiskVerdict> {
        self.verdict.as_ref()
    }

    pub fn failure(&self) -> Option<&RunFailure> {
        self.failure.as_ref()
    }

    pub fn trace(&self) -> &[TraceStep] {
        &self.trace
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    // ── Lifecycle ────────────────────────────────────────────────────────

    pub fn transition(&mut self, to: RunState) -> Result<(), GuardError> {
        let allowed = match (self.state, to) {
            (RunState::Pending, RunState::Extracting) => true,
            (RunState::Extracting, RunState::Debating) => self.term_sheet.is_some(),
            (RunState::Debating, RunState::Resolving) => self.debate_settled(),
            (RunState::Resolving, RunState::Completed) => self.verdict.is_some(),
            _ => false,
        };
        if !allowed {
            return Err(GuardError::InvalidTransition { from: self.state, to });
        }
        self.state = to;
        if to.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Both debate stages are terminal and both artifacts are recorded.
    fn debate_settled(&self) -> bool {
        self.advocacy.is_terminal() && self.audit.is_terminal() && self.arguments.is_some() && self.flags.is_some()
    }

    /// Move the run to `Failed`. A no-op on a run that is already terminal.
    /// Debate stages still in flight are marked cancelled.
    pub fn fail(&mut self, error: &GuardError) {
        if self.state.is_terminal() {
            return;
        }
        for status in [&mut self.advocacy, &mut self.audit] {
            if !status.is_terminal() {
                *status = StageStatus::Cancelled;
            }
        }
        let failure = RunFailure::from(error);
        self.push_trace(failure.stage, format!("run failed: {}", failure.message));
        self.failure = Some(failure);
        self.state = RunState::Failed;
        self.finished_at = Some(Utc::now());
    }

    pub fn set_stage_status(&mut self, stage: Stage, status: StageStatus) -> Result<(), GuardError> {
        if self.state != RunState::Debating {
            return Err(GuardError::InvalidTransition { from: self.state, to: self.state });
        }
        let slot = match stage {
            Stage::Advocacy => &mut self.advocacy,
            Stage::Audit => &mut self.audit,
            Stage::Extraction | Stage::Resolution => {
                return Err(GuardError::InvalidTransition { from: self.state, to: self.state })
            }
        };
        if slot.is_terminal() {
            return Err(GuardError::AlreadyRecorded { field: "debate stage status" });
        }
        *slot = status;
        Ok(())
    }

    // ── Artifacts ────────────────────────────────────────────────────────

    pub fn record_term_sheet(&mut self, term_sheet: TermSheet) -> Result<(), GuardError> {
        self.expect_state(RunState::Extracting)?;
        write_once(&mut self.term_sheet, term_sheet, "term sheet")
    }

    pub fn record_arguments(&mut self, arguments: ArgumentSet) -> Result<(), GuardError> {
        self.expect_state(RunState::Debating)?;
        write_once(&mut self.arguments, arguments, "argument set")
    }

    pub fn record_flags(&mut self, flags: FlagSet) -> Result<(), GuardError> {
        self.expect_state(RunState::Debating)?;
        write_once(&mut self.flags, flags, "flag set")
    }

    pub fn record_verdict(&mut self, verdict: RiskVerdict) -> Result<(), GuardError> {
        self.expect_state(RunState::Resolving)?;
        write_once(&mut self.verdict, verdict, "verdict")
    }

    /// Serve a pending demo run straight from a cached analysis.
    pub fn hydrate(&mut self, cached: &CachedAnalysis) -> Result<(), GuardError> {
        if self.state != RunState::Pending {
            return Err(GuardError::InvalidTransition { from: self.state, to: RunState::Completed });
        }
        self.sample_id = Some(cached.sample_id.clone());
        self.term_sheet = Some(cached.term_sheet.clone());
        self.arguments = Some(cached.arguments.clone());
        self.flags = Some(cached.flags.clone());
        self.verdict = Some(cached.verdict.clone());
        self.advocacy = StageStatus::Succeeded;
        self.audit = StageStatus::Succeeded;
        self.push_trace(None, format!("served cached analysis of sample {}", cached.sample_id));
        self.state = RunState::Completed;
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// Package a completed run for the demo cache.
    pub fn to_cached(&self, sample_id: &str, name: &str) -> Option<CachedAnalysis> {
        if self.state != RunState::Completed {
            return None;
        }
        Some(CachedAnalysis {
            sample_id: sample_id.to_string(),
            name: name.to_string(),
            term_sheet: self.term_sheet.clone()?,
            arguments: self.arguments.clone()?,
            flags: self.flags.clone()?,
            verdict: self.verdict.clone()?,
        })
    }

    pub fn push_trace(&mut self, stage: impl Into<Option<Stage>>, summary: impl Into<String>) {
        let step = self.trace.len() as u32 + 1;
        self.trace.push(TraceStep { step, stage: stage.into(), summary: summary.into(), at: Utc::now() });
    }

    fn expect_state(&self, expected: RunState) -> Result<(), GuardError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(GuardError::InvalidTransition { from: self.state, to: expected })
        }
    }
}

fn write_once<T>(slot: &mut Option<T>, value: T, field: &'static str) -> Result<(), GuardError> {
    if slot.is_some() {
        return Err(GuardError::AlreadyRecorded { field });
    }
    *slot = Some(value);
    Ok(())
}
