use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tokio::task::JoinError;
use tokio_util::sync::{CancellationToken, DropGuard};
use tokio_util::task::AbortOnDropHandle;
use tracing::{debug, error, info, warn};

pub use crate::types::PipelineEvent;

use crate::{
    agent::GenerationBackend,
    cache::ResultCache,
    error::GuardError,
    fingerprint::{fingerprint, FingerprintResolver, RunPlan},
    policy::PolicyThresholds,
    resolution,
    run::PipelineRun,
    stages::{advocacy, audit, extraction},
    types::{ArgumentSet, FlagSet, RunMode, RunState, Stage, StageStatus},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    /// Deadline applied to each model-backed stage independently.
    pub stage_timeout: Duration,
    /// Continue to resolution when one debate stage times out, is cancelled
    /// or loses its backend, with that stage's output marked failed.
    pub allow_degraded: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self { stage_timeout: Duration::from_secs(120), allow_degraded: false }
    }
}

/// Cancellation handles for one run. Cancelling the run cancels every stage;
/// a single stage can be cancelled on its own.
#[derive(Debug, Clone)]
pub struct RunControl {
    run: CancellationToken,
    extraction: CancellationToken,
    advocacy: CancellationToken,
    audit: CancellationToken,
}

impl Default for RunControl {
    fn default() -> Self {
        Self::new()
    }
}

impl RunControl {
    pub fn new() -> Self {
        let run = CancellationToken::new();
        Self {
            extraction: run.child_token(),
            advocacy: run.child_token(),
            audit: run.child_token(),
            run,
        }
    }

    pub fn cancel(&self) {
        self.run.cancel();
    }

    pub fn cancel_stage(&self, stage: Stage) {
        self.token(stage).cancel();
    }

    /// Cancels the whole run when dropped, e.g. when a request future is
    /// abandoned mid-run.
    pub fn drop_guard(&self) -> DropGuard {
        self.run.clone().drop_guard()
    }

    fn token(&self, stage: Stage) -> CancellationToken {
        match stage {
            Stage::Extraction => self.extraction.clone(),
            Stage::Advocacy => self.advocacy.clone(),
            Stage::Audit => self.audit.clone(),
            Stage::Resolution => self.run.clone(),
        }
    }
}

/// Output of a debate stage, with a stand-in for degraded runs.
trait DebateOutput: Sized {
    fn failed(reason: String) -> Self;
    fn summary(&self) -> String;
}

impl DebateOutput for ArgumentSet {
    fn failed(reason: String) -> Self {
        Self { claims: Vec::new(), stage_failed: Some(reason) }
    }

    fn summary(&self) -> String {
        format!("advocate produced {} claim(s)", self.claims.len())
    }
}

impl DebateOutput for FlagSet {
    fn failed(reason: String) -> Self {
        Self { flags: Vec::new(), stage_failed: Some(reason) }
    }

    fn summary(&self) -> String {
        format!("auditor raised {} flag(s)", self.flags.len())
    }
}

/// Drives runs through extraction, the advocacy/audit debate and resolution.
pub struct Pipeline {
    pub backend: Arc<dyn GenerationBackend>,
    pub policy: Arc<PolicyThresholds>,
    pub cache: Arc<ResultCache>,
    pub options: RunOptions,
    pub event_tx: broadcast::Sender<PipelineEvent>,
    resolver: FingerprintResolver,
}

impl Pipeline {
    pub fn new(
        backend: Arc<dyn GenerationBackend>,
        policy: Arc<PolicyThresholds>,
        cache: Arc<ResultCache>,
        options: RunOptions,
    ) -> (Self, broadcast::Receiver<PipelineEvent>) {
        let (tx, rx) = broadcast::channel(256);
        let p = Self {
            resolver: FingerprintResolver::new(Arc::clone(&cache)),
            backend,
            policy,
            cache,
            options,
            event_tx: tx,
        };
        (p, rx)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.event_tx.subscribe()
    }

    /// Analyze `raw_text`, returning the completed run or the error that
    /// stopped it. Dropping the returned future cancels the run.
    pub async fn run_analysis(&self, raw_text: &str, mode: RunMode) -> Result<PipelineRun, GuardError> {
        let control = RunControl::new();
        let _cancel_on_drop = control.drop_guard();
        let (run, result) = self.run_with_control(raw_text, mode, &control).await;
        result.map(|()| run)
    }

    /// Like [`run_analysis`](Self::run_analysis) but under caller-held
    /// cancellation, and the run is returned even when it failed.
    pub async fn run_with_control(
        &self,
        raw_text: &str,
        mode: RunMode,
        control: &RunControl,
    ) -> (PipelineRun, Result<(), GuardError>) {
        let mut run = PipelineRun::new(mode, fingerprint(raw_text));
        info!(run_id = %run.id(), mode = %mode, fingerprint = %run.fingerprint(), "run started");
        self.emit(PipelineEvent::RunStarted { run_id: run.id().to_string(), mode });

        let result = match self.drive(&mut run, raw_text, control).await {
            Ok(()) => {
                if let Some(v) = run.verdict() {
                    info!(
                        run_id = %run.id(),
                        score = v.score,
                        recommendation = %v.recommendation,
                        confidence = v.confidence,
                        "run completed"
                    );
                    self.emit(PipelineEvent::Completed {
                        run_id: run.id().to_string(),
                        score: v.score,
                        recommendation: v.recommendation,
                    });
                }
                Ok(())
            }
            Err(e) => {
                run.fail(&e);
                error!(run_id = %run.id(), kind = e.kind(), stage = ?e.stage(), "run failed: {e}");
                self.emit(PipelineEvent::Failed {
                    run_id: run.id().to_string(),
                    stage: e.stage(),
                    kind: e.kind().to_string(),
                    message: e.to_string(),
                });
                Err(e)
            }
        };
        (run, result)
    }

    async fn drive(&self, run: &mut PipelineRun, raw_text: &str, control: &RunControl) -> Result<(), GuardError> {
        match self.resolver.resolve(raw_text, run.mode())? {
            RunPlan::Cached { key } => {
                let cached = self.cache.get(&key).ok_or(GuardError::UnknownSample { fingerprint: key })?;
                run.hydrate(cached)?;
                self.emit_state(run);
                Ok(())
            }
            RunPlan::Live { .. } => self.run_live(run, raw_text, control).await,
        }
    }

    async fn run_live(&self, run: &mut PipelineRun, raw_text: &str, control: &RunControl) -> Result<(), GuardError> {
        let deadline = self.options.stage_timeout;

        self.advance(run, RunState::Extracting)?;
        let started = Instant::now();
        let term_sheet = guarded(
            Stage::Extraction,
            deadline,
            control.token(Stage::Extraction),
            extraction::extract(self.backend.as_ref(), raw_text),
        )
        .await?;
        info!(
            run_id = %run.id(),
            stage = "extraction",
            parties = term_sheet.parties.len(),
            clauses = term_sheet.clauses.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "term sheet extracted"
        );
        let summary = format!(
            "extracted {} party name(s), {} clause excerpt(s), Net {}",
            term_sheet.parties.len(),
            term_sheet.clauses.len(),
            term_sheet.payment_term_days
        );
        run.record_term_sheet(term_sheet)?;
        run.push_trace(Stage::Extraction, summary);

        self.advance(run, RunState::Debating)?;
        let (arguments, flags) = self.debate(run, control).await?;
        run.record_arguments(arguments)?;
        run.record_flags(flags)?;

        self.advance(run, RunState::Resolving)?;
        let verdict = resolution::resolve(run.term_sheet(), run.arguments(), run.flags(), &self.policy)?;
        run.push_trace(
            Stage::Resolution,
            format!("score {} ({}), confidence {:.2}", verdict.score, verdict.recommendation, verdict.confidence),
        );
        run.record_verdict(verdict)?;
        self.advance(run, RunState::Completed)
    }

    /// Run advocacy and audit concurrently. Both must settle before this
    /// returns; the first non-degradable failure cancels the sibling and its
    /// output is discarded.
    async fn debate(&self, run: &mut PipelineRun, control: &RunControl) -> Result<(ArgumentSet, FlagSet), GuardError> {
        let term_sheet =
            Arc::new(run.term_sheet().cloned().ok_or(GuardError::IncompleteState { missing: "term sheet" })?);
        let deadline = self.options.stage_timeout;

        // Both tasks are aborted if this future is dropped mid-debate.
        let mut advocacy_task: AbortOnDropHandle<Result<ArgumentSet, GuardError>> = {
            let backend = Arc::clone(&self.backend);
            let term_sheet = Arc::clone(&term_sheet);
            let token = control.token(Stage::Advocacy);
            AbortOnDropHandle::new(tokio::spawn(async move {
                guarded(Stage::Advocacy, deadline, token, advocacy::advocate(backend.as_ref(), &term_sheet)).await
            }))
        };
        let mut audit_task: AbortOnDropHandle<Result<FlagSet, GuardError>> = {
            let backend = Arc::clone(&self.backend);
            let policy = Arc::clone(&self.policy);
            let term_sheet = Arc::clone(&term_sheet);
            let token = control.token(Stage::Audit);
            AbortOnDropHandle::new(tokio::spawn(async move {
                guarded(Stage::Audit, deadline, token, audit::audit(backend.as_ref(), &term_sheet, &policy)).await
            }))
        };

        for stage in [Stage::Advocacy, Stage::Audit] {
            if let Err(e) = self.set_status(run, stage, StageStatus::Running) {
                advocacy_task.abort();
                audit_task.abort();
                return Err(e);
            }
        }

        let mut arguments: Option<ArgumentSet> = None;
        let mut flags: Option<FlagSet> = None;
        while arguments.is_none() || flags.is_none() {
            tokio::select! {
                joined = &mut advocacy_task, if arguments.is_none() => {
                    match self.settle(run, control, Stage::Advocacy, flatten(Stage::Advocacy, joined)) {
                        Ok(set) => arguments = Some(set),
                        Err(e) => {
                            control.cancel_stage(Stage::Audit);
                            audit_task.abort();
                            return Err(e);
                        }
                    }
                }
                joined = &mut audit_task, if flags.is_none() => {
                    match self.settle(run, control, Stage::Audit, flatten(Stage::Audit, joined)) {
                        Ok(set) => flags = Some(set),
                        Err(e) => {
                            control.cancel_stage(Stage::Advocacy);
                            advocacy_task.abort();
                            return Err(e);
                        }
                    }
                }
            }
        }

        match (arguments, flags) {
            (Some(a), Some(f)) => Ok((a, f)),
            _ => Err(GuardError::IncompleteState { missing: "debate outputs" }),
        }
    }

    /// Record a debate stage's outcome. Cancelling the whole run is never
    /// degraded past.
    fn settle<T: DebateOutput>(
        &self,
        run: &mut PipelineRun,
        control: &RunControl,
        stage: Stage,
        result: Result<T, GuardError>,
    ) -> Result<T, GuardError> {
        match result {
            Ok(set) => {
                self.set_status(run, stage, StageStatus::Succeeded)?;
                let summary = set.summary();
                info!(run_id = %run.id(), stage = %stage, "{summary}");
                run.push_trace(stage, summary);
                Ok(set)
            }
            Err(e) if self.options.allow_degraded && e.is_degradable() && !control.run.is_cancelled() => {
                warn!(run_id = %run.id(), stage = %stage, kind = e.kind(), "continuing degraded: {e}");
                let status = match e {
                    GuardError::Cancelled { .. } => StageStatus::Cancelled,
                    _ => StageStatus::Failed,
                };
                self.set_status(run, stage, status)?;
                run.push_trace(stage, format!("stage failed, continuing degraded: {e}"));
                Ok(T::failed(e.to_string()))
            }
            Err(e) => {
                let status = match e {
                    GuardError::Cancelled { .. } => StageStatus::Cancelled,
                    _ => StageStatus::Failed,
                };
                self.set_status(run, stage, status)?;
                Err(e)
            }
        }
    }

    // ── Small helpers ─────────────────────────────────────────────────────

    fn advance(&self, run: &mut PipelineRun, to: RunState) -> Result<(), GuardError> {
        run.transition(to)?;
        debug!(run_id = %run.id(), state = %to, "state changed");
        self.emit_state(run);
        Ok(())
    }

    fn set_status(&self, run: &mut PipelineRun, stage: Stage, status: StageStatus) -> Result<(), GuardError> {
        run.set_stage_status(stage, status)?;
        self.emit(PipelineEvent::StageChanged { run_id: run.id().to_string(), stage, status });
        Ok(())
    }

    fn emit_state(&self, run: &PipelineRun) {
        self.emit(PipelineEvent::StateChanged { run_id: run.id().to_string(), state: run.state() });
    }

    fn emit(&self, event: PipelineEvent) {
        let _ = self.event_tx.send(event);
    }
}

// ── Private helpers ───────────────────────────────────────────────────────────

/// Apply the stage deadline and cancellation token to a stage future.
async fn guarded<T, F>(stage: Stage, deadline: Duration, token: CancellationToken, fut: F) -> Result<T, GuardError>
where
    F: Future<Output = Result<T, GuardError>>,
{
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(GuardError::Cancelled { stage }),
        res = tokio::time::timeout(deadline, fut) => match res {
            Ok(out) => out,
            Err(_) => Err(GuardError::Timeout { stage, after: deadline }),
        },
    }
}

fn flatten<T>(stage: Stage, joined: Result<Result<T, GuardError>, JoinError>) -> Result<T, GuardError> {
    match joined {
        Ok(result) => result,
        Err(e) if e.is_cancelled() => Err(GuardError::Cancelled { stage }),
        Err(e) => Err(GuardError::Backend { stage, message: format!("stage task panicked: {e}") }),
    }
}
