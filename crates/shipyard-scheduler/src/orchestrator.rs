//! Pipeline orchestrator: drives runs through the stage sequence.
//!
//! Every stage runs in its own task and reports back through
//! [`PipelineOrchestrator::advance`]. State changes for one run are
//! serialized by a per-run lock; different runs never wait on each other.

use chrono::{DateTime, Duration, Utc};
use shipyard_config::{ConcurrencyPolicy, PipelineConfig};
use shipyard_core::artifact::{ArtifactRef, ArtifactStore, PruneStats};
use shipyard_core::pipeline::{
    ApprovalDecision, PipelineRun, RunStatus, StageKind, StageOutcome, StageResult, Transition,
    TriggerEvent,
};
use shipyard_core::source::SourceManifest;
use shipyard_core::store::RunStore;
use shipyard_core::{Error, ResourceId, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{OwnedMutexGuard, broadcast};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::events::PipelineEvent;
use crate::stages::{StageContext, StageRunners};

const EVENT_CAPACITY: usize = 1024;

/// Failure reason recorded on runs whose stage task died with the process.
pub const INTERRUPTED_REASON: &str = "interrupted by a server restart";

/// The parts of the pipeline definition the orchestrator enforces.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub name: String,
    /// Pushes to any other branch are rejected.
    pub tracked_branch: String,
    /// Deadline for a decision once a run reaches the gate; none by default.
    pub approval_timeout: Option<Duration>,
    pub concurrency: ConcurrencyPolicy,
}

impl PipelineSettings {
    pub fn new(name: impl Into<String>, tracked_branch: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tracked_branch: tracked_branch.into(),
            approval_timeout: None,
            concurrency: ConcurrencyPolicy::default(),
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            name: config.name.clone(),
            tracked_branch: config.source.branch.clone(),
            approval_timeout: config.approval.timeout(),
            concurrency: config.concurrency,
        }
    }

    pub fn with_approval_timeout(mut self, timeout: Duration) -> Self {
        self.approval_timeout = Some(timeout);
        self
    }

    pub fn with_concurrency(mut self, policy: ConcurrencyPolicy) -> Self {
        self.concurrency = policy;
        self
    }
}

/// Drives pipeline runs. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct PipelineOrchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    settings: PipelineSettings,
    runs: Arc<dyn RunStore>,
    artifacts: Arc<dyn ArtifactStore>,
    runners: StageRunners,
    events: broadcast::Sender<PipelineEvent>,
    /// The in-flight stage task of each run.
    tasks: Mutex<HashMap<ResourceId, JoinHandle<()>>>,
    locks: Mutex<HashMap<ResourceId, Arc<tokio::sync::Mutex<()>>>>,
}

impl PipelineOrchestrator {
    pub fn new(
        settings: PipelineSettings,
        runs: Arc<dyn RunStore>,
        artifacts: Arc<dyn ArtifactStore>,
        runners: StageRunners,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                settings,
                runs,
                artifacts,
                runners,
                events,
                tasks: Mutex::new(HashMap::new()),
                locks: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.inner.settings
    }

    /// Receive every event emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.inner.events.subscribe()
    }

    fn emit(&self, event: PipelineEvent) {
        // No subscribers is fine.
        let _ = self.inner.events.send(event);
    }

    fn run_lock(&self, run_id: ResourceId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .inner
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(run_id).or_default().clone()
    }

    fn release_lock(&self, run_id: ResourceId) {
        self.inner
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&run_id);
    }

    /// Serialize on a run and load it.
    ///
    /// Only live runs keep a lock entry: the entry is dropped again when the
    /// run is unknown or already finished.
    async fn lock_run(&self, run_id: ResourceId) -> Result<(OwnedMutexGuard<()>, PipelineRun)> {
        let guard = self.run_lock(run_id).lock_owned().await;
        match self.inner.runs.get(run_id).await {
            Ok(run) => {
                if run.is_terminal() {
                    self.release_lock(run_id);
                }
                Ok((guard, run))
            }
            Err(e) => {
                self.release_lock(run_id);
                Err(e)
            }
        }
    }

    fn forget(&self, run_id: ResourceId) {
        self.release_lock(run_id);
        self.take_task(run_id);
    }

    fn has_task(&self, run_id: ResourceId) -> bool {
        self.inner
            .tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains_key(&run_id)
    }

    /// Number of runs holding a lock entry.
    pub fn tracked_runs(&self) -> usize {
        self.inner
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    fn take_task(&self, run_id: ResourceId) -> Option<JoinHandle<()>> {
        self.inner
            .tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&run_id)
    }

    /// Start a run for a push or a manual request.
    ///
    /// A trigger without a branch builds the tracked branch; a trigger for
    /// any other branch is rejected.
    pub async fn trigger(&self, mut event: TriggerEvent) -> Result<PipelineRun> {
        let tracked = &self.inner.settings.tracked_branch;
        match &event.branch {
            None => event.branch = Some(tracked.clone()),
            Some(branch) if branch != tracked => {
                return Err(Error::Trigger(format!(
                    "branch {} is not tracked (tracking {})",
                    branch, tracked
                )));
            }
            Some(_) => {}
        }
        event.validate()?;

        if self.inner.settings.concurrency == ConcurrencyPolicy::Supersede {
            self.supersede_active().await?;
        }

        let number = self.inner.runs.next_number().await?;
        let run = PipelineRun::new(number, self.inner.settings.name.clone(), event);
        self.inner.runs.insert(&run).await?;

        info!(
            run_id = %run.id,
            number = run.number,
            branch = run.trigger.branch.as_deref().unwrap_or_default(),
            revision = run.trigger.revision.as_deref().unwrap_or("HEAD"),
            "Run created"
        );
        self.emit(PipelineEvent::RunCreated {
            run_id: run.id,
            number: run.number,
            trigger: run.trigger.clone(),
        });

        self.dispatch(run.clone(), StageKind::Source);
        Ok(run)
    }

    async fn supersede_active(&self) -> Result<()> {
        for status in [RunStatus::Running, RunStatus::AwaitingApproval] {
            for run in self.inner.runs.list_by_status(status).await? {
                match self.supersede(run.id).await {
                    Ok(_) => info!(run_id = %run.id, "Run superseded"),
                    // Finished on its own meanwhile.
                    Err(Error::InvalidState(_)) => {}
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(())
    }

    /// Re-run a finished run on exactly the revision it built.
    pub async fn retry(&self, run_id: ResourceId, actor: Option<String>) -> Result<PipelineRun> {
        let original = self.inner.runs.get(run_id).await?;
        if !original.is_terminal() {
            return Err(Error::InvalidState(format!(
                "run {} is still {}",
                run_id, original.status
            )));
        }

        let mut event = TriggerEvent::retry_of(&original, actor);
        if event.revision.is_none() {
            if let Some(reference) = original.artifact_of(StageKind::Source) {
                let data = self.inner.artifacts.get(reference).await?;
                let manifest: SourceManifest = serde_json::from_slice(&data)?;
                event.revision = Some(manifest.revision);
            }
        }
        self.trigger(event).await
    }

    /// Start `stage` of `run` in a new task.
    fn dispatch(&self, run: PipelineRun, stage: StageKind) {
        let run_id = run.id;
        let Some(runner) = self.inner.runners.get(stage).cloned() else {
            error!(run_id = %run_id, %stage, "No runner for stage");
            return;
        };

        let this = self.clone();
        let ctx = StageContext {
            run,
            stage,
            artifacts: self.inner.artifacts.clone(),
            events: self.inner.events.clone(),
        };

        // Held across the spawn so the task cannot deregister before it is
        // registered.
        let mut tasks = self
            .inner
            .tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let handle = tokio::spawn(async move {
            this.emit(PipelineEvent::StageStarted { run_id, stage });
            info!(run_id = %run_id, %stage, "Stage started");

            let started_at = Utc::now();
            let result = match runner.run(&ctx).await {
                Ok(artifact) => StageResult::succeeded(stage, Some(started_at), artifact),
                Err(e) => {
                    warn!(run_id = %run_id, %stage, error = %e, "Stage failed");
                    StageResult::failed(stage, Some(started_at), e.to_string())
                }
            };

            this.take_task(run_id);
            if let Err(e) = this.advance(run_id, result).await {
                // The run moved on without us, e.g. it was cancelled.
                warn!(run_id = %run_id, %stage, error = %e, "Discarding stage result");
            }
        });
        tasks.insert(run_id, handle);
    }

    /// Apply a transition's side effects.
    fn apply(&self, run: &PipelineRun, transition: Transition) {
        match transition {
            Transition::Dispatch(stage) => self.dispatch(run.clone(), stage),
            Transition::AwaitApproval => {
                info!(run_id = %run.id, deadline = ?run.approval_deadline, "Awaiting approval");
                self.emit(PipelineEvent::AwaitingApproval {
                    run_id: run.id,
                    deadline: run.approval_deadline,
                });
            }
            Transition::Succeeded | Transition::Failed | Transition::Cancelled => {
                info!(
                    run_id = %run.id,
                    status = %run.status,
                    halted_at = ?run.halt.as_ref().map(|h| h.stage),
                    "Run finished"
                );
                self.emit(PipelineEvent::RunFinished {
                    run_id: run.id,
                    status: run.status,
                    halt: run.halt.clone(),
                });
                self.forget(run.id);
            }
        }
    }

    /// Record the completion of a run's current stage and move it on.
    pub async fn advance(&self, run_id: ResourceId, result: StageResult) -> Result<Transition> {
        let (_guard, mut run) = self.lock_run(run_id).await?;
        let stage = result.stage;
        let outcome = result.outcome;
        let reason = result.failure_reason.clone();

        let transition = run.record(result)?;
        if transition == Transition::AwaitApproval {
            run.approval_deadline = self
                .inner
                .settings
                .approval_timeout
                .map(|timeout| run.updated_at + timeout);
        }
        self.inner.runs.save(&run).await?;

        debug!(run_id = %run_id, %stage, ?transition, "Stage recorded");
        self.emit(PipelineEvent::StageCompleted {
            run_id,
            stage,
            outcome,
            reason,
        });
        self.apply(&run, transition);
        Ok(transition)
    }

    /// Approve or reject a run waiting at the gate.
    pub async fn decide(
        &self,
        run_id: ResourceId,
        decision: ApprovalDecision,
    ) -> Result<PipelineRun> {
        let (_guard, mut run) = self.lock_run(run_id).await?;
        if run.status == RunStatus::AwaitingApproval
            && run
                .approval_deadline
                .is_some_and(|deadline| deadline <= decision.decided_at)
        {
            let transition = run.expire_approval(decision.decided_at)?;
            self.inner.runs.save(&run).await?;
            let reason = run.halt.as_ref().map(|h| h.reason.clone());
            warn!(run_id = %run_id, "Decision arrived after the approval deadline");
            self.emit(PipelineEvent::StageCompleted {
                run_id,
                stage: StageKind::Approve,
                outcome: StageOutcome::Failed,
                reason: reason.clone(),
            });
            self.apply(&run, transition);
            return Err(Error::ApprovalTimeout(format!(
                "run {} missed its approval deadline",
                run_id
            )));
        }
        let transition = run.decide(decision)?;
        self.inner.runs.save(&run).await?;

        if let Some(gate) = run.result_for(StageKind::Approve) {
            info!(
                run_id = %run_id,
                actor = run.approval.as_ref().map(|a| a.actor.as_str()).unwrap_or_default(),
                outcome = ?gate.outcome,
                "Approval decided"
            );
            self.emit(PipelineEvent::StageCompleted {
                run_id,
                stage: StageKind::Approve,
                outcome: gate.outcome,
                reason: gate.failure_reason.clone(),
            });
        }
        self.apply(&run, transition);
        Ok(run)
    }

    /// Cancel an unfinished run in favour of a newer one, aborting its
    /// running stage.
    async fn supersede(&self, run_id: ResourceId) -> Result<PipelineRun> {
        let (_guard, mut run) = self.lock_run(run_id).await?;
        let transition = run.cancel("superseded by a newer run")?;
        if let Some(task) = self.take_task(run_id) {
            task.abort();
        }
        self.inner.runs.save(&run).await?;
        self.apply(&run, transition);
        Ok(run)
    }

    /// Fail every run left `running` by a previous process.
    ///
    /// Stage tasks do not survive a restart, so nothing would ever report
    /// back for these runs. Runs with a live stage task are left alone.
    pub async fn recover_interrupted(&self) -> Result<Vec<ResourceId>> {
        let mut recovered = Vec::new();
        for candidate in self.inner.runs.list_by_status(RunStatus::Running).await? {
            if self.has_task(candidate.id) {
                continue;
            }
            let (_guard, mut run) = match self.lock_run(candidate.id).await {
                Ok(locked) => locked,
                Err(Error::NotFound(_)) => continue,
                Err(e) => return Err(e),
            };
            if run.status != RunStatus::Running || self.has_task(run.id) {
                continue;
            }

            let stage = run.current_stage;
            let transition = run.record(StageResult::failed(stage, None, INTERRUPTED_REASON))?;
            self.inner.runs.save(&run).await?;
            warn!(run_id = %run.id, %stage, "Run interrupted by a restart");
            self.emit(PipelineEvent::StageCompleted {
                run_id: run.id,
                stage,
                outcome: StageOutcome::Failed,
                reason: Some(INTERRUPTED_REASON.to_string()),
            });
            self.apply(&run, transition);
            recovered.push(run.id);
        }
        Ok(recovered)
    }

    /// Fail every run whose approval deadline is at or before `now`.
    pub async fn expire_approvals(&self, now: DateTime<Utc>) -> Result<Vec<ResourceId>> {
        let mut expired = Vec::new();
        let waiting = self
            .inner
            .runs
            .list_by_status(RunStatus::AwaitingApproval)
            .await?;

        for candidate in waiting {
            if !candidate.approval_deadline.is_some_and(|d| d <= now) {
                continue;
            }
            // Re-read under the lock; a decision may have landed.
            let (_guard, mut run) = match self.lock_run(candidate.id).await {
                Ok(locked) => locked,
                Err(Error::NotFound(_)) => continue,
                Err(e) => return Err(e),
            };
            let Ok(transition) = run.expire_approval(now) else {
                continue;
            };
            self.inner.runs.save(&run).await?;
            warn!(run_id = %run.id, "Approval timed out");
            self.emit(PipelineEvent::StageCompleted {
                run_id: run.id,
                stage: StageKind::Approve,
                outcome: StageOutcome::Failed,
                reason: run.halt.as_ref().map(|h| h.reason.clone()),
            });
            self.apply(&run, transition);
            expired.push(run.id);
        }
        Ok(expired)
    }

    /// Periodically expire overdue approvals.
    pub fn spawn_approval_reaper(&self, every: std::time::Duration) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                match this.expire_approvals(Utc::now()).await {
                    Ok(expired) if !expired.is_empty() => {
                        info!(count = expired.len(), "Expired approvals");
                    }
                    Ok(_) => {}
                    Err(e) => error!(error = %e, "Approval reaper failed"),
                }
            }
        })
    }

    pub async fn get(&self, run_id: ResourceId) -> Result<PipelineRun> {
        self.inner.runs.get(run_id).await
    }

    /// Most recent runs first.
    pub async fn list(&self, limit: usize) -> Result<Vec<PipelineRun>> {
        self.inner.runs.list(limit).await
    }

    pub async fn artifacts(&self, run_id: ResourceId) -> Result<Vec<ArtifactRef>> {
        self.inner.runs.get(run_id).await?;
        self.inner.artifacts.list(&run_id).await
    }

    /// Read one artifact of a run.
    pub async fn read_artifact(
        &self,
        run_id: ResourceId,
        stage: StageKind,
        name: &str,
    ) -> Result<(ArtifactRef, bytes::Bytes)> {
        let reference = self
            .artifacts(run_id)
            .await?
            .into_iter()
            .find(|r| r.key.stage == stage && r.key.name == name)
            .ok_or_else(|| {
                Error::NotFound(format!("artifact {}/{}/{}", run_id, stage, name))
            })?;
        let data = self.inner.artifacts.get(&reference).await?;
        Ok((reference, data))
    }

    /// Remove a finished run and its artifacts.
    pub async fn delete(&self, run_id: ResourceId) -> Result<PruneStats> {
        let (_guard, run) = self.lock_run(run_id).await?;
        if !run.is_terminal() {
            return Err(Error::InvalidState(format!(
                "run {} is {}; only finished runs can be deleted",
                run_id, run.status
            )));
        }
        let stats = self.inner.artifacts.delete_run(&run_id).await?;
        self.inner.runs.delete(run_id).await?;
        info!(
            run_id = %run_id,
            artifacts = stats.artifacts_deleted,
            bytes = stats.bytes_freed,
            "Run deleted"
        );
        self.forget(run_id);
        Ok(stats)
    }
}
