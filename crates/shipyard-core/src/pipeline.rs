//! Pipeline runs and the stage-gated state machine that drives them.
//!
//! A run walks the fixed sequence `source -> build -> approve -> deploy`.
//! Every mutation goes through [`PipelineRun::record`],
//! [`PipelineRun::decide`], [`PipelineRun::expire_approval`] or
//! [`PipelineRun::cancel`]; each either returns the [`Transition`] the
//! orchestrator must act on or fails with [`Error::InvalidState`] and leaves
//! the run untouched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::artifact::ArtifactRef;
use crate::{Error, ResourceId, Result};

/// One step of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Source,
    Build,
    Approve,
    Deploy,
}

impl StageKind {
    /// The fixed execution order.
    pub const SEQUENCE: [StageKind; 4] = [
        StageKind::Source,
        StageKind::Build,
        StageKind::Approve,
        StageKind::Deploy,
    ];

    pub fn position(self) -> usize {
        self as usize
    }

    pub fn next(self) -> Option<StageKind> {
        Self::SEQUENCE.get(self.position() + 1).copied()
    }

    /// Whether this stage waits for a human decision instead of running.
    pub fn is_gate(self) -> bool {
        matches!(self, StageKind::Approve)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StageKind::Source => "source",
            StageKind::Build => "build",
            StageKind::Approve => "approve",
            StageKind::Deploy => "deploy",
        }
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StageKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "source" => Ok(StageKind::Source),
            "build" => Ok(StageKind::Build),
            "approve" => Ok(StageKind::Approve),
            "deploy" => Ok(StageKind::Deploy),
            _ => Err(format!("Unknown stage: {}", s)),
        }
    }
}

/// Overall status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    AwaitingApproval,
    Failed,
    Succeeded,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Failed | RunStatus::Succeeded | RunStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::AwaitingApproval => "awaiting_approval",
            RunStatus::Failed => "failed",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "running" => Ok(RunStatus::Running),
            "awaiting_approval" => Ok(RunStatus::AwaitingApproval),
            "failed" => Ok(RunStatus::Failed),
            "succeeded" => Ok(RunStatus::Succeeded),
            "cancelled" => Ok(RunStatus::Cancelled),
            _ => Err(format!("Unknown run status: {}", s)),
        }
    }
}

/// What started a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerKind {
    Push,
    Manual,
    Retry { original_run_id: ResourceId },
}

/// A source-change event or a manual start request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub kind: TriggerKind,
    /// Branch to build. A manual start without one uses the tracked branch.
    pub branch: Option<String>,
    /// Exact revision; `None` builds the branch head.
    pub revision: Option<String>,
    /// Who pushed or who pressed the button.
    pub actor: Option<String>,
}

impl TriggerEvent {
    pub fn push(
        branch: impl Into<String>,
        revision: Option<String>,
        actor: Option<String>,
    ) -> Self {
        Self {
            kind: TriggerKind::Push,
            branch: Some(branch.into()),
            revision,
            actor,
        }
    }

    pub fn manual(actor: Option<String>) -> Self {
        Self {
            kind: TriggerKind::Manual,
            branch: None,
            revision: None,
            actor,
        }
    }

    /// A new trigger that rebuilds exactly what `run` built.
    pub fn retry_of(run: &PipelineRun, actor: Option<String>) -> Self {
        Self {
            kind: TriggerKind::Retry {
                original_run_id: run.id,
            },
            branch: run.trigger.branch.clone(),
            revision: run.trigger.revision.clone(),
            actor,
        }
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = Some(revision.into());
        self
    }

    /// Reject malformed branch names and revisions.
    pub fn validate(&self) -> Result<()> {
        if let Some(branch) = &self.branch {
            validate_branch(branch)?;
        }
        if let Some(revision) = &self.revision {
            validate_revision(revision)?;
        }
        Ok(())
    }
}

fn validate_branch(branch: &str) -> Result<()> {
    if branch.is_empty() {
        return Err(Error::Trigger("branch name is empty".to_string()));
    }
    let bad_char = branch
        .chars()
        .any(|c| c.is_whitespace() || c.is_control() || "~^:?*[\\".contains(c));
    if bad_char
        || branch.starts_with('-')
        || branch.starts_with('/')
        || branch.ends_with('/')
        || branch.ends_with(".lock")
        || branch.contains("..")
        || branch.contains("//")
        || branch.contains("@{")
    {
        return Err(Error::Trigger(format!("invalid branch name: {:?}", branch)));
    }
    Ok(())
}

fn validate_revision(revision: &str) -> Result<()> {
    if revision.is_empty() || revision.len() > 64 {
        return Err(Error::Trigger(format!(
            "revision must be 1-64 characters, got {}",
            revision.len()
        )));
    }
    if !revision.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(Error::Trigger(format!("invalid revision: {:?}", revision)));
    }
    Ok(())
}

/// How a stage ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageOutcome {
    Succeeded,
    Failed,
    /// Only the approval gate ends this way.
    Rejected,
}

/// Outcome of one stage execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    pub stage: StageKind,
    pub outcome: StageOutcome,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: DateTime<Utc>,
    pub failure_reason: Option<String>,
    /// Artifact the stage produced, if any.
    pub artifact: Option<ArtifactRef>,
}

impl StageResult {
    pub fn succeeded(
        stage: StageKind,
        started_at: Option<DateTime<Utc>>,
        artifact: Option<ArtifactRef>,
    ) -> Self {
        Self {
            stage,
            outcome: StageOutcome::Succeeded,
            started_at,
            finished_at: Utc::now(),
            failure_reason: None,
            artifact,
        }
    }

    pub fn failed(
        stage: StageKind,
        started_at: Option<DateTime<Utc>>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            stage,
            outcome: StageOutcome::Failed,
            started_at,
            finished_at: Utc::now(),
            failure_reason: Some(reason.into()),
            artifact: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == StageOutcome::Succeeded
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Approve,
    Reject,
}

/// A human verdict on a run waiting at the approval gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalDecision {
    pub actor: String,
    pub decision: Decision,
    pub decided_at: DateTime<Utc>,
    pub comment: Option<String>,
}

impl ApprovalDecision {
    pub fn new(actor: impl Into<String>, decision: Decision) -> Self {
        Self {
            actor: actor.into(),
            decision,
            decided_at: Utc::now(),
            comment: None,
        }
    }

    pub fn approve(actor: impl Into<String>) -> Self {
        Self::new(actor, Decision::Approve)
    }

    pub fn reject(actor: impl Into<String>) -> Self {
        Self::new(actor, Decision::Reject)
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }
}

/// Where and why a run stopped short of success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Halt {
    pub stage: StageKind,
    pub reason: String,
}

/// What the orchestrator has to do after a state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Start executing this stage.
    Dispatch(StageKind),
    /// Suspend until a decision arrives.
    AwaitApproval,
    Succeeded,
    Failed,
    Cancelled,
}

impl Transition {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Transition::Succeeded | Transition::Failed | Transition::Cancelled
        )
    }
}

/// One execution of the stage chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: ResourceId,
    /// Incrementing number, unique per pipeline.
    pub number: u64,
    pub pipeline: String,
    pub trigger: TriggerEvent,
    pub status: RunStatus,
    pub current_stage: StageKind,
    /// Results in execution order; always a prefix of [`StageKind::SEQUENCE`].
    pub stages: Vec<StageResult>,
    pub approval: Option<ApprovalDecision>,
    pub approval_deadline: Option<DateTime<Utc>>,
    pub halt: Option<Halt>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl PipelineRun {
    /// A fresh run about to execute its source stage.
    pub fn new(number: u64, pipeline: impl Into<String>, trigger: TriggerEvent) -> Self {
        let now = Utc::now();
        Self {
            id: ResourceId::new(),
            number,
            pipeline: pipeline.into(),
            trigger,
            status: RunStatus::Running,
            current_stage: StageKind::Source,
            stages: Vec::new(),
            approval: None,
            approval_deadline: None,
            halt: None,
            created_at: now,
            updated_at: now,
            finished_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn result_for(&self, stage: StageKind) -> Option<&StageResult> {
        self.stages.iter().find(|r| r.stage == stage)
    }

    /// The artifact produced by `stage`, if it ran and produced one.
    pub fn artifact_of(&self, stage: StageKind) -> Option<&ArtifactRef> {
        self.result_for(stage).and_then(|r| r.artifact.as_ref())
    }

    /// Record the completion of the current stage.
    pub fn record(&mut self, result: StageResult) -> Result<Transition> {
        if self.status != RunStatus::Running {
            return Err(Error::InvalidState(format!(
                "run {} is {}, cannot record a {} result",
                self.id, self.status, result.stage
            )));
        }
        if result.stage != self.current_stage {
            return Err(Error::InvalidState(format!(
                "run {} is at stage {}, got a result for {}",
                self.id, self.current_stage, result.stage
            )));
        }
        if result.stage.is_gate() {
            return Err(Error::InvalidState(
                "the approval gate completes only through a decision".to_string(),
            ));
        }
        if result.outcome == StageOutcome::Rejected {
            return Err(Error::InvalidState(format!(
                "stage {} cannot be rejected",
                result.stage
            )));
        }

        let stage = result.stage;
        let now = result.finished_at;
        self.updated_at = now;

        if !result.is_success() {
            let reason = result
                .failure_reason
                .clone()
                .unwrap_or_else(|| format!("{} stage failed", stage));
            self.stages.push(result);
            self.halt = Some(Halt { stage, reason });
            self.status = RunStatus::Failed;
            self.finished_at = Some(now);
            return Ok(Transition::Failed);
        }

        self.stages.push(result);
        match stage.next() {
            Some(next) if next.is_gate() => {
                self.current_stage = next;
                self.status = RunStatus::AwaitingApproval;
                Ok(Transition::AwaitApproval)
            }
            Some(next) => {
                self.current_stage = next;
                Ok(Transition::Dispatch(next))
            }
            None => {
                self.status = RunStatus::Succeeded;
                self.finished_at = Some(now);
                Ok(Transition::Succeeded)
            }
        }
    }

    /// Apply a human decision at the approval gate.
    pub fn decide(&mut self, decision: ApprovalDecision) -> Result<Transition> {
        if self.status != RunStatus::AwaitingApproval {
            return Err(Error::InvalidState(format!(
                "run {} is {}, decisions are only accepted while awaiting approval",
                self.id, self.status
            )));
        }
        if decision.actor.trim().is_empty() {
            return Err(Error::InvalidInput(
                "an approval decision needs an actor".to_string(),
            ));
        }

        let now = decision.decided_at;
        let gate_opened = self.stages.last().map(|r| r.finished_at);
        let transition = match decision.decision {
            Decision::Approve => {
                self.stages.push(StageResult {
                    stage: StageKind::Approve,
                    outcome: StageOutcome::Succeeded,
                    started_at: gate_opened,
                    finished_at: now,
                    failure_reason: None,
                    artifact: None,
                });
                self.current_stage = StageKind::Deploy;
                self.status = RunStatus::Running;
                Transition::Dispatch(StageKind::Deploy)
            }
            Decision::Reject => {
                let reason = format!("rejected by {}", decision.actor);
                self.stages.push(StageResult {
                    stage: StageKind::Approve,
                    outcome: StageOutcome::Rejected,
                    started_at: gate_opened,
                    finished_at: now,
                    failure_reason: Some(reason.clone()),
                    artifact: None,
                });
                self.halt = Some(Halt {
                    stage: StageKind::Approve,
                    reason,
                });
                self.status = RunStatus::Cancelled;
                self.finished_at = Some(now);
                Transition::Cancelled
            }
        };

        self.approval = Some(decision);
        self.approval_deadline = None;
        self.updated_at = now;
        Ok(transition)
    }

    /// Fail a run whose approval deadline passed before `now`.
    pub fn expire_approval(&mut self, now: DateTime<Utc>) -> Result<Transition> {
        if self.status != RunStatus::AwaitingApproval {
            return Err(Error::InvalidState(format!(
                "run {} is {}, only runs awaiting approval can expire",
                self.id, self.status
            )));
        }
        let deadline = match self.approval_deadline {
            Some(deadline) if deadline <= now => deadline,
            _ => {
                return Err(Error::InvalidState(format!(
                    "run {} has no passed approval deadline",
                    self.id
                )));
            }
        };

        let reason = Error::ApprovalTimeout(format!("no decision before {}", deadline)).to_string();
        let gate_opened = self.stages.last().map(|r| r.finished_at);
        self.stages.push(StageResult {
            stage: StageKind::Approve,
            outcome: StageOutcome::Failed,
            started_at: gate_opened,
            finished_at: now,
            failure_reason: Some(reason.clone()),
            artifact: None,
        });
        self.halt = Some(Halt {
            stage: StageKind::Approve,
            reason,
        });
        self.approval_deadline = None;
        self.status = RunStatus::Failed;
        self.updated_at = now;
        self.finished_at = Some(now);
        Ok(Transition::Failed)
    }

    /// Stop a non-terminal run without recording a stage result.
    pub fn cancel(&mut self, reason: impl Into<String>) -> Result<Transition> {
        if self.is_terminal() {
            return Err(Error::InvalidState(format!(
                "run {} already finished as {}",
                self.id, self.status
            )));
        }
        let now = Utc::now();
        self.halt = Some(Halt {
            stage: self.current_stage,
            reason: reason.into(),
        });
        self.approval_deadline = None;
        self.status = RunStatus::Cancelled;
        self.updated_at = now;
        self.finished_at = Some(now);
        Ok(Transition::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn new_run() -> PipelineRun {
        PipelineRun::new(
            1,
            "app",
            TriggerEvent::push("main", Some("abc123".to_string()), None),
        )
    }

    fn run_at_gate() -> PipelineRun {
        let mut run = new_run();
        run.record(StageResult::succeeded(StageKind::Source, None, None))
            .unwrap();
        run.record(StageResult::succeeded(StageKind::Build, None, None))
            .unwrap();
        run
    }

    fn assert_contiguous(run: &PipelineRun) {
        for (idx, result) in run.stages.iter().enumerate() {
            assert_eq!(result.stage.position(), idx);
        }
    }

    #[test]
    fn test_stage_sequence() {
        assert_eq!(StageKind::Source.next(), Some(StageKind::Build));
        assert_eq!(StageKind::Build.next(), Some(StageKind::Approve));
        assert_eq!(StageKind::Approve.next(), Some(StageKind::Deploy));
        assert_eq!(StageKind::Deploy.next(), None);
        assert!(StageKind::Approve.is_gate());
        assert_eq!("deploy".parse::<StageKind>(), Ok(StageKind::Deploy));
    }

    #[test]
    fn test_happy_path_requires_approval() {
        let mut run = new_run();
        assert_eq!(run.status, RunStatus::Running);
        assert_eq!(run.current_stage, StageKind::Source);

        let t = run
            .record(StageResult::succeeded(StageKind::Source, None, None))
            .unwrap();
        assert_eq!(t, Transition::Dispatch(StageKind::Build));

        let t = run
            .record(StageResult::succeeded(StageKind::Build, None, None))
            .unwrap();
        assert_eq!(t, Transition::AwaitApproval);
        assert_eq!(run.status, RunStatus::AwaitingApproval);

        let t = run.decide(ApprovalDecision::approve("alice")).unwrap();
        assert_eq!(t, Transition::Dispatch(StageKind::Deploy));
        assert_eq!(run.status, RunStatus::Running);

        let t = run
            .record(StageResult::succeeded(StageKind::Deploy, None, None))
            .unwrap();
        assert_eq!(t, Transition::Succeeded);
        assert_eq!(run.status, RunStatus::Succeeded);
        assert!(run.finished_at.is_some());
        assert_eq!(run.stages.len(), 4);
        assert_contiguous(&run);
    }

    #[test]
    fn test_failure_halts_run() {
        let mut run = new_run();
        run.record(StageResult::succeeded(StageKind::Source, None, None))
            .unwrap();
        let t = run
            .record(StageResult::failed(StageKind::Build, None, "exit code 2"))
            .unwrap();
        assert_eq!(t, Transition::Failed);
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(
            run.halt,
            Some(Halt {
                stage: StageKind::Build,
                reason: "exit code 2".to_string()
            })
        );

        // Nothing moves a failed run.
        let err = run
            .record(StageResult::succeeded(StageKind::Approve, None, None))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
        assert_contiguous(&run);
    }

    #[test]
    fn test_result_for_wrong_stage_is_rejected() {
        let mut run = new_run();
        let before = run.clone();
        let err = run
            .record(StageResult::succeeded(StageKind::Build, None, None))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
        assert_eq!(run, before);
    }

    #[test]
    fn test_gate_cannot_be_recorded_as_stage_result() {
        let mut run = run_at_gate();
        let err = run
            .record(StageResult::succeeded(StageKind::Approve, None, None))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
        assert_eq!(run.status, RunStatus::AwaitingApproval);
    }

    #[test]
    fn test_decide_outside_gate_changes_nothing() {
        let mut run = new_run();
        let before = run.clone();
        let err = run.decide(ApprovalDecision::approve("bob")).unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
        assert_eq!(run, before);

        let mut done = run_at_gate();
        done.decide(ApprovalDecision::reject("bob")).unwrap();
        let before = done.clone();
        let err = done.decide(ApprovalDecision::approve("bob")).unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
        assert_eq!(done, before);
    }

    #[test]
    fn test_reject_cancels_run() {
        let mut run = run_at_gate();
        let t = run
            .decide(ApprovalDecision::reject("carol").with_comment("not today"))
            .unwrap();
        assert_eq!(t, Transition::Cancelled);
        assert_eq!(run.status, RunStatus::Cancelled);
        assert_eq!(run.stages.last().unwrap().outcome, StageOutcome::Rejected);
        assert_eq!(run.approval.as_ref().unwrap().actor, "carol");
        assert!(run.result_for(StageKind::Deploy).is_none());
    }

    #[test]
    fn test_decision_needs_actor() {
        let mut run = run_at_gate();
        let err = run.decide(ApprovalDecision::approve("  ")).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert_eq!(run.status, RunStatus::AwaitingApproval);
    }

    #[test]
    fn test_expire_approval_after_deadline() {
        let mut run = run_at_gate();
        let now = Utc::now();
        run.approval_deadline = Some(now + Duration::minutes(5));

        assert!(run.expire_approval(now).is_err());
        assert_eq!(run.status, RunStatus::AwaitingApproval);

        let t = run.expire_approval(now + Duration::minutes(6)).unwrap();
        assert_eq!(t, Transition::Failed);
        assert_eq!(run.status, RunStatus::Failed);
        assert!(run.halt.as_ref().unwrap().reason.contains("approval timed out"));
        assert_contiguous(&run);
    }

    #[test]
    fn test_gate_without_deadline_never_expires() {
        let mut run = run_at_gate();
        let far_future = Utc::now() + Duration::days(3650);
        assert!(run.expire_approval(far_future).is_err());
        assert_eq!(run.status, RunStatus::AwaitingApproval);
    }

    #[test]
    fn test_cancel_running_run() {
        let mut run = new_run();
        let t = run.cancel("superseded").unwrap();
        assert_eq!(t, Transition::Cancelled);
        assert_eq!(run.halt.as_ref().unwrap().stage, StageKind::Source);
        assert!(run.stages.is_empty());
        assert!(run.cancel("again").is_err());
    }

    #[test]
    fn test_trigger_validation() {
        assert!(
            TriggerEvent::push("main", Some("abc123".into()), None)
                .validate()
                .is_ok()
        );
        assert!(
            TriggerEvent::push("feature/login", None, None)
                .validate()
                .is_ok()
        );
        assert!(TriggerEvent::manual(None).validate().is_ok());

        for branch in ["", "has space", "a..b", "-flag", "x.lock", "a:b", "trail/"] {
            let err = TriggerEvent::push(branch, None, None).validate().unwrap_err();
            assert!(matches!(err, Error::Trigger(_)), "branch {:?}", branch);
        }
        for revision in ["", "abc 123", "abc;rm"] {
            let err = TriggerEvent::push("main", Some(revision.into()), None)
                .validate()
                .unwrap_err();
            assert!(matches!(err, Error::Trigger(_)), "revision {:?}", revision);
        }
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&RunStatus::AwaitingApproval).unwrap();
        assert_eq!(json, "\"awaiting_approval\"");
        assert_eq!(
            "awaiting_approval".parse::<RunStatus>(),
            Ok(RunStatus::AwaitingApproval)
        );
        let decision: Decision = serde_json::from_str("\"reject\"").unwrap();
        assert_eq!(decision, Decision::Reject);
    }
}
