//! Local pipeline execution command.

use anyhow::{Context, Result};
use shipyard_config::load_stack;
use shipyard_core::executor::LogStream;
use shipyard_core::pipeline::{ApprovalDecision, RunStatus, StageOutcome, TriggerEvent};
use shipyard_core::secret::{EnvSecretStore, SecretStore};
use shipyard_deployer::KubernetesDeployer;
use shipyard_executor::{GitSource, LocalDockerExecutor};
use shipyard_scheduler::{
    BuildStage, DeployStage, MemoryArtifactStore, MemoryRunStore, PipelineEvent,
    PipelineOrchestrator, PipelineSettings, SourceStage, StageRunners,
};
use std::io::Write;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

use super::runs::print_run;

pub struct LocalRunOptions {
    pub branch: Option<String>,
    pub revision: Option<String>,
    pub auto_approve: bool,
}

/// Run the pipeline once on this machine: build with the local Docker
/// daemon, deploy with the current kubeconfig.
pub async fn run_local(config_path: &str, options: LocalRunOptions) -> Result<()> {
    let stack = load_stack(config_path)
        .with_context(|| format!("Failed to load stack config: {}", config_path))?;
    let pipeline = stack.pipeline;
    println!("Running pipeline: {}", pipeline.name);

    let secrets: Arc<dyn SecretStore> = Arc::new(EnvSecretStore);
    let mut source = GitSource::new(pipeline.source.repository.clone(), secrets.clone());
    if let Some(path) = &pipeline.source.token_secret {
        source = source.with_token_secret(path.clone());
    }
    let executor = LocalDockerExecutor::new().context("Failed to connect to Docker")?;
    let deployer = KubernetesDeployer::new()
        .await
        .context("Failed to connect to Kubernetes")?;

    let runners = StageRunners {
        source: Arc::new(SourceStage::new(Arc::new(source))),
        build: Arc::new(BuildStage::new(Arc::new(executor), secrets, pipeline.clone())),
        deploy: Arc::new(DeployStage::new(Arc::new(deployer), pipeline.deploy.target())),
    };
    let orchestrator = PipelineOrchestrator::new(
        PipelineSettings::from_config(&pipeline),
        Arc::new(MemoryRunStore::new()),
        Arc::new(MemoryArtifactStore::new()),
        runners,
    );

    let actor = local_actor();
    let mut trigger = TriggerEvent::manual(Some(actor.clone()));
    if let Some(branch) = options.branch {
        trigger = trigger.with_branch(branch);
    }
    if let Some(revision) = options.revision {
        trigger = trigger.with_revision(revision);
    }

    let mut events = orchestrator.subscribe();
    let run = orchestrator.trigger(trigger).await?;
    println!("Run #{} ({})\n", run.number, run.id);

    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(missed)) => {
                eprintln!("  ... {} events dropped", missed);
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        if event.run_id() != run.id {
            continue;
        }

        match event {
            PipelineEvent::RunCreated { .. } => {}
            PipelineEvent::StageStarted { stage, .. } => {
                println!("▶ Stage '{}' started", stage);
            }
            PipelineEvent::StageLog { stage, line, .. } => {
                let stream_marker = match line.stream {
                    LogStream::Stdout => " ",
                    LogStream::Stderr => "!",
                    LogStream::System => "*",
                };
                println!("  [{}]{} {}", stage, stream_marker, line.content);
            }
            PipelineEvent::StageCompleted {
                stage,
                outcome,
                reason,
                ..
            } => match outcome {
                StageOutcome::Succeeded => println!("✓ Stage '{}' completed successfully\n", stage),
                _ => println!(
                    "✗ Stage '{}' {:?}: {}\n",
                    stage,
                    outcome,
                    reason.unwrap_or_default()
                ),
            },
            PipelineEvent::AwaitingApproval { deadline, .. } => {
                if let Some(deadline) = deadline {
                    println!("⏸ Awaiting approval (until {})", deadline);
                } else {
                    println!("⏸ Awaiting approval");
                }
                let approved = options.auto_approve || prompt_approval().await?;
                let decision = if approved {
                    ApprovalDecision::approve(actor.clone())
                } else {
                    ApprovalDecision::reject(actor.clone())
                };
                orchestrator.decide(run.id, decision).await?;
            }
            PipelineEvent::RunFinished { .. } => break,
        }
    }

    let run = orchestrator.get(run.id).await?;
    println!();
    print_run(&run);
    match run.status {
        RunStatus::Succeeded => {
            println!("\n✓ Pipeline succeeded!");
            Ok(())
        }
        status => anyhow::bail!("Pipeline {}", status),
    }
}

fn local_actor() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "local".to_string())
}

async fn prompt_approval() -> Result<bool> {
    tokio::task::spawn_blocking(|| -> Result<bool> {
        print!("Deploy this build? [y/N] ");
        std::io::stdout().flush()?;
        let mut answer = String::new();
        std::io::stdin().read_line(&mut answer)?;
        Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
    })
    .await
    .context("approval prompt failed")?
}
