//! Run commands against the API server.

use anyhow::Result;
use serde_json::{Value, json};
use shipyard_core::pipeline::{Decision, PipelineRun};

use super::client::ApiClient;

pub async fn list(api_url: &str, limit: u32) -> Result<()> {
    let runs: Vec<PipelineRun> = ApiClient::new(api_url)
        .get(&format!("/runs?limit={}", limit))
        .await?;
    if runs.is_empty() {
        println!("No runs");
        return Ok(());
    }
    for run in &runs {
        println!("{}", summary_line(run));
    }
    Ok(())
}

pub async fn show(api_url: &str, id: &str) -> Result<()> {
    let run: PipelineRun = ApiClient::new(api_url).get(&format!("/runs/{}", id)).await?;
    print_run(&run);
    Ok(())
}

pub async fn trigger(
    api_url: &str,
    branch: Option<String>,
    revision: Option<String>,
    actor: Option<String>,
) -> Result<()> {
    let body = json!({ "branch": branch, "revision": revision, "actor": actor });
    let run: PipelineRun = ApiClient::new(api_url).post("/runs", &body).await?;
    println!("Started {}", summary_line(&run));
    Ok(())
}

pub async fn decide(
    api_url: &str,
    id: &str,
    decision: Decision,
    actor: &str,
    comment: Option<String>,
) -> Result<()> {
    let body = json!({ "decision": decision, "actor": actor, "comment": comment });
    let run: PipelineRun = ApiClient::new(api_url)
        .post(&format!("/runs/{}/approval", id), &body)
        .await?;
    println!("{}", summary_line(&run));
    Ok(())
}

pub async fn retry(api_url: &str, id: &str, actor: Option<String>) -> Result<()> {
    let run: PipelineRun = ApiClient::new(api_url)
        .post(&format!("/runs/{}/retry", id), &json!({ "actor": actor }))
        .await?;
    println!("Started {}", summary_line(&run));
    Ok(())
}

pub async fn outputs(api_url: &str) -> Result<()> {
    let outputs: Value = ApiClient::new(api_url).get("/outputs").await?;
    println!("{}", serde_json::to_string_pretty(&outputs)?);
    Ok(())
}

pub(crate) fn summary_line(run: &PipelineRun) -> String {
    let revision = run
        .trigger
        .revision
        .as_deref()
        .map(|r| &r[..r.len().min(7)])
        .unwrap_or("HEAD");
    format!(
        "#{:<4} {}  {:<17} {:<8} {}@{}",
        run.number,
        run.id,
        run.status.as_str(),
        run.current_stage.as_str(),
        run.trigger.branch.as_deref().unwrap_or("-"),
        revision
    )
}

pub(crate) fn print_run(run: &PipelineRun) {
    println!("Run #{} ({})", run.number, run.id);
    println!("  pipeline: {}", run.pipeline);
    println!("  status:   {}", run.status);
    println!("  trigger:  {:?} by {}", run.trigger.kind, run.trigger.actor.as_deref().unwrap_or("-"));
    if let Some(deadline) = run.approval_deadline {
        println!("  approve before {}", deadline);
    }
    for result in &run.stages {
        let reason = result
            .failure_reason
            .as_deref()
            .map(|r| format!(": {}", r))
            .unwrap_or_default();
        println!("  - {:<8} {:?}{}", result.stage.as_str(), result.outcome, reason);
    }
    if let Some(approval) = &run.approval {
        println!(
            "  {:?} by {}{}",
            approval.decision,
            approval.actor,
            approval
                .comment
                .as_deref()
                .map(|c| format!(" ({})", c))
                .unwrap_or_default()
        );
    }
}
