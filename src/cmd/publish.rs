//! Manual enqueueing of work requests: `devagent publish`.

use anyhow::{Context, Result};

use devagent::config::AgentToml;
use devagent::consumer::Publisher;
use devagent::models::WorkRequest;

use super::super::PublishArgs;

/// Build the request from either `--file` or the individual flags.
pub fn request_from_args(args: &PublishArgs) -> Result<WorkRequest> {
    if let Some(path) = &args.file {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        return serde_json::from_str(&content)
            .with_context(|| format!("Invalid work request in {}", path.display()));
    }

    let issue_key = args
        .issue_key
        .clone()
        .context("--issue-key is required without --file")?;
    Ok(WorkRequest {
        jira_issue_id: args.issue_id.clone().unwrap_or_else(|| issue_key.clone()),
        jira_project_key: args
            .project_key
            .clone()
            .context("--project-key is required without --file")?,
        summary: args
            .summary
            .clone()
            .context("--summary is required without --file")?,
        description: args.description.clone(),
        repository: args.repository.clone(),
        jira_issue_key: issue_key,
    })
}

pub async fn cmd_publish(config: &AgentToml, args: &PublishArgs) -> Result<()> {
    let request = request_from_args(args)?;
    let publisher = Publisher::connect(&config.broker).await?;
    let routing_key = publisher.publish(&request).await;
    publisher.close().await;
    let routing_key = routing_key?;

    println!(
        "Published {} to {} ({})",
        request.jira_issue_key, config.broker.exchange, routing_key
    );
    Ok(())
}
