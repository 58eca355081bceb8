//! Work item inspection: `devagent items` and `devagent init-db`.

use anyhow::Result;

use devagent::config::AgentToml;
use devagent::models::WorkItem;
use devagent::store::{DbHandle, WorkItemDb};

use super::super::ItemsCommands;

pub fn cmd_init_db(config: &AgentToml) -> Result<()> {
    WorkItemDb::new(&config.store.path)?;
    println!("Work item store ready at {}", config.store.path.display());
    Ok(())
}

pub async fn cmd_items(config: &AgentToml, command: ItemsCommands) -> Result<()> {
    if !config.store.path.exists() {
        anyhow::bail!(
            "No work item store at {}. Run 'devagent init-db' first.",
            config.store.path.display()
        );
    }
    let db = DbHandle::new(WorkItemDb::new(&config.store.path)?);

    match command {
        ItemsCommands::List { status } => {
            let items = db.call(move |db| db.list_work_items(status)).await?;
            if items.is_empty() {
                println!("No work items.");
                return Ok(());
            }
            println!(
                "{:<6} {:<14} {:<10} {:<20} REQUEST",
                "ID", "ISSUE", "STATUS", "CREATED"
            );
            for item in &items {
                println!(
                    "{:<6} {:<14} {:<10} {:<20} {}",
                    item.id,
                    item.jira_issue_key,
                    item.status,
                    item.created_at.format("%Y-%m-%d %H:%M:%S"),
                    item.pr_mr_url.as_deref().unwrap_or("-")
                );
            }
        }
        ItemsCommands::Show { issue_key } => {
            let key = issue_key.clone();
            match db.call(move |db| db.find_by_issue_key(&key)).await? {
                Some(item) => print_item(&item),
                None => anyhow::bail!("No work item for issue {}", issue_key),
            }
        }
    }
    Ok(())
}

fn print_item(item: &WorkItem) {
    println!("Work item {}", item.id);
    println!("  issue:      {} ({})", item.jira_issue_key, item.jira_issue_id);
    println!("  project:    {}", item.jira_project_key);
    println!("  status:     {}", item.status);
    println!(
        "  repository: {}",
        item.repository_url.as_deref().unwrap_or("-")
    );
    println!("  branch:     {}", item.branch_name.as_deref().unwrap_or("-"));
    println!("  request:    {}", item.pr_mr_url.as_deref().unwrap_or("-"));
    println!("  created:    {}", item.created_at.to_rfc3339());
    if let Some(done) = item.completed_at {
        println!("  completed:  {}", done.to_rfc3339());
    }
    if let Some(error) = &item.error_message {
        println!();
        println!("Error:");
        println!("{}", error);
    }
    if let Some(details) = &item.development_details {
        println!();
        println!("Details:");
        println!("{}", details);
    }
}
