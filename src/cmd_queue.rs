//! Queue subcommand handlers for Spool.

use std::time::Duration;

use tracing::{info, warn};

use spool_queue::{NewTask, Reliability, Task, TaskFilter, TaskQueue, TaskStatus};

use crate::cli::Commands;

/// Handle a queue subcommand.
pub(crate) async fn handle_queue_command(
    command: Commands,
    queue: TaskQueue,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Commands::Add {
            payload,
            task_type,
            priority,
            max_retries,
            external_ref,
        } => {
            let new = NewTask {
                task_type,
                payload,
                priority,
                max_retries,
                external_ref,
            };
            let task = queue.submit(new).await?;
            println!("{}", task.id);
            Ok(())
        }
        Commands::Next { format } => match queue.get_next().await? {
            Some(task) => print_task(&task, &format),
            None => {
                println!("No pending tasks.");
                Ok(())
            }
        },
        Commands::Done { id } => {
            let task = queue.update_status(&id, TaskStatus::Completed).await?;
            println!("{} {}", task.id, task.status);
            Ok(())
        }
        Commands::Fail { id, error } => {
            let task = queue
                .fail(&id, error.unwrap_or_else(|| "failed".to_string()))
                .await?;
            print_outcome(&task);
            Ok(())
        }
        Commands::Timeout { id, error } => {
            let task = queue
                .timeout(&id, error.unwrap_or_else(|| "timed out".to_string()))
                .await?;
            print_outcome(&task);
            Ok(())
        }
        Commands::Requeue { id } => {
            let task = queue.update_status(&id, TaskStatus::Pending).await?;
            print_outcome(&task);
            Ok(())
        }
        Commands::Remove { id } => {
            let task = queue.remove(&id).await?;
            println!("Removed {}", task.id);
            Ok(())
        }
        Commands::Show { id, format } => print_task(&queue.get(&id).await?, &format),
        Commands::List {
            status,
            task_type,
            format,
        } => queue_list(&queue, TaskFilter { status, task_type }, &format).await,
        Commands::Status { format } => queue_status(&queue, &format).await,
        Commands::Cleanup { days } => {
            let retention = days
                .map(|d| Duration::from_secs(u64::from(d) * 24 * 60 * 60))
                .unwrap_or_else(|| queue.retention());
            let removed = queue.cleanup(retention).await?;
            println!("Removed {} finished task(s).", removed);
            Ok(())
        }
        Commands::Clear { yes } => {
            if !yes {
                warn!("Refusing to clear the queue without --yes");
            }
            let backup = queue.clear(yes).await?;
            println!("Queue cleared. Backup: {}", backup.id);
            Ok(())
        }
        Commands::Backup => {
            let backup = queue.backup().await?;
            println!("{}", backup.id);
            Ok(())
        }
        Commands::Backups { format } => backup_list(&queue, &format).await,
        Commands::Restore { backup_id } => {
            queue.restore(&backup_id).await?;
            info!("Queue restored from {}", backup_id);
            println!("Restored {}", backup_id);
            Ok(())
        }
    }
}

fn print_outcome(task: &Task) {
    if task.status == TaskStatus::Pending {
        println!(
            "{} requeued (retry {}/{})",
            task.id, task.retry_count, task.max_retries
        );
    } else {
        println!("{} {}", task.id, task.status);
    }
}

fn print_task(task: &Task, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    if format == "json" {
        println!("{}", serde_json::to_string_pretty(task)?);
        return Ok(());
    }

    println!("Task: {}", task.id);
    println!("{}", "=".repeat(50));
    println!("Type:        {}", task.task_type);
    println!("Status:      {}", task.status);
    println!("Priority:    {}", task.priority);
    println!("Retries:     {}/{}", task.retry_count, task.max_retries);
    println!("Created:     {}", task.created_at.to_rfc3339());
    println!("Updated:     {}", task.updated_at.to_rfc3339());
    if let Some(external_ref) = &task.external_ref {
        println!("External:    {}", external_ref);
    }
    if let Some(error) = &task.last_error {
        println!("Last error:  {}", error);
    }
    println!();
    println!("{}", task.payload);
    Ok(())
}

async fn queue_list(
    queue: &TaskQueue,
    filter: TaskFilter,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let tasks = queue.list(&filter).await?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&tasks)?);
        }
        _ => {
            if tasks.is_empty() {
                println!("No tasks found.");
                return Ok(());
            }
            println!(
                "{:<36} {:<13} {:<12} {:>4} {:>7}  {}",
                "ID", "TYPE", "STATUS", "PRI", "RETRIES", "PAYLOAD"
            );
            println!("{}", "-".repeat(100));
            for task in tasks {
                let payload: String = task.payload.chars().take(40).collect();
                println!(
                    "{:<36} {:<13} {:<12} {:>4} {:>7}  {}",
                    task.id,
                    task.task_type.as_str(),
                    task.status.as_str(),
                    task.priority,
                    format!("{}/{}", task.retry_count, task.max_retries),
                    payload.replace('\n', " ")
                );
            }
        }
    }

    Ok(())
}

async fn queue_status(queue: &TaskQueue, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let summary = queue.status_summary().await?;
    let reliability = queue.reliability().await?;

    if format == "json" {
        let value = serde_json::json!({
            "data_dir": queue.data_dir(),
            "lock_strategy": queue.lock_strategy(),
            "reliable": reliability.is_reliable(),
            "summary": summary,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("Spool Queue Status");
    println!("==================");
    println!("Data dir:     {}", queue.data_dir().display());
    println!("Lock:         {}", queue.lock_strategy());
    match &reliability {
        Reliability::Reliable => println!("Document:     ok"),
        Reliability::Recovered { backup_id } => {
            println!("Document:     CORRUPT, serving backup {}", backup_id)
        }
        Reliability::Unreliable { reason } => {
            println!("Document:     CORRUPT, no valid backup ({})", reason)
        }
    }
    println!();
    for status in TaskStatus::ALL {
        println!("{:<13} {}", status.as_str(), summary.count(status));
    }
    println!("{:<13} {}", "total", summary.total);
    Ok(())
}

async fn backup_list(queue: &TaskQueue, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let backups = queue.list_backups().await?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&backups)?);
        }
        _ => {
            if backups.is_empty() {
                println!("No backups found.");
                return Ok(());
            }
            println!("{:<48} {:<12} {}", "ID", "REASON", "TASKS");
            println!("{}", "-".repeat(70));
            for backup in backups {
                let tasks = backup
                    .task_count
                    .map(|n| n.to_string())
                    .unwrap_or_else(|| "invalid".to_string());
                println!("{:<48} {:<12} {}", backup.id, backup.reason, tasks);
            }
        }
    }

    Ok(())
}
