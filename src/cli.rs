//! CLI definitions for Spool.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use spool_queue::{TaskStatus, TaskType};

/// Spool CLI.
#[derive(Parser)]
#[command(name = "spool")]
#[command(about = "Persistent single-host task queue")]
#[command(version)]
pub(crate) struct Cli {
    /// Configuration file path (default: ~/.spool/config.toml)
    #[arg(short, long, global = true, env = "SPOOL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Override the data directory from the configuration
    #[arg(short, long, global = true, env = "SPOOL_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Add a task
    Add {
        /// Task payload
        payload: String,

        /// Task type (generic, custom, github-issue, github-pr)
        #[arg(short = 't', long = "type", default_value = "generic")]
        task_type: TaskType,

        /// Priority (higher runs first)
        #[arg(short, long)]
        priority: Option<u8>,

        /// Maximum retries (default from configuration)
        #[arg(long)]
        max_retries: Option<u32>,

        /// Issue or PR reference stored with the task
        #[arg(long)]
        external_ref: Option<String>,
    },

    /// Claim the next pending task
    Next {
        /// Output format (table, json)
        #[arg(long, default_value = "table")]
        format: String,
    },

    /// Mark a claimed task completed
    Done {
        /// Task ID
        id: String,
    },

    /// Report a claimed task failed (retried while retries remain)
    Fail {
        /// Task ID
        id: String,

        /// Failure reason
        #[arg(short, long)]
        error: Option<String>,
    },

    /// Report a claimed task timed out (retried while retries remain)
    Timeout {
        /// Task ID
        id: String,

        /// Timeout reason
        #[arg(short, long)]
        error: Option<String>,
    },

    /// Put a claimed task back to pending, consuming a retry
    Requeue {
        /// Task ID
        id: String,
    },

    /// Remove a task in any status
    Remove {
        /// Task ID
        id: String,
    },

    /// Show one task
    Show {
        /// Task ID
        id: String,

        /// Output format (table, json)
        #[arg(long, default_value = "table")]
        format: String,
    },

    /// List tasks in queue order
    List {
        /// Filter by status
        #[arg(long)]
        status: Option<TaskStatus>,

        /// Filter by type
        #[arg(short = 't', long = "type")]
        task_type: Option<TaskType>,

        /// Output format (table, json)
        #[arg(long, default_value = "table")]
        format: String,
    },

    /// Show task counts per status
    Status {
        /// Output format (table, json)
        #[arg(long, default_value = "table")]
        format: String,
    },

    /// Remove finished tasks older than the retention window
    Cleanup {
        /// Retention in days (default from configuration)
        #[arg(long)]
        days: Option<u32>,
    },

    /// Remove every task (a backup is taken first)
    Clear {
        /// Confirm the operation
        #[arg(long)]
        yes: bool,
    },

    /// Take a backup of the queue
    Backup,

    /// List backups, newest first
    Backups {
        /// Output format (table, json)
        #[arg(long, default_value = "table")]
        format: String,
    },

    /// Replace the queue with a backup
    Restore {
        /// Backup ID
        backup_id: String,
    },
}
