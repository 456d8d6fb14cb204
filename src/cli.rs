//! CLI commands over persisted feedback.
//!
//! `serve` runs the engines; the read-only commands here inspect what the
//! feedback sink has written.

use clap::Subcommand;

use crate::feedback::Category;
use crate::storage::SqliteFeedbackSink;

/// Admin subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run the engines with background maintenance until interrupted
    Serve,

    /// Show persisted feedback counts per category
    Stats,

    /// Show the most recently persisted feedback records
    Recent {
        /// Maximum number of records to show
        #[arg(long, default_value = "20")]
        limit: u32,

        /// Filter by category: prediction, classification, retrieval, tool_execution
        #[arg(long)]
        category: Option<String>,
    },
}

/// Result of CLI command execution.
pub struct CliResult {
    /// Exit code (0 = success)
    pub exit_code: i32,
    /// Output message
    pub message: String,
}

impl CliResult {
    /// Create a success result with the given message.
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            message: message.into(),
        }
    }

    /// Create an error result with the given message.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            exit_code: 1,
            message: message.into(),
        }
    }
}

/// Execute a read-only command against the feedback database.
///
/// `Serve` is handled by the binary and reported as an error here.
pub async fn execute_command(command: Commands, sink: &SqliteFeedbackSink) -> CliResult {
    match command {
        Commands::Stats => execute_stats(sink).await,
        Commands::Recent { limit, category } => execute_recent(sink, limit, category).await,
        Commands::Serve => CliResult::error("serve is not a read-only command"),
    }
}

async fn execute_stats(sink: &SqliteFeedbackSink) -> CliResult {
    let counts = match sink.count_by_category().await {
        Ok(counts) => counts,
        Err(e) => return CliResult::error(format!("Failed to query feedback: {}", e)),
    };

    if counts.is_empty() {
        return CliResult::success("No feedback persisted yet.");
    }

    let mut output = String::new();
    output.push_str("\nPersisted Feedback\n");
    output.push_str("══════════════════════════════════════════════\n");
    output.push_str(&format!("{:<18} {:>8} {:>9} {:>8}\n", "Category", "Records", "Failures", "Fail %"));

    let mut total = 0;
    for row in &counts {
        total += row.total;
        let fail_pct = if row.total > 0 {
            row.failures as f64 * 100.0 / row.total as f64
        } else {
            0.0
        };
        output.push_str(&format!(
            "{:<18} {:>8} {:>9} {:>7.1}%\n",
            row.category, row.total, row.failures, fail_pct
        ));
    }
    output.push_str(&format!("\nTotal records: {}\n", total));

    CliResult::success(output)
}

async fn execute_recent(
    sink: &SqliteFeedbackSink,
    limit: u32,
    category: Option<String>,
) -> CliResult {
    let category = match category.map(|c| c.parse::<Category>()).transpose() {
        Ok(category) => category,
        Err(e) => return CliResult::error(e),
    };

    let records = match sink.recent(limit, category.map(|c| c.as_str())).await {
        Ok(records) => records,
        Err(e) => return CliResult::error(format!("Failed to query feedback: {}", e)),
    };

    if records.is_empty() {
        return CliResult::success("No matching feedback records.");
    }

    let mut output = String::new();
    for record in &records {
        output.push_str(&format!(
            "[{}] ({:.2}) {}\n",
            record.persisted_at, record.importance, record.content
        ));
    }
    CliResult::success(output)
}
