//! reportctl: operational control for ReportForge
//!
//! Drains the generation queue, forces regeneration and inspects stored
//! reports. Per-item failures exit non-zero only when every item failed.

mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use commands::RegenerateOptions;
use reportforge_common::{
    config::AppConfig,
    services::{build_services, init_tracing},
    worker::QueueWorker,
};
use serde::Serialize;
use std::process::ExitCode;

/// Output format for command results
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

/// ReportForge operational CLI
#[derive(Parser)]
#[command(name = "reportctl", version, about = "ReportForge operational CLI")]
struct Cli {
    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text", value_enum)]
    output: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process queued generation jobs
    ProcessQueue {
        /// Maximum jobs to process; defaults to everything waiting now
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Print the number of waiting jobs
    QueueStatus,

    /// Force new report versions for a subject
    Regenerate {
        subject: String,
        /// Comma-separated report kinds; defaults to every kind
        #[arg(long, value_delimiter = ',')]
        kinds: Option<Vec<String>>,
        /// Generate now instead of queueing
        #[arg(long)]
        sync: bool,
        /// Delete existing records of the selected kinds first
        #[arg(long)]
        delete: bool,
    },

    /// Drop every cached report and report list
    FlushCache,

    /// Report counts by kind and status
    UserStats { subject: String },

    /// Print stored records in their persisted shape
    Export {
        subject: String,
        #[arg(long)]
        kind: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = AppConfig::load()?;
    init_tracing(&config.observability);

    let services = build_services(&config).await?;
    let generator = services.generator;
    let output = cli.output;

    match cli.command {
        Commands::ProcessQueue { limit } => {
            let worker = QueueWorker::new(generator.clone());
            let summary = commands::process_queue(&worker, limit).await?;
            emit(output, &summary, || {
                format!(
                    "processed {} job(s): {} published, {} superseded, {} skipped, {} failed",
                    summary.processed,
                    summary.published,
                    summary.superseded,
                    summary.skipped,
                    summary.failed
                )
            })?;
            Ok(exit_for(summary.all_failed()))
        }
        Commands::QueueStatus => {
            let pending = commands::queue_status(&generator).await?;
            emit(output, &serde_json::json!({ "pending": pending }), || {
                format!("{} job(s) pending", pending)
            })?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Regenerate {
            subject,
            kinds,
            sync,
            delete,
        } => {
            let options = RegenerateOptions { kinds, sync, delete };
            let summary = commands::regenerate(&generator, &subject, options).await?;
            emit(output, &summary, || {
                let mut lines = Vec::new();
                if let Some(deleted) = summary.deleted {
                    lines.push(format!("deleted {} record(s)", deleted));
                }
                for item in &summary.items {
                    lines.push(match (&item.record, &item.error) {
                        (Some(record), _) => format!(
                            "{:<24} ok      {} v{}",
                            item.kind, record.record_id, record.version
                        ),
                        (None, error) => format!(
                            "{:<24} failed  {}",
                            item.kind,
                            error.as_deref().unwrap_or("unknown error")
                        ),
                    });
                }
                lines.join("\n")
            })?;
            Ok(exit_for(summary.all_failed()))
        }
        Commands::FlushCache => {
            let removed = commands::flush_cache(&generator).await?;
            emit(output, &serde_json::json!({ "removed": removed }), || {
                format!("removed {} cached entries", removed)
            })?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::UserStats { subject } => {
            let stats = commands::user_stats(&generator, &subject).await?;
            emit(output, &stats, || {
                if stats.is_empty() {
                    return format!("no reports for {}", subject);
                }
                stats
                    .iter()
                    .map(|s| format!("{:<24} {:<12} {}", s.kind, s.status, s.count))
                    .collect::<Vec<_>>()
                    .join("\n")
            })?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Export { subject, kind } => {
            let records = commands::export(&generator, &subject, kind.as_deref()).await?;
            // Export is always JSON
            println!("{}", serde_json::to_string_pretty(&records)?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn emit<T: Serialize>(
    format: OutputFormat,
    value: &T,
    text: impl FnOnce() -> String,
) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Text => println!("{}", text()),
    }
    Ok(())
}

fn exit_for(all_failed: bool) -> ExitCode {
    if all_failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_regenerate_arguments() {
        let cli = Cli::try_parse_from([
            "reportctl",
            "regenerate",
            "user-1",
            "--kinds=work_style,career_transitions",
            "--sync",
        ])
        .unwrap();

        match cli.command {
            Commands::Regenerate {
                subject,
                kinds,
                sync,
                delete,
            } => {
                assert_eq!(subject, "user-1");
                assert_eq!(
                    kinds,
                    Some(vec!["work_style".to_string(), "career_transitions".to_string()])
                );
                assert!(sync);
                assert!(!delete);
            }
            _ => panic!("expected regenerate"),
        }
    }

    #[test]
    fn test_process_queue_limit_and_output() {
        let cli =
            Cli::try_parse_from(["reportctl", "--output", "json", "process-queue", "--limit=5"])
                .unwrap();
        assert_eq!(cli.output, OutputFormat::Json);
        assert!(matches!(cli.command, Commands::ProcessQueue { limit: Some(5) }));
    }

    #[test]
    fn test_export_kind_is_optional() {
        let cli = Cli::try_parse_from(["reportctl", "export", "user-1"]).unwrap();
        assert!(matches!(cli.command, Commands::Export { kind: None, .. }));
    }

    #[test]
    fn test_flush_cache_takes_no_arguments() {
        let cli = Cli::try_parse_from(["reportctl", "flush-cache"]).unwrap();
        assert!(matches!(cli.command, Commands::FlushCache));
        assert!(Cli::try_parse_from(["reportctl", "flush-cache", "u1"]).is_err());
    }
}
