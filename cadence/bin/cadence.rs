//! Run or preview an email sequence campaign
//!
//! The configuration file is found using the following precedence:
//! 1. `--config` flag
//! 2. `CADENCE_CONFIG` environment variable
//! 3. `./cadence.config.ron` (current working directory)
//! 4. `/etc/cadence/cadence.config.ron` (system-wide config)

use std::path::PathBuf;

use cadence::{Cadence, RunOptions};
use cadence_common::logging;
use cadence_delivery::{DispatchError, schedule::strip_zone};
use chrono::{DateTime, NaiveDateTime};
use clap::{Parser, Subcommand};

/// Schedule and deliver email sequences
#[derive(Parser, Debug)]
#[command(name = "cadence")]
#[command(about = "Schedule and deliver email sequences", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Dispatch the schedule to every contact
    Run {
        /// Submit messages instead of saving drafts
        #[arg(long, conflicts_with = "draft")]
        send: bool,

        /// Only save drafts, even if the configuration enables sending
        #[arg(long)]
        draft: bool,

        /// Random send window in minutes, overriding the configuration
        #[arg(short, long)]
        window: Option<u32>,
    },

    /// Print every message a run would produce, without sending anything
    Preview {
        /// Reference time for day offsets, e.g. "2026-03-02 08:00" or
        /// "2026-03-02T08:00:00-05:00" (read as wall-clock time in that zone)
        #[arg(long, value_parser = parse_reference)]
        now: Option<NaiveDateTime>,

        /// Random send window in minutes, overriding the configuration
        #[arg(short, long)]
        window: Option<u32>,

        /// Print message bodies as well
        #[arg(short, long)]
        body: bool,
    },
}

fn parse_reference(value: &str) -> Result<NaiveDateTime, String> {
    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M")
        .or_else(|_| DateTime::parse_from_rfc3339(value).map(|at| strip_zone(&at)))
        .map_err(|e| format!("expected \"YYYY-MM-DD HH:MM\" or RFC 3339: {e}"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::init();

    let config_path = find_config_file(cli.config)?;
    let config_content = std::fs::read_to_string(&config_path).map_err(|e| {
        anyhow::anyhow!(
            "Failed to read config from {}: {}",
            config_path.display(),
            e
        )
    })?;
    let cadence = Cadence::from_ron(&config_content)?;

    match cli.command {
        Commands::Run {
            send,
            draft,
            window,
        } => {
            let options = RunOptions {
                send: if send {
                    Some(true)
                } else if draft {
                    Some(false)
                } else {
                    None
                },
                window_minutes: window,
                now: None,
            };

            let summary = cadence.run(options).await.inspect_err(report_failure)?;

            println!(
                "Processed {} emails for {} contacts ({} submitted, {} drafts)",
                summary.processed(),
                summary.contacts,
                summary.submitted,
                summary.drafts
            );
            if let Some(path) = summary.audit_log {
                println!("Audit log: {}", path.display());
            }
        }
        Commands::Preview { now, window, body } => {
            let options = RunOptions {
                send: None,
                window_minutes: window,
                now,
            };

            let messages = cadence.preview(options).await?;

            for message in &messages {
                let when = message
                    .deferred
                    .map_or_else(|| "immediately".to_string(), |at| at.to_string());

                println!("To:      {}", message.to);
                println!("From:    {}", message.identity.as_deref().unwrap_or("-"));
                println!("Subject: {}", message.subject);
                println!("When:    {when}");
                if body {
                    println!("\n{}", message.body);
                }
                println!();
            }

            println!("{} messages", messages.len());
        }
    }

    Ok(())
}

/// Tell the operator whether re-running is safe
fn report_failure(error: &anyhow::Error) {
    let Some(error) = error.downcast_ref::<DispatchError>() else {
        return;
    };

    if error.is_input() {
        eprintln!("No messages were created. Fix the contact list and run again.");
    } else if error.is_partial() {
        eprintln!(
            "Some messages may already be queued. Check the audit log before running again."
        );
    }
}

fn find_config_file(flag: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    if let Some(path) = flag {
        if path.exists() {
            return Ok(path);
        }
        anyhow::bail!("--config points to non-existent file: {}", path.display());
    }

    if let Ok(env_path) = std::env::var("CADENCE_CONFIG") {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(path);
        }
        anyhow::bail!(
            "CADENCE_CONFIG points to non-existent file: {}",
            path.display()
        );
    }

    let default_paths = [
        PathBuf::from("./cadence.config.ron"),
        PathBuf::from("/etc/cadence/cadence.config.ron"),
    ];

    for path in &default_paths {
        if path.exists() {
            return Ok(path.clone());
        }
    }

    let paths_tried = default_paths
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");

    anyhow::bail!(
        "No configuration file found. Tried:\n  - CADENCE_CONFIG environment variable\n{paths_tried}"
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_reference_naive() {
        assert_eq!(
            parse_reference("2026-03-02 08:00").unwrap(),
            NaiveDateTime::parse_from_str("2026-03-02 08:00", "%Y-%m-%d %H:%M").unwrap()
        );
    }

    #[test]
    fn test_parse_reference_keeps_zoned_wall_clock() {
        assert_eq!(
            parse_reference("2026-03-02T08:00:00-05:00").unwrap(),
            NaiveDateTime::parse_from_str("2026-03-02 08:00", "%Y-%m-%d %H:%M").unwrap()
        );
    }

    #[test]
    fn test_parse_reference_rejects_garbage() {
        assert!(parse_reference("next tuesday").is_err());
    }
}
