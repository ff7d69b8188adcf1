use std::path::PathBuf;

use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::camera::FacingMode;
use crate::commands::{self, AppOptions, AppState};
use crate::models::ScanRecord;
use crate::scanner::ScanOutcome;
use crate::settings::resolve_data_dir;

#[derive(Parser, Debug)]
#[command(
    name = "ecosort",
    about = "Scan waste items and suggest the right bin",
    arg_required_else_help = true
)]
pub struct Cli {
    /// Directory holding the scan database and settings
    #[arg(long, global = true, value_name = "DIR")]
    pub data_dir: Option<PathBuf>,

    /// Settings file (defaults to <data-dir>/settings.json)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Classify an image file and record it
    Scan {
        #[arg(value_name = "IMAGE")]
        image: PathBuf,
    },
    /// Classify frames from a camera (a directory of stills)
    Capture(CaptureArgs),
    /// Show recorded scans, newest first
    Log {
        #[arg(long)]
        json: bool,
        #[arg(long, value_name = "N")]
        limit: Option<usize>,
    },
    /// Delete every recorded scan
    Clear,
    /// Bin levels, composition and accuracy
    Stats {
        #[arg(long)]
        json: bool,
    },
    /// Low-confidence scans worth a second look
    Alerts {
        #[arg(long)]
        json: bool,
    },
    /// Acknowledge the alert raised by a scan
    Ack {
        #[arg(value_name = "SCAN_ID")]
        scan_id: String,
    },
    /// Check the inference service
    Health,
    /// Print scans as they are recorded, including by other processes
    Watch,
}

#[derive(Args, Debug, Clone)]
pub struct CaptureArgs {
    /// Directory of frames to replay as the camera
    #[arg(long, value_name = "DIR")]
    pub frames_dir: PathBuf,

    /// user or environment
    #[arg(long)]
    pub facing: Option<FacingMode>,

    /// Classify one frame instead of voting over a burst
    #[arg(long)]
    pub single: bool,
}

pub async fn execute(cli: Cli) -> Result<()> {
    let mut options = AppOptions {
        data_dir: resolve_data_dir(cli.data_dir.as_deref())?,
        config: cli.config.clone(),
        ..Default::default()
    };
    if let Command::Capture(args) = &cli.command {
        options.frames_dir = Some(args.frames_dir.clone());
        options.facing = args.facing;
    }

    let state = AppState::open(&options).await?;

    match cli.command {
        Command::Scan { image } => {
            let outcome = commands::scan_image(&state, &image).await.map_err(|e| anyhow!(e))?;
            print_outcome(&outcome);
        }
        Command::Capture(args) => match commands::capture_scan(&state, args.single).await {
            Ok(Some(outcome)) => print_outcome(&outcome),
            Ok(None) => println!("A scan is already in progress."),
            Err(err) => return Err(anyhow!(err)),
        },
        Command::Log { json, limit } => {
            let scans = commands::get_scans(&state, limit).await.map_err(|e| anyhow!(e))?;
            if json {
                print_json(&scans)?;
            } else if scans.is_empty() {
                println!("No scans yet.");
            } else {
                scans.iter().for_each(print_record);
            }
        }
        Command::Clear => {
            commands::clear_scans(&state).await.map_err(|e| anyhow!(e))?;
            println!("Scan log cleared.");
        }
        Command::Stats { json } => {
            let dashboard = commands::get_dashboard(&state).await.map_err(|e| anyhow!(e))?;
            if json {
                print_json(&dashboard)?;
            } else {
                let stats = &dashboard.stats;
                println!(
                    "{} scan(s), {} recycled ({:.0}%), average confidence {:.0}%",
                    stats.total, stats.recycling, stats.recycling_rate, stats.average_confidence
                );
                for bin in &dashboard.bins {
                    let top: Vec<String> = bin
                        .composition
                        .iter()
                        .map(|entry| format!("{} {}%", entry.name, entry.percentage))
                        .collect();
                    println!("  {:<10} {:>3}%  {}", bin.name, bin.level, top.join(", "));
                }
                println!("Segregation accuracy {:.1}%", dashboard.performance.accuracy);
            }
        }
        Command::Alerts { json } => {
            let alerts = commands::get_alerts(&state).await.map_err(|e| anyhow!(e))?;
            if json {
                print_json(&alerts)?;
            } else if alerts.is_empty() {
                println!("No contamination alerts.");
            } else {
                for alert in &alerts {
                    println!(
                        "{}  {:<8} {:<12} {} in {} ({:.0}%)",
                        alert.scan_id,
                        format!("{:?}", alert.severity).to_lowercase(),
                        format!("{:?}", alert.status).to_lowercase(),
                        alert.contaminant,
                        alert.bin.display_name(),
                        alert.bin_confidence * 100.0
                    );
                }
            }
        }
        Command::Ack { scan_id } => {
            let changed = commands::acknowledge_alert(&state, &scan_id)
                .await
                .map_err(|e| anyhow!(e))?;
            if changed {
                println!("Acknowledged {scan_id}.");
            } else {
                println!("{scan_id} was already acknowledged.");
            }
        }
        Command::Health => {
            let health = commands::service_health(&state).await.map_err(|e| anyhow!(e))?;
            print_json(&health)?;
            if !health.is_ok() {
                return Err(anyhow!(
                    "inference service is not ready: {}",
                    health.error.as_deref().unwrap_or("unknown error")
                ));
            }
        }
        Command::Watch => watch(&state).await?,
    }

    Ok(())
}

async fn watch(state: &AppState) -> Result<()> {
    let cancel = CancellationToken::new();
    let tasks = state.start_sync(cancel.clone());
    let mut updates = state.scan_log.subscribe();
    let mut newest = updates.borrow().first().map(|r| r.id.clone());

    println!("Watching for scans (Ctrl-C to stop)...");
    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = updates.borrow_and_update().clone();
                let head = snapshot.first().map(|r| r.id.clone());
                if head == newest {
                    continue;
                }
                match snapshot.first() {
                    Some(record) => print_record(record),
                    None => println!("Scan log cleared."),
                }
                newest = head;
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    cancel.cancel();
    for task in tasks {
        let _ = task.await;
    }
    Ok(())
}

fn print_outcome(outcome: &ScanOutcome) {
    print_record(&outcome.record);
    if let Some(summary) = &outcome.vote_summary {
        println!("  votes {}/{} over {} frame(s)", summary.votes, summary.window, summary.frames_seen);
    }
    if let Some(notice) = &outcome.notice {
        println!("  {notice}");
    }
}

fn print_record(record: &ScanRecord) {
    let when = chrono::DateTime::from_timestamp_millis(record.timestamp)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| record.timestamp.to_string());
    println!(
        "{when}  {:<10} {} ({:.0}%)  [{}] {}",
        record.bin_suggestion.display_name(),
        record.waste_type,
        record.waste_type_confidence * 100.0,
        record.source.as_str(),
        record.id
    );
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn capture_parses_facing_and_global_flags() {
        let cli = Cli::try_parse_from([
            "ecosort",
            "capture",
            "--frames-dir",
            "frames",
            "--facing",
            "user",
            "--single",
            "--data-dir",
            "/tmp/eco",
        ])
        .unwrap();

        assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/eco")));
        match cli.command {
            Command::Capture(args) => {
                assert_eq!(args.facing, Some(FacingMode::User));
                assert!(args.single);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn capture_requires_a_frames_dir() {
        assert!(Cli::try_parse_from(["ecosort", "capture"]).is_err());
    }
}
