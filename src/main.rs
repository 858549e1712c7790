use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hlspack::config::ConfigManager;
use hlspack::hardware::HardwareDetector;
use hlspack::pipeline::{self, PipelineOptions};
use hlspack::executor::ProgressHook;
use hlspack::util::format_duration;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "hlspack", version, about = "Adaptive-bitrate HLS packaging driven by ffmpeg")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Transcode one source file into an HLS package
    Transcode {
        /// Source media file
        input: PathBuf,
        /// Output directory (created if absent)
        output: PathBuf,
        /// Quality profile name
        #[arg(short, long, default_value = "medium")]
        quality: String,
        /// Hardware preference: auto, nvidia, intel, amd, apple, vaapi, software
        #[arg(long, default_value = "auto")]
        hardware: String,
        /// Transcode only at the source resolution
        #[arg(long)]
        original_only: bool,
        /// Skip audio extraction
        #[arg(long)]
        no_audio: bool,
        /// Skip subtitle extraction
        #[arg(long)]
        no_subtitles: bool,
        /// Skip sprite generation
        #[arg(long)]
        no_sprites: bool,
        /// Probe-test hardware encoders before use
        #[arg(long)]
        test_encoders: bool,
        /// Configuration file path
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Maximum concurrent tasks
        #[arg(long)]
        max_concurrent: Option<u32>,
    },
    /// Show detected hardware encoders
    Hardware {
        /// Probe-test each available encoder with a real encode
        #[arg(long)]
        test: bool,
    },
    /// List available quality profiles
    Profiles {
        /// Configuration file path
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Manage the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write a default configuration file
    Init {
        /// Target path (defaults to ~/.hlspack.yaml)
        #[arg(short, long)]
        path: Option<PathBuf>,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print the effective configuration
    Show {
        /// Configuration file path
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,hlspack=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            1
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::Transcode {
            input,
            output,
            quality,
            hardware,
            original_only,
            no_audio,
            no_subtitles,
            no_sprites,
            test_encoders,
            config,
            max_concurrent,
        } => {
            let mut config = ConfigManager::new(config)
                .load()
                .context("failed to load configuration")?;
            if hardware != "auto" {
                config.hardware.prefer = hardware;
            }

            let options = PipelineOptions {
                input,
                output_dir: output,
                profile: quality,
                original_only,
                include_audio: !no_audio,
                include_subtitles: !no_subtitles,
                include_sprites: !no_sprites,
                test_encoders,
                max_concurrent,
            };

            let progress: ProgressHook = Arc::new(|completed, total| {
                info!("progress: {completed}/{total} tasks finished");
            });

            let report = tokio::select! {
                result = pipeline::run(&config, &options, Some(progress)) => {
                    result.context("transcoding failed")?
                }
                _ = tokio::signal::ctrl_c() => {
                    warn!("interrupted, aborting");
                    return Ok(130);
                }
            };

            for warning in &report.inspection_warnings {
                warn!("source: {warning}");
            }

            println!(
                "completed {}/{} tasks in {} ({} success rate {:.1}%)",
                report.summary.completed_tasks,
                report.summary.total_tasks,
                format_duration(report.summary.total_duration),
                report.hardware_used,
                report.summary.success_rate()
            );
            if let Some(master) = &report.master_playlist {
                println!("master playlist: {}", master.display());
            }
            for error in &report.validation.errors {
                eprintln!("validation error: {error}");
            }
            for warning in &report.validation.warnings {
                warn!("validation: {warning}");
            }

            if report.summary.has_failures() || !report.validation.is_valid() {
                Ok(1)
            } else {
                Ok(0)
            }
        }

        Command::Hardware { test } => {
            let detector = HardwareDetector::new();
            let info = detector
                .detect("auto", test)
                .await
                .context("hardware detection failed")?;

            println!("platform: {}", info.platform);
            println!("detected type: {}", info.detected_type.as_str());
            println!();
            for encoder in &info.encoders {
                let status = if encoder.available {
                    if encoder.tested { "available (tested)" } else { "available" }
                } else {
                    "not available"
                };
                println!("  {:40} {status}", encoder.display_name);
            }
            if let Some(selected) = &info.selected_encoder {
                println!();
                println!("selected: {}", selected.display_name);
            }
            Ok(0)
        }

        Command::Profiles { config } => {
            let config = ConfigManager::new(config)
                .load()
                .context("failed to load configuration")?;
            for (name, variants) in &config.profiles {
                let summary: Vec<String> = variants
                    .iter()
                    .map(|v| format!("{} @ {}", v.quality, v.bitrate))
                    .collect();
                println!("{name}: {}", summary.join(", "));
            }
            Ok(0)
        }

        Command::Config { action } => match action {
            ConfigAction::Init { path, force } => {
                let manager = ConfigManager::new(None);
                let written = manager
                    .init_default_config(path.as_deref(), force)
                    .context("failed to write configuration")?;
                println!("configuration written to {}", written.display());
                Ok(0)
            }
            ConfigAction::Show { config } => {
                let config = ConfigManager::new(config)
                    .load()
                    .context("failed to load configuration")?;
                print!("{}", config.to_yaml()?);
                Ok(0)
            }
        },
    }
}
