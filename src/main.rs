use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tokio::sync::{broadcast::error::RecvError, mpsc};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use process_key_scheduler::config::parse_duration;
use process_key_scheduler::{
    Config, EngineEvent, HotkeyManager, KeySender, LogEntry, LogKind, ProcessHierarchyResolver,
    Scheduler, SendingState, SystemWindowSource, WindowDescriptor,
};

const RETRY_DELAY: Duration = Duration::from_secs(1);

#[derive(Parser)]
#[command(name = "pks", version, about = "Send timed keystroke sequences to a process")]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List candidate target windows with their process hierarchy
    Windows {
        /// Only show windows whose owner contains this text
        #[arg(short, long)]
        filter: Option<String>,
    },
    /// Run a JSON step profile against its target
    Run {
        /// Path to the profile
        config: String,

        /// Override the dispatch interval (e.g. 500ms, 2s)
        #[arg(short, long)]
        interval: Option<String>,

        /// Override the repeat count (0 loops forever)
        #[arg(short, long)]
        repeat: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Windows { filter } => {
            init_tracing(cli.verbose);
            list_windows(filter.as_deref());
            Ok(())
        }
        Commands::Run {
            config,
            interval,
            repeat,
        } => {
            let mut profile = Config::from_file(&config)?;
            if let Some(interval) = interval {
                profile.interval = parse_duration(&interval)?;
            }
            if let Some(repeat) = repeat {
                profile.repeat_count = repeat;
            }
            profile
                .validate()
                .with_context(|| format!("invalid profile '{config}'"))?;

            init_tracing(cli.verbose || profile.verbose);
            run(profile).await
        }
    }
}

fn init_tracing(verbose: bool) {
    // Engine log entries are printed directly; tracing carries diagnostics.
    let default = if verbose {
        "debug"
    } else {
        "warn,process_key_scheduler::engine=off"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn list_windows(filter: Option<&str>) {
    let resolver = ProcessHierarchyResolver::new(Arc::new(SystemWindowSource::new()));
    let needle = filter.map(str::to_lowercase);

    let windows: Vec<WindowDescriptor> = resolver
        .resolve_windows()
        .into_iter()
        .filter(|w| {
            needle
                .as_deref()
                .is_none_or(|n| w.owner_name.to_lowercase().contains(n))
        })
        .collect();

    if windows.is_empty() {
        println!("{}", "No windows found.".yellow());
        return;
    }

    println!(
        "{:>12}  {:>7}  {:>7}  {:>5}  {:>4}  {}",
        "WINDOW".bold(),
        "PID".bold(),
        "PARENT".bold(),
        "KIDS".bold(),
        "WINS".bold(),
        "OWNER / TITLE".bold()
    );
    for w in &windows {
        let owner = if w.is_child_process {
            format!("└─ {} (child of {})", w.owner_name, w.parent_windowed_pid)
                .dimmed()
                .to_string()
        } else {
            w.owner_name.cyan().to_string()
        };
        println!(
            "{:>12}  {:>7}  {:>7}  {:>5}  {:>4}  {} {}",
            w.window_id,
            w.pid,
            w.parent_pid,
            w.child_process_count,
            w.sub_window_count,
            owner,
            w.window_name
        );
    }
}

async fn run(config: Config) -> Result<()> {
    let source = Arc::new(SystemWindowSource::new());
    let resolver = ProcessHierarchyResolver::new(source.clone());
    let target = find_target(&config, &resolver, &source).await?;

    println!("{} {}", "Target:".green().bold(), target.display_name());

    let scheduler = Scheduler::new(Arc::new(KeySender::new()?), resolver);
    let mut events = scheduler.subscribe();

    // Kept alive for the duration of the run so the hotkey stays registered.
    let (_hotkey_manager, mut toggles) = match setup_hotkey(&config.pause_hotkey) {
        Ok((manager, toggles)) => {
            println!(
                "{} press {} to pause/resume, Ctrl-C to stop",
                "Hotkey:".green().bold(),
                config.pause_hotkey.bold()
            );
            (Some(manager), Some(toggles))
        }
        Err(e) => {
            warn!("global hotkey unavailable: {}", e);
            (None, None)
        }
    };

    scheduler
        .start(target, &config.steps, config.interval_ms(), config.repeat_count)
        .await?;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(EngineEvent::Log(entry)) => print_entry(&entry),
                Ok(EngineEvent::StateChanged(SendingState::Idle)) => break,
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!("skipped {} engine events", skipped);
                    // The skipped events may include the final transition.
                    if run_finished(&scheduler) {
                        break;
                    }
                }
                Err(RecvError::Closed) => break,
            },
            Some(()) = next_toggle(&mut toggles) => match scheduler.state() {
                SendingState::Running => scheduler.pause().await?,
                SendingState::Paused => scheduler.resume().await?,
                SendingState::Idle => {}
            },
            _ = tokio::signal::ctrl_c() => scheduler.stop().await?,
        }
    }

    println!(
        "{} {} send(s), {} cycle(s)",
        "Done:".green().bold(),
        scheduler.send_count(),
        scheduler.cycles_completed()
    );
    Ok(())
}

async fn find_target(
    config: &Config,
    resolver: &ProcessHierarchyResolver,
    source: &SystemWindowSource,
) -> Result<WindowDescriptor> {
    let needle = config.process_name.to_lowercase();

    for attempt in 1..=config.max_retries {
        let windows = resolver.resolve_windows();
        let found = match config.window_id {
            Some(window_id) => windows.into_iter().find(|w| w.window_id == window_id),
            // Platforms without window enumeration fall back to the process.
            None => windows
                .into_iter()
                .find(|w| w.owner_name.to_lowercase().contains(&needle))
                .or_else(|| source.find_process(&config.process_name)),
        };

        if let Some(target) = found {
            return Ok(target);
        }

        info!(
            "target not found (attempt {}/{}), retrying in {:?}",
            attempt, config.max_retries, RETRY_DELAY
        );
        tokio::time::sleep(RETRY_DELAY).await;
    }

    match config.window_id {
        Some(window_id) => bail!(
            "window {} not found after {} attempts",
            window_id,
            config.max_retries
        ),
        None => bail!(
            "process '{}' not found after {} attempts",
            config.process_name,
            config.max_retries
        ),
    }
}

fn setup_hotkey(hotkey: &str) -> Result<(HotkeyManager, mpsc::UnboundedReceiver<()>)> {
    let mut manager = HotkeyManager::new()?;
    manager.register_toggle_hotkey(hotkey)?;
    let toggles = manager.listen()?;
    Ok((manager, toggles))
}

async fn next_toggle(toggles: &mut Option<mpsc::UnboundedReceiver<()>>) -> Option<()> {
    match toggles {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

fn run_finished(scheduler: &Scheduler) -> bool {
    scheduler.state() == SendingState::Idle
}

fn print_entry(entry: &LogEntry) {
    let time = entry.timestamp.format("%H:%M:%S%.3f").to_string().dimmed();
    let message = match entry.kind {
        LogKind::Key => entry.message.normal(),
        LogKind::State => entry.message.blue().bold(),
        LogKind::Warn => entry.message.yellow(),
        LogKind::Error => entry.message.red(),
    };
    println!("{time} {message}");
}
