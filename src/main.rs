//! rennen: run a small fleet of dev services in one tabbed terminal dashboard.
//!
//! This is the entry point of the application. It parses command-line
//! arguments, loads the configuration, and runs the event loop that feeds
//! keystrokes, process reports and ticks into the UI state machine.

mod app;
mod config;
mod error;
mod events;
mod output;
mod process;
mod runner;
mod tui;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::app::{App, AppAction};
use crate::config::DEFAULT_CONFIG_PATH;
use crate::events::Event;
use crate::runner::{SupervisorConfig, SupervisorSet};
use crate::tui::Theme;

const LOG_FILE: &str = "ren.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum LogLevel {
    /// Discard all logs.
    None,
    /// Write everything to ./ren.log.
    All,
}

/// Command-line interface definition.
#[derive(Debug, Parser)]
#[command(
    name = "ren",
    version,
    about = "Run your dev services side by side in one terminal",
    disable_help_subcommand = true
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
    /// Path to the ren.json configuration file.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    /// Log verbosity. Logs go to ./ren.log, never to the screen.
    #[arg(long, value_enum, default_value_t = LogLevel::None)]
    logging: LogLevel,
    /// Seconds after its last output that a process still counts as active.
    #[arg(long, default_value_t = 60)]
    activity_window_secs: u64,
    /// Time a process gets to exit after SIGTERM before it is killed (ms).
    #[arg(long, default_value_t = 5_000)]
    grace_period_ms: u64,
    /// UI refresh interval (ms).
    #[arg(long, default_value_t = 200)]
    tick_ms: u64,
}

#[derive(Debug, PartialEq, Eq, Subcommand)]
enum Commands {
    /// Write a starter configuration file if none exists yet.
    Init,
    /// Show version information.
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Some(Commands::Version) => {
            println!("ren {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        Some(Commands::Init) => {
            config::write_default_config(&cli.config)?;
            println!("okay, just generated that at {}", cli.config.display());
            return Ok(());
        }
        None => {}
    }

    init_logging(cli.logging)?;
    let config = config::load_config(&cli.config)
        .with_context(|| format!("error loading config from {}", cli.config.display()))?;

    let (event_tx, event_rx) = mpsc::channel(256);
    let supervisors = SupervisorSet::new(
        config.process_specs(),
        config.command_specs(),
        SupervisorConfig::new(
            Duration::from_millis(cli.grace_period_ms),
            Duration::from_secs(cli.activity_window_secs),
        ),
        event_tx.clone(),
    );

    run(&supervisors, event_tx, event_rx, Duration::from_millis(cli.tick_ms)).await
}

async fn run(
    supervisors: &SupervisorSet,
    event_tx: mpsc::Sender<Event>,
    mut event_rx: mpsc::Receiver<Event>,
    tick_rate: Duration,
) -> Result<()> {
    let mut app = App::new(supervisors);
    let theme = Theme::default();
    let mut terminal = tui::init_terminal().context("failed to initialize terminal")?;
    if let Ok((width, height)) = crossterm::terminal::size() {
        app.update(Event::Resize { width, height }, supervisors);
    }

    spawn_input_listener(event_tx.clone());
    spawn_signal_listener(event_tx);
    supervisors.start_all();
    info!(processes = supervisors.processes().len(), "dashboard started");

    let mut ticker = tokio::time::interval(tick_rate.max(Duration::from_millis(10)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut result = Ok(());

    loop {
        let event = tokio::select! {
            Some(event) = event_rx.recv() => event,
            _ = ticker.tick() => Event::Tick,
        };
        match app.update(event, supervisors) {
            AppAction::Quit => break,
            action => handle_app_action(action, supervisors),
        }
        if let Err(err) = tui::draw(&mut terminal, &app.snapshot(supervisors), &theme) {
            result = Err(anyhow::Error::from(err).context("failed to draw frame"));
            break;
        }
    }

    app.shutting_down = true;
    let _ = tui::draw(&mut terminal, &app.snapshot(supervisors), &theme);
    info!("shutting down");
    for (shortname, err) in supervisors.shutdown_all().await {
        tracing::warn!(%shortname, error = %err, "process did not stop cleanly");
    }
    tui::restore_terminal(terminal).context("failed to restore terminal")?;
    println!("all processes stopped");
    result
}

// Stop and restart wait on child processes, so they run off the event loop and
// report back through the event channel.
fn handle_app_action(action: AppAction, supervisors: &SupervisorSet) {
    match action {
        AppAction::Stop(target) => {
            if let Some(supervisor) = supervisors.get(target).cloned() {
                tokio::spawn(async move { supervisor.stop_reported().await });
            }
        }
        AppAction::Restart(target) => {
            if let Some(supervisor) = supervisors.get(target).cloned() {
                tokio::spawn(async move { supervisor.restart_reported().await });
            }
        }
        AppAction::Quit | AppAction::None => {}
    }
}

fn init_logging(level: LogLevel) -> Result<()> {
    if level == LogLevel::None {
        return Ok(());
    }
    let file = std::fs::File::create(LOG_FILE)
        .with_context(|| format!("failed to create log file {}", LOG_FILE))?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::sync::Mutex::new(file))
        .with_ansi(false)
        .init();
    Ok(())
}

fn spawn_input_listener(tx: mpsc::Sender<Event>) {
    std::thread::spawn(move || loop {
        if crossterm::event::poll(Duration::from_millis(100)).unwrap_or(false) {
            let event = match crossterm::event::read() {
                Ok(crossterm::event::Event::Key(key)) => Event::Key(key),
                Ok(crossterm::event::Event::Resize(width, height)) => {
                    Event::Resize { width, height }
                }
                _ => continue,
            };
            if tx.blocking_send(event).is_err() {
                break;
            }
        }
    });
}

fn spawn_signal_listener(tx: mpsc::Sender<Event>) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(signal) => signal,
                Err(_) => return,
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }
        let _ = tx.send(Event::Shutdown).await;
    });
}
