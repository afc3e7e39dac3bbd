use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use env_logger::Env;
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, warn};
use tokio::sync::mpsc;

use droidpad_updater::util::format_size;
use droidpad_updater::{
    ProcessLauncher, UpdateEngine, UpdateEvent, UpdaterConfig, UpgradeDecision, UserAction,
};

#[derive(Parser, Debug)]
#[command(
    name = "droidpad-updater",
    author,
    version,
    about = "Checks for, downloads and launches DroidPad desktop updates"
)]
struct Cli {
    /// Read settings from this file instead of the per-user updater.json.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the manifest location.
    #[arg(long, global = true)]
    manifest_url: Option<String>,

    /// Override the version code of the running build.
    #[arg(long, global = true)]
    version_code: Option<i64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Report whether a newer release is listed in the manifest.
    Check {
        /// Print the full decision as JSON.
        #[arg(long)]
        json: bool,
        /// Treat this as the automatic startup check: stay quiet when up to date.
        #[arg(long)]
        startup: bool,
    },
    /// Download, verify and launch the newest installer.
    Install {
        /// Do not ask for confirmation.
        #[arg(long, short)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => UpdaterConfig::load_from(path),
        None => UpdaterConfig::load(),
    };
    if let Some(url) = cli.manifest_url {
        config.manifest_url = url;
    }
    if let Some(code) = cli.version_code {
        config.current_version_code = code;
    }

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut engine = match UpdateEngine::new(config, Arc::new(tx), Arc::new(ProcessLauncher::new()))
    {
        Ok(engine) => engine,
        Err(err) => {
            error!("{err}");
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Command::Check { json, startup } => run_check(&mut engine, &mut rx, json, startup).await,
        Command::Install { yes } => run_install(&mut engine, &mut rx, yes).await,
    }
}

async fn run_check(
    engine: &mut UpdateEngine,
    rx: &mut mpsc::UnboundedReceiver<UpdateEvent>,
    json: bool,
    startup: bool,
) -> ExitCode {
    engine.handle_action(UserAction::CheckForUpdates {
        user_initiated: !startup,
    });
    let Some(decision) = next_decision(rx).await else {
        return ExitCode::FAILURE;
    };

    if json {
        match serde_json::to_string_pretty(&decision) {
            Ok(text) => println!("{text}"),
            Err(err) => {
                error!("failed to encode decision: {err}");
                return ExitCode::FAILURE;
            }
        }
    } else if decision.should_notify() {
        print_decision(&decision, engine.config().current_version_code);
    }
    ExitCode::SUCCESS
}

async fn run_install(
    engine: &mut UpdateEngine,
    rx: &mut mpsc::UnboundedReceiver<UpdateEvent>,
    yes: bool,
) -> ExitCode {
    engine.handle_action(UserAction::CheckForUpdates {
        user_initiated: true,
    });
    let Some(decision) = next_decision(rx).await else {
        return ExitCode::FAILURE;
    };
    print_decision(&decision, engine.config().current_version_code);
    let Some(candidate) = decision.candidate().cloned() else {
        return ExitCode::SUCCESS;
    };
    if !yes && !confirm(&format!("Install {}?", candidate.display_name)).await {
        println!("Update skipped.");
        return ExitCode::SUCCESS;
    }

    engine.handle_action(UserAction::InstallUpdate(candidate));

    let bar = ProgressBar::new_spinner();
    bar.set_style(spinner_style());
    bar.enable_steady_tick(Duration::from_millis(120));

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut cancel_sent = false;
    loop {
        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else {
                    bar.abandon();
                    return ExitCode::FAILURE;
                };
                if let Some(code) = render_download_event(event, &bar) {
                    return code;
                }
            }
            result = &mut ctrl_c, if !cancel_sent => {
                if let Err(err) = result {
                    warn!("unable to listen for Ctrl-C: {err}");
                }
                bar.println("Cancelling download...");
                engine.handle_action(UserAction::CancelDownload);
                cancel_sent = true;
            }
        }
    }
}

/// Wait for the fetch worker's single event.
async fn next_decision(rx: &mut mpsc::UnboundedReceiver<UpdateEvent>) -> Option<UpgradeDecision> {
    while let Some(event) = rx.recv().await {
        match event {
            UpdateEvent::UpgradeDecision(decision) => return Some(decision),
            UpdateEvent::FetchFailed { message } => {
                eprintln!("Couldn't check for updates: {message}");
                return None;
            }
            _ => {}
        }
    }
    None
}

/// Update the progress display; returns an exit code once the session ends.
fn render_download_event(event: UpdateEvent, bar: &ProgressBar) -> Option<ExitCode> {
    match event {
        UpdateEvent::DownloadStarted { version_name } => {
            bar.set_message(format!("Downloading DroidPad {version_name}"));
            None
        }
        UpdateEvent::DownloadProgress {
            bytes_transferred,
            total_bytes,
        } => {
            if total_bytes > 0 && bar.length() != Some(total_bytes) {
                bar.set_length(total_bytes);
                bar.set_style(bar_style());
            }
            bar.set_position(bytes_transferred);
            None
        }
        UpdateEvent::DownloadSucceeded { installer } => {
            bar.finish_with_message("Download verified");
            println!("Installer started: {}", installer.display());
            Some(ExitCode::SUCCESS)
        }
        UpdateEvent::DownloadFailed { kind, message } => {
            bar.abandon_with_message(format!("Download failed ({})", kind.label()));
            eprintln!("{message}");
            Some(ExitCode::FAILURE)
        }
        UpdateEvent::DownloadCancelled { bytes_transferred } => {
            bar.abandon_with_message("Download cancelled");
            eprintln!(
                "Stopped after {}; the partial file was kept.",
                format_size(bytes_transferred)
            );
            Some(ExitCode::from(130))
        }
        UpdateEvent::UpgradeDecision(_) | UpdateEvent::FetchFailed { .. } => None,
    }
}

fn print_decision(decision: &UpgradeDecision, current_version_code: i64) {
    match decision.candidate() {
        Some(candidate) => {
            println!(
                "Update available: {} ({}, version code {}, {})",
                candidate.display_name,
                candidate.version_name,
                candidate.version_code,
                format_size(candidate.size_bytes)
            );
            if !candidate.comment.is_empty() {
                println!("  {}", candidate.comment);
            }
        }
        None => println!("DroidPad is up to date (version code {current_version_code})."),
    }
    if decision.all_records().is_empty() {
        return;
    }
    println!("Releases listed:");
    for record in decision.all_records() {
        let marker = if decision.candidate() == Some(record) {
            '*'
        } else {
            ' '
        };
        println!(
            "  {marker} {:>6}  {:<10}  {}",
            record.version_code, record.version_name, record.display_name
        );
    }
}

async fn confirm(prompt: &str) -> bool {
    print!("{prompt} [y/N] ");
    let _ = io::stdout().flush();
    let answer = tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        io::stdin().lock().read_line(&mut line).map(|_| line)
    })
    .await;
    match answer {
        Ok(Ok(line)) => matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes"),
        _ => false,
    }
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "{msg} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("=> ")
}

// Used while the total size is unknown.
fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner} {msg} {bytes} ({bytes_per_sec})")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}
