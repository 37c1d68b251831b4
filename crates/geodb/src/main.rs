mod error;
mod logging;
mod settings;

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use geodb_core::{CycleOutcome, LifecycleEvent, UpdateController};
use geodb_platform::AppPaths;
use log::{error, info};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::AppError;
use crate::settings::Settings;

/// How long shutdown waits for pending events to be printed.
const REPORTER_GRACE: Duration = Duration::from_secs(5);

/// Keep a local GeoLite2 database in sync with its published checksum.
#[derive(Debug, Parser)]
#[command(name = "geodb", version, about)]
struct Args {
    /// Settings file to use instead of the per-user default.
    #[arg(long, env = "GEODB_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

    /// Run a single update check and exit; the exit code reports failure.
    #[arg(long)]
    once: bool,

    /// Log at debug level.
    #[arg(long)]
    debug: bool,

    /// Print the effective settings as JSON and exit.
    #[arg(long, conflicts_with = "once")]
    print_config: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    match run(args).await {
        Ok(code) => code,
        Err(failure) => {
            error!("{failure}");
            eprintln!("geodb: {failure}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<ExitCode, AppError> {
    let paths = AppPaths::new();
    let settings_path = match (args.config, &paths) {
        (Some(path), _) => path,
        (None, Ok(paths)) => paths.settings_file(),
        (None, Err(failure)) => return Err((*failure).into()),
    };
    let settings = Settings::load(&settings_path)?;

    if args.print_config {
        let json = serde_json::to_string_pretty(&settings).map_err(AppError::Serialize)?;
        println!("{json}");
        return Ok(ExitCode::SUCCESS);
    }

    let log_path = paths.ok().and_then(|paths| {
        paths.ensure_dirs().ok()?;
        Some(paths.log_file())
    });
    logging::init_logging(
        log_path.as_deref(),
        args.debug || settings.debug_logging,
        settings.max_log_size_bytes,
    );
    info!(
        "geodb {} using settings from {}",
        env!("CARGO_PKG_VERSION"),
        settings_path.display()
    );

    let controller = UpdateController::new(settings.updater)?;
    let reporter = tokio::spawn(report_events(controller.subscribe(), std::io::stdout()));

    if args.once {
        let outcome = controller.run_once().await;
        shutdown(controller, reporter).await;
        return Ok(if cycle_failed(&outcome) {
            ExitCode::FAILURE
        } else {
            ExitCode::SUCCESS
        });
    }

    controller.start()?;
    tokio::signal::ctrl_c().await.map_err(AppError::Signal)?;
    info!("Interrupt received, shutting down");
    controller.stop();
    shutdown(controller, reporter).await;
    Ok(ExitCode::SUCCESS)
}

/// Print every event to `out` until the controller goes away.
async fn report_events<W: Write>(
    mut events: mpsc::UnboundedReceiver<LifecycleEvent>,
    mut out: W,
) -> W {
    while let Some(event) = events.recv().await {
        let written = match event {
            LifecycleEvent::Notice(message) => writeln!(out, "{message}"),
            LifecycleEvent::UpdateSucceeded(message) => writeln!(out, "updated: {message}"),
            LifecycleEvent::Error { stage, error } => {
                writeln!(out, "update failed during {stage}: {error}")
            }
        };
        if let Err(error) = written {
            error!("Could not print update event: {error}");
            break;
        }
    }
    out
}

/// Drop the controller, closing the event channel, and let the reporter
/// flush what is left. A cycle still in flight keeps the channel open, so the
/// wait is bounded.
async fn shutdown<T>(controller: UpdateController, reporter: JoinHandle<T>) -> Option<T> {
    drop(controller);
    match tokio::time::timeout(REPORTER_GRACE, reporter).await {
        Ok(Ok(out)) => Some(out),
        Ok(Err(failure)) => {
            error!("Event reporter failed: {failure}");
            None
        }
        Err(_) => {
            info!("Update cycle still running at shutdown, not waiting for it");
            None
        }
    }
}

fn cycle_failed(outcome: &CycleOutcome) -> bool {
    matches!(outcome, CycleOutcome::Failed(_))
}
