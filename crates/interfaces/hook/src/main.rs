//! `focal-hook` — the host assistant calls this binary on every lifecycle
//! event, passing one JSON object on stdin and reading one JSON object
//! (`{context, events}`) from stdout.
//!
//! stdout belongs to the protocol; all logging goes to
//! `<home>/logs/focal.log`.  Exit 0 means "use the output", exit 2 means
//! the input violated the protocol (the host treats that as no context).
//! Anything recoverable degrades to empty output — an attention router is
//! advisory and producing nothing is always safe.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

use focal_config::ENV_DISABLE;
use focal_runtime::{HookEvent, HookOutput, Session};

const EXIT_OK: i32 = 0;
const EXIT_PROTOCOL: i32 = 2;

#[derive(Debug, Parser)]
#[command(name = "focal-hook", version, about = "Attention router hook for LLM coding assistants")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Read one hook event from stdin and emit the routing result (default).
    Hook,
    /// Print an attention snapshot for a project.
    Status {
        #[arg(long, default_value = ".")]
        project: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    let _log_guard = init_tracing();
    let cli = Cli::parse();

    let code = match cli.command.unwrap_or(Commands::Hook) {
        Commands::Hook => run_hook().await,
        Commands::Status { project } => run_status(&project),
    };
    std::process::exit(code);
}

async fn run_hook() -> i32 {
    if std::env::var(ENV_DISABLE).is_ok_and(|v| v == "1") {
        emit(&HookOutput::default());
        return EXIT_OK;
    }

    let mut input = String::new();
    if let Err(err) = std::io::stdin().read_to_string(&mut input) {
        eprintln!("focal-hook: cannot read stdin: {err}");
        return EXIT_PROTOCOL;
    }
    let event: HookEvent = match serde_json::from_str(&input) {
        Ok(event) => event,
        Err(err) => {
            eprintln!("focal-hook: bad hook payload: {err}");
            return EXIT_PROTOCOL;
        }
    };

    let output = match route_event(event).await {
        Ok(output) => output,
        Err(err) => {
            // Degraded operation: log it, hand the host nothing.
            error!(error = %format!("{err:#}"), "hook handling failed — emitting empty output");
            HookOutput::default()
        }
    };
    emit(&output);
    EXIT_OK
}

async fn route_event(event: HookEvent) -> Result<HookOutput> {
    let session = Session::open(Path::new(event.project_path()))?;
    session.handle(event).await
}

fn run_status(project: &Path) -> i32 {
    match Session::open(project).and_then(|s| s.status()) {
        Ok(report) => {
            println!("{report}");
            EXIT_OK
        }
        Err(err) => {
            eprintln!("focal-hook: status failed: {err:#}");
            1
        }
    }
}

fn emit(output: &HookOutput) {
    match serde_json::to_string(output) {
        Ok(json) => {
            let mut stdout = std::io::stdout();
            let _ = stdout.write_all(json.as_bytes());
            let _ = stdout.write_all(b"\n");
            let _ = stdout.flush();
        }
        Err(err) => error!(error = %err, "hook output serialization failed"),
    }
}

/// File-backed logging; stdout is reserved for the protocol.  Returns the
/// appender guard so buffered lines flush on exit.
fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let home = focal_config::paths::tool_home().ok()?;
    let log_dir = home.join("logs");
    if std::fs::create_dir_all(&log_dir).is_err() {
        return None;
    }
    let appender = tracing_appender::rolling::daily(&log_dir, "focal.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let filter = EnvFilter::try_from_env("FOCAL_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    let init = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .try_init();
    if init.is_err() {
        warn!("tracing already initialized");
    }
    Some(guard)
}
