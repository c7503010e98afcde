use std::path::PathBuf;

use burrow::debugger::Debugger;
use burrow::errors::DebuggerError;
use burrow::target::Target;
use burrow::ui::cli::CliUi;

use clap::Parser;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Launch or attach the burrow debugger
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// The program to launch as the inferior
    run: Option<PathBuf>,

    /// Attach to an already running process instead of launching one
    #[clap(short, long, conflicts_with = "run")]
    pid: Option<i32>,
}

fn main() -> Result<(), DebuggerError> {
    setup_logger();
    let args = Args::parse();

    let target = match (args.pid, args.run) {
        (Some(pid), _) => Target::attach(pid)?,
        (None, Some(path)) => {
            let target = Target::launch(&path, None)?;
            debug!("launched {} as {}", path.display(), target.inferior().pid());
            target
        }
        (None, None) => {
            eprintln!("usage: burrow <program> | burrow -p <pid>");
            std::process::exit(1);
        }
    };

    let ui = CliUi::build()?;
    let mut debugger = Debugger::new(target, ui);
    debugger.run()
}

fn setup_logger() {
    // print formatted traces to stdout, filtered via RUST_LOG
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .without_time()
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("could not setup logger");
}
