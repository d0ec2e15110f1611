// SPDX-License-Identifier: Apache-2.0

use clap::Parser;
use filetail::bounded_channel::{BoundedReceiver, bounded};
use filetail::entry::Entry;
use filetail::init::args::{LogFormatArg, StartArgs};
use filetail::init::logging::setup_logging;
use filetail::persistence::{JsonFileDatabase, Persister};
use filetail::poller::Poller;
use serde_json::json;
use std::io::{self, Write};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::select;
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tower::BoxError;
use tracing::{error, info, warn};

#[derive(Debug, clap::Subcommand)]
enum Commands {
    /// Tail files and write each record to stdout as a JSON line
    Start(Box<StartArgs>),

    /// Return version
    Version,
}

#[derive(Debug, Parser)]
#[command(name = "filetail")]
#[command(bin_name = "filetail")]
#[command(version, about, long_about = None)]
#[command(subcommand_required = true)]
struct Arguments {
    #[arg(
        value_enum,
        long,
        global = true,
        env = "FILETAIL_LOG_FORMAT",
        default_value = "text"
    )]
    log_format: LogFormatArg,

    #[command(subcommand)]
    command: Option<Commands>,
}

fn main() -> ExitCode {
    let opt = Arguments::parse();

    match opt.command {
        Some(Commands::Version) => {
            println!("{}", get_version());
        }
        Some(Commands::Start(args)) => {
            let _logger = match setup_logging(&opt.log_format) {
                Ok(guard) => guard,
                Err(e) => {
                    eprintln!("ERROR: failed to setup logging: {}", e);
                    return ExitCode::from(1);
                }
            };

            if let Err(e) = run_input(args) {
                error!(error = ?e, "Failed to run file input.");
                return ExitCode::from(1);
            }
        }
        None => {
            eprintln!("ERROR: must specify a command");
            return ExitCode::from(2);
        }
    }

    ExitCode::SUCCESS
}

#[tokio::main]
async fn run_input(args: Box<StartArgs>) -> Result<(), BoxError> {
    let config = args.file_input.build_config();

    let db = JsonFileDatabase::open(&args.offsets_path)?;
    let persister: Arc<dyn Persister> = Arc::new(db.persister(config.id.clone()));

    let (entry_tx, entry_rx) = bounded::<Entry>(args.output_queue_size.max(1));
    let mut poller = Poller::from_config(config, persister, Arc::new(entry_tx))?;

    let writer = tokio::spawn(write_entries(entry_rx));

    let cancel = CancellationToken::new();
    let poller_cancel = cancel.clone();
    let mut poller_task = tokio::spawn(async move { poller.run(poller_cancel).await });

    select! {
        res = signal_wait() => {
            if let Err(e) = res {
                warn!(error = %e, "Unable to install signal handlers, stopping");
            } else {
                info!("Shutdown signal received.");
            }
            cancel.cancel();
        }
        res = &mut poller_task => {
            // Only returns early if the poller itself gave up
            return res?.map_err(|e| e.into());
        }
    }

    // The poller owns the only sender, so the writer finishes once the
    // poller task is done and the queue is drained
    let result = poller_task.await?;
    if let Err(e) = writer.await? {
        warn!(error = %e, "Output writer stopped early");
    }

    result.map_err(|e| e.into())
}

async fn write_entries(mut rx: BoundedReceiver<Entry>) -> io::Result<()> {
    while let Some(entry) = rx.next().await {
        let line = json!({
            "observed": entry.observed.to_rfc3339(),
            "fingerprint": entry.fingerprint.to_base64(),
            "offset": entry.offset,
            "truncated": entry.truncated,
            "attributes": entry.attributes,
            "body": entry.body_lossy(),
        });

        let mut stdout = io::stdout().lock();
        writeln!(stdout, "{}", line)?;
        if rx.is_empty() {
            stdout.flush()?;
        }
    }
    Ok(())
}

async fn signal_wait() -> io::Result<()> {
    let mut sig_term = signal(SignalKind::terminate())?;
    let mut sig_int = signal(SignalKind::interrupt())?;

    select! {
        _ = sig_term.recv() => {},
        _ = sig_int.recv() => {},
    }
    Ok(())
}

fn get_version() -> String {
    // Set during CI
    let version_build = option_env!("BUILD_SHORT_SHA").unwrap_or("dev");

    format!("{}-{}", env!("CARGO_PKG_VERSION"), version_build)
}
