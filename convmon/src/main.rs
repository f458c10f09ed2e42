//! convmon - on-host routing-convergence observer.
//!
//! Subscribes to kernel route and traffic-control notifications, groups
//! them into quiet-period measurement sessions and appends a structured
//! JSON log that downstream tooling uses to compute convergence times for
//! routers under failure injection.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::error::ErrorKind;
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use convmon::config::{MonitorConfig, StartupError, DEFAULT_THRESHOLD_MS};
use convmon::monitor::{run_event_loop, Monitor};
use convmon::sink::{LogSink, RecordSink};
use convmon::ticker;
use convmon_netlink::KernelSubscriber;

/// Bound of the subscriber→engine event channel; kernel bursts beyond this
/// are absorbed by socket buffering and backpressure, never by dropping.
const EVENT_QUEUE_DEPTH: usize = 1024;

#[derive(Parser, Debug)]
#[command(
    name = "convmon",
    about = "Observe kernel route and qdisc events and measure routing convergence",
    version
)]
struct Args {
    /// Quiet period in milliseconds after which a session counts as converged
    #[arg(long, value_name = "MS", default_value_t = DEFAULT_THRESHOLD_MS)]
    threshold: i64,

    /// Router name recorded in the log (default: router_<user>_<unix-seconds>)
    #[arg(long, value_name = "NAME")]
    router_name: Option<String>,

    /// Measurement log path (default: /var/log/frr/async_route_convergence.rs.json)
    #[arg(long, value_name = "PATH")]
    log_path: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) if matches!(err.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            let _ = err.print();
            return ExitCode::SUCCESS;
        }
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::from(1);
        }
    };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("startup failed: {err}");
            ExitCode::from(1)
        }
    }
}

async fn run(args: Args) -> Result<(), StartupError> {
    let config = MonitorConfig::resolve(args.threshold, args.router_name, args.log_path)?;
    info!(
        router = %config.router_name,
        threshold_ms = config.quiet_period_ms,
        log = %config.log_path.display(),
        "starting convergence monitor"
    );

    let sink: Arc<dyn RecordSink> = Arc::new(LogSink::open(&config.log_path));
    let monitor = Arc::new(Monitor::new(config, sink));

    let mut sigint = signal(SignalKind::interrupt()).map_err(StartupError::Signal)?;
    let mut sigterm = signal(SignalKind::terminate()).map_err(StartupError::Signal)?;

    monitor.start();

    let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
    let mut subscriber = KernelSubscriber::new(events_tx);
    if let Err(err) = subscriber.start() {
        // Release what we already own before the nonzero exit.
        monitor.stop();
        return Err(err.into());
    }

    let engine_task = tokio::spawn(run_event_loop(monitor.clone(), events_rx));
    let ticker_cancel = CancellationToken::new();
    let ticker_task = ticker::spawn(monitor.clone(), ticker_cancel.clone());

    tokio::select! {
        _ = sigint.recv() => info!("received SIGINT, shutting down"),
        _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
    }

    // A second signal during shutdown terminates immediately.
    let hard_exit = tokio::spawn(async move {
        tokio::select! {
            _ = sigint.recv() => {}
            _ = sigterm.recv() => {}
        }
        eprintln!("received a second signal, terminating");
        std::process::exit(1);
    });

    // Stop the kernel side first: joining the subscriber closes the event
    // channel, so the engine task drains whatever is in flight and exits.
    subscriber.stop().await;
    let _ = engine_task.await;

    ticker_cancel.cancel();
    let _ = ticker_task.await;

    monitor.stop();
    hard_exit.abort();

    Ok(())
}
