mod args;
mod config;

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use billing_processor::{BillingProcessor, ProcessorError, build_processor};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = args::parse_args().map_err(|err| {
        eprintln!("{err}");
        args::print_help();
        io::Error::new(io::ErrorKind::InvalidInput, "invalid arguments")
    })?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let loaded = config::load(&args).map_err(io::Error::other)?;
    info!(config = %loaded.file.display(), "loaded configuration");
    let interval = Duration::from_secs(loaded.config.poll_interval_secs);
    let once = loaded.config.process_once;

    let processor = Arc::new(
        build_processor(loaded.config).map_err(|err| io::Error::other(err.to_string()))?,
    );
    let cancel = Arc::new(AtomicBool::new(false));

    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("shutdown requested, finishing current step");
            signal_cancel.store(true, Ordering::SeqCst);
        }
    });

    loop {
        run_poll(processor.clone(), cancel.clone()).await;
        if once || cancel.load(Ordering::SeqCst) {
            break;
        }
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = wait_for_cancel(cancel.clone()) => break,
        }
    }

    info!("billing processor stopped");
    Ok(())
}

async fn run_poll(processor: Arc<BillingProcessor>, cancel: Arc<AtomicBool>) {
    let result = tokio::task::spawn_blocking(move || processor.poll(&cancel)).await;
    match result {
        Ok(Ok(report)) => {
            if !report.has_new_files() {
                info!("no new billing files");
            }
        }
        Ok(Err(ProcessorError::Cancelled)) => {
            warn!("poll cancelled, nothing published for the interrupted month")
        }
        Ok(Err(err)) => error!(error = %err, "poll failed"),
        Err(err) => error!(error = %err, "poll task panicked"),
    }
}

async fn wait_for_cancel(cancel: Arc<AtomicBool>) {
    while !cancel.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
}
