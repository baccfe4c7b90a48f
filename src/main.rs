use catalog_dispatcher::config::{AppConfig, Cli, RunnerSet};
use catalog_dispatcher::event::{EventQueue, FileEventQueue, QueueConfig};
use catalog_dispatcher::router::Router;
use catalog_dispatcher::shutdown::shutdown_signal;
use catalog_dispatcher::utils::logging::init_logging;
use catalog_dispatcher::worker::EventProcessor;
use catalog_dispatcher::{app, AppState};
use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    // 1. Environment, config file, flags
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = match AppConfig::from_env().and_then(|base| cli.resolve(base)) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    // 2. Logging
    let _guard = init_logging(&config.log_dir);

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Dispatcher stopped with an error");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    // 3. Runners and routes; a broken predicate file is fatal
    let runners = RunnerSet::from_config(&config.runner)?;
    let router = Arc::new(Router::from_config(&config, &runners)?);

    // 4. Queue and worker
    let queue = Arc::new(FileEventQueue::with_config(
        config.queue_dir.clone(),
        QueueConfig {
            max_retries: config.queue_max_retries,
        },
    )?);
    queue.recover().await?;

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = stop_tx.send(true);
    });

    let processor = EventProcessor::new(queue.clone(), router).with_poll_interval(config.worker_poll_interval);
    let worker_stop = stopped(stop_rx.clone());
    let worker = tokio::spawn(async move { processor.run(worker_stop).await });

    // 5. HTTP receiver
    let state = AppState::new(queue, config.receiver_secret.clone());
    let listener = tokio::net::TcpListener::bind(config.bind_address()).await?;
    info!(address = %config.bind_address(), "Receiver listening");

    axum::serve(listener, app(state))
        .with_graceful_shutdown(stopped(stop_rx))
        .await?;

    worker.await?;
    info!("Dispatcher stopped");
    Ok(())
}

/// Resolves once the stop flag flips (or its sender is gone).
async fn stopped(mut rx: watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

