//! Logging initialisation
//!
//! JSON lines go to stdout and to two daily rolling files under the log
//! directory:
//!
//! - `receiver.log.YYYY-MM-DD`: HTTP intake, queue bookkeeping, startup
//! - `worker.log.YYYY-MM-DD`: dispatch, pipeline stages and runner calls
//!
//! Dispatch of a queued event runs inside an [`event_span`], so every line
//! the worker writes for it carries the event and task ids.

use crate::event::ReceiveTask;
use tracing::Span;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::{
    filter::filter_fn, fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer,
};

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_DIRECTIVES: &str =
    "info,catalog_dispatcher=debug,catalog_dispatcher::matcher=info,tower_http=info";

/// Targets whose events belong in the worker log
const WORKER_TARGETS: [&str; 5] = [
    "catalog_dispatcher::worker",
    "catalog_dispatcher::router",
    "catalog_dispatcher::handler",
    "catalog_dispatcher::runner",
    "catalog_dispatcher::matcher",
];

/// Flush guards of the file writers. Keep alive in `main`, otherwise
/// buffered lines are lost on exit.
pub struct LoggingGuard {
    _receiver: WorkerGuard,
    _worker: WorkerGuard,
}

pub fn is_worker_target(target: &str) -> bool {
    WORKER_TARGETS.iter().any(|prefix| {
        target == *prefix || target.strip_prefix(prefix).is_some_and(|rest| rest.starts_with("::"))
    })
}

/// `RUST_LOG` when set and valid, [`DEFAULT_DIRECTIVES`] otherwise.
pub fn env_filter(rust_log: Option<&str>) -> EnvFilter {
    rust_log
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_DIRECTIVES))
}

/// Span wrapping the dispatch of one queued event.
pub fn event_span(task: &ReceiveTask) -> Span {
    tracing::info_span!(
        "event",
        event_id = %task.event_id,
        task_id = %task.id,
        event_type = %task.event_type,
        attempt = task.retry_count + 1,
    )
}

/// Initialise the global subscriber. A second call keeps the first
/// subscriber and only returns fresh guards.
pub fn init_logging(log_dir: &str) -> LoggingGuard {
    let (receiver_writer, receiver_guard) = tracing_appender::non_blocking(rolling::daily(log_dir, "receiver.log"));
    let (worker_writer, worker_guard) = tracing_appender::non_blocking(rolling::daily(log_dir, "worker.log"));

    let stdout_layer = fmt::layer()
        .json()
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .with_current_span(true)
        .flatten_event(false);

    let receiver_layer = fmt::layer()
        .json()
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .with_current_span(true)
        .with_ansi(false)
        .with_writer(receiver_writer)
        .with_filter(filter_fn(|metadata| !is_worker_target(metadata.target())));

    let worker_layer = fmt::layer()
        .json()
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .with_current_span(true)
        .with_span_list(true)
        .with_ansi(false)
        .with_writer(worker_writer)
        .with_filter(filter_fn(|metadata| is_worker_target(metadata.target())));

    let rust_log = std::env::var("RUST_LOG").ok();

    let initialised = tracing_subscriber::registry()
        .with(env_filter(rust_log.as_deref()))
        .with(stdout_layer)
        .with(receiver_layer)
        .with(worker_layer)
        .try_init();
    if let Err(err) = initialised {
        use std::error::Error;
        let already_set = err
            .source()
            .and_then(|s| s.downcast_ref::<tracing::dispatcher::SetGlobalDefaultError>())
            .is_some();
        if !already_set {
            eprintln!("Failed to initialize tracing: {}", err);
        }
    }

    LoggingGuard {
        _receiver: receiver_guard,
        _worker: worker_guard,
    }
}
