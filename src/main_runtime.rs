use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use tradegate::config::{ConnectorConfig, LoggingConfig};

/// Console logging plus an optional daily file. `RUST_LOG` overrides the
/// configured level. The returned guard must outlive the process's logging.
pub fn init_logging(connector: &ConnectorConfig, logging: &LoggingConfig) -> Option<WorkerGuard> {
    if !connector.enable_logging {
        return None;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},tradegate={}", connector.log_level, connector.log_level)));

    let console_layer = if logging.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .boxed()
    };

    let (file_layer, guard) = match logging.dir.as_deref().and_then(writable_dir) {
        Some(dir) => {
            // rolling::daily panics when the first file cannot be created
            let appender = tracing_appender::rolling::daily(&dir, "tradegate.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true);
            eprintln!("Logging to: {dir}/tradegate.log");
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init();

    guard
}

/// Warnings only, for one-shot commands.
pub fn init_logging_simple() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .with_writer(std::io::stderr)
        .try_init();
}

fn writable_dir(dir: &str) -> Option<String> {
    if let Err(e) = std::fs::create_dir_all(dir) {
        eprintln!("Warning: could not create log directory {dir} ({e}), file logging disabled");
        return None;
    }
    let marker = std::path::Path::new(dir).join(".tradegate_write_test");
    match std::fs::OpenOptions::new().create(true).append(true).open(&marker) {
        Ok(_) => {
            let _ = std::fs::remove_file(&marker);
            Some(dir.to_string())
        }
        Err(e) => {
            eprintln!("Warning: could not write to log directory {dir} ({e}), file logging disabled");
            None
        }
    }
}
