// Logging setup
//
// Console output plus a daily rolling file under <data_dir>/logs.
// RUST_LOG overrides the configured level.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, EnvFilter};

const LOG_DIR: &str = "logs";
const LOG_FILE_PREFIX: &str = "reconcilor.log";

/// Install the global subscriber. Keep the returned guard alive so buffered
/// file output is flushed on exit.
pub fn init_logger(data_dir: &Path, default_level: &str) -> anyhow::Result<WorkerGuard> {
    let log_dir = data_dir.join(LOG_DIR);
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::daily(&log_dir, LOG_FILE_PREFIX);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(build_default_filter(default_level)));

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false),
        );

    // Bridge `log` records from dependencies
    tracing_log::LogTracer::init()?;
    tracing::subscriber::set_global_default(subscriber)?;

    tracing::info!("Logger initialised, writing to {}", log_dir.display());
    Ok(guard)
}

fn build_default_filter(level: &str) -> String {
    let level = match level.trim().to_lowercase().as_str() {
        l @ ("trace" | "debug" | "info" | "warn" | "error") => l.to_string(),
        _ => "info".to_string(),
    };
    format!("account_reconcilor={level},account_reconcilor_lib={level},warn")
}

/// Mask an email for log output
pub fn mask_email(email: &str) -> String {
    if let Some(at_pos) = email.find('@') {
        let local = &email[..at_pos];
        let domain = &email[at_pos + 1..];
        let local_prefix: String = local.chars().take(3).collect();
        let domain_prefix: String = domain.chars().take(2).collect();
        format!("{}***@{}***", local_prefix, domain_prefix)
    } else {
        let prefix: String = email.chars().take(5).collect();
        format!("{}***", prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_email() {
        assert_eq!(mask_email("user@gmail.com"), "use***@gm***");
        assert_eq!(mask_email("ab@x.io"), "ab***@x.***");
        assert_eq!(mask_email("no-at-sign"), "no-at***");
    }

    #[test]
    fn test_default_filter_falls_back_to_info() {
        assert_eq!(
            build_default_filter("LOUD"),
            "account_reconcilor=info,account_reconcilor_lib=info,warn"
        );
        assert!(build_default_filter(" Debug ").starts_with("account_reconcilor=debug"));
    }
}
