//! Tracing setup.

use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Install a console subscriber filtered by `RUST_LOG`, falling back to a
/// level picked from the environment name.
///
/// Safe to call more than once, and a no-op if the host application already
/// installed a global subscriber.
pub fn init_tracing() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = current_environment();
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_level(&environment)));

        let subscriber = tracing_subscriber::registry().with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_filter(filter),
        );

        if subscriber.try_init().is_err() {
            tracing::debug!("Global tracing subscriber already initialized, keeping it");
            return;
        }

        tracing::info!(environment = %environment, "Tracing initialized");
    });
}

/// Environment name from `AGENTIC_A2A_ENV` or `APP_ENV`, default `development`.
pub fn current_environment() -> String {
    std::env::var("AGENTIC_A2A_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

fn default_level(environment: &str) -> &'static str {
    match environment {
        "production" => "info",
        "test" => "warn",
        _ => "debug",
    }
}
