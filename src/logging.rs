use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// stdout carries the protocol, so everything goes to stderr.
pub fn init_tracing(level: &str) {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("schoold={level}").into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_ansi(false),
        )
        .try_init();
}
