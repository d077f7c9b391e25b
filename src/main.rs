//! Lingotutor - adaptive Telegram language tutor
//!
//! Webhook server plus operational commands; see `lingotutor --help`.

use lingotutor::cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // INFO by default; RUST_LOG overrides.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    cli::run().await
}
