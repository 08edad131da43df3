//! wallet-session: connect a wallet from the terminal and sign a login challenge

use std::sync::Arc;

use wallet_session_adapters::SessionAdapterConfig;

mod console;
mod session_bridge;

use console::{ConsoleChooser, ConsolePairingDisplay, PromptSlot};
use session_bridge::SessionBridge;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("Starting wallet-session");

    let config = SessionAdapterConfig::from_env();
    let prompts = PromptSlot::default();
    let bridge = SessionBridge::new(
        &config,
        Arc::new(ConsoleChooser::new(prompts.clone())),
        Arc::new(ConsolePairingDisplay),
    )?;

    console::run(bridge, prompts).await
}
