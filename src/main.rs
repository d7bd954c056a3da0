//! Application entry point — voice-stream CLI host.
//!
//! # Startup sequence
//!
//! 1. Initialise logging.
//! 2. Load [`AppConfig`] from disk (returns default on first run).
//! 3. Create the tokio runtime.
//! 4. Create result/fault channels and the [`SessionController`].
//! 5. Enable the configured source and pump events: committed utterances go
//!    to stdout, interim updates to the log, faults end the run.
//! 6. Ctrl-C stops the source and exits cleanly.

use anyhow::Result;
use tokio::sync::mpsc;

use voice_stream::{
    config::AppConfig, SessionController, SourceFault, Transcript,
};

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log::info!("voice-stream starting up");

    // 2. Configuration
    let config = AppConfig::load().unwrap_or_else(|e| {
        log::warn!("Failed to load config ({e}); using defaults");
        AppConfig::default()
    });
    log::info!("configured source: {}", config.source);

    // 3–4. Channels and controller
    let (result_tx, mut result_rx) = mpsc::unbounded_channel::<Transcript>();
    let (fault_tx, mut fault_rx) = mpsc::unbounded_channel::<SourceFault>();
    let mut controller = SessionController::new(config, result_tx, fault_tx);

    // 5. Start listening
    controller.enable()?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                log::info!("shutting down");
                controller.disable()?;
                return Ok(());
            }
            transcript = result_rx.recv() => {
                let Some(t) = transcript else {
                    return Ok(());
                };
                if t.is_endpoint {
                    println!("{}", t.text);
                } else {
                    log::debug!("[{}] {}{}", t.segment_id, t.text, if t.is_final { "" } else { " …" });
                }
            }
            fault = fault_rx.recv() => {
                let Some(fault) = fault else {
                    return Ok(());
                };
                controller.notify_fault(&fault);
                anyhow::bail!("transcription stopped: {fault}");
            }
        }
    }
}
