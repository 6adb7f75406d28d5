//! The chief keeper lifts the DSChief candidate with the most approvals to
//! be the hat.
//!
//! It polls the Chief at a fixed interval and follows each lift transaction
//! until it is final, replacing it when it gets stuck or reorged out.

#![forbid(unsafe_code)]

use chief_keeper::keeper::ChiefKeeper;
use chief_keeper::settings::load_settings;
use color_eyre::Result;
use tokio::sync::watch;
use tracing::{error, info};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    color_eyre::install()?;

    // Logging is not initialised at this point, so, using `println!`
    println!("Chief keeper starting up...");

    let settings = load_settings()?;
    settings.tracing.start_tracing()?;

    let keeper = ChiefKeeper::from_settings(&settings).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match shutdown_signal().await {
            Ok(signal) => {
                info!(signal, "Shutting down after the current tick");
                let _ = shutdown_tx.send(true);
            }
            Err(err) => {
                error!(?err, "Failed to listen for shutdown signals");
                // dropping the sender would stop the keeper
                std::future::pending::<()>().await;
            }
        }
    });

    keeper.run(shutdown_rx).await;
    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => res.map(|_| "SIGINT"),
        _ = terminate.recv() => Ok("SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await.map(|_| "ctrl-c")
}
