use std::sync::Arc;

use eyre::{Context, Result};
use parley::{
    cli::Command,
    config::init_logger,
    context::SessionContext,
    models::Event,
    storage::{ArcCredentialStore, MemoryStore, new_store},
};
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> Result<()> {
    let cmd = Command::new();
    if cmd.version() {
        cmd.print_version();
        return Ok(());
    }

    better_panic::install();

    let config = cmd.get_config()?;
    init_logger(&config.log)?;
    log::debug!("Logger initialized");

    let store: ArcCredentialStore = if cmd.ephemeral() {
        log::debug!("Using in-memory credential store");
        Arc::new(MemoryStore::new())
    } else {
        new_store(&config.storage).wrap_err("initializing credential store")?
    };

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<Event>();
    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            if let Event::SessionExpired = event {
                eprintln!("Session expired, please sign in again");
            }
        }
    });

    let ctx = SessionContext::new(config, store, Some(Arc::new(event_tx)));
    if let Err(err) = cmd.run(&ctx).await {
        log::error!("{:?}", err);
        return Err(err);
    }
    Ok(())
}
