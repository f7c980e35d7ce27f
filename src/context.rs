#[cfg(test)]
#[path = "context_test.rs"]
mod tests;

use std::sync::Arc;

use crate::{
    chat::Orchestrator,
    config::Configuration,
    models::{ArcEventTx, TestMode},
    session::SessionClient,
    storage::ArcCredentialStore,
    stream::StreamConsumer,
};

/// Owns everything built from one [`Configuration`]. Collaborators receive
/// what they need from here instead of reading global state.
pub struct SessionContext {
    config: Configuration,
    store: ArcCredentialStore,
    client: Arc<SessionClient>,
    streamer: Arc<StreamConsumer>,
}

impl SessionContext {
    pub fn new(
        config: Configuration,
        store: ArcCredentialStore,
        event_tx: Option<ArcEventTx>,
    ) -> Self {
        let test_mode = config.general.test_mode;

        let mut client = SessionClient::new(&config.api.endpoint, Arc::clone(&store))
            .with_test_mode(test_mode);
        if let Some(timeout) = config.api.timeout() {
            client = client.with_timeout(timeout);
        }
        if let Some(event_tx) = event_tx {
            client = client.with_event_tx(event_tx);
        }

        // Replies can take a while, so the stream ignores the REST timeout
        let streamer = StreamConsumer::new(&config.api.endpoint, Arc::clone(&store))
            .with_test_mode(test_mode)
            .with_http_client(client.http_client().clone());

        log::debug!(
            "Session context ready for {} (test mode: {})",
            client.endpoint(),
            test_mode.map(|mode| mode.to_string()).unwrap_or("unset".to_string())
        );

        Self {
            config,
            store,
            client: Arc::new(client),
            streamer: Arc::new(streamer),
        }
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    pub fn test_mode(&self) -> Option<TestMode> {
        self.config.general.test_mode
    }

    pub fn store(&self) -> &ArcCredentialStore {
        &self.store
    }

    pub fn client(&self) -> &Arc<SessionClient> {
        &self.client
    }

    pub fn streamer(&self) -> &Arc<StreamConsumer> {
        &self.streamer
    }

    /// A fresh orchestrator over the shared client and stream consumer.
    pub fn orchestrator(&self) -> Orchestrator {
        Orchestrator::new(self.client.clone(), self.streamer.clone())
    }
}
