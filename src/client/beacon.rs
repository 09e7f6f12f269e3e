use std::sync::Arc;

use reqwest::Method;

use crate::{client::HttpProgressClient, models::ProgressUpdate, store::ProgressStore};

/// Fire-and-forget delivery channel used when a page is hidden or unloading
///
/// `send` returns immediately; delivery is not guaranteed and no response is
/// awaited by the caller.
pub trait Beacon: Send + Sync {
    fn send(&self, update: ProgressUpdate);
}

/// Posts updates to the service's beacon endpoint on a detached task
pub struct HttpBeacon {
    client: HttpProgressClient,
}

impl HttpBeacon {
    pub fn new(client: HttpProgressClient) -> Self {
        Self { client }
    }
}

impl Beacon for HttpBeacon {
    fn send(&self, update: ProgressUpdate) {
        let request = self
            .client
            .request(Method::POST, "/api/video/update-progress")
            .json(&update);

        tokio::spawn(async move {
            if let Err(e) = request.send().await {
                tracing::debug!(error = %e, key = %update.key, "Beacon delivery failed");
            }
        });
    }
}

/// Writes beacon payloads straight into a store on a detached task
///
/// Used when the agent runs next to the store rather than over HTTP.
pub struct StoreBeacon {
    store: Arc<dyn ProgressStore>,
}

impl StoreBeacon {
    pub fn new(store: Arc<dyn ProgressStore>) -> Self {
        Self { store }
    }
}

impl Beacon for StoreBeacon {
    fn send(&self, update: ProgressUpdate) {
        let store = self.store.clone();
        tokio::spawn(async move {
            let key = update.key.clone();
            if let Err(e) = store.upsert_progress(update).await {
                tracing::debug!(error = %e, key = %key, "Beacon delivery failed");
            }
        });
    }
}
