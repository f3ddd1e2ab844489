//! Post-deploy webhook

use hoist_core::dto::event::DeployEvent;
use reqwest::Client;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{RemoteError, Result};

/// Posts [`DeployEvent`]s to a configured URL
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    url: String,
    timeout: Duration,
    client: Client,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self::with_client(url, timeout, Client::new())
    }

    pub fn with_client(url: impl Into<String>, timeout: Duration, client: Client) -> Self {
        Self {
            url: url.into(),
            timeout,
            client,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Posts the event and waits for the response
    pub async fn send(&self, event: &DeployEvent) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .json(event)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() >= 400 {
            return Err(RemoteError::Status {
                url: self.url.clone(),
                status: status.as_u16(),
            });
        }

        debug!(url = %self.url, status = status.as_u16(), "Webhook delivered");
        Ok(())
    }

    /// Posts the event on a detached task
    ///
    /// Delivery failures are logged and never reach the caller. The handle
    /// may be awaited before process exit so in-flight deliveries finish.
    pub fn fire(&self, event: DeployEvent) -> JoinHandle<()> {
        let notifier = self.clone();
        tokio::spawn(async move {
            if let Err(e) = notifier.send(&event).await {
                warn!(url = %notifier.url, "Post-deploy hook failed: {}", e);
            }
        })
    }
}
