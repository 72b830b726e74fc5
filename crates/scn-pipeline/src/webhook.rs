//! Subscriber notification, fired only when a run produced a new artifact.

use chrono::{DateTime, Utc};
use scn_core::WebhookEndpoint;
use serde::Serialize;
use tracing::{info, warn};

pub const WEBHOOK_SECRET_HEADER: &str = "X-Webhook-Secret";

#[derive(Debug, Clone, Serialize)]
pub struct WebhookPayload {
    pub created_at: DateTime<Utc>,
    pub llms_txt_url: String,
}

#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// POST the payload to every endpoint. Delivery failures are logged and
    /// swallowed: notification can never affect run status. Returns the
    /// number of successful deliveries.
    pub async fn notify_all(
        &self,
        endpoints: &[WebhookEndpoint],
        payload: &WebhookPayload,
    ) -> usize {
        let mut delivered = 0;
        for endpoint in endpoints {
            match self.notify_one(endpoint, payload).await {
                Ok(status) => {
                    info!(url = %endpoint.url, status, "webhook delivered");
                    delivered += 1;
                }
                Err(err) => {
                    warn!(url = %endpoint.url, error = %err, "webhook delivery failed");
                }
            }
        }
        delivered
    }

    async fn notify_one(
        &self,
        endpoint: &WebhookEndpoint,
        payload: &WebhookPayload,
    ) -> Result<u16, reqwest::Error> {
        let mut request = self.client.post(&endpoint.url).json(payload);
        if let Some(secret) = &endpoint.secret {
            request = request.header(WEBHOOK_SECRET_HEADER, secret);
        }
        let response = request.send().await?;
        let status = response.status();
        response.error_for_status()?;
        Ok(status.as_u16())
    }
}
