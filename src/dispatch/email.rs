//! Email gateway notification channel.

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

use crate::dispatch::{AlertMessage, ChannelError, NotifyChannel};
use crate::models::ChannelKind;

// ---

/// Sends alert emails through a webhook-style mail gateway.
pub struct EmailChannel {
    gateway_url: Option<String>,
    client: reqwest::Client,
}

impl EmailChannel {
    /// Create the channel. A `None` gateway URL leaves it disabled.
    pub fn new(gateway_url: Option<String>) -> EmailChannel {
        // ---
        if gateway_url.is_some() {
            debug!("Email notifications enabled");
        } else {
            debug!("Email notifications disabled (EMAIL_GATEWAY_URL not set)");
        }

        EmailChannel {
            gateway_url,
            client: reqwest::Client::new(),
        }
    }

    fn format_payload(message: &AlertMessage) -> EmailPayload {
        // ---
        EmailPayload {
            to: message.emails.clone(),
            subject: message.headline(),
            body: message.body(),
        }
    }
}

#[async_trait]
impl NotifyChannel for EmailChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Email
    }

    fn enabled(&self) -> bool {
        self.gateway_url.is_some()
    }

    async fn send(&self, message: &AlertMessage) -> Result<(), ChannelError> {
        // ---
        let gateway_url = self
            .gateway_url
            .as_ref()
            .ok_or_else(|| ChannelError::NotConfigured("EMAIL_GATEWAY_URL".to_string()))?;

        if message.emails.is_empty() {
            return Err(ChannelError::NotConfigured(
                "no email recipients for this alert".to_string(),
            ));
        }

        let payload = Self::format_payload(message);

        debug!(
            "Sending email for alert {} to {} recipient(s)",
            message.alert_id,
            payload.to.len()
        );

        let response = self.client.post(gateway_url).json(&payload).send().await?;

        if response.status().is_success() {
            debug!("Email gateway accepted alert {}", message.alert_id);
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();

            warn!(
                "Email gateway request failed with {} for alert {}: {}",
                status, message.alert_id, body
            );

            Err(ChannelError::Gateway(format!("{status}: {body}")))
        }
    }
}

// ---

#[derive(Debug, Serialize)]
struct EmailPayload {
    to: Vec<String>,
    subject: String,
    body: String,
}
