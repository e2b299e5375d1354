//! SMS gateway notification channel.

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

use crate::dispatch::{AlertMessage, ChannelError, NotifyChannel};
use crate::models::ChannelKind;

// ---

/// Sends alert texts through a webhook-style SMS gateway.
pub struct SmsChannel {
    gateway_url: Option<String>,
    client: reqwest::Client,
}

impl SmsChannel {
    /// Create the channel. A `None` gateway URL leaves it disabled.
    pub fn new(gateway_url: Option<String>) -> SmsChannel {
        // ---
        if gateway_url.is_some() {
            debug!("SMS notifications enabled");
        } else {
            debug!("SMS notifications disabled (SMS_GATEWAY_URL not set)");
        }

        SmsChannel {
            gateway_url,
            client: reqwest::Client::new(),
        }
    }

    fn format_payload(message: &AlertMessage) -> SmsPayload {
        // ---
        SmsPayload {
            to: message.phones.clone(),
            message: format!(
                "{}. Latest value {}.",
                message.headline(),
                message.triggering_value
            ),
        }
    }
}

#[async_trait]
impl NotifyChannel for SmsChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Sms
    }

    fn enabled(&self) -> bool {
        self.gateway_url.is_some()
    }

    async fn send(&self, message: &AlertMessage) -> Result<(), ChannelError> {
        // ---
        let gateway_url = self
            .gateway_url
            .as_ref()
            .ok_or_else(|| ChannelError::NotConfigured("SMS_GATEWAY_URL".to_string()))?;

        if message.phones.is_empty() {
            return Err(ChannelError::NotConfigured(
                "no SMS recipients for this alert".to_string(),
            ));
        }

        let payload = Self::format_payload(message);

        debug!(
            "Sending SMS for alert {} to {} recipient(s)",
            message.alert_id,
            payload.to.len()
        );

        let response = self.client.post(gateway_url).json(&payload).send().await?;

        if response.status().is_success() {
            debug!("SMS gateway accepted alert {}", message.alert_id);
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();

            warn!(
                "SMS gateway request failed with {} for alert {}: {}",
                status, message.alert_id, body
            );

            Err(ChannelError::Gateway(format!("{status}: {body}")))
        }
    }
}

// ---

#[derive(Debug, Serialize)]
struct SmsPayload {
    to: Vec<String>,
    message: String,
}
