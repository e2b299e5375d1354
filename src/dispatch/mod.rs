//! Asynchronous notification delivery for alert events.
//!
//! The dispatcher is fire-and-forget from the ingestion path's perspective:
//! `notify` spawns a tracked delivery task and returns immediately. Each task
//! walks the configured channels in order (SMS first, EMAIL as fallback),
//! retries every channel with exponential backoff and a bounded per-try
//! timeout, and appends one audit row per try. Delivery failure never reaches
//! the ingestion caller; total failure is flagged on the alert record.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::alerts::AlertEvent;
use crate::models::{
    AttemptOutcome, ChannelKind, Farm, NotificationAttempt, SensorAlert, SensorType,
};
use crate::store::AlertStore;

mod email;
mod sms;

pub use email::EmailChannel;
pub use sms::SmsChannel;

// ---

/// Errors a delivery channel can fail with.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Channel has no gateway URL or no recipients
    #[error("Channel not configured: {0}")]
    NotConfigured(String),

    /// Gateway answered with a non-success status
    #[error("Gateway rejected the request: {0}")]
    Gateway(String),

    /// The per-try send timeout elapsed
    #[error("Send timed out after {0}s")]
    TimedOut(u64),
}

/// Trait for notification delivery channels (SMS, EMAIL, ...).
#[async_trait]
pub trait NotifyChannel: Send + Sync {
    /// Which audit-trail channel this implementation reports as.
    fn kind(&self) -> ChannelKind;

    /// Check if this channel is enabled/configured.
    fn enabled(&self) -> bool;

    /// Deliver one alert message to this channel's recipients.
    async fn send(&self, message: &AlertMessage) -> Result<(), ChannelError>;
}

// ---

/// Everything a channel needs to render and address one notification.
#[derive(Debug, Clone)]
pub struct AlertMessage {
    pub alert_id: Uuid,
    pub farm_id: Uuid,
    pub farm_name: String,
    pub sensor_type: SensorType,
    pub triggering_value: f64,
    pub opened_at: chrono::DateTime<Utc>,
    pub event: AlertEvent,
    /// Snapshot of the alert's exhausted-delivery flag, so a successful
    /// delivery knows to clear it.
    pub notification_failed: bool,
    pub phones: Vec<String>,
    pub emails: Vec<String>,
}

impl AlertMessage {
    /// Assemble the message for an alert event. Recipients are the farm
    /// owner's contacts plus the always-notified admin contacts.
    pub fn build(
        farm: &Farm,
        alert: &SensorAlert,
        event: AlertEvent,
        admin_phone: Option<&str>,
        admin_email: Option<&str>,
    ) -> AlertMessage {
        // ---
        let mut phones = Vec::new();
        if let Some(phone) = &farm.owner_phone {
            phones.push(phone.clone());
        }
        if let Some(phone) = admin_phone {
            if !phones.iter().any(|p| p == phone) {
                phones.push(phone.to_string());
            }
        }

        let mut emails = Vec::new();
        if let Some(email) = &farm.owner_email {
            emails.push(email.clone());
        }
        if let Some(email) = admin_email {
            if !emails.iter().any(|e| e == email) {
                emails.push(email.to_string());
            }
        }

        AlertMessage {
            alert_id: alert.alert_id,
            farm_id: alert.farm_id,
            farm_name: farm.name.clone(),
            sensor_type: alert.sensor_type,
            triggering_value: alert.triggering_value,
            opened_at: alert.opened_at,
            event,
            notification_failed: alert.notification_failed,
            phones,
            emails,
        }
    }

    pub fn headline(&self) -> String {
        // ---
        match self.event {
            AlertEvent::NewCritical => {
                format!("CRITICAL {} alert for {}", self.sensor_type, self.farm_name)
            }
            AlertEvent::Escalation => {
                format!("{} still critical for {}", self.sensor_type, self.farm_name)
            }
        }
    }

    pub fn body(&self) -> String {
        // ---
        let opened = self.opened_at.format("%Y-%m-%d %H:%M:%S UTC");
        match self.event {
            AlertEvent::NewCritical => format!(
                "Farm {}: {} reading {} crossed the critical threshold at {}.",
                self.farm_name, self.sensor_type, self.triggering_value, opened
            ),
            AlertEvent::Escalation => format!(
                "Farm {}: {} is still critical (latest value {}). Alert open since {}.",
                self.farm_name, self.sensor_type, self.triggering_value, opened
            ),
        }
    }
}

// ---

/// Retry schedule for one channel: geometric backoff, capped.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        // ---
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            multiplier: 4.0,
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after the given (1-based) failed attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        // ---
        let factor = self.multiplier.powi(attempt.saturating_sub(1) as i32);
        let secs = self.base_delay.as_secs_f64() * factor;
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }
}

// ---

/// Central notification dispatcher.
///
/// Owns the channel list (in fallback order), the retry policy, and the set
/// of in-flight delivery tasks.
pub struct Dispatcher {
    channels: Vec<Arc<dyn NotifyChannel>>,
    alerts: Arc<dyn AlertStore>,
    retry: RetryPolicy,
    send_timeout: Duration,
    admin_phone: Option<String>,
    admin_email: Option<String>,
    tasks: AsyncMutex<JoinSet<()>>,
}

impl Dispatcher {
    pub fn new(
        channels: Vec<Arc<dyn NotifyChannel>>,
        alerts: Arc<dyn AlertStore>,
        retry: RetryPolicy,
        send_timeout: Duration,
        admin_phone: Option<String>,
        admin_email: Option<String>,
    ) -> Dispatcher {
        // ---
        if channels.iter().all(|c| !c.enabled()) {
            warn!("No notification channels configured; alert deliveries will be flagged failed");
        }

        Dispatcher {
            channels,
            alerts,
            retry,
            send_timeout,
            admin_phone,
            admin_email,
            tasks: AsyncMutex::new(JoinSet::new()),
        }
    }

    /// Spawn delivery for an alert event (fire-and-forget).
    ///
    /// Returns as soon as the task is tracked; delivery errors are logged
    /// and audited, never propagated.
    pub async fn notify(&self, farm: &Farm, alert: &SensorAlert, event: AlertEvent) {
        // ---
        let message = AlertMessage::build(
            farm,
            alert,
            event,
            self.admin_phone.as_deref(),
            self.admin_email.as_deref(),
        );

        let channels = self.channels.clone();
        let alerts = Arc::clone(&self.alerts);
        let retry = self.retry;
        let send_timeout = self.send_timeout;

        let mut tasks = self.tasks.lock().await;

        // Reap already-finished deliveries so the set stays small.
        while let Some(finished) = tasks.try_join_next() {
            if let Err(e) = finished {
                warn!("Notification task panicked: {e}");
            }
        }

        tasks.spawn(async move {
            deliver(channels, alerts, retry, send_timeout, message).await;
        });
    }

    /// Run a delivery inline and report which channel succeeded, if any.
    ///
    /// Same logic as the spawned path; used where delivery confirmation is
    /// needed (tests, manual re-sends).
    pub async fn notify_and_wait(
        &self,
        farm: &Farm,
        alert: &SensorAlert,
        event: AlertEvent,
    ) -> Option<ChannelKind> {
        // ---
        let message = AlertMessage::build(
            farm,
            alert,
            event,
            self.admin_phone.as_deref(),
            self.admin_email.as_deref(),
        );

        deliver(
            self.channels.clone(),
            Arc::clone(&self.alerts),
            self.retry,
            self.send_timeout,
            message,
        )
        .await
    }

    /// Wait for every in-flight delivery to finish.
    pub async fn drain(&self) {
        // ---
        let mut tasks = self.tasks.lock().await;
        while let Some(finished) = tasks.join_next().await {
            if let Err(e) = finished {
                warn!("Notification task panicked: {e}");
            }
        }
    }

    /// Let in-flight deliveries finish within the grace window, then abandon
    /// the rest.
    pub async fn shutdown(&self, grace: Duration) {
        // ---
        let mut tasks = self.tasks.lock().await;
        let deadline = tokio::time::Instant::now() + grace;

        loop {
            match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(finished)) => {
                    if let Err(e) = finished {
                        warn!("Notification task panicked: {e}");
                    }
                }
                Ok(None) => {
                    debug!("All notification deliveries drained");
                    return;
                }
                Err(_) => {
                    warn!(
                        "Abandoning {} in-flight notification deliveries at shutdown",
                        tasks.len()
                    );
                    tasks.abort_all();
                    return;
                }
            }
        }
    }
}

// ---

/// Walk the channels in fallback order until one delivers.
///
/// Every try writes its audit row in the same step its send resolves, so an
/// attempt is never left unrecorded short of hard task abandonment.
async fn deliver(
    channels: Vec<Arc<dyn NotifyChannel>>,
    alerts: Arc<dyn AlertStore>,
    retry: RetryPolicy,
    send_timeout: Duration,
    message: AlertMessage,
) -> Option<ChannelKind> {
    // ---
    for channel in &channels {
        if !channel.enabled() {
            debug!(
                "Channel {} disabled, skipping for alert {}",
                channel.kind(),
                message.alert_id
            );
            continue;
        }

        if try_channel(channel.as_ref(), &alerts, retry, send_timeout, &message).await {
            info!(
                "Alert {} delivered via {}",
                message.alert_id,
                channel.kind()
            );
            if message.notification_failed {
                // Delivery recovered; clear the exhausted flag.
                if let Err(e) = alerts
                    .mark_notification_failed(message.alert_id, false)
                    .await
                {
                    warn!("Failed to clear notification flag: {e}");
                }
            }
            return Some(channel.kind());
        }
    }

    error!(
        "All notification channels exhausted for alert {} ({} for {})",
        message.alert_id, message.sensor_type, message.farm_name
    );
    if let Err(e) = alerts.mark_notification_failed(message.alert_id, true).await {
        warn!("Failed to flag notification failure: {e}");
    }
    None
}

/// Retry one channel up to the policy limit. Returns true on delivery.
async fn try_channel(
    channel: &dyn NotifyChannel,
    alerts: &Arc<dyn AlertStore>,
    retry: RetryPolicy,
    send_timeout: Duration,
    message: &AlertMessage,
) -> bool {
    // ---
    for attempt in 1..=retry.max_attempts {
        let attempted_at = Utc::now();
        let result = match tokio::time::timeout(send_timeout, channel.send(message)).await {
            Ok(result) => result,
            Err(_) => Err(ChannelError::TimedOut(send_timeout.as_secs())),
        };

        let (outcome, error_detail) = match &result {
            Ok(()) => (AttemptOutcome::Sent, None),
            Err(e) => (AttemptOutcome::Failed, Some(e.to_string())),
        };
        let row = NotificationAttempt {
            alert_id: message.alert_id,
            channel: channel.kind(),
            attempted_at,
            outcome,
            error_detail,
        };
        if let Err(e) = alerts.record_attempt(&row).await {
            warn!("Failed to record notification attempt: {e}");
        }

        match result {
            Ok(()) => return true,
            Err(e) => {
                warn!(
                    "Channel {} attempt {}/{} failed for alert {}: {e}",
                    channel.kind(),
                    attempt,
                    retry.max_attempts,
                    message.alert_id
                );
                if attempt < retry.max_attempts {
                    tokio::time::sleep(retry.delay_for(attempt)).await;
                }
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::models::{ReadingStatus, SensorReading};
    use crate::store::MemoryStore;
    use std::sync::atomic::{AtomicU32, Ordering};

    enum Behavior {
        Succeed,
        FailAlways,
        /// Fail this many times, then succeed.
        FailFirst(u32),
        Hang,
    }

    struct TestChannel {
        kind: ChannelKind,
        enabled: bool,
        behavior: Behavior,
        calls: AtomicU32,
    }

    impl TestChannel {
        fn new(kind: ChannelKind, behavior: Behavior) -> Arc<TestChannel> {
            // ---
            Arc::new(TestChannel {
                kind,
                enabled: true,
                behavior,
                calls: AtomicU32::new(0),
            })
        }

        fn disabled(kind: ChannelKind) -> Arc<TestChannel> {
            // ---
            Arc::new(TestChannel {
                kind,
                enabled: false,
                behavior: Behavior::Succeed,
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl NotifyChannel for TestChannel {
        fn kind(&self) -> ChannelKind {
            self.kind
        }

        fn enabled(&self) -> bool {
            self.enabled
        }

        async fn send(&self, _message: &AlertMessage) -> Result<(), ChannelError> {
            // ---
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            match self.behavior {
                Behavior::Succeed => Ok(()),
                Behavior::FailAlways => Err(ChannelError::Gateway("boom".to_string())),
                Behavior::FailFirst(n) if call <= n => {
                    Err(ChannelError::Gateway("boom".to_string()))
                }
                Behavior::FailFirst(_) => Ok(()),
                Behavior::Hang => {
                    std::future::pending::<()>().await;
                    unreachable!()
                }
            }
        }
    }

    async fn fixture(store: &Arc<MemoryStore>) -> (Farm, SensorAlert) {
        // ---
        let farm = Farm {
            farm_id: Uuid::new_v4(),
            name: "North Field".to_string(),
            owner_phone: Some("+15550001111".to_string()),
            owner_email: Some("owner@northfield.example".to_string()),
        };
        let reading = SensorReading {
            reading_id: Uuid::new_v4(),
            farm_id: farm.farm_id,
            sensor_type: SensorType::Temperature,
            value: 50.0,
            unit: "°C".to_string(),
            recorded_at: Utc::now(),
            status: ReadingStatus::Critical,
            notes: None,
        };
        let alert = SensorAlert::open(&reading);
        store.create_alert(&alert).await.unwrap();
        (farm, alert)
    }

    fn dispatcher(
        store: Arc<MemoryStore>,
        channels: Vec<Arc<dyn NotifyChannel>>,
    ) -> Dispatcher {
        // ---
        Dispatcher::new(
            channels,
            store,
            RetryPolicy::default(),
            Duration::from_secs(5),
            None,
            None,
        )
    }

    #[test]
    fn test_backoff_schedule() {
        // ---
        let retry = RetryPolicy::default();
        assert_eq!(retry.delay_for(1), Duration::from_secs(1));
        assert_eq!(retry.delay_for(2), Duration::from_secs(4));
        assert_eq!(retry.delay_for(3), Duration::from_secs(16));
        // Capped at the policy maximum.
        assert_eq!(retry.delay_for(5), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_channel_success_ends_delivery() {
        // ---
        let store = Arc::new(MemoryStore::new());
        let sms = TestChannel::new(ChannelKind::Sms, Behavior::Succeed);
        let email = TestChannel::new(ChannelKind::Email, Behavior::Succeed);
        let d = dispatcher(store.clone(), vec![sms.clone(), email.clone()]);

        let (farm, alert) = fixture(&store).await;
        let delivered = d.notify_and_wait(&farm, &alert, AlertEvent::NewCritical).await;

        assert_eq!(delivered, Some(ChannelKind::Sms));
        assert_eq!(sms.calls(), 1);
        assert_eq!(email.calls(), 0);

        let attempts = store.attempts_for(alert.alert_id).await.unwrap();
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].channel, ChannelKind::Sms);
        assert_eq!(attempts[0].outcome, AttemptOutcome::Sent);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sms_failure_falls_back_to_email() {
        // ---
        let store = Arc::new(MemoryStore::new());
        let sms = TestChannel::new(ChannelKind::Sms, Behavior::FailAlways);
        let email = TestChannel::new(ChannelKind::Email, Behavior::Succeed);
        let d = dispatcher(store.clone(), vec![sms.clone(), email.clone()]);

        let (farm, alert) = fixture(&store).await;
        let delivered = d.notify_and_wait(&farm, &alert, AlertEvent::NewCritical).await;

        assert_eq!(delivered, Some(ChannelKind::Email));
        assert_eq!(sms.calls(), 3);
        assert_eq!(email.calls(), 1);

        let attempts = store.attempts_for(alert.alert_id).await.unwrap();
        assert_eq!(attempts.len(), 4);
        assert!(attempts[..3]
            .iter()
            .all(|a| a.channel == ChannelKind::Sms && a.outcome == AttemptOutcome::Failed));
        assert_eq!(attempts[3].channel, ChannelKind::Email);
        assert_eq!(attempts[3].outcome, AttemptOutcome::Sent);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_within_channel_before_fallback() {
        // ---
        let store = Arc::new(MemoryStore::new());
        let sms = TestChannel::new(ChannelKind::Sms, Behavior::FailFirst(2));
        let email = TestChannel::new(ChannelKind::Email, Behavior::Succeed);
        let d = dispatcher(store.clone(), vec![sms.clone(), email.clone()]);

        let (farm, alert) = fixture(&store).await;
        let delivered = d.notify_and_wait(&farm, &alert, AlertEvent::NewCritical).await;

        // Third SMS try lands; EMAIL is never consulted.
        assert_eq!(delivered, Some(ChannelKind::Sms));
        assert_eq!(sms.calls(), 3);
        assert_eq!(email.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_total_failure_flags_alert() {
        // ---
        let store = Arc::new(MemoryStore::new());
        let (farm, alert) = fixture(&store).await;

        let sms = TestChannel::new(ChannelKind::Sms, Behavior::FailAlways);
        let email = TestChannel::new(ChannelKind::Email, Behavior::FailAlways);
        let d = dispatcher(store.clone(), vec![sms, email]);

        let delivered = d.notify_and_wait(&farm, &alert, AlertEvent::NewCritical).await;
        assert_eq!(delivered, None);

        let attempts = store.attempts_for(alert.alert_id).await.unwrap();
        assert_eq!(attempts.len(), 6);
        assert!(attempts.iter().all(|a| a.outcome == AttemptOutcome::Failed));

        let stored = store.get_alert(alert.alert_id).await.unwrap().unwrap();
        assert!(stored.notification_failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_channel_is_skipped() {
        // ---
        let store = Arc::new(MemoryStore::new());
        let sms = TestChannel::disabled(ChannelKind::Sms);
        let email = TestChannel::new(ChannelKind::Email, Behavior::Succeed);
        let d = dispatcher(store.clone(), vec![sms.clone(), email.clone()]);

        let (farm, alert) = fixture(&store).await;
        let delivered = d.notify_and_wait(&farm, &alert, AlertEvent::NewCritical).await;

        assert_eq!(delivered, Some(ChannelKind::Email));
        assert_eq!(sms.calls(), 0);

        // No audit rows for a skipped channel.
        let attempts = store.attempts_for(alert.alert_id).await.unwrap();
        assert!(attempts.iter().all(|a| a.channel == ChannelKind::Email));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_send_times_out() {
        // ---
        let store = Arc::new(MemoryStore::new());
        let sms = TestChannel::new(ChannelKind::Sms, Behavior::Hang);
        let email = TestChannel::new(ChannelKind::Email, Behavior::Succeed);
        let d = dispatcher(store.clone(), vec![sms, email]);

        let (farm, alert) = fixture(&store).await;
        let delivered = d.notify_and_wait(&farm, &alert, AlertEvent::NewCritical).await;

        assert_eq!(delivered, Some(ChannelKind::Email));
        let attempts = store.attempts_for(alert.alert_id).await.unwrap();
        let timed_out: Vec<_> = attempts
            .iter()
            .filter(|a| a.channel == ChannelKind::Sms)
            .collect();
        assert_eq!(timed_out.len(), 3);
        assert!(timed_out
            .iter()
            .all(|a| a.error_detail.as_deref().unwrap_or("").contains("timed out")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_clears_failed_flag() {
        // ---
        let store = Arc::new(MemoryStore::new());
        let (farm, mut alert) = fixture(&store).await;
        store
            .mark_notification_failed(alert.alert_id, true)
            .await
            .unwrap();
        alert.notification_failed = true;

        let sms = TestChannel::new(ChannelKind::Sms, Behavior::Succeed);
        let d = dispatcher(store.clone(), vec![sms]);

        let delivered = d.notify_and_wait(&farm, &alert, AlertEvent::Escalation).await;
        assert_eq!(delivered, Some(ChannelKind::Sms));

        let stored = store.get_alert(alert.alert_id).await.unwrap().unwrap();
        assert!(!stored.notification_failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fire_and_forget_then_drain() {
        // ---
        let store = Arc::new(MemoryStore::new());
        let sms = TestChannel::new(ChannelKind::Sms, Behavior::Succeed);
        let d = dispatcher(store.clone(), vec![sms.clone()]);

        let (farm, alert) = fixture(&store).await;
        d.notify(&farm, &alert, AlertEvent::NewCritical).await;
        d.drain().await;

        assert_eq!(sms.calls(), 1);
        let attempts = store.attempts_for(alert.alert_id).await.unwrap();
        assert_eq!(attempts.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_message_recipients_merge_owner_and_admin() {
        // ---
        let farm = Farm {
            farm_id: Uuid::new_v4(),
            name: "North Field".to_string(),
            owner_phone: Some("+15550001111".to_string()),
            owner_email: None,
        };
        let reading = SensorReading {
            reading_id: Uuid::new_v4(),
            farm_id: farm.farm_id,
            sensor_type: SensorType::Temperature,
            value: 50.0,
            unit: "°C".to_string(),
            recorded_at: Utc::now(),
            status: ReadingStatus::Critical,
            notes: None,
        };
        let alert = SensorAlert::open(&reading);

        let message = AlertMessage::build(
            &farm,
            &alert,
            AlertEvent::NewCritical,
            Some("+15559998888"),
            Some("admin@farmwatch.example"),
        );

        assert_eq!(message.phones.len(), 2);
        assert_eq!(message.emails, vec!["admin@farmwatch.example".to_string()]);
        assert!(message.headline().contains("TEMPERATURE"));
        assert!(message.body().contains("North Field"));
    }
}
