//! Alert lifecycle decisions for classified readings.
//!
//! One manager instance owns every (farm, sensor) alert key. All
//! read-check-create/update sequences for a key run under that key's async
//! mutex, so two concurrent CRITICAL submissions can never open two alerts
//! for the same pair. The per-key lock covers only the store sequence;
//! notification dispatch happens outside it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::{ReadingStatus, SensorAlert, SensorReading, SensorType};
use crate::store::{AlertStore, CreateAlertOutcome, StoreError};

// ---

/// Why the dispatcher is being asked to notify.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertEvent {
    /// A new alert was just opened.
    NewCritical,
    /// An existing alert re-notified after its cooldown elapsed.
    Escalation,
}

/// Outcome of feeding one reading through the alert state machine.
#[derive(Debug, Clone)]
pub enum AlertDecision {
    /// Reading did not touch alert state.
    None,
    /// A new alert was opened for the key.
    Opened(SensorAlert),
    /// An active alert absorbed another critical reading. `notify` is true
    /// when this escalation claimed the cooldown window.
    Escalated { alert: SensorAlert, notify: bool },
    /// A recovery reading closed the key's active alert.
    Resolved(SensorAlert),
}

impl AlertDecision {
    /// Id of the alert left active for the reading's key, if any.
    pub fn active_alert_id(&self) -> Option<Uuid> {
        // ---
        match self {
            AlertDecision::Opened(alert) => Some(alert.alert_id),
            AlertDecision::Escalated { alert, .. } => Some(alert.alert_id),
            AlertDecision::None | AlertDecision::Resolved(_) => None,
        }
    }

    /// Notification this decision calls for, if any.
    pub fn notification(&self) -> Option<(&SensorAlert, AlertEvent)> {
        // ---
        match self {
            AlertDecision::Opened(alert) => Some((alert, AlertEvent::NewCritical)),
            AlertDecision::Escalated {
                alert,
                notify: true,
            } => Some((alert, AlertEvent::Escalation)),
            _ => None,
        }
    }
}

// ---

/// Serializes alert transitions per (farm, sensor) key and applies the
/// open/escalate/resolve state machine.
pub struct AlertManager {
    store: Arc<dyn AlertStore>,
    cooldown: Duration,
    auto_resolve: bool,
    keys: Mutex<HashMap<(Uuid, SensorType), Arc<AsyncMutex<()>>>>,
}

impl AlertManager {
    pub fn new(store: Arc<dyn AlertStore>, cooldown: Duration, auto_resolve: bool) -> AlertManager {
        // ---
        AlertManager {
            store,
            cooldown,
            auto_resolve,
            keys: Mutex::new(HashMap::new()),
        }
    }

    /// Run one classified reading through the state machine.
    ///
    /// The reading's `recorded_at` is the decision time: cooldown claims and
    /// resolution timestamps anchor to it.
    pub async fn on_reading(&self, reading: &SensorReading) -> Result<AlertDecision, StoreError> {
        // ---
        match reading.status {
            ReadingStatus::Critical => self.on_critical(reading).await,
            ReadingStatus::Normal | ReadingStatus::Warning => self.on_recovery(reading).await,
        }
    }

    async fn on_critical(&self, reading: &SensorReading) -> Result<AlertDecision, StoreError> {
        // ---
        let lock = self.key_lock(reading.farm_id, reading.sensor_type)?;
        let _guard = lock.lock().await;

        // Under the key lock one find/create round is enough; the second
        // round only matters when another instance raced us through the
        // database constraint.
        for _ in 0..2 {
            if let Some(active) = self
                .store
                .find_active(reading.farm_id, reading.sensor_type)
                .await?
            {
                return self.escalate(active, reading).await;
            }

            let alert = SensorAlert::open(reading);
            match self.store.create_alert(&alert).await? {
                CreateAlertOutcome::Created => {
                    info!(
                        "Opened alert {} for farm {} {} (value {})",
                        alert.alert_id, alert.farm_id, alert.sensor_type, alert.triggering_value
                    );
                    return Ok(AlertDecision::Opened(alert));
                }
                CreateAlertOutcome::Conflict => continue,
            }
        }

        warn!(
            "Alert key for farm {} {} kept conflicting; leaving reading {} unattached",
            reading.farm_id, reading.sensor_type, reading.reading_id
        );
        Ok(AlertDecision::None)
    }

    async fn escalate(
        &self,
        active: SensorAlert,
        reading: &SensorReading,
    ) -> Result<AlertDecision, StoreError> {
        // ---
        self.store
            .escalate_alert(active.alert_id, reading.recorded_at, reading.value)
            .await?;

        // Claiming advances `last_notified_at` atomically, so concurrent
        // escalations across instances still notify at most once per window.
        let notify = self
            .store
            .claim_notification(active.alert_id, reading.recorded_at, self.cooldown)
            .await?;

        let mut alert = active;
        alert.last_reading_at = reading.recorded_at;
        alert.triggering_value = reading.value;
        if notify {
            alert.last_notified_at = Some(reading.recorded_at);
            info!(
                "Alert {} escalated with re-notification (value {})",
                alert.alert_id, reading.value
            );
        }

        Ok(AlertDecision::Escalated { alert, notify })
    }

    async fn on_recovery(&self, reading: &SensorReading) -> Result<AlertDecision, StoreError> {
        // ---
        if !self.auto_resolve {
            return Ok(AlertDecision::None);
        }

        let lock = self.key_lock(reading.farm_id, reading.sensor_type)?;
        let _guard = lock.lock().await;

        match self
            .store
            .resolve_active(reading.farm_id, reading.sensor_type, reading.recorded_at)
            .await?
        {
            Some(resolved) => {
                info!(
                    "Auto-resolved alert {} for farm {} {} on {} reading",
                    resolved.alert_id, resolved.farm_id, resolved.sensor_type, reading.status
                );
                Ok(AlertDecision::Resolved(resolved))
            }
            None => Ok(AlertDecision::None),
        }
    }

    fn key_lock(
        &self,
        farm_id: Uuid,
        sensor_type: SensorType,
    ) -> Result<Arc<AsyncMutex<()>>, StoreError> {
        // ---
        let mut keys = self
            .keys
            .lock()
            .map_err(|_| StoreError::Unavailable("alert key registry poisoned".to_string()))?;
        Ok(keys.entry((farm_id, sensor_type)).or_default().clone())
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::models::AlertStatus;
    use crate::store::MemoryStore;
    use chrono::{DateTime, TimeZone, Utc};

    fn manager(store: Arc<MemoryStore>, cooldown_secs: i64, auto_resolve: bool) -> AlertManager {
        // ---
        AlertManager::new(store, Duration::seconds(cooldown_secs), auto_resolve)
    }

    fn ts(min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 14, 9, min, 0).unwrap()
    }

    fn reading(
        farm_id: Uuid,
        sensor: SensorType,
        value: f64,
        status: ReadingStatus,
        at: DateTime<Utc>,
    ) -> SensorReading {
        // ---
        SensorReading {
            reading_id: Uuid::new_v4(),
            farm_id,
            sensor_type: sensor,
            value,
            unit: "°C".to_string(),
            recorded_at: at,
            status,
            notes: None,
        }
    }

    #[tokio::test]
    async fn test_critical_reading_opens_alert() {
        // ---
        let store = Arc::new(MemoryStore::new());
        let manager = manager(store.clone(), 1800, true);
        let farm = Uuid::new_v4();

        let decision = manager
            .on_reading(&reading(
                farm,
                SensorType::Temperature,
                50.0,
                ReadingStatus::Critical,
                ts(0),
            ))
            .await
            .unwrap();

        let (alert, event) = decision.notification().expect("opening must notify");
        assert_eq!(event, AlertEvent::NewCritical);
        assert_eq!(alert.triggering_value, 50.0);
        assert_eq!(decision.active_alert_id(), Some(alert.alert_id));

        let stored = store
            .find_active(farm, SensorType::Temperature)
            .await
            .unwrap()
            .expect("alert persisted");
        assert_eq!(stored.status, AlertStatus::Open);
    }

    #[tokio::test]
    async fn test_escalation_within_cooldown_is_silent() {
        // ---
        let store = Arc::new(MemoryStore::new());
        let manager = manager(store.clone(), 1800, true);
        let farm = Uuid::new_v4();

        manager
            .on_reading(&reading(
                farm,
                SensorType::Temperature,
                50.0,
                ReadingStatus::Critical,
                ts(0),
            ))
            .await
            .unwrap();

        // Two minutes later: escalate, but stay inside the 30 min window.
        let decision = manager
            .on_reading(&reading(
                farm,
                SensorType::Temperature,
                52.0,
                ReadingStatus::Critical,
                ts(2),
            ))
            .await
            .unwrap();

        match decision {
            AlertDecision::Escalated { ref alert, notify } => {
                assert!(!notify);
                assert_eq!(alert.triggering_value, 52.0);
                assert_eq!(alert.last_reading_at, ts(2));
            }
            other => panic!("expected escalation, got {other:?}"),
        }
        assert!(decision.notification().is_none());

        // The stored record carries the escalation update.
        let stored = store
            .find_active(farm, SensorType::Temperature)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.triggering_value, 52.0);
        assert_eq!(stored.status, AlertStatus::Open);
        // Anchor unchanged: the silent escalation claimed nothing.
        assert_eq!(stored.last_notified_at, Some(ts(0)));
    }

    #[tokio::test]
    async fn test_escalation_after_cooldown_renotifies() {
        // ---
        let store = Arc::new(MemoryStore::new());
        let manager = manager(store.clone(), 1800, true);
        let farm = Uuid::new_v4();

        manager
            .on_reading(&reading(
                farm,
                SensorType::Temperature,
                50.0,
                ReadingStatus::Critical,
                ts(0),
            ))
            .await
            .unwrap();

        let decision = manager
            .on_reading(&reading(
                farm,
                SensorType::Temperature,
                55.0,
                ReadingStatus::Critical,
                ts(31),
            ))
            .await
            .unwrap();

        let (alert, event) = decision.notification().expect("cooldown elapsed");
        assert_eq!(event, AlertEvent::Escalation);
        assert_eq!(alert.last_notified_at, Some(ts(31)));
    }

    #[tokio::test]
    async fn test_recovery_auto_resolves() {
        // ---
        let store = Arc::new(MemoryStore::new());
        let manager = manager(store.clone(), 1800, true);
        let farm = Uuid::new_v4();

        manager
            .on_reading(&reading(
                farm,
                SensorType::Temperature,
                50.0,
                ReadingStatus::Critical,
                ts(0),
            ))
            .await
            .unwrap();

        let decision = manager
            .on_reading(&reading(
                farm,
                SensorType::Temperature,
                25.0,
                ReadingStatus::Normal,
                ts(5),
            ))
            .await
            .unwrap();

        match decision {
            AlertDecision::Resolved(alert) => {
                assert_eq!(alert.status, AlertStatus::Resolved);
                assert_eq!(alert.resolved_at, Some(ts(5)));
            }
            other => panic!("expected resolution, got {other:?}"),
        }

        // The key is free again: a later critical opens a fresh alert.
        let decision = manager
            .on_reading(&reading(
                farm,
                SensorType::Temperature,
                45.0,
                ReadingStatus::Critical,
                ts(10),
            ))
            .await
            .unwrap();
        assert!(matches!(decision, AlertDecision::Opened(_)));
    }

    #[tokio::test]
    async fn test_recovery_without_auto_resolve_leaves_alert() {
        // ---
        let store = Arc::new(MemoryStore::new());
        let manager = manager(store.clone(), 1800, false);
        let farm = Uuid::new_v4();

        manager
            .on_reading(&reading(
                farm,
                SensorType::Temperature,
                50.0,
                ReadingStatus::Critical,
                ts(0),
            ))
            .await
            .unwrap();

        let decision = manager
            .on_reading(&reading(
                farm,
                SensorType::Temperature,
                25.0,
                ReadingStatus::Normal,
                ts(5),
            ))
            .await
            .unwrap();
        assert!(matches!(decision, AlertDecision::None));

        let stored = store
            .find_active(farm, SensorType::Temperature)
            .await
            .unwrap();
        assert!(stored.is_some());
    }

    #[tokio::test]
    async fn test_acknowledged_alert_stays_acknowledged_through_escalation() {
        // ---
        let store = Arc::new(MemoryStore::new());
        let manager = manager(store.clone(), 1800, true);
        let farm = Uuid::new_v4();

        let decision = manager
            .on_reading(&reading(
                farm,
                SensorType::Temperature,
                50.0,
                ReadingStatus::Critical,
                ts(0),
            ))
            .await
            .unwrap();
        let alert_id = decision.active_alert_id().unwrap();

        store.acknowledge_alert(alert_id).await.unwrap().unwrap();

        manager
            .on_reading(&reading(
                farm,
                SensorType::Temperature,
                55.0,
                ReadingStatus::Critical,
                ts(2),
            ))
            .await
            .unwrap();

        let stored = store.get_alert(alert_id).await.unwrap().unwrap();
        assert_eq!(stored.status, AlertStatus::Acknowledged);
        assert_eq!(stored.triggering_value, 55.0);
    }

    #[tokio::test]
    async fn test_sensor_types_are_independent_keys() {
        // ---
        let store = Arc::new(MemoryStore::new());
        let manager = manager(store.clone(), 1800, true);
        let farm = Uuid::new_v4();

        manager
            .on_reading(&reading(
                farm,
                SensorType::Temperature,
                50.0,
                ReadingStatus::Critical,
                ts(0),
            ))
            .await
            .unwrap();

        let decision = manager
            .on_reading(&reading(
                farm,
                SensorType::SoilMoisture,
                15.0,
                ReadingStatus::Critical,
                ts(1),
            ))
            .await
            .unwrap();

        // Second sensor type opens its own alert instead of escalating.
        assert!(matches!(decision, AlertDecision::Opened(_)));
        assert!(store
            .find_active(farm, SensorType::Temperature)
            .await
            .unwrap()
            .is_some());
        assert!(store
            .find_active(farm, SensorType::SoilMoisture)
            .await
            .unwrap()
            .is_some());
    }
}
