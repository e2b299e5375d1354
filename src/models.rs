//! Domain models for the sensor monitoring engine.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---

/// Error returned when a wire label does not match any enum variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseLabelError(pub String);

impl fmt::Display for ParseLabelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unrecognized label: {}", self.0)
    }
}

impl std::error::Error for ParseLabelError {}

// ---

/// Category of physical measurement a reading belongs to.
///
/// The set is extensible: adding a variant only requires a matching entry in
/// the threshold table. Readings for a type with no entry are rejected at
/// classification time rather than silently treated as normal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SensorType {
    Temperature,
    SoilMoisture,
    SoilPh,
    Humidity,
}

impl SensorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SensorType::Temperature => "TEMPERATURE",
            SensorType::SoilMoisture => "SOIL_MOISTURE",
            SensorType::SoilPh => "SOIL_PH",
            SensorType::Humidity => "HUMIDITY",
        }
    }

    /// All known sensor types, in threshold-table order.
    pub fn all() -> [SensorType; 4] {
        [
            SensorType::Temperature,
            SensorType::SoilMoisture,
            SensorType::SoilPh,
            SensorType::Humidity,
        ]
    }
}

impl fmt::Display for SensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SensorType {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TEMPERATURE" => Ok(SensorType::Temperature),
            "SOIL_MOISTURE" => Ok(SensorType::SoilMoisture),
            "SOIL_PH" => Ok(SensorType::SoilPh),
            "HUMIDITY" => Ok(SensorType::Humidity),
            other => Err(ParseLabelError(other.to_string())),
        }
    }
}

/// Classification band a reading falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReadingStatus {
    Normal,
    Warning,
    Critical,
}

impl ReadingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadingStatus::Normal => "NORMAL",
            ReadingStatus::Warning => "WARNING",
            ReadingStatus::Critical => "CRITICAL",
        }
    }

    pub fn is_critical(&self) -> bool {
        matches!(self, ReadingStatus::Critical)
    }
}

impl fmt::Display for ReadingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReadingStatus {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NORMAL" => Ok(ReadingStatus::Normal),
            "WARNING" => Ok(ReadingStatus::Warning),
            "CRITICAL" => Ok(ReadingStatus::Critical),
            other => Err(ParseLabelError(other.to_string())),
        }
    }
}

/// Lifecycle state of a [`SensorAlert`].
///
/// OPEN and ACKNOWLEDGED both count as active for the one-active-alert-per-
/// (farm, sensor) invariant; RESOLVED alerts are history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertStatus {
    Open,
    Acknowledged,
    Resolved,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::Open => "OPEN",
            AlertStatus::Acknowledged => "ACKNOWLEDGED",
            AlertStatus::Resolved => "RESOLVED",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, AlertStatus::Open | AlertStatus::Acknowledged)
    }
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertStatus {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OPEN" => Ok(AlertStatus::Open),
            "ACKNOWLEDGED" => Ok(AlertStatus::Acknowledged),
            "RESOLVED" => Ok(AlertStatus::Resolved),
            other => Err(ParseLabelError(other.to_string())),
        }
    }
}

/// Delivery channel used for a notification attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelKind {
    Sms,
    Email,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Sms => "SMS",
            ChannelKind::Email => "EMAIL",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelKind {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SMS" => Ok(ChannelKind::Sms),
            "EMAIL" => Ok(ChannelKind::Email),
            other => Err(ParseLabelError(other.to_string())),
        }
    }
}

/// Final outcome of a single delivery try.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttemptOutcome {
    Sent,
    Failed,
}

impl AttemptOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptOutcome::Sent => "SENT",
            AttemptOutcome::Failed => "FAILED",
        }
    }
}

impl fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttemptOutcome {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SENT" => Ok(AttemptOutcome::Sent),
            "FAILED" => Ok(AttemptOutcome::Failed),
            other => Err(ParseLabelError(other.to_string())),
        }
    }
}

// ---

/// One submitted sensor reading with its derived classification.
///
/// Readings are append-only: created once per submission, never mutated,
/// never deduplicated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorReading {
    pub reading_id: Uuid,
    pub farm_id: Uuid,
    pub sensor_type: SensorType,
    pub value: f64,
    /// Informational only; classification is unit-implicit per sensor type.
    pub unit: String,
    pub recorded_at: DateTime<Utc>,
    pub status: ReadingStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// A stateful record tracking an ongoing critical condition for one
/// (farm, sensor) pair, distinct from the readings that triggered it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorAlert {
    pub alert_id: Uuid,
    pub farm_id: Uuid,
    pub sensor_type: SensorType,
    pub opened_at: DateTime<Utc>,
    pub last_reading_at: DateTime<Utc>,
    /// Only CRITICAL readings open alerts; kept as a column for the admin UI.
    pub severity: ReadingStatus,
    pub status: AlertStatus,
    pub triggering_value: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    /// Cooldown anchor: when a notification was last claimed for this alert.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_notified_at: Option<DateTime<Utc>>,
    /// Set when every notification channel was exhausted for an event.
    pub notification_failed: bool,
}

impl SensorAlert {
    /// Build a fresh OPEN alert from the critical reading that triggers it.
    ///
    /// The notification anchor is claimed immediately: the opening event
    /// always notifies, and the cooldown window starts here.
    pub fn open(reading: &SensorReading) -> SensorAlert {
        // ---
        SensorAlert {
            alert_id: Uuid::new_v4(),
            farm_id: reading.farm_id,
            sensor_type: reading.sensor_type,
            opened_at: reading.recorded_at,
            last_reading_at: reading.recorded_at,
            severity: ReadingStatus::Critical,
            status: AlertStatus::Open,
            triggering_value: reading.value,
            resolved_at: None,
            last_notified_at: Some(reading.recorded_at),
            notification_failed: false,
        }
    }
}

/// One row of the append-only notification audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationAttempt {
    pub alert_id: Uuid,
    pub channel: ChannelKind,
    pub attempted_at: DateTime<Utc>,
    pub outcome: AttemptOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

/// Read-only mirror of the farm directory owned by the record-keeping
/// application. The engine uses it to reject unknown farms and to resolve
/// notification recipients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Farm {
    pub farm_id: Uuid,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_email: Option<String>,
}

/// Rolling aggregate per (farm, sensor) pair, computed over the stored
/// readings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FarmSensorSummary {
    pub farm_id: Uuid,
    pub sensor_type: SensorType,
    pub avg_value: f64,
    pub min_value: f64,
    pub max_value: f64,
    pub reading_count: i64,
    pub last_value: f64,
    pub last_status: ReadingStatus,
    pub last_recorded_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use chrono::TimeZone;

    fn create_test_reading(status: ReadingStatus, value: f64) -> SensorReading {
        // ---
        SensorReading {
            reading_id: Uuid::new_v4(),
            farm_id: Uuid::new_v4(),
            sensor_type: SensorType::Temperature,
            value,
            unit: "°C".to_string(),
            recorded_at: Utc.with_ymd_and_hms(2025, 6, 14, 9, 30, 0).unwrap(),
            status,
            notes: None,
        }
    }

    #[test]
    fn test_sensor_type_labels_round_trip() {
        // ---
        for sensor in SensorType::all() {
            let parsed: SensorType = sensor.as_str().parse().unwrap();
            assert_eq!(parsed, sensor);
        }
        assert!("CO2".parse::<SensorType>().is_err());
    }

    #[test]
    fn test_wire_labels_match_serde() {
        // ---
        // The admin UI contract uses SCREAMING_SNAKE_CASE labels; `as_str`
        // and the serde representation must agree.
        let json = serde_json::to_value(SensorType::SoilMoisture).unwrap();
        assert_eq!(json, serde_json::json!("SOIL_MOISTURE"));

        let json = serde_json::to_value(ReadingStatus::Critical).unwrap();
        assert_eq!(json, serde_json::json!("CRITICAL"));

        let json = serde_json::to_value(AlertStatus::Acknowledged).unwrap();
        assert_eq!(json, serde_json::json!("ACKNOWLEDGED"));
    }

    #[test]
    fn test_open_alert_from_reading() {
        // ---
        let reading = create_test_reading(ReadingStatus::Critical, 50.0);
        let alert = SensorAlert::open(&reading);

        assert_eq!(alert.farm_id, reading.farm_id);
        assert_eq!(alert.sensor_type, SensorType::Temperature);
        assert_eq!(alert.status, AlertStatus::Open);
        assert_eq!(alert.severity, ReadingStatus::Critical);
        assert_eq!(alert.triggering_value, 50.0);
        assert_eq!(alert.opened_at, reading.recorded_at);
        assert_eq!(alert.last_reading_at, reading.recorded_at);
        // Opening an alert always notifies, so the cooldown starts here.
        assert_eq!(alert.last_notified_at, Some(reading.recorded_at));
        assert!(alert.resolved_at.is_none());
        assert!(!alert.notification_failed);
    }

    #[test]
    fn test_active_statuses() {
        // ---
        assert!(AlertStatus::Open.is_active());
        assert!(AlertStatus::Acknowledged.is_active());
        assert!(!AlertStatus::Resolved.is_active());
    }

    #[test]
    fn test_reading_serializes_camel_case() {
        // ---
        let reading = create_test_reading(ReadingStatus::Warning, 33.5);
        let json = serde_json::to_value(&reading).unwrap();

        assert!(json.get("readingId").is_some());
        assert!(json.get("farmId").is_some());
        assert!(json.get("sensorType").is_some());
        assert!(json.get("recordedAt").is_some());
        // Absent optional fields stay off the wire entirely.
        assert!(json.get("notes").is_none());
    }
}
