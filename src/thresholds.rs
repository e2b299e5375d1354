//! Threshold table and the pure reading classifier.
//!
//! Thresholds are configuration data loaded once at startup (built-in
//! defaults, optionally overridden from a JSON file). Classification is a
//! pure function of (sensor type, value) and the table; it never consults
//! reading history or alert state.

use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::models::{ReadingStatus, SensorType};

// ---

/// Band boundaries for one sensor type.
///
/// The NORMAL band is `[warning_low, warning_high]`, WARNING extends it to
/// `[critical_low, critical_high]`, and everything outside that is CRITICAL.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SensorThresholds {
    pub warning_low: f64,
    pub warning_high: f64,
    pub critical_low: f64,
    pub critical_high: f64,
}

/// Result of classifying a single value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub status: ReadingStatus,
    pub is_critical: bool,
}

/// Errors a classification request can fail with.
///
/// Callers must reject the submission on either variant rather than default
/// the reading to NORMAL.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ClassifyError {
    #[error("no thresholds configured for sensor type {0}")]
    UnknownSensorType(SensorType),
    #[error("value {0} is not a finite number")]
    InvalidValue(f64),
}

// ---

/// Immutable lookup table mapping each sensor type to its band boundaries.
#[derive(Debug, Clone)]
pub struct ThresholdTable {
    entries: HashMap<SensorType, SensorThresholds>,
}

impl Default for ThresholdTable {
    fn default() -> Self {
        // ---
        let entries = HashMap::from([
            (
                SensorType::Temperature,
                SensorThresholds {
                    warning_low: 10.0,
                    warning_high: 32.0,
                    critical_low: 5.0,
                    critical_high: 40.0,
                },
            ),
            (
                SensorType::SoilMoisture,
                SensorThresholds {
                    warning_low: 30.0,
                    warning_high: 70.0,
                    critical_low: 20.0,
                    critical_high: 80.0,
                },
            ),
            (
                SensorType::SoilPh,
                SensorThresholds {
                    warning_low: 5.5,
                    warning_high: 7.5,
                    critical_low: 5.0,
                    critical_high: 8.0,
                },
            ),
            (
                SensorType::Humidity,
                SensorThresholds {
                    warning_low: 40.0,
                    warning_high: 80.0,
                    critical_low: 30.0,
                    critical_high: 90.0,
                },
            ),
        ]);

        ThresholdTable { entries }
    }
}

impl ThresholdTable {
    /// Build a table from explicit entries, rejecting misordered bands.
    pub fn from_entries(
        entries: HashMap<SensorType, SensorThresholds>,
    ) -> anyhow::Result<ThresholdTable> {
        // ---
        for (sensor, t) in &entries {
            let bounds = [
                t.warning_low,
                t.warning_high,
                t.critical_low,
                t.critical_high,
            ];
            if bounds.iter().any(|b| !b.is_finite()) {
                anyhow::bail!("thresholds for {sensor} contain a non-finite bound");
            }
            // Required ordering: criticalLow <= warningLow <= warningHigh <= criticalHigh.
            if !(t.critical_low <= t.warning_low
                && t.warning_low <= t.warning_high
                && t.warning_high <= t.critical_high)
            {
                anyhow::bail!(
                    "thresholds for {sensor} are misordered \
                     (want criticalLow <= warningLow <= warningHigh <= criticalHigh, \
                     got {} / {} / {} / {})",
                    t.critical_low,
                    t.warning_low,
                    t.warning_high,
                    t.critical_high,
                );
            }
        }

        Ok(ThresholdTable { entries })
    }

    /// Load threshold overrides from a JSON file.
    ///
    /// The file maps sensor-type labels to band objects:
    /// `{"TEMPERATURE": {"warningLow": 10.0, ...}, ...}`. Types absent from
    /// the file fall back to the built-in defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> anyhow::Result<ThresholdTable> {
        // ---
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read thresholds file {}", path.display()))?;
        let overrides: HashMap<SensorType, SensorThresholds> = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse thresholds file {}", path.display()))?;

        let mut entries = ThresholdTable::default().entries;
        entries.extend(overrides);
        Self::from_entries(entries)
    }

    pub fn get(&self, sensor_type: SensorType) -> Option<&SensorThresholds> {
        self.entries.get(&sensor_type)
    }

    /// Classify a value against this table.
    ///
    /// Boundary policy: band checks use strict comparisons, so a value
    /// exactly on a bound always lands in the less severe band. At
    /// criticalLow=5.0 a value of 5.0 is WARNING and 4.999 is CRITICAL; at
    /// warningLow=10.0 a value of 10.0 is NORMAL.
    pub fn classify(
        &self,
        sensor_type: SensorType,
        value: f64,
    ) -> Result<Classification, ClassifyError> {
        // ---
        if !value.is_finite() {
            return Err(ClassifyError::InvalidValue(value));
        }

        let t = self
            .get(sensor_type)
            .ok_or(ClassifyError::UnknownSensorType(sensor_type))?;

        let status = if value < t.critical_low || value > t.critical_high {
            ReadingStatus::Critical
        } else if value < t.warning_low || value > t.warning_high {
            ReadingStatus::Warning
        } else {
            ReadingStatus::Normal
        };

        Ok(Classification {
            status,
            is_critical: status.is_critical(),
        })
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    fn classify_temp(value: f64) -> ReadingStatus {
        // ---
        ThresholdTable::default()
            .classify(SensorType::Temperature, value)
            .unwrap()
            .status
    }

    #[test]
    fn test_temperature_bands() {
        // ---
        assert_eq!(classify_temp(25.0), ReadingStatus::Normal);
        assert_eq!(classify_temp(7.0), ReadingStatus::Warning);
        assert_eq!(classify_temp(35.0), ReadingStatus::Warning);
        assert_eq!(classify_temp(2.0), ReadingStatus::Critical);
        assert_eq!(classify_temp(50.0), ReadingStatus::Critical);
    }

    #[test]
    fn test_boundary_values_land_in_less_severe_band() {
        // ---
        // Exactly at a bound is never the more severe side.
        assert_eq!(classify_temp(5.0), ReadingStatus::Warning);
        assert_eq!(classify_temp(4.999), ReadingStatus::Critical);
        assert_eq!(classify_temp(10.0), ReadingStatus::Normal);
        assert_eq!(classify_temp(9.999), ReadingStatus::Warning);
        assert_eq!(classify_temp(32.0), ReadingStatus::Normal);
        assert_eq!(classify_temp(40.0), ReadingStatus::Warning);
        assert_eq!(classify_temp(40.001), ReadingStatus::Critical);
    }

    #[test]
    fn test_soil_and_humidity_defaults() {
        // ---
        let table = ThresholdTable::default();

        let c = table.classify(SensorType::SoilMoisture, 15.0).unwrap();
        assert_eq!(c.status, ReadingStatus::Critical);
        assert!(c.is_critical);

        let c = table.classify(SensorType::SoilMoisture, 50.0).unwrap();
        assert_eq!(c.status, ReadingStatus::Normal);
        assert!(!c.is_critical);

        let c = table.classify(SensorType::SoilPh, 5.2).unwrap();
        assert_eq!(c.status, ReadingStatus::Warning);

        let c = table.classify(SensorType::SoilPh, 8.5).unwrap();
        assert_eq!(c.status, ReadingStatus::Critical);

        let c = table.classify(SensorType::Humidity, 85.0).unwrap();
        assert_eq!(c.status, ReadingStatus::Warning);
    }

    #[test]
    fn test_defaults_cover_every_sensor_type() {
        // ---
        let table = ThresholdTable::default();
        for sensor in SensorType::all() {
            assert!(table.get(sensor).is_some(), "no defaults for {sensor}");
        }
    }

    #[test]
    fn test_classify_is_deterministic() {
        // ---
        let table = ThresholdTable::default();
        for _ in 0..10 {
            let c = table.classify(SensorType::Temperature, 33.3).unwrap();
            assert_eq!(c.status, ReadingStatus::Warning);
        }
    }

    #[test]
    fn test_non_finite_values_are_rejected() {
        // ---
        let table = ThresholdTable::default();

        let err = table
            .classify(SensorType::Temperature, f64::NAN)
            .unwrap_err();
        assert!(matches!(err, ClassifyError::InvalidValue(_)));

        let err = table
            .classify(SensorType::Temperature, f64::INFINITY)
            .unwrap_err();
        assert!(matches!(err, ClassifyError::InvalidValue(_)));
    }

    #[test]
    fn test_missing_entry_is_an_error_not_normal() {
        // ---
        let entries = HashMap::from([(
            SensorType::Temperature,
            SensorThresholds {
                warning_low: 10.0,
                warning_high: 32.0,
                critical_low: 5.0,
                critical_high: 40.0,
            },
        )]);
        let table = ThresholdTable::from_entries(entries).unwrap();

        let err = table.classify(SensorType::Humidity, 50.0).unwrap_err();
        assert_eq!(err, ClassifyError::UnknownSensorType(SensorType::Humidity));
    }

    #[test]
    fn test_misordered_entries_are_rejected() {
        // ---
        let entries = HashMap::from([(
            SensorType::Temperature,
            SensorThresholds {
                warning_low: 32.0,
                warning_high: 10.0,
                critical_low: 5.0,
                critical_high: 40.0,
            },
        )]);
        assert!(ThresholdTable::from_entries(entries).is_err());
    }

    #[test]
    fn test_json_file_overrides_merge_with_defaults() {
        // ---
        let dir = std::env::temp_dir();
        let path = dir.join(format!("thresholds-{}.json", uuid::Uuid::new_v4()));
        std::fs::write(
            &path,
            r#"{"TEMPERATURE": {"warningLow": 0.0, "warningHigh": 20.0,
                               "criticalLow": -10.0, "criticalHigh": 30.0}}"#,
        )
        .unwrap();

        let table = ThresholdTable::from_json_file(&path).unwrap();
        std::fs::remove_file(&path).ok();

        // Overridden type uses the file's bands.
        let c = table.classify(SensorType::Temperature, 25.0).unwrap();
        assert_eq!(c.status, ReadingStatus::Warning);

        // Untouched types keep the built-in defaults.
        let c = table.classify(SensorType::Humidity, 50.0).unwrap();
        assert_eq!(c.status, ReadingStatus::Normal);
    }
}
