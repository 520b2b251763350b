//! Engine settings, loaded from an optional TOML file.
//!
//! Every field has a default, so an empty file (or no file at all) yields
//! the stock thresholds:
//!
//! ```toml
//! [scoring]
//! scheme = "aggregator-v1"
//!
//! [alerts]
//! dedup_window_minutes = 10
//!
//! [alerts.vitals.heart_rate]
//! warning_low = 50.0
//! warning_high = 120.0
//! ```

use std::path::Path;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::models::AlertSeverity;
use crate::ubzi::{WeightTable, AGGREGATOR_V1};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub scoring: ScoringSettings,
    pub alerts: AlertSettings,
    pub streaks: StreakSettings,
    pub cohorts: CohortSettings,
    pub data_quality: DataQualitySettings,
}

impl Settings {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let contents = std::fs::read_to_string(path).map_err(|source| EngineError::ConfigIo {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let settings: Settings = toml::from_str(contents)?;
        settings.weight_table()?;
        Ok(settings)
    }

    pub fn weight_table(&self) -> Result<WeightTable> {
        let table = WeightTable::named(&self.scoring.scheme)?;
        table.validate()?;
        Ok(table)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringSettings {
    pub scheme: String,
}

impl Default for ScoringSettings {
    fn default() -> Self {
        Self {
            scheme: AGGREGATOR_V1.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertSettings {
    pub dedup_window_minutes: i64,
    /// Also push warnings to the secondary channel.
    pub warning_push: bool,
    pub vitals: VitalThresholds,
    pub habits: HabitThresholds,
}

impl AlertSettings {
    pub fn dedup_window(&self) -> Duration {
        Duration::minutes(self.dedup_window_minutes.max(0))
    }
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            dedup_window_minutes: 10,
            warning_push: false,
            vitals: VitalThresholds::default(),
            habits: HabitThresholds::default(),
        }
    }
}

/// Warning and critical bounds for one channel. Highs are inclusive, lows
/// are strict.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    pub warning_low: Option<f64>,
    pub warning_high: Option<f64>,
    pub critical_low: Option<f64>,
    pub critical_high: Option<f64>,
}

impl Threshold {
    pub fn classify(&self, value: f64) -> Option<AlertSeverity> {
        let below = |bound: Option<f64>| bound.is_some_and(|b| value < b);
        let above = |bound: Option<f64>| bound.is_some_and(|b| value >= b);

        if below(self.critical_low) || above(self.critical_high) {
            Some(AlertSeverity::Critical)
        } else if below(self.warning_low) || above(self.warning_high) {
            Some(AlertSeverity::Warning)
        } else {
            None
        }
    }
}

/// Bounds per vital channel. A file section only overrides the bounds it
/// names; the rest keep the stock values for that channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "VitalThresholdOverrides")]
pub struct VitalThresholds {
    pub heart_rate: Threshold,
    pub systolic: Threshold,
    pub diastolic: Threshold,
    pub temperature: Threshold,
    pub oxygen_saturation: Threshold,
}

impl Default for VitalThresholds {
    fn default() -> Self {
        Self {
            heart_rate: Threshold {
                warning_low: Some(50.0),
                warning_high: Some(120.0),
                critical_low: Some(40.0),
                critical_high: Some(150.0),
            },
            systolic: Threshold {
                warning_low: Some(90.0),
                warning_high: Some(160.0),
                critical_low: Some(70.0),
                critical_high: Some(180.0),
            },
            diastolic: Threshold {
                warning_low: Some(60.0),
                warning_high: Some(100.0),
                critical_low: Some(40.0),
                critical_high: Some(120.0),
            },
            temperature: Threshold {
                warning_low: Some(96.8),
                warning_high: Some(100.4),
                critical_low: Some(95.0),
                critical_high: Some(103.0),
            },
            oxygen_saturation: Threshold {
                warning_low: Some(92.0),
                warning_high: None,
                critical_low: Some(88.0),
                critical_high: None,
            },
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ThresholdOverride {
    warning_low: Option<f64>,
    warning_high: Option<f64>,
    critical_low: Option<f64>,
    critical_high: Option<f64>,
}

impl ThresholdOverride {
    fn over(self, base: Threshold) -> Threshold {
        Threshold {
            warning_low: self.warning_low.or(base.warning_low),
            warning_high: self.warning_high.or(base.warning_high),
            critical_low: self.critical_low.or(base.critical_low),
            critical_high: self.critical_high.or(base.critical_high),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct VitalThresholdOverrides {
    heart_rate: ThresholdOverride,
    systolic: ThresholdOverride,
    diastolic: ThresholdOverride,
    temperature: ThresholdOverride,
    oxygen_saturation: ThresholdOverride,
}

impl From<VitalThresholdOverrides> for VitalThresholds {
    fn from(file: VitalThresholdOverrides) -> Self {
        let base = VitalThresholds::default();
        Self {
            heart_rate: file.heart_rate.over(base.heart_rate),
            systolic: file.systolic.over(base.systolic),
            diastolic: file.diastolic.over(base.diastolic),
            temperature: file.temperature.over(base.temperature),
            oxygen_saturation: file.oxygen_saturation.over(base.oxygen_saturation),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HabitThresholds {
    pub warning_below: f64,
    pub info_below: f64,
}

impl Default for HabitThresholds {
    fn default() -> Self {
        Self {
            warning_below: 25.0,
            info_below: 50.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreakSettings {
    pub history_days: i64,
    pub milestones: Vec<u32>,
    pub requirements: DayRequirements,
}

impl Default for StreakSettings {
    fn default() -> Self {
        Self {
            history_days: 30,
            milestones: vec![7, 30],
            requirements: DayRequirements::default(),
        }
    }
}

/// What a single day must reach for each habit to count toward a streak.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DayRequirements {
    pub movement_min_score: f64,
    pub downshift_min_minutes: f64,
    pub plant_based_min_ratio: f64,
    pub social_min_interactions: u32,
    /// Purpose pulse must be strictly above this.
    pub purpose_min_pulse: f64,
}

impl Default for DayRequirements {
    fn default() -> Self {
        Self {
            movement_min_score: 50.0,
            downshift_min_minutes: 15.0,
            plant_based_min_ratio: 0.6,
            social_min_interactions: 3,
            purpose_min_pulse: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CohortSettings {
    pub trend_threshold: f64,
}

impl Default for CohortSettings {
    fn default() -> Self {
        Self {
            trend_threshold: 2.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataQualitySettings {
    pub expected_vital_samples_per_hour: usize,
}

impl Default for DataQualitySettings {
    fn default() -> Self {
        Self {
            expected_vital_samples_per_hour: 12,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let settings = Settings::from_toml("").unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.alerts.dedup_window(), Duration::minutes(10));
        assert_eq!(settings.weight_table().unwrap().name, AGGREGATOR_V1);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let settings = Settings::from_toml(
            r#"
            [scoring]
            scheme = "check-in-v1"

            [alerts]
            dedup_window_minutes = 30

            [alerts.vitals.heart_rate]
            warning_high = 110.0
            "#,
        )
        .unwrap();
        assert_eq!(settings.alerts.dedup_window_minutes, 30);
        assert_eq!(settings.alerts.vitals.heart_rate.warning_high, Some(110.0));
        assert_eq!(settings.alerts.vitals.systolic.critical_high, Some(180.0));
        assert_eq!(settings.streaks.milestones, vec![7, 30]);
    }

    #[test]
    fn overriding_one_bound_keeps_the_rest_of_the_channel() {
        let settings =
            Settings::from_toml("[alerts.vitals.heart_rate]\nwarning_high = 110.0\n").unwrap();
        let heart_rate = settings.alerts.vitals.heart_rate;

        assert_eq!(
            heart_rate,
            Threshold {
                warning_low: Some(50.0),
                warning_high: Some(110.0),
                critical_low: Some(40.0),
                critical_high: Some(150.0),
            }
        );
        assert_eq!(heart_rate.classify(200.0), Some(AlertSeverity::Critical));
        assert_eq!(heart_rate.classify(115.0), Some(AlertSeverity::Warning));
        assert_eq!(heart_rate.classify(30.0), Some(AlertSeverity::Critical));
        assert_eq!(
            settings.alerts.vitals.oxygen_saturation,
            VitalThresholds::default().oxygen_saturation
        );
    }

    #[test]
    fn unknown_scheme_fails_to_load() {
        let err = Settings::from_toml("[scoring]\nscheme = \"v0\"\n").unwrap_err();
        assert!(matches!(err, EngineError::UnknownWeightTable(_)));
    }

    #[test]
    fn threshold_classification_prefers_critical() {
        let systolic = VitalThresholds::default().systolic;
        assert_eq!(systolic.classify(185.0), Some(AlertSeverity::Critical));
        assert_eq!(systolic.classify(180.0), Some(AlertSeverity::Critical));
        assert_eq!(systolic.classify(165.0), Some(AlertSeverity::Warning));
        assert_eq!(systolic.classify(128.0), None);
        assert_eq!(systolic.classify(65.0), Some(AlertSeverity::Critical));
    }
}
