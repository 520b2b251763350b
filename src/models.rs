use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BloodPressure {
    pub systolic: f64,
    pub diastolic: f64,
}

/// One device reading. Any channel may be absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VitalSample {
    pub resident_id: String,
    pub timestamp: DateTime<Utc>,
    pub heart_rate: Option<f64>,
    pub blood_pressure: Option<BloodPressure>,
    pub temperature: Option<f64>,
    pub oxygen_saturation: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Habit {
    Movement,
    Nutrition,
    Downshift,
    Social,
    Purpose,
}

impl Habit {
    pub const ALL: [Habit; 5] = [
        Habit::Movement,
        Habit::Nutrition,
        Habit::Downshift,
        Habit::Social,
        Habit::Purpose,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Habit::Movement => "movement",
            Habit::Nutrition => "nutrition",
            Habit::Downshift => "downshift",
            Habit::Social => "social",
            Habit::Purpose => "purpose",
        }
    }
}

impl fmt::Display for Habit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single habit as reported in a check-in: a 0-100 score plus whatever
/// category-specific fields the reporting device supplied.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HabitEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub steps: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_minutes: Option<u32>,
    /// Downshift minutes (meditation, naps, breathing).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minutes: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plant_based_meals: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_meals: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interactions: Option<u32>,
    /// Self-reported purpose pulse, 0 means "no sense of purpose today".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pulse: Option<f64>,
}

impl HabitEntry {
    pub fn scored(score: f64) -> Self {
        Self {
            score: Some(score),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HabitCheckIn {
    pub resident_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub habits: BTreeMap<Habit, HabitEntry>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelStats {
    pub avg: f64,
    pub min: f64,
    pub max: f64,
    pub count: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VitalStatistics {
    pub heart_rate: ChannelStats,
    pub systolic: ChannelStats,
    pub diastolic: ChannelStats,
    pub temperature: ChannelStats,
    pub oxygen_saturation: ChannelStats,
}

impl VitalStatistics {
    pub fn channels(&self) -> [(&'static str, &ChannelStats); 5] {
        [
            ("heartRate", &self.heart_rate),
            ("bloodPressure.systolic", &self.systolic),
            ("bloodPressure.diastolic", &self.diastolic),
            ("temperature", &self.temperature),
            ("oxygenSaturation", &self.oxygen_saturation),
        ]
    }
}

/// Averaged habit scores over a window. Habits never reported read as 0.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HabitScoreSet(pub BTreeMap<Habit, f64>);

impl HabitScoreSet {
    pub fn get(&self, habit: Habit) -> f64 {
        self.0.get(&habit).copied().unwrap_or(0.0)
    }

    pub fn set(&mut self, habit: Habit, score: f64) {
        self.0.insert(habit, score);
    }

    pub fn uniform(score: f64) -> Self {
        Self(Habit::ALL.iter().map(|habit| (*habit, score)).collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Info => "info",
            AlertSeverity::Warning => "warning",
            AlertSeverity::Critical => "critical",
        }
    }
}

impl FromStr for AlertSeverity {
    type Err = EngineError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "info" => Ok(AlertSeverity::Info),
            "warning" => Ok(AlertSeverity::Warning),
            "critical" => Ok(AlertSeverity::Critical),
            other => Err(EngineError::Store(format!("unknown severity {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    VitalSigns,
    HabitScore,
    HabitStreak,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::VitalSigns => "vital_signs",
            AlertType::HabitScore => "habit_score",
            AlertType::HabitStreak => "habit_streak",
        }
    }
}

impl FromStr for AlertType {
    type Err = EngineError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "vital_signs" => Ok(AlertType::VitalSigns),
            "habit_score" => Ok(AlertType::HabitScore),
            "habit_streak" => Ok(AlertType::HabitStreak),
            other => Err(EngineError::Store(format!("unknown alert type {other}"))),
        }
    }
}

pub fn alert_key(resident_id: &str, alert_type: AlertType, severity: AlertSeverity) -> String {
    format!("{}#{}#{}", resident_id, alert_type.as_str(), severity.as_str())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub alert_id: Uuid,
    pub resident_id: String,
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub timestamp: DateTime<Utc>,
    pub details: String,
    pub metrics: serde_json::Value,
    pub alert_key: String,
}

impl Alert {
    pub fn new(
        resident_id: &str,
        alert_type: AlertType,
        severity: AlertSeverity,
        timestamp: DateTime<Utc>,
        details: String,
        metrics: serde_json::Value,
    ) -> Self {
        Self {
            alert_id: Uuid::new_v4(),
            resident_id: resident_id.to_string(),
            alert_type,
            severity,
            timestamp,
            details,
            metrics,
            alert_key: alert_key(resident_id, alert_type, severity),
        }
    }
}

/// Alert lifecycle as seen by the processor. A stored alert that has been
/// routed is `Active`; `Routed` means delivery ran but the store write
/// failed. `Resolved` is set by an operator outside this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Created,
    Deduplicated,
    Stored,
    Routed,
    Active,
    Resolved,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreakState {
    pub habit: Habit,
    pub current_streak: u32,
    pub longest_streak: u32,
    pub last_qualifying_day: Option<NaiveDate>,
    pub last_evaluated_day: Option<NaiveDate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cohort {
    Senior,
    Adult,
    Teen,
    Chronic,
}

impl Cohort {
    pub fn as_str(&self) -> &'static str {
        match self {
            Cohort::Senior => "senior",
            Cohort::Adult => "adult",
            Cohort::Teen => "teen",
            Cohort::Chronic => "chronic",
        }
    }
}

impl fmt::Display for Cohort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CohortSummary {
    pub cohort_id: Cohort,
    pub resident_count: usize,
    #[serde(rename = "avgUBZI")]
    pub avg_ubzi: i64,
    #[serde(rename = "minUBZI")]
    pub min_ubzi: u8,
    #[serde(rename = "maxUBZI")]
    pub max_ubzi: u8,
    pub total_alerts: usize,
    pub avg_data_quality: i64,
}

/// Resident metadata owned by the resident directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resident {
    pub resident_id: String,
    #[serde(default)]
    pub name: String,
    pub date_of_birth: Option<NaiveDate>,
    pub age: Option<u32>,
    #[serde(default)]
    pub chronic_conditions: Vec<String>,
    pub cohort: Option<String>,
}

pub const DEFAULT_AGE: u32 = 30;

impl Resident {
    /// Age in whole years on `on`. Falls back to an explicit `age`, then to
    /// [`DEFAULT_AGE`] when neither is known.
    pub fn age_on(&self, on: NaiveDate) -> u32 {
        match (self.date_of_birth, self.age) {
            (Some(dob), _) => {
                let mut years = on.year() - dob.year();
                if (on.month(), on.day()) < (dob.month(), dob.day()) {
                    years -= 1;
                }
                years.max(0) as u32
            }
            (None, Some(age)) => age,
            (None, None) => DEFAULT_AGE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResidentMetrics {
    pub resident_id: String,
    pub ubzi: u8,
    pub alert_count: usize,
    pub data_quality: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResidentScore {
    pub resident_id: String,
    pub window: AggregationWindow,
    pub scheme: String,
    pub ubzi: u8,
    pub vitals: VitalStatistics,
    pub habits: HabitScoreSet,
    pub alert_count: usize,
    pub data_quality: f64,
    pub computed_at: DateTime<Utc>,
}

impl ResidentScore {
    pub fn metrics(&self) -> ResidentMetrics {
        ResidentMetrics {
            resident_id: self.resident_id.clone(),
            ubzi: self.ubzi,
            alert_count: self.alert_count,
            data_quality: self.data_quality,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationWindow {
    Hourly,
    Daily,
    Weekly,
    Monthly,
}

impl AggregationWindow {
    pub fn duration(&self) -> Duration {
        match self {
            AggregationWindow::Hourly => Duration::hours(1),
            AggregationWindow::Daily => Duration::days(1),
            AggregationWindow::Weekly => Duration::days(7),
            AggregationWindow::Monthly => Duration::days(30),
        }
    }

    pub fn hours(&self) -> i64 {
        self.duration().num_hours()
    }

    pub fn start_from(&self, end: DateTime<Utc>) -> DateTime<Utc> {
        end - self.duration()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AggregationWindow::Hourly => "hourly",
            AggregationWindow::Daily => "daily",
            AggregationWindow::Weekly => "weekly",
            AggregationWindow::Monthly => "monthly",
        }
    }
}

impl FromStr for AggregationWindow {
    type Err = EngineError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "hourly" | "hour" => Ok(AggregationWindow::Hourly),
            "daily" | "day" => Ok(AggregationWindow::Daily),
            "weekly" | "week" => Ok(AggregationWindow::Weekly),
            "monthly" | "month" => Ok(AggregationWindow::Monthly),
            _ => Err(EngineError::UnknownWindow(value.to_string())),
        }
    }
}
