//! Threshold evaluation and alert processing.
//!
//! Evaluation is pure: a sample in, candidate alerts out. [`AlertProcessor`]
//! then runs each candidate through dedup, storage and notification routing
//! and reports what happened in a [`ProcessOutcome`].

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::config::{AlertSettings, HabitThresholds, Threshold, VitalThresholds};
use crate::models::{
    Alert, AlertSeverity, AlertStatus, AlertType, Habit, HabitCheckIn, StreakState, VitalSample,
};
use crate::notify::{channels_for, Channel, NotificationSink};
use crate::store::{AlertStore, DedupStore};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Breach {
    pub channel: String,
    pub value: f64,
    pub severity: AlertSeverity,
}

fn check(breaches: &mut Vec<Breach>, channel: &str, value: Option<f64>, threshold: &Threshold) {
    if let Some(value) = value {
        if let Some(severity) = threshold.classify(value) {
            breaches.push(Breach {
                channel: channel.to_string(),
                value,
                severity,
            });
        }
    }
}

pub fn vital_breaches(sample: &VitalSample, thresholds: &VitalThresholds) -> Vec<Breach> {
    let mut breaches = Vec::new();
    let bp = sample.blood_pressure;
    check(&mut breaches, "heartRate", sample.heart_rate, &thresholds.heart_rate);
    check(&mut breaches, "systolic", bp.map(|b| b.systolic), &thresholds.systolic);
    check(&mut breaches, "diastolic", bp.map(|b| b.diastolic), &thresholds.diastolic);
    check(&mut breaches, "temperature", sample.temperature, &thresholds.temperature);
    check(
        &mut breaches,
        "oxygenSaturation",
        sample.oxygen_saturation,
        &thresholds.oxygen_saturation,
    );
    breaches
}

/// At most one alert per sample, at the severity of its worst breach.
pub fn evaluate_vitals(sample: &VitalSample, thresholds: &VitalThresholds) -> Vec<Alert> {
    let breaches = vital_breaches(sample, thresholds);
    let Some(severity) = breaches.iter().map(|b| b.severity).max() else {
        return Vec::new();
    };

    let details = breaches
        .iter()
        .map(|b| format!("{} {} ({})", b.channel, b.value, b.severity.as_str()))
        .collect::<Vec<_>>()
        .join("; ");
    let metrics = json!({
        "heartRate": sample.heart_rate,
        "bloodPressure": sample.blood_pressure,
        "temperature": sample.temperature,
        "oxygenSaturation": sample.oxygen_saturation,
        "breaches": breaches,
    });

    vec![Alert::new(
        &sample.resident_id,
        AlertType::VitalSigns,
        severity,
        sample.timestamp,
        details,
        metrics,
    )]
}

/// Flags check-ins whose habit scores sag below the warning or info lines.
pub fn evaluate_check_in(check_in: &HabitCheckIn, thresholds: &HabitThresholds) -> Vec<Alert> {
    let low: BTreeMap<Habit, f64> = check_in
        .habits
        .iter()
        .filter_map(|(habit, entry)| entry.score.map(|score| (*habit, score)))
        .filter(|(_, score)| *score < thresholds.info_below)
        .collect();

    let Some(lowest) = low.values().copied().reduce(f64::min) else {
        return Vec::new();
    };
    let severity = if lowest < thresholds.warning_below {
        AlertSeverity::Warning
    } else {
        AlertSeverity::Info
    };

    let details = low
        .iter()
        .map(|(habit, score)| format!("{habit} scored {score}"))
        .collect::<Vec<_>>()
        .join("; ");

    vec![Alert::new(
        &check_in.resident_id,
        AlertType::HabitScore,
        severity,
        check_in.timestamp,
        details,
        json!({ "lowHabits": low }),
    )]
}

/// Info alerts for streaks that just reached one of `milestones` days.
pub fn streak_alerts(
    resident_id: &str,
    states: &BTreeMap<Habit, StreakState>,
    milestones: &[u32],
    at: DateTime<Utc>,
) -> Vec<Alert> {
    states
        .values()
        .filter(|state| state.last_qualifying_day == Some(at.date_naive()))
        .filter(|state| milestones.contains(&state.current_streak))
        .map(|state| {
            Alert::new(
                resident_id,
                AlertType::HabitStreak,
                AlertSeverity::Info,
                at,
                format!("{} streak reached {} days", state.habit, state.current_streak),
                json!({
                    "habit": state.habit,
                    "currentStreak": state.current_streak,
                    "longestStreak": state.longest_streak,
                }),
            )
        })
        .collect()
}

fn same_milestone(stored: &Alert, candidate: &Alert) -> bool {
    stored.alert_type == AlertType::HabitStreak
        && stored.metrics["habit"] == candidate.metrics["habit"]
        && stored.metrics["currentStreak"] == candidate.metrics["currentStreak"]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelDelivery {
    pub channel: Channel,
    pub delivered: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessOutcome {
    pub alert: Alert,
    pub status: AlertStatus,
    pub deduplicated: bool,
    pub stored: bool,
    pub deliveries: Vec<ChannelDelivery>,
}

impl ProcessOutcome {
    pub fn delivered(&self, channel: Channel) -> bool {
        self.deliveries
            .iter()
            .any(|d| d.channel == channel && d.delivered)
    }
}

#[derive(Clone)]
pub struct AlertProcessor {
    alerts: Arc<dyn AlertStore>,
    dedup: Arc<dyn DedupStore>,
    sink: Arc<dyn NotificationSink>,
    settings: AlertSettings,
}

impl AlertProcessor {
    pub fn new(
        alerts: Arc<dyn AlertStore>,
        dedup: Arc<dyn DedupStore>,
        sink: Arc<dyn NotificationSink>,
        settings: AlertSettings,
    ) -> Self {
        Self {
            alerts,
            dedup,
            sink,
            settings,
        }
    }

    fn window(&self) -> Duration {
        self.settings.dedup_window()
    }

    /// Dedup lookups that fail count as "not seen".
    async fn is_duplicate(&self, alert: &Alert) -> bool {
        let since = alert.timestamp - self.window();
        match self.dedup.seen_since(&alert.alert_key, since).await {
            Ok(seen) => seen,
            Err(err) => {
                warn!(alert_key = %alert.alert_key, error = %err, "dedup lookup failed, treating as new");
                false
            }
        }
    }

    pub async fn process(&self, alert: Alert) -> ProcessOutcome {
        if self.is_duplicate(&alert).await {
            debug!(alert_key = %alert.alert_key, "suppressed duplicate alert");
            return ProcessOutcome {
                alert,
                status: AlertStatus::Deduplicated,
                deduplicated: true,
                stored: false,
                deliveries: Vec::new(),
            };
        }

        let stored = match self.alerts.insert_alert(&alert).await {
            Ok(()) => true,
            Err(err) => {
                warn!(alert_id = %alert.alert_id, error = %err, "failed to store alert");
                false
            }
        };

        if let Err(err) = self.dedup.record(&alert.alert_key, alert.timestamp).await {
            warn!(alert_key = %alert.alert_key, error = %err, "failed to record dedup entry");
        }

        let mut deliveries = Vec::new();
        for channel in channels_for(alert.severity, self.settings.warning_push) {
            let delivery = match self.sink.send(channel, &alert).await {
                Ok(()) => ChannelDelivery {
                    channel,
                    delivered: true,
                    error: None,
                },
                Err(err) => {
                    warn!(channel = channel.as_str(), alert_id = %alert.alert_id, error = %err, "notification failed");
                    ChannelDelivery {
                        channel,
                        delivered: false,
                        error: Some(err.to_string()),
                    }
                }
            };
            deliveries.push(delivery);
        }

        let status = match (stored, deliveries.is_empty()) {
            (true, false) => AlertStatus::Active,
            (true, true) => AlertStatus::Stored,
            (false, false) => AlertStatus::Routed,
            (false, true) => AlertStatus::Created,
        };
        info!(
            alert_key = %alert.alert_key,
            stored,
            channels = deliveries.len(),
            "processed alert"
        );

        ProcessOutcome {
            alert,
            status,
            deduplicated: false,
            stored,
            deliveries,
        }
    }

    pub async fn process_all(&self, alerts: Vec<Alert>) -> Vec<ProcessOutcome> {
        let mut outcomes = Vec::with_capacity(alerts.len());
        for alert in alerts {
            outcomes.push(self.process(alert).await);
        }
        outcomes
    }

    pub async fn process_vital_sample(&self, sample: &VitalSample) -> Vec<ProcessOutcome> {
        self.process_all(evaluate_vitals(sample, &self.settings.vitals))
            .await
    }

    pub async fn process_check_in(&self, check_in: &HabitCheckIn) -> Vec<ProcessOutcome> {
        self.process_all(evaluate_check_in(check_in, &self.settings.habits))
            .await
    }

    /// Milestones already stored today for the same habit and length are
    /// skipped, so a milestone day yields one stored alert however often
    /// the sweep runs.
    pub async fn process_streak_milestones(
        &self,
        resident_id: &str,
        states: &BTreeMap<Habit, StreakState>,
        milestones: &[u32],
        at: DateTime<Utc>,
    ) -> Vec<ProcessOutcome> {
        let candidates = streak_alerts(resident_id, states, milestones, at);
        if candidates.is_empty() {
            return Vec::new();
        }

        let day_start = at.date_naive().and_time(NaiveTime::MIN).and_utc();
        let stored: Vec<Alert> = match self.alerts.alerts_since(Some(resident_id), day_start).await {
            Ok(alerts) => alerts,
            Err(err) => {
                warn!(resident_id = %resident_id, error = %err, "milestone lookup failed, treating as new");
                Vec::new()
            }
        };
        let fresh = candidates
            .into_iter()
            .filter(|candidate| !stored.iter().any(|a| same_milestone(a, candidate)))
            .collect();
        self.process_all(fresh).await
    }
}
