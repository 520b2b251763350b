//! Per-resident scoring and population fan-out.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::alerts::{AlertProcessor, ProcessOutcome};
use crate::cohorts::{aggregate_cohorts, default_rules};
use crate::config::Settings;
use crate::error::{EngineError, Result};
use crate::habits::calculate_habit_scores;
use crate::models::{
    AggregationWindow, CohortSummary, Habit, Resident, ResidentMetrics, ResidentScore, StreakState,
};
use crate::store::{AlertStore, SampleStore};
use crate::streaks::compute_streaks;
use crate::ubzi::{compose_ubzi, WeightTable};
use crate::vitals::{calculate_vital_statistics, data_quality};

#[derive(Debug, Default)]
pub struct PopulationScores {
    pub scores: Vec<ResidentScore>,
    /// Residents whose data could not be fetched this cycle.
    pub skipped: Vec<String>,
}

impl PopulationScores {
    pub fn by_resident(&self) -> HashMap<String, ResidentMetrics> {
        self.scores
            .iter()
            .map(|score| (score.resident_id.clone(), score.metrics()))
            .collect()
    }
}

/// Result of one alert sweep over a roster.
#[derive(Debug, Default)]
pub struct AlertSweep {
    pub evaluated: usize,
    pub outcomes: Vec<ProcessOutcome>,
    pub skipped: Vec<String>,
}

impl AlertSweep {
    pub fn emitted(&self) -> impl Iterator<Item = &ProcessOutcome> {
        self.outcomes.iter().filter(|o| !o.deduplicated)
    }
}

#[derive(Clone)]
pub struct ScoringEngine {
    samples: Arc<dyn SampleStore>,
    alerts: Arc<dyn AlertStore>,
    settings: Settings,
    table: WeightTable,
}

impl ScoringEngine {
    pub fn new(
        samples: Arc<dyn SampleStore>,
        alerts: Arc<dyn AlertStore>,
        settings: Settings,
    ) -> Result<Self> {
        let table = settings.weight_table()?;
        Ok(Self {
            samples,
            alerts,
            settings,
            table,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn weight_table(&self) -> &WeightTable {
        &self.table
    }

    /// Scores one resident over the window ending at `now`.
    pub async fn score_resident(
        &self,
        resident_id: &str,
        window: AggregationWindow,
        now: DateTime<Utc>,
    ) -> Result<ResidentScore> {
        let since = window.start_from(now);
        let vitals: Vec<_> = self
            .samples
            .vitals_since(resident_id, since)
            .await?
            .into_iter()
            .filter(|s| s.timestamp <= now)
            .collect();
        let check_ins: Vec<_> = self
            .samples
            .check_ins_since(resident_id, since)
            .await?
            .into_iter()
            .filter(|c| c.timestamp <= now)
            .collect();
        let alert_count = self
            .alerts
            .alerts_since(Some(resident_id), since)
            .await?
            .iter()
            .filter(|a| a.timestamp <= now)
            .count();

        let stats = calculate_vital_statistics(&vitals);
        let habits = calculate_habit_scores(&check_ins);
        let ubzi = compose_ubzi(&stats, &habits, &self.table);
        let expected = self.settings.data_quality.expected_vital_samples_per_hour
            * window.hours().max(1) as usize;

        Ok(ResidentScore {
            resident_id: resident_id.to_string(),
            window,
            scheme: format!("{}@{}", self.table.name, self.table.version),
            ubzi,
            vitals: stats,
            habits,
            alert_count,
            data_quality: data_quality(vitals.len(), expected),
            computed_at: now,
        })
    }

    /// Scores every resident concurrently. A resident whose fetch fails is
    /// logged and listed in `skipped`; the rest of the batch carries on.
    pub async fn score_population(
        &self,
        residents: &[Resident],
        window: AggregationWindow,
        now: DateTime<Utc>,
    ) -> PopulationScores {
        let mut tasks = JoinSet::new();
        for resident in residents {
            let engine = self.clone();
            let resident_id = resident.resident_id.clone();
            tasks.spawn(async move {
                let result = engine.score_resident(&resident_id, window, now).await;
                (resident_id, result)
            });
        }

        let mut population = PopulationScores::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(score))) => population.scores.push(score),
                Ok((resident_id, Err(err))) => {
                    warn!(resident_id = %resident_id, error = %err, "skipping resident");
                    population.skipped.push(resident_id);
                }
                Err(err) => warn!(error = %err, "scoring task aborted"),
            }
        }

        population.scores.sort_by(|a, b| a.resident_id.cmp(&b.resident_id));
        population.skipped.sort();
        info!(
            window = window.as_str(),
            scored = population.scores.len(),
            skipped = population.skipped.len(),
            "population scored"
        );
        population
    }

    pub async fn cohort_summaries(
        &self,
        roster: &[Resident],
        window: AggregationWindow,
        now: DateTime<Utc>,
    ) -> (PopulationScores, Vec<CohortSummary>) {
        let population = self.score_population(roster, window, now).await;
        let summaries = aggregate_cohorts(
            roster,
            &population.by_resident(),
            now.date_naive(),
            &default_rules(),
        );
        (population, summaries)
    }

    /// Rebuilds streaks from the configured trailing history.
    pub async fn streaks(
        &self,
        resident_id: &str,
        history_days: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<BTreeMap<Habit, StreakState>> {
        let days = history_days.unwrap_or(self.settings.streaks.history_days).max(1);
        let check_ins: Vec<_> = self
            .samples
            .check_ins_since(resident_id, now - Duration::days(days))
            .await?
            .into_iter()
            .filter(|c| c.timestamp <= now)
            .collect();
        Ok(compute_streaks(&check_ins, &self.settings.streaks.requirements))
    }

    /// Streaks for every resident on the roster, plus the residents whose
    /// history could not be fetched.
    pub async fn streak_board(
        &self,
        roster: &[Resident],
        now: DateTime<Utc>,
    ) -> (Vec<(String, BTreeMap<Habit, StreakState>)>, Vec<String>) {
        let mut board = Vec::with_capacity(roster.len());
        let mut skipped = Vec::new();
        for resident in roster {
            match self.streaks(&resident.resident_id, None, now).await {
                Ok(states) => board.push((resident.resident_id.clone(), states)),
                Err(err) => {
                    warn!(resident_id = %resident.resident_id, error = %err, "skipping streaks");
                    skipped.push(resident.resident_id.clone());
                }
            }
        }
        (board, skipped)
    }

    /// Runs samples since `since` and today's streak milestones through
    /// `processor`. A resident whose data cannot be fetched is skipped.
    pub async fn sweep_alerts(
        &self,
        processor: &AlertProcessor,
        roster: &[Resident],
        since: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> AlertSweep {
        let mut sweep = AlertSweep::default();
        for resident in roster {
            let id = resident.resident_id.as_str();
            let fetched = async {
                let vitals = self.samples.vitals_since(id, since).await?;
                let check_ins = self.samples.check_ins_since(id, since).await?;
                let streaks = self.streaks(id, None, now).await?;
                Ok::<_, EngineError>((vitals, check_ins, streaks))
            }
            .await;
            let (vitals, check_ins, streaks) = match fetched {
                Ok(data) => data,
                Err(err) => {
                    warn!(resident_id = %id, error = %err, "skipping alert evaluation");
                    sweep.skipped.push(id.to_string());
                    continue;
                }
            };

            for sample in vitals.iter().filter(|s| s.timestamp <= now) {
                sweep.outcomes.extend(processor.process_vital_sample(sample).await);
            }
            for check_in in check_ins.iter().filter(|c| c.timestamp <= now) {
                sweep.outcomes.extend(processor.process_check_in(check_in).await);
            }
            let milestones = &self.settings.streaks.milestones;
            sweep
                .outcomes
                .extend(processor.process_streak_milestones(id, &streaks, milestones, now).await);
            sweep.evaluated += 1;
        }
        info!(
            evaluated = sweep.evaluated,
            outcomes = sweep.outcomes.len(),
            skipped = sweep.skipped.len(),
            "alert sweep finished"
        );
        sweep
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AlertSettings;
    use crate::models::{AlertSeverity, AlertType};
    use crate::notify::RecordingSink;
    use crate::models::{BloodPressure, Cohort, HabitCheckIn, HabitEntry, VitalSample};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 10, 12, 0, 0).unwrap()
    }

    fn ideal_vitals(resident_id: &str, minutes_ago: i64) -> VitalSample {
        VitalSample {
            resident_id: resident_id.to_string(),
            timestamp: now() - Duration::minutes(minutes_ago),
            heart_rate: Some(72.0),
            blood_pressure: Some(BloodPressure {
                systolic: 118.0,
                diastolic: 78.0,
            }),
            temperature: Some(98.6),
            oxygen_saturation: Some(98.0),
        }
    }

    fn check_in(resident_id: &str, hours_ago: i64, score: f64) -> HabitCheckIn {
        HabitCheckIn {
            resident_id: resident_id.to_string(),
            timestamp: now() - Duration::hours(hours_ago),
            habits: Habit::ALL
                .iter()
                .map(|habit| (*habit, HabitEntry::scored(score)))
                .collect(),
        }
    }

    fn resident(id: &str, age: u32) -> Resident {
        Resident {
            resident_id: id.to_string(),
            name: id.to_string(),
            date_of_birth: None,
            age: Some(age),
            chronic_conditions: Vec::new(),
            cohort: None,
        }
    }

    /// Fails every fetch for one resident.
    struct FlakyStore {
        inner: MemoryStore,
        broken: String,
    }

    #[async_trait]
    impl SampleStore for FlakyStore {
        async fn vitals_since(&self, resident_id: &str, since: DateTime<Utc>) -> Result<Vec<VitalSample>> {
            if resident_id == self.broken {
                return Err(EngineError::Store("timeout".to_string()));
            }
            self.inner.vitals_since(resident_id, since).await
        }

        async fn check_ins_since(
            &self,
            resident_id: &str,
            since: DateTime<Utc>,
        ) -> Result<Vec<HabitCheckIn>> {
            if resident_id == self.broken {
                return Err(EngineError::Store("timeout".to_string()));
            }
            self.inner.check_ins_since(resident_id, since).await
        }
    }

    #[tokio::test]
    async fn ideal_day_scores_full_marks() {
        let store = Arc::new(MemoryStore::new());
        store
            .add_vitals((0..12).map(|i| ideal_vitals("R-1", i * 5)))
            .await;
        let mut recent = check_in("R-1", 0, 100.0);
        recent.timestamp -= Duration::minutes(30);
        store.add_check_ins(vec![recent]).await;
        let engine = ScoringEngine::new(store.clone(), store, Settings::default()).unwrap();

        let score = engine
            .score_resident("R-1", AggregationWindow::Hourly, now())
            .await
            .unwrap();
        assert_eq!(score.ubzi, 100);
        assert_eq!(score.data_quality, 100.0);
        assert_eq!(score.scheme, "aggregator-v1@1");
    }

    #[tokio::test]
    async fn samples_outside_the_window_are_ignored() {
        let store = Arc::new(MemoryStore::new());
        store.add_vitals(vec![ideal_vitals("R-1", 120)]).await;
        store.add_check_ins(vec![check_in("R-1", 3, 90.0)]).await;
        let engine = ScoringEngine::new(store.clone(), store, Settings::default()).unwrap();

        let score = engine
            .score_resident("R-1", AggregationWindow::Hourly, now())
            .await
            .unwrap();
        assert_eq!(score.vitals.heart_rate.count, 0);
        assert_eq!(score.ubzi, 50);
        assert_eq!(score.data_quality, 0.0);
    }

    #[tokio::test]
    async fn one_failing_resident_does_not_abort_the_batch() {
        let inner = MemoryStore::new();
        inner.add_check_ins(vec![check_in("R-1", 1, 80.0), check_in("R-3", 1, 40.0)]).await;
        let samples = Arc::new(FlakyStore {
            inner,
            broken: "R-2".to_string(),
        });
        let alerts = Arc::new(MemoryStore::new());
        let engine = ScoringEngine::new(samples, alerts, Settings::default()).unwrap();

        let roster = vec![resident("R-1", 70), resident("R-2", 71), resident("R-3", 40)];
        let (population, summaries) = engine
            .cohort_summaries(&roster, AggregationWindow::Daily, now())
            .await;

        assert_eq!(population.skipped, vec!["R-2".to_string()]);
        assert_eq!(population.scores.len(), 2);
        let senior = summaries.iter().find(|s| s.cohort_id == Cohort::Senior).unwrap();
        assert_eq!(senior.resident_count, 1);
        // 50 base + 0.6 * 80
        assert_eq!(senior.avg_ubzi, 98);
    }

    #[tokio::test]
    async fn streaks_use_trailing_history() {
        let store = Arc::new(MemoryStore::new());
        store
            .add_check_ins((0..10).map(|days_ago| check_in("R-1", days_ago * 24, 70.0)))
            .await;
        let engine = ScoringEngine::new(store.clone(), store, Settings::default()).unwrap();

        let recent = engine.streaks("R-1", Some(5), now()).await.unwrap();
        // the lower bound is inclusive: today plus five full days back
        assert_eq!(recent[&Habit::Movement].current_streak, 6);

        let month = engine.streaks("R-1", None, now()).await.unwrap();
        assert_eq!(month[&Habit::Movement].longest_streak, 10);
    }

    #[tokio::test]
    async fn alert_sweep_skips_a_failing_resident() {
        let inner = MemoryStore::new();
        let mut hot = ideal_vitals("R-1", 10);
        hot.blood_pressure = Some(BloodPressure {
            systolic: 185.0,
            diastolic: 95.0,
        });
        let mut also_hot = hot.clone();
        also_hot.resident_id = "R-3".to_string();
        inner.add_vitals(vec![hot, also_hot]).await;
        inner
            .add_check_ins((0..7).map(|days_ago| check_in("R-3", days_ago * 24, 70.0)))
            .await;
        let samples = Arc::new(FlakyStore {
            inner,
            broken: "R-2".to_string(),
        });
        let store = Arc::new(MemoryStore::new());
        let engine = ScoringEngine::new(samples, store.clone(), Settings::default()).unwrap();
        let processor = AlertProcessor::new(
            store.clone(),
            store.clone(),
            Arc::new(RecordingSink::new()),
            AlertSettings::default(),
        );

        let roster = vec![resident("R-1", 70), resident("R-2", 71), resident("R-3", 40)];
        let sweep = engine
            .sweep_alerts(&processor, &roster, now() - Duration::hours(1), now())
            .await;

        assert_eq!(sweep.evaluated, 2);
        assert_eq!(sweep.skipped, vec!["R-2".to_string()]);
        let critical: Vec<_> = sweep
            .emitted()
            .filter(|o| o.alert.severity == AlertSeverity::Critical)
            .map(|o| o.alert.resident_id.as_str())
            .collect();
        assert_eq!(critical, vec!["R-1", "R-3"]);
        assert!(sweep
            .emitted()
            .any(|o| o.alert.resident_id == "R-3" && o.alert.alert_type == AlertType::HabitStreak));
    }

    #[tokio::test]
    async fn streak_board_skips_a_failing_resident() {
        let inner = MemoryStore::new();
        inner.add_check_ins(vec![check_in("R-1", 1, 80.0)]).await;
        let samples = Arc::new(FlakyStore {
            inner,
            broken: "R-2".to_string(),
        });
        let engine =
            ScoringEngine::new(samples, Arc::new(MemoryStore::new()), Settings::default()).unwrap();

        let roster = vec![resident("R-1", 30), resident("R-2", 31)];
        let (board, skipped) = engine.streak_board(&roster, now()).await;

        assert_eq!(skipped, vec!["R-2".to_string()]);
        assert_eq!(board.len(), 1);
        assert_eq!(board[0].1[&Habit::Movement].current_streak, 1);
    }

    #[test]
    fn unknown_scheme_is_rejected_up_front() {
        let store = Arc::new(MemoryStore::new());
        let mut settings = Settings::default();
        settings.scoring.scheme = "v0".to_string();
        assert!(ScoringEngine::new(store.clone(), store, settings).is_err());
    }
}
