//! Urban Blue Zone Index composition.
//!
//! Both historical formulas are expressed as named [`WeightTable`]s applied
//! by the same composer, so a score always records which table produced it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::models::{ChannelStats, Habit, HabitCheckIn, HabitScoreSet, VitalStatistics};

pub const AGGREGATOR_V1: &str = "aggregator-v1";
pub const CHECK_IN_V1: &str = "check-in-v1";

const IDEAL_POINTS: f64 = 12.5;
const ACCEPTABLE_POINTS: f64 = 6.0;
const WEIGHT_TOLERANCE: f64 = 0.001;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightTable {
    pub name: String,
    pub version: u32,
    pub base: f64,
    pub vitals_weight: f64,
    pub habits_weight: f64,
    pub habit_weights: BTreeMap<Habit, f64>,
}

impl WeightTable {
    /// Window-level table: base 50, vitals 40%, habits 60%.
    pub fn aggregator_v1() -> Self {
        Self {
            name: AGGREGATOR_V1.to_string(),
            version: 1,
            base: 50.0,
            vitals_weight: 0.4,
            habits_weight: 0.6,
            habit_weights: BTreeMap::from([
                (Habit::Movement, 0.25),
                (Habit::Nutrition, 0.25),
                (Habit::Downshift, 0.20),
                (Habit::Social, 0.15),
                (Habit::Purpose, 0.15),
            ]),
        }
    }

    /// Check-in-level table: five habit factors, no vitals, no base.
    pub fn check_in_v1() -> Self {
        Self {
            name: CHECK_IN_V1.to_string(),
            version: 1,
            base: 0.0,
            vitals_weight: 0.0,
            habits_weight: 1.0,
            habit_weights: BTreeMap::from([
                (Habit::Movement, 0.30),
                (Habit::Nutrition, 0.20),
                (Habit::Downshift, 0.20),
                (Habit::Social, 0.15),
                (Habit::Purpose, 0.15),
            ]),
        }
    }

    pub fn named(name: &str) -> Result<Self> {
        match name {
            AGGREGATOR_V1 => Ok(Self::aggregator_v1()),
            CHECK_IN_V1 => Ok(Self::check_in_v1()),
            other => Err(EngineError::UnknownWeightTable(other.to_string())),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| EngineError::InvalidWeights {
            name: self.name.clone(),
            reason,
        };

        if let Some((habit, weight)) = self
            .habit_weights
            .iter()
            .find(|(_, weight)| !weight.is_finite() || **weight < 0.0)
        {
            return Err(invalid(format!("weight for {habit} is {weight}")));
        }
        if self.vitals_weight < 0.0 || self.habits_weight < 0.0 {
            return Err(invalid("component weights must be non-negative".to_string()));
        }
        let total: f64 = self.habit_weights.values().sum();
        if (total - 1.0).abs() > WEIGHT_TOLERANCE {
            return Err(invalid(format!("habit weights sum to {total:.3}")));
        }
        Ok(())
    }

    pub fn habit_weight(&self, habit: Habit) -> f64 {
        self.habit_weights.get(&habit).copied().unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UbziBreakdown {
    pub base: f64,
    pub vitals_sub_score: f64,
    pub vitals_contribution: f64,
    pub habits_sub_score: f64,
    pub habits_contribution: f64,
    pub raw: f64,
    pub ubzi: u8,
}

/// Points for one vital channel: full credit in the ideal band, partial in
/// the acceptable band. Channels without readings earn nothing.
fn band_points(ideal: bool, acceptable: bool) -> f64 {
    if ideal {
        IDEAL_POINTS
    } else if acceptable {
        ACCEPTABLE_POINTS
    } else {
        0.0
    }
}

fn heart_rate_points(hr: &ChannelStats) -> f64 {
    if hr.count == 0 {
        return 0.0;
    }
    let avg = hr.avg;
    band_points(
        (60.0..=100.0).contains(&avg),
        (50.0..=110.0).contains(&avg),
    )
}

fn blood_pressure_points(systolic: &ChannelStats, diastolic: &ChannelStats) -> f64 {
    if systolic.count == 0 || diastolic.count == 0 {
        return 0.0;
    }
    let (sys, dia) = (systolic.avg, diastolic.avg);
    band_points(sys < 120.0 && dia < 80.0, sys < 130.0 && dia < 85.0)
}

fn temperature_points(temp: &ChannelStats) -> f64 {
    if temp.count == 0 {
        return 0.0;
    }
    band_points(
        (97.8..=99.1).contains(&temp.avg),
        (97.0..=100.0).contains(&temp.avg),
    )
}

fn oxygen_points(o2: &ChannelStats) -> f64 {
    if o2.count == 0 {
        return 0.0;
    }
    band_points(o2.avg >= 95.0, o2.avg >= 92.0)
}

/// Sum of the four channel credits, 0 to 50.
pub fn vitals_sub_score(stats: &VitalStatistics) -> f64 {
    heart_rate_points(&stats.heart_rate)
        + blood_pressure_points(&stats.systolic, &stats.diastolic)
        + temperature_points(&stats.temperature)
        + oxygen_points(&stats.oxygen_saturation)
}

pub fn habits_sub_score(habits: &HabitScoreSet, table: &WeightTable) -> f64 {
    Habit::ALL
        .iter()
        .map(|habit| table.habit_weight(*habit) * habits.get(*habit))
        .sum()
}

pub fn ubzi_breakdown(
    stats: &VitalStatistics,
    habits: &HabitScoreSet,
    table: &WeightTable,
) -> UbziBreakdown {
    let vitals = vitals_sub_score(stats);
    let habit_score = habits_sub_score(habits, table);
    let vitals_contribution = vitals * table.vitals_weight;
    let habits_contribution = habit_score * table.habits_weight;
    let raw = table.base + vitals_contribution + habits_contribution;
    let ubzi = if raw.is_nan() {
        0
    } else {
        raw.clamp(0.0, 100.0).round() as u8
    };

    UbziBreakdown {
        base: table.base,
        vitals_sub_score: vitals,
        vitals_contribution,
        habits_sub_score: habit_score,
        habits_contribution,
        raw,
        ubzi,
    }
}

pub fn compose_ubzi(stats: &VitalStatistics, habits: &HabitScoreSet, table: &WeightTable) -> u8 {
    ubzi_breakdown(stats, habits, table).ubzi
}

/// Scores one check-in on its own, with no vitals window behind it.
pub fn score_check_in(check_in: &HabitCheckIn, table: &WeightTable) -> u8 {
    let mut habits = HabitScoreSet::default();
    for (habit, entry) in &check_in.habits {
        if let Some(score) = entry.score {
            habits.set(*habit, score);
        }
    }
    compose_ubzi(&VitalStatistics::default(), &habits, table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::HabitEntry;
    use chrono::{TimeZone, Utc};

    fn channel(avg: f64) -> ChannelStats {
        ChannelStats {
            avg,
            min: avg,
            max: avg,
            count: 1,
        }
    }

    fn stats(hr: f64, sys: f64, dia: f64, temp: f64, o2: f64) -> VitalStatistics {
        VitalStatistics {
            heart_rate: channel(hr),
            systolic: channel(sys),
            diastolic: channel(dia),
            temperature: channel(temp),
            oxygen_saturation: channel(o2),
        }
    }

    #[test]
    fn built_in_tables_are_valid() {
        WeightTable::aggregator_v1().validate().unwrap();
        WeightTable::check_in_v1().validate().unwrap();
    }

    #[test]
    fn unknown_table_name_is_rejected() {
        assert!(matches!(
            WeightTable::named("legacy"),
            Err(EngineError::UnknownWeightTable(_))
        ));
        assert_eq!(WeightTable::named(CHECK_IN_V1).unwrap().base, 0.0);
    }

    #[test]
    fn weights_that_do_not_sum_to_one_are_rejected() {
        let mut table = WeightTable::aggregator_v1();
        table.habit_weights.insert(Habit::Purpose, 0.5);
        assert!(matches!(
            table.validate(),
            Err(EngineError::InvalidWeights { .. })
        ));

        let mut negative = WeightTable::aggregator_v1();
        negative.habit_weights.insert(Habit::Purpose, -0.15);
        negative.habit_weights.insert(Habit::Social, 0.45);
        assert!(negative.validate().is_err());
    }

    #[test]
    fn ideal_vitals_and_perfect_habits_hit_the_ceiling() {
        let ideal = stats(72.0, 118.0, 78.0, 98.6, 98.0);
        let breakdown = ubzi_breakdown(
            &ideal,
            &HabitScoreSet::uniform(100.0),
            &WeightTable::aggregator_v1(),
        );
        assert_eq!(breakdown.vitals_sub_score, 50.0);
        assert_eq!(breakdown.vitals_contribution, 20.0);
        assert!((breakdown.raw - 130.0).abs() < 1e-9);
        assert_eq!(breakdown.ubzi, 100);
    }

    #[test]
    fn acceptable_band_earns_partial_credit() {
        let acceptable = stats(105.0, 125.0, 82.0, 97.5, 93.0);
        assert_eq!(vitals_sub_score(&acceptable), 24.0);
        let poor = stats(130.0, 150.0, 95.0, 101.0, 89.0);
        assert_eq!(vitals_sub_score(&poor), 0.0);
    }

    #[test]
    fn channels_without_readings_earn_nothing() {
        assert_eq!(vitals_sub_score(&VitalStatistics::default()), 0.0);
        let ubzi = compose_ubzi(
            &VitalStatistics::default(),
            &HabitScoreSet::default(),
            &WeightTable::aggregator_v1(),
        );
        assert_eq!(ubzi, 50);
    }

    #[test]
    fn composed_score_is_clamped() {
        let table = WeightTable::aggregator_v1();
        let ideal = stats(72.0, 118.0, 78.0, 98.6, 98.0);
        assert_eq!(compose_ubzi(&ideal, &HabitScoreSet::uniform(10_000.0), &table), 100);
        assert_eq!(
            compose_ubzi(&VitalStatistics::default(), &HabitScoreSet::uniform(-500.0), &table),
            0
        );
        assert_eq!(
            compose_ubzi(&VitalStatistics::default(), &HabitScoreSet::uniform(f64::NAN), &table),
            0
        );
    }

    #[test]
    fn raising_one_habit_never_lowers_the_score() {
        let table = WeightTable::aggregator_v1();
        let vitals = stats(88.0, 124.0, 79.0, 98.0, 94.0);
        for habit in Habit::ALL {
            let mut previous = 0u8;
            for step in 0..=20 {
                let mut habits = HabitScoreSet::uniform(35.0);
                habits.set(habit, step as f64 * 5.0);
                let ubzi = compose_ubzi(&vitals, &habits, &table);
                assert!(ubzi >= previous, "{habit} at {} dropped the score", step * 5);
                previous = ubzi;
            }
        }
    }

    #[test]
    fn check_in_scoring_uses_five_factor_weights() {
        let check_in = HabitCheckIn {
            resident_id: "R-1".to_string(),
            timestamp: Utc.with_ymd_and_hms(2026, 2, 2, 9, 0, 0).unwrap(),
            habits: BTreeMap::from([
                (Habit::Movement, HabitEntry::scored(80.0)),
                (Habit::Nutrition, HabitEntry::scored(60.0)),
                (Habit::Downshift, HabitEntry::scored(50.0)),
                (Habit::Social, HabitEntry::scored(100.0)),
            ]),
        };
        // 0.30*80 + 0.20*60 + 0.20*50 + 0.15*100 + 0.15*0 = 61
        assert_eq!(score_check_in(&check_in, &WeightTable::check_in_v1()), 61);
    }
}
