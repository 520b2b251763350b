//! Consecutive-day habit streaks.
//!
//! Streak state is owned by the caller: [`compute_streaks`] rebuilds it from
//! a window of check-ins, [`update_streaks`] advances a persisted state with
//! days it has not seen yet.

use std::collections::BTreeMap;

use chrono::{Duration, NaiveDate};

use crate::config::DayRequirements;
use crate::models::{Habit, HabitCheckIn, StreakState};

/// Same-day check-ins folded into one record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DaySummary {
    pub date: NaiveDate,
    pub movement_max: Option<f64>,
    pub downshift_minutes: f64,
    pub plant_based_meals: u32,
    pub total_meals: u32,
    pub social_interactions: u32,
    pub purpose_pulse: Option<f64>,
}

impl DaySummary {
    fn new(date: NaiveDate) -> Self {
        Self {
            date,
            ..Self::default()
        }
    }

    fn absorb(&mut self, check_in: &HabitCheckIn) {
        for (habit, entry) in &check_in.habits {
            match habit {
                Habit::Movement => {
                    if let Some(score) = entry.score {
                        self.movement_max = Some(self.movement_max.map_or(score, |m| m.max(score)));
                    }
                }
                Habit::Downshift => self.downshift_minutes += entry.minutes.unwrap_or(0.0),
                Habit::Nutrition => {
                    self.plant_based_meals += entry.plant_based_meals.unwrap_or(0);
                    self.total_meals += entry.total_meals.unwrap_or(0);
                }
                Habit::Social => self.social_interactions += entry.interactions.unwrap_or(0),
                Habit::Purpose => {
                    if let Some(pulse) = entry.pulse {
                        self.purpose_pulse = Some(self.purpose_pulse.map_or(pulse, |p| p.max(pulse)));
                    }
                }
            }
        }
    }

    pub fn plant_based_ratio(&self) -> Option<f64> {
        (self.total_meals > 0).then(|| self.plant_based_meals as f64 / self.total_meals as f64)
    }

    pub fn meets(&self, habit: Habit, req: &DayRequirements) -> bool {
        match habit {
            Habit::Movement => self.movement_max.is_some_and(|m| m >= req.movement_min_score),
            Habit::Downshift => self.downshift_minutes >= req.downshift_min_minutes,
            Habit::Nutrition => self
                .plant_based_ratio()
                .is_some_and(|r| r >= req.plant_based_min_ratio),
            Habit::Social => self.social_interactions >= req.social_min_interactions,
            Habit::Purpose => self.purpose_pulse.is_some_and(|p| p > req.purpose_min_pulse),
        }
    }
}

/// Groups check-ins by UTC calendar day, oldest first.
pub fn summarize_days(check_ins: &[HabitCheckIn]) -> Vec<DaySummary> {
    let mut days: BTreeMap<NaiveDate, DaySummary> = BTreeMap::new();
    for check_in in check_ins {
        let date = check_in.timestamp.date_naive();
        days.entry(date)
            .or_insert_with(|| DaySummary::new(date))
            .absorb(check_in);
    }
    days.into_values().collect()
}

impl StreakState {
    pub fn new(habit: Habit) -> Self {
        Self {
            habit,
            current_streak: 0,
            longest_streak: 0,
            last_qualifying_day: None,
            last_evaluated_day: None,
        }
    }

    /// Applies one day's outcome. Days at or before the last evaluated day
    /// are ignored and return false.
    pub fn record_day(&mut self, date: NaiveDate, met: bool) -> bool {
        if self.last_evaluated_day.is_some_and(|last| date <= last) {
            return false;
        }
        self.last_evaluated_day = Some(date);

        if met {
            self.current_streak = match self.last_qualifying_day {
                Some(prev) if date - prev == Duration::days(1) => self.current_streak + 1,
                _ => 1,
            };
            self.last_qualifying_day = Some(date);
            self.longest_streak = self.longest_streak.max(self.current_streak);
        } else {
            self.current_streak = 0;
        }
        true
    }

    /// The streak as it stands on `today`: still alive only if the last
    /// qualifying day is today or yesterday.
    pub fn current_as_of(&self, today: NaiveDate) -> u32 {
        match self.last_qualifying_day {
            Some(last) if today - last <= Duration::days(1) => self.current_streak,
            _ => 0,
        }
    }
}

pub fn update_streaks(
    states: &mut BTreeMap<Habit, StreakState>,
    check_ins: &[HabitCheckIn],
    req: &DayRequirements,
) {
    for day in summarize_days(check_ins) {
        for habit in Habit::ALL {
            states
                .entry(habit)
                .or_insert_with(|| StreakState::new(habit))
                .record_day(day.date, day.meets(habit, req));
        }
    }
}

pub fn compute_streaks(
    check_ins: &[HabitCheckIn],
    req: &DayRequirements,
) -> BTreeMap<Habit, StreakState> {
    let mut states: BTreeMap<Habit, StreakState> = Habit::ALL
        .iter()
        .map(|habit| (*habit, StreakState::new(*habit)))
        .collect();
    update_streaks(&mut states, check_ins, req);
    states
}
