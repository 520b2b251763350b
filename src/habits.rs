use crate::models::{Habit, HabitCheckIn, HabitScoreSet};
use crate::vitals::round_to;

/// Mean score per habit across the check-ins that reported it, rounded to
/// two decimals. Habits no check-in reported score 0.
pub fn calculate_habit_scores(check_ins: &[HabitCheckIn]) -> HabitScoreSet {
    let mut scores = HabitScoreSet::default();

    for habit in Habit::ALL {
        let mut total = 0.0;
        let mut reported = 0usize;

        for check_in in check_ins {
            if let Some(score) = check_in
                .habits
                .get(&habit)
                .and_then(|entry| entry.score)
                .filter(|score| score.is_finite())
            {
                total += score;
                reported += 1;
            }
        }

        let avg = if reported == 0 {
            0.0
        } else {
            round_to(total / reported as f64, 2)
        };
        scores.set(habit, avg);
    }

    scores
}
