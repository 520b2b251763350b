use std::collections::BTreeMap;
use std::fmt::Write;

use chrono::{DateTime, NaiveDate, Utc};

use crate::cohorts::{CohortTrend, TrendDirection};
use crate::models::{AggregationWindow, Alert, CohortSummary, Habit, ResidentScore, StreakState};

pub struct ReportInput<'a> {
    pub window: AggregationWindow,
    pub generated_at: DateTime<Utc>,
    pub summaries: &'a [CohortSummary],
    pub trends: &'a [CohortTrend],
    pub scores: &'a [ResidentScore],
    pub skipped: &'a [String],
    pub alerts: &'a [Alert],
    pub streaks: &'a [(String, BTreeMap<Habit, StreakState>)],
}

fn direction_label(direction: TrendDirection) -> &'static str {
    match direction {
        TrendDirection::Improving => "improving",
        TrendDirection::Declining => "declining",
        TrendDirection::Stable => "stable",
        TrendDirection::New => "new",
    }
}

fn signed(delta: Option<i64>) -> String {
    match delta {
        Some(d) if d > 0 => format!("+{d}"),
        Some(d) => d.to_string(),
        None => "n/a".to_string(),
    }
}

/// Longest live streak per resident as of `today`, best first.
pub fn streak_leaders(
    streaks: &[(String, BTreeMap<Habit, StreakState>)],
    today: NaiveDate,
) -> Vec<(String, Habit, u32)> {
    let mut leaders: Vec<(String, Habit, u32)> = streaks
        .iter()
        .filter_map(|(resident_id, states)| {
            states
                .values()
                .map(|s| (s.habit, s.current_as_of(today)))
                .max_by_key(|(_, days)| *days)
                .filter(|(_, days)| *days > 0)
                .map(|(habit, days)| (resident_id.clone(), habit, days))
        })
        .collect();
    leaders.sort_by(|a, b| b.2.cmp(&a.2).then_with(|| a.0.cmp(&b.0)));
    leaders
}

pub fn build_report(input: &ReportInput<'_>) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Urban Blue Zone Wellness Report");
    let _ = writeln!(
        output,
        "Generated {} for the {} window",
        input.generated_at.format("%Y-%m-%d %H:%M UTC"),
        input.window.as_str()
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Cohorts");

    if input.summaries.is_empty() {
        let _ = writeln!(output, "No scored residents in this window.");
    } else {
        let _ = writeln!(
            output,
            "| Cohort | Residents | Avg UBZI | Min | Max | Alerts | Data quality |"
        );
        let _ = writeln!(output, "|---|---|---|---|---|---|---|");
        for summary in input.summaries {
            let _ = writeln!(
                output,
                "| {} | {} | {} | {} | {} | {} | {}% |",
                summary.cohort_id,
                summary.resident_count,
                summary.avg_ubzi,
                summary.min_ubzi,
                summary.max_ubzi,
                summary.total_alerts,
                summary.avg_data_quality
            );
        }
    }

    if !input.trends.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Trends vs Previous Window");
        for trend in input.trends {
            let _ = writeln!(
                output,
                "- {}: {} (UBZI {}, alerts {})",
                trend.cohort_id,
                direction_label(trend.direction),
                signed(trend.ubzi_delta),
                signed(trend.alert_delta)
            );
        }
    }

    let mut ranked = input.scores.to_vec();
    ranked.sort_by(|a, b| b.ubzi.cmp(&a.ubzi).then_with(|| a.resident_id.cmp(&b.resident_id)));

    let _ = writeln!(output);
    let _ = writeln!(output, "## Highest UBZI");
    if ranked.is_empty() {
        let _ = writeln!(output, "No residents scored.");
    } else {
        for score in ranked.iter().take(5) {
            let _ = writeln!(
                output,
                "- {} UBZI {} ({} alerts, data quality {:.0}%)",
                score.resident_id, score.ubzi, score.alert_count, score.data_quality
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Needs Attention");
    if ranked.is_empty() {
        let _ = writeln!(output, "No residents scored.");
    } else {
        for score in ranked.iter().rev().take(5) {
            let _ = writeln!(
                output,
                "- {} UBZI {} ({} alerts, data quality {:.0}%)",
                score.resident_id, score.ubzi, score.alert_count, score.data_quality
            );
        }
    }
    if !input.skipped.is_empty() {
        let _ = writeln!(
            output,
            "- Not scored (data unavailable): {}",
            input.skipped.join(", ")
        );
    }

    let mut recent = input.alerts.to_vec();
    recent.sort_by(|a, b| {
        b.severity
            .cmp(&a.severity)
            .then_with(|| b.timestamp.cmp(&a.timestamp))
    });
    let _ = writeln!(output);
    let _ = writeln!(output, "## Recent Alerts");
    if recent.is_empty() {
        let _ = writeln!(output, "No alerts recorded for this window.");
    } else {
        for alert in recent.iter().take(10) {
            let _ = writeln!(
                output,
                "- [{}] {} {} at {}: {}",
                alert.severity.as_str(),
                alert.resident_id,
                alert.alert_type.as_str(),
                alert.timestamp.format("%Y-%m-%d %H:%M"),
                alert.details
            );
        }
    }

    let leaders = streak_leaders(input.streaks, input.generated_at.date_naive());
    let _ = writeln!(output);
    let _ = writeln!(output, "## Streak Leaders");
    if leaders.is_empty() {
        let _ = writeln!(output, "No active streaks.");
    } else {
        for (resident_id, habit, days) in leaders.iter().take(5) {
            let _ = writeln!(output, "- {resident_id}: {habit} for {days} days");
        }
    }

    output
}
