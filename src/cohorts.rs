use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::{Cohort, CohortSummary, Resident, ResidentMetrics};

/// Rules in the same group are mutually exclusive: the first match wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleGroup {
    AgeBand,
    Condition,
}

#[derive(Clone, Copy)]
pub struct CohortRule {
    pub cohort: Cohort,
    pub group: RuleGroup,
    pub matches: fn(&Resident, u32) -> bool,
}

/// Age bands from oldest down, then the chronic-condition cohort.
pub fn default_rules() -> Vec<CohortRule> {
    vec![
        CohortRule {
            cohort: Cohort::Senior,
            group: RuleGroup::AgeBand,
            matches: |_, age| age >= 65,
        },
        CohortRule {
            cohort: Cohort::Adult,
            group: RuleGroup::AgeBand,
            matches: |_, age| age >= 25,
        },
        CohortRule {
            cohort: Cohort::Teen,
            group: RuleGroup::AgeBand,
            matches: |_, age| age >= 13,
        },
        CohortRule {
            cohort: Cohort::Chronic,
            group: RuleGroup::Condition,
            matches: |resident, _| !resident.chronic_conditions.is_empty(),
        },
    ]
}

pub fn assign_cohorts(resident: &Resident, as_of: NaiveDate, rules: &[CohortRule]) -> BTreeSet<Cohort> {
    let age = resident.age_on(as_of);
    let mut matched_groups = Vec::new();
    let mut cohorts = BTreeSet::new();

    for rule in rules {
        if matched_groups.contains(&rule.group) {
            continue;
        }
        if (rule.matches)(resident, age) {
            matched_groups.push(rule.group);
            cohorts.insert(rule.cohort);
        }
    }

    cohorts
}

/// One summary per non-empty cohort. Residents without metrics (failed or
/// skipped scoring) are left out.
pub fn aggregate_cohorts(
    roster: &[Resident],
    metrics: &HashMap<String, ResidentMetrics>,
    as_of: NaiveDate,
    rules: &[CohortRule],
) -> Vec<CohortSummary> {
    let mut members: BTreeMap<Cohort, Vec<&ResidentMetrics>> = BTreeMap::new();

    for resident in roster {
        let Some(resident_metrics) = metrics.get(&resident.resident_id) else {
            debug!(resident_id = %resident.resident_id, "no metrics, skipping cohort membership");
            continue;
        };
        for cohort in assign_cohorts(resident, as_of, rules) {
            members.entry(cohort).or_default().push(resident_metrics);
        }
    }

    members
        .into_iter()
        .filter(|(_, group)| !group.is_empty())
        .map(|(cohort, group)| summarize(cohort, &group))
        .collect()
}

fn summarize(cohort: Cohort, group: &[&ResidentMetrics]) -> CohortSummary {
    let count = group.len();
    let ubzi_total: f64 = group.iter().map(|m| m.ubzi as f64).sum();
    let quality_total: f64 = group.iter().map(|m| m.data_quality).sum();

    CohortSummary {
        cohort_id: cohort,
        resident_count: count,
        avg_ubzi: (ubzi_total / count as f64).round() as i64,
        min_ubzi: group.iter().map(|m| m.ubzi).min().unwrap_or(0),
        max_ubzi: group.iter().map(|m| m.ubzi).max().unwrap_or(0),
        total_alerts: group.iter().map(|m| m.alert_count).sum(),
        avg_data_quality: (quality_total / count as f64).round() as i64,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Improving,
    Declining,
    Stable,
    New,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CohortTrend {
    pub cohort_id: Cohort,
    #[serde(rename = "avgUBZI")]
    pub avg_ubzi: i64,
    pub ubzi_delta: Option<i64>,
    pub alert_delta: Option<i64>,
    pub direction: TrendDirection,
}

/// Compares this cycle's summaries with the previous cycle's. A delta
/// within `threshold` points counts as stable.
pub fn cohort_trends(
    current: &[CohortSummary],
    previous: &[CohortSummary],
    threshold: f64,
) -> Vec<CohortTrend> {
    current
        .iter()
        .map(|summary| {
            let before = previous.iter().find(|p| p.cohort_id == summary.cohort_id);
            let ubzi_delta = before.map(|p| summary.avg_ubzi - p.avg_ubzi);
            let alert_delta = before.map(|p| summary.total_alerts as i64 - p.total_alerts as i64);
            let direction = match ubzi_delta {
                None => TrendDirection::New,
                Some(delta) if (delta as f64).abs() < threshold => TrendDirection::Stable,
                Some(delta) if delta > 0 => TrendDirection::Improving,
                Some(_) => TrendDirection::Declining,
            };
            CohortTrend {
                cohort_id: summary.cohort_id,
                avg_ubzi: summary.avg_ubzi,
                ubzi_delta,
                alert_delta,
                direction,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn as_of() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 6, 1).unwrap()
    }

    fn resident(id: &str, age: Option<u32>, conditions: &[&str]) -> Resident {
        Resident {
            resident_id: id.to_string(),
            name: id.to_string(),
            date_of_birth: None,
            age,
            chronic_conditions: conditions.iter().map(|c| c.to_string()).collect(),
            cohort: None,
        }
    }

    fn metrics(id: &str, ubzi: u8, alerts: usize, quality: f64) -> (String, ResidentMetrics) {
        (
            id.to_string(),
            ResidentMetrics {
                resident_id: id.to_string(),
                ubzi,
                alert_count: alerts,
                data_quality: quality,
            },
        )
    }

    #[test]
    fn age_bands_are_exclusive_and_chronic_is_additive() {
        let rules = default_rules();
        let senior = resident("a", Some(70), &["hypertension"]);
        assert_eq!(
            assign_cohorts(&senior, as_of(), &rules),
            BTreeSet::from([Cohort::Senior, Cohort::Chronic])
        );
        assert_eq!(
            assign_cohorts(&resident("b", Some(25), &[]), as_of(), &rules),
            BTreeSet::from([Cohort::Adult])
        );
        assert_eq!(
            assign_cohorts(&resident("c", Some(13), &[]), as_of(), &rules),
            BTreeSet::from([Cohort::Teen])
        );
        assert!(assign_cohorts(&resident("d", Some(9), &[]), as_of(), &rules).is_empty());
        assert_eq!(
            assign_cohorts(&resident("e", None, &[]), as_of(), &rules),
            BTreeSet::from([Cohort::Adult])
        );
    }

    #[test]
    fn one_resident_per_age_band() {
        let roster = vec![
            resident("r70", Some(70), &[]),
            resident("r45", Some(45), &[]),
            resident("r17", Some(17), &[]),
        ];
        let metrics: HashMap<_, _> = [
            metrics("r70", 80, 1, 90.0),
            metrics("r45", 60, 0, 80.0),
            metrics("r17", 90, 2, 70.0),
        ]
        .into_iter()
        .collect();

        let summaries = aggregate_cohorts(&roster, &metrics, as_of(), &default_rules());
        assert_eq!(summaries.len(), 3);
        let find = |cohort: Cohort| summaries.iter().find(|s| s.cohort_id == cohort).unwrap();
        assert_eq!(find(Cohort::Senior).avg_ubzi, 80);
        assert_eq!(find(Cohort::Adult).avg_ubzi, 60);
        assert_eq!(find(Cohort::Teen).avg_ubzi, 90);
        assert!(summaries.iter().all(|s| s.resident_count == 1));
        assert!(summaries.iter().all(|s| s.cohort_id != Cohort::Chronic));
    }

    #[test]
    fn summary_statistics_cover_all_members() {
        let roster = vec![
            resident("a", Some(66), &["diabetes"]),
            resident("b", Some(80), &[]),
            resident("c", Some(30), &["asthma"]),
            resident("missing", Some(75), &[]),
        ];
        let metrics: HashMap<_, _> = [
            metrics("a", 71, 2, 90.0),
            metrics("b", 64, 1, 85.0),
            metrics("c", 55, 4, 60.0),
        ]
        .into_iter()
        .collect();

        let summaries = aggregate_cohorts(&roster, &metrics, as_of(), &default_rules());
        let senior = summaries.iter().find(|s| s.cohort_id == Cohort::Senior).unwrap();
        assert_eq!(senior.resident_count, 2);
        assert_eq!(senior.avg_ubzi, 68);
        assert_eq!(senior.min_ubzi, 64);
        assert_eq!(senior.max_ubzi, 71);
        assert_eq!(senior.total_alerts, 3);
        assert_eq!(senior.avg_data_quality, 88);

        let chronic = summaries.iter().find(|s| s.cohort_id == Cohort::Chronic).unwrap();
        assert_eq!(chronic.resident_count, 2);
        assert_eq!(chronic.avg_ubzi, 63);
        assert_eq!(chronic.total_alerts, 6);
        assert_eq!(chronic.avg_data_quality, 75);
    }

    #[test]
    fn trends_compare_against_previous_cycle() {
        let summary = |cohort, avg_ubzi, alerts| CohortSummary {
            cohort_id: cohort,
            resident_count: 3,
            avg_ubzi,
            min_ubzi: 40,
            max_ubzi: 90,
            total_alerts: alerts,
            avg_data_quality: 90,
        };
        let previous = vec![
            summary(Cohort::Senior, 70, 4),
            summary(Cohort::Adult, 60, 2),
            summary(Cohort::Teen, 80, 0),
        ];
        let current = vec![
            summary(Cohort::Senior, 75, 1),
            summary(Cohort::Adult, 61, 2),
            summary(Cohort::Teen, 72, 3),
            summary(Cohort::Chronic, 58, 5),
        ];

        let trends = cohort_trends(&current, &previous, 2.0);
        assert_eq!(trends[0].direction, TrendDirection::Improving);
        assert_eq!(trends[0].ubzi_delta, Some(5));
        assert_eq!(trends[0].alert_delta, Some(-3));
        assert_eq!(trends[1].direction, TrendDirection::Stable);
        assert_eq!(trends[2].direction, TrendDirection::Declining);
        assert_eq!(trends[3].direction, TrendDirection::New);
        assert_eq!(trends[3].ubzi_delta, None);
    }
}
