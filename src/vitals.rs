use crate::models::{ChannelStats, VitalSample, VitalStatistics};

/// Reduces a window of samples into per-channel avg/min/max.
///
/// Samples missing a channel only drop out of that channel. A channel with
/// no readings (including the empty window) reports all zeros.
pub fn calculate_vital_statistics(samples: &[VitalSample]) -> VitalStatistics {
    let bp = samples.iter().filter_map(|s| s.blood_pressure);

    VitalStatistics {
        heart_rate: channel_stats(samples.iter().filter_map(|s| s.heart_rate)),
        systolic: channel_stats(bp.clone().map(|b| b.systolic)),
        diastolic: channel_stats(bp.map(|b| b.diastolic)),
        temperature: channel_stats(samples.iter().filter_map(|s| s.temperature)),
        oxygen_saturation: channel_stats(samples.iter().filter_map(|s| s.oxygen_saturation)),
    }
}

fn channel_stats(values: impl Iterator<Item = f64>) -> ChannelStats {
    let mut sum = 0.0;
    let mut count = 0usize;
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;

    for value in values.filter(|v| v.is_finite()) {
        sum += value;
        count += 1;
        min = min.min(value);
        max = max.max(value);
    }

    if count == 0 {
        return ChannelStats::default();
    }

    // Rounding can push the mean past an extreme when all readings agree
    // to more than one decimal, so keep it inside [min, max].
    let avg = round_to(sum / count as f64, 1).clamp(min, max);
    ChannelStats {
        avg,
        min,
        max,
        count,
    }
}

pub(crate) fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Share of expected samples actually received, as a 0-100 percentage.
pub fn data_quality(received: usize, expected: usize) -> f64 {
    if expected == 0 {
        return 0.0;
    }
    let pct = received as f64 / expected as f64 * 100.0;
    round_to(pct.min(100.0), 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BloodPressure;
    use chrono::{Duration, TimeZone, Utc};

    fn sample(
        minute: i64,
        hr: Option<f64>,
        bp: Option<(f64, f64)>,
        temp: Option<f64>,
        o2: Option<f64>,
    ) -> VitalSample {
        VitalSample {
            resident_id: "R-1".to_string(),
            timestamp: Utc.with_ymd_and_hms(2026, 2, 2, 8, 0, 0).unwrap() + Duration::minutes(minute),
            heart_rate: hr,
            blood_pressure: bp.map(|(systolic, diastolic)| BloodPressure {
                systolic,
                diastolic,
            }),
            temperature: temp,
            oxygen_saturation: o2,
        }
    }

    #[test]
    fn empty_window_yields_zero_statistics() {
        let stats = calculate_vital_statistics(&[]);
        for (_, channel) in stats.channels() {
            assert_eq!(*channel, ChannelStats::default());
        }
        assert_eq!(stats, calculate_vital_statistics(&[]));
    }

    #[test]
    fn averages_are_rounded_to_one_decimal() {
        let samples = vec![
            sample(0, Some(70.0), None, None, None),
            sample(5, Some(71.0), None, None, None),
            sample(10, Some(73.0), None, None, None),
        ];
        let stats = calculate_vital_statistics(&samples);
        assert_eq!(stats.heart_rate.avg, 71.3);
        assert_eq!(stats.heart_rate.min, 70.0);
        assert_eq!(stats.heart_rate.max, 73.0);
        assert_eq!(stats.heart_rate.count, 3);
    }

    #[test]
    fn partial_samples_only_affect_their_channels() {
        let samples = vec![
            sample(0, Some(80.0), Some((120.0, 80.0)), None, Some(97.0)),
            sample(5, None, Some((130.0, 84.0)), Some(98.4), None),
            sample(10, Some(60.0), None, Some(98.8), None),
        ];
        let stats = calculate_vital_statistics(&samples);
        assert_eq!(stats.heart_rate.avg, 70.0);
        assert_eq!(stats.heart_rate.count, 2);
        assert_eq!(stats.systolic.avg, 125.0);
        assert_eq!(stats.diastolic.avg, 82.0);
        assert_eq!(stats.temperature.avg, 98.6);
        assert_eq!(stats.oxygen_saturation.count, 1);
        assert_eq!(stats.oxygen_saturation.min, 97.0);
    }

    #[test]
    fn min_avg_max_stay_ordered() {
        let samples: Vec<VitalSample> = (0..40)
            .map(|i| {
                let hr = 55.0 + (i * 7 % 23) as f64 + 0.04;
                let sys = 105.0 + (i * 11 % 31) as f64;
                let temp = 97.61 + (i % 5) as f64 * 0.33;
                sample(i, Some(hr), Some((sys, sys - 40.0)), Some(temp), Some(93.05))
            })
            .collect();
        let stats = calculate_vital_statistics(&samples);
        for (name, channel) in stats.channels() {
            assert!(channel.min <= channel.avg, "{name}: min > avg");
            assert!(channel.avg <= channel.max, "{name}: avg > max");
        }
    }

    #[test]
    fn data_quality_is_capped() {
        assert_eq!(data_quality(6, 12), 50.0);
        assert_eq!(data_quality(30, 12), 100.0);
        assert_eq!(data_quality(3, 0), 0.0);
    }
}
