//! Commit rhythm detection.
//!
//! Buckets commit timestamps by weekday, hour and inter-commit interval and
//! reports buckets that deviate from a uniform spread. Interval history is
//! also checked for a steady cadence or for bursts in otherwise irregular
//! activity.

use std::collections::BTreeMap;
use std::time::Instant;

use changepulse_core::{
    Budget, EventSource, Metrics, ProjectId, PulseError, TemporalConfig, TemporalPattern,
    TemporalPatternType,
};
use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::snapshot::{mark_timed_out, Snapshot};

const ANALYZER: &str = "temporal";

const HOUR: i64 = 3_600;
const DAY: i64 = 86_400;
const WEEK: i64 = 7 * DAY;

const WEEKDAYS: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

/// Result of a rhythm run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemporalOutput {
    /// Patterns ordered by type, then deviation, then bucket.
    pub patterns: Vec<TemporalPattern>,
    /// Run metrics.
    pub metrics: Metrics,
}

#[derive(Debug, Clone, Copy)]
enum Dimension {
    Weekday,
    Hour,
    Interval,
}

/// Coarse class of the gap between consecutive commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IntervalClass {
    UnderHour,
    UnderDay,
    UnderWeek,
    WeekOrMore,
}

impl IntervalClass {
    const ALL: [IntervalClass; 4] = [
        IntervalClass::UnderHour,
        IntervalClass::UnderDay,
        IntervalClass::UnderWeek,
        IntervalClass::WeekOrMore,
    ];

    fn of(secs: i64) -> Self {
        if secs < HOUR {
            IntervalClass::UnderHour
        } else if secs < DAY {
            IntervalClass::UnderDay
        } else if secs < WEEK {
            IntervalClass::UnderWeek
        } else {
            IntervalClass::WeekOrMore
        }
    }

    fn label(self) -> &'static str {
        match self {
            IntervalClass::UnderHour => "<1h",
            IntervalClass::UnderDay => "1h-1d",
            IntervalClass::UnderWeek => "1d-1w",
            IntervalClass::WeekOrMore => ">=1w",
        }
    }
}

/// Detects weekday, hour and interval concentration, periodic cadence and
/// bursts.
///
/// # Examples
///
/// ```
/// use changepulse_core::{Budget, TemporalConfig};
/// use changepulse_patterns::snapshot::Snapshot;
/// use changepulse_patterns::temporal::TemporalAnalyzer;
///
/// let analyzer = TemporalAnalyzer::new(TemporalConfig::default()).unwrap();
/// let output = analyzer.analyze_snapshot(&Snapshot::empty("demo".into()), &Budget::unlimited());
/// assert!(output.patterns.is_empty());
/// assert!(!output.metrics.notes.is_empty());
/// ```
#[derive(Debug, Clone)]
pub struct TemporalAnalyzer {
    config: TemporalConfig,
}

impl TemporalAnalyzer {
    /// Create an analyzer after validating `config`.
    ///
    /// # Errors
    ///
    /// Returns [`PulseError::Config`] on an invalid threshold.
    pub fn new(config: TemporalConfig) -> Result<Self, PulseError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Fetch `project` from `source` and analyze it.
    ///
    /// # Errors
    ///
    /// Only fails when the event source does.
    pub fn analyze(
        &self,
        source: &dyn EventSource,
        project: &ProjectId,
    ) -> Result<TemporalOutput, PulseError> {
        let snapshot = Snapshot::load(source, project)?;
        Ok(self.analyze_snapshot(&snapshot, &Budget::unlimited()))
    }

    /// Detect rhythms in `snapshot`.
    ///
    /// Histories shorter than `min_sample_size` yield no patterns and an
    /// insufficient-data note.
    pub fn analyze_snapshot(&self, snapshot: &Snapshot, budget: &Budget) -> TemporalOutput {
        let started = Instant::now();
        let mut metrics = snapshot.base_metrics();

        // Snapshot validation already rejected unrepresentable timestamps
        let times: Vec<DateTime<Utc>> = snapshot
            .commits
            .iter()
            .filter_map(|commit| DateTime::from_timestamp(commit.timestamp, 0))
            .collect();
        metrics.records_analyzed = times.len();

        if times.len() < self.config.min_sample_size {
            metrics.note(PulseError::InsufficientData {
                analyzer: ANALYZER,
                required: self.config.min_sample_size,
                actual: times.len(),
            });
            return TemporalOutput {
                patterns: Vec::new(),
                metrics: metrics.finish(started),
            };
        }

        let mut patterns = Vec::new();
        for dimension in [Dimension::Weekday, Dimension::Hour, Dimension::Interval] {
            if budget.is_exhausted() {
                mark_timed_out(&mut metrics, ANALYZER, budget);
                break;
            }
            patterns.extend(match dimension {
                Dimension::Weekday => self.weekday_patterns(&times),
                Dimension::Hour => self.hour_patterns(&times),
                Dimension::Interval => self.interval_patterns(&times),
            });
        }

        patterns.sort_by(|a, b| {
            a.pattern_type
                .cmp(&b.pattern_type)
                .then_with(|| b.deviation_score.total_cmp(&a.deviation_score))
                .then_with(|| a.bucket_key.cmp(&b.bucket_key))
        });
        debug!(
            project = %snapshot.project,
            commits = times.len(),
            patterns = patterns.len(),
            "rhythm detection finished"
        );

        TemporalOutput {
            patterns,
            metrics: metrics.finish(started),
        }
    }

    fn weekday_patterns(&self, times: &[DateTime<Utc>]) -> Vec<TemporalPattern> {
        let mut counts = [0u32; 7];
        for time in times {
            counts[time.weekday().num_days_from_monday() as usize] += 1;
        }
        self.concentrations(&counts, TemporalPatternType::WeekdayConcentration, |i| {
            WEEKDAYS[i].to_string()
        })
    }

    fn hour_patterns(&self, times: &[DateTime<Utc>]) -> Vec<TemporalPattern> {
        let mut counts = [0u32; 24];
        for time in times {
            counts[time.hour() as usize] += 1;
        }
        self.concentrations(&counts, TemporalPatternType::HourConcentration, |i| {
            format!("{i:02}")
        })
    }

    /// Over-represented buckets whose deviation clears the threshold.
    ///
    /// Deviation is `|observed - expected| / expected` against a uniform
    /// spread, capped at 1.
    fn concentrations(
        &self,
        counts: &[u32],
        pattern_type: TemporalPatternType,
        label: impl Fn(usize) -> String,
    ) -> Vec<TemporalPattern> {
        let total: u32 = counts.iter().sum();
        if total == 0 || counts.len() < 2 {
            return Vec::new();
        }
        let n = f64::from(total);
        let expected = n / counts.len() as f64;

        counts
            .iter()
            .enumerate()
            .filter_map(|(i, &observed)| {
                let excess = f64::from(observed) - expected;
                if excess <= 0.0 {
                    return None;
                }
                let deviation = (excess / expected).min(1.0);
                (deviation >= self.config.deviation_threshold).then(|| TemporalPattern {
                    pattern_type,
                    bucket_key: label(i),
                    deviation_score: deviation,
                    confidence: deviation,
                })
            })
            .collect()
    }

    fn interval_patterns(&self, times: &[DateTime<Utc>]) -> Vec<TemporalPattern> {
        let intervals: Vec<i64> = times
            .windows(2)
            .map(|w| (w[1] - w[0]).num_seconds())
            .collect();
        let mut counts = [0u32; IntervalClass::ALL.len()];
        for &secs in &intervals {
            counts[IntervalClass::of(secs) as usize] += 1;
        }
        let mut patterns =
            self.concentrations(&counts, TemporalPatternType::IntervalConcentration, |i| {
                IntervalClass::ALL[i].label().to_string()
            });

        let Some(cov) = coefficient_of_variation(&intervals) else {
            return patterns;
        };
        if cov < self.config.periodic_cov_threshold {
            // Strict comparison keeps the shortest class on ties
            let dominant = counts
                .iter()
                .enumerate()
                .fold(None::<(usize, u32)>, |best, (i, &count)| match best {
                    Some((_, c)) if c >= count => best,
                    _ => Some((i, count)),
                });
            if let Some((i, _)) = dominant {
                let score = (1.0 - cov).clamp(0.0, 1.0);
                patterns.push(TemporalPattern {
                    pattern_type: TemporalPatternType::PeriodicCadence,
                    bucket_key: IntervalClass::ALL[i].label().to_string(),
                    deviation_score: score,
                    confidence: score,
                });
            }
        } else if cov > self.config.burst_cov_threshold {
            patterns.extend(self.burst_windows(times));
        }
        patterns
    }

    fn burst_windows(&self, times: &[DateTime<Utc>]) -> Vec<TemporalPattern> {
        let (Some(first), Some(last)) = (times.first(), times.last()) else {
            return Vec::new();
        };
        let width = self.config.burst_window_secs;
        let origin = first.timestamp().div_euclid(width) * width;
        let window_count = (last.timestamp() - origin).div_euclid(width) + 1;

        let mut windows: BTreeMap<i64, u32> = BTreeMap::new();
        for time in times {
            *windows
                .entry((time.timestamp() - origin).div_euclid(width))
                .or_default() += 1;
        }

        let mean = times.len() as f64 / window_count as f64;
        let threshold = mean * self.config.burst_spike_factor;
        windows
            .into_iter()
            .filter(|&(_, count)| count >= 2 && f64::from(count) >= threshold)
            .filter_map(|(index, count)| {
                let start = DateTime::from_timestamp(origin + index * width, 0)?;
                let deviation = (1.0 - mean / f64::from(count)).clamp(0.0, 1.0);
                Some(TemporalPattern {
                    pattern_type: TemporalPatternType::BurstWindow,
                    bucket_key: window_label(start, width),
                    deviation_score: deviation,
                    confidence: deviation,
                })
            })
            .collect()
    }
}

fn window_label(start: DateTime<Utc>, width: i64) -> String {
    if width % DAY == 0 {
        start.format("%Y-%m-%d").to_string()
    } else {
        start.format("%Y-%m-%dT%H:%M").to_string()
    }
}

/// Population standard deviation over mean, `None` when the mean is zero.
fn coefficient_of_variation(values: &[i64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().map(|&v| v as f64).sum::<f64>() / n;
    if mean <= 0.0 {
        return None;
    }
    let variance = values
        .iter()
        .map(|&v| {
            let d = v as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / n;
    Some(variance.sqrt() / mean)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::test_support::{snapshot, Spec};

    // 2023-11-13 00:00:00 UTC, a Monday
    const MONDAY: i64 = 1_699_833_600;

    fn analyzer() -> TemporalAnalyzer {
        TemporalAnalyzer::new(TemporalConfig::default()).unwrap()
    }

    fn at(timestamps: &[i64]) -> Snapshot {
        let shas: Vec<String> = (0..timestamps.len()).map(|i| format!("c{i:04}")).collect();
        let specs: Vec<Spec<'_>> = timestamps
            .iter()
            .zip(&shas)
            .map(|(&ts, sha)| (sha.as_str(), "alice", ts, vec![("a.rs", 1, 0)]))
            .collect();
        snapshot(specs)
    }

    #[test]
    fn too_few_commits_are_skipped_with_note() {
        let output = analyzer().analyze_snapshot(&at(&[MONDAY, MONDAY + 60]), &Budget::unlimited());
        assert!(output.patterns.is_empty());
        assert!(output.metrics.notes[0].contains("insufficient data"));
        assert!(!output.metrics.incomplete);
    }

    #[test]
    fn zero_commits_is_empty_not_error() {
        let output = analyzer().analyze_snapshot(&Snapshot::empty("p".into()), &Budget::unlimited());
        assert!(output.patterns.is_empty());
        assert_eq!(output.metrics.records_analyzed, 0);
    }

    #[test]
    fn all_mondays_concentrate_on_monday() {
        let weeks: Vec<i64> = (0..6).map(|w| MONDAY + w * WEEK + 10 * HOUR).collect();
        let output = analyzer().analyze_snapshot(&at(&weeks), &Budget::unlimited());

        let monday = output
            .patterns
            .iter()
            .find(|p| p.pattern_type == TemporalPatternType::WeekdayConcentration)
            .unwrap();
        assert_eq!(monday.bucket_key, "Mon");
        assert!((monday.deviation_score - 1.0).abs() < 1e-9);

        let hour = output
            .patterns
            .iter()
            .find(|p| p.pattern_type == TemporalPatternType::HourConcentration)
            .unwrap();
        assert_eq!(hour.bucket_key, "10");
    }

    #[test]
    fn busiest_weekday_deviation_is_relative_to_expected() {
        // Four Mondays plus one commit on each other day: Monday sees 4
        // against an expected 10/7, the rest sit below expectation
        let mut times: Vec<i64> = (0..4).map(|w| MONDAY + w * WEEK + 10 * HOUR).collect();
        times.extend((1..7).map(|d| MONDAY + d * DAY + 10 * HOUR));
        let output = analyzer().analyze_snapshot(&at(&times), &Budget::unlimited());

        let weekdays: Vec<&TemporalPattern> = output
            .patterns
            .iter()
            .filter(|p| p.pattern_type == TemporalPatternType::WeekdayConcentration)
            .collect();
        assert_eq!(weekdays.len(), 1);
        assert_eq!(weekdays[0].bucket_key, "Mon");
        assert!((weekdays[0].deviation_score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn concentration_below_cap_is_excess_over_expected() {
        // 14 commits over 7 days: expected 2, Monday 3 gives (3 - 2) / 2
        let found = analyzer().concentrations(
            &[3, 2, 2, 2, 2, 2, 1],
            TemporalPatternType::WeekdayConcentration,
            |i| WEEKDAYS[i].to_string(),
        );
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].bucket_key, "Mon");
        assert!((found[0].deviation_score - 0.5).abs() < 1e-9);
    }

    #[test]
    fn dominant_interval_class_is_reported() {
        // Half-hourly commits: every gap falls in the shortest class
        let times: Vec<i64> = (0..10).map(|i| MONDAY + i * 1_800).collect();
        let output = analyzer().analyze_snapshot(&at(&times), &Budget::unlimited());
        let interval = output
            .patterns
            .iter()
            .find(|p| p.pattern_type == TemporalPatternType::IntervalConcentration)
            .unwrap();
        assert_eq!(interval.bucket_key, "<1h");
        assert!((interval.deviation_score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn weekly_commits_are_periodic() {
        let weeks: Vec<i64> = (0..8).map(|w| MONDAY + w * WEEK).collect();
        let output = analyzer().analyze_snapshot(&at(&weeks), &Budget::unlimited());
        let cadence = output
            .patterns
            .iter()
            .find(|p| p.pattern_type == TemporalPatternType::PeriodicCadence)
            .unwrap();
        assert_eq!(cadence.bucket_key, ">=1w");
        assert!((cadence.confidence - 1.0).abs() < 1e-9);
    }

    #[test]
    fn spike_day_is_reported_as_burst() {
        // One commit every ten days, then thirty commits in half an hour
        let mut times: Vec<i64> = (0..10).map(|d| MONDAY + d * 10 * DAY).collect();
        let spike = MONDAY + 45 * DAY + 12 * HOUR;
        times.extend((0..30).map(|m| spike + m * 60));
        times.sort_unstable();

        let output = analyzer().analyze_snapshot(&at(&times), &Budget::unlimited());
        let bursts: Vec<&TemporalPattern> = output
            .patterns
            .iter()
            .filter(|p| p.pattern_type == TemporalPatternType::BurstWindow)
            .collect();
        assert_eq!(bursts.len(), 1);
        assert_eq!(bursts[0].bucket_key, "2023-12-28");
        assert!(bursts[0].confidence > 0.9);
    }

    #[test]
    fn confidences_stay_in_unit_range() {
        let times: Vec<i64> = (0..40).map(|i| MONDAY + i * i * 1_777).collect();
        let output = analyzer().analyze_snapshot(&at(&times), &Budget::unlimited());
        for p in &output.patterns {
            assert!((0.0..=1.0).contains(&p.confidence), "{p:?}");
            assert!((0.0..=1.0).contains(&p.deviation_score), "{p:?}");
        }
    }

    #[test]
    fn repeated_runs_are_identical() {
        let times: Vec<i64> = (0..20).map(|i| MONDAY + i * 7_919).collect();
        let snap = at(&times);
        let first = analyzer().analyze_snapshot(&snap, &Budget::unlimited());
        let second = analyzer().analyze_snapshot(&snap, &Budget::unlimited());
        assert_eq!(first.patterns, second.patterns);
    }

    #[test]
    fn coefficient_of_variation_of_constant_series_is_zero() {
        assert_eq!(coefficient_of_variation(&[5, 5, 5]), Some(0.0));
        assert_eq!(coefficient_of_variation(&[0, 0]), None);
        assert_eq!(coefficient_of_variation(&[]), None);
    }

    #[test]
    fn interval_classes_cover_ranges() {
        assert_eq!(IntervalClass::of(59).label(), "<1h");
        assert_eq!(IntervalClass::of(HOUR).label(), "1h-1d");
        assert_eq!(IntervalClass::of(DAY).label(), "1d-1w");
        assert_eq!(IntervalClass::of(WEEK).label(), ">=1w");
    }

    #[test]
    fn exhausted_budget_marks_incomplete() {
        let weeks: Vec<i64> = (0..8).map(|w| MONDAY + w * WEEK).collect();
        let budget = Budget::unlimited();
        budget.cancel();
        let output = analyzer().analyze_snapshot(&at(&weeks), &budget);
        assert!(output.metrics.incomplete);
        assert!(output.patterns.is_empty());
    }

    #[test]
    fn budget_running_out_mid_run_keeps_finished_dimensions() {
        let weeks: Vec<i64> = (0..6).map(|w| MONDAY + w * WEEK + 10 * HOUR).collect();
        // Enough for the weekday pass only
        let budget = Budget::with_check_limit(1);
        let output = analyzer().analyze_snapshot(&at(&weeks), &budget);

        assert!(output.metrics.incomplete);
        assert!(!output.patterns.is_empty());
        assert!(output
            .patterns
            .iter()
            .all(|p| p.pattern_type == TemporalPatternType::WeekdayConcentration));
    }
}
