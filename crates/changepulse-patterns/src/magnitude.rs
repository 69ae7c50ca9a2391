//! Churn magnitude, risk ranking and churn trends.
//!
//! Every file gets a risk level from its percentile rank in the project
//! (by churn and by change frequency), and a trend from a least-squares
//! fit over its churn per time bucket.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Instant;

use changepulse_core::{
    Budget, EventSource, FrequencyPattern, MagnitudeConfig, MagnitudePattern, Metrics, ProjectId,
    PulseError, RiskLevel, Trend,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::snapshot::{mark_timed_out, Snapshot};

const ANALYZER: &str = "magnitude";

/// Result of a magnitude run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MagnitudeOutput {
    /// Per-file risk profiles, highest score first.
    pub magnitude_patterns: Vec<MagnitudePattern>,
    /// Per-file churn trends, ordered by path.
    pub frequency_patterns: Vec<FrequencyPattern>,
    /// Run metrics.
    pub metrics: Metrics,
}

/// Ranks files by churn and fits churn trends.
///
/// # Examples
///
/// ```
/// use changepulse_core::{Budget, MagnitudeConfig};
/// use changepulse_patterns::magnitude::MagnitudeAnalyzer;
/// use changepulse_patterns::snapshot::Snapshot;
///
/// let analyzer = MagnitudeAnalyzer::new(MagnitudeConfig::default()).unwrap();
/// let output = analyzer.analyze_snapshot(&Snapshot::empty("demo".into()), &Budget::unlimited());
/// assert!(output.magnitude_patterns.is_empty());
/// assert!(output.frequency_patterns.is_empty());
/// ```
#[derive(Debug, Clone)]
pub struct MagnitudeAnalyzer {
    config: MagnitudeConfig,
}

/// Accumulated per-file statistics.
#[derive(Default)]
struct FileStats<'a> {
    churn: u64,
    commits: u32,
    authors: HashSet<&'a str>,
    /// bucket index -> churn
    buckets: BTreeMap<i64, u64>,
}

impl MagnitudeAnalyzer {
    /// Create an analyzer after validating `config`.
    ///
    /// # Errors
    ///
    /// Returns [`PulseError::Config`] when the bucket fractions are out of
    /// order or outside `[0, 1]`.
    pub fn new(config: MagnitudeConfig) -> Result<Self, PulseError> {
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
    ) -> Result<MagnitudeOutput, PulseError> {
        let snapshot = Snapshot::load(source, project)?;
        Ok(self.analyze_snapshot(&snapshot, &Budget::unlimited()))
    }

    /// Rank and trend every file in `snapshot`.
    pub fn analyze_snapshot(&self, snapshot: &Snapshot, budget: &Budget) -> MagnitudeOutput {
        let started = Instant::now();
        let mut metrics = snapshot.base_metrics();

        let origin = snapshot.commits.first().map_or(0, |c| c.timestamp);
        let mut stats: HashMap<&str, FileStats<'_>> = HashMap::new();
        let mut processed = 0u32;
        let mut last_bucket = 0i64;

        for commit in &snapshot.commits {
            if budget.is_exhausted() {
                mark_timed_out(&mut metrics, ANALYZER, budget);
                break;
            }
            processed += 1;
            let bucket = self.bucket_of(origin, commit.timestamp);
            last_bucket = last_bucket.max(bucket);
            for change in &commit.changes {
                let churn = change.churn();
                let entry = stats.entry(change.file_path.as_str()).or_default();
                entry.churn = entry.churn.saturating_add(churn);
                entry.commits = entry.commits.saturating_add(1);
                entry.authors.insert(commit.author.as_str());
                let slot = entry.buckets.entry(bucket).or_default();
                *slot = slot.saturating_add(churn);
            }
        }
        metrics.records_analyzed = processed as usize;

        let magnitude_patterns = self.rank(&stats, processed);

        let mut files: Vec<(&str, &FileStats<'_>)> = stats.iter().map(|(&p, s)| (p, s)).collect();
        files.sort_unstable_by_key(|&(path, _)| path);
        let mut frequency_patterns = Vec::with_capacity(files.len());
        for (path, file) in files {
            if budget.is_exhausted() {
                if !metrics.incomplete {
                    mark_timed_out(&mut metrics, ANALYZER, budget);
                }
                break;
            }
            frequency_patterns.push(self.trend(path, &file.buckets, last_bucket));
        }

        debug!(
            project = %snapshot.project,
            files = stats.len(),
            elevated = magnitude_patterns
                .iter()
                .filter(|p| p.risk_level.is_elevated())
                .count(),
            "magnitude analysis finished"
        );

        MagnitudeOutput {
            magnitude_patterns,
            frequency_patterns,
            metrics: metrics.finish(started),
        }
    }

    fn bucket_of(&self, origin: i64, timestamp: i64) -> i64 {
        (timestamp - origin).max(0) / self.config.trend_bucket_secs
    }

    fn rank(&self, stats: &HashMap<&str, FileStats<'_>>, total_commits: u32) -> Vec<MagnitudePattern> {
        if stats.is_empty() || total_commits == 0 {
            return Vec::new();
        }

        let mut churns: Vec<u64> = stats.values().map(|s| s.churn).collect();
        let mut frequencies: Vec<u32> = stats.values().map(|s| s.commits).collect();
        churns.sort_unstable();
        frequencies.sort_unstable();

        let mut patterns: Vec<MagnitudePattern> = stats
            .iter()
            .map(|(&path, s)| {
                let score = (percentile(&churns, s.churn) + percentile(&frequencies, s.commits)) / 2.0;
                MagnitudePattern {
                    file_path: path.to_string(),
                    total_churn: s.churn,
                    commits: s.commits,
                    authors: s.authors.len() as u32,
                    average_churn_per_commit: s.churn as f64 / f64::from(s.commits.max(1)),
                    change_frequency: f64::from(s.commits) / f64::from(total_commits),
                    risk_level: RiskLevel::Low,
                    confidence: score.clamp(0.0, 1.0),
                }
            })
            .collect();

        patterns.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then_with(|| b.total_churn.cmp(&a.total_churn))
                .then_with(|| b.commits.cmp(&a.commits))
                .then_with(|| a.file_path.cmp(&b.file_path))
        });

        let n = patterns.len();
        let critical = cutoff(n, self.config.critical_fraction);
        let high = cutoff(n, self.config.high_fraction).max(critical);
        let medium = cutoff(n, self.config.medium_fraction).max(high);
        for (position, pattern) in patterns.iter_mut().enumerate() {
            pattern.risk_level = if position < critical {
                RiskLevel::Critical
            } else if position < high {
                RiskLevel::High
            } else if position < medium {
                RiskLevel::Medium
            } else {
                RiskLevel::Low
            };
        }
        patterns
    }

    /// Fit churn per bucket from the file's first touch to the project's
    /// last bucket. Buckets the file was not touched in count as zero churn.
    fn trend(&self, path: &str, buckets: &BTreeMap<i64, u64>, last_bucket: i64) -> FrequencyPattern {
        let stable = |confidence: f64| FrequencyPattern {
            file_path: path.to_string(),
            trend: Trend::Stable,
            trend_slope: 0.0,
            confidence,
        };

        let Some(&first) = buckets.keys().next() else {
            return stable(0.0);
        };
        if last_bucket <= first {
            return stable(0.0);
        }

        let points: Vec<(f64, f64)> = buckets
            .iter()
            .map(|(&b, &churn)| ((b - first) as f64, churn as f64))
            .collect();
        let Some(fit) = least_squares(&points, (last_bucket - first + 1) as f64) else {
            return stable(0.0);
        };

        let relative = if fit.mean > 0.0 { fit.slope / fit.mean } else { 0.0 };
        let trend = if relative > self.config.trend_dead_zone {
            Trend::Increasing
        } else if relative < -self.config.trend_dead_zone {
            Trend::Decreasing
        } else {
            Trend::Stable
        };

        FrequencyPattern {
            file_path: path.to_string(),
            trend,
            trend_slope: fit.slope,
            confidence: fit.r_squared.clamp(0.0, 1.0),
        }
    }
}

/// Number of leading positions that fall inside `fraction` of `n`.
fn cutoff(n: usize, fraction: f64) -> usize {
    let raw = (n as f64 * fraction - 1e-9).ceil();
    (raw.max(0.0) as usize).min(n)
}

/// Fraction of `sorted` that is `<= value`.
fn percentile<T: PartialOrd>(sorted: &[T], value: T) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let at_or_below = sorted.partition_point(|v| *v <= value);
    at_or_below as f64 / sorted.len() as f64
}

#[derive(Debug, Clone, Copy)]
struct Fit {
    slope: f64,
    r_squared: f64,
    mean: f64,
}

/// Ordinary least squares over the series `0..len`, where `points` holds
/// the non-zero `(index, value)` entries and every other index is zero.
///
/// The index sums have closed forms, so the cost depends on `points` only.
/// A constant series fits perfectly with slope 0.
fn least_squares(points: &[(f64, f64)], len: f64) -> Option<Fit> {
    if len < 2.0 {
        return None;
    }
    let x_mean = (len - 1.0) / 2.0;
    // sum of (i - x_mean)^2 for i in 0..len
    let sxx = len * (len * len - 1.0) / 12.0;

    let (mut sum_y, mut sum_xy, mut sum_yy) = (0.0, 0.0, 0.0);
    for &(x, y) in points {
        sum_y += y;
        sum_xy += x * y;
        sum_yy += y * y;
    }
    let mean = sum_y / len;
    let sxy = sum_xy - x_mean * sum_y;
    let syy = (sum_yy - sum_y * mean).max(0.0);

    let slope = sxy / sxx;
    let r_squared = if syy <= sum_yy * f64::EPSILON {
        1.0
    } else {
        (sxy * sxy) / (sxx * syy)
    };
    Some(Fit {
        slope,
        r_squared,
        mean,
    })
}
