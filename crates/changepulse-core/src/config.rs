use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::PulseError;
use crate::types::PatternKind;

/// Top-level configuration loaded from `.changepulse.toml`.
///
/// Every section is optional; missing keys fall back to documented defaults.
///
/// # Examples
///
/// ```
/// use changepulse_core::PulseConfig;
///
/// let config = PulseConfig::default();
/// assert_eq!(config.cooccurrence.min_cooccurrence_count, 3);
/// assert_eq!(config.aggregator.max_insights, 20);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PulseConfig {
    /// Co-change mining thresholds.
    #[serde(default)]
    pub cooccurrence: CooccurrenceConfig,
    /// Rhythm and burst detection thresholds.
    #[serde(default)]
    pub temporal: TemporalConfig,
    /// Ownership and collaboration thresholds.
    #[serde(default)]
    pub developer: DeveloperConfig,
    /// Risk percentiles and trend settings.
    #[serde(default)]
    pub magnitude: MagnitudeConfig,
    /// Insight ranking settings.
    #[serde(default)]
    pub aggregator: AggregatorConfig,
    /// Orchestration timeouts.
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

impl PulseConfig {
    /// Load configuration from a TOML file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`PulseError::FileNotFound`] if `path` does not exist,
    /// [`PulseError::Io`] if it cannot be read, or [`PulseError::Toml`] if the
    /// content is not valid TOML.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use changepulse_core::PulseConfig;
    /// use std::path::Path;
    ///
    /// let config = PulseConfig::from_file(Path::new(".changepulse.toml")).unwrap();
    /// ```
    pub fn from_file(path: &Path) -> Result<Self, PulseError> {
        if !path.exists() {
            return Err(PulseError::FileNotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`PulseError::Toml`] if parsing fails.
    ///
    /// # Examples
    ///
    /// ```
    /// use changepulse_core::PulseConfig;
    ///
    /// let toml = r#"
    /// [cooccurrence]
    /// min_cooccurrence_count = 5
    /// "#;
    /// let config = PulseConfig::from_toml(toml).unwrap();
    /// assert_eq!(config.cooccurrence.min_cooccurrence_count, 5);
    /// ```
    pub fn from_toml(content: &str) -> Result<Self, PulseError> {
        let config: Self = toml::from_str(content)?;
        Ok(config)
    }

    /// Check every section.
    ///
    /// # Errors
    ///
    /// Returns [`PulseError::Config`] naming the first invalid setting.
    pub fn validate(&self) -> Result<(), PulseError> {
        self.cooccurrence.validate()?;
        self.temporal.validate()?;
        self.developer.validate()?;
        self.magnitude.validate()?;
        self.aggregator.validate()?;
        self.pipeline.validate()
    }
}

fn check_unit(name: &str, value: f64) -> Result<(), PulseError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(PulseError::Config(format!(
            "{name} must be within [0, 1], got {value}"
        )))
    }
}

fn check_positive(name: &str, value: f64) -> Result<(), PulseError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(PulseError::Config(format!(
            "{name} must be a positive number, got {value}"
        )))
    }
}

/// Market-basket mining thresholds.
///
/// # Examples
///
/// ```
/// use changepulse_core::CooccurrenceConfig;
///
/// let config = CooccurrenceConfig::default();
/// assert_eq!(config.min_cooccurrence_count, 3);
/// assert_eq!(config.max_files_per_commit, 25);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CooccurrenceConfig {
    /// Minimum commits a pair must share (default: 3).
    #[serde(default = "default_min_cooccurrence_count")]
    pub min_cooccurrence_count: u32,
    /// Minimum pair support; rarer pairs are noise (default: 0.01).
    #[serde(default = "default_min_support")]
    pub min_support: f64,
    /// Commits touching more files than this yield no pairs (default: 25).
    #[serde(default = "default_max_files_per_commit")]
    pub max_files_per_commit: usize,
}

fn default_min_cooccurrence_count() -> u32 {
    3
}

fn default_min_support() -> f64 {
    0.01
}

fn default_max_files_per_commit() -> usize {
    25
}

impl Default for CooccurrenceConfig {
    fn default() -> Self {
        Self {
            min_cooccurrence_count: default_min_cooccurrence_count(),
            min_support: default_min_support(),
            max_files_per_commit: default_max_files_per_commit(),
        }
    }
}

impl CooccurrenceConfig {
    /// # Errors
    ///
    /// Returns [`PulseError::Config`] on an out-of-range threshold.
    pub fn validate(&self) -> Result<(), PulseError> {
        if self.min_cooccurrence_count == 0 {
            return Err(PulseError::Config(
                "min_cooccurrence_count must be at least 1".into(),
            ));
        }
        check_unit("min_support", self.min_support)?;
        if self.max_files_per_commit < 2 {
            return Err(PulseError::Config(format!(
                "max_files_per_commit must be at least 2, got {}",
                self.max_files_per_commit
            )));
        }
        Ok(())
    }
}

/// Rhythm and burst detection thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemporalConfig {
    /// Below this many commits temporal mining is skipped (default: 5).
    #[serde(default = "default_min_sample_size")]
    pub min_sample_size: usize,
    /// Minimum deviation for a concentration pattern (default: 0.5).
    #[serde(default = "default_deviation_threshold")]
    pub deviation_threshold: f64,
    /// Interval CoV below which history counts as periodic (default: 0.5).
    #[serde(default = "default_periodic_cov_threshold")]
    pub periodic_cov_threshold: f64,
    /// Interval CoV above which history counts as bursty (default: 1.5).
    #[serde(default = "default_burst_cov_threshold")]
    pub burst_cov_threshold: f64,
    /// Width of a burst window in seconds (default: one day).
    #[serde(default = "default_burst_window_secs")]
    pub burst_window_secs: i64,
    /// A window is a spike at this multiple of the mean (default: 3.0).
    #[serde(default = "default_burst_spike_factor")]
    pub burst_spike_factor: f64,
}

fn default_min_sample_size() -> usize {
    5
}

fn default_deviation_threshold() -> f64 {
    0.5
}

fn default_periodic_cov_threshold() -> f64 {
    0.5
}

fn default_burst_cov_threshold() -> f64 {
    1.5
}

fn default_burst_window_secs() -> i64 {
    86_400
}

fn default_burst_spike_factor() -> f64 {
    3.0
}

impl Default for TemporalConfig {
    fn default() -> Self {
        Self {
            min_sample_size: default_min_sample_size(),
            deviation_threshold: default_deviation_threshold(),
            periodic_cov_threshold: default_periodic_cov_threshold(),
            burst_cov_threshold: default_burst_cov_threshold(),
            burst_window_secs: default_burst_window_secs(),
            burst_spike_factor: default_burst_spike_factor(),
        }
    }
}

impl TemporalConfig {
    /// # Errors
    ///
    /// Returns [`PulseError::Config`] on an out-of-range threshold.
    pub fn validate(&self) -> Result<(), PulseError> {
        if self.min_sample_size < 2 {
            return Err(PulseError::Config(
                "min_sample_size must be at least 2 to measure intervals".into(),
            ));
        }
        check_unit("deviation_threshold", self.deviation_threshold)?;
        check_positive("periodic_cov_threshold", self.periodic_cov_threshold)?;
        check_positive("burst_cov_threshold", self.burst_cov_threshold)?;
        if self.burst_cov_threshold < self.periodic_cov_threshold {
            return Err(PulseError::Config(format!(
                "burst_cov_threshold ({}) must not be below periodic_cov_threshold ({})",
                self.burst_cov_threshold, self.periodic_cov_threshold
            )));
        }
        if self.burst_window_secs <= 0 {
            return Err(PulseError::Config(format!(
                "burst_window_secs must be positive, got {}",
                self.burst_window_secs
            )));
        }
        if !(self.burst_spike_factor.is_finite() && self.burst_spike_factor > 1.0) {
            return Err(PulseError::Config(format!(
                "burst_spike_factor must be greater than 1, got {}",
                self.burst_spike_factor
            )));
        }
        Ok(())
    }
}

/// Ownership and collaboration thresholds.
///
/// # Examples
///
/// ```
/// use changepulse_core::DeveloperConfig;
///
/// let config = DeveloperConfig::default();
/// assert_eq!(config.ownership_threshold, 0.8);
/// assert_eq!(config.collaboration_window_secs, 7 * 86_400);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeveloperConfig {
    /// Share of a file's touches that makes an author its owner (default: 0.8).
    #[serde(default = "default_ownership_threshold")]
    pub ownership_threshold: f64,
    /// Owned files needed before an author is a silo (default: 3).
    #[serde(default = "default_min_silo_files")]
    pub min_silo_files: usize,
    /// Touches of the same file within this many seconds link two authors (default: 7 days).
    #[serde(default = "default_collaboration_window_secs")]
    pub collaboration_window_secs: i64,
    /// Linked touches needed for a collaboration edge (default: 2).
    #[serde(default = "default_min_shared_touches")]
    pub min_shared_touches: u32,
    /// Minimum edge density of a reported cluster (default: 0.5).
    #[serde(default = "default_min_cluster_density")]
    pub min_cluster_density: f64,
    /// Commit count at which confidence reaches half its ceiling (default: 10).
    #[serde(default = "default_commit_saturation")]
    pub commit_saturation: f64,
}

fn default_ownership_threshold() -> f64 {
    0.8
}

fn default_min_silo_files() -> usize {
    3
}

fn default_collaboration_window_secs() -> i64 {
    7 * 86_400
}

fn default_min_shared_touches() -> u32 {
    2
}

fn default_min_cluster_density() -> f64 {
    0.5
}

fn default_commit_saturation() -> f64 {
    10.0
}

impl Default for DeveloperConfig {
    fn default() -> Self {
        Self {
            ownership_threshold: default_ownership_threshold(),
            min_silo_files: default_min_silo_files(),
            collaboration_window_secs: default_collaboration_window_secs(),
            min_shared_touches: default_min_shared_touches(),
            min_cluster_density: default_min_cluster_density(),
            commit_saturation: default_commit_saturation(),
        }
    }
}

impl DeveloperConfig {
    /// # Errors
    ///
    /// Returns [`PulseError::Config`] on an out-of-range threshold.
    pub fn validate(&self) -> Result<(), PulseError> {
        check_unit("ownership_threshold", self.ownership_threshold)?;
        if self.min_silo_files == 0 {
            return Err(PulseError::Config("min_silo_files must be at least 1".into()));
        }
        if self.collaboration_window_secs < 0 {
            return Err(PulseError::Config(format!(
                "collaboration_window_secs must not be negative, got {}",
                self.collaboration_window_secs
            )));
        }
        if self.min_shared_touches == 0 {
            return Err(PulseError::Config(
                "min_shared_touches must be at least 1".into(),
            ));
        }
        check_unit("min_cluster_density", self.min_cluster_density)?;
        check_positive("commit_saturation", self.commit_saturation)
    }
}

/// Risk percentile cutoffs and trend settings.
///
/// The fractions are cumulative from the top of the ranking: with the
/// defaults the top 5% are critical, the next 15% high, the next 30% medium.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MagnitudeConfig {
    /// Top fraction classified critical (default: 0.05).
    #[serde(default = "default_critical_fraction")]
    pub critical_fraction: f64,
    /// Top fraction classified high or above (default: 0.20).
    #[serde(default = "default_high_fraction")]
    pub high_fraction: f64,
    /// Top fraction classified medium or above (default: 0.50).
    #[serde(default = "default_medium_fraction")]
    pub medium_fraction: f64,
    /// Width of a trend bucket in seconds (default: 7 days).
    #[serde(default = "default_trend_bucket_secs")]
    pub trend_bucket_secs: i64,
    /// Relative slope treated as flat (default: 0.05).
    #[serde(default = "default_trend_dead_zone")]
    pub trend_dead_zone: f64,
}

fn default_critical_fraction() -> f64 {
    0.05
}

fn default_high_fraction() -> f64 {
    0.20
}

fn default_medium_fraction() -> f64 {
    0.50
}

fn default_trend_bucket_secs() -> i64 {
    7 * 86_400
}

fn default_trend_dead_zone() -> f64 {
    0.05
}

impl Default for MagnitudeConfig {
    fn default() -> Self {
        Self {
            critical_fraction: default_critical_fraction(),
            high_fraction: default_high_fraction(),
            medium_fraction: default_medium_fraction(),
            trend_bucket_secs: default_trend_bucket_secs(),
            trend_dead_zone: default_trend_dead_zone(),
        }
    }
}

impl MagnitudeConfig {
    /// # Errors
    ///
    /// Returns [`PulseError::Config`] if the cutoffs are out of range or
    /// not increasing.
    pub fn validate(&self) -> Result<(), PulseError> {
        check_unit("critical_fraction", self.critical_fraction)?;
        check_unit("high_fraction", self.high_fraction)?;
        check_unit("medium_fraction", self.medium_fraction)?;
        if !(self.critical_fraction <= self.high_fraction
            && self.high_fraction <= self.medium_fraction)
        {
            return Err(PulseError::Config(format!(
                "risk fractions must satisfy critical <= high <= medium, got {} / {} / {}",
                self.critical_fraction, self.high_fraction, self.medium_fraction
            )));
        }
        if self.trend_bucket_secs <= 0 {
            return Err(PulseError::Config(format!(
                "trend_bucket_secs must be positive, got {}",
                self.trend_bucket_secs
            )));
        }
        if !(self.trend_dead_zone.is_finite() && self.trend_dead_zone >= 0.0) {
            return Err(PulseError::Config(format!(
                "trend_dead_zone must not be negative, got {}",
                self.trend_dead_zone
            )));
        }
        Ok(())
    }
}

/// Per-analyzer weights in the geometric mean.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternWeights {
    /// Weight of co-change evidence.
    #[serde(default = "default_weight")]
    pub cooccurrence: f64,
    /// Weight of rhythm evidence.
    #[serde(default = "default_weight")]
    pub temporal: f64,
    /// Weight of ownership/collaboration evidence.
    #[serde(default = "default_weight")]
    pub developer: f64,
    /// Weight of risk-level evidence.
    #[serde(default = "default_weight")]
    pub magnitude: f64,
    /// Weight of trend evidence.
    #[serde(default = "default_weight")]
    pub frequency: f64,
}

fn default_weight() -> f64 {
    1.0
}

impl Default for PatternWeights {
    fn default() -> Self {
        Self {
            cooccurrence: default_weight(),
            temporal: default_weight(),
            developer: default_weight(),
            magnitude: default_weight(),
            frequency: default_weight(),
        }
    }
}

impl PatternWeights {
    /// Weight assigned to patterns of `kind`.
    ///
    /// # Examples
    ///
    /// ```
    /// use changepulse_core::{PatternKind, PatternWeights};
    ///
    /// let weights = PatternWeights { magnitude: 2.0, ..PatternWeights::default() };
    /// assert_eq!(weights.weight(PatternKind::Magnitude), 2.0);
    /// assert_eq!(weights.weight(PatternKind::Developer), 1.0);
    /// ```
    pub fn weight(&self, kind: PatternKind) -> f64 {
        match kind {
            PatternKind::Cooccurrence => self.cooccurrence,
            PatternKind::Temporal => self.temporal,
            PatternKind::Developer => self.developer,
            PatternKind::Magnitude => self.magnitude,
            PatternKind::Frequency => self.frequency,
        }
    }

    fn validate(&self) -> Result<(), PulseError> {
        check_positive("weights.cooccurrence", self.cooccurrence)?;
        check_positive("weights.temporal", self.temporal)?;
        check_positive("weights.developer", self.developer)?;
        check_positive("weights.magnitude", self.magnitude)?;
        check_positive("weights.frequency", self.frequency)
    }
}

/// Insight ranking settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatorConfig {
    /// Maximum insights returned (default: 20).
    #[serde(default = "default_max_insights")]
    pub max_insights: usize,
    /// Insights below this confidence are dropped (default: 0.0).
    #[serde(default)]
    pub min_confidence: f64,
    /// A pair counts as coupled only above this lift (default: 1.0, i.e.
    /// more often than independent files would).
    #[serde(default = "default_min_coupling_lift")]
    pub min_coupling_lift: f64,
    /// Geometric-mean weight per analyzer.
    #[serde(default)]
    pub weights: PatternWeights,
}

fn default_max_insights() -> usize {
    20
}

fn default_min_coupling_lift() -> f64 {
    1.0
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            max_insights: default_max_insights(),
            min_confidence: 0.0,
            min_coupling_lift: default_min_coupling_lift(),
            weights: PatternWeights::default(),
        }
    }
}

impl AggregatorConfig {
    /// # Errors
    ///
    /// Returns [`PulseError::Config`] on an invalid limit or weight.
    pub fn validate(&self) -> Result<(), PulseError> {
        if self.max_insights == 0 {
            return Err(PulseError::Config("max_insights must be at least 1".into()));
        }
        check_unit("min_confidence", self.min_confidence)?;
        if !(self.min_coupling_lift.is_finite() && self.min_coupling_lift >= 0.0) {
            return Err(PulseError::Config(format!(
                "min_coupling_lift must not be negative, got {}",
                self.min_coupling_lift
            )));
        }
        self.weights.validate()
    }
}

/// Orchestration timeouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Deadline for each analyzer run (default: 30000).
    #[serde(default = "default_analyzer_timeout_ms")]
    pub analyzer_timeout_ms: u64,
    /// Extra wait after the deadline before a run is abandoned (default: 1000).
    #[serde(default = "default_join_grace_ms")]
    pub join_grace_ms: u64,
}

fn default_analyzer_timeout_ms() -> u64 {
    30_000
}

fn default_join_grace_ms() -> u64 {
    1_000
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            analyzer_timeout_ms: default_analyzer_timeout_ms(),
            join_grace_ms: default_join_grace_ms(),
        }
    }
}

impl PipelineConfig {
    /// # Errors
    ///
    /// Returns [`PulseError::Config`] if the timeout is zero.
    pub fn validate(&self) -> Result<(), PulseError> {
        if self.analyzer_timeout_ms == 0 {
            return Err(PulseError::Config(
                "analyzer_timeout_ms must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
