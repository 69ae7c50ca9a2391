use std::collections::BTreeSet;
use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// Identifier of a project known to the event source.
///
/// # Examples
///
/// ```
/// use changepulse_core::ProjectId;
///
/// let id = ProjectId::from("payments-api");
/// assert_eq!(id.to_string(), "payments-api");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(pub String);

impl From<&str> for ProjectId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ProjectId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A commit as produced by the event source.
///
/// # Examples
///
/// ```
/// use changepulse_core::CommitRecord;
///
/// let commit = CommitRecord {
///     sha: "a1b2c3".into(),
///     author: "alice".into(),
///     timestamp: 1_700_000_000,
///     parent_sha: None,
/// };
/// assert_eq!(commit.author, "alice");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitRecord {
    /// Commit hash.
    #[serde(default)]
    pub sha: String,
    /// Author identity.
    #[serde(default)]
    pub author: String,
    /// Unix timestamp (seconds, UTC).
    pub timestamp: i64,
    /// First parent, absent for root commits.
    #[serde(default)]
    pub parent_sha: Option<String>,
}

/// A single file touched by a commit.
///
/// # Examples
///
/// ```
/// use changepulse_core::{ChangeType, FileChange};
///
/// let change = FileChange {
///     commit_sha: "a1b2c3".into(),
///     file_path: "src/main.rs".into(),
///     change_type: ChangeType::Modified,
///     lines_added: 10,
///     lines_removed: 3,
/// };
/// assert_eq!(change.churn(), 13);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileChange {
    /// Owning commit.
    #[serde(default)]
    pub commit_sha: String,
    /// Path relative to the repository root.
    #[serde(default)]
    pub file_path: String,
    /// Kind of change.
    pub change_type: ChangeType,
    /// Lines added by this change.
    #[serde(default)]
    pub lines_added: u64,
    /// Lines removed by this change.
    #[serde(default)]
    pub lines_removed: u64,
}

impl FileChange {
    /// Lines added plus lines removed, saturating at `u64::MAX`.
    pub fn churn(&self) -> u64 {
        self.lines_added.saturating_add(self.lines_removed)
    }
}

/// Classification of a file change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    /// New file.
    Added,
    /// Existing file modified.
    Modified,
    /// File removed.
    Deleted,
    /// File moved to a new path.
    Renamed,
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeType::Added => write!(f, "added"),
            ChangeType::Modified => write!(f, "modified"),
            ChangeType::Deleted => write!(f, "deleted"),
            ChangeType::Renamed => write!(f, "renamed"),
        }
    }
}

/// Raw records for one project, exactly as the event source returned them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventBatch {
    /// Commit records, in any order.
    #[serde(default)]
    pub commits: Vec<CommitRecord>,
    /// File changes, linked to commits by `commit_sha`.
    #[serde(default)]
    pub file_changes: Vec<FileChange>,
}

/// The closed set of analyzers that emit patterns.
///
/// # Examples
///
/// ```
/// use changepulse_core::PatternKind;
///
/// assert_eq!(PatternKind::Magnitude.to_string(), "magnitude");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternKind {
    /// File pairs that change together.
    Cooccurrence,
    /// Time-of-week rhythms and bursts.
    Temporal,
    /// Ownership silos and collaboration clusters.
    Developer,
    /// Per-file churn and risk level.
    Magnitude,
    /// Per-file churn trend.
    Frequency,
}

impl fmt::Display for PatternKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatternKind::Cooccurrence => write!(f, "cooccurrence"),
            PatternKind::Temporal => write!(f, "temporal"),
            PatternKind::Developer => write!(f, "developer"),
            PatternKind::Magnitude => write!(f, "magnitude"),
            PatternKind::Frequency => write!(f, "frequency"),
        }
    }
}

/// Stable reference to a pattern, used as insight evidence.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternRef {
    /// Analyzer that produced the pattern.
    pub kind: PatternKind,
    /// Identifier, unique within `kind`.
    pub id: String,
}

impl fmt::Display for PatternRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// Common surface of every pattern type.
///
/// # Examples
///
/// ```
/// use changepulse_core::{Pattern, PatternKind, FrequencyPattern, Trend};
///
/// let p = FrequencyPattern {
///     file_path: "src/lib.rs".into(),
///     trend: Trend::Stable,
///     trend_slope: 0.0,
///     confidence: 0.4,
/// };
/// assert_eq!(p.pattern_ref().kind, PatternKind::Frequency);
/// assert_eq!(p.pattern_ref().id, "src/lib.rs");
/// ```
pub trait Pattern {
    /// Analyzer that produced this pattern.
    fn kind(&self) -> PatternKind;
    /// Identifier, unique within [`Pattern::kind`].
    fn id(&self) -> String;
    /// Evidence strength in `[0, 1]`.
    fn confidence(&self) -> f64;

    /// Kind and id bundled together.
    fn pattern_ref(&self) -> PatternRef {
        PatternRef {
            kind: self.kind(),
            id: self.id(),
        }
    }
}

/// A pair of files that frequently change together.
///
/// # Examples
///
/// ```
/// use changepulse_core::CooccurrencePattern;
///
/// let pair = CooccurrencePattern {
///     file1: "src/auth.rs".into(),
///     file2: "src/session.rs".into(),
///     co_occurrence_count: 15,
///     support: 0.3,
///     confidence: 0.75,
///     reverse_confidence: 0.6,
///     lift: 2.5,
/// };
/// assert!(pair.lift > 1.0);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CooccurrencePattern {
    /// Lexicographically smaller path.
    pub file1: String,
    /// Lexicographically larger path.
    pub file2: String,
    /// Commits touching both files.
    pub co_occurrence_count: u32,
    /// `support(file1, file2)`.
    pub support: f64,
    /// `confidence(file1 -> file2)`.
    pub confidence: f64,
    /// `confidence(file2 -> file1)`.
    pub reverse_confidence: f64,
    /// `support(A,B) / (support(A) * support(B))`.
    pub lift: f64,
}

impl Pattern for CooccurrencePattern {
    fn kind(&self) -> PatternKind {
        PatternKind::Cooccurrence
    }

    fn id(&self) -> String {
        format!("{}|{}", self.file1, self.file2)
    }

    fn confidence(&self) -> f64 {
        self.confidence
    }
}

/// Kind of temporal rhythm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TemporalPatternType {
    /// One weekday carries far more commits than a uniform spread would.
    WeekdayConcentration,
    /// One hour of the day carries far more commits than a uniform spread would.
    HourConcentration,
    /// One class of gap between consecutive commits dominates the history.
    IntervalConcentration,
    /// A window with a spike of commits in otherwise irregular history.
    BurstWindow,
    /// Commits arrive at a steady interval.
    PeriodicCadence,
}

impl fmt::Display for TemporalPatternType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemporalPatternType::WeekdayConcentration => write!(f, "weekday-concentration"),
            TemporalPatternType::HourConcentration => write!(f, "hour-concentration"),
            TemporalPatternType::IntervalConcentration => write!(f, "interval-concentration"),
            TemporalPatternType::BurstWindow => write!(f, "burst-window"),
            TemporalPatternType::PeriodicCadence => write!(f, "periodic-cadence"),
        }
    }
}

/// A time-based rhythm in commit activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemporalPattern {
    /// Kind of rhythm.
    pub pattern_type: TemporalPatternType,
    /// Bucket label: weekday (`"Mon"`), hour (`"14"`), interval class or window date.
    pub bucket_key: String,
    /// Normalized deviation from expectation, capped at 1.0.
    pub deviation_score: f64,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
}

impl Pattern for TemporalPattern {
    fn kind(&self) -> PatternKind {
        PatternKind::Temporal
    }

    fn id(&self) -> String {
        format!("{}:{}", self.pattern_type, self.bucket_key)
    }

    fn confidence(&self) -> f64 {
        self.confidence
    }
}

/// Kind of developer pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeveloperPatternType {
    /// One author dominates a set of files.
    OwnershipSilo,
    /// A densely connected group of authors working on the same files.
    CollaborationCluster,
}

impl fmt::Display for DeveloperPatternType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeveloperPatternType::OwnershipSilo => write!(f, "ownership-silo"),
            DeveloperPatternType::CollaborationCluster => write!(f, "collaboration-cluster"),
        }
    }
}

/// An ownership or collaboration structure among authors.
///
/// # Examples
///
/// ```
/// use std::collections::BTreeSet;
/// use changepulse_core::{DeveloperPattern, DeveloperPatternType, Pattern};
///
/// let silo = DeveloperPattern {
///     author: "alice".into(),
///     pattern_type: DeveloperPatternType::OwnershipSilo,
///     affected_files: BTreeSet::from(["a.rs".to_string(), "b.rs".to_string()]),
///     collaborators: vec!["alice".into()],
///     author_commits: 12,
///     confidence: 0.5,
/// };
/// assert_eq!(silo.id(), "ownership-silo:alice");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeveloperPattern {
    /// Silo owner, or the most active member of a cluster.
    pub author: String,
    /// Kind of structure.
    pub pattern_type: DeveloperPatternType,
    /// Files covered by the pattern.
    pub affected_files: BTreeSet<String>,
    /// Sorted authors involved. Just `author` for silos.
    pub collaborators: Vec<String>,
    /// Commits by `author` across the whole project.
    pub author_commits: u32,
    /// Confidence in `[0, 1]`, scaled by commit history depth.
    pub confidence: f64,
}

impl Pattern for DeveloperPattern {
    fn kind(&self) -> PatternKind {
        PatternKind::Developer
    }

    fn id(&self) -> String {
        format!("{}:{}", self.pattern_type, self.collaborators.join(","))
    }

    fn confidence(&self) -> f64 {
        self.confidence
    }
}

/// Percentile-derived severity of a file's churn profile.
///
/// # Examples
///
/// ```
/// use changepulse_core::RiskLevel;
///
/// assert!(RiskLevel::Critical > RiskLevel::High);
/// assert!(RiskLevel::High.is_elevated());
/// assert!(!RiskLevel::Medium.is_elevated());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    /// Bottom of the ranking.
    Low,
    /// Middle of the ranking.
    Medium,
    /// Upper ranking band.
    High,
    /// Very top of the ranking.
    Critical,
}

impl RiskLevel {
    /// `true` for [`RiskLevel::High`] and [`RiskLevel::Critical`].
    pub fn is_elevated(self) -> bool {
        matches!(self, RiskLevel::High | RiskLevel::Critical)
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskLevel::Low => write!(f, "low"),
            RiskLevel::Medium => write!(f, "medium"),
            RiskLevel::High => write!(f, "high"),
            RiskLevel::Critical => write!(f, "critical"),
        }
    }
}

/// Churn and risk profile of one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MagnitudePattern {
    /// File path relative to repo root.
    pub file_path: String,
    /// Total lines added + removed across all commits.
    pub total_churn: u64,
    /// Commits touching this file.
    pub commits: u32,
    /// Number of distinct authors.
    pub authors: u32,
    /// `total_churn / commits`.
    pub average_churn_per_commit: f64,
    /// `commits / total project commits`.
    pub change_frequency: f64,
    /// Percentile bucket.
    pub risk_level: RiskLevel,
    /// Combined churn/frequency percentile score in `[0, 1]`.
    pub confidence: f64,
}

impl Pattern for MagnitudePattern {
    fn kind(&self) -> PatternKind {
        PatternKind::Magnitude
    }

    fn id(&self) -> String {
        self.file_path.clone()
    }

    fn confidence(&self) -> f64 {
        self.confidence
    }
}

/// Direction of a file's churn over time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    /// Churn is growing.
    Increasing,
    /// Churn is shrinking.
    Decreasing,
    /// Slope within the dead zone.
    Stable,
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trend::Increasing => write!(f, "increasing"),
            Trend::Decreasing => write!(f, "decreasing"),
            Trend::Stable => write!(f, "stable"),
        }
    }
}

/// Linear churn trend of one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrequencyPattern {
    /// File path relative to repo root.
    pub file_path: String,
    /// Slope direction after the dead zone is applied.
    pub trend: Trend,
    /// Least-squares slope in churned lines per time bucket.
    pub trend_slope: f64,
    /// Goodness of fit (R²) in `[0, 1]`.
    pub confidence: f64,
}

impl Pattern for FrequencyPattern {
    fn kind(&self) -> PatternKind {
        PatternKind::Frequency
    }

    fn id(&self) -> String {
        self.file_path.clone()
    }

    fn confidence(&self) -> f64 {
        self.confidence
    }
}

/// Kind of compound finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InsightType {
    /// Strongly coupled files that are both high-risk.
    CoupledHotspot,
    /// A single-owner silo over high-churn files.
    BusFactorRisk,
    /// A high-risk file whose churn keeps growing.
    AcceleratingHotspot,
    /// A collaboration cluster concentrated on high-risk files.
    CollaborationHotspot,
}

impl fmt::Display for InsightType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InsightType::CoupledHotspot => write!(f, "coupled-hotspot"),
            InsightType::BusFactorRisk => write!(f, "bus-factor-risk"),
            InsightType::AcceleratingHotspot => write!(f, "accelerating-hotspot"),
            InsightType::CollaborationHotspot => write!(f, "collaboration-hotspot"),
        }
    }
}

/// A ranked finding backed by patterns from several analyzers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Insight {
    /// Kind of finding.
    pub insight_type: InsightType,
    /// Weighted geometric mean over the supporting analyzers, each reduced
    /// to the geometric mean of its own patterns first.
    pub confidence: f64,
    /// Human-readable summary.
    pub description: String,
    /// Patterns this insight was derived from.
    pub supporting_pattern_refs: BTreeSet<PatternRef>,
}

/// Cost and completeness of one analyzer run.
///
/// # Examples
///
/// ```
/// use std::time::Instant;
/// use changepulse_core::Metrics;
///
/// let started = Instant::now();
/// let mut metrics = Metrics::new(10, 1);
/// metrics.mark_incomplete("deadline reached");
/// let metrics = metrics.finish(started);
/// assert!(metrics.incomplete);
/// assert_eq!(metrics.notes, vec!["deadline reached".to_string()]);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metrics {
    /// Wall-clock time spent.
    pub execution_time_ms: u64,
    /// Records that contributed to the result.
    pub records_analyzed: usize,
    /// Records rejected as malformed.
    pub records_skipped: usize,
    /// `true` when the run stopped early.
    pub incomplete: bool,
    /// Recovered conditions worth surfacing.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

impl Metrics {
    /// Metrics with counts set and no timing yet.
    pub fn new(records_analyzed: usize, records_skipped: usize) -> Self {
        Self {
            records_analyzed,
            records_skipped,
            ..Self::default()
        }
    }

    /// Append a note.
    pub fn note(&mut self, note: impl fmt::Display) {
        self.notes.push(note.to_string());
    }

    /// Flag the result as partial and record why.
    pub fn mark_incomplete(&mut self, reason: impl fmt::Display) {
        self.incomplete = true;
        self.note(reason);
    }

    /// Stamp elapsed time since `started`.
    pub fn finish(mut self, started: Instant) -> Self {
        self.execution_time_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        self
    }
}
