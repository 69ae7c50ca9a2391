//! Cross-analyzer correlation into ranked insights.
//!
//! The aggregator joins the pattern lists of the individual analyzers on
//! file paths and turns overlaps into compound findings. Supporting
//! patterns are first averaged within their analyzer, then each analyzer
//! counts once, with its configured weight, in a geometric mean. A weak
//! analyzer pulls the whole finding down no matter how many patterns the
//! others contribute.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Instant;

use changepulse_core::{
    AggregatorConfig, CooccurrencePattern, DeveloperPattern, DeveloperPatternType,
    FrequencyPattern, Insight, InsightType, MagnitudePattern, Metrics, Pattern, PatternKind,
    PatternRef, PulseError, TemporalPattern, Trend,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Maximum file names listed in an insight description.
const LISTED_FILES: usize = 3;

/// Pattern lists handed to the aggregator.
///
/// # Examples
///
/// ```
/// use changepulse_insights::aggregator::AggregatorInput;
///
/// let input = AggregatorInput::default();
/// assert!(input.is_empty());
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatorInput {
    /// Co-changing file pairs.
    #[serde(default)]
    pub cooccurrence: Vec<CooccurrencePattern>,
    /// Rhythm and burst patterns.
    #[serde(default)]
    pub temporal: Vec<TemporalPattern>,
    /// Silos and collaboration clusters.
    #[serde(default)]
    pub developer: Vec<DeveloperPattern>,
    /// Per-file risk profiles.
    #[serde(default)]
    pub magnitude: Vec<MagnitudePattern>,
    /// Per-file churn trends.
    #[serde(default)]
    pub frequency: Vec<FrequencyPattern>,
    /// Upstream analyzers that returned partial results.
    #[serde(default)]
    pub incomplete: Vec<String>,
}

impl AggregatorInput {
    /// `true` when no analyzer produced any pattern.
    pub fn is_empty(&self) -> bool {
        self.cooccurrence.is_empty()
            && self.temporal.is_empty()
            && self.developer.is_empty()
            && self.magnitude.is_empty()
            && self.frequency.is_empty()
    }
}

/// Ranked insights plus metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateOutput {
    /// Insights by confidence descending, then description.
    pub insights: Vec<Insight>,
    /// Run metrics.
    pub metrics: Metrics,
}

/// Correlates patterns across analyzers into [`Insight`]s.
///
/// # Examples
///
/// ```
/// use changepulse_core::AggregatorConfig;
/// use changepulse_insights::aggregator::{AggregatorInput, ConfidenceAggregator};
///
/// let aggregator = ConfidenceAggregator::new(AggregatorConfig::default()).unwrap();
/// let output = aggregator.aggregate(&AggregatorInput::default());
/// assert!(output.insights.is_empty());
/// ```
#[derive(Debug, Clone)]
pub struct ConfidenceAggregator {
    config: AggregatorConfig,
}

/// Valid patterns, borrowed from the input.
struct Evidence<'a> {
    cooccurrence: Vec<&'a CooccurrencePattern>,
    developer: Vec<&'a DeveloperPattern>,
    /// Elevated magnitude patterns by path.
    elevated: HashMap<&'a str, &'a MagnitudePattern>,
    /// Frequency patterns by path.
    frequency: HashMap<&'a str, &'a FrequencyPattern>,
}

impl ConfidenceAggregator {
    /// Create an aggregator after validating `config`.
    ///
    /// # Errors
    ///
    /// Returns [`PulseError::Config`] on a non-positive weight or a
    /// `min_confidence` outside `[0, 1]`.
    pub fn new(config: AggregatorConfig) -> Result<Self, PulseError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Correlate `input` into ranked insights.
    ///
    /// Never fails: empty input gives empty output, and patterns carrying an
    /// unusable confidence are skipped and counted.
    pub fn aggregate(&self, input: &AggregatorInput) -> AggregateOutput {
        let started = Instant::now();
        let mut metrics = Metrics::default();
        for analyzer in &input.incomplete {
            metrics.mark_incomplete(format!("{analyzer} returned partial results"));
        }

        let evidence = self.collect(input, &mut metrics);

        let mut candidates = Vec::new();
        candidates.extend(self.coupled_hotspots(&evidence));
        candidates.extend(self.developer_hotspots(&evidence));
        candidates.extend(self.accelerating_hotspots(&evidence));
        let generated = candidates.len();

        let mut insights = dedup(candidates);
        insights.retain(|i| i.confidence >= self.config.min_confidence);
        insights.truncate(self.config.max_insights);

        debug!(
            patterns = metrics.records_analyzed,
            skipped = metrics.records_skipped,
            generated,
            kept = insights.len(),
            "aggregation finished"
        );

        AggregateOutput {
            insights,
            metrics: metrics.finish(started),
        }
    }

    fn collect<'a>(&self, input: &'a AggregatorInput, metrics: &mut Metrics) -> Evidence<'a> {
        let mut evidence = Evidence {
            cooccurrence: keep_valid(&input.cooccurrence, metrics),
            developer: keep_valid(&input.developer, metrics),
            elevated: HashMap::new(),
            frequency: HashMap::new(),
        };
        // Temporal patterns take part in no compound rule, but are still
        // checked and counted.
        keep_valid(&input.temporal, metrics);

        for pattern in keep_valid(&input.magnitude, metrics) {
            if pattern.risk_level.is_elevated() {
                evidence.elevated.insert(pattern.file_path.as_str(), pattern);
            }
        }
        for pattern in keep_valid(&input.frequency, metrics) {
            evidence.frequency.insert(pattern.file_path.as_str(), pattern);
        }
        evidence
    }

    fn coupled_hotspots(&self, evidence: &Evidence<'_>) -> Vec<Insight> {
        evidence
            .cooccurrence
            .iter()
            .filter(|pair| pair.lift > self.config.min_coupling_lift)
            .filter_map(|pair| {
                let first = evidence.elevated.get(pair.file1.as_str())?;
                let second = evidence.elevated.get(pair.file2.as_str())?;
                let contributors: [&dyn Pattern; 3] = [*pair, *first, *second];
                Some(self.insight(
                    InsightType::CoupledHotspot,
                    format!(
                        "{} and {} change together (lift {:.2}) and are both {}+ risk",
                        pair.file1,
                        pair.file2,
                        pair.lift,
                        first.risk_level.min(second.risk_level)
                    ),
                    &contributors,
                ))
            })
            .collect()
    }

    fn developer_hotspots(&self, evidence: &Evidence<'_>) -> Vec<Insight> {
        let mut insights = Vec::new();
        for &pattern in &evidence.developer {
            let risky: Vec<&MagnitudePattern> = pattern
                .affected_files
                .iter()
                .filter_map(|f| evidence.elevated.get(f.as_str()).copied())
                .collect();
            if risky.is_empty() {
                continue;
            }

            let mut contributors: Vec<&dyn Pattern> = Vec::with_capacity(risky.len() + 1);
            contributors.push(pattern);
            contributors.extend(risky.iter().map(|&m| m as &dyn Pattern));
            let files = list_files(risky.iter().map(|m| m.file_path.as_str()));

            let (insight_type, description) = match pattern.pattern_type {
                DeveloperPatternType::OwnershipSilo => (
                    InsightType::BusFactorRisk,
                    format!(
                        "{} is the dominant author of {} high-risk file(s): {files}",
                        pattern.author,
                        risky.len()
                    ),
                ),
                DeveloperPatternType::CollaborationCluster => (
                    InsightType::CollaborationHotspot,
                    format!(
                        "{} work closely together on {} high-risk file(s): {files}",
                        pattern.collaborators.join(", "),
                        risky.len()
                    ),
                ),
            };
            insights.push(self.insight(insight_type, description, &contributors));
        }
        insights
    }

    fn accelerating_hotspots(&self, evidence: &Evidence<'_>) -> Vec<Insight> {
        evidence
            .elevated
            .iter()
            .filter_map(|(path, &magnitude)| {
                let trend = evidence.frequency.get(path)?;
                if trend.trend != Trend::Increasing {
                    return None;
                }
                let contributors: [&dyn Pattern; 2] = [magnitude, *trend];
                Some(self.insight(
                    InsightType::AcceleratingHotspot,
                    format!(
                        "{path} is {} risk and its churn is increasing ({:+.1} lines per bucket)",
                        magnitude.risk_level, trend.trend_slope
                    ),
                    &contributors,
                ))
            })
            .collect()
    }

    fn insight(
        &self,
        insight_type: InsightType,
        description: String,
        contributors: &[&dyn Pattern],
    ) -> Insight {
        let mut by_kind: BTreeMap<PatternKind, Vec<(f64, f64)>> = BTreeMap::new();
        for pattern in contributors {
            by_kind
                .entry(pattern.kind())
                .or_default()
                .push((1.0, pattern.confidence()));
        }
        let weighted: Vec<(f64, f64)> = by_kind
            .into_iter()
            .map(|(kind, members)| {
                (
                    self.config.weights.weight(kind),
                    weighted_geometric_mean(&members),
                )
            })
            .collect();
        Insight {
            insight_type,
            confidence: weighted_geometric_mean(&weighted),
            description,
            supporting_pattern_refs: contributors.iter().map(|p| p.pattern_ref()).collect(),
        }
    }
}

/// Drop patterns whose confidence is not a finite value in `[0, 1]`.
fn keep_valid<'a, P: Pattern>(patterns: &'a [P], metrics: &mut Metrics) -> Vec<&'a P> {
    let mut valid = Vec::with_capacity(patterns.len());
    for pattern in patterns {
        let confidence = pattern.confidence();
        if confidence.is_finite() && (0.0..=1.0).contains(&confidence) {
            metrics.records_analyzed += 1;
            valid.push(pattern);
        } else {
            debug!(pattern = %pattern.pattern_ref(), confidence, "skipping pattern");
            metrics.records_skipped += 1;
        }
    }
    valid
}

/// `exp(Σ wᵢ·ln cᵢ / Σ wᵢ)` over `(weight, confidence)` pairs.
///
/// Any zero confidence gives zero; no contributors give zero.
pub fn weighted_geometric_mean(weighted: &[(f64, f64)]) -> f64 {
    let total_weight: f64 = weighted.iter().map(|(w, _)| w).sum();
    if weighted.is_empty() || total_weight <= 0.0 {
        return 0.0;
    }
    if weighted.iter().any(|&(_, c)| c <= 0.0) {
        return 0.0;
    }
    let log_sum: f64 = weighted.iter().map(|&(w, c)| w * c.ln()).sum();
    (log_sum / total_weight).exp().clamp(0.0, 1.0)
}

/// Rank by confidence, keeping only the strongest insight per shared evidence.
fn dedup(mut candidates: Vec<Insight>) -> Vec<Insight> {
    candidates.sort_by(|a, b| {
        b.confidence
            .total_cmp(&a.confidence)
            .then_with(|| a.description.cmp(&b.description))
    });

    let mut kept: Vec<Insight> = Vec::with_capacity(candidates.len());
    let mut claimed: HashMap<InsightType, BTreeSet<PatternRef>> = HashMap::new();
    for insight in candidates {
        let refs = claimed.entry(insight.insight_type).or_default();
        if insight
            .supporting_pattern_refs
            .iter()
            .any(|r| refs.contains(r))
        {
            continue;
        }
        refs.extend(insight.supporting_pattern_refs.iter().cloned());
        kept.push(insight);
    }
    kept
}

fn list_files<'a>(files: impl Iterator<Item = &'a str>) -> String {
    let mut files: Vec<&str> = files.collect();
    files.sort_unstable();
    let extra = files.len().saturating_sub(LISTED_FILES);
    let shown = files[..files.len().min(LISTED_FILES)].join(", ");
    if extra > 0 {
        format!("{shown} and {extra} more")
    } else {
        shown
    }
}
