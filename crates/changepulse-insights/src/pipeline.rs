//! Concurrent analyzer fan-out with a single join barrier.
//!
//! The pipeline fetches one project's history once, shares the validated
//! snapshot with the four analyzers running on the blocking pool, waits for
//! all of them and then correlates their patterns. An analyzer that runs
//! past its deadline is cancelled and contributes an empty, incomplete
//! result; only a failing event source aborts the run.

use std::sync::Arc;
use std::time::Duration;

use changepulse_core::{Budget, EventSource, Metrics, ProjectId, PulseConfig, PulseError};
use changepulse_patterns::cooccurrence::{CooccurrenceAnalyzer, CooccurrenceOutput};
use changepulse_patterns::developer::{DeveloperAnalyzer, DeveloperOutput};
use changepulse_patterns::magnitude::{MagnitudeAnalyzer, MagnitudeOutput};
use changepulse_patterns::snapshot::Snapshot;
use changepulse_patterns::temporal::{TemporalAnalyzer, TemporalOutput};
use serde::Serialize;
use tracing::{info, warn};

use crate::aggregator::{AggregateOutput, AggregatorInput, ConfidenceAggregator};

/// Everything one pipeline run produced.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineReport {
    /// Project that was analyzed.
    pub project: ProjectId,
    /// Co-change patterns.
    pub cooccurrence: CooccurrenceOutput,
    /// Rhythm and burst patterns.
    pub temporal: TemporalOutput,
    /// Silos, clusters and bus factor.
    pub developer: DeveloperOutput,
    /// Risk levels and trends.
    pub magnitude: MagnitudeOutput,
    /// Correlated insights.
    pub aggregate: AggregateOutput,
}

impl PipelineReport {
    /// `true` if any stage returned partial results.
    pub fn is_incomplete(&self) -> bool {
        self.cooccurrence.metrics.incomplete
            || self.temporal.metrics.incomplete
            || self.developer.metrics.incomplete
            || self.magnitude.metrics.incomplete
            || self.aggregate.metrics.incomplete
    }
}

/// Runs every analyzer over one project and aggregates the results.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use changepulse_core::{MemoryEventSource, ProjectId, PulseConfig};
/// use changepulse_insights::pipeline::InsightPipeline;
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let pipeline = InsightPipeline::new(PulseConfig::default()).unwrap();
/// let source = Arc::new(MemoryEventSource::new());
/// let report = pipeline.run(source, ProjectId::from("empty")).await.unwrap();
/// assert!(report.aggregate.insights.is_empty());
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct InsightPipeline {
    cooccurrence: CooccurrenceAnalyzer,
    temporal: TemporalAnalyzer,
    developer: DeveloperAnalyzer,
    magnitude: MagnitudeAnalyzer,
    aggregator: ConfidenceAggregator,
    timeout: Duration,
    grace: Duration,
}

impl InsightPipeline {
    /// Build every stage from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`PulseError::Config`] if any section is invalid.
    pub fn new(config: PulseConfig) -> Result<Self, PulseError> {
        config.validate()?;
        Ok(Self {
            cooccurrence: CooccurrenceAnalyzer::new(config.cooccurrence)?,
            temporal: TemporalAnalyzer::new(config.temporal)?,
            developer: DeveloperAnalyzer::new(config.developer)?,
            magnitude: MagnitudeAnalyzer::new(config.magnitude)?,
            aggregator: ConfidenceAggregator::new(config.aggregator)?,
            timeout: Duration::from_millis(config.pipeline.analyzer_timeout_ms),
            grace: Duration::from_millis(config.pipeline.join_grace_ms),
        })
    }

    /// Analyze `project` with no outer cancellation.
    ///
    /// # Errors
    ///
    /// Returns the event source's error if fetching fails.
    pub async fn run(
        &self,
        source: Arc<dyn EventSource>,
        project: ProjectId,
    ) -> Result<PipelineReport, PulseError> {
        self.run_with_budget(source, project, &Budget::unlimited()).await
    }

    /// Analyze `project`; cancelling `budget` stops every analyzer early.
    ///
    /// # Errors
    ///
    /// Returns the event source's error if fetching fails.
    pub async fn run_with_budget(
        &self,
        source: Arc<dyn EventSource>,
        project: ProjectId,
        budget: &Budget,
    ) -> Result<PipelineReport, PulseError> {
        info!(project = %project, "starting pipeline");

        let fetch_project = project.clone();
        let snapshot = tokio::task::spawn_blocking(move || {
            Snapshot::load(source.as_ref(), &fetch_project)
        })
        .await
        .map_err(|e| PulseError::Source(format!("fetch task failed: {e}")))??;
        let snapshot = Arc::new(snapshot);
        let skipped = snapshot.records_skipped;

        let cooccurrence = self.cooccurrence.clone();
        let temporal = self.temporal.clone();
        let developer = self.developer.clone();
        let magnitude = self.magnitude.clone();

        let (cooccurrence, temporal, developer, magnitude) = tokio::join!(
            self.supervise(
                "cooccurrence",
                budget,
                Arc::clone(&snapshot),
                move |s, b| cooccurrence.analyze_snapshot(s, b),
                |metrics| CooccurrenceOutput {
                    patterns: Vec::new(),
                    metrics,
                },
            ),
            self.supervise(
                "temporal",
                budget,
                Arc::clone(&snapshot),
                move |s, b| temporal.analyze_snapshot(s, b),
                |metrics| TemporalOutput {
                    patterns: Vec::new(),
                    metrics,
                },
            ),
            self.supervise(
                "developer",
                budget,
                Arc::clone(&snapshot),
                move |s, b| developer.analyze_snapshot(s, b),
                |metrics| DeveloperOutput {
                    patterns: Vec::new(),
                    project_bus_factor: 0,
                    metrics,
                },
            ),
            self.supervise(
                "magnitude",
                budget,
                Arc::clone(&snapshot),
                move |s, b| magnitude.analyze_snapshot(s, b),
                |metrics| MagnitudeOutput {
                    magnitude_patterns: Vec::new(),
                    frequency_patterns: Vec::new(),
                    metrics,
                },
            ),
        );

        let incomplete = [
            ("cooccurrence", cooccurrence.metrics.incomplete),
            ("temporal", temporal.metrics.incomplete),
            ("developer", developer.metrics.incomplete),
            ("magnitude", magnitude.metrics.incomplete),
        ]
        .into_iter()
        .filter(|(_, partial)| *partial)
        .map(|(name, _)| name.to_string())
        .collect();

        let input = AggregatorInput {
            cooccurrence: cooccurrence.patterns.clone(),
            temporal: temporal.patterns.clone(),
            developer: developer.patterns.clone(),
            magnitude: magnitude.magnitude_patterns.clone(),
            frequency: magnitude.frequency_patterns.clone(),
            incomplete,
        };
        let aggregate = self.aggregator.aggregate(&input);

        info!(
            project = %project,
            commits = snapshot.total_commits(),
            skipped,
            insights = aggregate.insights.len(),
            incomplete = aggregate.metrics.incomplete,
            "pipeline finished"
        );

        Ok(PipelineReport {
            project,
            cooccurrence,
            temporal,
            developer,
            magnitude,
            aggregate,
        })
    }

    /// Run `work` on the blocking pool under a child of `parent`.
    ///
    /// Waits one grace period past the deadline; a task still running then,
    /// or one that panicked, is replaced by `abandoned`.
    async fn supervise<T, W, A>(
        &self,
        analyzer: &'static str,
        parent: &Budget,
        snapshot: Arc<Snapshot>,
        work: W,
        abandoned: A,
    ) -> T
    where
        T: Send + 'static,
        W: FnOnce(&Snapshot, &Budget) -> T + Send + 'static,
        A: FnOnce(Metrics) -> T,
    {
        let budget = parent.child(self.timeout);
        let task_budget = budget.clone();
        let skipped = snapshot.records_skipped;
        let handle = tokio::task::spawn_blocking(move || work(&snapshot, &task_budget));

        let reason = match tokio::time::timeout(self.timeout + self.grace, handle).await {
            Ok(Ok(output)) => return output,
            Ok(Err(e)) => {
                warn!(analyzer, error = %e, "analyzer task failed");
                format!("{analyzer} task failed: {e}")
            }
            Err(_) => {
                budget.cancel();
                warn!(analyzer, "analyzer abandoned after deadline");
                PulseError::Timeout {
                    analyzer,
                    elapsed_ms: budget.elapsed_ms(),
                }
                .to_string()
            }
        };

        let mut metrics = Metrics::new(0, skipped);
        metrics.mark_incomplete(reason);
        abandoned(metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use changepulse_core::{CooccurrenceConfig, MagnitudeConfig, PipelineConfig};

    struct FailingSource;

    impl EventSource for FailingSource {
        fn fetch(&self, _project: &ProjectId) -> Result<changepulse_core::EventBatch, PulseError> {
            Err(PulseError::Source("connection refused".into()))
        }
    }

    #[test]
    fn inverted_cutoffs_are_rejected() {
        let config = PulseConfig {
            magnitude: MagnitudeConfig {
                critical_fraction: 0.5,
                high_fraction: 0.2,
                ..MagnitudeConfig::default()
            },
            ..PulseConfig::default()
        };
        assert!(matches!(InsightPipeline::new(config), Err(PulseError::Config(_))));
    }

    #[test]
    fn negative_support_is_rejected() {
        let config = PulseConfig {
            cooccurrence: CooccurrenceConfig {
                min_support: -0.5,
                ..CooccurrenceConfig::default()
            },
            ..PulseConfig::default()
        };
        assert!(matches!(InsightPipeline::new(config), Err(PulseError::Config(_))));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let config = PulseConfig {
            pipeline: PipelineConfig {
                analyzer_timeout_ms: 0,
                join_grace_ms: 0,
            },
            ..PulseConfig::default()
        };
        assert!(InsightPipeline::new(config).is_err());
    }

    #[tokio::test]
    async fn source_failure_is_an_error() {
        let pipeline = InsightPipeline::new(PulseConfig::default()).unwrap();
        let result = pipeline
            .run(Arc::new(FailingSource), ProjectId::from("p"))
            .await;
        assert!(matches!(result, Err(PulseError::Source(_))));
    }

    #[tokio::test]
    async fn stuck_analyzer_is_abandoned() {
        let pipeline = InsightPipeline::new(PulseConfig {
            pipeline: PipelineConfig {
                analyzer_timeout_ms: 10,
                join_grace_ms: 10,
            },
            ..PulseConfig::default()
        })
        .unwrap();
        let output = pipeline
            .supervise(
                "stuck",
                &Budget::unlimited(),
                Arc::new(Snapshot::empty("p".into())),
                |_, budget| {
                    // Ignores its budget for longer than the grace period
                    std::thread::sleep(Duration::from_millis(200));
                    budget.is_exhausted()
                },
                |_| false,
            )
            .await;
        assert!(!output);
    }

    #[tokio::test]
    async fn panicking_analyzer_yields_incomplete_metrics() {
        let pipeline = InsightPipeline::new(PulseConfig::default()).unwrap();
        let metrics = pipeline
            .supervise(
                "panics",
                &Budget::unlimited(),
                Arc::new(Snapshot::empty("p".into())),
                |_, _| -> Metrics { panic!("boom") },
                |metrics| metrics,
            )
            .await;
        assert!(metrics.incomplete);
        assert!(metrics.notes[0].starts_with("panics task failed"));
    }
}
