//! Co-change mining.
//!
//! Treats every commit as a market basket of files and mines file pairs
//! that change together more often than chance would suggest, scored by
//! support, confidence and lift.

use std::collections::HashMap;
use std::time::Instant;

use changepulse_core::{
    Budget, CooccurrenceConfig, CooccurrencePattern, EventSource, Metrics, ProjectId, PulseError,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::snapshot::{mark_timed_out, Snapshot};

const ANALYZER: &str = "cooccurrence";

/// Result of a co-change run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CooccurrenceOutput {
    /// Pairs ordered by lift, then confidence, then path.
    pub patterns: Vec<CooccurrencePattern>,
    /// Run metrics.
    pub metrics: Metrics,
}

/// Mines file pairs that change together.
///
/// # Examples
///
/// ```
/// use changepulse_core::{CooccurrenceConfig, Budget};
/// use changepulse_patterns::cooccurrence::CooccurrenceAnalyzer;
/// use changepulse_patterns::snapshot::Snapshot;
///
/// let analyzer = CooccurrenceAnalyzer::new(CooccurrenceConfig::default()).unwrap();
/// let output = analyzer.analyze_snapshot(&Snapshot::empty("demo".into()), &Budget::unlimited());
/// assert!(output.patterns.is_empty());
/// ```
#[derive(Debug, Clone)]
pub struct CooccurrenceAnalyzer {
    config: CooccurrenceConfig,
}

impl CooccurrenceAnalyzer {
    /// Create an analyzer after validating `config`.
    ///
    /// # Errors
    ///
    /// Returns [`PulseError::Config`] on an invalid threshold.
    pub fn new(config: CooccurrenceConfig) -> Result<Self, PulseError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Fetch `project` from `source` and mine it.
    ///
    /// # Errors
    ///
    /// Only fails when the event source does.
    pub fn analyze(
        &self,
        source: &dyn EventSource,
        project: &ProjectId,
    ) -> Result<CooccurrenceOutput, PulseError> {
        let snapshot = Snapshot::load(source, project)?;
        Ok(self.analyze_snapshot(&snapshot, &Budget::unlimited()))
    }

    /// Mine co-changing pairs from `snapshot`.
    ///
    /// Commits processed before the budget ran out form the transaction
    /// set, so partial results stay internally consistent.
    pub fn analyze_snapshot(&self, snapshot: &Snapshot, budget: &Budget) -> CooccurrenceOutput {
        let started = Instant::now();
        let mut metrics = snapshot.base_metrics();

        // Per-file transaction counts and per-pair co-change counts
        let mut file_counts: HashMap<&str, u32> = HashMap::new();
        let mut pair_counts: HashMap<(&str, &str), u32> = HashMap::new();
        let mut transactions = 0u32;
        let mut bulk_commits = 0usize;

        for commit in &snapshot.commits {
            if budget.is_exhausted() {
                mark_timed_out(&mut metrics, ANALYZER, budget);
                break;
            }
            transactions += 1;

            // Changes are unique and sorted per commit, so (files[i], files[j])
            // with i < j is already the canonical pair order.
            let files: Vec<&str> = commit.files().collect();
            for file in &files {
                *file_counts.entry(*file).or_default() += 1;
            }
            if files.len() < 2 {
                continue;
            }
            if files.len() > self.config.max_files_per_commit {
                bulk_commits += 1;
                continue;
            }
            for i in 0..files.len() {
                for j in (i + 1)..files.len() {
                    *pair_counts.entry((files[i], files[j])).or_default() += 1;
                }
            }
        }

        metrics.records_analyzed = transactions as usize;
        if bulk_commits > 0 {
            metrics.note(format!(
                "{bulk_commits} commits touched more than {} files and contributed no pairs",
                self.config.max_files_per_commit
            ));
        }

        let patterns = self.score_pairs(&file_counts, &pair_counts, transactions);
        debug!(
            project = %snapshot.project,
            transactions,
            candidates = pair_counts.len(),
            patterns = patterns.len(),
            "co-change mining finished"
        );

        CooccurrenceOutput {
            patterns,
            metrics: metrics.finish(started),
        }
    }

    fn score_pairs(
        &self,
        file_counts: &HashMap<&str, u32>,
        pair_counts: &HashMap<(&str, &str), u32>,
        transactions: u32,
    ) -> Vec<CooccurrencePattern> {
        if transactions == 0 {
            return Vec::new();
        }
        let total = f64::from(transactions);

        let mut patterns = Vec::new();
        for (&(file1, file2), &count) in pair_counts {
            if count < self.config.min_cooccurrence_count {
                continue;
            }
            let support = f64::from(count) / total;
            if support < self.config.min_support {
                continue;
            }

            let count1 = file_counts.get(file1).copied().unwrap_or(0);
            let count2 = file_counts.get(file2).copied().unwrap_or(0);
            if count1 == 0 || count2 == 0 {
                continue;
            }
            let support1 = f64::from(count1) / total;
            let support2 = f64::from(count2) / total;

            patterns.push(CooccurrencePattern {
                file1: file1.to_string(),
                file2: file2.to_string(),
                co_occurrence_count: count,
                support,
                confidence: (support / support1).min(1.0),
                reverse_confidence: (support / support2).min(1.0),
                lift: support / (support1 * support2),
            });
        }

        patterns.sort_by(|a, b| {
            b.lift
                .total_cmp(&a.lift)
                .then_with(|| b.confidence.total_cmp(&a.confidence))
                .then_with(|| a.file1.cmp(&b.file1))
                .then_with(|| a.file2.cmp(&b.file2))
        });
        patterns
    }
}
