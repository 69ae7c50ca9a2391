//! Ownership silos, collaboration clusters and bus factor.
//!
//! Analyzes how file touches are distributed across authors to find
//! knowledge silos (authors dominating a set of files), groups of authors
//! who repeatedly work on the same files close together in time, and the
//! project bus factor.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::time::Instant;

use changepulse_core::{
    Budget, DeveloperConfig, DeveloperPattern, DeveloperPatternType, EventSource, Metrics,
    ProjectId, PulseError,
};
use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::unionfind::UnionFind;
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::snapshot::{mark_timed_out, Snapshot};

const ANALYZER: &str = "developer";

/// Share of a file's touches that makes an author a significant contributor.
const SIGNIFICANT_SHARE: f64 = 0.10;

/// Result of an ownership run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeveloperOutput {
    /// Silos first, then clusters; each by confidence descending.
    pub patterns: Vec<DeveloperPattern>,
    /// Minimum authors to remove to orphan more than half of the files.
    pub project_bus_factor: u32,
    /// Run metrics.
    pub metrics: Metrics,
}

/// Mines ownership silos and collaboration clusters.
///
/// # Examples
///
/// ```
/// use changepulse_core::{Budget, DeveloperConfig};
/// use changepulse_patterns::developer::DeveloperAnalyzer;
/// use changepulse_patterns::snapshot::Snapshot;
///
/// let analyzer = DeveloperAnalyzer::new(DeveloperConfig::default()).unwrap();
/// let output = analyzer.analyze_snapshot(&Snapshot::empty("demo".into()), &Budget::unlimited());
/// assert!(output.patterns.is_empty());
/// assert_eq!(output.project_bus_factor, 0);
/// ```
#[derive(Debug, Clone)]
pub struct DeveloperAnalyzer {
    config: DeveloperConfig,
}

/// Touch counts accumulated from the snapshot.
#[derive(Default)]
struct Touches<'a> {
    /// Commits per author.
    author_commits: HashMap<&'a str, u32>,
    /// file -> author -> touches
    file_authors: HashMap<&'a str, HashMap<&'a str, u32>>,
    /// file -> (timestamp, author), in commit order
    timeline: HashMap<&'a str, Vec<(i64, &'a str)>>,
}

impl DeveloperAnalyzer {
    /// Create an analyzer after validating `config`.
    ///
    /// # Errors
    ///
    /// Returns [`PulseError::Config`] on an invalid threshold.
    pub fn new(config: DeveloperConfig) -> Result<Self, PulseError> {
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
    ) -> Result<DeveloperOutput, PulseError> {
        let snapshot = Snapshot::load(source, project)?;
        Ok(self.analyze_snapshot(&snapshot, &Budget::unlimited()))
    }

    /// Mine developer structure from `snapshot`.
    pub fn analyze_snapshot(&self, snapshot: &Snapshot, budget: &Budget) -> DeveloperOutput {
        let started = Instant::now();
        let mut metrics = snapshot.base_metrics();

        let mut touches = Touches::default();
        let mut processed = 0usize;
        for commit in &snapshot.commits {
            if budget.is_exhausted() {
                mark_timed_out(&mut metrics, ANALYZER, budget);
                break;
            }
            processed += 1;
            let author = commit.author.as_str();
            *touches.author_commits.entry(author).or_default() += 1;
            for file in commit.files() {
                *touches
                    .file_authors
                    .entry(file)
                    .or_default()
                    .entry(author)
                    .or_default() += 1;
                touches
                    .timeline
                    .entry(file)
                    .or_default()
                    .push((commit.timestamp, author));
            }
        }
        metrics.records_analyzed = processed;

        let mut patterns = self.silos(&touches);
        if budget.is_exhausted() {
            if !metrics.incomplete {
                mark_timed_out(&mut metrics, ANALYZER, budget);
            }
        } else {
            patterns.extend(self.clusters(&touches, budget, &mut metrics));
        }

        patterns.sort_by(|a, b| {
            a.pattern_type
                .cmp(&b.pattern_type)
                .then_with(|| b.confidence.total_cmp(&a.confidence))
                .then_with(|| a.author.cmp(&b.author))
                .then_with(|| a.collaborators.cmp(&b.collaborators))
        });

        let project_bus_factor = compute_project_bus_factor(&touches.file_authors);
        debug!(
            project = %snapshot.project,
            authors = touches.author_commits.len(),
            patterns = patterns.len(),
            project_bus_factor,
            "developer analysis finished"
        );

        DeveloperOutput {
            patterns,
            project_bus_factor,
            metrics: metrics.finish(started),
        }
    }

    /// Confidence multiplier for an author with `commits` commits.
    ///
    /// Monotonically increasing, reaching 0.5 at `commit_saturation`.
    fn history_weight(&self, commits: u32) -> f64 {
        let n = f64::from(commits);
        n / (n + self.config.commit_saturation)
    }

    fn silos(&self, touches: &Touches<'_>) -> Vec<DeveloperPattern> {
        // author -> [(file, share)] for files where the author exceeds the threshold
        let mut owned: BTreeMap<&str, Vec<(&str, f64)>> = BTreeMap::new();
        for (&file, authors) in &touches.file_authors {
            let total: u32 = authors.values().sum();
            if total == 0 {
                continue;
            }
            for (&author, &count) in authors {
                let share = f64::from(count) / f64::from(total);
                if share > self.config.ownership_threshold {
                    owned.entry(author).or_default().push((file, share));
                }
            }
        }

        owned
            .into_iter()
            .filter(|(_, files)| files.len() >= self.config.min_silo_files)
            .map(|(author, files)| {
                let commits = touches.author_commits.get(author).copied().unwrap_or(0);
                let mean_share = files.iter().map(|(_, s)| s).sum::<f64>() / files.len() as f64;
                DeveloperPattern {
                    author: author.to_string(),
                    pattern_type: DeveloperPatternType::OwnershipSilo,
                    affected_files: files.iter().map(|(f, _)| f.to_string()).collect(),
                    collaborators: vec![author.to_string()],
                    author_commits: commits,
                    confidence: (mean_share * self.history_weight(commits)).clamp(0.0, 1.0),
                }
            })
            .collect()
    }

    fn clusters(
        &self,
        touches: &Touches<'_>,
        budget: &Budget,
        metrics: &mut Metrics,
    ) -> Vec<DeveloperPattern> {
        // Linked touch counts per author pair, canonical (smaller, larger)
        let mut links: HashMap<(&str, &str), u32> = HashMap::new();
        let mut files: Vec<&&str> = touches.timeline.keys().collect();
        files.sort();
        for file in files {
            if budget.is_exhausted() {
                mark_timed_out(metrics, ANALYZER, budget);
                return Vec::new();
            }
            let events = &touches.timeline[*file];
            for (i, &(t1, a1)) in events.iter().enumerate() {
                for &(t2, a2) in &events[i + 1..] {
                    if t2 - t1 > self.config.collaboration_window_secs {
                        break;
                    }
                    if a1 != a2 {
                        let key = if a1 < a2 { (a1, a2) } else { (a2, a1) };
                        *links.entry(key).or_default() += 1;
                    }
                }
            }
        }

        let mut edges: Vec<((&str, &str), u32)> = links
            .into_iter()
            .filter(|&(_, count)| count >= self.config.min_shared_touches)
            .collect();
        edges.sort();

        let mut authors: BTreeSet<&str> = BTreeSet::new();
        for &((a, b), _) in &edges {
            authors.insert(a);
            authors.insert(b);
        }

        let mut graph: UnGraph<&str, u32> = UnGraph::with_capacity(authors.len(), edges.len());
        let nodes: HashMap<&str, NodeIndex> =
            authors.iter().map(|&a| (a, graph.add_node(a))).collect();
        for &((a, b), count) in &edges {
            graph.add_edge(nodes[a], nodes[b], count);
        }

        let mut components = UnionFind::<usize>::new(graph.node_count());
        for edge in graph.edge_references() {
            components.union(edge.source().index(), edge.target().index());
        }
        let mut groups: BTreeMap<usize, Vec<NodeIndex>> = BTreeMap::new();
        for node in graph.node_indices() {
            groups
                .entry(components.find(node.index()))
                .or_default()
                .push(node);
        }

        groups
            .into_values()
            .filter(|members| members.len() >= 2)
            .filter_map(|members| self.cluster_pattern(&graph, &members, touches))
            .collect()
    }

    fn cluster_pattern(
        &self,
        graph: &UnGraph<&str, u32>,
        members: &[NodeIndex],
        touches: &Touches<'_>,
    ) -> Option<DeveloperPattern> {
        let member_set: HashSet<NodeIndex> = members.iter().copied().collect();
        let internal_edges = graph
            .edge_references()
            .filter(|e| member_set.contains(&e.source()) && member_set.contains(&e.target()))
            .count();
        let m = members.len() as f64;
        let density = internal_edges as f64 / (m * (m - 1.0) / 2.0);
        if density < self.config.min_cluster_density {
            return None;
        }

        let mut names: Vec<&str> = members.iter().map(|&n| graph[n]).collect();
        names.sort_unstable();
        let commits_of = |a: &str| touches.author_commits.get(a).copied().unwrap_or(0);

        // Most active member leads; name breaks ties
        let lead = names
            .iter()
            .copied()
            .max_by(|a, b| commits_of(*a).cmp(&commits_of(*b)).then_with(|| b.cmp(a)))?;
        let min_commits = names.iter().map(|&a| commits_of(a)).min().unwrap_or(0);

        let affected_files: BTreeSet<String> = touches
            .file_authors
            .iter()
            .filter(|(_, authors)| names.iter().filter(|&&a| authors.contains_key(a)).count() >= 2)
            .map(|(file, _)| file.to_string())
            .collect();

        Some(DeveloperPattern {
            author: lead.to_string(),
            pattern_type: DeveloperPatternType::CollaborationCluster,
            affected_files,
            collaborators: names.iter().map(|a| a.to_string()).collect(),
            author_commits: commits_of(lead),
            confidence: (density * self.history_weight(min_commits)).clamp(0.0, 1.0),
        })
    }
}

/// Compute the project bus factor.
///
/// Iteratively remove the author contributing to the most files until more
/// than half of the files have lost every significant (>10%) contributor.
fn compute_project_bus_factor(file_authors: &HashMap<&str, HashMap<&str, u32>>) -> u32 {
    if file_authors.is_empty() {
        return 0;
    }

    // Significant contributors per file
    let significant: Vec<HashSet<&str>> = file_authors
        .values()
        .map(|authors| {
            let total: u32 = authors.values().sum();
            authors
                .iter()
                .filter(|(_, &count)| {
                    total > 0 && f64::from(count) / f64::from(total) > SIGNIFICANT_SHARE
                })
                .map(|(&author, _)| author)
                .collect()
        })
        .collect();

    let mut reach: HashMap<&str, u32> = HashMap::new();
    for authors in file_authors.values() {
        for &author in authors.keys() {
            *reach.entry(author).or_default() += 1;
        }
    }
    let mut sorted_authors: Vec<(&str, u32)> = reach.into_iter().collect();
    sorted_authors.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));

    let threshold = significant.len() / 2;
    let mut removed: HashSet<&str> = HashSet::new();
    let mut removals = 0u32;

    for (author, _) in &sorted_authors {
        removed.insert(author);
        removals += 1;

        let orphaned = significant
            .iter()
            .filter(|authors| authors.iter().all(|a| removed.contains(a)))
            .count();
        if orphaned > threshold {
            return removals;
        }
    }

    removals
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::test_support::{snapshot, Spec};

    const T0: i64 = 1_700_000_000;
    const DAY: i64 = 86_400;

    fn analyzer() -> DeveloperAnalyzer {
        DeveloperAnalyzer::new(DeveloperConfig::default()).unwrap()
    }

    /// `(author, day offset, files)` → snapshot with generated hashes.
    fn history(entries: &[(&str, i64, &[&str])]) -> Snapshot {
        let shas: Vec<String> = (0..entries.len()).map(|i| format!("c{i:04}")).collect();
        let specs: Vec<Spec<'_>> = entries
            .iter()
            .zip(&shas)
            .map(|(&(author, day, files), sha)| {
                (
                    sha.as_str(),
                    author,
                    T0 + day * DAY,
                    files.iter().map(|f| (*f, 3, 1)).collect(),
                )
            })
            .collect();
        snapshot(specs)
    }

    #[test]
    fn sole_owner_of_many_files_is_a_silo() {
        let mut entries: Vec<(&str, i64, &[&str])> = Vec::new();
        for day in 0..10 {
            entries.push(("alice", day * 30, &["a.rs", "b.rs", "c.rs"][..]));
        }
        entries.push(("bob", 400, &["d.rs"][..]));
        let output = analyzer().analyze_snapshot(&history(&entries), &Budget::unlimited());

        let silo = output
            .patterns
            .iter()
            .find(|p| p.pattern_type == DeveloperPatternType::OwnershipSilo)
            .unwrap();
        assert_eq!(silo.author, "alice");
        assert_eq!(silo.affected_files.len(), 3);
        assert_eq!(silo.author_commits, 10);
        // share 1.0, weight 10 / (10 + 10)
        assert!((silo.confidence - 0.5).abs() < 1e-9);
    }

    #[test]
    fn shared_files_are_not_silos() {
        let entries: Vec<(&str, i64, &[&str])> = (0..10)
            .map(|i| {
                let author = if i % 2 == 0 { "alice" } else { "bob" };
                (author, i * 30, &["a.rs", "b.rs", "c.rs"][..])
            })
            .collect();
        let output = analyzer().analyze_snapshot(&history(&entries), &Budget::unlimited());
        assert!(output
            .patterns
            .iter()
            .all(|p| p.pattern_type != DeveloperPatternType::OwnershipSilo));
    }

    #[test]
    fn confidence_grows_with_commit_count() {
        let a = analyzer();
        let mut previous = 0.0;
        for commits in [1, 2, 5, 10, 50, 500] {
            let w = a.history_weight(commits);
            assert!(w > previous);
            assert!(w < 1.0);
            previous = w;
        }
    }

    #[test]
    fn close_collaborators_form_a_cluster() {
        let entries: &[(&str, i64, &[&str])] = &[
            ("alice", 0, &["api.rs"]),
            ("bob", 1, &["api.rs"]),
            ("carol", 2, &["api.rs"]),
            ("alice", 3, &["api.rs", "db.rs"]),
            ("bob", 4, &["db.rs"]),
            ("carol", 5, &["db.rs"]),
            ("dave", 200, &["docs.md"]),
        ];
        let output = analyzer().analyze_snapshot(&history(entries), &Budget::unlimited());

        let cluster = output
            .patterns
            .iter()
            .find(|p| p.pattern_type == DeveloperPatternType::CollaborationCluster)
            .unwrap();
        assert_eq!(cluster.collaborators, vec!["alice", "bob", "carol"]);
        assert_eq!(cluster.author, "alice");
        assert!(cluster.affected_files.contains("api.rs"));
        assert!(cluster.affected_files.contains("db.rs"));
        assert!(!cluster.affected_files.contains("docs.md"));
        assert!(cluster.confidence > 0.0 && cluster.confidence <= 1.0);
    }

    #[test]
    fn distant_touches_do_not_link() {
        let entries: &[(&str, i64, &[&str])] = &[
            ("alice", 0, &["api.rs"]),
            ("bob", 30, &["api.rs"]),
            ("alice", 60, &["api.rs"]),
            ("bob", 90, &["api.rs"]),
        ];
        let output = analyzer().analyze_snapshot(&history(entries), &Budget::unlimited());
        assert!(output
            .patterns
            .iter()
            .all(|p| p.pattern_type != DeveloperPatternType::CollaborationCluster));
    }

    #[test]
    fn project_bus_factor_calculation() {
        // alice, bob and carol each own one file exclusively
        let entries: &[(&str, i64, &[&str])] = &[
            ("alice", 0, &["file1.rs"]),
            ("bob", 1, &["file2.rs"]),
            ("carol", 2, &["file3.rs"]),
        ];
        let output = analyzer().analyze_snapshot(&history(entries), &Budget::unlimited());
        // Removing any 2 authors orphans more than half of the files
        assert_eq!(output.project_bus_factor, 2);
    }

    #[test]
    fn zero_commits_is_empty_not_error() {
        let output = analyzer().analyze_snapshot(&Snapshot::empty("p".into()), &Budget::unlimited());
        assert!(output.patterns.is_empty());
        assert_eq!(output.project_bus_factor, 0);
        assert!(!output.metrics.incomplete);
    }

    #[test]
    fn repeated_runs_are_identical() {
        let entries: &[(&str, i64, &[&str])] = &[
            ("alice", 0, &["a.rs", "b.rs"]),
            ("bob", 1, &["a.rs"]),
            ("carol", 1, &["b.rs"]),
            ("bob", 2, &["a.rs", "b.rs"]),
            ("carol", 3, &["a.rs"]),
            ("alice", 3, &["b.rs"]),
        ];
        let snap = history(entries);
        let first = analyzer().analyze_snapshot(&snap, &Budget::unlimited());
        let second = analyzer().analyze_snapshot(&snap, &Budget::unlimited());
        assert_eq!(first.patterns, second.patterns);
        assert_eq!(first.project_bus_factor, second.project_bus_factor);
    }

    #[test]
    fn output_serializes_camel_case() {
        let entries: &[(&str, i64, &[&str])] = &[("alice", 0, &["a.rs"])];
        let output = analyzer().analyze_snapshot(&history(entries), &Budget::unlimited());
        let json = serde_json::to_value(&output).unwrap();
        assert_eq!(json["projectBusFactor"], 1);
        assert!(json["metrics"]["recordsAnalyzed"].is_number());
    }

    #[test]
    fn exhausted_budget_marks_incomplete() {
        let entries: &[(&str, i64, &[&str])] = &[("alice", 0, &["a.rs"])];
        let budget = Budget::unlimited();
        budget.cancel();
        let output = analyzer().analyze_snapshot(&history(entries), &budget);
        assert!(output.metrics.incomplete);
        assert_eq!(output.metrics.notes.len(), 1);
    }

    #[test]
    fn budget_running_out_after_attribution_keeps_silos() {
        let mut entries: Vec<(&str, i64, &[&str])> = Vec::new();
        for day in 0..10 {
            entries.push(("alice", day * 30, &["a.rs", "b.rs", "c.rs"][..]));
        }
        entries.push(("bob", 400, &["d.rs"][..]));
        // One check per commit; the cluster pass finds the budget spent
        let budget = Budget::with_check_limit(entries.len() as u64);
        let output = analyzer().analyze_snapshot(&history(&entries), &budget);

        assert!(output.metrics.incomplete);
        assert_eq!(output.metrics.records_analyzed, 11);
        assert!(output
            .patterns
            .iter()
            .any(|p| p.pattern_type == DeveloperPatternType::OwnershipSilo && p.author == "alice"));
        assert!(output
            .patterns
            .iter()
            .all(|p| p.pattern_type != DeveloperPatternType::CollaborationCluster));
    }
}
