//! Integration test: source → snapshot → analyzers → aggregator.

use std::sync::Arc;

use changepulse_core::{
    Budget, ChangeType, CommitRecord, EventBatch, FileChange, InsightType, MemoryEventSource,
    ProjectId, PulseConfig, PulseError, RiskLevel,
};
use changepulse_insights::pipeline::InsightPipeline;

const T0: i64 = 1_700_000_000;
const DAY: i64 = 86_400;

fn change(sha: &str, path: &str, added: u64, removed: u64) -> FileChange {
    FileChange {
        commit_sha: sha.into(),
        file_path: path.into(),
        change_type: ChangeType::Modified,
        lines_added: added,
        lines_removed: removed,
    }
}

fn make_commit(sha: &str, author: &str, timestamp: i64) -> CommitRecord {
    CommitRecord {
        sha: sha.into(),
        author: author.into(),
        timestamp,
        parent_sha: None,
    }
}

/// Alice alone maintains three tightly coupled core files; twenty other
/// files see a single small change each.
fn core_owned_by_alice() -> EventBatch {
    let mut batch = EventBatch::default();
    for day in 0..30 {
        let sha = format!("core{day:02}");
        batch.commits.push(make_commit(&sha, "alice", T0 + day * DAY));
        for path in ["src/engine.rs", "src/lexer.rs", "src/parser.rs"] {
            batch.file_changes.push(change(&sha, path, 60, 20));
        }
    }
    for i in 0..20 {
        let sha = format!("misc{i:02}");
        let author = if i % 2 == 0 { "bob" } else { "carol" };
        batch
            .commits
            .push(make_commit(&sha, author, T0 + i * DAY + 3_600));
        batch
            .file_changes
            .push(change(&sha, &format!("docs/page{i:02}.md"), 2, 1));
    }
    batch
}

fn source_with(project: &ProjectId, batch: EventBatch) -> Arc<MemoryEventSource> {
    let source = MemoryEventSource::new();
    source.insert(project.clone(), batch);
    Arc::new(source)
}

#[tokio::test]
async fn end_to_end_on_owned_core() {
    let project = ProjectId::from("core");
    let source = source_with(&project, core_owned_by_alice());
    let pipeline = InsightPipeline::new(PulseConfig::default()).unwrap();

    let report = pipeline.run(source, project.clone()).await.unwrap();
    assert_eq!(report.project, project);
    assert!(!report.is_incomplete());

    // Step 1: co-change
    let pair = report
        .cooccurrence
        .patterns
        .iter()
        .find(|p| p.file1 == "src/engine.rs" && p.file2 == "src/parser.rs")
        .expect("core files should be coupled");
    assert_eq!(pair.co_occurrence_count, 30);
    assert!(pair.lift > 1.0);

    // Step 2: ownership
    let silo = report
        .developer
        .patterns
        .iter()
        .find(|p| p.author == "alice")
        .expect("alice should own the core");
    assert_eq!(silo.affected_files.len(), 3);
    assert!(report.developer.project_bus_factor >= 1);

    // Step 3: risk
    let top: Vec<&str> = report.magnitude.magnitude_patterns[..3]
        .iter()
        .map(|p| p.file_path.as_str())
        .collect();
    for path in ["src/engine.rs", "src/lexer.rs", "src/parser.rs"] {
        assert!(top.contains(&path), "{path} should rank in the top three");
    }
    assert!(report.magnitude.magnitude_patterns[..3]
        .iter()
        .all(|p| p.risk_level >= RiskLevel::High));

    // Step 4: insights
    let insights = &report.aggregate.insights;
    assert!(insights
        .iter()
        .any(|i| i.insight_type == InsightType::BusFactorRisk));
    assert!(insights
        .iter()
        .any(|i| i.insight_type == InsightType::CoupledHotspot));
    for insight in insights {
        assert!((0.0..=1.0).contains(&insight.confidence));
        assert!(!insight.supporting_pattern_refs.is_empty());
    }
    for w in insights.windows(2) {
        assert!(w[0].confidence >= w[1].confidence);
    }
}

#[tokio::test]
async fn bus_factor_confidence_weighs_each_analyzer_once() {
    let project = ProjectId::from("core");
    let source = source_with(&project, core_owned_by_alice());
    let pipeline = InsightPipeline::new(PulseConfig::default()).unwrap();
    let report = pipeline.run(source, project).await.unwrap();

    let insight = report
        .aggregate
        .insights
        .iter()
        .find(|i| i.insight_type == InsightType::BusFactorRisk)
        .unwrap();
    let silo = &report.developer.patterns[0];
    let risky: Vec<f64> = report
        .magnitude
        .magnitude_patterns
        .iter()
        .filter(|m| m.risk_level.is_elevated() && silo.affected_files.contains(&m.file_path))
        .map(|m| m.confidence)
        .collect();

    // Risk profiles are averaged first, then weighed once against the silo
    let risk_mean = risky
        .iter()
        .product::<f64>()
        .powf(1.0 / risky.len() as f64);
    let expected = (silo.confidence * risk_mean).sqrt();
    assert!((insight.confidence - expected).abs() < 1e-9);
}

#[tokio::test]
async fn identical_input_gives_identical_output() {
    let project = ProjectId::from("core");
    let pipeline = InsightPipeline::new(PulseConfig::default()).unwrap();
    let first = pipeline
        .run(source_with(&project, core_owned_by_alice()), project.clone())
        .await
        .unwrap();
    let second = pipeline
        .run(source_with(&project, core_owned_by_alice()), project.clone())
        .await
        .unwrap();

    assert_eq!(first.cooccurrence.patterns, second.cooccurrence.patterns);
    assert_eq!(first.temporal.patterns, second.temporal.patterns);
    assert_eq!(first.developer.patterns, second.developer.patterns);
    assert_eq!(
        first.magnitude.magnitude_patterns,
        second.magnitude.magnitude_patterns
    );
    assert_eq!(first.aggregate.insights, second.aggregate.insights);
}

#[tokio::test]
async fn unknown_project_is_empty_not_error() {
    let pipeline = InsightPipeline::new(PulseConfig::default()).unwrap();
    let report = pipeline
        .run(Arc::new(MemoryEventSource::new()), ProjectId::from("nothing"))
        .await
        .unwrap();

    assert!(report.cooccurrence.patterns.is_empty());
    assert!(report.temporal.patterns.is_empty());
    assert!(report.developer.patterns.is_empty());
    assert!(report.magnitude.magnitude_patterns.is_empty());
    assert!(report.magnitude.frequency_patterns.is_empty());
    assert!(report.aggregate.insights.is_empty());
    assert!(!report.is_incomplete());
}

#[tokio::test]
async fn cancelled_run_is_incomplete_not_error() {
    let project = ProjectId::from("core");
    let source = source_with(&project, core_owned_by_alice());
    let pipeline = InsightPipeline::new(PulseConfig::default()).unwrap();

    let budget = Budget::unlimited();
    budget.cancel();
    let report = pipeline
        .run_with_budget(source, project, &budget)
        .await
        .unwrap();

    assert!(report.cooccurrence.metrics.incomplete);
    assert!(report.temporal.metrics.incomplete);
    assert!(report.developer.metrics.incomplete);
    assert!(report.magnitude.metrics.incomplete);
    assert!(report.aggregate.metrics.incomplete);
    assert_eq!(report.aggregate.metrics.notes.len(), 4);
}

#[tokio::test]
async fn budget_spent_mid_run_keeps_partial_results() {
    let project = ProjectId::from("core");
    let source = source_with(&project, core_owned_by_alice());
    let pipeline = InsightPipeline::new(PulseConfig::default()).unwrap();

    // Far fewer work units than any analyzer needs for 50 commits
    let budget = Budget::with_check_limit(10);
    let report = pipeline
        .run_with_budget(source, project, &budget)
        .await
        .unwrap();

    // Temporal needs only three checks and may finish before the rest
    assert!(report.cooccurrence.metrics.incomplete);
    assert!(report.developer.metrics.incomplete);
    assert!(report.magnitude.metrics.incomplete);
    assert!(report.aggregate.metrics.notes.len() >= 3);
    let analyzed = report.cooccurrence.metrics.records_analyzed
        + report.developer.metrics.records_analyzed
        + report.magnitude.metrics.records_analyzed;
    assert!(analyzed <= 10);
}

#[tokio::test]
async fn malformed_json_records_are_skipped() {
    let json = r#"{
        "commits": [
            {"sha": "c1", "author": "alice", "timestamp": 1700000000},
            {"sha": "", "author": "bob", "timestamp": 1700000100},
            {"sha": "c2", "author": "alice", "timestamp": 1700000200, "parentSha": "c1"}
        ],
        "fileChanges": [
            {"commitSha": "c1", "filePath": "a.rs", "changeType": "added", "linesAdded": 10},
            {"commitSha": "c2", "filePath": "a.rs", "changeType": "modified", "linesAdded": 3, "linesRemoved": 1},
            {"commitSha": "c9", "filePath": "b.rs", "changeType": "modified"}
        ]
    }"#;
    let project = ProjectId::from("json");
    let source = MemoryEventSource::new();
    source.insert_json(project.clone(), json).unwrap();

    let pipeline = InsightPipeline::new(PulseConfig::default()).unwrap();
    let report = pipeline.run(Arc::new(source), project).await.unwrap();

    assert_eq!(report.magnitude.metrics.records_skipped, 2);
    assert_eq!(report.magnitude.magnitude_patterns.len(), 1);
    assert_eq!(report.magnitude.magnitude_patterns[0].total_churn, 14);
    // Two commits are below the temporal sample size
    assert!(report.temporal.patterns.is_empty());
    assert!(!report.temporal.metrics.notes.is_empty());
}

#[test]
fn invalid_toml_config_is_rejected() {
    let config = PulseConfig::from_toml(
        r#"
[aggregator.weights]
developer = 0.0
"#,
    )
    .unwrap();
    assert!(matches!(
        InsightPipeline::new(config),
        Err(PulseError::Config(_))
    ));
}

#[test]
fn report_serializes_for_downstream_tools() {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let project = ProjectId::from("core");
    let source = source_with(&project, core_owned_by_alice());
    let pipeline = InsightPipeline::new(PulseConfig::default()).unwrap();
    let report = runtime.block_on(pipeline.run(source, project)).unwrap();

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["project"], "core");
    assert!(json["aggregate"]["insights"].is_array());
    assert!(json["magnitude"]["magnitudePatterns"].is_array());
    assert!(json["developer"]["projectBusFactor"].is_number());
}
