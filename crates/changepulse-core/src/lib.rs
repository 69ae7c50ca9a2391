//! Core types, configuration, and error handling for changepulse.
//!
//! This crate provides the shared foundation used by the analyzer and
//! insight crates:
//! - [`PulseError`]: unified error type using `thiserror`
//! - [`PulseConfig`]: configuration loaded from `.changepulse.toml`
//! - Records ([`CommitRecord`], [`FileChange`]) and the [`EventSource`] boundary
//! - Pattern types, [`PatternKind`], [`Insight`] and [`Metrics`]
//! - [`Budget`]: cooperative deadline for analyzer runs

mod budget;
mod config;
mod error;
mod source;
mod types;

pub use budget::Budget;
pub use config::{
    AggregatorConfig, CooccurrenceConfig, DeveloperConfig, MagnitudeConfig, PatternWeights,
    PipelineConfig, PulseConfig, TemporalConfig,
};
pub use error::PulseError;
pub use source::{EventSource, MemoryEventSource};
pub use types::{
    ChangeType, CommitRecord, CooccurrencePattern, DeveloperPattern, DeveloperPatternType,
    EventBatch, FileChange, FrequencyPattern, Insight, InsightType, MagnitudePattern, Metrics,
    Pattern, PatternKind, PatternRef, ProjectId, RiskLevel, TemporalPattern, TemporalPatternType,
    Trend,
};

/// A convenience `Result` type for changepulse operations.
pub type Result<T> = std::result::Result<T, PulseError>;
