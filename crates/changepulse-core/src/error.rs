use std::path::PathBuf;

/// Errors that can occur across the changepulse engine.
///
/// Only [`PulseError::Config`], [`PulseError::Source`] and the file/parse
/// variants ever reach a caller. `InsufficientData`, `MalformedRecord` and
/// `Timeout` are recovered inside the analyzers and surface as
/// [`Metrics`](crate::Metrics) notes.
///
/// # Examples
///
/// ```
/// use changepulse_core::PulseError;
///
/// let err = PulseError::Config("min_support must be within [0, 1]".into());
/// assert!(err.to_string().contains("min_support"));
/// ```
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum PulseError {
    /// Filesystem I/O failure.
    #[error("IO error: {0}")]
    #[diagnostic(code(changepulse::io))]
    Io(#[from] std::io::Error),

    /// Invalid threshold, weight or timeout. Fatal at construction time.
    #[error("configuration error: {0}")]
    #[diagnostic(
        code(changepulse::config),
        help("check the thresholds in your .changepulse.toml")
    )]
    Config(String),

    /// The event source could not supply records for a project.
    #[error("event source error: {0}")]
    #[diagnostic(code(changepulse::source))]
    Source(String),

    /// Fewer records than an analyzer needs to say anything meaningful.
    #[error("insufficient data for {analyzer}: need at least {required} commits, got {actual}")]
    #[diagnostic(code(changepulse::insufficient_data))]
    InsufficientData {
        /// Analyzer that declined to run.
        analyzer: &'static str,
        /// Minimum sample size.
        required: usize,
        /// Commits available.
        actual: usize,
    },

    /// A commit or file-change record missing a required field.
    #[error("malformed record: {0}")]
    #[diagnostic(code(changepulse::malformed_record))]
    MalformedRecord(String),

    /// An analyzer ran out of time and returned partial results.
    #[error("{analyzer} timed out after {elapsed_ms}ms")]
    #[diagnostic(code(changepulse::timeout))]
    Timeout {
        /// Analyzer that was interrupted.
        analyzer: &'static str,
        /// Time spent before giving up.
        elapsed_ms: u64,
    },

    /// JSON serialization / deserialization failure.
    #[error("serialization error: {0}")]
    #[diagnostic(code(changepulse::serialization))]
    Serialization(#[from] serde_json::Error),

    /// TOML deserialization failure.
    #[error("TOML parse error: {0}")]
    #[diagnostic(code(changepulse::toml))]
    Toml(#[from] toml::de::Error),

    /// A required file was not found.
    #[error("file not found: {}", .0.display())]
    #[diagnostic(code(changepulse::file_not_found))]
    FileNotFound(PathBuf),
}
