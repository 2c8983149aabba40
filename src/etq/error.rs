use thiserror::Error;

/// Errors surfaced by the deduplication engine.
///
/// Every variant aborts the current operation; nothing in the engine
/// substitutes a partial artifact for a failed step.
#[derive(Debug, Error)]
pub enum DedupError {
    /// A record passed to the normalizer carries no text.
    #[error("record {index} is missing required field `{field}`")]
    MissingField { index: usize, field: &'static str },

    /// Input shape the normalizer does not accept.
    #[error("unsupported input: {0}")]
    UnsupportedInput(String),

    /// The embedding provider failed, or returned the wrong number of rows.
    #[error("embedding provider failed: {0:#}")]
    EmbeddingProvider(anyhow::Error),

    /// Cached or computed vectors don't line up with the requested batch.
    #[error("embedding cache inconsistency: {0}")]
    CacheConsistency(String),

    /// An optional numeric capability was compiled out.
    #[error("dependency unavailable: {0}")]
    DependencyUnavailable(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("cache storage error: {0}")]
    Cache(#[from] rusqlite::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("serialization failed: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, DedupError>;

impl From<toml::ser::Error> for DedupError {
    fn from(value: toml::ser::Error) -> Self {
        Self::Serialization(value.to_string())
    }
}

impl From<tera::Error> for DedupError {
    fn from(value: tera::Error) -> Self {
        Self::Serialization(format!("{value:?}"))
    }
}

/// JSON only arrives as input, so a parse failure is malformed input.
impl From<serde_json::Error> for DedupError {
    fn from(value: serde_json::Error) -> Self {
        Self::UnsupportedInput(format!("malformed JSON: {}", value))
    }
}
