use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::etq::{embeddings::SentenceEmbeddingsModelType, model::SimilarityThreshold};

/// User settings, read from `dedup.toml`. Every key is optional.
///
/// ```toml
/// model = "AllMiniLmL12V2"
/// threshold = 0.88
/// cache_path = "/tmp/tags.sqlite"
/// use_cache = true
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub model: SentenceEmbeddingsModelType,
    pub threshold: f32,
    /// Overrides the platform cache location.
    pub cache_path: Option<PathBuf>,
    pub use_cache: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            model: SentenceEmbeddingsModelType::default(),
            threshold: SimilarityThreshold::DEFAULT.value(),
            cache_path: None,
            use_cache: true,
        }
    }
}

impl Settings {
    /// Parse settings from TOML text.
    pub fn from_toml(body: &str) -> Result<Self> {
        let settings: Settings = toml::from_str(body).context("parsing settings")?;
        settings.similarity_threshold()?;
        Ok(settings)
    }

    /// Load from `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "no settings file, using defaults");
            return Ok(Self::default());
        }
        let body = std::fs::read_to_string(path)
            .with_context(|| format!("reading settings {}", path.display()))?;
        Self::from_toml(&body).with_context(|| format!("in {}", path.display()))
    }

    /// Load the user's settings file, if any.
    pub fn load_default() -> Result<Self> {
        Self::load(&super::default_settings_file()?)
    }

    pub fn similarity_threshold(&self) -> Result<SimilarityThreshold> {
        Ok(SimilarityThreshold::try_new(self.threshold)?)
    }

    /// The cache file to use, or `None` when caching is off.
    pub fn resolved_cache_path(&self) -> Result<Option<PathBuf>> {
        if !self.use_cache {
            return Ok(None);
        }
        match &self.cache_path {
            Some(p) => Ok(Some(p.clone())),
            None => super::default_embeddings_cache_file().map(Some),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::from_toml("").unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.model.model_name(), "all-MiniLM-L6-v2");
        assert_eq!(settings.threshold, 0.9);
        assert!(settings.use_cache);
    }

    #[test]
    fn test_overrides() {
        let settings = Settings::from_toml(
            "model = \"AllMiniLmL12V2\"\nthreshold = 0.8\ncache_path = \"/tmp/x.sqlite\"\n",
        )
        .unwrap();
        assert_eq!(settings.model, SentenceEmbeddingsModelType::AllMiniLmL12V2);
        assert_eq!(settings.threshold, 0.8);
        assert_eq!(
            settings.resolved_cache_path().unwrap(),
            Some(PathBuf::from("/tmp/x.sqlite"))
        );
    }

    #[test]
    fn test_cache_disabled() {
        let settings = Settings::from_toml("use_cache = false").unwrap();
        assert_eq!(settings.resolved_cache_path().unwrap(), None);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(Settings::from_toml("threshold = 1.5").is_err());
        assert!(Settings::from_toml("colour = \"blue\"").is_err());
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(settings, Settings::default());
    }
}
