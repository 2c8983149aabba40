mod paths;
mod settings;

use anyhow::Result;
use paths::{CacheConfig, UserConfig};
use std::path::{Path, PathBuf};

pub use settings::Settings;

/// File name of the embedding cache inside the embeddings cache directory.
pub const EMBEDDINGS_CACHE_FILE: &str = "tag_embeddings.sqlite";

/// File name of the user settings inside the user config directory.
pub const SETTINGS_FILE: &str = "dedup.toml";

/// Get or create a subdirectory under user config.
/// - [`subpath`]: If Some(P), a subdirectory will be created if necessary
///   and returned. If None, the root config directory will be returned.
pub fn get_or_create_user_config_path<P: AsRef<Path>>(subpath: Option<P>) -> Result<PathBuf> {
    UserConfig::get_config_path(subpath)
}

/// Get or create a subdirectory in the app cache.
/// - [`subpath`]: If Some(P), a subdirectory will be created if necessary
///   and returned. If None, the root cache directory will be returned.
pub fn get_or_create_cache_path<P: AsRef<Path>>(subpath: Option<P>) -> Result<PathBuf> {
    CacheConfig::get_cache_path(subpath)
}

/// Get or create a path inside the embeddings cache.
pub fn get_embeddings_cache_path<P: AsRef<Path>>(subpath: Option<P>) -> Result<PathBuf> {
    let embeddings_subpath = PathBuf::from("embeddings");
    get_or_create_cache_path(Some(
        subpath
            .map(|s| embeddings_subpath.join(s))
            .unwrap_or(embeddings_subpath),
    ))
}

/// The default embedding cache file. Its directory is created; the file
/// itself is created when the cache is opened.
pub fn default_embeddings_cache_file() -> Result<PathBuf> {
    Ok(get_embeddings_cache_path(None::<&Path>)?.join(EMBEDDINGS_CACHE_FILE))
}

/// The user settings file. Its directory is created; the file may not exist.
pub fn default_settings_file() -> Result<PathBuf> {
    Ok(get_or_create_user_config_path(None::<&Path>)?.join(SETTINGS_FILE))
}
