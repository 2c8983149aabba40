use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};
use directories::{ProjectDirs, UserDirs};

const QUALIFIER: &str = "net";
const ORGANIZATION: &str = "crystaldrift";
const APPLICATION: &str = "etiquetas";

struct BaseLocations();
impl BaseLocations {
    fn proj_dirs() -> Option<ProjectDirs> {
        ProjectDirs::from(QUALIFIER, ORGANIZATION, APPLICATION)
    }
    fn user_dirs() -> Option<UserDirs> {
        UserDirs::new()
    }
}

/*
Caches in the platform cache dir (~/.cache/etiquetas, ~/Library/Caches/...).
User settings in ~/.config/etiquetas on every platform.
*/

trait ConfigPath {
    fn get_root_path() -> Result<PathBuf>;

    /// Get a subdir under the root path, creating as necessary.
    fn get_or_create_subdir<P: AsRef<Path>>(subpath: Option<P>) -> Result<PathBuf> {
        let root_path = Self::get_root_path()?;
        let full_path = subpath.map(|p| root_path.join(p)).unwrap_or(root_path);
        std::fs::create_dir_all(&full_path)?;
        Ok(full_path)
    }
}

pub(crate) struct CacheConfig();
impl ConfigPath for CacheConfig {
    fn get_root_path() -> Result<PathBuf> {
        BaseLocations::proj_dirs()
            .map(|d| d.cache_dir().to_owned())
            .ok_or(anyhow!("Unable to determine cache dir!"))
    }
}
impl CacheConfig {
    /// Get or create the path to the cache directory
    pub(crate) fn get_cache_path<P: AsRef<Path>>(subpath: Option<P>) -> Result<PathBuf> {
        Self::get_or_create_subdir(subpath)
    }
}

pub(crate) struct UserConfig();
impl ConfigPath for UserConfig {
    /// The user config directory. XDG layout is forced rather than the
    /// OS-specific location, so settings live in the same place everywhere.
    fn get_root_path() -> Result<PathBuf> {
        let home_dir = BaseLocations::user_dirs()
            .map(|d| d.home_dir().to_path_buf())
            .ok_or_else(|| anyhow!("Failed to get home directory"))?;
        Ok(home_dir.join(".config").join(APPLICATION))
    }
}
impl UserConfig {
    pub(crate) fn get_config_path<P: AsRef<Path>>(subpath: Option<P>) -> Result<PathBuf> {
        Self::get_or_create_subdir(subpath)
    }
}
