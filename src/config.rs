use anyhow::{Context, Result};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf};

pub const DEFAULT_FEED_BASE: &str = "https://releases.example.com/modules";
pub const DEFAULT_DOCS_BASE: &str = "https://docs.example.com/modules";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub host_root: PathBuf,
    #[serde(default = "default_feed_base")]
    pub feed_base: String,
    #[serde(default = "default_docs_base")]
    pub docs_base: String,
    #[serde(default = "default_true")]
    pub confirm_remove: bool,
    /// Where catalog.json and other app state live. Unset means the
    /// platform-local data dir.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

impl AppConfig {
    pub fn load_or_create() -> Result<Self> {
        let base_dir = base_data_dir()?;
        fs::create_dir_all(&base_dir).context("create app data dir")?;
        let path = base_dir.join("config.json");
        if path.exists() {
            let raw = fs::read_to_string(&path).context("read app config")?;
            let config: AppConfig = serde_json::from_str(&raw).context("parse app config")?;
            return Ok(config);
        }

        let config = AppConfig {
            host_root: PathBuf::new(),
            feed_base: default_feed_base(),
            docs_base: default_docs_base(),
            confirm_remove: true,
            data_dir: None,
        };
        config.save()?;
        Ok(config)
    }

    /// Effective data dir: the configured override when set, the
    /// platform-local default otherwise.
    pub fn data_dir(&self) -> Result<PathBuf> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => base_data_dir(),
        }
    }

    pub fn save(&self) -> Result<()> {
        let base_dir = base_data_dir()?;
        fs::create_dir_all(&base_dir).context("create app data dir")?;
        let path = base_dir.join("config.json");
        let raw = serde_json::to_string_pretty(self).context("serialize app config")?;
        fs::write(path, raw).context("write app config")?;
        Ok(())
    }
}

pub fn base_data_dir() -> Result<PathBuf> {
    let base = BaseDirs::new().context("resolve home dir")?;
    Ok(base.data_local_dir().join("moddeck"))
}

pub fn download_cache_dir() -> Result<PathBuf> {
    let base = BaseDirs::new().context("resolve cache dir")?;
    let dir = base.cache_dir().join("moddeck").join("downloads");
    fs::create_dir_all(&dir).context("create download cache dir")?;
    Ok(dir)
}

fn default_feed_base() -> String {
    DEFAULT_FEED_BASE.to_string()
}

fn default_docs_base() -> String {
    DEFAULT_DOCS_BASE.to_string()
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_dir_override_wins_over_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig {
            host_root: PathBuf::from("/srv/host"),
            feed_base: default_feed_base(),
            docs_base: default_docs_base(),
            confirm_remove: true,
            data_dir: Some(dir.path().to_path_buf()),
        };
        assert_eq!(config.data_dir().unwrap(), dir.path());
    }

    #[test]
    fn missing_override_falls_back_to_platform_dir() {
        let config: AppConfig = serde_json::from_str(r#"{"host_root": "/srv/host"}"#).unwrap();
        assert!(config.data_dir.is_none());
        let resolved = config.data_dir().unwrap();
        assert!(resolved.ends_with("moddeck"));
    }
}
