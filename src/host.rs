use crate::{catalog::ModuleKind, version};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Seam to the host application's module registry and activation machinery.
/// The panel never inspects host state through any other channel.
pub trait HostApi {
    fn host_version(&self) -> Result<String>;
    /// Slugs of modules of the given kind present on disk.
    fn list_modules(&self, kind: ModuleKind) -> Result<Vec<String>>;
    fn is_installed(&self, kind: ModuleKind, slug: &str) -> Result<bool>;
    /// Widgets have no activation toggle; a present widget counts as active.
    fn is_active(&self, kind: ModuleKind, slug: &str) -> Result<bool>;
    /// Version the host records for the module, `version::NOT_INSTALLED`
    /// when it has none.
    fn module_version(&self, kind: ModuleKind, slug: &str) -> Result<String>;
    fn activate(&self, kind: ModuleKind, slug: &str) -> Result<()>;
    fn deactivate(&self, kind: ModuleKind, slug: &str) -> Result<()>;
}

/// Filesystem-backed host. Layout under the host root:
/// `modules/<kind>/<slug>/module.json` for installed modules,
/// `config/active.json` for the activation list,
/// `config/host.json` for the host version.
pub struct FsHost {
    root: PathBuf,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ActiveList {
    #[serde(default)]
    active: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ModuleMeta {
    version: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct HostMeta {
    version: String,
}

impl FsHost {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn module_dir(&self, kind: ModuleKind, slug: &str) -> PathBuf {
        self.root.join("modules").join(kind.dir_name()).join(slug)
    }

    fn active_list_path(&self) -> PathBuf {
        self.root.join("config").join("active.json")
    }

    fn load_active(&self) -> Result<ActiveList> {
        let path = self.active_list_path();
        if !path.exists() {
            return Ok(ActiveList::default());
        }
        let raw = fs::read_to_string(&path).context("read active.json")?;
        let list: ActiveList = serde_json::from_str(&raw).context("parse active.json")?;
        Ok(list)
    }

    fn save_active(&self, list: &ActiveList) -> Result<()> {
        let dir = self.root.join("config");
        fs::create_dir_all(&dir).context("create host config dir")?;
        let raw = serde_json::to_string_pretty(list).context("serialize active.json")?;
        fs::write(self.active_list_path(), raw).context("write active.json")?;
        Ok(())
    }
}

impl HostApi for FsHost {
    fn host_version(&self) -> Result<String> {
        let path = self.root.join("config").join("host.json");
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("read host metadata {path:?}"))?;
        let meta: HostMeta = serde_json::from_str(&raw).context("parse host.json")?;
        Ok(meta.version)
    }

    fn list_modules(&self, kind: ModuleKind) -> Result<Vec<String>> {
        let dir = self.root.join("modules").join(kind.dir_name());
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut slugs = Vec::new();
        for entry in fs::read_dir(&dir).with_context(|| format!("scan {dir:?}"))? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                slugs.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        slugs.sort();
        Ok(slugs)
    }

    fn is_installed(&self, kind: ModuleKind, slug: &str) -> Result<bool> {
        Ok(self.module_dir(kind, slug).is_dir())
    }

    fn is_active(&self, kind: ModuleKind, slug: &str) -> Result<bool> {
        if !self.is_installed(kind, slug)? {
            return Ok(false);
        }
        if kind == ModuleKind::Widget {
            return Ok(true);
        }
        let list = self.load_active()?;
        Ok(list.active.iter().any(|name| name == slug))
    }

    fn module_version(&self, kind: ModuleKind, slug: &str) -> Result<String> {
        let meta_path = self.module_dir(kind, slug).join("module.json");
        if !meta_path.exists() {
            return Ok(version::NOT_INSTALLED.to_string());
        }
        let raw = fs::read_to_string(&meta_path)
            .with_context(|| format!("read module metadata {meta_path:?}"))?;
        match serde_json::from_str::<ModuleMeta>(&raw) {
            Ok(meta) => Ok(meta.version),
            Err(_) => Ok(version::NOT_INSTALLED.to_string()),
        }
    }

    fn activate(&self, kind: ModuleKind, slug: &str) -> Result<()> {
        if !self.is_installed(kind, slug)? {
            bail!("module {slug} is not installed");
        }
        if kind == ModuleKind::Widget {
            return Ok(());
        }
        let mut list = self.load_active()?;
        if !list.active.iter().any(|name| name == slug) {
            list.active.push(slug.to_string());
            self.save_active(&list)?;
        }
        Ok(())
    }

    fn deactivate(&self, kind: ModuleKind, slug: &str) -> Result<()> {
        if kind == ModuleKind::Widget {
            bail!("widgets have no activation toggle");
        }
        let mut list = self.load_active()?;
        let before = list.active.len();
        list.active.retain(|name| name != slug);
        if list.active.len() != before {
            self.save_active(&list)?;
        }
        Ok(())
    }
}

#[cfg(test)]
pub mod testutil {
    use super::*;

    pub fn install_module(root: &Path, kind: ModuleKind, slug: &str, version: &str) {
        let dir = root.join("modules").join(kind.dir_name()).join(slug);
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("module.json"),
            format!("{{\"version\": \"{version}\"}}"),
        )
        .unwrap();
    }

    pub fn set_host_version(root: &Path, version: &str) {
        let dir = root.join("config");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("host.json"), format!("{{\"version\": \"{version}\"}}")).unwrap();
    }
}
