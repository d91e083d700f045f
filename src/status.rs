use crate::{
    catalog::{Catalog, CatalogEntry, Deprecation, ModuleKind},
    feed::ReleaseSource,
    host::HostApi,
    version,
};
use anyhow::Result;
use serde::Serialize;
use std::{
    cmp::Ordering,
    collections::{HashMap, HashSet},
};
use tracing::debug;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Tab {
    Installed,
    NotActiveOrInstalled,
    Deprecated,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DeprecationNotice {
    pub case: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notice: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replacement: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Links {
    pub download: String,
    pub documentation: String,
}

/// One row of the panel: catalog metadata merged with live host state and the
/// latest published version.
#[derive(Debug, Clone, Serialize)]
pub struct ModuleStatus {
    pub id: String,
    pub slug: String,
    pub name: String,
    pub kind: ModuleKind,
    pub prio: u32,
    pub installed: bool,
    pub active: bool,
    pub version_used: String,
    pub version_latest: String,
    pub update_available: bool,
    pub tab: Tab,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deprecation: Option<DeprecationNotice>,
    pub links: Links,
    pub missing_requires: Vec<String>,
}

#[derive(Debug, Default, Serialize)]
pub struct Panel {
    pub host_version: String,
    pub modules: Vec<ModuleStatus>,
    /// Catalog ids dropped because the feed had no usable release for them.
    pub skipped: Vec<String>,
}

impl Panel {
    pub fn tab(&self, tab: Tab) -> Vec<&ModuleStatus> {
        self.modules
            .iter()
            .filter(|status| status.tab == tab)
            .collect()
    }

    pub fn find(&self, id: &str) -> Option<&ModuleStatus> {
        self.modules.iter().find(|status| status.id == id)
    }
}

/// Classification precedence, first match wins:
/// unconditional deprecation, product deprecation, host-version deprecation
/// while the host is still below the threshold, then the active/installed
/// split. A host-version policy the host has outgrown falls through.
pub fn classify(
    entry: &CatalogEntry,
    active: bool,
    version_used: &str,
    host_version: &str,
) -> (Tab, Option<DeprecationNotice>) {
    match &entry.deprecated {
        Some(Deprecation::Default) => {
            return (
                Tab::Deprecated,
                Some(DeprecationNotice {
                    case: "default",
                    since: None,
                    notice: None,
                    url: None,
                    replacement: None,
                }),
            );
        }
        Some(Deprecation::Product {
            notice,
            url,
            replacement,
        }) => {
            return (
                Tab::Deprecated,
                Some(DeprecationNotice {
                    case: "product",
                    since: None,
                    notice: Some(notice.clone()),
                    url: Some(url.clone()),
                    replacement: replacement.clone(),
                }),
            );
        }
        Some(Deprecation::HostVersion {
            since,
            notice,
            url,
            replacement,
        }) => {
            if version::compare(host_version, since) == Ordering::Less {
                return (
                    Tab::Deprecated,
                    Some(DeprecationNotice {
                        case: "host_version",
                        since: Some(since.clone()),
                        notice: Some(notice.clone()),
                        url: Some(url.clone()),
                        replacement: replacement.clone(),
                    }),
                );
            }
        }
        None => {}
    }

    if !active || version::is_sentinel(version_used) {
        (Tab::NotActiveOrInstalled, None)
    } else {
        (Tab::Installed, None)
    }
}

pub struct Reconciler<'a> {
    catalog: &'a Catalog,
    host: &'a dyn HostApi,
    releases: &'a dyn ReleaseSource,
    feed_base: String,
    docs_base: String,
}

impl<'a> Reconciler<'a> {
    pub fn new(
        catalog: &'a Catalog,
        host: &'a dyn HostApi,
        releases: &'a dyn ReleaseSource,
        feed_base: &str,
        docs_base: &str,
    ) -> Self {
        Self {
            catalog,
            host,
            releases,
            feed_base: feed_base.trim_end_matches('/').to_string(),
            docs_base: docs_base.trim_end_matches('/').to_string(),
        }
    }

    pub fn reconcile(&self) -> Result<Panel> {
        let host_version = self.host.host_version()?;
        let mut panel = Panel {
            host_version: host_version.clone(),
            ..Panel::default()
        };

        // one list scan per kind, the way the host enumerates its own modules
        let mut present: HashMap<ModuleKind, HashSet<String>> = HashMap::new();
        for kind in ModuleKind::all() {
            present.insert(kind, self.host.list_modules(kind)?.into_iter().collect());
        }

        for entry in self.catalog.ordered() {
            let Some(release) = self.releases.latest(&entry.id) else {
                debug!(module = %entry.id, "no usable release, skipping");
                panel.skipped.push(entry.id.clone());
                continue;
            };

            let installed = present[&entry.kind].contains(&entry.slug);
            let active = self.host.is_active(entry.kind, &entry.slug)?;
            let version_used = if installed {
                self.host.module_version(entry.kind, &entry.slug)?
            } else {
                version::NOT_INSTALLED.to_string()
            };

            let (tab, deprecation) = classify(entry, active, &version_used, &host_version);
            let update_available =
                tab == Tab::Installed && version::is_newer(&release.version, &version_used);
            let missing_requires = self.missing_requires(entry, &present);

            panel.modules.push(ModuleStatus {
                id: entry.id.clone(),
                slug: entry.slug.clone(),
                name: entry.name.clone(),
                kind: entry.kind,
                prio: entry.prio,
                installed,
                active,
                version_used,
                version_latest: release.version,
                update_available,
                tab,
                deprecation,
                links: Links {
                    download: format!("{}/{id}/{id}-latest.zip", self.feed_base, id = entry.id),
                    documentation: format!("{}/{}", self.docs_base, entry.id),
                },
                missing_requires,
            });
        }

        Ok(panel)
    }

    fn missing_requires(
        &self,
        entry: &CatalogEntry,
        present: &HashMap<ModuleKind, HashSet<String>>,
    ) -> Vec<String> {
        let mut missing = Vec::new();
        for dep in &entry.requires {
            let Some(dep_entry) = self.catalog.get(dep) else {
                missing.push(dep.clone());
                continue;
            };
            if !present[&dep_entry.kind].contains(&dep_entry.slug) {
                missing.push(dep.clone());
            }
        }
        missing
    }
}
