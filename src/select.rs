use crate::catalog::Catalog;
use anyhow::{bail, Result};
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Bulk-install selection with dependency gating. Picking an uninstalled
/// module force-selects its direct requirements that are not installed yet;
/// forced entries stay locked until every module that forced them is
/// deselected. Forcing is one level deep: requirements of a forced module are
/// not pulled in unless that module is picked explicitly.
pub struct Selection<'a> {
    catalog: &'a Catalog,
    installed: HashSet<String>,
    picked: BTreeSet<String>,
    /// forced module id -> ids of the picked modules that require it
    forced: BTreeMap<String, BTreeSet<String>>,
}

impl<'a> Selection<'a> {
    pub fn new(catalog: &'a Catalog, installed_ids: impl IntoIterator<Item = String>) -> Self {
        Self {
            catalog,
            installed: installed_ids.into_iter().collect(),
            picked: BTreeSet::new(),
            forced: BTreeMap::new(),
        }
    }

    pub fn select(&mut self, id: &str) -> Result<()> {
        let Some(entry) = self.catalog.get(id) else {
            bail!("unknown module id: {id}");
        };
        if self.installed.contains(id) {
            bail!("module {id} is already installed");
        }
        if !self.picked.insert(id.to_string()) {
            return Ok(());
        }
        for dep in &entry.requires {
            if self.installed.contains(dep) {
                continue;
            }
            self.forced
                .entry(dep.clone())
                .or_default()
                .insert(id.to_string());
        }
        Ok(())
    }

    pub fn deselect(&mut self, id: &str) -> Result<()> {
        if !self.picked.contains(id) {
            if let Some(selectors) = self.forced.get(id) {
                let by = selectors.iter().cloned().collect::<Vec<_>>().join(", ");
                bail!("module {id} is required by {by} and cannot be deselected");
            }
            return Ok(());
        }
        if let Some(selectors) = self.forced.get(id) {
            if !selectors.is_empty() {
                let by = selectors.iter().cloned().collect::<Vec<_>>().join(", ");
                bail!("module {id} is required by {by} and cannot be deselected");
            }
        }

        self.picked.remove(id);
        self.forced.retain(|_, selectors| {
            selectors.remove(id);
            !selectors.is_empty()
        });
        Ok(())
    }

    pub fn is_forced(&self, id: &str) -> bool {
        self.forced.contains_key(id)
    }

    pub fn is_selected(&self, id: &str) -> bool {
        self.picked.contains(id) || self.forced.contains_key(id)
    }

    /// Install order: forced requirements ahead of the modules that need them.
    pub fn plan(&self) -> Vec<String> {
        let mut order = Vec::new();
        let mut seen = HashSet::new();
        for id in &self.picked {
            if let Some(entry) = self.catalog.get(id) {
                for dep in &entry.requires {
                    if self.forced.contains_key(dep) && seen.insert(dep.clone()) {
                        order.push(dep.clone());
                    }
                }
            }
            if seen.insert(id.clone()) {
                order.push(id.clone());
            }
        }
        order
    }
}
