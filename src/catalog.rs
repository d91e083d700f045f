use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ModuleKind {
    Registrar,
    Addon,
    Server,
    Widget,
}

impl ModuleKind {
    pub fn dir_name(self) -> &'static str {
        match self {
            ModuleKind::Registrar => "registrars",
            ModuleKind::Addon => "addons",
            ModuleKind::Server => "servers",
            ModuleKind::Widget => "widgets",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ModuleKind::Registrar => "registrar",
            ModuleKind::Addon => "addon",
            ModuleKind::Server => "server",
            ModuleKind::Widget => "widget",
        }
    }

    pub fn all() -> [ModuleKind; 4] {
        [
            ModuleKind::Registrar,
            ModuleKind::Addon,
            ModuleKind::Server,
            ModuleKind::Widget,
        ]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "case", rename_all = "snake_case")]
pub enum Deprecation {
    /// Deprecated outright, no further context.
    Default,
    /// The product behind the module was discontinued. Always surfaced.
    Product {
        notice: String,
        url: String,
        #[serde(default)]
        replacement: Option<String>,
    },
    /// Superseded by host functionality from `since` onward. Surfaced only
    /// while the running host is still below that version.
    HostVersion {
        since: String,
        notice: String,
        url: String,
        #[serde(default)]
        replacement: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: String,
    pub slug: String,
    pub name: String,
    pub kind: ModuleKind,
    pub prio: u32,
    #[serde(default)]
    pub deprecated: Option<Deprecation>,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub requires: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Catalog {
    pub entries: Vec<CatalogEntry>,
}

impl Catalog {
    pub fn load_or_create(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join("catalog.json");
        if path.exists() {
            let raw = fs::read_to_string(&path).context("read catalog.json")?;
            let catalog: Catalog = serde_json::from_str(&raw).context("parse catalog.json")?;
            return Ok(catalog);
        }

        let catalog = Catalog::builtin();
        catalog.save(data_dir)?;
        Ok(catalog)
    }

    pub fn save(&self, data_dir: &Path) -> Result<()> {
        let path = data_dir.join("catalog.json");
        let raw = serde_json::to_string_pretty(self).context("serialize catalog.json")?;
        fs::write(path, raw).context("write catalog.json")?;
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&CatalogEntry> {
        self.entries.iter().find(|entry| entry.id == id)
    }

    pub fn get_by_slug(&self, slug: &str) -> Option<&CatalogEntry> {
        self.entries.iter().find(|entry| entry.slug == slug)
    }

    /// Entries ordered the way the panel lists them: highest prio first,
    /// catalog order for ties.
    pub fn ordered(&self) -> Vec<&CatalogEntry> {
        let mut ordered: Vec<&CatalogEntry> = self.entries.iter().collect();
        ordered.sort_by(|a, b| b.prio.cmp(&a.prio));
        ordered
    }

    pub fn builtin() -> Self {
        let entries = vec![
            CatalogEntry {
                id: "deck-registrar".to_string(),
                slug: "deckreg".to_string(),
                name: "Registrar Module".to_string(),
                kind: ModuleKind::Registrar,
                prio: 10,
                deprecated: None,
                files: vec!["modules/registrars/deckreg".to_string()],
                requires: Vec::new(),
            },
            CatalogEntry {
                id: "deck-domainchecker".to_string(),
                slug: "deckdomaincheck".to_string(),
                name: "Domain Checker Add-on".to_string(),
                kind: ModuleKind::Addon,
                prio: 9,
                deprecated: None,
                files: vec!["modules/addons/deckdomaincheck".to_string()],
                requires: vec!["deck-registrar".to_string()],
            },
            CatalogEntry {
                id: "deck-backorder".to_string(),
                slug: "deckbackorder".to_string(),
                name: "Backorder Add-on".to_string(),
                kind: ModuleKind::Addon,
                prio: 8,
                deprecated: None,
                files: vec!["modules/addons/deckbackorder".to_string()],
                requires: vec!["deck-registrar".to_string()],
            },
            CatalogEntry {
                id: "deck-ssl".to_string(),
                slug: "deckssl".to_string(),
                name: "SSL Add-on".to_string(),
                kind: ModuleKind::Addon,
                prio: 7,
                deprecated: Some(Deprecation::Default),
                files: vec!["modules/addons/deckssl".to_string()],
                requires: vec!["deck-registrar".to_string()],
            },
            CatalogEntry {
                id: "deck-premiumdns".to_string(),
                slug: "deckpremiumdns".to_string(),
                name: "Premium DNS Server".to_string(),
                kind: ModuleKind::Server,
                prio: 6,
                deprecated: Some(Deprecation::Product {
                    notice: "Product stopped. Existing zones and their records stay \
                             manageable; ordering new ones will fail."
                        .to_string(),
                    url: "https://example.com/blog/premium-dns-sunset".to_string(),
                    replacement: Some("deck-dns".to_string()),
                }),
                files: vec!["modules/servers/deckpremiumdns".to_string()],
                requires: Vec::new(),
            },
            CatalogEntry {
                id: "deck-pricingimporter".to_string(),
                slug: "deckpricing".to_string(),
                name: "Price Importer Add-on".to_string(),
                kind: ModuleKind::Addon,
                prio: 5,
                deprecated: Some(Deprecation::HostVersion {
                    since: "7.10".to_string(),
                    notice: "No longer maintained; the host ships its own TLD pricing \
                             sync from this version on."
                        .to_string(),
                    url: "https://example.com/docs/tld-sync".to_string(),
                    replacement: Some("deck-importer".to_string()),
                }),
                files: vec!["modules/addons/deckpricing".to_string()],
                requires: vec!["deck-registrar".to_string()],
            },
            CatalogEntry {
                id: "deck-domainimport".to_string(),
                slug: "deckdomainimport".to_string(),
                name: "Domain Importer Add-on".to_string(),
                kind: ModuleKind::Addon,
                prio: 4,
                deprecated: Some(Deprecation::Default),
                files: vec!["modules/addons/deckdomainimport".to_string()],
                requires: vec!["deck-registrar".to_string()],
            },
            CatalogEntry {
                id: "deck-importer".to_string(),
                slug: "deckimporter".to_string(),
                name: "Importer Add-on".to_string(),
                kind: ModuleKind::Addon,
                prio: 3,
                deprecated: None,
                files: vec!["modules/addons/deckimporter".to_string()],
                requires: vec!["deck-registrar".to_string()],
            },
            CatalogEntry {
                id: "deck-widget-account".to_string(),
                slug: "deck_account".to_string(),
                name: "Account Widget".to_string(),
                kind: ModuleKind::Widget,
                prio: 2,
                deprecated: None,
                files: vec!["modules/widgets/deck_account".to_string()],
                requires: vec!["deck-registrar".to_string()],
            },
            CatalogEntry {
                id: "deck-widget-monitoring".to_string(),
                slug: "deck_monitoring".to_string(),
                name: "Monitoring Widget".to_string(),
                kind: ModuleKind::Widget,
                prio: 1,
                deprecated: None,
                files: vec!["modules/widgets/deck_monitoring".to_string()],
                requires: vec!["deck-registrar".to_string()],
            },
            CatalogEntry {
                id: "deck-widget-modules".to_string(),
                slug: "deck_modules".to_string(),
                name: "Modules Widget".to_string(),
                kind: ModuleKind::Widget,
                prio: 0,
                deprecated: None,
                files: vec!["modules/widgets/deck_modules".to_string()],
                requires: vec!["deck-registrar".to_string()],
            },
        ];
        Catalog { entries }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_ids_are_unique() {
        let catalog = Catalog::builtin();
        let mut ids: Vec<&str> = catalog.entries.iter().map(|e| e.id.as_str()).collect();
        ids.sort_unstable();
        let before = ids.len();
        ids.dedup();
        assert_eq!(before, ids.len());
    }

    #[test]
    fn builtin_requirements_resolve() {
        let catalog = Catalog::builtin();
        for entry in &catalog.entries {
            for dep in &entry.requires {
                assert!(catalog.get(dep).is_some(), "{} requires unknown {dep}", entry.id);
            }
        }
    }

    #[test]
    fn looks_up_entries_by_id_and_slug() {
        let catalog = Catalog::builtin();
        let by_id = catalog.get("deck-ssl").unwrap();
        let by_slug = catalog.get_by_slug("deckssl").unwrap();
        assert_eq!(by_id.id, by_slug.id);
        assert!(catalog.get("deckssl").is_none());
        assert!(catalog.get_by_slug("deck-ssl").is_none());
    }

    #[test]
    fn ordered_by_descending_prio() {
        let catalog = Catalog::builtin();
        let ordered = catalog.ordered();
        for pair in ordered.windows(2) {
            assert!(pair[0].prio >= pair[1].prio);
        }
    }

    #[test]
    fn round_trips_through_json_override() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::builtin();
        catalog.save(dir.path()).unwrap();
        let loaded = Catalog::load_or_create(dir.path()).unwrap();
        assert_eq!(loaded.entries.len(), catalog.entries.len());
        assert_eq!(
            loaded.get("deck-ssl").unwrap().deprecated,
            Some(Deprecation::Default)
        );
    }
}
