use crate::{
    catalog::{Catalog, ModuleKind},
    feed::FeedClient,
    host::HostApi,
};
use anyhow::{Context, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::{
    collections::{BTreeMap, HashMap},
    fs::{self, File},
    io::{self, Read},
    path::{Path, PathBuf},
};
use tracing::{info, warn};
use walkdir::WalkDir;

#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("unknown module id: {0}")]
    UnknownModule(String),
    #[error("{path}: permission denied")]
    PermissionDenied { path: String },
    #[error("no files declared for module {0}")]
    NoFiles(String),
    #[error("checksum mismatch for {0}")]
    ChecksumMismatch(String),
}

#[derive(Debug, Serialize)]
pub struct ActivationOutcome {
    pub module: String,
    pub kind: ModuleKind,
    pub active: bool,
}

#[derive(Debug, Serialize)]
pub struct InstallOutcome {
    pub module: String,
    pub version: String,
    pub archive: PathBuf,
    pub extracted_files: usize,
    pub checksum_verified: bool,
}

#[derive(Debug, Serialize)]
pub struct RemoveOutcome {
    pub module: String,
    /// Path -> whether deletion succeeded, in deletion order.
    pub removed: BTreeMap<String, bool>,
    pub failures: usize,
}

pub fn activate(catalog: &Catalog, host: &dyn HostApi, id: &str) -> Result<ActivationOutcome> {
    let entry = catalog
        .get(id)
        .ok_or_else(|| ActionError::UnknownModule(id.to_string()))?;
    host.activate(entry.kind, &entry.slug)?;
    info!(module = id, "activated");
    Ok(ActivationOutcome {
        module: entry.id.clone(),
        kind: entry.kind,
        active: true,
    })
}

pub fn deactivate(catalog: &Catalog, host: &dyn HostApi, id: &str) -> Result<ActivationOutcome> {
    let entry = catalog
        .get(id)
        .ok_or_else(|| ActionError::UnknownModule(id.to_string()))?;
    host.deactivate(entry.kind, &entry.slug)?;
    info!(module = id, "deactivated");
    Ok(ActivationOutcome {
        module: entry.id.clone(),
        kind: entry.kind,
        active: false,
    })
}

/// Download the latest archive, verify it when the feed publishes a checksum,
/// and unpack it into the host root. Also serves upgrades; unpacking over an
/// existing tree replaces files in place.
pub fn install(
    catalog: &Catalog,
    host_root: &Path,
    feed: &FeedClient,
    cache_dir: &Path,
    id: &str,
) -> Result<InstallOutcome> {
    let entry = catalog
        .get(id)
        .ok_or_else(|| ActionError::UnknownModule(id.to_string()))?;
    let release = feed
        .fetch_release(&entry.id)
        .with_context(|| format!("no published release for {id}"))?;

    let archive = feed.download_archive(&entry.id, cache_dir)?;
    let mut checksum_verified = false;
    if let Some(sums) = feed.fetch_checksums(&entry.id) {
        let asset_name = format!("{}-latest.zip", entry.id);
        if let Some(expected) = sums.get(&asset_name) {
            verify_sha256(&archive, expected)?;
            checksum_verified = true;
        }
    }

    let extracted_files = extract_zip(&archive, host_root)?;
    info!(
        module = id,
        version = %release.version,
        files = extracted_files,
        "installed"
    );
    Ok(InstallOutcome {
        module: entry.id.clone(),
        version: release.version,
        archive,
        extracted_files,
        checksum_verified,
    })
}

/// Delete the module's declared paths. Every file and directory in those
/// trees must be removable up front; one read-only path aborts the whole
/// removal before anything is touched. Past the precheck, deletion is
/// depth-first and keeps going on failure, recording a per-path result map.
pub fn remove(
    catalog: &Catalog,
    host: &dyn HostApi,
    host_root: &Path,
    id: &str,
) -> Result<RemoveOutcome> {
    let entry = catalog
        .get(id)
        .ok_or_else(|| ActionError::UnknownModule(id.to_string()))?;
    if entry.files.is_empty() {
        return Err(ActionError::NoFiles(id.to_string()).into());
    }

    let roots: Vec<PathBuf> = entry
        .files
        .iter()
        .map(|rel| host_root.join(rel))
        .filter(|path| path.exists())
        .collect();
    if roots.is_empty() {
        return Err(ActionError::NoFiles(id.to_string()).into());
    }

    let mut probe_cache = HashMap::new();
    for root in &roots {
        for (path, removable) in check_removable(root, &mut probe_cache) {
            if !removable {
                return Err(ActionError::PermissionDenied {
                    path: path.display().to_string(),
                }
                .into());
            }
        }
    }

    if entry.kind != ModuleKind::Widget && host.is_active(entry.kind, &entry.slug)? {
        host.deactivate(entry.kind, &entry.slug)?;
    }

    let mut removed = BTreeMap::new();
    let mut failures = 0usize;
    for root in &roots {
        for (path, ok) in delete_tree(root) {
            if !ok {
                failures += 1;
                warn!(path = %path.display(), "failed to delete");
            }
            removed.insert(path.display().to_string(), ok);
        }
    }
    info!(module = id, paths = removed.len(), failures, "removed");
    Ok(RemoveOutcome {
        module: entry.id.clone(),
        removed,
        failures,
    })
}

/// A path is removable when its parent directory is writable. Probed with a
/// temp file per directory, cached across the tree walk.
fn check_removable(root: &Path, cache: &mut HashMap<PathBuf, bool>) -> Vec<(PathBuf, bool)> {
    let mut results = Vec::new();
    for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
        let path = entry.path();
        let parent = match path.parent() {
            Some(parent) => parent.to_path_buf(),
            None => continue,
        };
        let writable = *cache
            .entry(parent.clone())
            .or_insert_with(|| dir_writable(&parent));
        results.push((path.to_path_buf(), writable));
    }
    results
}

fn dir_writable(dir: &Path) -> bool {
    let test_path = dir.join(".moddeck-write-test");
    match File::create(&test_path) {
        Ok(_) => {
            let _ = fs::remove_file(&test_path);
            true
        }
        Err(_) => false,
    }
}

fn delete_tree(root: &Path) -> Vec<(PathBuf, bool)> {
    let mut results = Vec::new();
    for entry in WalkDir::new(root)
        .contents_first(true)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        let ok = if entry.file_type().is_dir() {
            fs::remove_dir(path).is_ok()
        } else {
            fs::remove_file(path).is_ok()
        };
        results.push((path.to_path_buf(), ok));
    }
    results
}

fn extract_zip(path: &Path, dest: &Path) -> Result<usize> {
    let file = fs::File::open(path).context("open zip")?;
    let mut archive = zip::ZipArchive::new(file).context("read zip")?;
    let mut extracted = 0usize;
    for i in 0..archive.len() {
        let mut file = archive.by_index(i).context("zip entry")?;
        let Some(relative) = file.enclosed_name() else {
            continue;
        };
        let out_path = dest.join(relative);
        if file.is_dir() {
            fs::create_dir_all(&out_path).context("create zip dir")?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent).context("create zip dir")?;
        }
        let mut out_file = fs::File::create(&out_path).context("write zip entry")?;
        io::copy(&mut file, &mut out_file).context("extract zip entry")?;
        extracted += 1;
    }
    Ok(extracted)
}

fn verify_sha256(path: &Path, expected: &str) -> Result<()> {
    let mut file = File::open(path).context("open archive for checksum")?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    let actual = format!("{:x}", hasher.finalize());
    if actual != expected.to_lowercase() {
        return Err(ActionError::ChecksumMismatch(path.display().to_string()).into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        catalog::{Catalog, CatalogEntry, ModuleKind},
        host::{testutil::*, FsHost},
    };
    use std::io::Write;

    fn catalog_with(entry: CatalogEntry) -> Catalog {
        Catalog {
            entries: vec![entry],
        }
    }

    fn addon_entry(files: &[&str]) -> CatalogEntry {
        CatalogEntry {
            id: "deck-ssl".to_string(),
            slug: "deckssl".to_string(),
            name: "SSL Add-on".to_string(),
            kind: ModuleKind::Addon,
            prio: 7,
            deprecated: None,
            files: files.iter().map(|f| f.to_string()).collect(),
            requires: Vec::new(),
        }
    }

    #[test]
    fn activate_and_deactivate_through_host() {
        let dir = tempfile::tempdir().unwrap();
        install_module(dir.path(), ModuleKind::Addon, "deckssl", "1.0.0");
        let host = FsHost::new(dir.path());
        let catalog = catalog_with(addon_entry(&[]));

        let outcome = activate(&catalog, &host, "deck-ssl").unwrap();
        assert!(outcome.active);
        assert!(host.is_active(ModuleKind::Addon, "deckssl").unwrap());

        let outcome = deactivate(&catalog, &host, "deck-ssl").unwrap();
        assert!(!outcome.active);
        assert!(!host.is_active(ModuleKind::Addon, "deckssl").unwrap());
    }

    #[test]
    fn unknown_module_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let host = FsHost::new(dir.path());
        let catalog = catalog_with(addon_entry(&[]));
        let err = activate(&catalog, &host, "deck-nope").unwrap_err();
        assert!(err.to_string().contains("unknown module id"));
    }

    #[test]
    fn remove_without_declared_files_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let host = FsHost::new(dir.path());
        let catalog = catalog_with(addon_entry(&[]));
        let err = remove(&catalog, &host, dir.path(), "deck-ssl").unwrap_err();
        assert!(err.to_string().contains("no files declared"));
    }

    #[test]
    fn remove_deletes_depth_first_with_result_map() {
        let dir = tempfile::tempdir().unwrap();
        let host = FsHost::new(dir.path());
        let module_dir = dir.path().join("modules/addons/deckssl");
        fs::create_dir_all(module_dir.join("templates")).unwrap();
        fs::write(module_dir.join("deckssl.rs"), "x").unwrap();
        fs::write(module_dir.join("templates/view.tpl"), "y").unwrap();

        let catalog = catalog_with(addon_entry(&["modules/addons/deckssl"]));
        let outcome = remove(&catalog, &host, dir.path(), "deck-ssl").unwrap();

        assert_eq!(outcome.failures, 0);
        assert_eq!(outcome.removed.len(), 4);
        assert!(outcome.removed.values().all(|ok| *ok));
        assert!(!module_dir.exists());
    }

    #[test]
    fn remove_deactivates_active_module_first() {
        let dir = tempfile::tempdir().unwrap();
        install_module(dir.path(), ModuleKind::Addon, "deckssl", "1.0.0");
        let host = FsHost::new(dir.path());
        host.activate(ModuleKind::Addon, "deckssl").unwrap();

        let catalog = catalog_with(addon_entry(&["modules/addons/deckssl"]));
        remove(&catalog, &host, dir.path(), "deck-ssl").unwrap();
        assert!(!host.is_active(ModuleKind::Addon, "deckssl").unwrap());
    }

    #[cfg(unix)]
    #[test]
    fn readonly_path_aborts_removal_before_deleting_anything() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let host = FsHost::new(dir.path());
        let module_dir = dir.path().join("modules/addons/deckssl");
        let locked = module_dir.join("locked");
        fs::create_dir_all(&locked).unwrap();
        fs::write(module_dir.join("deckssl.rs"), "x").unwrap();
        fs::write(locked.join("keep.dat"), "y").unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o555)).unwrap();

        let catalog = catalog_with(addon_entry(&["modules/addons/deckssl"]));
        let err = remove(&catalog, &host, dir.path(), "deck-ssl").unwrap_err();
        assert!(err.to_string().contains("permission denied"), "{err}");

        // precondition failure must leave the tree untouched
        assert!(module_dir.join("deckssl.rs").exists());
        assert!(locked.join("keep.dat").exists());

        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
    }

    fn zip_bytes(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut cursor);
            let options = zip::write::SimpleFileOptions::default();
            for (name, body) in entries {
                writer.start_file(*name, options).unwrap();
                writer.write_all(body.as_bytes()).unwrap();
            }
            writer.finish().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn install_downloads_and_unpacks_into_host_root() {
        let archive = zip_bytes(&[
            ("modules/addons/deckssl/deckssl.rs", "mod code"),
            ("modules/addons/deckssl/module.json", r#"{"version": "2.0.0"}"#),
        ]);

        let mut server = mockito::Server::new();
        let _release = server
            .mock("GET", "/deck-ssl/release.json")
            .with_body(r#"{"version": "2.0.0", "date": "2024-01-10"}"#)
            .create();
        let _archive = server
            .mock("GET", "/deck-ssl/deck-ssl-latest.zip")
            .with_body(archive.clone())
            .create();
        let _sums = server
            .mock("GET", "/deck-ssl/SHA256SUMS.txt")
            .with_status(404)
            .create();

        let host_root = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        let catalog = catalog_with(addon_entry(&["modules/addons/deckssl"]));
        let feed = FeedClient::new(&server.url());

        let outcome = install(&catalog, host_root.path(), &feed, cache.path(), "deck-ssl").unwrap();
        assert_eq!(outcome.version, "2.0.0");
        assert_eq!(outcome.extracted_files, 2);
        assert!(!outcome.checksum_verified);
        assert!(host_root
            .path()
            .join("modules/addons/deckssl/deckssl.rs")
            .exists());
    }

    #[test]
    fn install_verifies_published_checksum() {
        let archive = zip_bytes(&[("modules/addons/deckssl/deckssl.rs", "mod code")]);
        let digest = {
            let mut hasher = Sha256::new();
            hasher.update(&archive);
            format!("{:x}", hasher.finalize())
        };

        let mut server = mockito::Server::new();
        let _release = server
            .mock("GET", "/deck-ssl/release.json")
            .with_body(r#"{"version": "2.0.0"}"#)
            .create();
        let _archive = server
            .mock("GET", "/deck-ssl/deck-ssl-latest.zip")
            .with_body(archive)
            .create();
        let _sums = server
            .mock("GET", "/deck-ssl/SHA256SUMS.txt")
            .with_body(format!("{digest}  deck-ssl-latest.zip\n"))
            .create();

        let host_root = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        let catalog = catalog_with(addon_entry(&["modules/addons/deckssl"]));
        let feed = FeedClient::new(&server.url());

        let outcome = install(&catalog, host_root.path(), &feed, cache.path(), "deck-ssl").unwrap();
        assert!(outcome.checksum_verified);
    }

    #[test]
    fn install_rejects_corrupt_archive() {
        let archive = zip_bytes(&[("modules/addons/deckssl/deckssl.rs", "mod code")]);

        let mut server = mockito::Server::new();
        let _release = server
            .mock("GET", "/deck-ssl/release.json")
            .with_body(r#"{"version": "2.0.0"}"#)
            .create();
        let _archive = server
            .mock("GET", "/deck-ssl/deck-ssl-latest.zip")
            .with_body(archive)
            .create();
        let _sums = server
            .mock("GET", "/deck-ssl/SHA256SUMS.txt")
            .with_body("0000000000000000000000000000000000000000000000000000000000000000  deck-ssl-latest.zip\n")
            .create();

        let host_root = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        let catalog = catalog_with(addon_entry(&["modules/addons/deckssl"]));
        let feed = FeedClient::new(&server.url());

        let err = install(&catalog, host_root.path(), &feed, cache.path(), "deck-ssl").unwrap_err();
        assert!(err.to_string().contains("checksum mismatch"));
        assert!(!host_root.path().join("modules/addons/deckssl").exists());
    }
}
