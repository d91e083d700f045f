use anyhow::{Context, Result};
use serde::Deserialize;
use std::{
    collections::HashMap,
    fs::File,
    io,
    path::{Path, PathBuf},
    time::Duration,
};
use time::{format_description::FormatItem, macros::format_description, Date};
use tracing::debug;

const USER_AGENT: &str = "moddeck";
const DATE_FORMAT: &[FormatItem<'static>] = format_description!("[year]-[month]-[day]");

/// Anything that can answer "what is the latest published version of this
/// module". The reconciler only needs this slice of the feed client.
pub trait ReleaseSource {
    fn latest(&self, id: &str) -> Option<Release>;
}

/// Client for the published release feed. Every known module id has a
/// `release.json` under `{feed_base}/{id}/` and a `{id}-latest.zip` next to it.
pub struct FeedClient {
    agent: ureq::Agent,
    feed_base: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Release {
    pub version: String,
    pub date: Option<Date>,
}

#[derive(Debug, Deserialize)]
struct RawRelease {
    version: String,
    #[serde(default)]
    date: Option<String>,
}

impl FeedClient {
    pub fn new(feed_base: &str) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(5))
            .timeout_read(Duration::from_secs(10))
            .timeout_write(Duration::from_secs(10))
            .build();
        Self {
            agent,
            feed_base: feed_base.trim_end_matches('/').to_string(),
        }
    }

    pub fn release_url(&self, id: &str) -> String {
        format!("{}/{id}/release.json", self.feed_base)
    }

    pub fn download_url(&self, id: &str) -> String {
        format!("{}/{id}/{id}-latest.zip", self.feed_base)
    }

    pub fn checksums_url(&self, id: &str) -> String {
        format!("{}/{id}/SHA256SUMS.txt", self.feed_base)
    }

    /// Latest published release for the module, or `None` when the feed has
    /// no usable answer (transport error, 404, bad body). Callers skip the
    /// module in that case rather than failing the whole panel.
    pub fn fetch_release(&self, id: &str) -> Option<Release> {
        let url = self.release_url(id);
        let response = match self.agent.get(&url).set("User-Agent", USER_AGENT).call() {
            Ok(response) => response,
            Err(err) => {
                debug!(module = id, error = %err, "release feed fetch failed");
                return None;
            }
        };
        let raw: RawRelease = match response.into_json() {
            Ok(raw) => raw,
            Err(err) => {
                debug!(module = id, error = %err, "release feed body unreadable");
                return None;
            }
        };
        let date = raw
            .date
            .as_deref()
            .and_then(|value| Date::parse(value, DATE_FORMAT).ok());
        Some(Release {
            version: raw.version,
            date,
        })
    }

    /// Published SHA-256 sums for the module's assets, keyed by file name.
    /// Absent checksums are not an error; verification is skipped then.
    pub fn fetch_checksums(&self, id: &str) -> Option<HashMap<String, String>> {
        let url = self.checksums_url(id);
        let response = self
            .agent
            .get(&url)
            .set("User-Agent", USER_AGENT)
            .call()
            .ok()?;
        let body = response.into_string().ok()?;
        let mut map = HashMap::new();
        for line in body.lines() {
            let mut parts = line.split_whitespace();
            let hash = match parts.next() {
                Some(value) => value.trim(),
                None => continue,
            };
            let name = match parts.next() {
                Some(value) => value.trim(),
                None => continue,
            };
            map.insert(name.to_string(), hash.to_lowercase());
        }
        Some(map)
    }

    /// Download the module's latest zip into `dir`, returning the local path.
    pub fn download_archive(&self, id: &str, dir: &Path) -> Result<PathBuf> {
        let url = self.download_url(id);
        let response = self
            .agent
            .get(&url)
            .set("User-Agent", USER_AGENT)
            .call()
            .with_context(|| format!("download {url}"))?;
        let path = dir.join(format!("{id}-latest.zip"));
        let mut reader = response.into_reader();
        let mut file = File::create(&path).context("create archive file")?;
        io::copy(&mut reader, &mut file).context("write archive file")?;
        Ok(path)
    }
}

impl ReleaseSource for FeedClient {
    fn latest(&self, id: &str) -> Option<Release> {
        self.fetch_release(id)
    }
}
