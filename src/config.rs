use std::path::PathBuf;

use url::Url;

pub const DEFAULT_ARCHIVE_URL: &str = "https://archive.org";
pub const DEFAULT_IIIF_URL: &str = "https://iiif.archivelab.org/iiif";

/// Base URLs of the remote archive services.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub archive: String,
    pub iiif: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            archive: DEFAULT_ARCHIVE_URL.to_owned(),
            iiif: DEFAULT_IIIF_URL.to_owned(),
        }
    }
}

impl Endpoints {
    pub fn new(archive: impl Into<String>, iiif: impl Into<String>) -> Self {
        Self {
            archive: archive.into().trim_end_matches('/').to_owned(),
            iiif: iiif.into().trim_end_matches('/').to_owned(),
        }
    }

    pub fn search_url(&self) -> String {
        format!("{}/services/search/v1/scrape", self.archive)
    }

    pub fn metadata_url(&self, identifier: &str) -> String {
        format!("{}/metadata/{identifier}", self.archive)
    }

    pub fn plain_text_url(&self, identifier: &str) -> String {
        format!("{}/download/{identifier}/{identifier}_djvu.txt", self.archive)
    }

    pub fn ocr_export_url(&self, identifier: &str) -> String {
        format!("{}/download/{identifier}/{identifier}_abbyy.gz", self.archive)
    }

    pub fn details_url(&self, identifier: &str) -> String {
        format!("{}/details/{identifier}", self.archive)
    }

    pub fn page_info_url(&self, identifier: &str, page: u32) -> String {
        format!("{}/{identifier}${page}/info.json", self.iiif)
    }

    pub fn manifest_url(&self, identifier: &str) -> String {
        format!("{}/{identifier}/manifest.json", self.iiif)
    }

    pub fn viewer_url(&self, identifier: &str) -> String {
        format!("{}/{identifier}", self.iiif)
    }

    pub fn tile_url(&self, identifier: &str, page: u32, x: i64, y: i64, w: i64, h: i64) -> String {
        format!(
            "{}/{identifier}${page}/{x},{y},{w},{h}/full/0/default.png",
            self.iiif
        )
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub cache_dir: PathBuf,
    pub repo_dir: PathBuf,
    pub remote: String,
    pub branch: String,
    pub push_after_commit: bool,
    pub git_bin: String,
    pub endpoints: Endpoints,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let cache_dir = env_or("ARCHISCRIBE_CACHE", "./cache");
        let repo_dir = env_or("ARCHISCRIBE_REPO", "./corpus");
        let archive = env_or("ARCHISCRIBE_ARCHIVE_URL", DEFAULT_ARCHIVE_URL);
        let iiif = env_or("ARCHISCRIBE_IIIF_URL", DEFAULT_IIIF_URL);
        for (name, raw) in [
            ("ARCHISCRIBE_ARCHIVE_URL", &archive),
            ("ARCHISCRIBE_IIIF_URL", &iiif),
        ] {
            let url = Url::parse(raw).map_err(|err| anyhow::anyhow!("invalid {name}={raw:?}: {err}"))?;
            if url.scheme() != "http" && url.scheme() != "https" {
                anyhow::bail!("{name} must be http/https: {raw}");
            }
        }
        let push_raw = env_or("ARCHISCRIBE_PUSH", "false");
        let push_after_commit = parse_bool(&push_raw)
            .ok_or_else(|| anyhow::anyhow!("invalid ARCHISCRIBE_PUSH={push_raw:?}. expected true or false"))?;

        Ok(Self {
            cache_dir: PathBuf::from(cache_dir),
            repo_dir: PathBuf::from(repo_dir),
            remote: env_or("ARCHISCRIBE_REMOTE", "origin"),
            branch: env_or("ARCHISCRIBE_BRANCH", "master"),
            push_after_commit,
            git_bin: env_or("ARCHISCRIBE_GIT_BIN", "git"),
            endpoints: Endpoints::new(archive, iiif),
        })
    }

    pub fn identifier_cache_path(&self) -> PathBuf {
        self.cache_dir.join("identifiers.json")
    }

    pub fn line_image_dir(&self) -> PathBuf {
        self.cache_dir.join("line_images")
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_owned())
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "" | "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
