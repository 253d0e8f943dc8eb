use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::formats::is_line_hash;

pub const EVICTION_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);
pub const MAX_IMAGE_AGE: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Disk cache of line images, keyed by line id (`{identifier}_{hash}`).
#[derive(Debug, Clone)]
pub struct LineImageCache {
    dir: PathBuf,
    client: reqwest::Client,
}

impl LineImageCache {
    pub fn open(dir: impl AsRef<Path>, client: reqwest::Client) -> Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir).map_err(|err| Error::io(dir, err))?;
        let dir = std::path::absolute(dir).map_err(|err| Error::io(dir, err))?;
        Ok(Self { dir, client })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn image_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.png"))
    }

    /// Downloads one image to `{dir}/{id}.png`, replacing any previous file.
    pub async fn cache_line(&self, url: &str, id: &str) -> Result<PathBuf> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Transport(format!("status {status} while getting {url}")));
        }
        let bytes = response.bytes().await?;

        let path = self.image_path(id);
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|err| Error::io(&path, err))?;
        tracing::debug!(id, bytes = bytes.len(), "cached line image");
        Ok(path)
    }

    pub fn get_path(&self, id: &str) -> Option<PathBuf> {
        let path = self.image_path(id);
        path.is_file().then_some(path)
    }

    /// Removes every cached image whose id starts with `prefix`. Stops at the
    /// first failed removal and leaves the remaining matches in place.
    pub fn purge(&self, prefix: &str) -> Result<usize> {
        self.purge_where(|id| id.starts_with(prefix))
    }

    /// Removes the cached line images of `identifier`, i.e. ids of the exact
    /// form `{identifier}_{8 hex}`. Other works sharing the prefix are kept.
    pub fn purge_lines(&self, identifier: &str) -> Result<usize> {
        self.purge_where(|id| {
            id.strip_prefix(identifier)
                .and_then(|rest| rest.strip_prefix('_'))
                .is_some_and(is_line_hash)
        })
    }

    fn purge_where(&self, matches_id: impl Fn(&str) -> bool) -> Result<usize> {
        let mut matches = Vec::new();
        for entry in std::fs::read_dir(&self.dir).map_err(|err| Error::io(&self.dir, err))? {
            let entry = entry.map_err(|err| Error::io(&self.dir, err))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let Some(id) = name.strip_suffix(".png") else {
                continue;
            };
            if matches_id(id) {
                matches.push(entry.path());
            }
        }
        matches.sort();

        for path in &matches {
            std::fs::remove_file(path).map_err(|err| Error::io(path, err))?;
        }
        Ok(matches.len())
    }

    /// Deletes cached files whose modification time is at least `max_age`
    /// before `now`. Returns the number of removed files.
    pub fn evict_older_than(&self, max_age: Duration, now: SystemTime) -> usize {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) => {
                tracing::warn!(dir = %self.dir.display(), ?err, "failed to scan line image cache");
                return 0;
            }
        };

        let mut removed = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            let Ok(modified) = entry.metadata().and_then(|m| m.modified()) else {
                continue;
            };
            let age = now.duration_since(modified).unwrap_or_default();
            if age < max_age {
                continue;
            }
            match std::fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(err) => {
                    tracing::warn!(path = %path.display(), ?err, "failed to evict cached line image")
                }
            }
        }
        removed
    }

    /// Starts the daily eviction loop. Runs for the lifetime of the runtime.
    pub fn spawn_eviction_task(self: &Arc<Self>) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(EVICTION_INTERVAL);
            loop {
                ticker.tick().await;
                let pass = Arc::clone(&cache);
                match tokio::task::spawn_blocking(move || {
                    pass.evict_older_than(MAX_IMAGE_AGE, SystemTime::now())
                })
                .await
                {
                    Ok(removed) => tracing::info!(removed, "line image cache eviction pass"),
                    Err(err) => tracing::warn!(?err, "line image cache eviction pass panicked"),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache_in(dir: &Path) -> anyhow::Result<LineImageCache> {
        Ok(LineImageCache::open(dir, reqwest::Client::new())?)
    }

    #[test]
    fn get_path_only_returns_existing_files() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let cache = cache_in(temp.path())?;
        assert_eq!(cache.get_path("abc_00000000"), None);

        std::fs::write(temp.path().join("abc_00000000.png"), b"png")?;
        let path = cache.get_path("abc_00000000").expect("cached path");
        assert!(path.is_absolute());
        assert!(path.ends_with("abc_00000000.png"));
        Ok(())
    }

    #[test]
    fn purge_removes_only_matching_prefix() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let cache = cache_in(temp.path())?;
        for name in ["abc_1.png", "abc_2.png", "abd_1.png", "abc_notes.txt"] {
            std::fs::write(temp.path().join(name), b"x")?;
        }

        assert_eq!(cache.purge("abc_")?, 2);
        assert!(!temp.path().join("abc_1.png").exists());
        assert!(temp.path().join("abd_1.png").exists());
        assert!(temp.path().join("abc_notes.txt").exists());
        Ok(())
    }

    #[test]
    fn purge_lines_spares_longer_identifiers() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let cache = cache_in(temp.path())?;
        for name in ["vol_0a1b2c3d.png", "vol_2_0a1b2c3d.png", "vol_notahash.png"] {
            std::fs::write(temp.path().join(name), b"x")?;
        }

        assert_eq!(cache.purge_lines("vol")?, 1);
        assert!(!temp.path().join("vol_0a1b2c3d.png").exists());
        assert!(temp.path().join("vol_2_0a1b2c3d.png").exists());
        assert!(temp.path().join("vol_notahash.png").exists());
        Ok(())
    }

    #[test]
    fn eviction_respects_age() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let cache = cache_in(temp.path())?;
        std::fs::write(temp.path().join("old.png"), b"x")?;

        let now = SystemTime::now();
        assert_eq!(cache.evict_older_than(MAX_IMAGE_AGE, now), 0);
        assert!(temp.path().join("old.png").exists());

        let later = now + MAX_IMAGE_AGE + Duration::from_secs(60);
        assert_eq!(cache.evict_older_than(MAX_IMAGE_AGE, later), 1);
        assert!(!temp.path().join("old.png").exists());
        Ok(())
    }
}
