use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use rand::Rng;

use crate::error::{Error, Result};
use crate::formats::IdentifierCandidate;

/// Per-year pools of candidate identifiers, persisted as a single JSON object
/// that is rewritten on every mutation.
///
/// Not internally synchronized: one logical owner at a time.
#[derive(Debug)]
pub struct IdentifierCache {
    path: PathBuf,
    entries: BTreeMap<i32, Vec<IdentifierCandidate>>,
}

impl IdentifierCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: BTreeMap::new(),
        }
    }

    /// Loads the pools from `path`. A missing file yields an empty cache.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Self::new(path)),
            Err(err) => return Err(Error::io(&path, err)),
        };
        let entries = serde_json::from_slice(&bytes).map_err(|err| {
            Error::MalformedData(format!("identifier cache {}: {err}", path.display()))
        })?;
        Ok(Self { path, entries })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn add(&mut self, identifier: impl Into<String>, page_count: u32, year: i32) {
        self.entries
            .entry(year)
            .or_default()
            .push(IdentifierCandidate {
                identifier: identifier.into(),
                page_count,
            });
    }

    pub fn remaining(&self, year: i32) -> usize {
        self.entries.get(&year).map_or(0, Vec::len)
    }

    pub fn years(&self) -> impl Iterator<Item = i32> + '_ {
        self.entries.keys().copied()
    }

    pub fn random_pick(&mut self, year: i32) -> Result<IdentifierCandidate> {
        self.random_pick_with(year, &mut rand::thread_rng())
    }

    /// Removes a uniformly chosen candidate from the year's pool and persists
    /// the mutated pools before returning it. A failed write leaves the pool
    /// as it was.
    pub fn random_pick_with<R: Rng + ?Sized>(
        &mut self,
        year: i32,
        rng: &mut R,
    ) -> Result<IdentifierCandidate> {
        let pool = match self.entries.get_mut(&year) {
            Some(pool) if !pool.is_empty() => pool,
            _ => return Err(Error::NotFound(format!("no candidates left for year {year}"))),
        };
        let idx = rng.gen_range(0..pool.len());
        let entry = pool.remove(idx);
        if let Err(err) = self.write() {
            self.entries.entry(year).or_default().insert(idx, entry);
            return Err(err);
        }
        Ok(entry)
    }

    pub fn write(&self) -> Result<()> {
        write_json_atomic(&self.path, &self.entries)
    }
}

pub(crate) fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent).map_err(|err| Error::io(parent, err))?;

    let tmp_path = path.with_extension(format!("tmp.{}", uuid::Uuid::new_v4().simple()));
    let data = serde_json::to_vec(value)?;
    std::fs::write(&tmp_path, &data).map_err(|err| Error::io(&tmp_path, err))?;
    std::fs::rename(&tmp_path, path).map_err(|err| Error::io(path, err))?;
    Ok(())
}
