//! Versioned document store backed by a version-controlled corpus working
//! copy.
//!
//! Layout of the working copy:
//!
//! ```text
//! README.md                                   corpus summary
//! transcriptions/{year}/{id}.json             document metadata
//! transcriptions/{year}/{id}_{hash}.png       line image
//! transcriptions/{year}/{id}_{hash}.txt       line transcription + "\n"
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use regex::Regex;

use crate::config::Endpoints;
use crate::error::{Error, Result};
use crate::formats::{
    Document, LineDisposition, OcrLine, StoredDocument, StoredLine, TranscriptionTask, line_hash,
};
use crate::line_cache::LineImageCache;
use crate::vcs::{FileStatus, VersionControl};

const TRANSCRIPTIONS_DIR: &str = "transcriptions";
const SUMMARY_FILE: &str = "README.md";

static ARTIFACT_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.+)_([0-9a-f]{8})\.(png|txt)$").expect("valid artifact pattern")
});

pub struct DocumentStore {
    base: PathBuf,
    vcs: Arc<dyn VersionControl>,
    line_cache: Arc<LineImageCache>,
    endpoints: Endpoints,
    remote: String,
    branch: String,
    push_after_commit: bool,
}

impl DocumentStore {
    pub fn new(
        vcs: Arc<dyn VersionControl>,
        line_cache: Arc<LineImageCache>,
        endpoints: Endpoints,
    ) -> Self {
        Self {
            base: vcs.workdir().to_path_buf(),
            vcs,
            line_cache,
            endpoints,
            remote: "origin".to_owned(),
            branch: "master".to_owned(),
            push_after_commit: false,
        }
    }

    pub fn with_remote(mut self, remote: impl Into<String>, branch: impl Into<String>) -> Self {
        self.remote = remote.into();
        self.branch = branch.into();
        self
    }

    pub fn with_push_after_commit(mut self, push: bool) -> Self {
        self.push_after_commit = push;
        self
    }

    pub fn base_dir(&self) -> &Path {
        &self.base
    }

    fn transcriptions_dir(&self) -> PathBuf {
        self.base.join(TRANSCRIPTIONS_DIR)
    }

    fn year_dir(&self, year: i32) -> PathBuf {
        self.transcriptions_dir().join(year.to_string())
    }

    fn year_dirs(&self) -> Result<Vec<PathBuf>> {
        let root = self.transcriptions_dir();
        let entries = match std::fs::read_dir(&root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(Error::io(&root, err)),
        };
        let mut dirs = Vec::new();
        for entry in entries {
            let path = entry.map_err(|err| Error::io(&root, err))?.path();
            if path.is_dir() {
                dirs.push(path);
            }
        }
        dirs.sort();
        Ok(dirs)
    }

    fn find_meta_path(&self, identifier: &str) -> Result<Option<PathBuf>> {
        let file_name = format!("{identifier}.json");
        for dir in self.year_dirs()? {
            let candidate = dir.join(&file_name);
            if candidate.is_file() {
                return Ok(Some(candidate));
            }
        }
        Ok(None)
    }

    /// Loads one document with its transcriptions and its history.
    pub async fn details(&self, identifier: &str) -> Result<Document> {
        validate_identifier(identifier)?;
        let meta_path = self
            .find_meta_path(identifier)?
            .ok_or_else(|| Error::NotFound(format!("document {identifier}")))?;
        let stored = read_stored(&meta_path)?;
        let dir = meta_path
            .parent()
            .ok_or_else(|| Error::NotFound(format!("parent of {}", meta_path.display())))?;

        let mut artifacts = vec![meta_path.clone()];
        let mut lines = Vec::with_capacity(stored.lines.len());
        for line in stored.lines.iter().cloned() {
            let line_id = format!("{}_{}", stored.identifier, line_hash(&line.image_url));
            let text_path = dir.join(format!("{line_id}.txt"));
            let text = match std::fs::read_to_string(&text_path) {
                Ok(text) => text,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    return Err(Error::NotFound(format!(
                        "transcription {}",
                        text_path.display()
                    )));
                }
                Err(err) => return Err(Error::io(&text_path, err)),
            };
            let text = text.strip_suffix('\n').unwrap_or(&text).to_owned();
            let image_path = dir.join(format!("{line_id}.png"));
            if image_path.is_file() {
                artifacts.push(image_path);
            }
            artifacts.push(text_path);
            lines.push(line.into_line(Some(text)));
        }

        let history = self.vcs.log(&artifacts).await?;
        Ok(Document {
            identifier: stored.identifier,
            title: stored.title,
            year: stored.year,
            manifest_url: stored.manifest_url,
            num_lines: Some(lines.len()),
            lines,
            history,
        })
    }

    /// All stored documents with their line counts, without lines or
    /// history, ordered by year and identifier.
    pub fn list(&self) -> Result<Vec<Document>> {
        let mut documents = Vec::new();
        for dir in self.year_dirs()? {
            let entries = std::fs::read_dir(&dir).map_err(|err| Error::io(&dir, err))?;
            for entry in entries {
                let path = entry.map_err(|err| Error::io(&dir, err))?.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                let stored = match read_stored(&path) {
                    Ok(stored) => stored,
                    Err(err) => {
                        tracing::warn!(path = %path.display(), ?err, "skipping unreadable document");
                        continue;
                    }
                };
                documents.push(Document {
                    num_lines: Some(stored.lines.len()),
                    identifier: stored.identifier,
                    title: stored.title,
                    year: stored.year,
                    manifest_url: stored.manifest_url,
                    lines: Vec::new(),
                    history: Vec::new(),
                });
            }
        }
        documents.sort_by(|a, b| a.year.cmp(&b.year).then_with(|| a.identifier.cmp(&b.identifier)));
        Ok(documents)
    }

    /// Persists a completed transcription task as a single commit and returns
    /// the stored document. Must not run concurrently with another save on
    /// the same working copy.
    ///
    /// A non-empty `comment` is appended to the commit message after a blank
    /// line, so git records it as the body and the subject line stays fixed.
    pub async fn save(&self, task: TranscriptionTask) -> Result<Document> {
        let TranscriptionTask {
            document,
            author,
            email,
            comment,
        } = task;
        let identifier = document.identifier.as_str();
        validate_identifier(identifier)?;

        self.vcs.clean_up().await?;
        self.vcs.pull(&self.remote, &self.branch, true).await?;

        let year_dir = self.year_dir(document.year);
        std::fs::create_dir_all(&year_dir).map_err(|err| Error::io(&year_dir, err))?;
        let meta_path = year_dir.join(format!("{identifier}.json"));
        let is_update = meta_path.exists();
        tracing::info!(
            identifier,
            year = document.year,
            update = is_update,
            submitted = document.lines.len(),
            "saving document"
        );

        let mut retained = Vec::new();
        for line in &document.lines {
            match line.disposition() {
                LineDisposition::Retained(text) => {
                    self.materialize_line(identifier, &year_dir, line, text).await?;
                    retained.push(StoredLine::from(line));
                }
                LineDisposition::Deleted => {
                    tracing::debug!(identifier, line = %line.image_url, "line deleted");
                }
            }
        }

        let purged = self.line_cache.purge_lines(identifier)?;
        tracing::debug!(identifier, purged, "evicted cached line images");

        if is_update {
            let keep: HashSet<String> = retained
                .iter()
                .map(|l| line_hash(&l.image_url))
                .collect();
            self.reap_orphans(identifier, &year_dir, &keep).await?;
        }

        let stored = StoredDocument {
            identifier: document.identifier.clone(),
            title: document.title.clone(),
            year: document.year,
            manifest_url: document.manifest_url.clone(),
            lines: retained,
        };
        let mut json = serde_json::to_vec_pretty(&stored)?;
        json.push(b'\n');
        std::fs::write(&meta_path, json).map_err(|err| Error::io(&meta_path, err))?;
        self.vcs.add(&meta_path).await?;

        let summary_path = self.base.join(SUMMARY_FILE);
        let summary = crate::readme::render(&self.list()?, &self.endpoints);
        std::fs::write(&summary_path, summary).map_err(|err| Error::io(&summary_path, err))?;
        self.vcs.add(&summary_path).await?;

        let mut message = if is_update {
            let changes = self.vcs.diff(true).await?;
            if changes.is_empty() {
                tracing::info!(identifier, "no changes; skipping commit");
                return self.details(identifier).await;
            }
            correction_message(&stored, changes.iter().map(|(p, s)| (p.as_path(), *s)))
        } else {
            format!(
                "Transcribed {} lines from {} ({})",
                stored.lines.len(),
                stored.identifier,
                stored.year
            )
        };
        if let Some(comment) = comment.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
            message.push_str("\n\n");
            message.push_str(comment);
        }

        let commit = self.vcs.commit(&message, &author, &email).await?;
        tracing::info!(identifier, %commit, "committed transcriptions");

        if self.push_after_commit {
            if let Err(err) = self.vcs.push(&self.remote, &self.branch).await {
                tracing::warn!(identifier, ?err, "push after commit failed");
            }
        }

        self.details(identifier).await
    }

    async fn materialize_line(
        &self,
        identifier: &str,
        year_dir: &Path,
        line: &OcrLine,
        text: &str,
    ) -> Result<()> {
        let line_id = line.line_id(identifier);
        let image_path = year_dir.join(format!("{line_id}.png"));
        if !image_path.exists() {
            let cached = match self.line_cache.get_path(&line_id) {
                Some(path) => path,
                None => self.line_cache.cache_line(&line.image_url, &line_id).await?,
            };
            move_file(&cached, &image_path)?;
            self.vcs.add(&image_path).await?;
        }

        let text_path = year_dir.join(format!("{line_id}.txt"));
        std::fs::write(&text_path, format!("{text}\n")).map_err(|err| Error::io(&text_path, err))?;
        self.vcs.add(&text_path).await
    }

    /// Stages removal of every line artifact of `identifier` whose hash is
    /// not in `keep`.
    async fn reap_orphans(
        &self,
        identifier: &str,
        year_dir: &Path,
        keep: &HashSet<String>,
    ) -> Result<()> {
        let mut orphans = Vec::new();
        for entry in std::fs::read_dir(year_dir).map_err(|err| Error::io(year_dir, err))? {
            let entry = entry.map_err(|err| Error::io(year_dir, err))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let Some(caps) = ARTIFACT_NAME.captures(name) else {
                continue;
            };
            if &caps[1] == identifier && !keep.contains(&caps[2]) {
                orphans.push(entry.path());
            }
        }
        orphans.sort();

        for path in orphans {
            tracing::debug!(identifier, path = %path.display(), "removing orphaned line artifact");
            self.vcs.remove(&path).await?;
        }
        Ok(())
    }
}

fn correction_message<'a, I>(stored: &StoredDocument, changes: I) -> String
where
    I: IntoIterator<Item = (&'a Path, FileStatus)>,
{
    let mut modified = 0_usize;
    let mut deleted = 0_usize;
    for (path, status) in changes {
        if path.extension().and_then(|e| e.to_str()) != Some("txt") {
            continue;
        }
        match status {
            FileStatus::Modified => modified += 1,
            FileStatus::Deleted => deleted += 1,
            FileStatus::Added => {}
        }
    }

    let mut message = format!("Corrected {} ({})", stored.identifier, stored.year);
    if modified > 0 {
        message.push_str(&format!(", updated {modified}"));
    }
    if deleted > 0 {
        message.push_str(&format!(", deleted {deleted}"));
    }
    if modified > 0 || deleted > 0 {
        message.push_str(" lines");
    }
    message
}

fn validate_identifier(identifier: &str) -> Result<()> {
    let bad = identifier.is_empty()
        || identifier == "."
        || identifier == ".."
        || identifier.contains(['/', '\\', '\0']);
    if bad {
        return Err(Error::InvalidPath {
            path: PathBuf::from(identifier),
            workdir: PathBuf::from(TRANSCRIPTIONS_DIR),
        });
    }
    Ok(())
}

fn read_stored(path: &Path) -> Result<StoredDocument> {
    let bytes = std::fs::read(path).map_err(|err| Error::io(path, err))?;
    serde_json::from_slice(&bytes)
        .map_err(|err| Error::MalformedData(format!("{}: {err}", path.display())))
}

/// Moves `from` to `to`, falling back to copy-and-delete across filesystems.
fn move_file(from: &Path, to: &Path) -> Result<()> {
    if std::fs::rename(from, to).is_ok() {
        return Ok(());
    }
    std::fs::copy(from, to).map_err(|err| Error::io(to, err))?;
    std::fs::remove_file(from).map_err(|err| Error::io(from, err))
}
