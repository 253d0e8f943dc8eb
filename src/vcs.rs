//! Narrow adapter over the version-control executable used for the corpus
//! working copy. Each operation is a single process invocation in the
//! working directory.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use chrono::DateTime;

use crate::error::{Error, Result};
use crate::formats::{Author, LogEntry};

const RECORD_SEP: char = '\u{1e}';
const FIELD_SEP: char = '\u{1f}';
const LOG_FORMAT: &str = "--format=%x1e%H%x1f%an%x1f%ae%x1f%aI%x1f%s%x1f%b";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    Modified,
    Added,
    Deleted,
}

#[async_trait]
pub trait VersionControl: Send + Sync {
    fn workdir(&self) -> &Path;
    async fn pull(&self, remote: &str, branch: &str, rebase: bool) -> Result<()>;
    async fn add(&self, path: &Path) -> Result<()>;
    async fn remove(&self, path: &Path) -> Result<()>;
    /// Commits the staged changes and returns the new commit id.
    async fn commit(&self, message: &str, author: &str, email: &str) -> Result<String>;
    async fn push(&self, remote: &str, branch: &str) -> Result<()>;
    /// Discards local modifications and untracked files.
    async fn clean_up(&self) -> Result<()>;
    async fn diff(&self, staged: bool) -> Result<BTreeMap<PathBuf, FileStatus>>;
    /// History touching `paths`, newest first.
    async fn log(&self, paths: &[PathBuf]) -> Result<Vec<LogEntry>>;
}

/// Normalizes `path` to be relative to `workdir`, rejecting anything that
/// would resolve outside of it.
pub fn relative_to(workdir: &Path, path: &Path) -> Result<PathBuf> {
    let invalid = || Error::InvalidPath {
        path: path.to_path_buf(),
        workdir: workdir.to_path_buf(),
    };
    let relative = if path.is_absolute() {
        path.strip_prefix(workdir).map_err(|_| invalid())?.to_path_buf()
    } else {
        path.to_path_buf()
    };
    if relative
        .components()
        .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)))
    {
        return Err(invalid());
    }
    Ok(relative)
}

#[derive(Debug, Clone)]
pub struct GitRepo {
    bin: String,
    workdir: PathBuf,
}

impl GitRepo {
    pub fn open(workdir: impl AsRef<Path>, bin: impl Into<String>) -> Result<Self> {
        let workdir = workdir.as_ref();
        let workdir = std::fs::canonicalize(workdir).map_err(|err| Error::io(workdir, err))?;
        if !workdir.is_dir() {
            return Err(Error::NotFound(format!(
                "working directory {}",
                workdir.display()
            )));
        }
        Ok(Self {
            bin: bin.into(),
            workdir,
        })
    }

    async fn run(&self, args: Vec<OsString>) -> Result<String> {
        let operation = std::iter::once(self.bin.clone())
            .chain(args.iter().map(|a| a.to_string_lossy().into_owned()))
            .collect::<Vec<_>>()
            .join(" ");
        tracing::debug!(workdir = %self.workdir.display(), %operation, "git");

        let output = tokio::process::Command::new(&self.bin)
            .args(&args)
            .current_dir(&self.workdir)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|err| Error::VersionControl {
                operation: operation.clone(),
                stdout: String::new(),
                stderr: err.to_string(),
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.status.success() {
            return Err(Error::VersionControl {
                operation,
                stdout,
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(stdout)
    }
}

fn args<I, S>(items: I) -> Vec<OsString>
where
    I: IntoIterator<Item = S>,
    S: Into<OsString>,
{
    items.into_iter().map(Into::into).collect()
}

#[async_trait]
impl VersionControl for GitRepo {
    fn workdir(&self) -> &Path {
        &self.workdir
    }

    async fn pull(&self, remote: &str, branch: &str, rebase: bool) -> Result<()> {
        let mut argv = args(["pull", remote, branch]);
        if rebase {
            argv.push("--rebase".into());
        }
        self.run(argv).await.map(drop)
    }

    async fn add(&self, path: &Path) -> Result<()> {
        let relative = relative_to(&self.workdir, path)?;
        let mut argv = args(["add", "--"]);
        argv.push(relative.into_os_string());
        self.run(argv).await.map(drop)
    }

    async fn remove(&self, path: &Path) -> Result<()> {
        let relative = relative_to(&self.workdir, path)?;
        let mut argv = args(["rm", "--quiet", "--"]);
        argv.push(relative.into_os_string());
        self.run(argv).await.map(drop)
    }

    async fn commit(&self, message: &str, author: &str, email: &str) -> Result<String> {
        let mut argv = Vec::new();
        if !author.is_empty() {
            argv.extend(args([
                "-c".to_owned(),
                format!("user.name={author}"),
                "-c".to_owned(),
                format!("user.email={email}"),
            ]));
        }
        argv.extend(args(["commit", "--quiet", "-m", message]));
        if !author.is_empty() {
            argv.extend(args(["--author".to_owned(), format!("{author} <{email}>")]));
        }
        self.run(argv).await?;
        let head = self.run(args(["rev-parse", "HEAD"])).await?;
        Ok(head.trim().to_owned())
    }

    async fn push(&self, remote: &str, branch: &str) -> Result<()> {
        self.run(args(["push", remote, branch])).await.map(drop)
    }

    async fn clean_up(&self) -> Result<()> {
        self.run(args(["reset", "--hard"])).await?;
        self.run(args(["checkout", "--", "."])).await?;
        self.run(args(["clean", "-fd"])).await?;
        Ok(())
    }

    async fn diff(&self, staged: bool) -> Result<BTreeMap<PathBuf, FileStatus>> {
        let mut argv = args(["diff", "--name-status", "--no-renames", "-z"]);
        if staged {
            argv.push("--cached".into());
        }
        let stdout = self.run(argv).await?;
        Ok(parse_name_status(&stdout))
    }

    async fn log(&self, paths: &[PathBuf]) -> Result<Vec<LogEntry>> {
        if paths.is_empty() {
            return Ok(Vec::new());
        }
        let mut argv = args(["log", LOG_FORMAT, "--"]);
        for path in paths {
            argv.push(relative_to(&self.workdir, path)?.into_os_string());
        }
        let stdout = self.run(argv).await?;
        parse_log(&stdout)
    }
}

/// Parses `git diff --name-status -z` output. Unknown status letters are
/// skipped.
fn parse_name_status(output: &str) -> BTreeMap<PathBuf, FileStatus> {
    let mut changes = BTreeMap::new();
    let mut fields = output.split('\0').filter(|f| !f.is_empty());
    while let (Some(status), Some(path)) = (fields.next(), fields.next()) {
        let status = match status.chars().next() {
            Some('M') | Some('T') => FileStatus::Modified,
            Some('A') => FileStatus::Added,
            Some('D') => FileStatus::Deleted,
            _ => continue,
        };
        changes.insert(PathBuf::from(path), status);
    }
    changes
}

/// Parses log output produced with [`LOG_FORMAT`]. Fields are delimited by
/// control characters, so quotes and newlines in subjects and bodies pass
/// through untouched.
fn parse_log(output: &str) -> Result<Vec<LogEntry>> {
    let mut entries = Vec::new();
    for record in output.split(RECORD_SEP) {
        if record.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = record.splitn(6, FIELD_SEP).collect();
        let [commit, name, email, date, subject, body] = fields.as_slice() else {
            return Err(Error::MalformedData(format!(
                "log record with {} fields",
                fields.len()
            )));
        };
        let date = DateTime::parse_from_rfc3339(date.trim())
            .map_err(|err| Error::MalformedData(format!("log date {date:?}: {err}")))?;
        entries.push(LogEntry {
            author: Author {
                name: (*name).to_owned(),
                email: (*email).to_owned(),
            },
            date,
            commit: commit.trim().to_owned(),
            subject: (*subject).to_owned(),
            body: body.trim_end_matches('\n').to_owned(),
        });
    }
    Ok(entries)
}
