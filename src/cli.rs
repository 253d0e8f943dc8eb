use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    /// Cache directory (overrides `ARCHISCRIBE_CACHE`).
    #[arg(long, global = true)]
    pub cache_dir: Option<PathBuf>,

    /// Corpus working copy (overrides `ARCHISCRIBE_REPO`).
    #[arg(long, global = true)]
    pub repo_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Populate the identifier cache from the catalog.
    Scrape,
    /// Produce a transcription task and print it as JSON.
    Task(TaskArgs),
    /// Save a completed transcription task.
    Save(SaveArgs),
    /// Print a stored document with its history.
    Show(ShowArgs),
    /// Print all stored documents.
    List,
    /// Run one eviction pass over the line-image cache.
    Evict,
}

#[derive(Debug, Args)]
pub struct TaskArgs {
    /// Publication year to draw a volume from.
    #[arg(long)]
    pub year: i32,

    /// Number of lines to sample (0 means the default).
    #[arg(long, default_value_t = 0)]
    pub task_size: usize,
}

#[derive(Debug, Args)]
pub struct SaveArgs {
    /// Path to a JSON-encoded transcription task.
    #[arg(long)]
    pub input: PathBuf,
}

#[derive(Debug, Args)]
pub struct ShowArgs {
    /// Identifier of the stored work.
    #[arg(long)]
    pub id: String,
}
