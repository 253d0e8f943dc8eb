use std::io::Write as _;
use std::sync::Arc;
use std::time::SystemTime;

use anyhow::Context as _;

use crate::app::producer::TaskProducer;
use crate::app::save_queue::SaveQueue;
use crate::catalog::ArchiveClient;
use crate::cli::{SaveArgs, ShowArgs, TaskArgs};
use crate::config::Config;
use crate::formats::{ProgressMessage, TranscriptionTask};
use crate::identifiers::IdentifierCache;
use crate::line_cache::{LineImageCache, MAX_IMAGE_AGE};
use crate::store::DocumentStore;
use crate::vcs::GitRepo;

pub async fn scrape(config: &Config) -> anyhow::Result<()> {
    let client = ArchiveClient::new(config.endpoints.clone()).context("build archive client")?;
    let path = config.identifier_cache_path();
    let mut cache = IdentifierCache::load(&path)
        .with_context(|| format!("load identifier cache: {}", path.display()))?;
    let added = client
        .scrape_identifiers(&mut cache)
        .await
        .context("scrape catalog")?;
    tracing::info!(added, path = %cache.path().display(), "identifier cache updated");
    Ok(())
}

pub async fn task(config: &Config, args: TaskArgs) -> anyhow::Result<()> {
    let client = ArchiveClient::new(config.endpoints.clone()).context("build archive client")?;
    let path = config.identifier_cache_path();
    let identifiers = IdentifierCache::load(&path)
        .with_context(|| format!("load identifier cache: {}", path.display()))?;
    let line_cache = open_line_cache(config, &client)?;
    let eviction = line_cache.spawn_eviction_task();

    let producer = TaskProducer::new(client, identifiers, Arc::clone(&line_cache));
    let result = producer
        .produce_task(args.year, args.task_size, log_progress)
        .await;
    eviction.abort();

    let document = result.with_context(|| format!("produce task for {}", args.year))?;
    tracing::info!(
        remaining = producer.remaining(args.year).await,
        year = args.year,
        "candidates left"
    );
    print_json(&document)
}

pub async fn save(config: &Config, args: SaveArgs) -> anyhow::Result<()> {
    let raw = std::fs::read(&args.input)
        .with_context(|| format!("read task: {}", args.input.display()))?;
    let task: TranscriptionTask = serde_json::from_slice(&raw)
        .with_context(|| format!("parse task: {}", args.input.display()))?;

    let store = Arc::new(open_store(config)?);
    let (queue, consumer) = SaveQueue::spawn(store);
    let saved = queue.submit(task).await;
    drop(queue);
    consumer.await.context("join save queue")?;

    match saved {
        Ok(document) => print_json(&document),
        Err(err) => {
            print_json(&err.to_response())?;
            Err(err).context("save transcription")
        }
    }
}

pub async fn show(config: &Config, args: ShowArgs) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let document = store
        .details(&args.id)
        .await
        .with_context(|| format!("load document {}", args.id))?;
    print_json(&document)
}

pub fn list(config: &Config) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let documents = store.list().context("list documents")?;
    print_json(&documents)
}

pub fn evict(config: &Config) -> anyhow::Result<()> {
    let client = ArchiveClient::new(config.endpoints.clone()).context("build archive client")?;
    let line_cache = open_line_cache(config, &client)?;
    let removed = line_cache.evict_older_than(MAX_IMAGE_AGE, SystemTime::now());
    tracing::info!(removed, dir = %line_cache.dir().display(), "eviction pass finished");
    Ok(())
}

fn open_line_cache(config: &Config, client: &ArchiveClient) -> anyhow::Result<Arc<LineImageCache>> {
    let dir = config.line_image_dir();
    let cache = LineImageCache::open(&dir, client.http().clone())
        .with_context(|| format!("open line image cache: {}", dir.display()))?;
    Ok(Arc::new(cache))
}

fn open_store(config: &Config) -> anyhow::Result<DocumentStore> {
    let client = ArchiveClient::new(config.endpoints.clone()).context("build archive client")?;
    let line_cache = open_line_cache(config, &client)?;
    let repo = GitRepo::open(&config.repo_dir, config.git_bin.clone())
        .with_context(|| format!("open corpus repo: {}", config.repo_dir.display()))?;
    Ok(
        DocumentStore::new(Arc::new(repo), line_cache, config.endpoints.clone())
            .with_remote(config.remote.clone(), config.branch.clone())
            .with_push_after_commit(config.push_after_commit),
    )
}

fn log_progress(message: ProgressMessage) {
    tracing::info!(
        step = ?message.step,
        progress = %format!("{:.0}%", message.progress * 100.0),
        page = message.page_number,
        line = message.line_number,
        "task progress"
    );
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, value).context("write json")?;
    writeln!(stdout).context("write json")?;
    Ok(())
}
