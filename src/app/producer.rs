use std::sync::Arc;

use tokio::sync::Mutex;

use crate::catalog::ArchiveClient;
use crate::error::Result;
use crate::extract::extract;
use crate::formats::{Document, IdentifierCandidate, ProgressMessage, ProgressStep};
use crate::identifiers::IdentifierCache;
use crate::line_cache::LineImageCache;
use crate::sample::sample_lines;

/// Draws candidates for `year` until one passes the Fraktur heuristic.
/// Candidates whose heuristic fetch fails are skipped like negatives; an
/// exhausted pool surfaces as [`NotFound`](crate::Error::NotFound).
pub async fn pick_volume(
    identifiers: &mut IdentifierCache,
    client: &ArchiveClient,
    year: i32,
) -> Result<IdentifierCandidate> {
    loop {
        let candidate = identifiers.random_pick(year)?;
        match client.is_fraktur(&candidate.identifier).await {
            Ok(true) => {
                tracing::info!(year, identifier = %candidate.identifier, "picked volume");
                return Ok(candidate);
            }
            Ok(false) => {
                tracing::debug!(identifier = %candidate.identifier, "not fraktur; skipping");
            }
            Err(err) => {
                tracing::warn!(identifier = %candidate.identifier, ?err, "typeface check failed; skipping");
            }
        }
    }
}

/// Builds transcription tasks: picks a volume, extracts its lines, samples a
/// subset and warms the line-image cache for it.
pub struct TaskProducer {
    client: ArchiveClient,
    identifiers: Mutex<IdentifierCache>,
    line_cache: Arc<LineImageCache>,
}

impl TaskProducer {
    pub fn new(
        client: ArchiveClient,
        identifiers: IdentifierCache,
        line_cache: Arc<LineImageCache>,
    ) -> Self {
        Self {
            client,
            identifiers: Mutex::new(identifiers),
            line_cache,
        }
    }

    /// Produces a draft document for `year` holding `task_size` sampled
    /// lines (0 means the default size). Progress covers extraction in
    /// `[0, 0.5]` and image caching in `[0.5, 1]`.
    pub async fn produce_task<F>(
        &self,
        year: i32,
        task_size: usize,
        mut on_progress: F,
    ) -> Result<Document>
    where
        F: FnMut(ProgressMessage) + Send,
    {
        loop {
            let candidate = {
                let mut identifiers = self.identifiers.lock().await;
                pick_volume(&mut identifiers, &self.client, year).await?
            };
            let identifier = candidate.identifier;

            let metadata = match self.client.fetch_metadata(&identifier).await {
                Ok(metadata) => metadata,
                Err(err) => {
                    tracing::warn!(%identifier, ?err, "metadata unavailable; trying another volume");
                    continue;
                }
            };
            let title = metadata.title().unwrap_or(identifier.as_str()).to_owned();
            let mut document = Document {
                manifest_url: self.client.endpoints().manifest_url(&identifier),
                identifier: identifier.clone(),
                title,
                year,
                lines: Vec::new(),
                history: Vec::new(),
                num_lines: None,
            };

            let extraction = extract(self.client.clone(), identifier.clone());
            let lines = extraction
                .run_to_end(|mut message| {
                    if message.error.is_none() {
                        message.progress *= 0.5;
                        on_progress(message);
                    }
                })
                .await;
            let lines = match lines {
                Ok(lines) => lines,
                Err(err) => {
                    tracing::warn!(%identifier, ?err, "extraction failed; trying another volume");
                    continue;
                }
            };
            if lines.is_empty() {
                tracing::warn!(%identifier, "volume has no usable lines; trying another volume");
                continue;
            }

            let sampled = sample_lines(&lines, task_size, &mut rand::thread_rng());
            let total = sampled.len();
            for (idx, line) in sampled.iter().enumerate() {
                let id = line.line_id(&identifier);
                if let Err(err) = self.line_cache.cache_line(&line.image_url, &id).await {
                    tracing::warn!(%id, ?err, "failed to cache line image");
                }
                let done = (idx + 1) as f64 / total as f64;
                on_progress(ProgressMessage::step(ProgressStep::Cache, 0.5 + 0.5 * done));
            }

            tracing::info!(
                %identifier,
                year,
                extracted = lines.len(),
                sampled = total,
                "task produced"
            );
            document.lines = sampled;
            return Ok(document);
        }
    }

    /// Remaining candidates for `year`.
    pub async fn remaining(&self, year: i32) -> usize {
        self.identifiers.lock().await.remaining(year)
    }
}

