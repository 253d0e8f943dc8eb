//! Streaming extraction of line boxes from a work's compressed OCR export.
//!
//! The export is a gzip-compressed XML document with one `<page>` element per
//! scanned page and `<line>` elements carrying pixel geometry. It is decoded
//! incrementally as the HTTP body arrives, so progress can be reported in
//! terms of compressed bytes consumed.

use std::io::Write as _;
use std::sync::LazyLock;

use regex::Regex;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::catalog::ArchiveClient;
use crate::config::Endpoints;
use crate::error::{Error, Result};
use crate::formats::{OcrLine, ProgressMessage, ProgressStep};

pub const MIN_LINE_WIDTH: i64 = 200;
pub const FRONT_MATTER_PAGES: u32 = 10;
const STAMP_MIN_REL_X: f64 = 0.65;
const STAMP_MIN_REL_Y: f64 = 0.90;

static PAGE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<page width="(\d+)" height="(\d+)"[^>]*>"#).expect("valid page pattern")
});
static LINE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<line [^>]*?l="(\d+)" t="(\d+)" r="(\d+)" b="(\d+)"[^>]*>"#)
        .expect("valid line pattern")
});

/// Line-by-line state machine over the decompressed export.
#[derive(Debug)]
pub struct LineExtractor<'a> {
    identifier: &'a str,
    endpoints: &'a Endpoints,
    page_offset: u32,
    page_ordinal: u32,
    page_width: i64,
    page_height: i64,
    scanned: u64,
    lines: Vec<OcrLine>,
}

impl<'a> LineExtractor<'a> {
    pub fn new(identifier: &'a str, endpoints: &'a Endpoints, page_offset: u32) -> Self {
        Self {
            identifier,
            endpoints,
            page_offset,
            page_ordinal: 0,
            page_width: 0,
            page_height: 0,
            scanned: 0,
            lines: Vec::new(),
        }
    }

    /// 1-based number of the page currently being scanned (0 before the
    /// first page marker).
    pub fn page_number(&self) -> u32 {
        self.page_ordinal
    }

    pub fn scanned_lines(&self) -> u64 {
        self.scanned
    }

    pub fn retained_lines(&self) -> usize {
        self.lines.len()
    }

    pub fn process_line(&mut self, text: &str) -> Result<()> {
        self.scanned += 1;

        if text.contains("<page") {
            let caps = PAGE_PATTERN.captures(text).ok_or_else(|| {
                Error::MalformedData(format!(
                    "{}: page marker without dimensions at line {}",
                    self.identifier, self.scanned
                ))
            })?;
            self.page_width = parse_px(&caps[1], "page width")?;
            self.page_height = parse_px(&caps[2], "page height")?;
            if self.page_width == 0 || self.page_height == 0 {
                return Err(Error::MalformedData(format!(
                    "{}: page {} has zero dimensions",
                    self.identifier,
                    self.page_ordinal + 1
                )));
            }
            self.page_ordinal += 1;
        }

        if !text.contains("<line") || self.page_ordinal <= FRONT_MATTER_PAGES {
            return Ok(());
        }

        for caps in LINE_PATTERN.captures_iter(text) {
            let left = parse_px(&caps[1], "line left")?;
            let top = parse_px(&caps[2], "line top")?;
            let right = parse_px(&caps[3], "line right")?;
            let bottom = parse_px(&caps[4], "line bottom")?;
            let width = right - left;
            let height = bottom - top;
            if !self.keep_box(left, top, width) {
                continue;
            }
            let page_index = self.page_offset + self.page_ordinal - 1;
            let url = self
                .endpoints
                .tile_url(self.identifier, page_index, left, top, width, height);
            self.push(url);
        }
        Ok(())
    }

    fn keep_box(&self, left: i64, top: i64, width: i64) -> bool {
        if width < MIN_LINE_WIDTH {
            return false;
        }
        let rel_x = left as f64 / self.page_width as f64;
        let rel_y = top as f64 / self.page_height as f64;
        !(rel_x > STAMP_MIN_REL_X && rel_y > STAMP_MIN_REL_Y)
    }

    fn push(&mut self, url: String) {
        let mut line = OcrLine::new(url);
        if let Some(previous) = self.lines.last_mut() {
            previous.next_image_url = Some(line.image_url.clone());
            line.previous_image_url = Some(previous.image_url.clone());
        }
        self.lines.push(line);
    }

    pub fn finish(self) -> Vec<OcrLine> {
        self.lines
    }
}

fn parse_px(raw: &str, what: &str) -> Result<i64> {
    raw.parse()
        .map_err(|err| Error::MalformedData(format!("unparsable {what} {raw:?}: {err}")))
}

/// Handle to a running extraction: an ordered progress stream, a single
/// terminal result, and cancellation. Dropping the handle cancels the run.
#[derive(Debug)]
pub struct Extraction {
    progress: mpsc::Receiver<ProgressMessage>,
    lines: oneshot::Receiver<Result<Vec<OcrLine>>>,
    cancel: CancellationToken,
    _guard: DropGuard,
}

impl Extraction {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Next progress event; `None` once the run has delivered its result.
    pub async fn next_progress(&mut self) -> Option<ProgressMessage> {
        self.progress.recv().await
    }

    /// Drains the progress stream into `on_progress`, then returns the line
    /// sequence.
    pub async fn run_to_end<F>(mut self, mut on_progress: F) -> Result<Vec<OcrLine>>
    where
        F: FnMut(ProgressMessage),
    {
        while let Some(message) = self.progress.recv().await {
            on_progress(message);
        }
        self.lines.await.unwrap_or_else(|_| {
            Err(Error::Transport(
                "extraction ended without delivering lines".to_owned(),
            ))
        })
    }
}

/// Starts extracting the lines of `identifier` on a background task.
pub fn extract(client: ArchiveClient, identifier: impl Into<String>) -> Extraction {
    let identifier = identifier.into();
    let (progress_tx, progress_rx) = mpsc::channel(1);
    let (lines_tx, lines_rx) = oneshot::channel();
    let cancel = CancellationToken::new();
    let worker_cancel = cancel.clone();

    tokio::spawn(async move {
        let mut producer = Producer {
            client: &client,
            identifier: &identifier,
            progress: &progress_tx,
            lines: &lines_tx,
            cancel: &worker_cancel,
            last_progress: 0.0,
        };
        match producer.run().await {
            Ok(Some(lines)) => {
                tracing::info!(identifier = %identifier, lines = lines.len(), "extraction finished");
                let _ = lines_tx.send(Ok(lines));
            }
            Ok(None) => {
                tracing::debug!(identifier = %identifier, "extraction abandoned by consumer");
            }
            Err(err) => {
                tracing::warn!(identifier = %identifier, ?err, "extraction failed");
                let message = ProgressMessage::failed(
                    ProgressStep::Fetch,
                    producer.last_progress,
                    err.to_string(),
                );
                if producer.emit(message).await {
                    let _ = lines_tx.send(Err(err));
                }
            }
        }
    });

    Extraction {
        progress: progress_rx,
        lines: lines_rx,
        _guard: cancel.clone().drop_guard(),
        cancel,
    }
}

struct Producer<'a> {
    client: &'a ArchiveClient,
    identifier: &'a str,
    progress: &'a mpsc::Sender<ProgressMessage>,
    lines: &'a oneshot::Sender<Result<Vec<OcrLine>>>,
    cancel: &'a CancellationToken,
    /// Fraction carried by the last delivered event. Never decreases.
    last_progress: f64,
}

impl Producer<'_> {
    /// Returns `false` when the consumer is gone.
    async fn emit(&mut self, message: ProgressMessage) -> bool {
        let progress = message.progress.max(self.last_progress);
        let sent = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            sent = self.progress.send(message) => sent.is_ok(),
        };
        if sent {
            self.last_progress = progress;
        }
        sent
    }

    fn abandoned(&self) -> bool {
        self.cancel.is_cancelled() || self.lines.is_closed()
    }

    /// `Ok(None)` means the run was cancelled or its consumer went away.
    async fn run(&mut self) -> Result<Option<Vec<OcrLine>>> {
        let page_offset = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Ok(None),
            offset = self.client.start_page_offset(self.identifier) => offset,
        };

        let url = self.client.endpoints().ocr_export_url(self.identifier);
        tracing::info!(identifier = self.identifier, url = %url, "fetching ocr export");
        let mut response = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Ok(None),
            response = self.client.get_ok(&url) => response?,
        };
        let bytes_total = response.content_length().filter(|n| *n > 0);
        tracing::debug!(identifier = self.identifier, ?bytes_total, "parsing ocr export");

        let (client, identifier) = (self.client, self.identifier);
        let mut extractor = LineExtractor::new(identifier, client.endpoints(), page_offset);
        let mut decoder = flate2::write::GzDecoder::new(Vec::new());
        let mut pending = Vec::new();
        let mut bytes_read = 0_u64;
        let mut percent = 0_u64;

        loop {
            let chunk = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(None),
                chunk = response.chunk() => chunk?,
            };
            let Some(chunk) = chunk else {
                break;
            };
            if self.abandoned() {
                return Ok(None);
            }
            bytes_read += chunk.len() as u64;
            decoder
                .write_all(&chunk)
                .map_err(|err| Error::MalformedData(format!("decompress ocr export: {err}")))?;
            pending.append(decoder.get_mut());
            drain_complete_lines(&mut pending, &mut extractor)?;

            let Some(total) = bytes_total else {
                continue;
            };
            let current = (bytes_read.min(total) * 100) / total;
            if current > percent {
                percent = current;
                let message = ProgressMessage {
                    bytes_total: Some(total),
                    bytes_read: Some(bytes_read),
                    page_number: Some(extractor.page_number()),
                    line_number: Some(extractor.scanned_lines()),
                    ..ProgressMessage::step(ProgressStep::Fetch, bytes_read as f64 / total as f64)
                };
                if !self.emit(message).await {
                    return Ok(None);
                }
            }
        }

        decoder
            .try_finish()
            .map_err(|err| Error::MalformedData(format!("decompress ocr export: {err}")))?;
        pending.append(decoder.get_mut());
        drain_complete_lines(&mut pending, &mut extractor)?;
        if !pending.is_empty() {
            extractor.process_line(&String::from_utf8_lossy(&pending))?;
        }
        tracing::debug!(
            identifier = self.identifier,
            pages = extractor.page_number(),
            scanned = extractor.scanned_lines(),
            retained = extractor.retained_lines(),
            "ocr export scanned"
        );

        Ok(Some(extractor.finish()))
    }
}

fn drain_complete_lines(pending: &mut Vec<u8>, extractor: &mut LineExtractor<'_>) -> Result<()> {
    let Some(last_newline) = pending.iter().rposition(|b| *b == b'\n') else {
        return Ok(());
    };
    let rest = pending.split_off(last_newline + 1);
    for raw in pending.split(|b| *b == b'\n') {
        if raw.is_empty() {
            continue;
        }
        let text = String::from_utf8_lossy(raw);
        extractor.process_line(text.trim_end_matches('\r'))?;
    }
    *pending = rest;
    Ok(())
}
