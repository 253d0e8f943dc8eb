use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use sha2::Digest as _;

/// One candidate work in the per-year identifier pool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IdentifierCandidate {
    #[serde(rename = "id")]
    pub identifier: String,
    #[serde(rename = "numPages")]
    pub page_count: u32,
}

/// A single OCR-detected text line together with its neighbours in reading
/// order. Neighbours are referenced by image URL.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OcrLine {
    #[serde(rename = "line")]
    pub image_url: String,
    #[serde(rename = "previous", default, skip_serializing_if = "Option::is_none")]
    pub previous_image_url: Option<String>,
    #[serde(rename = "next", default, skip_serializing_if = "Option::is_none")]
    pub next_image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcription: Option<String>,
}

/// What a submitted line turns into when a document is saved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineDisposition<'a> {
    Retained(&'a str),
    Deleted,
}

impl OcrLine {
    pub fn new(image_url: impl Into<String>) -> Self {
        Self {
            image_url: image_url.into(),
            previous_image_url: None,
            next_image_url: None,
            transcription: None,
        }
    }

    /// Short stable hash of the image URL.
    pub fn line_hash(&self) -> String {
        line_hash(&self.image_url)
    }

    pub fn line_id(&self, identifier: &str) -> String {
        format!("{identifier}_{}", self.line_hash())
    }

    pub fn disposition(&self) -> LineDisposition<'_> {
        match self.transcription.as_deref() {
            Some(text) if !text.trim().is_empty() => LineDisposition::Retained(text),
            _ => LineDisposition::Deleted,
        }
    }
}

pub fn line_hash(image_url: &str) -> String {
    let digest = sha2::Sha256::digest(image_url.as_bytes());
    hex::encode(&digest[..4])
}

/// Whether `s` has the shape produced by [`line_hash`].
pub fn is_line_hash(s: &str) -> bool {
    s.len() == 8 && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Line entry as persisted in a document's metadata file. Never carries the
/// transcription; that lives in the sibling `.txt` artifact.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredLine {
    #[serde(rename = "line")]
    pub image_url: String,
    #[serde(rename = "previous", default, skip_serializing_if = "Option::is_none")]
    pub previous_image_url: Option<String>,
    #[serde(rename = "next", default, skip_serializing_if = "Option::is_none")]
    pub next_image_url: Option<String>,
}

impl From<&OcrLine> for StoredLine {
    fn from(line: &OcrLine) -> Self {
        Self {
            image_url: line.image_url.clone(),
            previous_image_url: line.previous_image_url.clone(),
            next_image_url: line.next_image_url.clone(),
        }
    }
}

impl StoredLine {
    pub fn into_line(self, transcription: Option<String>) -> OcrLine {
        OcrLine {
            image_url: self.image_url,
            previous_image_url: self.previous_image_url,
            next_image_url: self.next_image_url,
            transcription,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    #[serde(rename = "id")]
    pub identifier: String,
    pub title: String,
    pub year: i32,
    #[serde(rename = "manifest")]
    pub manifest_url: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub lines: Vec<OcrLine>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<LogEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_lines: Option<usize>,
}

/// On-disk form of a [`Document`]: no transcriptions, no history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredDocument {
    #[serde(rename = "id")]
    pub identifier: String,
    pub title: String,
    pub year: i32,
    #[serde(rename = "manifest")]
    pub manifest_url: String,
    #[serde(default)]
    pub lines: Vec<StoredLine>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Author {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogEntry {
    pub author: Author,
    pub date: DateTime<FixedOffset>,
    pub commit: String,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStep {
    Fetch,
    Cache,
}

/// Transient progress event of an extraction run or of task production.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProgressMessage {
    pub step: ProgressStep,
    pub progress: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes_total: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes_read: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_number: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_number: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProgressMessage {
    pub fn step(step: ProgressStep, progress: f64) -> Self {
        Self {
            step,
            progress,
            bytes_total: None,
            bytes_read: None,
            page_number: None,
            line_number: None,
            error: None,
        }
    }

    /// Terminal error event. `progress` should repeat the last reported
    /// fraction so the stream stays monotonic.
    pub fn failed(step: ProgressStep, progress: f64, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::step(step, progress)
        }
    }
}

/// A completed transcription handed over for persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionTask {
    pub document: Document,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}
