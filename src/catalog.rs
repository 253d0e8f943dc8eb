use std::time::Duration;

use reqwest::header::USER_AGENT;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::config::Endpoints;
use crate::error::{Error, Result};
use crate::identifiers::IdentifierCache;

pub const MIN_PAGE_COUNT: u32 = 50;
const SEARCH_QUERY: &str =
    "mediatype:(texts) AND language:(German) AND date:[1800-01-01 TO 1941-01-01]";
const SEARCH_FIELDS: &str = "identifier,imagecount,year";
const FRAKTUR_TOKEN: &[u8] = b"ift";
const FRAKTUR_THRESHOLD: usize = 5;
const USER_AGENT_VALUE: &str = "archiscribe/0.1";

/// Client for the remote archive: catalog search, item metadata and the
/// cheap probes run before extraction.
#[derive(Debug, Clone)]
pub struct ArchiveClient {
    client: reqwest::Client,
    endpoints: Endpoints,
}

/// Descriptive metadata of one catalog item.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemMetadata {
    pub fields: Map<String, Value>,
}

impl ItemMetadata {
    /// String value of `key`; for list-valued fields the first string entry.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.fields.get(key)? {
            Value::String(s) => Some(s.as_str()),
            Value::Array(items) => items.iter().find_map(Value::as_str),
            _ => None,
        }
    }

    pub fn title(&self) -> Option<&str> {
        self.get_str("title")
    }
}

#[derive(Debug, Deserialize)]
struct SearchPage {
    #[serde(default)]
    items: Vec<Value>,
    #[serde(default)]
    cursor: Option<String>,
    #[serde(default)]
    count: usize,
    #[serde(default)]
    total: usize,
}

impl ArchiveClient {
    pub fn new(endpoints: Endpoints) -> Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;
        Ok(Self::with_client(client, endpoints))
    }

    pub fn with_client(client: reqwest::Client, endpoints: Endpoints) -> Self {
        Self { client, endpoints }
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.client
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    pub(crate) async fn get_ok(&self, url: &str) -> Result<reqwest::Response> {
        let response = self
            .client
            .get(url)
            .header(USER_AGENT, USER_AGENT_VALUE)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Transport(format!("status {status} while getting {url}")));
        }
        Ok(response)
    }

    pub async fn fetch_metadata(&self, identifier: &str) -> Result<ItemMetadata> {
        let url = self.endpoints.metadata_url(identifier);
        let body: Value = self.get_ok(&url).await?.json().await?;
        match body.get("metadata") {
            Some(Value::Object(fields)) => Ok(ItemMetadata {
                fields: fields.clone(),
            }),
            _ => Err(Error::NotFound(format!("no metadata for {identifier}"))),
        }
    }

    /// Guesses whether a work is set in Fraktur by counting the OCR artifact
    /// token `ift` in its plain-text export. Stops reading as soon as the
    /// answer is known.
    pub async fn is_fraktur(&self, identifier: &str) -> Result<bool> {
        let url = self.endpoints.plain_text_url(identifier);
        let mut response = self.get_ok(&url).await?;
        let mut counter = TokenCounter::new(FRAKTUR_TOKEN, FRAKTUR_THRESHOLD + 1);
        while let Some(chunk) = response.chunk().await? {
            if counter.feed(&chunk) {
                break;
            }
        }
        counter.finish();
        tracing::debug!(identifier, count = counter.count, "fraktur heuristic");
        Ok(counter.count > FRAKTUR_THRESHOLD)
    }

    /// Index of the first page image: 1 when the archive rejects page 0,
    /// otherwise 0 (including when the probe itself fails).
    pub async fn start_page_offset(&self, identifier: &str) -> u32 {
        let url = self.endpoints.page_info_url(identifier, 0);
        match self
            .client
            .get(&url)
            .header(USER_AGENT, USER_AGENT_VALUE)
            .timeout(Duration::from_secs(10))
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => 0,
            Ok(response) => {
                tracing::debug!(identifier, status = %response.status(), "page 0 missing; starting at 1");
                1
            }
            Err(err) => {
                tracing::debug!(identifier, ?err, "start page probe failed; using 0");
                0
            }
        }
    }

    async fn search_page(&self, total_only: bool, cursor: Option<&str>) -> Result<SearchPage> {
        let mut request = self
            .client
            .get(self.endpoints.search_url())
            .header(USER_AGENT, USER_AGENT_VALUE)
            .query(&[("q", SEARCH_QUERY), ("fields", SEARCH_FIELDS)]);
        if total_only {
            request = request.query(&[("total_only", "true")]);
        } else if let Some(cursor) = cursor {
            request = request.query(&[("cursor", cursor)]);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Transport(format!(
                "status {status} while searching catalog"
            )));
        }
        let page = response
            .json()
            .await
            .map_err(|err| Error::MalformedData(format!("catalog search response: {err}")))?;
        Ok(page)
    }

    /// Pages through the catalog search and adds every item with at least
    /// [`MIN_PAGE_COUNT`] pages to `cache`, then writes the cache once.
    /// Returns the number of added candidates.
    pub async fn scrape_identifiers(&self, cache: &mut IdentifierCache) -> Result<usize> {
        let total = self.search_page(true, None).await?.total;
        tracing::info!(total, "scraping catalog");

        let mut processed = 0_usize;
        let mut added = 0_usize;
        let mut cursor: Option<String> = None;
        while processed < total {
            let page = self.search_page(false, cursor.as_deref()).await?;
            for item in &page.items {
                let Some((identifier, page_count, year)) = candidate_from_item(item) else {
                    continue;
                };
                cache.add(identifier, page_count, year);
                added += 1;
            }
            processed += page.count;
            tracing::info!(processed, total, added, "catalog page scraped");

            cursor = page.cursor.filter(|c| !c.is_empty());
            if page.count == 0 || cursor.is_none() {
                break;
            }
        }

        cache.write()?;
        Ok(added)
    }
}

fn candidate_from_item(item: &Value) -> Option<(String, u32, i32)> {
    let identifier = item.get("identifier")?.as_str()?;
    let page_count = match item.get("imagecount")? {
        Value::Number(n) => n.as_u64()?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    if page_count < u64::from(MIN_PAGE_COUNT) {
        return None;
    }
    let year = year_of(item.get("year")?)?;
    Some((identifier.to_owned(), u32::try_from(page_count).ok()?, year))
}

fn year_of(value: &Value) -> Option<i32> {
    match value {
        Value::String(s) => s.trim().parse().ok(),
        Value::Number(n) => n.as_i64().and_then(|y| i32::try_from(y).ok()),
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .find_map(|s| s.trim().parse().ok()),
        _ => None,
    }
}

/// Counts whitespace-delimited occurrences of a token across streamed chunks,
/// up to `cap`.
#[derive(Debug)]
struct TokenCounter<'a> {
    token: &'a [u8],
    cap: usize,
    partial: Vec<u8>,
    count: usize,
}

impl<'a> TokenCounter<'a> {
    fn new(token: &'a [u8], cap: usize) -> Self {
        Self {
            token,
            cap,
            partial: Vec::new(),
            count: 0,
        }
    }

    /// Returns `true` once the cap is reached.
    fn feed(&mut self, chunk: &[u8]) -> bool {
        for &byte in chunk {
            if self.count >= self.cap {
                return true;
            }
            if byte.is_ascii_whitespace() {
                self.end_token();
            } else {
                self.partial.push(byte);
            }
        }
        self.count >= self.cap
    }

    fn finish(&mut self) {
        self.end_token();
    }

    fn end_token(&mut self) {
        if self.count < self.cap && self.partial.as_slice() == self.token {
            self.count += 1;
        }
        self.partial.clear();
    }
}
