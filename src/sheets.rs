use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use futures_util::StreamExt;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use reqwest::{Client, Url};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};
use crate::ingestion::RawRecord;

const MAX_SHEET_BYTES: u64 = 16 * 1024 * 1024;
const MAX_BACKOFF_EXPONENT: u32 = 6;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceRef {
    CsvExport { url: String },
    ValuesApi { spreadsheet_id: String, range: String },
}

impl SourceRef {
    pub fn cache_key(&self) -> String {
        match self {
            SourceRef::CsvExport { url } => format!("csv:{url}"),
            SourceRef::ValuesApi {
                spreadsheet_id,
                range,
            } => format!("values:{spreadsheet_id}:{range}"),
        }
    }
}

#[async_trait]
pub trait SheetSource: Send + Sync {
    async fn fetch_rows(&self, source: &SourceRef) -> AppResult<SheetRows>;
}

/// Rows decoded from one fetch, plus the count of rows dropped as undecodable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SheetRows {
    pub records: Vec<RawRecord>,
    pub skipped_rows: usize,
}

impl From<Vec<RawRecord>> for SheetRows {
    fn from(records: Vec<RawRecord>) -> Self {
        Self {
            records,
            skipped_rows: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SheetSnapshot {
    pub records: Arc<Vec<RawRecord>>,
    pub skipped_rows: usize,
    pub signature: String,
    pub fetched_at: DateTime<Utc>,
    pub from_cache: bool,
}

impl SheetSnapshot {
    /// Header row present but no data rows.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn changed_since(&self, previous_signature: Option<&str>) -> bool {
        previous_signature
            .map(|previous| previous != self.signature)
            .unwrap_or(true)
    }
}

/// Content hash of the fetched rows, each row serialized with sorted keys.
pub fn sheet_signature(records: &[RawRecord]) -> AppResult<String> {
    let sorted: Vec<BTreeMap<&str, &Value>> = records
        .iter()
        .map(|record| {
            record
                .iter()
                .map(|(column, value)| (column.as_str(), value))
                .collect()
        })
        .collect();
    let serialized = serde_json::to_vec(&sorted)?;
    Ok(STANDARD_NO_PAD.encode(Sha256::digest(&serialized)))
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: StdDuration,
}

impl RetryPolicy {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_attempts: config.fetch_max_attempts.max(1),
            base_backoff: StdDuration::from_millis(config.fetch_backoff_ms),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: StdDuration::from_millis(250),
        }
    }
}

struct CachedSheet {
    records: Arc<Vec<RawRecord>>,
    skipped_rows: usize,
    signature: String,
    fetched_at: DateTime<Utc>,
}

pub struct SheetFetcher {
    source: Arc<dyn SheetSource>,
    ttl: Duration,
    retry: RetryPolicy,
    cache: Mutex<HashMap<String, CachedSheet>>,
    jitter_rng: Mutex<StdRng>,
}

impl SheetFetcher {
    pub fn new(source: Arc<dyn SheetSource>, ttl: StdDuration, retry: RetryPolicy) -> Self {
        Self {
            source,
            ttl: Duration::from_std(ttl).unwrap_or_else(|_| Duration::seconds(300)),
            retry,
            cache: Mutex::new(HashMap::new()),
            jitter_rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    pub fn from_config(config: &AppConfig) -> AppResult<Self> {
        let source = HttpSheetSource::new(config)?;
        Ok(Self::new(
            Arc::new(source),
            StdDuration::from_secs(config.sheet_cache_ttl_secs),
            RetryPolicy::from_config(config),
        ))
    }

    #[cfg(test)]
    fn with_rng(mut self, rng: StdRng) -> Self {
        self.jitter_rng = Mutex::new(rng);
        self
    }

    /// Serves from cache while the entry is younger than the TTL; otherwise
    /// fetches with bounded retries. Every failure surfaces as
    /// `SourceUnavailable`.
    pub async fn fetch(&self, source: &SourceRef) -> AppResult<SheetSnapshot> {
        let key = source.cache_key();
        if let Some(snapshot) = self.cached(&key) {
            debug!(target: "sheets", key = %key, "serving sheet from cache");
            return Ok(snapshot);
        }

        let SheetRows {
            records,
            skipped_rows,
        } = match self.fetch_with_retry(source).await {
            Ok(rows) => rows,
            Err(err @ AppError::SourceUnavailable(_)) => return Err(err),
            Err(err) => return Err(AppError::SourceUnavailable(err.to_string())),
        };
        let signature = sheet_signature(&records)?;
        let fetched_at = Utc::now();
        let records = Arc::new(records);

        info!(
            target: "sheets",
            key = %key,
            rows = records.len(),
            skipped_rows,
            signature = %signature,
            "fetched sheet"
        );

        self.cache.lock().insert(
            key,
            CachedSheet {
                records: Arc::clone(&records),
                skipped_rows,
                signature: signature.clone(),
                fetched_at,
            },
        );

        Ok(SheetSnapshot {
            records,
            skipped_rows,
            signature,
            fetched_at,
            from_cache: false,
        })
    }

    pub fn invalidate(&self, source: &SourceRef) {
        self.cache.lock().remove(&source.cache_key());
    }

    pub fn clear(&self) {
        self.cache.lock().clear();
    }

    pub fn cached_entries(&self) -> usize {
        self.cache.lock().len()
    }

    fn cached(&self, key: &str) -> Option<SheetSnapshot> {
        let cache = self.cache.lock();
        let entry = cache.get(key)?;
        if Utc::now() - entry.fetched_at >= self.ttl {
            return None;
        }
        Some(SheetSnapshot {
            records: Arc::clone(&entry.records),
            skipped_rows: entry.skipped_rows,
            signature: entry.signature.clone(),
            fetched_at: entry.fetched_at,
            from_cache: true,
        })
    }

    async fn fetch_with_retry(&self, source: &SourceRef) -> AppResult<SheetRows> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.source.fetch_rows(source).await {
                Ok(rows) => return Ok(rows),
                Err(err) if err.is_transient() && attempt < self.retry.max_attempts => {
                    let delay = self.backoff_delay(attempt);
                    warn!(
                        target: "sheets",
                        ?err,
                        attempt, "sheet fetch failed; retrying after {:?}", delay
                    );
                    sleep(delay).await;
                }
                Err(err) => {
                    warn!(target: "sheets", ?err, attempt, "sheet fetch failed");
                    return Err(err);
                }
            }
        }
    }

    fn backoff_delay(&self, attempt: u32) -> StdDuration {
        let exponent = (attempt - 1).min(MAX_BACKOFF_EXPONENT);
        let base_ms = self.retry.base_backoff.as_millis() as u64;
        let base = StdDuration::from_millis(base_ms.saturating_mul(1 << exponent));
        if base_ms == 0 {
            return base;
        }
        let jitter_ms = self.jitter_rng.lock().gen_range(0..base_ms);
        base + StdDuration::from_millis(jitter_ms)
    }
}

pub struct HttpSheetSource {
    http: Client,
    api_base: String,
    api_key: Option<SecretString>,
}

impl HttpSheetSource {
    pub fn new(config: &AppConfig) -> AppResult<Self> {
        let http = Client::builder()
            .user_agent("product-gallery/0.1.0")
            .timeout(StdDuration::from_secs(config.fetch_timeout_secs))
            .build()?;
        Ok(Self {
            http,
            api_base: config
                .google_sheets_api_base
                .trim_end_matches('/')
                .to_string(),
            api_key: config.google_sheets_api_key.clone(),
        })
    }

    async fn fetch_csv(&self, url: &str) -> AppResult<SheetRows> {
        let url = Url::parse(url)
            .map_err(|err| AppError::Config(format!("invalid sheet CSV URL: {err}")))?;
        let response = self.http.get(url).send().await?;
        if !response.status().is_success() {
            return Err(AppError::from_status(response.status(), "sheet CSV export"));
        }

        if let Some(length) = response.content_length() {
            if length > MAX_SHEET_BYTES {
                return Err(AppError::SourceUnavailable(format!(
                    "sheet export is {length} bytes; limit is {MAX_SHEET_BYTES}"
                )));
            }
        }

        let mut stream = response.bytes_stream();
        let mut buffer = Vec::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if (buffer.len() + chunk.len()) as u64 > MAX_SHEET_BYTES {
                return Err(AppError::SourceUnavailable(format!(
                    "sheet export exceeds {MAX_SHEET_BYTES} bytes"
                )));
            }
            buffer.extend_from_slice(&chunk);
        }

        parse_csv(&buffer)
    }

    async fn fetch_values(&self, spreadsheet_id: &str, range: &str) -> AppResult<SheetRows> {
        let mut url = Url::parse(&self.api_base)
            .map_err(|err| AppError::Config(format!("invalid Sheets API base URL: {err}")))?;
        url.path_segments_mut()
            .map_err(|_| AppError::Config("invalid Sheets API base".into()))?
            .pop_if_empty()
            .extend(["v4", "spreadsheets", spreadsheet_id, "values", range]);
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("valueRenderOption", "UNFORMATTED_VALUE");
            if let Some(key) = &self.api_key {
                query.append_pair("key", key.expose_secret());
            }
        }

        let response = self.http.get(url).send().await?;
        if !response.status().is_success() {
            return Err(AppError::from_status(response.status(), "sheets values API"));
        }
        let body: ValuesResponse = response.json().await?;
        Ok(rows_to_records(body.values.unwrap_or_default()).into())
    }
}

#[async_trait]
impl SheetSource for HttpSheetSource {
    async fn fetch_rows(&self, source: &SourceRef) -> AppResult<SheetRows> {
        match source {
            SourceRef::CsvExport { url } => self.fetch_csv(url).await,
            SourceRef::ValuesApi {
                spreadsheet_id,
                range,
            } => self.fetch_values(spreadsheet_id, range).await,
        }
    }
}

#[derive(Deserialize)]
struct ValuesResponse {
    #[serde(default)]
    values: Option<Vec<Vec<Value>>>,
}

/// Rows whose cells are not valid UTF-8 are dropped and counted; the
/// header row is decoded lossily instead so the columns stay aligned.
pub fn parse_csv(bytes: &[u8]) -> AppResult<SheetRows> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(bytes);

    let mut rows: Vec<Vec<Value>> = Vec::new();
    let mut skipped_rows = 0;
    for (line, record) in reader.byte_records().enumerate() {
        let record = record?;
        if line == 0 {
            rows.push(
                record
                    .iter()
                    .map(|cell| Value::String(String::from_utf8_lossy(cell).into_owned()))
                    .collect(),
            );
            continue;
        }
        match decode_row(&record) {
            Ok(row) => rows.push(row),
            Err(err) => {
                warn!(
                    target: "sheets",
                    line = line + 1,
                    error = %err,
                    "skipping CSV row with invalid UTF-8"
                );
                skipped_rows += 1;
            }
        }
    }
    Ok(SheetRows {
        records: rows_to_records(rows),
        skipped_rows,
    })
}

fn decode_row(record: &csv::ByteRecord) -> Result<Vec<Value>, std::str::Utf8Error> {
    record
        .iter()
        .map(|cell| std::str::from_utf8(cell).map(|text| Value::String(text.to_string())))
        .collect()
}

/// First row is the header. Short rows are padded with empty strings,
/// blank-header columns and fully blank rows are dropped.
fn rows_to_records(rows: Vec<Vec<Value>>) -> Vec<RawRecord> {
    let mut rows = rows.into_iter();
    let Some(header) = rows.next() else {
        return Vec::new();
    };
    let headers = unique_headers(header.iter().map(|cell| cell_text(cell).trim().to_string()));

    rows.filter(|row| row.iter().any(|cell| !cell_text(cell).trim().is_empty()))
        .map(|row| {
            let mut record = RawRecord::with_capacity(headers.len());
            for (index, column) in headers.iter().enumerate() {
                if column.is_empty() {
                    continue;
                }
                let value = row
                    .get(index)
                    .cloned()
                    .unwrap_or_else(|| Value::String(String::new()));
                record.insert(column.clone(), value);
            }
            record
        })
        .collect()
}

/// Repeated header names get a ` (2)`, ` (3)` ... suffix so no column is
/// overwritten in the row map.
fn unique_headers(headers: impl Iterator<Item = String>) -> Vec<String> {
    let mut taken: HashSet<String> = HashSet::new();
    let mut unique = Vec::new();
    for header in headers {
        if header.is_empty() {
            unique.push(header);
            continue;
        }
        let mut name = header.clone();
        let mut suffix = 1;
        while taken.contains(&name) {
            suffix += 1;
            name = format!("{header} ({suffix})");
        }
        if name != header {
            warn!(target: "sheets", header = %header, renamed = %name, "duplicate sheet header");
        }
        taken.insert(name.clone());
        unique.push(name);
    }
    unique
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
