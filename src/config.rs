use std::path::PathBuf;
use std::{env, io};

use secrecy::SecretString;
use serde::Serialize;
use tracing::debug;

use crate::sheets::SourceRef;

const DEFAULT_SHEETS_API_BASE: &str = "https://sheets.googleapis.com";
const DEFAULT_SHEET_RANGE: &str = "Sheet1";
const DEFAULT_CACHE_TTL_SECS: u64 = 300;
const DEFAULT_FETCH_ATTEMPTS: u32 = 3;
const MAX_FETCH_ATTEMPTS: u32 = 10;
const DEFAULT_BACKOFF_MS: u64 = 250;
const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 15;
pub const DEFAULT_PAGE_INCREMENT: usize = 12;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalyticsBackend {
    Json,
    Sqlite,
}

impl AnalyticsBackend {
    fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "sqlite" | "sql" | "db" => AnalyticsBackend::Sqlite,
            _ => AnalyticsBackend::Json,
        }
    }
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub sheet_csv_url: Option<String>,
    pub google_sheet_id: Option<String>,
    pub google_sheet_range: String,
    pub google_sheets_api_base: String,
    pub google_sheets_api_key: Option<SecretString>,
    pub sheet_cache_ttl_secs: u64,
    pub fetch_max_attempts: u32,
    pub fetch_backoff_ms: u64,
    pub fetch_timeout_secs: u64,
    pub page_increment: usize,
    pub data_dir: PathBuf,
    pub app_data_file_name: String,
    pub analytics_backend: AnalyticsBackend,
    pub analytics_file_name: String,
    pub analytics_database_file_name: String,
    pub column_map_path: Option<PathBuf>,
}

#[derive(Clone, Debug, Serialize)]
pub struct PublicAppConfig {
    pub sheet_csv_url: Option<String>,
    pub google_sheet_id: Option<String>,
    pub google_sheet_range: String,
    pub google_sheets_api_base: String,
    pub sheet_cache_ttl_secs: u64,
    pub fetch_max_attempts: u32,
    pub fetch_backoff_ms: u64,
    pub page_increment: usize,
    pub data_dir: String,
    pub analytics_backend: AnalyticsBackend,
    pub has_google_sheets_api_key: bool,
    pub has_custom_column_map: bool,
}

impl AppConfig {
    pub fn from_env() -> Self {
        load_dotenv_if_applicable();
        Self {
            sheet_csv_url: non_empty_var("SHEET_CSV_URL"),
            google_sheet_id: non_empty_var("GOOGLE_SHEET_ID"),
            google_sheet_range: non_empty_var("GOOGLE_SHEET_RANGE")
                .unwrap_or_else(|| DEFAULT_SHEET_RANGE.to_string()),
            google_sheets_api_base: non_empty_var("GOOGLE_SHEETS_API_BASE")
                .unwrap_or_else(|| DEFAULT_SHEETS_API_BASE.to_string()),
            google_sheets_api_key: non_empty_var("GOOGLE_SHEETS_API_KEY").map(SecretString::from),
            sheet_cache_ttl_secs: parse_u64("SHEET_CACHE_TTL_SECS", DEFAULT_CACHE_TTL_SECS),
            fetch_max_attempts: parse_u32("FETCH_MAX_ATTEMPTS", DEFAULT_FETCH_ATTEMPTS)
                .clamp(1, MAX_FETCH_ATTEMPTS),
            fetch_backoff_ms: parse_u64("FETCH_BACKOFF_MS", DEFAULT_BACKOFF_MS),
            fetch_timeout_secs: parse_u64("FETCH_TIMEOUT_SECS", DEFAULT_FETCH_TIMEOUT_SECS).max(1),
            page_increment: parse_usize("PAGE_INCREMENT", DEFAULT_PAGE_INCREMENT).max(1),
            data_dir: non_empty_var("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("data")),
            app_data_file_name: non_empty_var("APP_DATA_FILE_NAME")
                .unwrap_or_else(|| "app_data.json".to_string()),
            analytics_backend: non_empty_var("ANALYTICS_BACKEND")
                .map(|value| AnalyticsBackend::parse(&value))
                .unwrap_or(AnalyticsBackend::Json),
            analytics_file_name: non_empty_var("ANALYTICS_FILE_NAME")
                .unwrap_or_else(|| "analytics.json".to_string()),
            analytics_database_file_name: non_empty_var("ANALYTICS_DATABASE_FILE_NAME")
                .unwrap_or_else(|| "analytics.db".to_string()),
            column_map_path: non_empty_var("COLUMN_MAP_PATH").map(PathBuf::from),
        }
    }

    /// CSV export URL wins over the values API when both are configured.
    pub fn source_ref(&self) -> Option<SourceRef> {
        if let Some(url) = &self.sheet_csv_url {
            return Some(SourceRef::CsvExport { url: url.clone() });
        }
        self.google_sheet_id
            .as_ref()
            .map(|spreadsheet_id| SourceRef::ValuesApi {
                spreadsheet_id: spreadsheet_id.clone(),
                range: self.google_sheet_range.clone(),
            })
    }

    pub fn public_profile(&self) -> PublicAppConfig {
        PublicAppConfig {
            sheet_csv_url: self.sheet_csv_url.clone(),
            google_sheet_id: self.google_sheet_id.clone(),
            google_sheet_range: self.google_sheet_range.clone(),
            google_sheets_api_base: self.google_sheets_api_base.clone(),
            sheet_cache_ttl_secs: self.sheet_cache_ttl_secs,
            fetch_max_attempts: self.fetch_max_attempts,
            fetch_backoff_ms: self.fetch_backoff_ms,
            page_increment: self.page_increment,
            data_dir: self.data_dir.to_string_lossy().to_string(),
            analytics_backend: self.analytics_backend,
            has_google_sheets_api_key: self.google_sheets_api_key.is_some(),
            has_custom_column_map: self.column_map_path.is_some(),
        }
    }
}

fn load_dotenv_if_applicable() {
    if !should_load_dotenv() {
        debug!("skipping .env load outside dev mode");
        return;
    }

    if let Err(err) = dotenvy::dotenv() {
        match &err {
            dotenvy::Error::Io(io_err) if io_err.kind() == io::ErrorKind::NotFound => {}
            _ => debug!(?err, "unable to load .env file"),
        }
    }
}

fn should_load_dotenv() -> bool {
    cfg!(debug_assertions) || parse_bool("ALLOW_DOTENV", false)
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "True"))
        .unwrap_or(default)
}

fn parse_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn parse_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

fn parse_u32(key: &str, default: u32) -> u32 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u32>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
pub(crate) fn test_config(data_dir: &std::path::Path) -> AppConfig {
    AppConfig {
        sheet_csv_url: None,
        google_sheet_id: Some("sheet-id".into()),
        google_sheet_range: DEFAULT_SHEET_RANGE.into(),
        google_sheets_api_base: DEFAULT_SHEETS_API_BASE.into(),
        google_sheets_api_key: None,
        sheet_cache_ttl_secs: 60,
        fetch_max_attempts: 3,
        fetch_backoff_ms: 1,
        fetch_timeout_secs: 5,
        page_increment: DEFAULT_PAGE_INCREMENT,
        data_dir: data_dir.to_path_buf(),
        app_data_file_name: "app_data.json".into(),
        analytics_backend: AnalyticsBackend::Json,
        analytics_file_name: "analytics.json".into(),
        analytics_database_file_name: "analytics.db".into(),
        column_map_path: None,
    }
}
