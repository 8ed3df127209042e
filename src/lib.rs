pub mod analytics;
pub mod commands;
pub mod config;
pub mod db;
pub mod errors;
pub mod filters;
pub mod ingestion;
pub mod media;
pub mod pagination;
pub mod session;
pub mod settings;
pub mod sheets;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::analytics::{AnalyticsRecorder, AnalyticsStore, CounterStore, Interaction, JsonCounterStore};
use crate::commands::{GalleryHealth, GalleryPage, ProductCard};
use crate::config::{AnalyticsBackend, AppConfig};
use crate::db::SqliteCounterStore;
use crate::errors::AppResult;
use crate::ingestion::{Attribute, ColumnMap, Language, Product, RecordNormalizer};
use crate::session::GallerySession;
use crate::settings::{app_data_path, AppData, UpdateAppDataPayload};
use crate::sheets::{SheetFetcher, SourceRef};

pub use crate::errors::AppError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "message", rename_all = "snake_case")]
pub enum FeedStatus {
    Ready,
    Empty,
    Unavailable(String),
}

/// Normalized products for one language plus the state the view should show.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedSnapshot {
    pub status: FeedStatus,
    pub language: Language,
    pub products: Vec<Product>,
    pub skipped_rows: usize,
    pub signature: Option<String>,
    pub fetched_at: Option<DateTime<Utc>>,
    pub from_cache: bool,
}

impl FeedSnapshot {
    fn unavailable(language: Language, message: impl Into<String>) -> Self {
        Self {
            status: FeedStatus::Unavailable(message.into()),
            language,
            products: Vec::new(),
            skipped_rows: 0,
            signature: None,
            fetched_at: None,
            from_cache: false,
        }
    }
}

pub struct Gallery {
    config: AppConfig,
    source: Option<SourceRef>,
    fetcher: SheetFetcher,
    normalizer: RecordNormalizer,
    analytics: AnalyticsRecorder,
    app_data_path: PathBuf,
    app_data_lock: Mutex<()>,
}

impl Gallery {
    pub fn initialize(config: AppConfig) -> AppResult<Self> {
        init_tracing();
        std::fs::create_dir_all(&config.data_dir)?;

        let columns = match config.column_map_path.as_deref() {
            Some(path) => ColumnMap::load(path)?,
            None => ColumnMap::default(),
        };
        let fetcher = SheetFetcher::from_config(&config)?;
        let store: Arc<dyn CounterStore> = match config.analytics_backend {
            AnalyticsBackend::Json => Arc::new(JsonCounterStore::new(
                config.data_dir.join(&config.analytics_file_name),
            )),
            AnalyticsBackend::Sqlite => Arc::new(SqliteCounterStore::open(
                &config.data_dir,
                &config.analytics_database_file_name,
            )?),
        };

        let gallery = Self::from_parts(
            config,
            fetcher,
            RecordNormalizer::new(columns),
            AnalyticsRecorder::new(store),
        );
        info!(
            target: "gallery",
            source = %gallery.source.as_ref().map(SourceRef::cache_key).unwrap_or_default(),
            analytics = %gallery.analytics.location(),
            "gallery initialized"
        );
        Ok(gallery)
    }

    pub fn from_parts(
        config: AppConfig,
        fetcher: SheetFetcher,
        normalizer: RecordNormalizer,
        analytics: AnalyticsRecorder,
    ) -> Self {
        Self {
            source: config.source_ref(),
            app_data_path: app_data_path(&config),
            config,
            fetcher,
            normalizer,
            analytics,
            app_data_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn new_session(&self, language: Language) -> GallerySession {
        GallerySession::new(language, self.config.page_increment)
    }

    /// Fetch failures end up in the returned status, never in an error.
    pub async fn load_feed(&self, language: Language) -> FeedSnapshot {
        let Some(source) = self.source.as_ref() else {
            return FeedSnapshot::unavailable(language, "no sheet source configured");
        };

        let snapshot = match self.fetcher.fetch(source).await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(target: "gallery", error = %err, "sheet unavailable");
                return FeedSnapshot::unavailable(language, err.to_string());
            }
        };

        let batch = self.normalizer.normalize_all(&snapshot.records, language);
        let status = if batch.products.is_empty() {
            FeedStatus::Empty
        } else {
            FeedStatus::Ready
        };
        info!(
            target: "gallery",
            language = language.as_tag(),
            products = batch.products.len(),
            skipped = batch.skipped + snapshot.skipped_rows,
            from_cache = snapshot.from_cache,
            "feed loaded"
        );

        FeedSnapshot {
            status,
            language,
            products: batch.products,
            skipped_rows: batch.skipped + snapshot.skipped_rows,
            signature: Some(snapshot.signature),
            fetched_at: Some(snapshot.fetched_at),
            from_cache: snapshot.from_cache,
        }
    }

    pub fn page(&self, feed: &FeedSnapshot, session: &GallerySession) -> GalleryPage {
        let outcome = filters::apply(&feed.products, &session.filters);
        if outcome.search_narrowed {
            if let Err(err) = self.analytics.record(Interaction::Search, None) {
                warn!(target: "analytics", error = %err, "failed to record search");
            }
        }

        let analytics = self.analytics.snapshot().unwrap_or_else(|err| {
            warn!(target: "analytics", error = %err, "failed to read analytics store");
            AnalyticsStore::default()
        });

        let total = outcome.products.len();
        let items = session
            .cursor
            .visible_slice(&outcome.products)
            .iter()
            .map(|product| ProductCard::from_product(product, session, &analytics))
            .collect::<Vec<_>>();
        let options: BTreeMap<Attribute, Vec<String>> = Attribute::ALL
            .iter()
            .map(|attribute| (*attribute, filters::option_values(&feed.products, *attribute)))
            .collect();

        GalleryPage {
            status: feed.status.clone(),
            language: feed.language,
            visible: items.len(),
            items,
            total_matches: total,
            remaining: session.cursor.remaining(total),
            has_more: session.cursor.has_more(total),
            view_mode: session.view_mode,
            columns: session.view_mode.columns(),
            thumbnail_px: session.view_mode.thumbnail_px(),
            options,
        }
    }

    pub fn record_interaction(&self, interaction: Interaction, product_id: Option<&str>) -> AppResult<()> {
        self.analytics.record(interaction, product_id)?;
        Ok(())
    }

    pub fn analytics(&self) -> AppResult<AnalyticsStore> {
        self.analytics.snapshot()
    }

    pub fn refresh(&self) {
        if let Some(source) = self.source.as_ref() {
            self.fetcher.invalidate(source);
        }
    }

    pub fn app_data(&self) -> AppResult<AppData> {
        let _lock = self.app_data_lock.lock();
        AppData::load(&self.app_data_path)
    }

    pub fn update_app_data(&self, payload: UpdateAppDataPayload) -> AppResult<AppData> {
        let _lock = self.app_data_lock.lock();
        let mut data = AppData::load(&self.app_data_path)?;
        data.apply_patch(&payload);
        data.persist(&self.app_data_path)?;
        Ok(data)
    }

    pub fn health(&self) -> GalleryHealth {
        GalleryHealth {
            analytics_location: self.analytics.location(),
            app_data_path: self.app_data_path.display().to_string(),
            cached_sheets: self.fetcher.cached_entries(),
            config: self.config.public_profile(),
        }
    }
}

/// Event targets used across the crate. Each gets `debug` in the default filter.
pub const LOG_TARGETS: [&str; 6] = [
    "sheets",
    "ingestion",
    "analytics",
    "gallery",
    "settings",
    "database_bootstrap",
];

fn default_filter_directives() -> String {
    let mut directives = String::from("info");
    for target in LOG_TARGETS {
        directives.push_str(&format!(",{target}=debug"));
    }
    directives
}

pub fn init_tracing() {
    static INIT: OnceCell<()> = OnceCell::new();
    let _ = INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_filter_directives()));
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use crate::filters::FilterState;
    use crate::ingestion::RawRecord;
    use crate::sheets::{RetryPolicy, SheetRows, SheetSource};
    use async_trait::async_trait;
    use serde_json::Value;
    use std::time::Duration;
    use tempfile::tempdir;

    struct FixedSource {
        rows: Option<Vec<RawRecord>>,
    }

    #[async_trait]
    impl SheetSource for FixedSource {
        async fn fetch_rows(&self, _source: &SourceRef) -> AppResult<SheetRows> {
            match &self.rows {
                Some(rows) => Ok(rows.clone().into()),
                None => Err(AppError::SourceUnavailable("sheet is private".into())),
            }
        }
    }

    fn row(title: &str, color: &str) -> RawRecord {
        let mut record = RawRecord::new();
        record.insert("Title".into(), Value::String(title.into()));
        record.insert("Media".into(), Value::String(format!("https://cdn.example.com/{title}.jpg")));
        record.insert("Kurdish Colors".into(), Value::String(color.into()));
        record
    }

    fn gallery(dir: &std::path::Path, rows: Option<Vec<RawRecord>>) -> Gallery {
        let config = test_config(dir);
        let fetcher = SheetFetcher::new(
            Arc::new(FixedSource { rows }),
            Duration::from_secs(60),
            RetryPolicy::from_config(&config),
        );
        let analytics = AnalyticsRecorder::new(Arc::new(JsonCounterStore::new(
            dir.join(&config.analytics_file_name),
        )));
        Gallery::from_parts(config, fetcher, RecordNormalizer::default(), analytics)
    }

    #[tokio::test]
    async fn pages_through_a_feed() {
        let dir = tempdir().unwrap();
        let rows = (0..30).map(|i| row(&format!("item-{i}"), "Red")).collect();
        let gallery = gallery(dir.path(), Some(rows));
        let mut session = gallery.new_session(Language::Kurdish);

        let feed = gallery.load_feed(Language::Kurdish).await;
        assert_eq!(feed.status, FeedStatus::Ready);
        assert_eq!(feed.products.len(), 30);

        let page = gallery.page(&feed, &session);
        assert_eq!(page.visible, 12);
        assert_eq!(page.remaining, 18);
        assert!(page.has_more);

        session.load_more();
        session.load_more();
        let page = gallery.page(&feed, &session);
        assert_eq!(page.visible, 30);
        assert!(!page.has_more);
    }

    #[tokio::test]
    async fn counts_narrowing_searches_once_per_apply() {
        let dir = tempdir().unwrap();
        let rows = vec![row("chair", "Red"), row("table", "Blue"), row("lamp", "Red")];
        let gallery = gallery(dir.path(), Some(rows));
        let mut session = gallery.new_session(Language::Kurdish);
        let feed = gallery.load_feed(Language::Kurdish).await;

        session.set_filters(FilterState::default().with_search("red"));
        let page = gallery.page(&feed, &session);
        assert_eq!(page.total_matches, 2);
        assert_eq!(gallery.analytics().unwrap().counter("total_searches"), 1);

        session.set_filters(FilterState::default().with_search("example"));
        gallery.page(&feed, &session);
        assert_eq!(gallery.analytics().unwrap().counter("total_searches"), 1);
    }

    #[tokio::test]
    async fn unavailable_source_yields_empty_feed() {
        let dir = tempdir().unwrap();
        let gallery = gallery(dir.path(), None);
        let feed = gallery.load_feed(Language::Arabic).await;
        assert!(matches!(feed.status, FeedStatus::Unavailable(_)));
        assert!(feed.products.is_empty());

        let page = gallery.page(&feed, &gallery.new_session(Language::Arabic));
        assert!(page.items.is_empty());
        assert!(!page.has_more);
    }

    #[tokio::test]
    async fn header_only_sheet_is_empty_not_an_error() {
        let dir = tempdir().unwrap();
        let gallery = gallery(dir.path(), Some(Vec::new()));
        let feed = gallery.load_feed(Language::Kurdish).await;
        assert_eq!(feed.status, FeedStatus::Empty);
        assert!(feed.signature.is_some());
    }

    #[tokio::test]
    async fn cards_carry_favorites_and_stats() {
        let dir = tempdir().unwrap();
        let gallery = gallery(dir.path(), Some(vec![row("chair", "Red")]));
        let mut session = gallery.new_session(Language::Kurdish);
        let feed = gallery.load_feed(Language::Kurdish).await;
        let id = feed.products[0].id.clone();

        session.toggle_favorite(&id);
        gallery.record_interaction(Interaction::Like, Some(&id)).unwrap();
        let page = gallery.page(&feed, &session);
        assert!(page.items[0].is_favorite);
        assert_eq!(page.items[0].stats.likes, 1);
        assert_eq!(page.options[&Attribute::Color], vec!["Red".to_string()]);
    }

    #[tokio::test]
    async fn load_gallery_page_command_returns_the_page() {
        let dir = tempdir().unwrap();
        let gallery = gallery(dir.path(), Some(vec![row("chair", "Red"), row("lamp", "White")]));
        let session = gallery.new_session(Language::Kurdish);
        let page = commands::load_gallery_page(&gallery, &session).await;
        assert_eq!(page.status, FeedStatus::Ready);
        assert_eq!(page.total_matches, 2);

        let offline_dir = tempdir().unwrap();
        let offline = self::gallery(offline_dir.path(), None);
        let page = commands::load_gallery_page(&offline, &session).await;
        assert!(matches!(page.status, FeedStatus::Unavailable(_)));
        assert!(page.items.is_empty());
    }

    #[test]
    fn default_filter_enables_every_log_target() {
        let directives = default_filter_directives();
        assert!(directives.starts_with("info,"));
        for target in LOG_TARGETS {
            assert!(directives.contains(&format!("{target}=debug")), "{target}");
        }
        assert!(EnvFilter::try_new(&directives).is_ok());
    }

    #[test]
    fn updates_app_data() {
        let dir = tempdir().unwrap();
        let gallery = gallery(dir.path(), None);
        assert_eq!(gallery.app_data().unwrap().language, Language::Kurdish);

        let updated = gallery
            .update_app_data(UpdateAppDataPayload {
                language: Some(Language::Arabic),
                logo_url: None,
            })
            .unwrap();
        assert_eq!(updated.language, Language::Arabic);
        assert_eq!(gallery.app_data().unwrap().language, Language::Arabic);
    }
}
