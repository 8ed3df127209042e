use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[cfg(test)]
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::{AppError, AppResult};

/// Per-product sub-counters. Any other counter name is global only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProductMetric {
    Likes,
    Views,
    Clicks,
    LinkVisits,
}

impl ProductMetric {
    pub const ALL: [ProductMetric; 4] = [
        ProductMetric::Likes,
        ProductMetric::Views,
        ProductMetric::Clicks,
        ProductMetric::LinkVisits,
    ];

    pub fn from_counter(name: &str) -> Option<Self> {
        match name.trim().trim_start_matches("total_") {
            "likes" => Some(ProductMetric::Likes),
            "views" => Some(ProductMetric::Views),
            "clicks" => Some(ProductMetric::Clicks),
            "link_visits" => Some(ProductMetric::LinkVisits),
            _ => None,
        }
    }

    pub fn column(&self) -> &'static str {
        match self {
            ProductMetric::Likes => "likes",
            ProductMetric::Views => "views",
            ProductMetric::Clicks => "clicks",
            ProductMetric::LinkVisits => "link_visits",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interaction {
    View,
    Like,
    Click,
    LinkVisit,
    Search,
}

impl Interaction {
    pub fn counter_name(&self) -> &'static str {
        match self {
            Interaction::View => "total_views",
            Interaction::Like => "total_likes",
            Interaction::Click => "total_clicks",
            Interaction::LinkVisit => "total_link_visits",
            Interaction::Search => "total_searches",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProductStats {
    pub likes: u64,
    pub views: u64,
    pub clicks: u64,
    pub link_visits: u64,
}

impl ProductStats {
    pub fn get(&self, metric: ProductMetric) -> u64 {
        match metric {
            ProductMetric::Likes => self.likes,
            ProductMetric::Views => self.views,
            ProductMetric::Clicks => self.clicks,
            ProductMetric::LinkVisits => self.link_visits,
        }
    }

    fn bump(&mut self, metric: ProductMetric) {
        let slot = match metric {
            ProductMetric::Likes => &mut self.likes,
            ProductMetric::Views => &mut self.views,
            ProductMetric::Clicks => &mut self.clicks,
            ProductMetric::LinkVisits => &mut self.link_visits,
        };
        *slot = slot.saturating_add(1);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticsStore {
    pub counters: BTreeMap<String, u64>,
    pub product_stats: BTreeMap<String, ProductStats>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl AnalyticsStore {
    /// Bumps the global counter and, for product-trackable counters with a
    /// product id, the per-product record as well.
    pub fn increment(&mut self, counter_name: &str, product_id: Option<&str>) {
        let global = self.counters.entry(counter_name.to_string()).or_insert(0);
        *global = global.saturating_add(1);

        if let (Some(product_id), Some(metric)) =
            (product_id, ProductMetric::from_counter(counter_name))
        {
            self.product_stats
                .entry(product_id.to_string())
                .or_default()
                .bump(metric);
        }
        self.updated_at = Some(Utc::now());
    }

    pub fn counter(&self, counter_name: &str) -> u64 {
        self.counters.get(counter_name).copied().unwrap_or(0)
    }

    pub fn product(&self, product_id: &str) -> ProductStats {
        self.product_stats
            .get(product_id)
            .copied()
            .unwrap_or_default()
    }
}

/// Durable backing for the counters.
pub trait CounterStore: Send + Sync {
    fn describe(&self) -> String;

    fn load(&self) -> AppResult<AnalyticsStore>;

    fn save(&self, store: &AnalyticsStore) -> AppResult<()>;

    /// Whole-store load, mutate, save. Callers serialize access.
    fn increment(&self, counter_name: &str, product_id: Option<&str>) -> AppResult<AnalyticsStore> {
        let mut store = self.load()?;
        store.increment(counter_name, product_id);
        self.save(&store)?;
        Ok(store)
    }
}

pub struct JsonCounterStore {
    path: PathBuf,
    #[cfg(test)]
    fault_injector: Option<Arc<TestFaultInjector>>,
}

impl JsonCounterStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            #[cfg(test)]
            fault_injector: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn quarantine_corrupt_file(&self) -> AppResult<()> {
        let file_name = self
            .path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| "analytics.json".into());
        let quarantined = self.path.with_file_name(format!(
            "{file_name}.corrupt-{}",
            Utc::now().format("%Y%m%d%H%M%S")
        ));
        fs::rename(&self.path, &quarantined)?;
        warn!(
            target: "analytics",
            path = %quarantined.display(),
            "moved unreadable analytics file aside"
        );
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl CounterStore for JsonCounterStore {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn load(&self) -> AppResult<AnalyticsStore> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => match serde_json::from_str::<AnalyticsStore>(&contents) {
                Ok(store) => Ok(store),
                Err(err) => {
                    warn!(
                        target: "analytics",
                        error = ?err,
                        "failed to parse analytics file; starting from empty counters"
                    );
                    self.quarantine_corrupt_file()?;
                    Ok(AnalyticsStore::default())
                }
            },
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(AnalyticsStore::default()),
            Err(err) => Err(AppError::Io(err)),
        }
    }

    fn save(&self, store: &AnalyticsStore) -> AppResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        #[cfg(test)]
        if self
            .fault_injector
            .as_ref()
            .map(|hooks| hooks.take_disk_full())
            .unwrap_or(false)
        {
            return Err(AppError::Io(io::Error::new(
                io::ErrorKind::WriteZero,
                "simulated disk full",
            )));
        }

        let serialized = serde_json::to_string_pretty(store)?;
        let temp = self.temp_path();
        fs::write(&temp, serialized)?;
        fs::rename(&temp, &self.path)?;
        Ok(())
    }
}

/// Serializes every load-mutate-save cycle behind one lock so concurrent
/// sessions in this process never lose increments.
#[derive(Clone)]
pub struct AnalyticsRecorder {
    store: Arc<dyn CounterStore>,
    guard: Arc<Mutex<()>>,
}

impl AnalyticsRecorder {
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self {
            store,
            guard: Arc::new(Mutex::new(())),
        }
    }

    pub fn location(&self) -> String {
        self.store.describe()
    }

    pub fn increment(&self, counter_name: &str, product_id: Option<&str>) -> AppResult<AnalyticsStore> {
        let _lock = self.guard.lock();
        let store = self
            .store
            .increment(counter_name, product_id)
            .map_err(|err| AppError::StoreWrite {
                target: self.store.describe(),
                reason: err.to_string(),
            })?;
        debug!(
            target: "analytics",
            counter = counter_name,
            product_id = product_id.unwrap_or("-"),
            value = store.counter(counter_name),
            "counter incremented"
        );
        Ok(store)
    }

    pub fn record(&self, interaction: Interaction, product_id: Option<&str>) -> AppResult<AnalyticsStore> {
        self.increment(interaction.counter_name(), product_id)
    }

    pub fn snapshot(&self) -> AppResult<AnalyticsStore> {
        let _lock = self.guard.lock();
        self.store.load()
    }
}

#[cfg(test)]
#[derive(Default)]
pub struct TestFaultInjector {
    disk_full: AtomicBool,
}

#[cfg(test)]
impl TestFaultInjector {
    pub fn fail_next_disk_full(&self) {
        self.disk_full.store(true, Ordering::SeqCst);
    }

    fn take_disk_full(&self) -> bool {
        self.disk_full.swap(false, Ordering::SeqCst)
    }
}

#[cfg(test)]
impl JsonCounterStore {
    pub fn enable_test_hooks(&mut self) -> Arc<TestFaultInjector> {
        let hooks = Arc::new(TestFaultInjector::default());
        self.fault_injector = Some(hooks.clone());
        hooks
    }
}
