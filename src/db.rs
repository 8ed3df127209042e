use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::ffi::ErrorCode;
use rusqlite::{params, Connection, Error as SqliteError, OpenFlags, OptionalExtension};
use tracing::{info, warn};

use crate::analytics::{AnalyticsStore, CounterStore, ProductMetric, ProductStats};
use crate::errors::{AppError, AppResult};

pub struct DatabaseContext {
    pub connection: Connection,
    pub path: PathBuf,
}

pub struct DatabaseBootstrap {
    pub context: DatabaseContext,
    pub recovered: bool,
}

pub fn bootstrap<P: AsRef<Path>>(data_dir: P, database_file: &str) -> AppResult<DatabaseBootstrap> {
    let data_dir = data_dir.as_ref();
    std::fs::create_dir_all(data_dir)?;
    let db_path = data_dir.join(database_file);

    match establish_context(&db_path) {
        Ok(context) => {
            info!(
                target: "database_bootstrap",
                path = %db_path.display(),
                "analytics database ready"
            );
            Ok(DatabaseBootstrap {
                context,
                recovered: false,
            })
        }
        Err(AppError::Database(err)) if should_attempt_recovery(&err, &db_path) => {
            warn!(
                target: "database_bootstrap",
                path = %db_path.display(),
                error = %err,
                "analytics database failed to open, recreating it"
            );
            remove_store_files(&db_path)?;
            let context = establish_context(&db_path)?;
            Ok(DatabaseBootstrap {
                context,
                recovered: true,
            })
        }
        Err(err) => Err(err),
    }
}

fn establish_context(db_path: &Path) -> AppResult<DatabaseContext> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE;
    let connection = Connection::open_with_flags(db_path, flags)?;
    connection.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA busy_timeout = 5000;
        "#,
    )?;
    run_migrations(&connection)?;

    Ok(DatabaseContext {
        connection,
        path: db_path.to_path_buf(),
    })
}

fn run_migrations(connection: &Connection) -> AppResult<()> {
    connection.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS counters (
            name TEXT PRIMARY KEY,
            value INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS product_stats (
            product_id TEXT PRIMARY KEY,
            likes INTEGER NOT NULL DEFAULT 0,
            views INTEGER NOT NULL DEFAULT 0,
            clicks INTEGER NOT NULL DEFAULT 0,
            link_visits INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS store_meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
        "#,
    )?;
    Ok(())
}

fn should_attempt_recovery(err: &SqliteError, db_path: &Path) -> bool {
    if !db_path.exists() {
        return false;
    }

    match err {
        SqliteError::SqliteFailure(code, message) => {
            matches!(code.code, ErrorCode::NotADatabase | ErrorCode::DatabaseCorrupt)
                || message
                    .as_deref()
                    .map(|msg| msg.contains("database disk image is malformed"))
                    .unwrap_or(false)
        }
        _ => false,
    }
}

fn remove_store_files(db_path: &Path) -> AppResult<()> {
    remove_if_exists(db_path)?;
    remove_if_exists(&sidecar_path(db_path, "wal"))?;
    remove_if_exists(&sidecar_path(db_path, "shm"))?;
    Ok(())
}

fn remove_if_exists(path: &Path) -> AppResult<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(AppError::Io(err)),
    }
}

fn sidecar_path(db_path: &Path, suffix: &str) -> PathBuf {
    let file_name = db_path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    db_path.with_file_name(format!("{file_name}-{suffix}"))
}

/// Counter backend that increments with single-statement UPSERTs, so
/// separate processes sharing the file never lose updates.
pub struct SqliteCounterStore {
    connection: Mutex<Connection>,
    path: PathBuf,
}

impl SqliteCounterStore {
    pub fn open<P: AsRef<Path>>(data_dir: P, database_file: &str) -> AppResult<Self> {
        let bootstrap = bootstrap(data_dir, database_file)?;
        Ok(Self::from_context(bootstrap.context))
    }

    pub fn from_context(context: DatabaseContext) -> Self {
        Self {
            connection: Mutex::new(context.connection),
            path: context.path,
        }
    }
}

impl CounterStore for SqliteCounterStore {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn load(&self) -> AppResult<AnalyticsStore> {
        let connection = self.connection.lock();
        read_store(&connection)
    }

    fn save(&self, store: &AnalyticsStore) -> AppResult<()> {
        let mut connection = self.connection.lock();
        let tx = connection.transaction()?;
        tx.execute("DELETE FROM counters", [])?;
        tx.execute("DELETE FROM product_stats", [])?;
        for (name, value) in &store.counters {
            tx.execute(
                "INSERT INTO counters (name, value) VALUES (?1, ?2)",
                params![name, to_sql_count(*value)],
            )?;
        }
        for (product_id, stats) in &store.product_stats {
            tx.execute(
                "INSERT INTO product_stats (product_id, likes, views, clicks, link_visits)
                VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    product_id,
                    to_sql_count(stats.likes),
                    to_sql_count(stats.views),
                    to_sql_count(stats.clicks),
                    to_sql_count(stats.link_visits)
                ],
            )?;
        }
        match store.updated_at {
            Some(updated_at) => write_updated_at(&tx, updated_at)?,
            None => {
                tx.execute("DELETE FROM store_meta WHERE key = 'updated_at'", [])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn increment(&self, counter_name: &str, product_id: Option<&str>) -> AppResult<AnalyticsStore> {
        let mut connection = self.connection.lock();
        let tx = connection.transaction()?;
        tx.execute(
            "INSERT INTO counters (name, value) VALUES (?1, 1)
            ON CONFLICT(name) DO UPDATE SET value = value + 1",
            [counter_name],
        )?;
        if let (Some(product_id), Some(metric)) =
            (product_id, ProductMetric::from_counter(counter_name))
        {
            // Column name comes from a closed enum, never from input.
            let column = metric.column();
            let sql = format!(
                "INSERT INTO product_stats (product_id, {column}) VALUES (?1, 1)
                ON CONFLICT(product_id) DO UPDATE SET {column} = {column} + 1"
            );
            tx.execute(&sql, [product_id])?;
        }
        write_updated_at(&tx, Utc::now())?;
        tx.commit()?;
        read_store(&connection)
    }
}

fn read_store(connection: &Connection) -> AppResult<AnalyticsStore> {
    let mut store = AnalyticsStore::default();

    let mut stmt = connection.prepare("SELECT name, value FROM counters")?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
    })?;
    for row in rows {
        let (name, value) = row?;
        store.counters.insert(name, from_sql_count(value));
    }

    let mut stmt = connection
        .prepare("SELECT product_id, likes, views, clicks, link_visits FROM product_stats")?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            ProductStats {
                likes: from_sql_count(row.get(1)?),
                views: from_sql_count(row.get(2)?),
                clicks: from_sql_count(row.get(3)?),
                link_visits: from_sql_count(row.get(4)?),
            },
        ))
    })?;
    for row in rows {
        let (product_id, stats) = row?;
        store.product_stats.insert(product_id, stats);
    }

    let updated_at: Option<String> = connection
        .query_row(
            "SELECT value FROM store_meta WHERE key = 'updated_at'",
            [],
            |row| row.get(0),
        )
        .optional()?;
    store.updated_at = updated_at.and_then(|raw| {
        DateTime::parse_from_rfc3339(&raw)
            .map(|parsed| parsed.with_timezone(&Utc))
            .ok()
    });

    Ok(store)
}

fn write_updated_at(connection: &Connection, updated_at: DateTime<Utc>) -> AppResult<()> {
    connection.execute(
        "INSERT INTO store_meta (key, value) VALUES ('updated_at', ?1)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        [updated_at.to_rfc3339()],
    )?;
    Ok(())
}

fn to_sql_count(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn from_sql_count(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}
