use std::path::Path;

use httptest::matchers::{all_of, request};
use httptest::responders::{json_encoded, status_code};
use httptest::{Expectation, Server};
use serde_json::json;
use tempfile::tempdir;

use product_gallery_lib::analytics::Interaction;
use product_gallery_lib::config::{AnalyticsBackend, AppConfig};
use product_gallery_lib::filters::{FilterState, SortOrder};
use product_gallery_lib::ingestion::{Attribute, Language};
use product_gallery_lib::{FeedStatus, Gallery};

const SAMPLE_CSV: &str = "\
ID,Title,Media,Kurdish Tags,Kurdish Colors,Arabic Colors,Price
1,Oak chair,https://cdn.example.com/chair.jpg,chair,\"Red, Dark Red\",أحمر,120
2,Glass table,https://youtu.be/dQw4w9WgXcQ,table,Blue,أزرق,300
,,,,,,
3,Lamp,https://cdn.example.com/lamp.mp4,light,White,أبيض,45
";

fn config(data_dir: &Path) -> AppConfig {
    AppConfig {
        sheet_csv_url: None,
        google_sheet_id: None,
        google_sheet_range: "Sheet1".into(),
        google_sheets_api_base: "https://sheets.googleapis.com".into(),
        google_sheets_api_key: None,
        sheet_cache_ttl_secs: 300,
        fetch_max_attempts: 3,
        fetch_backoff_ms: 1,
        fetch_timeout_secs: 5,
        page_increment: 2,
        data_dir: data_dir.to_path_buf(),
        app_data_file_name: "app_data.json".into(),
        analytics_backend: AnalyticsBackend::Json,
        analytics_file_name: "analytics.json".into(),
        analytics_database_file_name: "analytics.db".into(),
        column_map_path: None,
    }
}

#[tokio::test]
async fn csv_export_feeds_the_gallery_and_is_cached() {
    let server = Server::run();
    server.expect(
        Expectation::matching(all_of![
            request::method("GET"),
            request::path("/export.csv")
        ])
        .times(1)
        .respond_with(status_code(200).body(SAMPLE_CSV)),
    );

    let dir = tempdir().unwrap();
    let mut config = config(dir.path());
    config.sheet_csv_url = Some(server.url_str("/export.csv"));
    let gallery = Gallery::initialize(config).unwrap();

    let feed = gallery.load_feed(Language::Kurdish).await;
    assert_eq!(feed.status, FeedStatus::Ready);
    let titles: Vec<&str> = feed.products.iter().map(|p| p.title.as_str()).collect();
    assert_eq!(titles, vec!["Oak chair", "Glass table", "Lamp"]);
    assert_eq!(feed.products[0].id, "1");
    assert_eq!(feed.products[1].media_kind().as_str(), "youtube_video");

    let again = gallery.load_feed(Language::Arabic).await;
    assert!(again.from_cache);
    assert_eq!(again.signature, feed.signature);
    assert_eq!(again.products[0].field(Attribute::Color), "أحمر");

    let mut session = gallery.new_session(Language::Kurdish);
    let page = gallery.page(&feed, &session);
    assert_eq!(page.visible, 2);
    assert!(page.has_more);

    session.set_filters(
        FilterState::default()
            .with_search("red")
            .with_sort(SortOrder::Newest),
    );
    let page = gallery.page(&feed, &session);
    assert_eq!(page.total_matches, 1);
    assert_eq!(page.items[0].title, "Oak chair");
    assert_eq!(page.items[0].colors, vec!["Dark Red".to_string(), "Red".into()]);
    assert_eq!(gallery.analytics().unwrap().counter("total_searches"), 1);
}

#[tokio::test]
async fn values_api_rows_are_normalized() {
    let server = Server::run();
    server.expect(
        Expectation::matching(all_of![
            request::method("GET"),
            request::path("/v4/spreadsheets/sheet-123/values/Sheet1")
        ])
        .times(1)
        .respond_with(json_encoded(json!({
            "range": "Sheet1!A1:C3",
            "values": [
                ["Title", "Media", "Kurdish Materials"],
                ["Bench", "https://cdn.example.com/bench.webp", "Oak, Steel"],
                ["Stool", "https://cdn.example.com/stool.png"]
            ]
        }))),
    );

    let dir = tempdir().unwrap();
    let mut config = config(dir.path());
    config.google_sheet_id = Some("sheet-123".into());
    config.google_sheets_api_base = server.url_str("/");
    let gallery = Gallery::initialize(config).unwrap();

    let feed = gallery.load_feed(Language::Kurdish).await;
    assert_eq!(feed.status, FeedStatus::Ready);
    assert_eq!(feed.products.len(), 2);
    assert_eq!(feed.products[0].field(Attribute::Material), "Oak, Steel");
    assert_eq!(feed.products[1].field(Attribute::Material), "");
}

#[tokio::test]
async fn undecodable_csv_rows_are_skipped_and_counted() {
    let mut body = b"Title,Media\nOak chair,https://cdn.example.com/chair.jpg\n".to_vec();
    body.extend_from_slice(b"Broken \xff\xfe,https://cdn.example.com/x.jpg\n");
    body.extend_from_slice(b"Lamp,https://cdn.example.com/lamp.jpg\n");

    let server = Server::run();
    server.expect(
        Expectation::matching(request::path("/latin1.csv"))
            .times(1)
            .respond_with(status_code(200).body(body)),
    );

    let dir = tempdir().unwrap();
    let mut config = config(dir.path());
    config.sheet_csv_url = Some(server.url_str("/latin1.csv"));
    let gallery = Gallery::initialize(config).unwrap();

    let feed = gallery.load_feed(Language::Kurdish).await;
    assert_eq!(feed.status, FeedStatus::Ready);
    let titles: Vec<&str> = feed.products.iter().map(|p| p.title.as_str()).collect();
    assert_eq!(titles, vec!["Oak chair", "Lamp"]);
    assert_eq!(feed.skipped_rows, 1);

    let cached = gallery.load_feed(Language::Kurdish).await;
    assert!(cached.from_cache);
    assert_eq!(cached.skipped_rows, 1);
}

#[tokio::test]
async fn not_found_is_not_retried() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::path("/missing.csv"))
            .times(1)
            .respond_with(status_code(404)),
    );

    let dir = tempdir().unwrap();
    let mut config = config(dir.path());
    config.sheet_csv_url = Some(server.url_str("/missing.csv"));
    let gallery = Gallery::initialize(config).unwrap();

    let feed = gallery.load_feed(Language::Kurdish).await;
    assert!(matches!(feed.status, FeedStatus::Unavailable(_)));
    assert!(feed.products.is_empty());
}

#[tokio::test]
async fn server_errors_are_retried_up_to_the_limit() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::path("/flaky.csv"))
            .times(3)
            .respond_with(status_code(503)),
    );

    let dir = tempdir().unwrap();
    let mut config = config(dir.path());
    config.sheet_csv_url = Some(server.url_str("/flaky.csv"));
    let gallery = Gallery::initialize(config).unwrap();

    let feed = gallery.load_feed(Language::Kurdish).await;
    assert!(matches!(feed.status, FeedStatus::Unavailable(_)));
    assert_eq!(gallery.health().cached_sheets, 0);
}

#[tokio::test]
async fn sqlite_backend_persists_interactions() {
    let dir = tempdir().unwrap();
    let mut config = config(dir.path());
    config.analytics_backend = AnalyticsBackend::Sqlite;
    {
        let gallery = Gallery::initialize(config.clone()).unwrap();
        gallery.record_interaction(Interaction::Like, Some("1")).unwrap();
        gallery.record_interaction(Interaction::View, Some("1")).unwrap();
        gallery.record_interaction(Interaction::View, None).unwrap();
    }

    let reopened = Gallery::initialize(config).unwrap();
    let store = reopened.analytics().unwrap();
    assert_eq!(store.counter("total_views"), 2);
    assert_eq!(store.product("1").views, 1);
    assert_eq!(store.product("1").likes, 1);
    assert!(dir.path().join("analytics.db").exists());
}
