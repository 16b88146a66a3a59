//! Integration tests for the source catalog: feed sync, registration and
//! removal.
//!
//! Each test creates its own in-memory SQLite database and mock provider.

use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{header, method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use scribe::config::Config;
use scribe::provider::Providers;
use scribe::refresh::{RefreshError, Refresher, RegisterSource};
use scribe::storage::{Database, SourceType};

const CATEGORY: &str = "user/u1/category/skate";

async fn test_refresher(server: &MockServer) -> Refresher {
    let mut config = Config::default();
    config.youtube.base_url = server.uri();
    config.youtube.api_key = Some("yt-key".to_string());
    config.vimeo.base_url = server.uri();
    config.vimeo.access_token = Some("vimeo-token".to_string());
    config.feedly.base_url = server.uri();
    config.feedly.access_token = Some("feedly-token".to_string());
    config.feedly.category_id = Some(CATEGORY.to_string());
    config.refresh.default_lang = "es".to_string();

    let db = Database::open(":memory:").await.unwrap();
    Refresher::new(db, Providers::new(&config).unwrap(), &config)
}

async fn mount_collection(server: &MockServer, feeds: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path_regex(r"^/v3/collections/.+"))
        .and(header("Authorization", "Bearer feedly-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "id": CATEGORY,
            "label": "skate",
            "feeds": feeds
        }])))
        .mount(server)
        .await;
}

fn feed(host: &str, title: &str) -> serde_json::Value {
    json!({
        "id": format!("feed/https://{}/rss", host),
        "title": title,
        "website": format!("https://{}", host),
        "language": "en",
        "updated": 1_700_000_000_000i64
    })
}

fn register(url: &str) -> RegisterSource {
    RegisterSource {
        url: url.to_string(),
        source_type: None,
        lang: "en".to_string(),
        curated: true,
    }
}

// ============================================================================
// Feed Sync
// ============================================================================

#[tokio::test]
async fn test_feed_sync_superset_appends_in_listing_order() {
    let server = MockServer::start().await;
    mount_collection(&server, json!([feed("a.example.com", "A"), feed("b.example.com", "B")])).await;

    let refresher = test_refresher(&server).await;
    let first = refresher.sync_feed().await.unwrap();
    assert_eq!(
        first.iter().map(|s| (s.title.as_str(), s.order)).collect::<Vec<_>>(),
        vec![("A", 1), ("B", 2)]
    );
    let before = refresher.database().list_sources(&[]).await.unwrap();

    server.reset().await;
    mount_collection(
        &server,
        json!([
            feed("c.example.com", "C"),
            { "id": "feed/https://a.example.com/rss", "title": "A renamed upstream" },
            feed("b.example.com", "B"),
            feed("d.example.com", "D")
        ]),
    )
    .await;

    let second = refresher.sync_feed().await.unwrap();
    assert_eq!(
        second.iter().map(|s| (s.title.as_str(), s.order)).collect::<Vec<_>>(),
        vec![("C", 3), ("D", 4)]
    );

    let after = refresher.database().list_sources(&[]).await.unwrap();
    assert_eq!(after.len(), 4);
    // Pre-existing sources are untouched, metadata changes included
    assert_eq!(&after[..2], &before[..]);
    assert_eq!(after[0].title, "A");

    // Nothing new upstream: nothing created
    assert!(refresher.sync_feed().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_feed_sync_source_fields() {
    let server = MockServer::start().await;
    mount_collection(
        &server,
        json!([
            feed("a.example.com", "A"),
            { "id": "feed/https://b.example.com/rss", "title": "B", "iconUrl": "https://b.example.com/icon.png" }
        ]),
    )
    .await;

    let refresher = test_refresher(&server).await;
    let created = refresher.sync_feed().await.unwrap();

    assert_eq!(created[0].source_type, SourceType::Rss);
    assert_eq!(created[0].source_id, "feed/https://a.example.com/rss");
    assert_eq!(created[0].website_url, "https://a.example.com");
    assert_eq!(created[0].lang, "en");
    assert_eq!(created[0].published_at.map(|t| t.timestamp()), Some(1_700_000_000));
    assert!(created[0].curated);

    // Missing language falls back to the configured default
    assert_eq!(created[1].lang, "es");
    assert_eq!(created[1].icon_url, "https://b.example.com/icon.png");
    assert_eq!(created[1].refreshed_at, None);
}

#[tokio::test]
async fn test_feed_sync_upstream_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/v3/collections/.+"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let refresher = test_refresher(&server).await;
    let err = refresher.sync_feed().await.unwrap_err();
    assert!(matches!(err, RefreshError::AdapterFetch(_)));
    assert!(refresher.database().list_sources(&[]).await.unwrap().is_empty());
}

// ============================================================================
// Registration
// ============================================================================

async fn mount_youtube_channel(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/channels"))
        .and(query_param("id", "UCskate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [{
                "id": "UCskate",
                "snippet": {
                    "title": "Skate Channel",
                    "description": "Clips",
                    "customUrl": "@skate",
                    "publishedAt": "2012-05-01T00:00:00Z",
                    "thumbnails": { "default": { "url": "https://yt3.example.com/icon.jpg" } }
                },
                "brandingSettings": { "image": { "bannerExternalUrl": "https://yt3.example.com/banner.jpg" } }
            }]
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_register_youtube_channel() {
    let server = MockServer::start().await;
    mount_youtube_channel(&server).await;

    let refresher = test_refresher(&server).await;
    let source = refresher
        .register_source(register("https://www.youtube.com/channel/UCskate"))
        .await
        .unwrap();

    assert_eq!(source.source_type, SourceType::Youtube);
    assert_eq!(source.source_id, "UCskate");
    assert_eq!(source.title, "Skate Channel");
    assert_eq!(source.short_title, "Skate Channel");
    assert_eq!(source.icon_url, "https://yt3.example.com/icon.jpg");
    assert_eq!(source.cover_url, "https://yt3.example.com/banner.jpg");
    assert_eq!(source.website_url, "https://www.youtube.com/@skate");
    assert_eq!(source.order, 1);

    let err = refresher
        .register_source(register("https://youtube.com/channel/UCskate"))
        .await
        .unwrap_err();
    assert!(matches!(err, RefreshError::DuplicateSource(ref id) if id == "UCskate"));
    assert_eq!(refresher.database().list_sources(&[]).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_register_vimeo_user() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/users/skateco"))
        .and(header("Authorization", "bearer vimeo-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "uri": "/users/42",
            "name": "Skate Co",
            "link": "https://vimeo.com/skateco"
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/users/42"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "uri": "/users/42",
            "name": "Skate Co",
            "bio": "Videos",
            "link": "https://vimeo.com/skateco"
        })))
        .mount(&server)
        .await;

    let refresher = test_refresher(&server).await;
    let source = refresher
        .register_source(register("https://vimeo.com/skateco"))
        .await
        .unwrap();

    assert_eq!(source.source_type, SourceType::Vimeo);
    assert_eq!(source.source_id, "42");
    assert_eq!(source.title, "Skate Co");
}

#[tokio::test]
async fn test_register_unknown_channel_is_unsupported() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/users/ghost"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let refresher = test_refresher(&server).await;
    let err = refresher
        .register_source(register("https://vimeo.com/ghost"))
        .await
        .unwrap_err();
    assert!(matches!(err, RefreshError::UnsupportedUrl(_)));

    let err = refresher
        .register_source(RegisterSource {
            source_type: Some(SourceType::Vimeo),
            ..register("https://www.youtube.com/channel/UCskate")
        })
        .await
        .unwrap_err();
    assert!(matches!(err, RefreshError::UnsupportedUrl(_)));

    let err = refresher
        .register_source(register("http://192.168.1.10/feed"))
        .await
        .unwrap_err();
    assert!(matches!(err, RefreshError::Validation(_)));

    assert!(refresher.database().list_sources(&[]).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_register_feed_url() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/v3/feeds/.+"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "feed/https://blog.example.com/rss",
            "title": "Example Blog",
            "website": "https://blog.example.com",
            "language": "en"
        })))
        .mount(&server)
        .await;

    let refresher = test_refresher(&server).await;
    let source = refresher
        .register_source(register("https://blog.example.com/rss"))
        .await
        .unwrap();

    assert_eq!(source.source_type, SourceType::Rss);
    assert_eq!(source.source_id, "feed/https://blog.example.com/rss");
    assert_eq!(source.title, "Example Blog");
}

// ============================================================================
// Removal
// ============================================================================

#[tokio::test]
async fn test_removed_source_can_be_registered_again() {
    let server = MockServer::start().await;
    mount_youtube_channel(&server).await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [{
                "id": { "videoId": "v1" },
                "snippet": { "title": "Line", "publishedAt": "2024-03-02T00:00:00Z" }
            }]
        })))
        .mount(&server)
        .await;

    let refresher = test_refresher(&server).await;
    let db = refresher.database();
    let first = refresher
        .register_source(register("https://www.youtube.com/channel/UCskate"))
        .await
        .unwrap();
    assert_eq!(refresher.refresh_source(first.id, false).await.unwrap().len(), 1);

    assert!(db.delete_source(first.id).await.unwrap());
    assert!(!db.delete_source(first.id).await.unwrap());
    assert_eq!(db.count_live_content("v1").await.unwrap(), 0);
    assert!(matches!(
        refresher.refresh_source(first.id, false).await.unwrap_err(),
        RefreshError::SourceNotFound(_)
    ));

    let second = refresher
        .register_source(register("https://www.youtube.com/channel/UCskate"))
        .await
        .unwrap();
    assert_ne!(second.id, first.id);
    assert!(second.order > first.order);

    // Content comes back under the new source
    let created = refresher.refresh_source(second.id, false).await.unwrap();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].source_id, second.id);
    assert_eq!(db.count_live_content("v1").await.unwrap(), 1);
}
