//! HTTP surface over fixture-backed feeds.
//!
//! Endpoints: GET /health, /events, /events/stream, /debug/location-cache

use axum::{body::Body, Router};
use http::{Request, StatusCode};
use event_aggregator::config::{AggregatorConfig, FeedConfig, FeedKind};
use serde_json::Value;
use tower::ServiceExt; // for oneshot

fn fixture(name: &str) -> std::path::PathBuf {
    std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

fn build_app(tmp: &tempfile::TempDir) -> Router {
    let cfg = AggregatorConfig {
        location_cache_path: tmp.path().join("locations.json"),
        per_task_timeout_ms: 2_000,
        feeds: vec![
            FeedConfig {
                name: "agenda-oeste".into(),
                kind: FeedKind::Rss,
                url: None,
                fixture_path: Some(fixture("agenda_rss.xml")),
                default_category: None,
                default_venue: Some("Club Social Moreno".into()),
            },
            FeedConfig {
                name: "listings".into(),
                kind: FeedKind::Json,
                url: None,
                fixture_path: Some(fixture("listings.json")),
                default_category: Some("general".into()),
                default_venue: None,
            },
        ],
        ..Default::default()
    };
    event_aggregator::app_from_config(&cfg)
}

async fn get(app: &Router, uri: &str) -> (StatusCode, String) {
    let req = Request::builder().uri(uri).body(Body::empty()).expect("request build");
    let resp = app.clone().oneshot(req).await.expect("router response");
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("body bytes");
    (status, String::from_utf8_lossy(&bytes).to_string())
}

async fn get_json(app: &Router, uri: &str) -> (StatusCode, Value) {
    let (status, body) = get(app, uri).await;
    (status, serde_json::from_str(&body).expect("json body"))
}

fn titles(v: &Value) -> Vec<String> {
    v["events"]
        .as_array()
        .expect("events array")
        .iter()
        .map(|e| e["title"].as_str().unwrap_or_default().to_string())
        .collect()
}

#[tokio::test]
async fn health_is_ok() {
    let tmp = tempfile::tempdir().unwrap();
    let app = build_app(&tmp);
    let (status, body) = get(&app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "ok");
}

#[tokio::test]
async fn events_merge_both_feeds_with_stats() {
    let tmp = tempfile::tempdir().unwrap();
    let app = build_app(&tmp);
    let (status, v) = get_json(&app, "/events?location=Moreno").await;
    assert_eq!(status, StatusCode::OK);

    // 3 valid RSS items + 4 valid listings, one cross-feed duplicate (the milonga).
    assert_eq!(titles(&v).len(), 6);

    let stats = &v["per_source_stats"];
    assert_eq!(stats["agenda-oeste"]["raw_count"], 4);
    assert_eq!(stats["agenda-oeste"]["normalized_count"], 3);
    assert_eq!(stats["listings"]["raw_count"], 5);
    assert_eq!(stats["listings"]["normalized_count"], 4);
    assert_eq!(stats["listings"]["outcome"]["status"], "success");
    let kept = stats["agenda-oeste"]["kept_count"].as_u64().unwrap()
        + stats["listings"]["kept_count"].as_u64().unwrap();
    assert_eq!(kept, 6);

    // Undated workshop sorts last.
    assert_eq!(titles(&v).last().map(String::as_str), Some("Taller de Cerámica"));
}

#[tokio::test]
async fn category_and_date_window_filter() {
    let tmp = tempfile::tempdir().unwrap();
    let app = build_app(&tmp);

    let (_, music) = get_json(&app, "/events?location=Moreno&category=Music").await;
    assert_eq!(titles(&music), vec!["Recital en la Plaza", "Festival en Capital"]);

    let (_, window) = get_json(&app, "/events?location=Moreno&from=2025-10-19&to=2025-10-20").await;
    assert_eq!(titles(&window), vec!["Feria de Libros Usados", "Recital en la Plaza"]);

    let (_, limited) = get_json(&app, "/events?location=Moreno&limit=2").await;
    assert_eq!(titles(&limited).len(), 2);
}

#[tokio::test]
async fn bad_params_are_400_with_error_body() {
    let tmp = tempfile::tempdir().unwrap();
    let app = build_app(&tmp);

    for uri in [
        "/events?location=",
        "/events?location=Moreno&radius_km=10",
        "/events?location=Moreno&limit=0",
        "/events?location=Moreno&from=2025-10-20&to=2025-10-19",
        "/events?location=Moreno&from=someday",
        "/events?location=Moreno&radius_km=abc&lat=-34.6&lon=-58.8",
        "/events?location=Moreno&limit=-5",
        "/events/stream?location=Moreno&lat=north",
    ] {
        let (status, body) = get(&app, uri).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
        let v: Value = serde_json::from_str(&body).expect("json error body");
        assert!(v["error"].as_str().is_some(), "{uri}");
    }
}

#[tokio::test]
async fn stream_emits_one_source_event_per_feed_then_done() {
    let tmp = tempfile::tempdir().unwrap();
    let app = build_app(&tmp);
    let (status, body) = get(&app, "/events/stream?location=Moreno").await;
    assert_eq!(status, StatusCode::OK);
    let events: Vec<&str> = body
        .lines()
        .filter_map(|l| l.strip_prefix("event:"))
        .map(str::trim)
        .collect();
    assert_eq!(events, vec!["source", "source", "done"]);
    assert!(body.contains("\"source_name\":\"listings\""));
}

#[tokio::test]
async fn location_cache_debug_reports_store() {
    let tmp = tempfile::tempdir().unwrap();
    let app = build_app(&tmp);
    let (status, v) = get_json(&app, "/debug/location-cache").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v["entries"], 0);
    assert!(v["store"].as_str().unwrap().ends_with("locations.json"));
}
