use event_aggregator::config::{FeedConfig, FeedKind};
use event_aggregator::ingest::dedup::dedup_events;
use event_aggregator::ingest::normalize::normalize_records;
use event_aggregator::ingest::providers::build_feed;
use event_aggregator::ingest::providers::json_feed::JsonEventFeed;
use event_aggregator::ingest::providers::rss_feed::RssEventFeed;
use event_aggregator::ingest::types::{FetchQuery, SourceProvider};
use rust_decimal::Decimal;

const AGENDA_XML: &str = include_str!("fixtures/agenda_rss.xml");
const LISTINGS_JSON: &str = include_str!("fixtures/listings.json");

#[tokio::test]
async fn rss_fixture_normalizes_and_drops_untitled_item() {
    let feed = RssEventFeed::from_fixture_str("agenda-oeste", AGENDA_XML);
    let raws = feed.fetch(&FetchQuery::new("Moreno", 50)).await.expect("rss parse ok");
    assert_eq!(raws.len(), 4);

    let out = normalize_records(&feed, &raws);
    assert_eq!(out.events.len(), 3);
    assert_eq!(out.dropped, 1);
    assert!(out.events.iter().all(|e| e.source_name == "agenda-oeste"));
    assert_eq!(out.events[0].title, "Milonga del Oeste");
    assert_eq!(out.events[2].title, r#"Ciclo de Cine "Clásicos""#);
    assert!(out.events.iter().all(|e| e.start_time.is_some()));
    assert_eq!(out.events[2].category, "film");

    let mut q = FetchQuery::new("Moreno", 50);
    q.category = Some("classics".into());
    let classics = feed.fetch(&q).await.expect("rss parse ok");
    assert_eq!(classics.len(), 2, "the cine item plus the uncategorized one");
}

#[tokio::test]
async fn json_fixture_maps_nested_venue_price_and_free_flag() {
    let feed = JsonEventFeed::from_fixture_str("listings", LISTINGS_JSON);
    let raws = feed.fetch(&FetchQuery::new("Moreno", 50)).await.expect("json parse ok");
    assert_eq!(raws.len(), 5);

    let out = normalize_records(&feed, &raws);
    assert_eq!(out.dropped, 1, "unparseable date is dropped");

    let milonga = &out.events[0];
    assert_eq!(milonga.venue_name, "Club Social Moreno");
    assert_eq!(milonga.coordinates(), Some((-34.6502, -58.7894)));
    assert_eq!(milonga.price, Some(Decimal::from(1500)));
    assert_eq!(milonga.currency, "ARS");
    assert!(!milonga.is_free);

    let recital = out.events.iter().find(|e| e.title == "Recital en la Plaza").unwrap();
    assert!(recital.is_free);
    assert_eq!(recital.price, Some(Decimal::ZERO));

    let taller = out.events.iter().find(|e| e.title == "Taller de Cerámica").unwrap();
    assert!(taller.start_time.is_none());
}

#[tokio::test]
async fn both_feeds_share_one_event_after_dedup() {
    let rss = build_feed(&FeedConfig {
        name: "agenda-oeste".into(),
        kind: FeedKind::Rss,
        url: None,
        fixture_path: Some(concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/agenda_rss.xml").into()),
        default_category: None,
        default_venue: Some("Club Social Moreno".into()),
    })
    .expect("rss feed builds");
    let json = build_feed(&FeedConfig {
        name: "listings".into(),
        kind: FeedKind::Json,
        url: None,
        fixture_path: Some(concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/listings.json").into()),
        default_category: None,
        default_venue: None,
    })
    .expect("json feed builds");

    let q = FetchQuery::new("Moreno", 50);
    let mut all = Vec::new();
    for feed in [&rss, &json] {
        let raws = feed.fetch(&q).await.unwrap();
        all.extend(normalize_records(feed.as_ref(), &raws).events);
    }
    assert_eq!(all.len(), 7);

    let (unique, dropped) = dedup_events(all);
    assert_eq!(unique.len(), 6);
    assert_eq!(dropped, 1);
    // First seen wins: the RSS copy came first.
    let milonga = unique.iter().find(|e| e.title.starts_with("Milonga")).unwrap();
    assert_eq!(milonga.source_name, "agenda-oeste");

    let (again, dropped_again) = dedup_events(unique.clone());
    assert_eq!(again, unique);
    assert_eq!(dropped_again, 0);
}
