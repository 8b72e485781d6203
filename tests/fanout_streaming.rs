//! Streaming fan-out: one result per discovered source, in completion order.
//!
//! Covered:
//! - exactly N results for mixes of fast, slow, failing, stuck and panicking sources
//! - a fast source is yielded before a slow one
//! - sources built through the registry (including one that fails to construct)

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use event_aggregator::error::FetchError;
use event_aggregator::ingest::types::{FetchQuery, RawRecord, SourceProvider};
use event_aggregator::ingest::{FanoutEngine, RunOutcome, SourceHandle, SourceRegistry};
use futures::StreamExt;

#[derive(Clone, Copy)]
enum Kind {
    Fast,
    Slow,
    Fails,
    Stuck,
    Panics,
}

struct Fake {
    name: String,
    kind: Kind,
}

#[async_trait]
impl SourceProvider for Fake {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, _: &FetchQuery) -> Result<Vec<RawRecord>, FetchError> {
        match self.kind {
            Kind::Fast => Ok(vec![RawRecord::new().with("title", format!("{} event", self.name))]),
            Kind::Slow => {
                tokio::time::sleep(Duration::from_millis(80)).await;
                Ok(vec![RawRecord::new().with("title", "slow event")])
            }
            Kind::Fails => Err(FetchError::Transport("connection reset".into())),
            Kind::Stuck => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(vec![])
            }
            Kind::Panics => panic!("adapter bug"),
        }
    }
}

fn sources(kinds: &[Kind]) -> Vec<SourceHandle> {
    kinds
        .iter()
        .enumerate()
        .map(|(i, k)| {
            Arc::new(Fake {
                name: format!("src-{i}"),
                kind: *k,
            }) as SourceHandle
        })
        .collect()
}

fn engine(kinds: &[Kind]) -> FanoutEngine {
    FanoutEngine::new(sources(kinds)).with_timeouts(Duration::from_millis(200), Duration::from_secs(2))
}

#[tokio::test]
async fn streaming_always_yields_exactly_n_results() {
    use Kind::*;
    let mixes: Vec<Vec<Kind>> = vec![
        vec![],
        vec![Fast],
        vec![Stuck, Stuck, Stuck],
        vec![Fails, Panics, Fast],
        vec![Fast, Slow, Fails, Stuck, Panics, Fast, Slow],
    ];

    for mix in mixes {
        let got: Vec<_> = engine(&mix).run_streaming(FetchQuery::new("Moreno", 10)).collect().await;
        assert_eq!(got.len(), mix.len());

        let mut names: Vec<&str> = got.iter().map(|r| r.source_name.as_str()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), mix.len(), "every source reported exactly once");

        for (i, kind) in mix.iter().enumerate() {
            let r = got.iter().find(|r| r.source_name == format!("src-{i}")).unwrap();
            match kind {
                Fast | Slow => assert_eq!(r.outcome, RunOutcome::Success),
                Stuck => assert_eq!(r.outcome, RunOutcome::Timeout),
                Fails | Panics => assert!(matches!(r.outcome, RunOutcome::Failed { .. })),
            }
        }
    }
}

#[tokio::test]
async fn fast_source_is_not_blocked_behind_a_stuck_one() {
    let engine = engine(&[Kind::Stuck, Kind::Fast]);
    let stream = engine.run_streaming(FetchQuery::new("Moreno", 10));
    futures::pin_mut!(stream);

    let t0 = Instant::now();
    let first = stream.next().await.unwrap();
    assert_eq!(first.source_name, "src-1");
    assert!(t0.elapsed() < Duration::from_millis(150));

    let second = stream.next().await.unwrap();
    assert_eq!(second.outcome, RunOutcome::Timeout);
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn registry_discovery_feeds_the_engine() {
    let mut reg = SourceRegistry::new();
    reg.register("alpha", || {
        Ok(Arc::new(Fake {
            name: "alpha".into(),
            kind: Kind::Fast,
        }) as SourceHandle)
    });
    reg.register("needs-key", || Err(anyhow::anyhow!("API key missing")));
    reg.register("beta", || {
        Ok(Arc::new(Fake {
            name: "beta".into(),
            kind: Kind::Slow,
        }) as SourceHandle)
    });

    let engine = FanoutEngine::new(reg.discover());
    assert_eq!(engine.source_count(), 2);
    let got: Vec<_> = engine.run_streaming(FetchQuery::new("Moreno", 10)).collect().await;
    assert_eq!(got.len(), 2);
    assert!(got.iter().all(|r| r.outcome.is_success()));
}
