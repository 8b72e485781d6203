// src/ingest/fanout.rs
//! Fan-out execution: one task per source, each under its own timeout.
//!
//! Every dispatched source produces exactly one [`SourceRunResult`], whether it
//! succeeded, timed out, returned an error or panicked. Nothing a source does can
//! fail the run as a whole or cancel a sibling.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_stream::stream;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, Stream, StreamExt};
use futures::FutureExt;
use metrics::{counter, histogram};
use serde::{Serialize, Serializer};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::config::AggregatorConfig;
use crate::error::FetchError;
use crate::ingest::normalize::normalize_records;
use crate::ingest::registry::{SourceHandle, SourceRegistry};
use crate::ingest::types::{CanonicalEvent, FetchQuery};

const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(8);
const DEFAULT_GLOBAL_DEADLINE: Duration = Duration::from_secs(20);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum RunOutcome {
    Success,
    Timeout,
    Failed { reason: String },
}

impl RunOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            RunOutcome::Success => "success",
            RunOutcome::Timeout => "timeout",
            RunOutcome::Failed { .. } => "failed",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Success)
    }
}

/// What one source produced for one query. Events are already normalized.
#[derive(Debug, Clone, Serialize)]
pub struct SourceRunResult {
    pub source_name: String,
    pub events: Vec<CanonicalEvent>,
    /// Records the source returned before normalization.
    pub raw_count: usize,
    /// Records dropped by normalization.
    pub dropped: usize,
    #[serde(rename = "elapsed_ms", serialize_with = "serialize_ms")]
    pub elapsed: Duration,
    pub outcome: RunOutcome,
}

impl SourceRunResult {
    fn empty(source_name: String, elapsed: Duration, outcome: RunOutcome) -> Self {
        Self {
            source_name,
            events: Vec::new(),
            raw_count: 0,
            dropped: 0,
            elapsed,
            outcome,
        }
    }
}

fn serialize_ms<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

/// Concurrent dispatcher over a fixed set of sources.
#[derive(Clone)]
pub struct FanoutEngine {
    sources: Arc<Vec<SourceHandle>>,
    per_task_timeout: Duration,
    global_deadline: Duration,
}

type Pending = FuturesUnordered<BoxFuture<'static, (usize, SourceRunResult)>>;

/// Aborts still-running source tasks when the consumer goes away.
struct AbortOnDrop(Vec<AbortHandle>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        for h in &self.0 {
            h.abort();
        }
    }
}

impl FanoutEngine {
    pub fn new(sources: Vec<SourceHandle>) -> Self {
        Self {
            sources: Arc::new(sources),
            per_task_timeout: DEFAULT_TASK_TIMEOUT,
            global_deadline: DEFAULT_GLOBAL_DEADLINE,
        }
    }

    /// Discover sources from the registry and take timeouts from config.
    pub fn from_registry(registry: &SourceRegistry, cfg: &AggregatorConfig) -> Self {
        Self::new(registry.discover()).with_timeouts(cfg.per_task_timeout(), cfg.global_deadline())
    }

    pub fn with_timeouts(mut self, per_task: Duration, global_deadline: Duration) -> Self {
        self.per_task_timeout = per_task;
        self.global_deadline = global_deadline.max(per_task);
        self
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    pub fn source_names(&self) -> Vec<String> {
        self.sources.iter().map(|s| s.name().to_string()).collect()
    }

    pub fn per_task_timeout(&self) -> Duration {
        self.per_task_timeout
    }

    /// Spawn one task per source. Each pending future resolves to `(index, result)`
    /// and never fails: join errors (panic, abort) become `Failed`.
    fn dispatch(&self, query: Arc<FetchQuery>) -> (Pending, AbortOnDrop) {
        let pending = FuturesUnordered::new();
        let mut handles = Vec::with_capacity(self.sources.len());
        let dispatched_at = Instant::now();

        for (idx, source) in self.sources.iter().enumerate() {
            let name = source.name().to_string();
            let task = tokio::spawn(run_source(source.clone(), query.clone(), self.per_task_timeout));
            handles.push(task.abort_handle());

            let fut = async move {
                let res = match task.await {
                    Ok(res) => res,
                    Err(e) => {
                        let reason = if e.is_panic() {
                            "source task panicked".to_string()
                        } else {
                            "source task cancelled".to_string()
                        };
                        warn!(target: "fanout", source = %name, %reason, "source task did not complete");
                        SourceRunResult::empty(name, dispatched_at.elapsed(), RunOutcome::Failed { reason })
                    }
                };
                (idx, res)
            };
            pending.push(fut.boxed());
        }
        debug!(target: "fanout", sources = self.sources.len(), "dispatched");
        (pending, AbortOnDrop(handles))
    }

    /// Results in completion order. Tasks start on first poll; dropping the stream
    /// aborts whatever is still running.
    pub fn run_streaming(&self, query: FetchQuery) -> impl Stream<Item = SourceRunResult> + Send + 'static {
        let engine = self.clone();
        stream! {
            let (mut pending, _guard) = engine.dispatch(Arc::new(query));
            let mut yielded = 0usize;
            while let Some((_, res)) = pending.next().await {
                record_run(&res);
                yielded += 1;
                yield res;
            }
            info!(target: "fanout", results = yielded, "streaming run finished");
        }
    }

    /// Wait for every source or the global deadline, whichever is first. Sources
    /// still pending at the deadline are aborted and reported as `Timeout`.
    pub async fn run_all(&self, query: FetchQuery) -> Vec<SourceRunResult> {
        let started = Instant::now();
        let (mut pending, guard) = self.dispatch(Arc::new(query));
        let mut slots: Vec<Option<SourceRunResult>> = vec![None; self.sources.len()];
        let mut order = Vec::with_capacity(self.sources.len());

        let deadline = tokio::time::sleep(self.global_deadline);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                next = pending.next() => match next {
                    Some((idx, res)) => {
                        record_run(&res);
                        slots[idx] = Some(res);
                        order.push(idx);
                    }
                    None => break,
                },
                _ = &mut deadline => {
                    warn!(
                        target: "fanout",
                        deadline_ms = self.global_deadline.as_millis() as u64,
                        pending = pending.len(),
                        "global deadline reached, aborting remaining sources"
                    );
                    break;
                }
            }
        }
        drop(guard);

        // Completion order first, then anything the deadline cut off.
        let mut out: Vec<SourceRunResult> = Vec::with_capacity(slots.len());
        for idx in &order {
            if let Some(res) = slots[*idx].take() {
                out.push(res);
            }
        }
        for (idx, slot) in slots.iter().enumerate() {
            if slot.is_none() && !order.contains(&idx) {
                let res = SourceRunResult::empty(
                    self.sources[idx].name().to_string(),
                    started.elapsed(),
                    RunOutcome::Timeout,
                );
                record_run(&res);
                out.push(res);
            }
        }

        info!(
            target: "fanout",
            sources = out.len(),
            succeeded = out.iter().filter(|r| r.outcome.is_success()).count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "batch run finished"
        );
        out
    }
}

/// The per-task boundary: fetch under timeout, then normalize inside the task.
async fn run_source(source: SourceHandle, query: Arc<FetchQuery>, timeout: Duration) -> SourceRunResult {
    let started = Instant::now();
    let name = source.name().to_string();
    let fetched = tokio::time::timeout(timeout, source.fetch(&query)).await;
    let elapsed = started.elapsed();

    match fetched {
        Ok(Ok(raws)) => {
            let normalized = normalize_records(source.as_ref(), &raws);
            SourceRunResult {
                source_name: name,
                raw_count: raws.len(),
                dropped: normalized.dropped,
                events: normalized.events,
                elapsed,
                outcome: RunOutcome::Success,
            }
        }
        Ok(Err(FetchError::Timeout(_))) | Err(_) => {
            SourceRunResult::empty(name, elapsed, RunOutcome::Timeout)
        }
        Ok(Err(e)) => SourceRunResult::empty(name, elapsed, RunOutcome::Failed { reason: e.to_string() }),
    }
}

fn record_run(res: &SourceRunResult) {
    let ms = res.elapsed.as_secs_f64() * 1_000.0;
    counter!("fanout_source_runs_total", "outcome" => res.outcome.label()).increment(1);
    histogram!("fanout_source_elapsed_ms").record(ms);
    counter!("fanout_events_raw_total").increment(res.raw_count as u64);
    counter!("normalize_dropped_total").increment(res.dropped as u64);

    match &res.outcome {
        RunOutcome::Success => debug!(
            target: "fanout",
            source = %res.source_name,
            raw = res.raw_count,
            kept = res.events.len(),
            elapsed_ms = ms as u64,
            "source finished"
        ),
        other => warn!(
            target: "fanout",
            source = %res.source_name,
            outcome = ?other,
            elapsed_ms = ms as u64,
            "source did not succeed"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::types::{RawRecord, SourceProvider};
    use async_trait::async_trait;

    enum Behaviour {
        Titles(Vec<&'static str>),
        Sleep(Duration),
        Fail,
        Panic,
    }

    struct Fake {
        name: &'static str,
        delay: Duration,
        behaviour: Behaviour,
    }

    #[async_trait]
    impl SourceProvider for Fake {
        fn name(&self) -> &str {
            self.name
        }
        async fn fetch(&self, _: &FetchQuery) -> Result<Vec<RawRecord>, FetchError> {
            tokio::time::sleep(self.delay).await;
            match &self.behaviour {
                Behaviour::Titles(t) => Ok(t.iter().map(|t| RawRecord::new().with("title", *t)).collect()),
                Behaviour::Sleep(d) => {
                    tokio::time::sleep(*d).await;
                    Ok(vec![])
                }
                Behaviour::Fail => Err(FetchError::Parse("bad payload".into())),
                Behaviour::Panic => panic!("boom"),
            }
        }
    }

    fn src(name: &'static str, delay_ms: u64, behaviour: Behaviour) -> SourceHandle {
        Arc::new(Fake {
            name,
            delay: Duration::from_millis(delay_ms),
            behaviour,
        })
    }

    fn engine(sources: Vec<SourceHandle>, task_ms: u64, global_ms: u64) -> FanoutEngine {
        FanoutEngine::new(sources)
            .with_timeouts(Duration::from_millis(task_ms), Duration::from_millis(global_ms))
    }

    #[tokio::test]
    async fn streaming_yields_one_result_per_source_in_completion_order() {
        let e = engine(
            vec![
                src("slow", 150, Behaviour::Titles(vec!["late"])),
                src("fast", 0, Behaviour::Titles(vec!["early", ""])),
                src("broken", 10, Behaviour::Fail),
                src("stuck", 0, Behaviour::Sleep(Duration::from_secs(5))),
            ],
            300,
            2_000,
        );
        let got: Vec<SourceRunResult> = e.run_streaming(FetchQuery::new("x", 10)).collect().await;
        assert_eq!(got.len(), 4);
        assert_eq!(got[0].source_name, "fast");
        assert_eq!(got[0].raw_count, 2);
        assert_eq!(got[0].events.len(), 1);
        assert_eq!(got[0].dropped, 1);

        let outcome = |n: &str| got.iter().find(|r| r.source_name == n).unwrap().outcome.clone();
        assert_eq!(outcome("slow"), RunOutcome::Success);
        assert_eq!(outcome("stuck"), RunOutcome::Timeout);
        assert!(matches!(outcome("broken"), RunOutcome::Failed { .. }));
    }

    #[tokio::test]
    async fn panicking_source_is_recorded_not_propagated() {
        let e = engine(
            vec![src("ok", 0, Behaviour::Titles(vec!["a"])), src("bad", 0, Behaviour::Panic)],
            500,
            1_000,
        );
        let got = e.run_all(FetchQuery::new("x", 10)).await;
        assert_eq!(got.len(), 2);
        let bad = got.iter().find(|r| r.source_name == "bad").unwrap();
        assert_eq!(
            bad.outcome,
            RunOutcome::Failed {
                reason: "source task panicked".into()
            }
        );
    }

    #[tokio::test]
    async fn global_deadline_cuts_off_pending_sources_as_timeout() {
        // Per-task budget is generous; only the global deadline can stop "stuck".
        let mut e = engine(
            vec![
                src("ok", 0, Behaviour::Titles(vec!["a"])),
                src("stuck", 0, Behaviour::Sleep(Duration::from_secs(10))),
            ],
            5_000,
            5_000,
        );
        e.global_deadline = Duration::from_millis(150);

        let t0 = Instant::now();
        let got = e.run_all(FetchQuery::new("x", 10)).await;
        assert!(t0.elapsed() < Duration::from_secs(2));
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].source_name, "ok");
        assert_eq!(got[1].source_name, "stuck");
        assert_eq!(got[1].outcome, RunOutcome::Timeout);
    }

    #[tokio::test]
    async fn no_sources_means_empty_run() {
        let e = FanoutEngine::new(vec![]);
        assert!(e.run_all(FetchQuery::new("x", 10)).await.is_empty());
        assert_eq!(e.run_streaming(FetchQuery::new("x", 10)).count().await, 0);
    }

    #[test]
    fn outcome_serializes_with_status_tag() {
        let v = serde_json::to_value(RunOutcome::Failed { reason: "x".into() }).unwrap();
        assert_eq!(v, serde_json::json!({"status": "failed", "reason": "x"}));
    }
}
