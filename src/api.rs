use std::convert::Infallible;
use std::sync::Arc;

use futures::stream::{Stream, StreamExt};
use serde::Deserialize;
use shuttle_axum::axum::{
    extract::{rejection::QueryRejection, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::get,
    Json, Router,
};
use tower_http::cors::CorsLayer;
use tracing::warn;

use crate::aggregator::{parse_window_bound, AggregateResult, Aggregator, EventQuery};
use crate::error::QueryError;

#[derive(Clone)]
pub struct AppState {
    aggregator: Arc<Aggregator>,
}

pub fn create_router(aggregator: Arc<Aggregator>) -> Router {
    let state = AppState { aggregator };

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/events", get(events))
        .route("/events/stream", get(events_stream))
        .route("/debug/location-cache", get(debug_location_cache))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

/// Query string of `/events` and `/events/stream`. Dates accept RFC 3339,
/// RFC 2822, `YYYY-MM-DD[ HH:MM[:SS]]` or unix seconds.
#[derive(Debug, Default, Deserialize)]
pub struct EventParams {
    pub location: Option<String>,
    pub category: Option<String>,
    pub radius_km: Option<f64>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub limit: Option<usize>,
}

impl EventParams {
    pub fn into_query(self) -> Result<EventQuery, QueryError> {
        let bound = |raw: Option<String>, upper: bool| {
            raw.filter(|s| !s.trim().is_empty())
                .map(|s| parse_window_bound(&s, upper))
                .transpose()
        };
        Ok(EventQuery {
            location: self.location.unwrap_or_default(),
            category: self.category,
            radius_km: self.radius_km,
            lat: self.lat,
            lon: self.lon,
            from: bound(self.from, false)?,
            to: bound(self.to, true)?,
            limit: self.limit,
        })
    }
}

/// Typed query string; malformed values (`radius_km=abc`) answer with the same
/// JSON 400 as semantic validation failures.
type Params = Result<Query<EventParams>, QueryRejection>;

fn parse_params(params: Params) -> Result<EventQuery, QueryError> {
    let Query(params) = params.map_err(|r| QueryError::InvalidParams(r.body_text()))?;
    params.into_query()
}

impl IntoResponse for QueryError {
    fn into_response(self) -> Response {
        (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": self.to_string() })),
        )
            .into_response()
    }
}

async fn events(
    State(state): State<AppState>,
    params: Params,
) -> Result<Json<AggregateResult>, QueryError> {
    let query = parse_params(params)?;
    let result = state.aggregator.aggregate(&query).await?;
    Ok(Json(result))
}

async fn events_stream(
    State(state): State<AppState>,
    params: Params,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, QueryError> {
    let query = parse_params(params)?;
    let runs = state.aggregator.aggregate_stream(&query)?;

    let stream = async_stream::stream! {
        futures::pin_mut!(runs);
        let mut sent = 0usize;
        while let Some(run) = runs.next().await {
            match Event::default().event("source").json_data(&run) {
                Ok(ev) => {
                    sent += 1;
                    yield Ok(ev);
                }
                Err(e) => warn!(source = %run.source_name, error = %e, "could not encode source result"),
            }
        }
        yield Ok(Event::default().event("done").data(sent.to_string()));
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

#[derive(serde::Serialize)]
struct LocationCacheInfo {
    entries: usize,
    store: String,
}

async fn debug_location_cache(State(state): State<AppState>) -> Json<LocationCacheInfo> {
    let cache = state.aggregator.locations();
    Json(LocationCacheInfo {
        entries: cache.len(),
        store: cache.store_description(),
    })
}
