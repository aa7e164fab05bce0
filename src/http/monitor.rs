//! Server-monitoring read endpoint. Rendering is out of scope; this
//! surfaces only the raw event records the durable collaborator has
//! retained.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::Value;

use crate::service::NeighbourFindService;

pub fn router() -> Router<Arc<NeighbourFindService>> {
    Router::new().route("/recent", get(recent))
}

#[derive(Deserialize)]
struct RecentQuery {
    #[serde(default = "default_max")]
    max: usize,
}

fn default_max() -> usize {
    50
}

async fn recent(
    State(service): State<Arc<NeighbourFindService>>,
    Query(q): Query<RecentQuery>,
) -> Json<Vec<Value>> {
    Json(service.recent_events(q.max).unwrap_or_default())
}
