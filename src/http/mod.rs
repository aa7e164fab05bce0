//! Thin `axum` router surfacing the service's API contracts. Deliberately
//! outside the core; this layer does nothing but translate requests into
//! `NeighbourFindService` calls and map `CoreError` onto status codes.

pub mod monitor;

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use crate::durable::LinkFormat;
use crate::errs::{CoreError, ErrorKind};
use crate::service::NeighbourFindService;

pub fn router(service: Arc<NeighbourFindService>) -> Router {
    Router::new()
        .route("/guids/:guid", post(insert).get(get_sequence))
        .route("/guids", get(list_guids))
        .route("/guids/quality/:cutoff", get(guids_with_quality_over))
        .route("/guids/prefix/:prefix", get(guids_beginning_with))
        .route("/guids/:guid/exists", get(exists))
        .route("/guids/:guid/annotation", get(annotation))
        .route("/guids/:guid/neighbours", get(neighbours_within))
        .route("/clustering/:policy/msa", post(multi_sequence_alignment))
        .route("/clustering", get(algorithms))
        .route("/clustering/:policy/change_id", get(change_id))
        .route("/clustering/:policy/clusters", get(cluster_ids))
        .route("/clustering/:policy/clusters/:cluster_id/members", get(cluster_members))
        .route("/clustering/:policy/clusters/:cluster_id/network", get(network))
        .route("/clustering/:policy/clusters/:cluster_id/mst", get(minimum_spanning_tree))
        .route("/clustering/:policy/guids/:guid/clusters", get(guid_to_clusters))
        .route("/clustering/:policy/what_tested", get(what_tested))
        .route("/nucleotides_excluded", get(nucleotides_excluded))
        .nest("/monitor", monitor::router())
        .with_state(service)
}

struct ApiError(CoreError);

impl From<CoreError> for ApiError {
    fn from(e: CoreError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0.kind() {
            ErrorKind::InputRejected => StatusCode::BAD_REQUEST,
            ErrorKind::InvalidSequence => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::StateConflict => StatusCode::CONFLICT,
            ErrorKind::IntegrityError => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::TransientBackend => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::PolicyMiss => StatusCode::NOT_FOUND,
        };
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

async fn insert(
    State(service): State<Arc<NeighbourFindService>>,
    Path(guid): Path<String>,
    body: String,
) -> Result<Json<serde_json::Value>, ApiError> {
    let outcome = service.insert(&guid, &body)?;
    Ok(Json(json!({ "outcome": format!("{outcome:?}") })))
}

async fn get_sequence(
    State(service): State<Arc<NeighbourFindService>>,
    Path(guid): Path<String>,
) -> Result<String, ApiError> {
    Ok(service.sequence(&guid)?)
}

async fn exists(State(service): State<Arc<NeighbourFindService>>, Path(guid): Path<String>) -> Json<bool> {
    Json(service.exists(&guid))
}

async fn annotation(
    State(service): State<Arc<NeighbourFindService>>,
    Path(guid): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let quality = service.annotation(&guid)?;
    Ok(Json(json!({ "acgt_fraction": quality.acgt_fraction })))
}

async fn list_guids(State(service): State<Arc<NeighbourFindService>>) -> Json<Vec<String>> {
    Json(service.guids())
}

async fn guids_with_quality_over(
    State(service): State<Arc<NeighbourFindService>>,
    Path(cutoff): Path<f64>,
) -> Json<Vec<String>> {
    Json(service.guids_with_quality_over(cutoff))
}

#[derive(Deserialize)]
struct PrefixQuery {
    #[serde(default = "default_max")]
    max: usize,
}

fn default_max() -> usize {
    100
}

async fn guids_beginning_with(
    State(service): State<Arc<NeighbourFindService>>,
    Path(prefix): Path<String>,
    Query(q): Query<PrefixQuery>,
) -> Json<Vec<String>> {
    Json(service.guids_beginning_with(&prefix, q.max))
}

#[derive(Deserialize)]
struct NeighboursQuery {
    threshold: usize,
    #[serde(default)]
    quality_cutoff: f64,
    #[serde(default)]
    format: NeighbourFormat,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "snake_case")]
enum NeighbourFormat {
    #[default]
    Dict,
    PairDistance,
    Full,
    GuidOnly,
}

impl From<NeighbourFormat> for LinkFormat {
    fn from(f: NeighbourFormat) -> Self {
        match f {
            NeighbourFormat::Dict => LinkFormat::Dict,
            NeighbourFormat::PairDistance => LinkFormat::PairDistance,
            NeighbourFormat::Full => LinkFormat::Full,
            NeighbourFormat::GuidOnly => LinkFormat::GuidOnly,
        }
    }
}

async fn neighbours_within(
    State(service): State<Arc<NeighbourFindService>>,
    Path(guid): Path<String>,
    Query(q): Query<NeighboursQuery>,
) -> Result<Json<Vec<serde_json::Value>>, ApiError> {
    let links = service.neighbours_within(&guid, q.threshold, q.quality_cutoff, q.format.into())?;
    Ok(Json(links))
}

async fn multi_sequence_alignment(
    State(service): State<Arc<NeighbourFindService>>,
    Path(policy): Path<String>,
    Json(guids): Json<Vec<String>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let result = service.multi_sequence_alignment(&policy, &guids)?;
    let shaped: HashMap<String, serde_json::Value> = result
        .into_iter()
        .map(|(guid, mp)| {
            (
                guid,
                json!({
                    "aligned_seq": mp.aligned_seq,
                    "all_n": mp.all_n,
                    "align_n": mp.align_n,
                    "p_value1": mp.p_value1,
                    "p_value2": mp.p_value2,
                    "p_value3": mp.p_value3,
                }),
            )
        })
        .collect();
    Ok(Json(json!(shaped)))
}

async fn algorithms(State(service): State<Arc<NeighbourFindService>>) -> Json<Vec<String>> {
    Json(service.algorithms())
}

async fn change_id(
    State(service): State<Arc<NeighbourFindService>>,
    Path(policy): Path<String>,
) -> Result<Json<u64>, ApiError> {
    Ok(Json(service.change_id(&policy)?))
}

async fn cluster_ids(
    State(service): State<Arc<NeighbourFindService>>,
    Path(policy): Path<String>,
) -> Result<Json<Vec<String>>, ApiError> {
    Ok(Json(service.cluster_ids(&policy)?))
}

async fn cluster_members(
    State(service): State<Arc<NeighbourFindService>>,
    Path((policy, cluster_id)): Path<(String, String)>,
) -> Result<Json<Vec<String>>, ApiError> {
    Ok(Json(service.cluster_members(&policy, &cluster_id)?))
}

async fn network(
    State(service): State<Arc<NeighbourFindService>>,
    Path((policy, cluster_id)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let edges = service.network_for_cluster(&policy, &cluster_id)?;
    Ok(Json(cytoscape_shape(&edges)))
}

async fn minimum_spanning_tree(
    State(service): State<Arc<NeighbourFindService>>,
    Path((policy, cluster_id)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let edges = service.minimum_spanning_tree_for_cluster(&policy, &cluster_id)?;
    Ok(Json(cytoscape_shape(&edges)))
}

fn cytoscape_shape(edges: &[(String, String, usize)]) -> serde_json::Value {
    let mut nodes: Vec<&String> = edges.iter().flat_map(|(a, b, _)| [a, b]).collect();
    nodes.sort();
    nodes.dedup();
    json!({
        "nodes": nodes.iter().map(|n| json!({ "data": { "id": n } })).collect::<Vec<_>>(),
        "edges": edges.iter().map(|(a, b, w)| json!({ "data": { "source": a, "target": b, "snv": w } })).collect::<Vec<_>>(),
    })
}

async fn guid_to_clusters(
    State(service): State<Arc<NeighbourFindService>>,
    Path((policy, guid)): Path<(String, String)>,
) -> Result<Json<Vec<String>>, ApiError> {
    Ok(Json(service.guid_to_clusters(&policy, &guid)?))
}

async fn what_tested(
    State(service): State<Arc<NeighbourFindService>>,
    Path(policy): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let tested = service.what_tested(&policy)?;
    Ok(Json(json!(format!("{tested:?}"))))
}

async fn nucleotides_excluded(
    State(service): State<Arc<NeighbourFindService>>,
) -> Json<serde_json::Value> {
    let (hash, positions) = service.nucleotides_excluded();
    Json(json!({ "mask_hash": hash, "positions": positions }))
}
