//!
//! src/api.rs  Andrew Belles  Oct 2025
//!
//! Http surface: token exchange passthrough, category derivation,
//! progress denominator and the streaming classification endpoint
//!

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    http::{header, HeaderName},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::errors::SorterError;
use crate::fetch::SpotifyClient;
use crate::pipeline::Sorter;
use crate::types::Category;

pub const TOTAL_TRACKS_HEADER: &str = "x-total-tracks";

#[derive(Clone)]
pub struct AppState {
    pub sorter: Arc<Sorter>,
    pub spotify: Arc<SpotifyClient>
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/exchange-code", get(exchange_code))
        .route("/categories", get(categories))
        .route("/total-tracks", get(total_tracks))
        .route("/generate", post(generate))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn required(value: Option<String>, name: &str) -> Result<String, SorterError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| SorterError::BadRequest(format!("missing query parameter {name}")))
}

#[derive(Debug, Deserialize)]
struct ExchangeParams {
    code: Option<String>
}

async fn exchange_code(
    State(state): State<AppState>,
    params: Result<Query<ExchangeParams>, QueryRejection>
) -> Result<Json<Value>, SorterError> {
    let Query(params) = params?;
    let code = required(params.code, "code")?;
    Ok( Json(state.spotify.exchange_code(&code).await?) )
}

#[derive(Debug, Deserialize)]
struct CategoriesParams {
    token: Option<String>,
    playlist_id: Option<String>,
    num_categories: Option<String>
}

async fn categories(
    State(state): State<AppState>,
    params: Result<Query<CategoriesParams>, QueryRejection>
) -> Result<Json<Vec<Category>>, SorterError> {
    let Query(params) = params?;
    let token = required(params.token, "token")?;
    let playlist_id = required(params.playlist_id, "playlist_id")?;
    let count = required(params.num_categories, "num_categories")?
        .trim()
        .parse::<u32>()
        .map_err(|e| SorterError::BadRequest(format!("num_categories invalid: {e}")))?;

    let categories = state.sorter.categories(&token, &playlist_id, count).await?;
    Ok( Json(categories) )
}

#[derive(Debug, Deserialize)]
struct TotalTracksParams {
    playlist_id: Option<String>
}

async fn total_tracks(
    State(state): State<AppState>,
    params: Result<Query<TotalTracksParams>, QueryRejection>
) -> Result<Json<Value>, SorterError> {
    let Query(params) = params?;
    let playlist_id = required(params.playlist_id, "playlist_id")?;
    let total = state.sorter.total_tracks(&playlist_id).await?;
    Ok( Json(json!({ "total_tracks": total })) )
}

#[derive(Debug, Deserialize)]
struct GenerateParams {
    token: Option<String>,
    playlist_id: Option<String>
}

#[derive(Debug, Deserialize)]
struct GenerateBody {
    categories: Vec<Category>
}

async fn generate(
    State(state): State<AppState>,
    params: Result<Query<GenerateParams>, QueryRejection>,
    body: Result<Json<GenerateBody>, JsonRejection>
) -> Result<Response, SorterError> {
    let Query(params) = params?;
    let Json(body) = body?;
    let token = required(params.token, "token")?;
    let playlist_id = required(params.playlist_id, "playlist_id")?;

    let stream = state.sorter.generate(&token, &playlist_id, body.categories).await?;
    let total = stream.total;
    info!(playlist_id = %playlist_id, total, "api.generate.stream");

    let headers = [
        (header::CONTENT_TYPE, "application/json".to_string()),
        (HeaderName::from_static(TOTAL_TRACKS_HEADER), total.to_string()),
    ];
    Ok( (headers, Body::from_stream(stream.into_chunks())).into_response() )
}
