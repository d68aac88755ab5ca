//! REST handlers shared by every resource kind.
//!
//! The kind comes from an `Extension` layered onto each resource's routes.

use axum::Json;
use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Deserialize;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::application::resources::MoviePosition;
use crate::domain::ResourceKind;

use super::AppState;
use super::error::ApiError;

/// Narrowing filters accepted on list endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub movie_id: Option<Uuid>,
    pub episode_id: Option<Uuid>,
    pub server_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub search: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct BulkMoviesBody {
    pub movies: Vec<Value>,
}

#[derive(Debug, Deserialize)]
pub struct PatchFieldBody {
    pub field: String,
    pub value: Value,
}

pub async fn list(
    State(state): State<AppState>,
    Extension(kind): Extension<ResourceKind>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let documents = match (kind, query) {
        (
            ResourceKind::Quality,
            ListQuery {
                movie_id: Some(movie),
                episode_id: Some(episode),
                server_id: Some(server),
            },
        ) => state.resources.qualities_for(movie, episode, server).await?,
        (
            ResourceKind::Quality,
            ListQuery {
                movie_id: Some(_), ..
            }
            | ListQuery {
                episode_id: Some(_),
                ..
            }
            | ListQuery {
                server_id: Some(_), ..
            },
        ) => {
            return Err(ApiError::bad_request(
                "Incomplete quality lookup",
                Some("movie_id, episode_id and server_id are required together".to_string()),
            ));
        }
        (
            ResourceKind::Episode,
            ListQuery {
                movie_id: Some(movie),
                ..
            },
        ) => state.resources.episodes_for_movie(movie).await?,
        (kind, _) => state.resources.list(kind).await?,
    };
    Ok(Json(documents))
}

pub async fn create(
    State(state): State<AppState>,
    Extension(kind): Extension<ResourceKind>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, ApiError> {
    let document = state.resources.create(kind, body).await?;
    Ok((StatusCode::CREATED, Json(document)))
}

pub async fn get_one(
    State(state): State<AppState>,
    Extension(kind): Extension<ResourceKind>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.resources.get(kind, id).await?))
}

pub async fn replace(
    State(state): State<AppState>,
    Extension(kind): Extension<ResourceKind>,
    Path(id): Path<Uuid>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.resources.update(kind, id, body).await?))
}

pub async fn patch_field(
    State(state): State<AppState>,
    Extension(kind): Extension<ResourceKind>,
    Path(id): Path<Uuid>,
    Json(body): Json<PatchFieldBody>,
) -> Result<impl IntoResponse, ApiError> {
    let document = state
        .resources
        .patch_field(kind, id, &body.field, body.value)
        .await?;
    Ok(Json(document))
}

pub async fn remove(
    State(state): State<AppState>,
    Extension(kind): Extension<ResourceKind>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    state.resources.delete(kind, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn movie_page(
    State(state): State<AppState>,
    Path(page): Path<u32>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.resources.movie_page(page).await?))
}

pub async fn movie_episodes(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.resources.episodes_for_movie(id).await?))
}

pub async fn movie_detail(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.resources.movie_detail(id).await?))
}

pub async fn reorder_movies(
    State(state): State<AppState>,
    Json(positions): Json<Vec<MoviePosition>>,
) -> Result<impl IntoResponse, ApiError> {
    let updated = state.resources.reorder_movies(&positions).await?;
    Ok(Json(json!({ "updated": updated })))
}

pub async fn search_movies(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.resources.search_movies(&query.search).await?))
}

pub async fn create_movies_bulk(
    State(state): State<AppState>,
    Json(body): Json<BulkMoviesBody>,
) -> Result<impl IntoResponse, ApiError> {
    let created = state.resources.create_movies_bulk(body.movies).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn categories_with_movies(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let page = query.page.unwrap_or(1);
    Ok(Json(state.resources.categories_with_movies(page).await?))
}
