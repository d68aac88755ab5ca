//! HTTP surface: REST endpoints per resource, the `/ws` listener endpoint
//! and `/health`.

mod error;
mod handlers;
mod middleware;
mod socket;

pub use error::{ApiError, ApiErrorBody, ApiErrorMessage, codes};

use axum::extract::{Extension, State};
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Router, middleware as axum_middleware};

use crate::application::error::{AppError, HttpError};
use crate::application::resources::ResourceService;
use crate::domain::ResourceKind;
use crate::infra::error::InfraError;
use crate::notify::HubHandle;

use self::middleware::{log_responses, set_request_context};

#[derive(Clone)]
pub struct AppState {
    pub resources: ResourceService,
    pub hub: HubHandle,
}

pub fn build_router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/health", get(health))
        .route("/ws", get(socket::upgrade))
        .route("/api/movies/positions", put(handlers::reorder_movies))
        .route("/api/movies/search", get(handlers::search_movies))
        .route("/api/movies/bulk", post(handlers::create_movies_bulk))
        .route(
            "/api/categories/with-movies",
            get(handlers::categories_with_movies),
        )
        .route("/api/movies/page/{page}", get(handlers::movie_page))
        .route("/api/movies/{id}/episodes", get(handlers::movie_episodes))
        .route("/api/movies/{id}/detail", get(handlers::movie_detail));

    for kind in ResourceKind::ALL {
        router = router.merge(resource_routes(kind));
    }

    router
        .fallback(not_found)
        .with_state(state)
        .layer(axum_middleware::from_fn(log_responses))
        .layer(axum_middleware::from_fn(set_request_context))
}

fn resource_routes(kind: ResourceKind) -> Router<AppState> {
    let base = format!("/api/{}", kind.collection());
    Router::new()
        .route(&base, get(handlers::list).post(handlers::create))
        .route(
            &format!("{base}/{{id}}"),
            get(handlers::get_one)
                .put(handlers::replace)
                .patch(handlers::patch_field)
                .delete(handlers::remove),
        )
        .layer(Extension(kind))
}

async fn health(State(state): State<AppState>) -> Result<StatusCode, AppError> {
    state
        .resources
        .health()
        .await
        .map(|()| StatusCode::NO_CONTENT)
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))
}

async fn not_found(uri: Uri) -> Response {
    HttpError::new(
        "infra::http::fallback",
        StatusCode::NOT_FOUND,
        "Not found",
        format!("no route for {}", uri.path()),
    )
    .into_response()
}
