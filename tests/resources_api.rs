use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header};
use bytes::Bytes;
use http_body_util::BodyExt;
use marquee::application::resources::ResourceService;
use marquee::cache::{CacheAside, CacheBackend, CacheBackendError, CacheConfig, MemoryBackend};
use marquee::infra::db::MemoryDocuments;
use marquee::infra::http::{AppState, build_router};
use marquee::notify::{Hub, HubConfig, HubHandle, Notifier};
use serde_json::{Value, json};
use tower::ServiceExt;

/// Cache that is down for every command.
struct DownBackend;

#[async_trait]
impl CacheBackend for DownBackend {
    async fn get(&self, _key: &str) -> Result<Option<Bytes>, CacheBackendError> {
        Err(CacheBackendError::Unavailable("connection refused".into()))
    }

    async fn set(&self, _key: &str, _value: Bytes, _ttl: Duration) -> Result<(), CacheBackendError> {
        Err(CacheBackendError::Unavailable("connection refused".into()))
    }

    async fn delete(&self, _keys: &[String]) -> Result<usize, CacheBackendError> {
        Err(CacheBackendError::Unavailable("connection refused".into()))
    }

    async fn keys_containing(&self, _keyword: &str) -> Result<Vec<String>, CacheBackendError> {
        Err(CacheBackendError::Unavailable("connection refused".into()))
    }

    fn name(&self) -> &'static str {
        "down"
    }
}

struct TestApp {
    router: Router,
    memory: Option<Arc<MemoryBackend>>,
    hub: HubHandle,
}

impl TestApp {
    fn new() -> Self {
        let memory = Arc::new(MemoryBackend::new(&CacheConfig::default()));
        Self::over(memory.clone(), Some(memory))
    }

    fn with_cache_down() -> Self {
        Self::over(Arc::new(DownBackend), None)
    }

    fn over(backend: Arc<dyn CacheBackend>, memory: Option<Arc<MemoryBackend>>) -> Self {
        let hub = Hub::spawn(HubConfig::default());
        let resources = ResourceService::new(
            Arc::new(MemoryDocuments::new()),
            CacheAside::new(backend, CacheConfig::default()),
            Notifier::new(hub.clone()),
        )
        .with_movie_page_size(2);
        let router = build_router(AppState {
            resources,
            hub: hub.clone(),
        });
        Self { router, memory, hub }
    }

    async fn call(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                request = request.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let response = self
            .router
            .clone()
            .oneshot(request.body(body).expect("request"))
            .await
            .expect("router is infallible");

        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body")
            .to_bytes();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("json body")
        };
        (status, json)
    }

    async fn create(&self, collection: &str, body: Value) -> Value {
        let (status, created) = self
            .call(Method::POST, &format!("/api/{collection}"), Some(body))
            .await;
        assert_eq!(status, StatusCode::CREATED, "{created}");
        created
    }

    fn cached_keys(&self) -> Vec<String> {
        let mut keys = self.memory.as_ref().expect("memory cache").keys();
        keys.sort();
        keys
    }
}

fn id_of(document: &Value) -> String {
    document["id"].as_str().expect("id").to_string()
}

#[tokio::test]
async fn health_answers_no_content() {
    let app = TestApp::new();
    let (status, body) = app.call(Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(body, Value::Null);
}

#[tokio::test]
async fn crud_round_trip_for_categories() {
    let app = TestApp::new();

    let created = app
        .create("categories", json!({ "title": "  Action ", "id": "ignored" }))
        .await;
    let id = id_of(&created);
    assert_ne!(id, "ignored");
    assert_eq!(created["title"], "Action");
    assert!(created["created_at"].is_string());

    let (status, fetched) = app
        .call(Method::GET, &format!("/api/categories/{id}"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched, created);

    let (status, replaced) = app
        .call(
            Method::PUT,
            &format!("/api/categories/{id}"),
            Some(json!({ "title": "Adventure", "color": "red" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(replaced["title"], "Adventure");
    assert_eq!(replaced["created_at"], created["created_at"]);
    assert!(replaced["updated_at"].is_string());

    let (status, patched) = app
        .call(
            Method::PATCH,
            &format!("/api/categories/{id}"),
            Some(json!({ "field": "color", "value": "blue" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(patched["color"], "blue");
    assert_eq!(patched["title"], "Adventure");

    let (status, listed) = app.call(Method::GET, "/api/categories", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed.as_array().map(Vec::len), Some(1));

    let (status, _) = app
        .call(Method::DELETE, &format!("/api/categories/{id}"), None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = app
        .call(Method::GET, &format!("/api/categories/{id}"), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "not_found");
}

#[tokio::test]
async fn duplicate_titles_conflict() {
    let app = TestApp::new();
    app.create("genres", json!({ "title": "Drama" })).await;

    let (status, body) = app
        .call(Method::POST, "/api/genres", Some(json!({ "title": "Drama" })))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "duplicate");

    let (status, body) = app
        .call(Method::POST, "/api/genres", Some(json!({ "name": "untitled" })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "invalid_input");

    // Titles are only unique for a handful of kinds.
    app.create("news", json!({ "title": "Same" })).await;
    app.create("news", json!({ "title": "Same" })).await;
}

#[tokio::test]
async fn rejects_bad_requests() {
    let app = TestApp::new();

    let (status, _) = app
        .call(Method::POST, "/api/users", Some(json!(["not", "an", "object"])))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = app
        .call(Method::GET, "/api/qualities?movie_id=5f1c1e1c-7c39-4b53-9a5e-0c1a1e1c7c39", None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "bad_request");

    let (status, _) = app.call(Method::GET, "/api/movies/page/0", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app.call(Method::GET, "/api/nothing", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let ad = app.create("ads", json!({ "slot": "top" })).await;
    let (status, _) = app
        .call(
            Method::PATCH,
            &format!("/api/ads/{}", id_of(&ad)),
            Some(json!({ "field": "created_at", "value": "yesterday" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn writes_invalidate_cached_lists() {
    let app = TestApp::new();
    app.create("servers", json!({ "title": "Alpha" })).await;

    let (_, first) = app.call(Method::GET, "/api/servers", None).await;
    assert_eq!(first.as_array().map(Vec::len), Some(1));
    assert!(app.cached_keys().contains(&"servers".to_string()));

    app.create("servers", json!({ "title": "Beta" })).await;
    assert!(!app.cached_keys().contains(&"servers".to_string()));

    let (_, second) = app.call(Method::GET, "/api/servers", None).await;
    assert_eq!(second.as_array().map(Vec::len), Some(2));
}

#[tokio::test]
async fn episode_writes_sweep_movie_keys() {
    let app = TestApp::new();
    let movie = app
        .create("movies", json!({ "title": "Heat", "position": 1 }))
        .await;
    let movie_id = id_of(&movie);
    app.create("slides", json!({ "image": "hero.png" })).await;

    app.call(Method::GET, "/api/movies", None).await;
    app.call(Method::GET, "/api/movies/page/1", None).await;
    app.call(Method::GET, "/api/slides", None).await;
    let (status, detail) = app
        .call(Method::GET, &format!("/api/movies/{movie_id}/detail"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["episodes"], json!([]));
    assert_eq!(
        app.cached_keys(),
        vec![
            format!("movie_detail_{movie_id}"),
            "movies".to_string(),
            "movies_1".to_string(),
            "slides".to_string(),
        ]
    );

    app.create("episodes", json!({ "movie_id": movie_id, "number": 1 }))
        .await;
    assert_eq!(app.cached_keys(), vec!["slides".to_string()]);

    let (_, detail) = app
        .call(Method::GET, &format!("/api/movies/{movie_id}/detail"), None)
        .await;
    assert_eq!(detail["episodes"].as_array().map(Vec::len), Some(1));

    let (_, episodes) = app
        .call(Method::GET, &format!("/api/movies/{movie_id}/episodes"), None)
        .await;
    assert_eq!(episodes[0]["number"], 1);

    let (_, filtered) = app
        .call(Method::GET, &format!("/api/episodes?movie_id={movie_id}"), None)
        .await;
    assert_eq!(filtered, episodes);
}

#[tokio::test]
async fn reorder_updates_positions_and_pages() {
    let app = TestApp::new();
    let a = id_of(&app.create("movies", json!({ "title": "A", "position": 1 })).await);
    let b = id_of(&app.create("movies", json!({ "title": "B", "position": 2 })).await);
    let c = id_of(&app.create("movies", json!({ "title": "C", "position": 3 })).await);

    let (_, page) = app.call(Method::GET, "/api/movies/page/1", None).await;
    let titles: Vec<&str> = page
        .as_array()
        .expect("page")
        .iter()
        .filter_map(|movie| movie["title"].as_str())
        .collect();
    assert_eq!(titles, vec!["A", "B"]);

    let (status, body) = app
        .call(
            Method::PUT,
            "/api/movies/positions",
            Some(json!([
                { "id": c, "position": 1 },
                { "id": a, "position": 2 },
                { "id": b, "position": 3 },
            ])),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "updated": 3 }));

    let (_, page) = app.call(Method::GET, "/api/movies/page/1", None).await;
    assert_eq!(page[0]["title"], "C");
    assert_eq!(page[1]["title"], "A");
    let (_, page) = app.call(Method::GET, "/api/movies/page/2", None).await;
    assert_eq!(page.as_array().map(Vec::len), Some(1));

    let (status, _) = app
        .call(
            Method::PUT,
            "/api/movies/positions",
            Some(json!([
                { "id": a, "position": 9 },
                { "id": "5f1c1e1c-7c39-4b53-9a5e-0c1a1e1c7c39", "position": 1 },
            ])),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (_, movie) = app.call(Method::GET, &format!("/api/movies/{a}"), None).await;
    assert_eq!(movie["position"], 2);
}

#[tokio::test]
async fn mutations_notify_listeners() {
    let app = TestApp::new();
    let mut listener = app.hub.register().await;

    let server = app.create("servers", json!({ "title": "Mirror" })).await;
    let server_id = id_of(&server);
    let movie_id = "5f1c1e1c-7c39-4b53-9a5e-0c1a1e1c7c39";
    let episode_id = "0b8d4d4e-13a3-4a55-8d43-5d1e0b8d4d4e";
    let quality = app
        .create(
            "qualities",
            json!({
                "movie_id": movie_id,
                "episode_id": episode_id,
                "server_id": server_id,
                "label": "1080p",
            }),
        )
        .await;

    let created: Value =
        serde_json::from_slice(&listener.recv().await.expect("server notification")).unwrap();
    assert_eq!(created["type"], "server");
    assert_eq!(created["id"], server_id.as_str());
    assert_eq!(created["server"]["title"], "Mirror");

    let created: Value =
        serde_json::from_slice(&listener.recv().await.expect("quality notification")).unwrap();
    assert_eq!(created["type"], "quality");
    assert_eq!(created["movieID"], movie_id);
    assert_eq!(created["episodeID"], episode_id);
    assert_eq!(created["serverID"], server_id.as_str());

    let (_, found) = app
        .call(
            Method::GET,
            &format!(
                "/api/qualities?movie_id={movie_id}&episode_id={episode_id}&server_id={server_id}"
            ),
            None,
        )
        .await;
    assert_eq!(found, json!([quality.clone()]));

    app.call(
        Method::DELETE,
        &format!("/api/qualities/{}", id_of(&quality)),
        None,
    )
    .await;
    let deleted: Value =
        serde_json::from_slice(&listener.recv().await.expect("delete notification")).unwrap();
    assert_eq!(deleted["type"], "quality");
    assert_eq!(deleted["id"], id_of(&quality).as_str());
    assert!(deleted.get("quality").is_none());
    assert!(
        !app.cached_keys()
            .iter()
            .any(|key| key.starts_with("qualities_"))
    );
}

async fn next_notification(listener: &mut marquee::notify::Listener) -> Value {
    let bytes = listener.recv().await.expect("notification");
    serde_json::from_slice(&bytes).expect("notification json")
}

#[tokio::test]
async fn writes_succeed_and_notify_while_cache_is_down() {
    let app = TestApp::with_cache_down();
    let mut listener = app.hub.register().await;

    let genre = app.create("genres", json!({ "title": "Noir" })).await;
    let id = id_of(&genre);
    assert_eq!(next_notification(&mut listener).await["type"], "genre");

    let (status, fetched) = app.call(Method::GET, &format!("/api/genres/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched, genre);

    let (status, replaced) = app
        .call(
            Method::PUT,
            &format!("/api/genres/{id}"),
            Some(json!({ "title": "Neo-noir" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(replaced["title"], "Neo-noir");
    assert_eq!(next_notification(&mut listener).await["message"], "Genre updated");

    let (status, _) = app
        .call(Method::DELETE, &format!("/api/genres/{id}"), None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let deleted = next_notification(&mut listener).await;
    assert_eq!(deleted["message"], "Genre deleted");
    assert_eq!(deleted["id"], id.as_str());

    let (status, list) = app.call(Method::GET, "/api/genres", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list, json!([]));
}

#[tokio::test]
async fn moving_a_quality_clears_its_old_lookup() {
    let app = TestApp::new();
    let (movie, other_movie) = (
        "5f1c1e1c-7c39-4b53-9a5e-0c1a1e1c7c39",
        "9a0e6c55-3c8e-4f0a-bb0f-0e8a2d6c9a41",
    );
    let episode = "0b8d4d4e-13a3-4a55-8d43-5d1e0b8d4d4e";
    let server = "3d2f7a1b-8e4c-4b6d-9f0a-1c2e3d4f5a6b";
    let quality = app
        .create(
            "qualities",
            json!({
                "movie_id": movie,
                "episode_id": episode,
                "server_id": server,
                "label": "720p",
            }),
        )
        .await;
    let old_lookup =
        format!("/api/qualities?movie_id={movie}&episode_id={episode}&server_id={server}");

    let (_, found) = app.call(Method::GET, &old_lookup, None).await;
    assert_eq!(found.as_array().map(Vec::len), Some(1));

    let (status, _) = app
        .call(
            Method::PATCH,
            &format!("/api/qualities/{}", id_of(&quality)),
            Some(json!({ "field": "movie_id", "value": other_movie })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(
        !app.cached_keys()
            .contains(&format!("qualities_{movie}_{episode}_{server}"))
    );

    let (_, found) = app.call(Method::GET, &old_lookup, None).await;
    assert_eq!(found, json!([]));
    let (_, moved) = app
        .call(
            Method::GET,
            &format!(
                "/api/qualities?movie_id={other_movie}&episode_id={episode}&server_id={server}"
            ),
            None,
        )
        .await;
    assert_eq!(moved[0]["label"], "720p");
}

#[tokio::test]
async fn moving_an_episode_clears_the_old_movie_list() {
    let app = TestApp::new();
    let first = id_of(&app.create("movies", json!({ "title": "One", "position": 1 })).await);
    let second = id_of(&app.create("movies", json!({ "title": "Two", "position": 2 })).await);
    let episode = app
        .create("episodes", json!({ "movie_id": first, "number": 1 }))
        .await;

    let (_, listed) = app
        .call(Method::GET, &format!("/api/movies/{first}/episodes"), None)
        .await;
    assert_eq!(listed.as_array().map(Vec::len), Some(1));

    let (status, _) = app
        .call(
            Method::PUT,
            &format!("/api/episodes/{}", id_of(&episode)),
            Some(json!({ "movie_id": second, "number": 1 })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (_, listed) = app
        .call(Method::GET, &format!("/api/movies/{first}/episodes"), None)
        .await;
    assert_eq!(listed, json!([]));
}

#[tokio::test]
async fn search_matches_titles_case_insensitively() {
    let app = TestApp::new();
    app.create("movies", json!({ "title": "The Dark Knight", "position": 2, "status": 1 }))
        .await;
    app.create("movies", json!({ "title": "Dark City", "position": 1, "status": 1 }))
        .await;
    app.create("movies", json!({ "title": "Darkman", "position": 3, "status": 2 }))
        .await;
    app.create("movies", json!({ "title": "Heat", "position": 4 })).await;

    let (status, found) = app.call(Method::GET, "/api/movies/search?search=DARK", None).await;
    assert_eq!(status, StatusCode::OK);
    let titles: Vec<&str> = found
        .as_array()
        .expect("results")
        .iter()
        .filter_map(|movie| movie["title"].as_str())
        .collect();
    assert_eq!(titles, vec!["Dark City", "The Dark Knight"]);
    assert!(app.cached_keys().contains(&"movies_search_dark".to_string()));

    app.create("movies", json!({ "title": "Dark Water", "position": 5 })).await;
    assert!(!app.cached_keys().contains(&"movies_search_dark".to_string()));
    let (_, found) = app.call(Method::GET, "/api/movies/search?search=dark", None).await;
    assert_eq!(found.as_array().map(Vec::len), Some(3));

    let (status, _) = app.call(Method::GET, "/api/movies/search", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

fn movies_of(categories: &Value, id: &str) -> Value {
    categories
        .as_array()
        .expect("categories")
        .iter()
        .find(|category| category["id"] == id)
        .map(|category| category["movies"].clone())
        .expect("category in view")
}

#[tokio::test]
async fn categories_view_embeds_active_movies_per_page() {
    let app = TestApp::new();
    let drama = id_of(&app.create("categories", json!({ "title": "Drama" })).await);
    let comedy = id_of(&app.create("categories", json!({ "title": "Comedy" })).await);
    for position in 1..=7 {
        app.create(
            "movies",
            json!({
                "title": format!("Drama {position}"),
                "position": position,
                "status": 1,
                "category": [drama],
            }),
        )
        .await;
    }
    app.create(
        "movies",
        json!({ "title": "Draft", "position": 0, "status": 2, "category": [drama] }),
    )
    .await;

    let (status, first) = app
        .call(Method::GET, "/api/categories/with-movies", None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first.as_array().map(Vec::len), Some(2));
    assert_eq!(movies_of(&first, &comedy), json!([]));
    let drama_movies = movies_of(&first, &drama);
    assert_eq!(drama_movies.as_array().map(Vec::len), Some(6));
    assert_eq!(drama_movies[0]["title"], "Drama 1");

    let (_, second) = app
        .call(Method::GET, "/api/categories/with-movies?page=2", None)
        .await;
    let drama_movies = movies_of(&second, &drama);
    assert_eq!(drama_movies.as_array().map(Vec::len), Some(1));
    assert_eq!(drama_movies[0]["title"], "Drama 7");
    assert!(app.cached_keys().contains(&"categorieswithmovie_2".to_string()));

    app.create("movies", json!({ "title": "Drama 8", "position": 8, "status": 1, "category": [drama] }))
        .await;
    assert!(
        !app.cached_keys()
            .iter()
            .any(|key| key.starts_with("categorieswithmovie_"))
    );

    let (_, second) = app
        .call(Method::GET, "/api/categories/with-movies?page=2", None)
        .await;
    assert_eq!(movies_of(&second, &drama).as_array().map(Vec::len), Some(2));

    app.create("categories", json!({ "title": "Horror" })).await;
    assert!(
        !app.cached_keys()
            .iter()
            .any(|key| key.starts_with("categorieswithmovie_"))
    );
}

#[tokio::test]
async fn bulk_create_inserts_all_movies_and_notifies_once() {
    let app = TestApp::new();
    app.call(Method::GET, "/api/movies", None).await;
    let mut listener = app.hub.register().await;

    let (status, created) = app
        .call(
            Method::POST,
            "/api/movies/bulk",
            Some(json!({ "movies": [
                { "title": "Alien", "position": 1 },
                { "title": "Aliens", "position": 2 },
            ] })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let created = created.as_array().expect("created").clone();
    assert_eq!(created.len(), 2);
    assert_ne!(id_of(&created[0]), id_of(&created[1]));
    assert!(!app.cached_keys().contains(&"movies".to_string()));

    let notification = next_notification(&mut listener).await;
    assert_eq!(notification["type"], "movie");
    assert_eq!(notification["count"], 2);
    assert!(listener.try_recv().is_none());

    let (_, movies) = app.call(Method::GET, "/api/movies", None).await;
    assert_eq!(movies, json!(created));

    let (status, _) = app
        .call(Method::POST, "/api/movies/bulk", Some(json!({ "movies": [] })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
