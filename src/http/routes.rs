//! HTTP route definitions

use axum::{
    extract::State,
    http::{header, Method, StatusCode},
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::app::AppState;
use crate::session::{SessionError, SessionSummary};
use crate::util::time::uptime_secs;
use crate::ws::handler::ws_handler;

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    // CORS: comma-separated CLIENT_ORIGIN list, or any origin when unset
    let cors = match &state.config.client_origin {
        Some(origins) => {
            let allowed_origins: Vec<header::HeaderValue> = origins
                .split(',')
                .filter_map(|s| s.trim().parse::<header::HeaderValue>().ok())
                .collect();

            CorsLayer::new()
                .allow_origin(allowed_origins)
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers([header::CONTENT_TYPE])
        }
        None => CorsLayer::permissive(),
    };

    Router::new()
        .route("/health", get(health_handler))
        .route("/api/create-lobby", post(create_lobby_handler))
        .route("/api/lobbies", get(list_lobbies_handler))
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    active_sessions: usize,
    max_sessions: usize,
    active_players: usize,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        active_sessions: state.sessions.len(),
        max_sessions: state.sessions.config().max_sessions,
        active_players: state.sessions.total_players(),
    })
}

// ============================================================================
// Lobby endpoints
// ============================================================================

#[derive(Serialize)]
struct CreateLobbyResponse {
    code: String,
}

async fn create_lobby_handler(
    State(state): State<AppState>,
) -> Result<Json<CreateLobbyResponse>, AppError> {
    let session = state.sessions.create()?;

    Ok(Json(CreateLobbyResponse {
        code: session.code().to_string(),
    }))
}

async fn list_lobbies_handler(State(state): State<AppState>) -> Json<Vec<SessionSummary>> {
    Json(state.sessions.list())
}

// ============================================================================
// Error handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),
}

impl From<SessionError> for AppError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::CapacityReached { .. } => AppError::Unavailable(err.to_string()),
            SessionError::Closed(_) => AppError::NotFound(err.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    fn test_state(max_sessions: usize) -> AppState {
        let mut config = Config::from_lookup(|_| None).unwrap();
        config.sessions.max_sessions = max_sessions;
        AppState::new(config)
    }

    async fn send(router: Router, method: Method, uri: &str) -> (StatusCode, Value) {
        let response = router
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    #[tokio::test]
    async fn health_reports_counts() {
        let state = test_state(5);
        state.sessions.create().unwrap();

        let (status, body) = send(build_router(state), Method::GET, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["active_sessions"], 1);
        assert_eq!(body["max_sessions"], 5);
        assert_eq!(body["active_players"], 0);
    }

    #[tokio::test]
    async fn create_lobby_returns_code_until_full() {
        let state = test_state(1);
        let router = build_router(state.clone());

        let (status, body) = send(router.clone(), Method::POST, "/api/create-lobby").await;
        assert_eq!(status, StatusCode::OK);
        let code = body["code"].as_str().unwrap().to_string();
        assert_eq!(code.len(), 4);
        assert!(state.sessions.get(&code).is_some());

        let (status, body) = send(router, Method::POST, "/api/create-lobby").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body["error"].as_str().unwrap().contains("capacity"));
        assert_eq!(state.sessions.len(), 1);
    }

    #[tokio::test]
    async fn lists_lobbies() {
        let state = test_state(5);
        let session = state.sessions.create().unwrap();

        let (status, body) = send(build_router(state), Method::GET, "/api/lobbies").await;
        assert_eq!(status, StatusCode::OK);
        let lobbies = body.as_array().unwrap();
        assert_eq!(lobbies.len(), 1);
        assert_eq!(lobbies[0]["code"], session.code());
        assert_eq!(lobbies[0]["playerCount"], 0);
        assert_eq!(lobbies[0]["maxPlayers"], 2);
        assert_eq!(lobbies[0]["state"], "waiting");
    }

    #[tokio::test]
    async fn ws_requires_known_lobby() {
        let state = test_state(5);
        let session = state.sessions.create().unwrap();
        let router = build_router(state);

        let (status, body) = send(router.clone(), Method::GET, "/ws").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Missing lobby code");

        let (status, body) = send(router.clone(), Method::GET, "/ws?lobby=QQQQQ").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Lobby not found");

        // known lobby but not a websocket handshake
        let uri = format!("/ws?lobby={}", session.code());
        let (status, _) = send(router, Method::GET, &uri).await;
        assert!(status.is_client_error());
        assert_ne!(status, StatusCode::NOT_FOUND);
    }
}
