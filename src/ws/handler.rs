//! WebSocket upgrade handler

use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use serde::Deserialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::http::routes::AppError;
use crate::session::SessionHandle;
use crate::ws::connection::Connection;
use crate::ws::pump::{reject, run_inbound, run_outbound, PumpConfig};

/// Query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Session join code
    pub lobby: Option<String>,
}

/// WebSocket upgrade handler.
///
/// The session is resolved before upgrading so bad codes get a plain
/// HTTP error.
pub async fn ws_handler(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, AppError> {
    let code = query
        .lobby
        .filter(|code| !code.trim().is_empty())
        .ok_or_else(|| AppError::BadRequest("Missing lobby code".to_string()))?;

    let session = state
        .sessions
        .get(&code)
        .ok_or_else(|| AppError::NotFound("Lobby not found".to_string()))?;

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => {
            warn!(code = %session.code(), error = %rejection, "WebSocket upgrade rejected");
            return Ok(rejection.into_response());
        }
    };

    let config = state.config.pump.clone();
    Ok(ws
        .max_message_size(config.max_frame_bytes)
        .on_upgrade(move |socket| handle_socket(socket, session, config)))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, session: SessionHandle, config: PumpConfig) {
    let player_id = Uuid::new_v4();
    info!(code = %session.code(), player_id = %player_id, "New WebSocket connection");

    let Connection {
        handle,
        outbound,
        shutdown,
    } = Connection::new(player_id, config.outbound_capacity);
    let (ws_sink, ws_stream) = socket.split();

    if let Err(e) = session.register(handle).await {
        warn!(player_id = %player_id, error = %e, "Failed to register connection");
        if let Err(e) = reject(ws_sink, "Lobby is closed", &config).await {
            debug!(player_id = %player_id, error = %e, "Failed to send rejection");
        }
        return;
    }

    let writer = {
        let shutdown = shutdown.clone();
        let config = config.clone();
        tokio::spawn(async move {
            if let Err(e) = run_outbound(ws_sink, outbound, shutdown, &config).await {
                debug!(player_id = %player_id, error = %e, "Outbound pump stopped");
            }
        })
    };

    if let Err(e) = run_inbound(ws_stream, player_id, session, shutdown, &config).await {
        debug!(player_id = %player_id, error = %e, "Inbound pump stopped");
    }

    let _ = writer.await;
    info!(player_id = %player_id, "WebSocket connection closed");
}
