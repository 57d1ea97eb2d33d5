//! LinkUp matchmaking and signaling server.

mod config;
mod directory;
mod error;
mod geo;
mod handlers;
mod matching;
mod protocol;
mod state;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{Html, IntoResponse, Json},
    routing::get,
    Router,
};
use config::Config;
use directory::{Directory, MemoryDirectory};
use futures::{SinkExt, StreamExt};
use protocol::{ClientMessage, ServerMessage};
use state::AppState;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env();

    // Logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&config.log_level))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // The durable stores are external collaborators; the in-process
    // directory serves single-node deployments.
    let directory = Arc::new(Directory::in_memory(Arc::new(MemoryDirectory::new())));
    let state = Arc::new(AppState::new(config.clone(), directory));

    // Optional periodic re-search for queued users. Disabled by default:
    // searches then run only when another user enqueues.
    if config.matching.retry_secs > 0 {
        let retry_state = state.clone();
        let secs = config.matching.retry_secs;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(secs));
            loop {
                interval.tick().await;
                handlers::run_retry_pass(&retry_state).await;
            }
        });
    }

    // CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Router
    let app = Router::new()
        .route("/", get(index_handler))
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler))
        .layer(cors)
        .with_state(state.clone());

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("🚀 LinkUp matching server started");
    tracing::info!("Address: {}", addr);
    tracing::info!("WebSocket: ws://{}/ws", addr);

    axum::serve(listener, app).await?;
    Ok(())
}

async fn index_handler() -> Html<&'static str> {
    Html("<h1>LinkUp Matching Server (Rust)</h1><p>WebSocket endpoint: /ws?token=...</p>")
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let (global_queue, local_queue, active_matches) = state.matcher.gauges().await;
    Json(serde_json::json!({
        "status": "ok",
        "server": "linkup-matching-rs",
        "sessions": state.sessions.len(),
        "global_queue": global_queue,
        "local_queue": local_queue,
        "active_matches": active_matches,
        "timestamp": std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }))
}

/// Identity is verified before the upgrade; an unresolvable token never
/// reaches a queue.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let token = params.get("token").cloned().unwrap_or_default();
    match state.directory.identity.resolve(&token).await {
        Ok(Some(user_id)) => ws
            .on_upgrade(move |socket| handle_socket(socket, state, user_id))
            .into_response(),
        Ok(None) => {
            tracing::warn!("WebSocket upgrade rejected: invalid token");
            (StatusCode::UNAUTHORIZED, "invalid token").into_response()
        }
        Err(err) => {
            tracing::error!(error = %err, "identity collaborator unavailable");
            (StatusCode::SERVICE_UNAVAILABLE, "identity unavailable").into_response()
        }
    }
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, user_id: String) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    let connection_id = handlers::handle_connection(&state, &user_id, tx.clone()).await;

    // Outbound pump
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Ok(json) = serde_json::to_string(&msg) {
                if ws_sender.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
        }
    });

    // Inbound loop
    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(msg) => handle_client_message(&state, &user_id, &tx, msg).await,
                Err(err) => {
                    tracing::debug!(user_id = %user_id, error = %err, "unparseable client message");
                    let _ = tx.send(ServerMessage::Error {
                        code: "validation".to_string(),
                        message: "unrecognized message".to_string(),
                    });
                }
            },
            Ok(Message::Close(_)) => break,
            Err(_) => break,
            _ => {}
        }
    }

    handlers::handle_disconnect(&state, &user_id, &connection_id).await;
    send_task.abort();
}

async fn handle_client_message(
    state: &Arc<AppState>,
    user_id: &str,
    sender: &mpsc::UnboundedSender<ServerMessage>,
    msg: ClientMessage,
) {
    match msg {
        ClientMessage::Heartbeat => {
            handlers::handle_heartbeat(state, user_id, sender);
        }
        ClientMessage::StartSearch { prefs, local } => {
            handlers::handle_start_search(state, user_id, prefs, local).await;
        }
        ClientMessage::StopSearch => {
            handlers::handle_stop_search(state, user_id).await;
        }
        ClientMessage::Skip => {
            handlers::handle_skip(state, user_id).await;
        }
        ClientMessage::Offer { payload } => {
            handlers::handle_offer(state, user_id, payload).await;
        }
        ClientMessage::Answer { payload } => {
            handlers::handle_answer(state, user_id, payload).await;
        }
        ClientMessage::IceCandidate { payload } => {
            handlers::handle_ice_candidate(state, user_id, payload).await;
        }
        ClientMessage::MediaToggle { payload } => {
            handlers::handle_media_toggle(state, user_id, payload).await;
        }
        ClientMessage::EndCall => {
            handlers::handle_end_call(state, user_id).await;
        }
        ClientMessage::TypingStart { conversation_id } => {
            handlers::handle_typing_start(state, user_id, &conversation_id).await;
        }
        ClientMessage::TypingStop { conversation_id } => {
            handlers::handle_typing_stop(state, user_id, &conversation_id).await;
        }
        ClientMessage::PresenceSubscribe { user_ids } => {
            handlers::handle_subscribe(state, sender, user_ids);
        }
    }
}
