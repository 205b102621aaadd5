use crate::streams_logic::state::{AppState, StreamEndpoint};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use bytes::Bytes;
use futures_util::StreamExt;
use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;

pub fn router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/{stream}", get(ws_handler))
        .with_state(app_state)
}

pub async fn run(port: u16, app_state: AppState) -> anyhow::Result<()> {
    let shutdown = app_state.shutdown.clone();
    let app = router(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    log::info!("Downstream server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            log::info!("Downstream server shutting down.");
        })
        .await?;
    Ok(())
}

async fn ws_handler(
    Path(stream): Path<String>,
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> Response {
    match state.endpoint(&stream) {
        Some(endpoint) => {
            let endpoint = endpoint.clone();
            let shutdown = state.shutdown.clone();
            ws.on_upgrade(move |socket| handle_socket(socket, stream, endpoint, shutdown))
        }
        None => (StatusCode::NOT_FOUND, format!("Unknown stream '{}'", stream)).into_response(),
    }
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, format!("OK {}", state.streams().join(",")))
}

fn to_message(frame: Bytes) -> Message {
    // Payloads are JSON, so this is the text path in practice
    match String::from_utf8(frame.to_vec()) {
        Ok(text) => Message::Text(text.into()),
        Err(_) => Message::Binary(frame),
    }
}

async fn handle_socket(
    mut socket: WebSocket,
    stream: String,
    endpoint: StreamEndpoint,
    shutdown: CancellationToken,
) {
    let connection_id = uuid::Uuid::new_v4().to_string();
    let mut outbound = endpoint.gateway.attach(&connection_id).await;
    if let Err(e) = endpoint.registry.register(&connection_id).await {
        log::error!("[{}] Failed to register connection {}: {}", stream, connection_id, e);
        endpoint.gateway.detach(&connection_id).await;
        return;
    }
    log::info!("[{}] Client {} connected", stream, connection_id);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                let _ = socket.send(Message::Close(None)).await;
                break;
            }
            incoming = socket.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        log::debug!("[{}] Client {} socket error: {}", stream, connection_id, e);
                        break;
                    }
                    // Subscribers only listen; anything else they send is ignored
                    Some(Ok(_)) => {}
                }
            }
            frame = outbound.recv() => {
                let Some(frame) = frame else { break };
                if let Err(e) = socket.send(to_message(frame)).await {
                    log::debug!("[{}] Send to {} failed: {}", stream, connection_id, e);
                    break;
                }
            }
        }
    }

    endpoint.gateway.detach(&connection_id).await;
    if let Err(e) = endpoint.registry.unregister(&connection_id).await {
        log::warn!("[{}] Failed to unregister connection {}: {}", stream, connection_id, e);
    }
    log::info!("[{}] Client {} disconnected", stream, connection_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streams_logic::state::WsGateway;
    use lib_streams::connections::MemoryStore;
    use lib_streams::core::ConnectionRegistry;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn app_state() -> AppState {
        let endpoint = StreamEndpoint {
            registry: ConnectionRegistry::new(Arc::new(MemoryStore::new())),
            gateway: WsGateway::new(),
        };
        AppState::new(
            HashMap::from([("flightplans".to_string(), endpoint)]),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn health_lists_the_served_streams() {
        let response = health_handler(State(app_state())).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn json_frames_become_text_messages() {
        let message = to_message(Bytes::from_static(br#"[{"type":"LANDED"}]"#));
        assert!(matches!(message, Message::Text(ref t) if t.as_str() == r#"[{"type":"LANDED"}]"#));
    }
}
