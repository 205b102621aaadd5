use async_trait::async_trait;
use bytes::Bytes;
use lib_streams::core::{ConnectionRegistry, DeliveryOutcome, PushChannel};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

/// Frames a socket may have queued before further sends fail.
pub const SOCKET_QUEUE_CAPACITY: usize = 64;

/// Live WebSocket sessions of one stream, keyed by connection id.
///
/// A connection id the gateway does not know, or whose socket task has
/// ended, is reported as gone so the broadcaster prunes it. A socket whose
/// queue is full misses the frame; it stays registered.
#[derive(Clone)]
pub struct WsGateway {
    sockets: Arc<RwLock<HashMap<String, mpsc::Sender<Bytes>>>>,
    capacity: usize,
}

impl Default for WsGateway {
    fn default() -> Self {
        Self::with_capacity(SOCKET_QUEUE_CAPACITY)
    }
}

impl WsGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            sockets: Arc::default(),
            capacity: capacity.max(1),
        }
    }

    /// Registers a socket task and returns the queue it drains.
    pub async fn attach(&self, connection_id: &str) -> mpsc::Receiver<Bytes> {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.sockets.write().await.insert(connection_id.to_string(), tx);
        rx
    }

    pub async fn detach(&self, connection_id: &str) {
        self.sockets.write().await.remove(connection_id);
    }

    pub async fn connected(&self) -> usize {
        self.sockets.read().await.len()
    }
}

#[async_trait]
impl PushChannel for WsGateway {
    async fn send(&self, connection_id: &str, payload: Bytes) -> DeliveryOutcome {
        let sockets = self.sockets.read().await;
        match sockets.get(connection_id) {
            Some(tx) => match tx.try_send(payload) {
                Ok(()) => DeliveryOutcome::Delivered,
                Err(TrySendError::Full(_)) => DeliveryOutcome::Failed("queue full".to_string()),
                Err(TrySendError::Closed(_)) => DeliveryOutcome::Gone,
            },
            None => DeliveryOutcome::Gone,
        }
    }
}

/// What the WebSocket route of one stream needs.
#[derive(Clone)]
pub struct StreamEndpoint {
    pub registry: ConnectionRegistry,
    pub gateway: WsGateway,
}

#[derive(Clone)]
pub struct AppState {
    endpoints: Arc<HashMap<String, StreamEndpoint>>,
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(endpoints: HashMap<String, StreamEndpoint>, shutdown: CancellationToken) -> Self {
        Self {
            endpoints: Arc::new(endpoints),
            shutdown,
        }
    }

    pub fn endpoint(&self, stream: &str) -> Option<&StreamEndpoint> {
        self.endpoints.get(stream)
    }

    pub fn streams(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.endpoints.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn attached_socket_receives_and_detached_is_gone() {
        let gateway = WsGateway::new();
        let mut rx = gateway.attach("ws-1").await;

        let outcome = gateway.send("ws-1", Bytes::from_static(b"[]")).await;
        assert_eq!(outcome, DeliveryOutcome::Delivered);
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"[]"));

        gateway.detach("ws-1").await;
        assert_eq!(gateway.send("ws-1", Bytes::new()).await, DeliveryOutcome::Gone);
    }

    #[tokio::test]
    async fn slow_socket_misses_frames_once_its_queue_is_full() {
        let gateway = WsGateway::with_capacity(2);
        let mut rx = gateway.attach("ws-3").await;

        assert_eq!(gateway.send("ws-3", Bytes::from_static(b"1")).await, DeliveryOutcome::Delivered);
        assert_eq!(gateway.send("ws-3", Bytes::from_static(b"2")).await, DeliveryOutcome::Delivered);
        assert_eq!(
            gateway.send("ws-3", Bytes::from_static(b"3")).await,
            DeliveryOutcome::Failed("queue full".to_string())
        );

        // Draining frees room again; the dropped frame is not replayed.
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"1"));
        assert_eq!(gateway.send("ws-3", Bytes::from_static(b"4")).await, DeliveryOutcome::Delivered);
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"2"));
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"4"));
        assert_eq!(gateway.connected().await, 1);
    }

    #[tokio::test]
    async fn ended_socket_task_is_gone() {
        let gateway = WsGateway::new();
        drop(gateway.attach("ws-2").await);
        assert_eq!(gateway.send("ws-2", Bytes::new()).await, DeliveryOutcome::Gone);
        assert_eq!(gateway.connected().await, 1);
    }
}
