//! Client facade wiring the transport, dispatcher and writer together.

use std::sync::Arc;

use rtm_core::{ClientConfig, Handshake, HandshakeError, SessionSnapshot, UserDirectory};
use rtm_transport::{ConnectionState, Reconnector, RtmHandshake};
use tokio::{
    sync::{Mutex, mpsc, watch},
    task::JoinHandle,
};

use crate::{
    dispatcher::{Dispatcher, Handlers},
    writer::{OutboundWriter, WriteError},
};

/// Client error.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Handshake failed: {0}")]
    Handshake(#[from] HandshakeError),
}

/// A running connection to the messaging service.
///
/// Reconnects on its own until [`Client::shutdown`] is called.
pub struct Client {
    writer: OutboundWriter,
    users: Arc<UserDirectory>,
    snapshot: watch::Receiver<Arc<SessionSnapshot>>,
    state: watch::Receiver<ConnectionState>,
    shutdown: watch::Sender<bool>,
    supervisor: JoinHandle<()>,
    dispatcher: JoinHandle<()>,
}

impl Client {
    /// Connect with `token` using the HTTP handshake.
    ///
    /// # Errors
    /// Returns error if the first handshake fails.
    pub async fn connect(
        token: &str,
        config: ClientConfig,
        handlers: Handlers,
    ) -> Result<Self, ClientError> {
        let handshake = Arc::new(RtmHandshake::new(config.api_url.clone(), token));
        Self::connect_with(handshake, config, handlers).await
    }

    /// Connect using a custom handshake.
    ///
    /// The first handshake is performed before returning. Later ones are
    /// retried with backoff by the supervisor.
    ///
    /// # Errors
    /// Returns error if the first handshake fails.
    pub async fn connect_with(
        handshake: Arc<dyn Handshake>,
        config: ClientConfig,
        handlers: Handlers,
    ) -> Result<Self, ClientError> {
        let (snapshot, socket) = handshake.connect().await?;

        let capacity = config.transport.queue_capacity;
        let (outbound_tx, outbound_rx) = mpsc::channel(capacity);
        let (inbound_tx, inbound_rx) = mpsc::channel(capacity);
        let (snapshot_tx, snapshot_rx) = watch::channel(Arc::new(snapshot));
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connected { generation: 1 });
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let writer = OutboundWriter::new(outbound_tx, config.chunking);
        let users = Arc::new(UserDirectory::new());

        let dispatcher = Dispatcher::new(
            handlers,
            snapshot_rx.clone(),
            Arc::clone(&users),
            writer.clone(),
        );
        let dispatcher = tokio::spawn(dispatcher.run(inbound_rx));

        let reconnector = Reconnector::new(
            handshake,
            config.transport,
            config.backoff,
            Arc::new(Mutex::new(outbound_rx)),
            inbound_tx,
            snapshot_tx,
            state_tx,
            shutdown_rx,
        );
        let supervisor = tokio::spawn(reconnector.run(socket));

        Ok(Self {
            writer,
            users,
            snapshot: snapshot_rx,
            state: state_rx,
            shutdown: shutdown_tx,
            supervisor,
            dispatcher,
        })
    }

    /// Handle for sending messages. Cheap to clone.
    #[must_use]
    pub const fn writer(&self) -> &OutboundWriter {
        &self.writer
    }

    /// Write `text` to `channel`.
    ///
    /// # Errors
    /// Returns error if the client has shut down.
    pub async fn send(&self, channel: &str, text: &str) -> Result<Vec<u64>, WriteError> {
        self.writer.write(channel, text).await
    }

    /// The snapshot of the most recent handshake.
    #[must_use]
    pub fn snapshot(&self) -> Arc<SessionSnapshot> {
        Arc::clone(&self.snapshot.borrow())
    }

    /// Users known to the current session.
    #[must_use]
    pub fn users(&self) -> &UserDirectory {
        &self.users
    }

    /// Watch the connection state.
    #[must_use]
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Close the connection and wait for all background tasks to finish.
    pub async fn shutdown(self) {
        tracing::info!("Shutting down client");
        self.shutdown.send_replace(true);
        if let Err(e) = self.supervisor.await {
            tracing::error!("Supervisor task failed: {e}");
        }
        if let Err(e) = self.dispatcher.await {
            tracing::error!("Dispatcher task failed: {e}");
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::{net::SocketAddr, time::Duration};

    use async_trait::async_trait;
    use futures::{SinkExt, StreamExt};
    use rtm_core::{BackoffPolicy, SelfIdentity, TransportConfig, User, WsSocket};
    use serde_json::Value;
    use tokio::net::{TcpListener, TcpStream};
    use tokio_tungstenite::{WebSocketStream, accept_async, tungstenite::Message};

    use super::*;
    use crate::dispatcher::handler_fn;

    /// Bind a local websocket peer; each accepted socket is handed to `on_accept`.
    async fn spawn_peer<F, Fut>(on_accept: F) -> SocketAddr
    where
        F: Fn(WebSocketStream<TcpStream>, usize) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut count = 0;
            while let Ok((tcp, _)) = listener.accept().await {
                if let Ok(ws) = accept_async(tcp).await {
                    tokio::spawn(on_accept(ws, count));
                    count += 1;
                }
            }
        });
        addr
    }

    /// Next text frame from the client, skipping control frames.
    async fn next_text(ws: &mut WebSocketStream<TcpStream>) -> Option<String> {
        while let Some(Ok(msg)) = ws.next().await {
            if let Message::Text(text) = msg {
                return Some(text.as_str().to_owned());
            }
        }
        None
    }

    struct LocalHandshake {
        addr: Option<SocketAddr>,
    }

    #[async_trait]
    impl Handshake for LocalHandshake {
        async fn connect(&self) -> Result<(SessionSnapshot, WsSocket), HandshakeError> {
            let addr = self
                .addr
                .ok_or_else(|| HandshakeError::Rejected("invalid_auth".into()))?;
            let snapshot = SessionSnapshot::new(
                SelfIdentity::new("U1", "bot"),
                vec![User::new("U2", "alice")],
                Vec::new(),
                format!("ws://{addr}"),
            );
            let (socket, _) = tokio_tungstenite::connect_async(snapshot.endpoint.as_str()).await?;
            Ok((snapshot, socket))
        }
    }

    fn config() -> ClientConfig {
        ClientConfig::default()
            .with_backoff(BackoffPolicy::default().with_initial(Duration::from_millis(20)))
    }

    fn echo_handlers() -> Handlers {
        Handlers::new().on_respond(handler_fn(|msg| async move {
            let _ = msg.respond(&format!("echo {}", msg.text)).await;
        }))
    }

    #[tokio::test]
    async fn test_initial_handshake_failure_is_returned() {
        let err = Client::connect_with(
            Arc::new(LocalHandshake { addr: None }),
            config(),
            Handlers::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ClientError::Handshake(HandshakeError::Rejected(_))));
    }

    #[tokio::test]
    async fn test_echo_survives_reconnect() {
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel::<(usize, String)>();
        let addr = spawn_peer(move |mut ws, n| {
            let seen = seen_tx.clone();
            async move {
                ws.send(Message::text(r#"{"type":"hello"}"#)).await.unwrap();
                let text = format!("<@U1>: ping {n}");
                let frame = serde_json::json!({
                    "type": "message", "channel": "C1", "user": "U2", "text": text,
                });
                ws.send(Message::text(frame.to_string())).await.unwrap();
                if let Some(reply) = next_text(&mut ws).await {
                    let _ = seen.send((n, reply));
                }
                if n == 0 {
                    let _ = ws.close(None).await;
                } else {
                    while next_text(&mut ws).await.is_some() {}
                }
            }
        })
        .await;

        let client = Client::connect_with(
            Arc::new(LocalHandshake { addr: Some(addr) }),
            config(),
            echo_handlers(),
        )
        .await
        .unwrap();
        let mut state = client.state();

        let mut replies = Vec::new();
        for _ in 0..2 {
            let (n, reply) = tokio::time::timeout(Duration::from_secs(10), seen_rx.recv())
                .await
                .unwrap()
                .unwrap();
            let reply: Value = serde_json::from_str(&reply).unwrap();
            replies.push((n, reply));
        }

        assert_eq!(replies[0].0, 0);
        assert_eq!(replies[0].1["id"], 1);
        assert_eq!(replies[0].1["text"], "<@U2>: echo ping 0");
        assert_eq!(replies[1].0, 1);
        assert_eq!(replies[1].1["id"], 2);
        assert_eq!(replies[1].1["text"], "<@U2>: echo ping 1");

        state
            .wait_for(|s| *s == ConnectionState::Connected { generation: 2 })
            .await
            .unwrap();
        assert_eq!(client.users().display_name("U2"), "alice");
        assert_eq!(client.snapshot().self_identity.name, "bot");

        tokio::time::timeout(Duration::from_secs(5), client.shutdown())
            .await
            .unwrap();
        assert_eq!(*state.borrow(), ConnectionState::Stopped);
    }

    #[tokio::test]
    async fn test_send_reaches_peer() {
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel::<String>();
        let addr = spawn_peer(move |mut ws, _| {
            let seen = seen_tx.clone();
            async move {
                while let Some(text) = next_text(&mut ws).await {
                    let _ = seen.send(text);
                }
            }
        })
        .await;

        let client = Client::connect_with(
            Arc::new(LocalHandshake { addr: Some(addr) }),
            config(),
            Handlers::new(),
        )
        .await
        .unwrap();

        let ids = client.send("C5", "status report").await.unwrap();
        assert_eq!(ids, vec![1]);

        let frame = tokio::time::timeout(Duration::from_secs(5), seen_rx.recv())
            .await
            .unwrap()
            .unwrap();
        let frame: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(frame["channel"], "C5");
        assert_eq!(frame["text"], "status report");

        client.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_completes_with_saturated_queues() {
        let addr = spawn_peer(|mut ws, _| async move {
            let _ = ws.send(Message::text(r#"{"type":"hello"}"#)).await;
            for i in 0..20 {
                let frame = serde_json::json!({
                    "type": "message", "channel": "C1", "user": "U2", "text": format!("bot job {i}"),
                });
                if ws.send(Message::text(frame.to_string())).await.is_err() {
                    return;
                }
            }
            while next_text(&mut ws).await.is_some() {}
        })
        .await;

        // A slow handler whose multi-chunk answer outgrows the tiny queues.
        let handlers = Handlers::new().on_respond(handler_fn(|msg| async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            let report: String = (0..100).map(|i| format!("line {i}\n")).collect();
            let _ = msg.respond(&report).await;
        }));
        let config = config()
            .with_transport(TransportConfig::default().with_queue_capacity(2));

        let client = Client::connect_with(
            Arc::new(LocalHandshake { addr: Some(addr) }),
            config,
            handlers,
        )
        .await
        .unwrap();
        let state = client.state();

        tokio::time::sleep(Duration::from_millis(200)).await;
        tokio::time::timeout(Duration::from_secs(10), client.shutdown())
            .await
            .unwrap();
        assert_eq!(*state.borrow(), ConnectionState::Stopped);
    }
}
