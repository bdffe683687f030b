//! Reconnect supervision.

use std::sync::Arc;

use bytes::Bytes;
use rtm_core::{BackoffPolicy, Handshake, SessionSnapshot, TransportConfig, WsSocket};
use tokio::sync::{mpsc, watch};

use crate::pump::{OutboundQueue, Pump};

/// Observable state of the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// A pump generation is running.
    Connected { generation: u64 },
    /// Waiting for or performing the given (1-based) handshake attempt.
    Reconnecting { attempt: u32 },
    /// Shut down; no further generations will start.
    Stopped,
}

/// Keeps the connection alive for the lifetime of the process.
///
/// Runs one pump generation at a time. When a generation ends it waits for
/// both loops to exit, then repeats the handshake with exponential backoff
/// until a new snapshot and socket are obtained.
pub struct Reconnector {
    handshake: Arc<dyn Handshake>,
    transport: TransportConfig,
    backoff: BackoffPolicy,
    outbound: OutboundQueue,
    inbound: mpsc::Sender<Bytes>,
    snapshot: watch::Sender<Arc<SessionSnapshot>>,
    state: watch::Sender<ConnectionState>,
    shutdown: watch::Receiver<bool>,
}

impl Reconnector {
    /// Create a supervisor.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        handshake: Arc<dyn Handshake>,
        transport: TransportConfig,
        backoff: BackoffPolicy,
        outbound: OutboundQueue,
        inbound: mpsc::Sender<Bytes>,
        snapshot: watch::Sender<Arc<SessionSnapshot>>,
        state: watch::Sender<ConnectionState>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            handshake,
            transport,
            backoff,
            outbound,
            inbound,
            snapshot,
            state,
            shutdown,
        }
    }

    /// Supervise generations, starting with an already-dialled `socket`.
    ///
    /// Returns only after shutdown has been requested.
    pub async fn run(mut self, socket: WsSocket) {
        let mut socket = socket;
        let mut generation: u64 = 1;

        loop {
            self.state.send_replace(ConnectionState::Connected { generation });
            tracing::info!(generation, "Connected");

            let pump = Pump::start(
                socket,
                Arc::clone(&self.outbound),
                self.inbound.clone(),
                self.shutdown.clone(),
                self.transport.clone(),
                generation,
            );
            let exit = pump.join().await;

            if self.shutdown_requested() {
                break;
            }
            match exit.error() {
                Some(e) => tracing::warn!(generation, "Connection lost: {e}"),
                None => tracing::warn!(generation, "Connection ended"),
            }

            let Some((snapshot, next)) = self.redial().await else {
                break;
            };
            self.snapshot.send_replace(Arc::new(snapshot));
            socket = next;
            generation += 1;
        }

        self.state.send_replace(ConnectionState::Stopped);
        tracing::info!("Reconnector stopped");
    }

    fn shutdown_requested(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Retry the handshake until it succeeds or shutdown is requested.
    async fn redial(&mut self) -> Option<(SessionSnapshot, WsSocket)> {
        let mut attempt: u32 = 0;
        loop {
            attempt = attempt.saturating_add(1);
            self.state
                .send_replace(ConnectionState::Reconnecting { attempt });

            let delay = self.backoff.delay(attempt - 1);
            tracing::info!(attempt, delay_ms = delay.as_millis(), "Reconnecting");

            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = wait_for_shutdown(&mut self.shutdown) => return None,
            }

            let result = tokio::select! {
                result = self.handshake.connect() => result,
                () = wait_for_shutdown(&mut self.shutdown) => return None,
            };

            match result {
                Ok(connected) => return Some(connected),
                Err(e) => tracing::warn!(attempt, "Reconnect attempt failed: {e}"),
            }
        }
    }
}

/// Resolve once shutdown is requested or its sender is gone.
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Mutex,
            atomic::{AtomicUsize, Ordering},
        },
        time::{Duration, Instant},
    };

    use async_trait::async_trait;
    use futures::{SinkExt, StreamExt};
    use rtm_core::{HandshakeError, SelfIdentity};
    use tokio_tungstenite::tungstenite::Message;

    use super::*;
    use crate::pump::tests::{dial, spawn_peer};

    /// Fails `failures` times, then dials the local peer.
    struct ScriptedHandshake {
        addr: std::net::SocketAddr,
        failures: usize,
        calls: AtomicUsize,
        call_times: Mutex<Vec<Instant>>,
    }

    #[async_trait]
    impl Handshake for ScriptedHandshake {
        async fn connect(&self) -> Result<(SessionSnapshot, WsSocket), HandshakeError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            self.call_times.lock().unwrap().push(Instant::now());
            if call < self.failures {
                return Err(HandshakeError::Http("service unavailable".into()));
            }
            let snapshot = SessionSnapshot::new(
                SelfIdentity::new("U1", format!("Bot-{call}")),
                Vec::new(),
                Vec::new(),
                format!("ws://{}", self.addr),
            );
            Ok((snapshot, dial(self.addr).await))
        }
    }

    struct Harness {
        state: watch::Receiver<ConnectionState>,
        snapshot: watch::Receiver<Arc<SessionSnapshot>>,
        inbound: mpsc::Receiver<Bytes>,
        shutdown: watch::Sender<bool>,
        _outbound: mpsc::Sender<String>,
        task: tokio::task::JoinHandle<()>,
    }

    fn start(handshake: Arc<dyn Handshake>, backoff: BackoffPolicy, socket: WsSocket) -> Harness {
        let (out_tx, out_rx) = mpsc::channel(8);
        let (in_tx, in_rx) = mpsc::channel(8);
        let (snapshot_tx, snapshot_rx) = watch::channel(Arc::new(SessionSnapshot::default()));
        let (state_tx, state_rx) = watch::channel(ConnectionState::Reconnecting { attempt: 0 });
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let reconnector = Reconnector::new(
            handshake,
            TransportConfig::default(),
            backoff,
            Arc::new(tokio::sync::Mutex::new(out_rx)),
            in_tx,
            snapshot_tx,
            state_tx,
            shutdown_rx,
        );
        Harness {
            state: state_rx,
            snapshot: snapshot_rx,
            inbound: in_rx,
            shutdown: shutdown_tx,
            _outbound: out_tx,
            task: tokio::spawn(reconnector.run(socket)),
        }
    }

    #[tokio::test]
    async fn test_reconnects_with_doubling_delays() {
        // First socket is dropped by the peer; later sockets greet and stay open.
        let addr = spawn_peer(|mut ws, n| async move {
            if n == 0 {
                let _ = ws.close(None).await;
                return;
            }
            ws.send(Message::text(r#"{"type":"hello"}"#)).await.unwrap();
            while let Some(Ok(_)) = ws.next().await {}
        })
        .await;

        let handshake = Arc::new(ScriptedHandshake {
            addr,
            failures: 3,
            calls: AtomicUsize::new(0),
            call_times: Mutex::new(Vec::new()),
        });
        let backoff = BackoffPolicy::default()
            .with_initial(Duration::from_millis(40))
            .with_max_delay(None);

        let started = Instant::now();
        let mut h = start(handshake.clone(), backoff, dial(addr).await);

        let frame = tokio::time::timeout(Duration::from_secs(10), h.inbound.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&frame[..], br#"{"type":"hello"}"#);

        h.state
            .wait_for(|s| *s == ConnectionState::Connected { generation: 2 })
            .await
            .unwrap();
        assert_eq!(h.snapshot.borrow().self_identity.name, "Bot-3");

        // Attempts at 40, +80, +160, +320 ms.
        let times = handshake.call_times.lock().unwrap().clone();
        assert_eq!(times.len(), 4);
        let mut expected = Duration::from_millis(40);
        let mut previous = started;
        for t in times {
            assert!(t.duration_since(previous) >= expected);
            previous = t;
            expected *= 2;
        }

        h.shutdown.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), h.task).await.unwrap().unwrap();
        assert_eq!(*h.state.borrow(), ConnectionState::Stopped);
    }

    #[tokio::test]
    async fn test_shutdown_during_backoff_stops_supervisor() {
        let addr = spawn_peer(|mut ws, _| async move {
            let _ = ws.close(None).await;
        })
        .await;

        let handshake = Arc::new(ScriptedHandshake {
            addr,
            failures: usize::MAX,
            calls: AtomicUsize::new(0),
            call_times: Mutex::new(Vec::new()),
        });
        let backoff = BackoffPolicy::default().with_initial(Duration::from_secs(60));
        let mut h = start(handshake.clone(), backoff, dial(addr).await);

        h.state
            .wait_for(|s| matches!(s, ConnectionState::Reconnecting { attempt: 1 }))
            .await
            .unwrap();
        h.shutdown.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(5), h.task).await.unwrap().unwrap();
        assert_eq!(*h.state.borrow(), ConnectionState::Stopped);
        assert_eq!(handshake.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_shutdown_while_connected_closes_without_redial() {
        let addr = spawn_peer(|mut ws, _| async move {
            while let Some(Ok(_)) = ws.next().await {}
        })
        .await;

        let handshake = Arc::new(ScriptedHandshake {
            addr,
            failures: 0,
            calls: AtomicUsize::new(0),
            call_times: Mutex::new(Vec::new()),
        });
        let mut h = start(handshake.clone(), BackoffPolicy::default(), dial(addr).await);
        h.state
            .wait_for(|s| *s == ConnectionState::Connected { generation: 1 })
            .await
            .unwrap();

        h.shutdown.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), h.task).await.unwrap().unwrap();
        assert_eq!(handshake.calls.load(Ordering::SeqCst), 0);
    }
}
