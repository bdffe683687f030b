//! Socket read/write pumps for one connection generation.

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use futures::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use rtm_core::{TransportConfig, WsSocket};
use tokio::{
    sync::{Mutex, mpsc, oneshot, watch},
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tokio_tungstenite::tungstenite::{self, Message};

/// Outbound frame queue shared by every generation.
///
/// The writer of the live generation holds the lock for its whole lifetime.
pub type OutboundQueue = Arc<Mutex<mpsc::Receiver<String>>>;

/// Pump error.
#[derive(Debug, thiserror::Error)]
pub enum PumpError {
    #[error("Write failed: {0}")]
    Write(#[source] Box<tungstenite::Error>),
    #[error("Write deadline of {0:?} exceeded")]
    WriteTimeout(Duration),
    #[error("Read failed: {0}")]
    Read(#[source] Box<tungstenite::Error>),
    #[error("No pong within {0:?}")]
    ReadTimeout(Duration),
    #[error("Socket closed by peer")]
    Closed,
    #[error("Pump task failed: {0}")]
    Task(String),
}

/// How the two loops of a generation ended.
#[derive(Debug)]
pub struct PumpExit {
    pub reader: Result<(), PumpError>,
    pub writer: Result<(), PumpError>,
}

impl PumpExit {
    /// The first failure observed, if any.
    #[must_use]
    pub fn error(&self) -> Option<&PumpError> {
        self.reader.as_ref().err().or_else(|| self.writer.as_ref().err())
    }
}

/// The reader and writer loops of one socket.
pub struct Pump {
    generation: u64,
    reader: JoinHandle<Result<(), PumpError>>,
    writer: JoinHandle<Result<(), PumpError>>,
}

impl Pump {
    /// Split `socket` and start both loops.
    ///
    /// Inbound data frames are pushed to `inbound`; frames queued on
    /// `outbound` are written in order. Setting `shutdown` to `true` makes the
    /// writer send a close frame and exit, which ends the reader too.
    #[must_use]
    pub fn start(
        socket: WsSocket,
        outbound: OutboundQueue,
        inbound: mpsc::Sender<Bytes>,
        shutdown: watch::Receiver<bool>,
        config: TransportConfig,
        generation: u64,
    ) -> Self {
        let (sink, stream) = socket.split();
        let (reader_done_tx, reader_done_rx) = oneshot::channel::<()>();
        let (writer_done_tx, writer_done_rx) = oneshot::channel::<()>();

        let writer_config = config.clone();
        let writer = tokio::spawn(async move {
            let result = write_loop(sink, outbound, shutdown, reader_done_rx, &writer_config).await;
            drop(writer_done_tx);
            result
        });

        let reader = tokio::spawn(async move {
            let result = read_loop(stream, inbound, writer_done_rx, &config).await;
            drop(reader_done_tx);
            result
        });

        tracing::debug!(generation, "Pump started");
        Self {
            generation,
            reader,
            writer,
        }
    }

    /// Generation number of this pump.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Wait until both loops have exited.
    pub async fn join(self) -> PumpExit {
        let (reader, writer) = tokio::join!(self.reader, self.writer);
        let flatten = |res: Result<Result<(), PumpError>, tokio::task::JoinError>| {
            res.unwrap_or_else(|e| Err(PumpError::Task(e.to_string())))
        };
        let exit = PumpExit {
            reader: flatten(reader),
            writer: flatten(writer),
        };
        tracing::debug!(generation = self.generation, ?exit, "Pump stopped");
        exit
    }
}

async fn write_frame(
    sink: &mut SplitSink<WsSocket, Message>,
    message: Message,
    wait: Duration,
) -> Result<(), PumpError> {
    match tokio::time::timeout(wait, sink.send(message)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(PumpError::Write(Box::new(e))),
        Err(_) => Err(PumpError::WriteTimeout(wait)),
    }
}

async fn write_loop(
    mut sink: SplitSink<WsSocket, Message>,
    outbound: OutboundQueue,
    mut shutdown: watch::Receiver<bool>,
    mut reader_done: oneshot::Receiver<()>,
    config: &TransportConfig,
) -> Result<(), PumpError> {
    let mut outbound = outbound.lock().await;
    let period = config.ping_interval();
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let result = loop {
        if *shutdown.borrow_and_update() {
            tracing::info!("Closing socket");
            break write_frame(&mut sink, Message::Close(None), config.write_wait).await;
        }

        tokio::select! {
            frame = outbound.recv() => {
                let Some(frame) = frame else {
                    tracing::info!("Outbound queue closed, closing socket");
                    break write_frame(&mut sink, Message::Close(None), config.write_wait).await;
                };
                if let Err(e) = write_frame(&mut sink, Message::text(frame), config.write_wait).await {
                    tracing::warn!("Socket write failed: {e}");
                    break Err(e);
                }
            }
            _ = ticker.tick() => {
                if let Err(e) = write_frame(&mut sink, Message::Ping(Bytes::new()), config.write_wait).await {
                    tracing::warn!("Keepalive ping failed: {e}");
                    break Err(e);
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() {
                    tracing::info!("Shutdown signal dropped, closing socket");
                    break write_frame(&mut sink, Message::Close(None), config.write_wait).await;
                }
            }
            _ = &mut reader_done => break Ok(()),
        }
    };

    let _ = tokio::time::timeout(config.write_wait, sink.close()).await;
    result
}

async fn read_loop(
    mut stream: SplitStream<WsSocket>,
    inbound: mpsc::Sender<Bytes>,
    mut writer_done: oneshot::Receiver<()>,
    config: &TransportConfig,
) -> Result<(), PumpError> {
    let mut deadline = Instant::now() + config.pong_wait;

    loop {
        let next = tokio::select! {
            _ = &mut writer_done => return Ok(()),
            next = tokio::time::timeout_at(deadline, stream.next()) => next,
        };

        let message = match next {
            Err(_) => {
                tracing::warn!("Read deadline expired");
                return Err(PumpError::ReadTimeout(config.pong_wait));
            }
            Ok(None) => return Err(PumpError::Closed),
            Ok(Some(Err(e))) => {
                tracing::warn!("Socket read failed: {e}");
                return Err(PumpError::Read(Box::new(e)));
            }
            Ok(Some(Ok(message))) => message,
        };

        let data = match message {
            Message::Pong(_) => {
                deadline = Instant::now() + config.pong_wait;
                continue;
            }
            Message::Text(text) => Bytes::copy_from_slice(text.as_bytes()),
            Message::Binary(data) => data,
            Message::Close(frame) => {
                tracing::info!(?frame, "Peer closed socket");
                return Err(PumpError::Closed);
            }
            Message::Ping(_) | Message::Frame(_) => continue,
        };

        tokio::select! {
            sent = inbound.send(data) => {
                if sent.is_err() {
                    tracing::debug!("Inbound queue closed, stopping reader");
                    return Ok(());
                }
            }
            _ = &mut writer_done => return Ok(()),
        }
    }
}
