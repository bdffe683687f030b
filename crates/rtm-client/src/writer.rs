//! Outbound writer: chunking and correlation ids.

use std::sync::Arc;

use rtm_core::ChunkLimits;
use rtm_transport::{CodecError, OutboundIntent, Sequence};
use tokio::sync::{Mutex, mpsc};

/// Characters a long message may be split at, after newlines.
const BREAK_CHARS: &[char] = &[
    '\n', '\t', ' ', '.', ',', '/', '\\', '-', '(', ')', '{', '}', '[', ']', '|', '=', '+', '*',
    '&',
];

/// Outbound write error.
#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error("Encode failed: {0}")]
    Encode(#[from] CodecError),
    #[error("Connection closed")]
    ConnectionClosed,
}

#[derive(Debug)]
struct Inner {
    sequence: Mutex<Sequence>,
    queue: mpsc::Sender<String>,
    limits: ChunkLimits,
}

/// Sends text to channels, split to fit the service's per-message limits.
///
/// Owns the connection's correlation id counter. The counter outlives
/// reconnects, so ids keep increasing across socket generations.
#[derive(Debug, Clone)]
pub struct OutboundWriter {
    inner: Arc<Inner>,
}

impl OutboundWriter {
    /// Create a writer feeding the outbound frame queue.
    #[must_use]
    pub fn new(queue: mpsc::Sender<String>, limits: ChunkLimits) -> Self {
        Self {
            inner: Arc::new(Inner {
                sequence: Mutex::new(Sequence::new()),
                queue,
                limits,
            }),
        }
    }

    /// Write `text` to `channel` as one or more messages.
    ///
    /// Chunks of one call are enqueued contiguously. Returns the correlation
    /// id of every message sent.
    ///
    /// # Errors
    /// Returns error if encoding fails or the connection is gone; remaining
    /// chunks are not sent.
    pub async fn write(&self, channel: &str, text: &str) -> Result<Vec<u64>, WriteError> {
        let mut sequence = self.inner.sequence.lock().await;
        let mut ids = Vec::new();
        for chunk in split_text(text, self.inner.limits) {
            ids.push(
                self.enqueue(&mut sequence, &OutboundIntent::message(channel, chunk))
                    .await?,
            );
        }
        Ok(ids)
    }

    /// Send a single event without chunking.
    ///
    /// # Errors
    /// Returns error if encoding fails or the connection is gone.
    pub async fn send_event(&self, intent: &OutboundIntent) -> Result<u64, WriteError> {
        let mut sequence = self.inner.sequence.lock().await;
        self.enqueue(&mut sequence, intent).await
    }

    /// The most recently assigned correlation id.
    pub async fn last_id(&self) -> u64 {
        self.inner.sequence.lock().await.last()
    }

    async fn enqueue(
        &self,
        sequence: &mut Sequence,
        intent: &OutboundIntent,
    ) -> Result<u64, WriteError> {
        let (id, frame) = sequence.encode(intent)?;
        self.inner
            .queue
            .send(frame)
            .await
            .map_err(|_| WriteError::ConnectionClosed)?;
        tracing::trace!(id, channel = %intent.channel, "Queued outbound event");
        Ok(id)
    }
}

/// Split `text` into chunks that respect `limits`.
///
/// Prefers breaking at the newline that keeps the line count within limits,
/// then at the last newline, then at the last word or punctuation break,
/// and finally hard-breaks at the character limit. The break character
/// itself is dropped unless the break was a hard one.
#[must_use]
pub fn split_text(text: &str, limits: ChunkLimits) -> Vec<&str> {
    let max_chars = limits.max_chars.max(1);
    let mut rest = text;
    let mut chunks = Vec::new();

    while !rest.is_empty() {
        let limit = rest.char_indices().nth(max_chars).map_or(rest.len(), |(i, _)| i);
        if limit == rest.len() && rest.matches('\n').count() <= limits.max_lines {
            chunks.push(rest);
            break;
        }

        let prefix = &rest[..limit];
        let (end, skip) = if let Some((i, _)) = prefix.match_indices('\n').nth(limits.max_lines) {
            (i, 1)
        } else if let Some(i) = prefix.rfind('\n') {
            (i, 1)
        } else if let Some(i) = prefix.rfind(BREAK_CHARS) {
            (i, 1)
        } else {
            (limit, 0)
        };

        if end > 0 {
            chunks.push(&rest[..end]);
        }
        rest = &rest[end + skip..];
    }

    chunks
}
