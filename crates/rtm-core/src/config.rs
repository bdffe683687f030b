//! Client configuration.

use std::time::Duration;

/// Default handshake endpoint.
pub const DEFAULT_API_URL: &str = "https://slack.com/api/rtm.start";

/// Shortest keepalive period the pump will run with.
pub const MIN_PING_PERIOD: Duration = Duration::from_millis(10);

/// Socket timing and queue sizing for one connection generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// Time allowed to write a frame to the peer.
    pub write_wait: Duration,
    /// Time allowed to read the next pong from the peer.
    pub pong_wait: Duration,
    /// Keepalive ping period. Must be less than `pong_wait`.
    pub ping_period: Duration,
    /// Capacity of the inbound and outbound frame queues.
    pub queue_capacity: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        let pong_wait = Duration::from_secs(60);
        Self {
            write_wait: Duration::from_secs(10),
            pong_wait,
            ping_period: pong_wait * 9 / 10,
            queue_capacity: 256,
        }
    }
}

impl TransportConfig {
    /// Set the pong wait, deriving the ping period from it.
    #[must_use]
    pub fn with_pong_wait(mut self, pong_wait: Duration) -> Self {
        self.pong_wait = pong_wait;
        self.ping_period = (pong_wait * 9 / 10).max(MIN_PING_PERIOD);
        self
    }

    /// The ping period actually used, never below [`MIN_PING_PERIOD`].
    #[must_use]
    pub fn ping_interval(&self) -> Duration {
        self.ping_period.max(MIN_PING_PERIOD)
    }

    /// Set the write deadline.
    #[must_use]
    pub const fn with_write_wait(mut self, write_wait: Duration) -> Self {
        self.write_wait = write_wait;
        self
    }

    /// Set the queue capacity.
    #[must_use]
    pub const fn with_queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }
}

/// Exponential backoff between reconnect attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay before the first attempt.
    pub initial: Duration,
    /// Growth factor per attempt.
    pub multiplier: u32,
    /// Upper bound on a single delay. `None` lets the delay grow without limit.
    pub max_delay: Option<Duration>,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            multiplier: 2,
            max_delay: Some(Duration::from_secs(300)),
        }
    }
}

impl BackoffPolicy {
    /// Set the initial delay.
    #[must_use]
    pub const fn with_initial(mut self, initial: Duration) -> Self {
        self.initial = initial;
        self
    }

    /// Set or remove the delay ceiling.
    #[must_use]
    pub const fn with_max_delay(mut self, max_delay: Option<Duration>) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Delay before the given zero-based attempt.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let delay = self
            .initial
            .saturating_mul(self.multiplier.saturating_pow(attempt));
        match self.max_delay {
            Some(max) => delay.min(max),
            None => delay,
        }
    }
}

/// Per-message limits imposed by the service on outbound text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkLimits {
    /// Maximum characters per message.
    pub max_chars: usize,
    /// Maximum newlines per message.
    pub max_lines: usize,
}

impl Default for ChunkLimits {
    fn default() -> Self {
        Self {
            max_chars: 4000,
            max_lines: 25,
        }
    }
}

/// Complete client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Handshake endpoint.
    pub api_url: String,
    pub transport: TransportConfig,
    pub backoff: BackoffPolicy,
    pub chunking: ChunkLimits,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            transport: TransportConfig::default(),
            backoff: BackoffPolicy::default(),
            chunking: ChunkLimits::default(),
        }
    }
}

impl ClientConfig {
    /// Override the handshake endpoint.
    #[must_use]
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    /// Override the transport settings.
    #[must_use]
    pub fn with_transport(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }

    /// Override the backoff policy.
    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Override the chunking limits.
    #[must_use]
    pub const fn with_chunking(mut self, chunking: ChunkLimits) -> Self {
        self.chunking = chunking;
        self
    }
}
