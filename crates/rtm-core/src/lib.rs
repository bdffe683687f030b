//! Core abstractions for the real-time messaging client.
//!
//! This crate provides the fundamental building blocks:
//! - `SessionSnapshot` - Self identity, users, channels and endpoint from a handshake
//! - `UserDirectory` - The concurrently updatable user mapping
//! - `ClientConfig` - Transport, backoff and chunking settings
//! - `Handshake` trait for the credential exchange

pub mod config;
pub mod session;
pub mod traits;

pub use config::{BackoffPolicy, ChunkLimits, ClientConfig, DEFAULT_API_URL, MIN_PING_PERIOD, TransportConfig};
pub use session::{Channel, SelfIdentity, SessionSnapshot, User, UserDirectory, UserProfile};
pub use traits::{Handshake, HandshakeError, WsSocket};
