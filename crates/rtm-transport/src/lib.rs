//! Transport layer for the real-time messaging connection.
//!
//! Provides:
//! - Wire protocol and event codec (JSON)
//! - Socket read/write pumps with keepalive
//! - Reconnect supervision with exponential backoff
//! - HTTP handshake (feature: http)

pub mod protocol;
pub mod pump;
pub mod reconnect;

#[cfg(feature = "http")]
pub mod handshake;

pub use protocol::{
    CodecError, EventKind, EventPayload, Frame, OutboundIntent, Sequence, WireEvent,
};
pub use pump::{Pump, PumpError, PumpExit};
pub use reconnect::{ConnectionState, Reconnector};

#[cfg(feature = "http")]
pub use handshake::RtmHandshake;
