//! Real-time messaging client.
//!
//! Provides:
//! - `Client` - Connects, reconnects and shuts down the session
//! - `Dispatcher` - Routes inbound events to registered handlers
//! - `AddressFilter` - Classifies messages as directed, private or ambient
//! - `OutboundWriter` - Chunks outbound text and assigns correlation ids

pub mod addressing;
pub mod client;
pub mod dispatcher;
pub mod message;
pub mod writer;

pub use addressing::{AddressClass, AddressFilter};
pub use client::{Client, ClientError};
pub use dispatcher::{Dispatched, Dispatcher, EventHandler, Handlers, MessageHandler, handler_fn};
pub use message::{InboundMessage, ResponseStrategy};
pub use writer::{OutboundWriter, WriteError, split_text};

pub use rtm_core::{ClientConfig, DEFAULT_API_URL, SelfIdentity, SessionSnapshot, User};
pub use rtm_transport::{ConnectionState, WireEvent};
