//! Routes decoded inbound events to handlers.

use std::{collections::HashMap, future::Future, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use rtm_core::{SessionSnapshot, UserDirectory};
use rtm_transport::{
    EventPayload, Frame, WireEvent,
    protocol::{MessageEvent, UserChangeEvent},
};
use serde_json::Value;
use tokio::sync::{mpsc, watch};

use crate::{
    addressing::{AddressClass, AddressFilter},
    message::InboundMessage,
    writer::OutboundWriter,
};

/// Handler for classified chat messages.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle one message. Messages are delivered one at a time, in arrival order.
    async fn handle(&self, message: InboundMessage);
}

/// Handler for event kinds the client does not interpret itself.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle one event, given its envelope and the full parsed frame.
    async fn handle(&self, event: &WireEvent, raw: &Value);
}

/// Adapts an async closure into a [`MessageHandler`].
pub struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> MessageHandler for FnHandler<F>
where
    F: Fn(InboundMessage) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn handle(&self, message: InboundMessage) {
        (self.0)(message).await;
    }
}

/// Wrap an async closure as a message handler.
#[must_use]
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn MessageHandler>
where
    F: Fn(InboundMessage) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

/// Handler registrations.
#[derive(Clone, Default)]
pub struct Handlers {
    respond: Option<Arc<dyn MessageHandler>>,
    hear: Option<Arc<dyn MessageHandler>>,
    events: HashMap<String, Arc<dyn EventHandler>>,
}

impl Handlers {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle directed and private messages.
    #[must_use]
    pub fn on_respond(mut self, handler: Arc<dyn MessageHandler>) -> Self {
        self.respond = Some(handler);
        self
    }

    /// Handle every other message seen on joined channels.
    #[must_use]
    pub fn on_hear(mut self, handler: Arc<dyn MessageHandler>) -> Self {
        self.hear = Some(handler);
        self
    }

    /// Handle events tagged `kind`. Built-in kinds cannot be overridden.
    #[must_use]
    pub fn on_event(mut self, kind: impl Into<String>, handler: Arc<dyn EventHandler>) -> Self {
        self.events.insert(kind.into(), handler);
        self
    }
}

impl std::fmt::Debug for Handlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handlers")
            .field("respond", &self.respond.is_some())
            .field("hear", &self.hear.is_some())
            .field("events", &self.events.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// What the dispatcher did with one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatched {
    /// Not valid JSON, or not the shape its type requires.
    Malformed,
    /// An acknowledgement or an edit notice.
    Suppressed,
    /// A hello; session state was reloaded.
    Connected,
    /// A user entry was inserted or replaced.
    UserUpdated,
    /// The service reported an error.
    ServiceError,
    /// A chat message was classified and handed to its handler, if any.
    Routed(AddressClass),
    /// A chat message could not be classified.
    Dropped,
    /// An extension handler received the event.
    Extension,
    /// No handler is interested in this kind.
    Ignored,
}

/// Consumes inbound frames and drives handlers.
pub struct Dispatcher {
    handlers: Handlers,
    snapshot: watch::Receiver<Arc<SessionSnapshot>>,
    users: Arc<UserDirectory>,
    writer: OutboundWriter,
    filter: Option<AddressFilter>,
}

impl Dispatcher {
    /// Create a dispatcher. Messages are dropped until the first hello.
    #[must_use]
    pub const fn new(
        handlers: Handlers,
        snapshot: watch::Receiver<Arc<SessionSnapshot>>,
        users: Arc<UserDirectory>,
        writer: OutboundWriter,
    ) -> Self {
        Self {
            handlers,
            snapshot,
            users,
            writer,
            filter: None,
        }
    }

    /// Dispatch frames until the inbound queue closes.
    pub async fn run(mut self, mut inbound: mpsc::Receiver<Bytes>) {
        while let Some(bytes) = inbound.recv().await {
            self.dispatch(&bytes).await;
        }
        tracing::debug!("Inbound queue closed, dispatcher stopped");
    }

    /// Decode and route one frame.
    pub async fn dispatch(&mut self, bytes: &[u8]) -> Dispatched {
        let frame = match Frame::decode(bytes) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!("Dropping inbound frame: {e}");
                return Dispatched::Malformed;
            }
        };
        if frame.is_suppressed() {
            tracing::trace!(reply_to = ?frame.wire.reply_to, "Suppressed frame");
            return Dispatched::Suppressed;
        }

        let payload = match frame.payload() {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!("Dropping inbound frame: {e}");
                return Dispatched::Malformed;
            }
        };

        match payload {
            EventPayload::Hello => {
                self.on_hello();
                Dispatched::Connected
            }
            EventPayload::Message(event) => self.on_message(&event).await,
            EventPayload::UserChange(change) => self.on_user_change(change),
            EventPayload::Error(event) => {
                tracing::error!(code = event.error.code, "Service error: {}", event.error.msg);
                Dispatched::ServiceError
            }
            EventPayload::Other => self.on_extension(&frame).await,
        }
    }

    fn on_hello(&mut self) {
        let snapshot = Arc::clone(&self.snapshot.borrow_and_update());
        self.users.load(&snapshot);

        let identity = snapshot.self_identity.clone();
        if !identity.is_complete() {
            tracing::warn!("Session has no self identity, messages will be dropped");
            self.filter = None;
            return;
        }
        tracing::info!(id = %identity.id, name = %identity.name, "Session ready");
        self.filter = AddressFilter::new(identity)
            .inspect_err(|e| tracing::error!("Failed to build mention pattern: {e}"))
            .ok();
    }

    async fn on_message(&self, event: &MessageEvent) -> Dispatched {
        let Some(filter) = &self.filter else {
            tracing::debug!(channel = %event.channel, "Message before hello, dropping");
            return Dispatched::Dropped;
        };
        let Some(message) = filter.route(event, &self.users, &self.writer) else {
            return Dispatched::Dropped;
        };

        let class = message.class;
        let handler = if class.is_addressed() {
            &self.handlers.respond
        } else {
            &self.handlers.hear
        };
        if let Some(handler) = handler {
            handler.handle(message).await;
        }
        Dispatched::Routed(class)
    }

    fn on_user_change(&self, change: UserChangeEvent) -> Dispatched {
        if change.user.id.is_empty() {
            return Dispatched::Dropped;
        }
        tracing::debug!(user = %change.user.id, "User updated");
        self.users.upsert(change.user);
        Dispatched::UserUpdated
    }

    async fn on_extension(&self, frame: &Frame) -> Dispatched {
        let kind = frame.kind();
        match self.handlers.events.get(kind.as_str()) {
            Some(handler) => {
                handler.handle(&frame.wire, &frame.raw).await;
                Dispatched::Extension
            }
            None => {
                tracing::trace!(kind = kind.as_str(), "No handler for event");
                Dispatched::Ignored
            }
        }
    }
}
