//! Classifies chat messages relative to the agent's identity.

use regex::Regex;
use rtm_core::{SelfIdentity, UserDirectory};
use rtm_transport::protocol::MessageEvent;

use crate::{message::InboundMessage, message::ResponseStrategy, writer::OutboundWriter};

/// Channel ids starting with this mark one-to-one conversations.
pub const DIRECT_CHANNEL_PREFIX: char = 'D';

/// How a message relates to the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressClass {
    /// Starts with a mention of the agent.
    Directed,
    /// Sent in a one-to-one conversation.
    Private,
    /// Anything else seen on a joined channel.
    Ambient,
}

impl AddressClass {
    /// Whether the message goes to the respond handler rather than hear.
    #[must_use]
    pub const fn is_addressed(self) -> bool {
        matches!(self, Self::Directed | Self::Private)
    }

    /// Response strategy for this class.
    #[must_use]
    pub const fn strategy(self) -> ResponseStrategy {
        match self {
            Self::Directed => ResponseStrategy::Reply,
            Self::Private | Self::Ambient => ResponseStrategy::Send,
        }
    }
}

/// Mention matcher for one identity.
///
/// Accepts `<@ID>`, `NAME` or `@NAME`, optionally followed by a colon, then a
/// single space and a non-empty remainder.
#[derive(Debug, Clone)]
pub struct AddressFilter {
    identity: SelfIdentity,
    pattern: Regex,
}

impl AddressFilter {
    /// Build a filter for `identity`.
    ///
    /// # Errors
    /// Returns error if the pattern cannot be compiled.
    pub fn new(identity: SelfIdentity) -> Result<Self, regex::Error> {
        let pattern = Regex::new(&format!(
            r"(?s)^(?:<@{}>|@?{}):? (.+)",
            regex::escape(&identity.id),
            regex::escape(&identity.name),
        ))?;
        Ok(Self { identity, pattern })
    }

    /// Identity this filter matches.
    #[must_use]
    pub const fn identity(&self) -> &SelfIdentity {
        &self.identity
    }

    /// Classify `text` seen on `channel`, returning the class and the text
    /// handlers should see.
    #[must_use]
    pub fn classify<'a>(&self, channel: &str, text: &'a str) -> (AddressClass, &'a str) {
        if let Some(remainder) = self.pattern.captures(text).and_then(|c| c.get(1)) {
            return (AddressClass::Directed, remainder.as_str());
        }
        if channel.starts_with(DIRECT_CHANNEL_PREFIX) {
            (AddressClass::Private, text)
        } else {
            (AddressClass::Ambient, text)
        }
    }

    /// Turn a message event into an inbound message.
    ///
    /// Returns `None` for events without text or channel.
    #[must_use]
    pub fn route(
        &self,
        event: &MessageEvent,
        users: &UserDirectory,
        writer: &OutboundWriter,
    ) -> Option<InboundMessage> {
        let text = event.text.as_deref()?;
        if event.channel.is_empty() {
            return None;
        }

        let (class, text) = self.classify(&event.channel, text);
        let from_id = event.user.clone().unwrap_or_default();
        Some(InboundMessage::new(
            text.to_string(),
            users.display_name(&from_id),
            from_id,
            event.channel.clone(),
            class,
            writer.clone(),
        ))
    }
}
