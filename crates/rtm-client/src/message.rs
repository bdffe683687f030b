//! Inbound messages handed to handlers.

use crate::{
    addressing::AddressClass,
    writer::{OutboundWriter, WriteError},
};

/// How `respond` shapes its answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseStrategy {
    /// Prefix the answer with a mention of the sender.
    Reply,
    /// Send the answer as-is.
    Send,
}

impl ResponseStrategy {
    /// Render `text` as an answer to `sender_id`.
    #[must_use]
    pub fn render(self, sender_id: &str, text: &str) -> String {
        match self {
            Self::Reply => format!("<@{sender_id}>: {text}"),
            Self::Send => text.to_string(),
        }
    }
}

/// A chat message, already classified and stripped of any mention prefix.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Message text. For directed messages this is the remainder after the mention.
    pub text: String,
    /// Display name of the sender, empty if unknown.
    pub from: String,
    pub from_id: String,
    pub channel: String,
    pub class: AddressClass,
    pub strategy: ResponseStrategy,
    writer: OutboundWriter,
}

impl InboundMessage {
    /// Create a message bound to `writer`.
    #[must_use]
    pub const fn new(
        text: String,
        from: String,
        from_id: String,
        channel: String,
        class: AddressClass,
        writer: OutboundWriter,
    ) -> Self {
        Self {
            text,
            from,
            from_id,
            channel,
            class,
            strategy: class.strategy(),
            writer,
        }
    }

    /// Post `text` to the originating channel.
    ///
    /// # Errors
    /// Returns error if the outbound queue is closed.
    pub async fn send(&self, text: &str) -> Result<Vec<u64>, WriteError> {
        self.writer.write(&self.channel, text).await
    }

    /// Post `text` to the originating channel, mentioning the sender.
    ///
    /// # Errors
    /// Returns error if the outbound queue is closed.
    pub async fn reply(&self, text: &str) -> Result<Vec<u64>, WriteError> {
        self.send(&ResponseStrategy::Reply.render(&self.from_id, text))
            .await
    }

    /// Answer using the strategy picked when the message was classified.
    ///
    /// # Errors
    /// Returns error if the outbound queue is closed.
    pub async fn respond(&self, text: &str) -> Result<Vec<u64>, WriteError> {
        self.send(&self.strategy.render(&self.from_id, text)).await
    }

    /// Post `text` to another channel.
    ///
    /// # Errors
    /// Returns error if the outbound queue is closed.
    pub async fn tell(&self, channel: &str, text: &str) -> Result<Vec<u64>, WriteError> {
        self.writer.write(channel, text).await
    }

    /// The writer this message answers through.
    #[must_use]
    pub const fn writer(&self) -> &OutboundWriter {
        &self.writer
    }
}

#[cfg(test)]
mod tests {
    use rtm_core::ChunkLimits;
    use serde_json::Value;
    use tokio::sync::mpsc;

    use super::*;

    fn message(class: AddressClass) -> (InboundMessage, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(8);
        let writer = OutboundWriter::new(tx, ChunkLimits::default());
        let msg = InboundMessage::new(
            "ping".into(),
            "Alice".into(),
            "U2".into(),
            "C1".into(),
            class,
            writer,
        );
        (msg, rx)
    }

    async fn next(rx: &mut mpsc::Receiver<String>) -> Value {
        serde_json::from_str(&rx.recv().await.unwrap()).unwrap()
    }

    #[test]
    fn test_render() {
        assert_eq!(ResponseStrategy::Reply.render("U2", "pong"), "<@U2>: pong");
        assert_eq!(ResponseStrategy::Send.render("U2", "pong"), "pong");
    }

    #[tokio::test]
    async fn test_respond_to_directed_mentions_sender() {
        let (msg, mut rx) = message(AddressClass::Directed);
        msg.respond("pong").await.unwrap();
        let frame = next(&mut rx).await;
        assert_eq!(frame["channel"], "C1");
        assert_eq!(frame["text"], "<@U2>: pong");
    }

    #[tokio::test]
    async fn test_respond_to_private_sends_plain() {
        let (msg, mut rx) = message(AddressClass::Private);
        msg.respond("pong").await.unwrap();
        assert_eq!(next(&mut rx).await["text"], "pong");
    }

    #[tokio::test]
    async fn test_reply_and_tell() {
        let (msg, mut rx) = message(AddressClass::Ambient);
        msg.reply("hi").await.unwrap();
        msg.tell("C9", "elsewhere").await.unwrap();

        let first = next(&mut rx).await;
        assert_eq!(first["text"], "<@U2>: hi");
        assert_eq!(first["id"], 1);
        let second = next(&mut rx).await;
        assert_eq!(second["channel"], "C9");
        assert_eq!(second["text"], "elsewhere");
        assert_eq!(second["id"], 2);
    }
}
