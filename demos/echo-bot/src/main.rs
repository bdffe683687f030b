//! Example bot that echoes messages addressed to it.
//!
//! Run with: RTM_TOKEN=xoxb-... cargo run -p echo-bot-demo
//!
//! Then mention the bot, or message it directly.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use clap::Parser;
use rtm_client::{
    Client, ClientConfig, EventHandler, Handlers, InboundMessage, WireEvent, handler_fn,
};
use serde_json::Value;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(about = "Echo messages addressed to the bot")]
struct Args {
    /// Bot token.
    #[arg(long, env = "RTM_TOKEN", hide_env_values = true)]
    token: String,

    /// Start endpoint of the service.
    #[arg(long, env = "RTM_API_URL", default_value = rtm_client::DEFAULT_API_URL)]
    api_url: String,

    /// Channel to announce startup in.
    #[arg(long)]
    announce: Option<String>,
}

/// Logs presence changes.
struct PresenceLogger;

#[async_trait]
impl EventHandler for PresenceLogger {
    async fn handle(&self, event: &WireEvent, raw: &Value) {
        let presence = raw.get("presence").and_then(Value::as_str).unwrap_or("unknown");
        tracing::info!(user = ?event.user, presence, "Presence changed");
    }
}

async fn echo(message: InboundMessage) {
    tracing::info!(from = %message.from, channel = %message.channel, "Echoing: {}", message.text);
    if let Err(e) = message.respond(&message.text).await {
        tracing::error!("Failed to respond: {e}");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let config = ClientConfig::default().with_api_url(args.api_url);

    let handlers = Handlers::new()
        .on_respond(handler_fn(echo))
        .on_hear(handler_fn(|message: InboundMessage| async move {
            tracing::debug!(channel = %message.channel, from = %message.from, "Heard: {}", message.text);
        }))
        .on_event("presence_change", Arc::new(PresenceLogger));

    let client = Client::connect(&args.token, config, handlers)
        .await
        .context("failed to connect")?;
    tracing::info!(name = %client.snapshot().self_identity.name, "Bot is running");

    if let Some(channel) = args.announce {
        client
            .send(&channel, "echo bot online")
            .await
            .context("failed to announce")?;
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    client.shutdown().await;
    Ok(())
}
