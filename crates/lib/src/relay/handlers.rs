//! Per-kind relay handlers, run after the authorization gate has resolved the bridge.

use crate::identity::{Direction, IdentityMap, SourceMessageId};
use crate::platform::DestinationPlatform;
use crate::relay::files::{compose_caption, FileRelayPipeline, RelayJob};
use crate::relay::{BridgeContext, ReadinessGate, RelayError};
use crate::router::Event;
use async_trait::async_trait;
use std::sync::Arc;

/// Turns Telegram text into what is posted on Discord.
pub trait TextFormatter: Send + Sync {
    fn format(&self, sender_name: &str, text: &str) -> String;
}

/// Prefixes the sender in bold and passes the text through unchanged.
pub struct PlainFormatter;

impl TextFormatter for PlainFormatter {
    fn format(&self, sender_name: &str, text: &str) -> String {
        compose_caption(sender_name, text)
    }
}

/// Handles one event for a bridged chat.
#[async_trait]
pub trait BridgeHandler: Send + Sync {
    async fn handle(&self, event: Event, bridge: BridgeContext) -> Result<(), RelayError>;
}

fn source_id(event: &Event) -> SourceMessageId {
    let message = event.message();
    SourceMessageId::new(message.chat.id, message.message_id)
}

/// New text messages: send, then record the mapping for later edits.
pub struct TextHandler {
    destination: Arc<dyn DestinationPlatform>,
    identities: IdentityMap,
    formatter: Arc<dyn TextFormatter>,
    ready: ReadinessGate,
}

impl TextHandler {
    pub fn new(
        destination: Arc<dyn DestinationPlatform>,
        identities: IdentityMap,
        formatter: Arc<dyn TextFormatter>,
        ready: ReadinessGate,
    ) -> Self {
        Self {
            destination,
            identities,
            formatter,
            ready,
        }
    }
}

#[async_trait]
impl BridgeHandler for TextHandler {
    async fn handle(&self, event: Event, bridge: BridgeContext) -> Result<(), RelayError> {
        let message = event.message();
        let Some(text) = message.text.as_deref() else {
            return Ok(());
        };
        self.ready.wait().await?;
        let content = self.formatter.format(&message.sender_name(), text);
        let sent = self
            .destination
            .send_text(&bridge.channel_id, &content)
            .await
            .map_err(RelayError::Send)?;
        self.identities
            .insert(Direction::TelegramToDiscord, source_id(&event), sent)
            .await?;
        Ok(())
    }
}

/// Photos, stickers, documents, voice, audio and video: one file relay per message.
pub struct MediaHandler {
    pipeline: FileRelayPipeline,
    identities: IdentityMap,
}

impl MediaHandler {
    pub fn new(pipeline: FileRelayPipeline, identities: IdentityMap) -> Self {
        Self {
            pipeline,
            identities,
        }
    }
}

#[async_trait]
impl BridgeHandler for MediaHandler {
    async fn handle(&self, event: Event, bridge: BridgeContext) -> Result<(), RelayError> {
        let Some(job) = RelayJob::for_event(&event, &bridge) else {
            log::debug!(
                "[{}] {} message {} has no file to relay",
                bridge.name,
                event.kind(),
                event.message().message_id
            );
            return Ok(());
        };
        let sent = self.pipeline.relay(job).await?;
        self.identities
            .insert(Direction::TelegramToDiscord, source_id(&event), sent)
            .await?;
        Ok(())
    }
}

/// Edited messages: re-render the text onto the Discord message the original was relayed as.
pub struct EditHandler {
    destination: Arc<dyn DestinationPlatform>,
    identities: IdentityMap,
    formatter: Arc<dyn TextFormatter>,
    ready: ReadinessGate,
}

impl EditHandler {
    pub fn new(
        destination: Arc<dyn DestinationPlatform>,
        identities: IdentityMap,
        formatter: Arc<dyn TextFormatter>,
        ready: ReadinessGate,
    ) -> Self {
        Self {
            destination,
            identities,
            formatter,
            ready,
        }
    }
}

#[async_trait]
impl BridgeHandler for EditHandler {
    async fn handle(&self, event: Event, bridge: BridgeContext) -> Result<(), RelayError> {
        let message = event.message();
        let source = source_id(&event);
        let Some(target) = self
            .identities
            .lookup(Direction::TelegramToDiscord, source)
            .await
        else {
            // Original predates this process or was never relayed successfully.
            log::info!(
                "[{}] no relayed message for edited message {}, edit dropped",
                bridge.name,
                source
            );
            return Ok(());
        };
        let Some(text) = message.text_or_caption() else {
            log::debug!("[{}] edit of {} carries no text", bridge.name, source);
            return Ok(());
        };
        self.ready.wait().await?;
        let content = self.formatter.format(&message.sender_name(), text);
        self.destination
            .edit_text(&bridge.channel_id, target, &content)
            .await
            .map_err(RelayError::Edit)
    }
}
