//! Authorization gate: decides per update whether the source chat is bridged before any relay work.

use crate::platform::SourcePlatform;
use crate::relay::handlers::BridgeHandler;
use crate::router::{Event, EventHandler};
use async_trait::async_trait;
use std::sync::Arc;

/// Reply sent to chats that are not in the bridge table.
pub const NOT_BRIDGED_REPLY: &str =
    "This chat is not bridged to Discord. Send /chatinfo and give the chat id to the bridge operator.";

/// Bridge resolved for the chat an update came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeContext {
    /// Label used in logs.
    pub name: String,
    /// Destination Discord channel.
    pub channel_id: String,
    pub forward_sticker_emoji: bool,
}

/// Bridge table lookup by Telegram chat id.
pub trait BridgeLookup: Send + Sync {
    fn bridge_for_chat(&self, chat_id: i64) -> Option<BridgeContext>;
}

/// True for `/chatinfo`, optionally addressed to a bot (`/chatinfo@relay_bot`).
pub fn is_chat_info_command(text: &str) -> bool {
    lazy_regex::regex_is_match!(r"^/chatinfo(@\w+)?$", text.trim())
}

/// Wraps a per-kind handler: answers `/chatinfo`, rejects unbridged chats with one reply, and
/// otherwise runs the handler with the resolved bridge. Relay errors stop here and are logged.
pub struct AuthorizationGate {
    bridges: Arc<dyn BridgeLookup>,
    source: Arc<dyn SourcePlatform>,
    handler: Arc<dyn BridgeHandler>,
}

impl AuthorizationGate {
    pub fn new(
        bridges: Arc<dyn BridgeLookup>,
        source: Arc<dyn SourcePlatform>,
        handler: Arc<dyn BridgeHandler>,
    ) -> Self {
        Self {
            bridges,
            source,
            handler,
        }
    }

    async fn reply(&self, chat_id: i64, text: &str) {
        if let Err(e) = self.source.send_message(chat_id, text).await {
            log::warn!("gate: reply to chat {} failed: {}", chat_id, e);
        }
    }
}

#[async_trait]
impl EventHandler for AuthorizationGate {
    async fn handle(&self, event: Event) {
        let message = event.message();
        let chat_id = message.chat.id;
        let message_id = message.message_id;

        if let Event::Text(m) = &event {
            if m.text.as_deref().is_some_and(|t| is_chat_info_command(t)) {
                self.reply(chat_id, &format!("chatID: {}", chat_id)).await;
                return;
            }
        }

        let Some(bridge) = self.bridges.bridge_for_chat(chat_id) else {
            log::info!("gate: chat {} is not bridged", chat_id);
            self.reply(chat_id, NOT_BRIDGED_REPLY).await;
            return;
        };

        let kind = event.kind();
        let name = bridge.name.clone();
        log::debug!("[{}] relaying {} message {}", name, kind, message_id);
        if let Err(e) = self.handler.handle(event, bridge).await {
            log::warn!(
                "[{}] relaying {} message {} from chat {} failed: {}",
                name,
                kind,
                message_id,
                chat_id,
                e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_info_command_variants() {
        assert!(is_chat_info_command("/chatinfo"));
        assert!(is_chat_info_command(" /chatinfo@relay_bot "));
        assert!(!is_chat_info_command("/chatinfo please"));
        assert!(!is_chat_info_command("chatinfo"));
        assert!(!is_chat_info_command("/chatinfos"));
    }
}
