//! Event routing: classify each Telegram update into exactly one event kind and hand it to the
//! handler registered for that kind.
//!
//! Dispatch does not wait for the handler to finish. Handlers run as their own tasks, concurrently
//! with polling and with each other, so destination order across distinct source messages is not
//! guaranteed to follow source order. The number of handlers in flight is capped by a semaphore.

use crate::platform::{Message, Update};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

/// Default cap on concurrently running handlers.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Text,
    Photo,
    Document,
    Voice,
    Audio,
    Video,
    Sticker,
    EditedMessage,
}

impl EventKind {
    /// Every kind, in classification priority order.
    pub const ALL: [EventKind; 8] = [
        EventKind::Text,
        EventKind::Photo,
        EventKind::Document,
        EventKind::Voice,
        EventKind::Audio,
        EventKind::Video,
        EventKind::Sticker,
        EventKind::EditedMessage,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Text => "text",
            EventKind::Photo => "photo",
            EventKind::Document => "document",
            EventKind::Voice => "voice",
            EventKind::Audio => "audio",
            EventKind::Video => "video",
            EventKind::Sticker => "sticker",
            EventKind::EditedMessage => "edited_message",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified update: one variant per kind, carrying the message it was classified from.
#[derive(Debug, Clone)]
pub enum Event {
    Text(Message),
    Photo(Message),
    Document(Message),
    Voice(Message),
    Audio(Message),
    Video(Message),
    Sticker(Message),
    EditedMessage(Message),
}

impl Event {
    fn from_parts(kind: EventKind, message: Message) -> Self {
        match kind {
            EventKind::Text => Event::Text(message),
            EventKind::Photo => Event::Photo(message),
            EventKind::Document => Event::Document(message),
            EventKind::Voice => Event::Voice(message),
            EventKind::Audio => Event::Audio(message),
            EventKind::Video => Event::Video(message),
            EventKind::Sticker => Event::Sticker(message),
            EventKind::EditedMessage => Event::EditedMessage(message),
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Event::Text(_) => EventKind::Text,
            Event::Photo(_) => EventKind::Photo,
            Event::Document(_) => EventKind::Document,
            Event::Voice(_) => EventKind::Voice,
            Event::Audio(_) => EventKind::Audio,
            Event::Video(_) => EventKind::Video,
            Event::Sticker(_) => EventKind::Sticker,
            Event::EditedMessage(_) => EventKind::EditedMessage,
        }
    }

    pub fn message(&self) -> &Message {
        match self {
            Event::Text(m)
            | Event::Photo(m)
            | Event::Document(m)
            | Event::Voice(m)
            | Event::Audio(m)
            | Event::Video(m)
            | Event::Sticker(m)
            | Event::EditedMessage(m) => m,
        }
    }
}

/// Payload kind of a new message, checked in priority order; first present field wins.
fn message_kind(message: &Message) -> Option<EventKind> {
    if message.text.is_some() {
        Some(EventKind::Text)
    } else if message.photo.as_ref().is_some_and(|p| !p.is_empty()) {
        Some(EventKind::Photo)
    } else if message.document.is_some() {
        Some(EventKind::Document)
    } else if message.voice.is_some() {
        Some(EventKind::Voice)
    } else if message.audio.is_some() {
        Some(EventKind::Audio)
    } else if message.video.is_some() {
        Some(EventKind::Video)
    } else if message.sticker.is_some() {
        Some(EventKind::Sticker)
    } else {
        None
    }
}

/// Classify an update. `None` when no recognized payload is present.
pub fn classify(update: Update) -> Option<Event> {
    let Update {
        message,
        edited_message,
        ..
    } = update;
    if let Some(message) = message {
        if let Some(kind) = message_kind(&message) {
            return Some(Event::from_parts(kind, message));
        }
    }
    edited_message.map(Event::EditedMessage)
}

/// Handles one classified event. Errors are dealt with inside the handler; nothing propagates back
/// to the router or the poller.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: Event);
}

/// Dispatch table: one handler per event kind.
pub struct EventRouter {
    handlers: HashMap<EventKind, Arc<dyn EventHandler>>,
    permits: Arc<Semaphore>,
}

impl Default for EventRouter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_IN_FLIGHT)
    }
}

impl EventRouter {
    pub fn new(max_in_flight: usize) -> Self {
        Self {
            handlers: HashMap::new(),
            permits: Arc::new(Semaphore::new(max_in_flight.max(1))),
        }
    }

    /// Install the handler for `kind`. Replaces any previous handler for that kind.
    pub fn register(&mut self, kind: EventKind, handler: Arc<dyn EventHandler>) {
        if self.handlers.insert(kind, handler).is_some() {
            log::debug!("router: replaced handler for {}", kind);
        }
    }

    pub fn has_handler(&self, kind: EventKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    /// Classify and start the handler for one update. Returns the handler task, or `None` when the
    /// update was dropped (unrecognized payload or no handler). Waits only for a free handler slot,
    /// never for the handler itself.
    pub async fn dispatch(&self, update: Update) -> Option<JoinHandle<()>> {
        let update_id = update.update_id;
        let Some(event) = classify(update) else {
            log::debug!("router: update {} has no recognized payload, dropped", update_id);
            return None;
        };
        let kind = event.kind();
        let Some(handler) = self.handlers.get(&kind).cloned() else {
            log::debug!("router: no handler for {} (update {})", kind, update_id);
            return None;
        };
        let permit = self.permits.clone().acquire_owned().await.ok()?;
        Some(tokio::spawn(async move {
            let _permit = permit;
            handler.handle(event).await;
        }))
    }

    /// Dispatch a batch in arrival order.
    pub async fn dispatch_batch(&self, updates: Vec<Update>) -> Vec<JoinHandle<()>> {
        let mut tasks = Vec::with_capacity(updates.len());
        for update in updates {
            if let Some(task) = self.dispatch(update).await {
                tasks.push(task);
            }
        }
        tasks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{Audio, Chat, Document, PhotoSize, Sticker, Video, Voice};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex;

    fn base_message() -> Message {
        Message {
            message_id: 1,
            chat: Chat {
                id: -100,
                title: None,
            },
            ..Default::default()
        }
    }

    fn update_with(message: Message) -> Update {
        Update {
            update_id: 1,
            message: Some(message),
            edited_message: None,
        }
    }

    /// One update per kind, each carrying exactly one recognized payload field.
    fn single_payload_updates() -> Vec<(EventKind, Update)> {
        let mut out = Vec::new();
        let mut m = base_message();
        m.text = Some("hi".to_string());
        out.push((EventKind::Text, update_with(m)));
        let mut m = base_message();
        m.photo = Some(vec![PhotoSize {
            file_id: "p".to_string(),
            width: 1,
            height: 1,
        }]);
        out.push((EventKind::Photo, update_with(m)));
        let mut m = base_message();
        m.document = Some(Document {
            file_id: "d".to_string(),
            ..Default::default()
        });
        out.push((EventKind::Document, update_with(m)));
        let mut m = base_message();
        m.voice = Some(Voice {
            file_id: "v".to_string(),
            mime_type: None,
        });
        out.push((EventKind::Voice, update_with(m)));
        let mut m = base_message();
        m.audio = Some(Audio {
            file_id: "a".to_string(),
            ..Default::default()
        });
        out.push((EventKind::Audio, update_with(m)));
        let mut m = base_message();
        m.video = Some(Video {
            file_id: "vi".to_string(),
            ..Default::default()
        });
        out.push((EventKind::Video, update_with(m)));
        let mut m = base_message();
        m.sticker = Some(Sticker {
            file_id: "s".to_string(),
            emoji: None,
        });
        out.push((EventKind::Sticker, update_with(m)));
        out.push((
            EventKind::EditedMessage,
            Update {
                update_id: 1,
                message: None,
                edited_message: Some(base_message()),
            },
        ));
        out
    }

    #[test]
    fn each_single_payload_classifies_to_its_kind() {
        for (expected, update) in single_payload_updates() {
            let event = classify(update).expect("classified");
            assert_eq!(event.kind(), expected);
        }
    }

    #[test]
    fn unrecognized_payload_is_dropped() {
        assert!(classify(update_with(base_message())).is_none());
        assert!(classify(Update::default()).is_none());
    }

    #[test]
    fn text_wins_over_later_fields() {
        let mut m = base_message();
        m.text = Some("caption-like".to_string());
        m.sticker = Some(Sticker {
            file_id: "s".to_string(),
            emoji: None,
        });
        assert_eq!(
            classify(update_with(m)).map(|e| e.kind()),
            Some(EventKind::Text)
        );
    }

    struct Recorder {
        seen: Mutex<Vec<EventKind>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EventHandler for Recorder {
        async fn handle(&self, event: Event) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().await.push(event.kind());
        }
    }

    #[tokio::test]
    async fn dispatch_reaches_exactly_one_handler() {
        let mut router = EventRouter::new(4);
        let recorders: Vec<(EventKind, Arc<Recorder>)> = EventKind::ALL
            .iter()
            .map(|k| {
                (
                    *k,
                    Arc::new(Recorder {
                        seen: Mutex::new(Vec::new()),
                        calls: AtomicUsize::new(0),
                    }),
                )
            })
            .collect();
        for (kind, rec) in &recorders {
            router.register(*kind, rec.clone());
        }

        for (expected, update) in single_payload_updates() {
            let task = router.dispatch(update).await.expect("dispatched");
            task.await.expect("handler task");
            for (kind, rec) in &recorders {
                let calls = rec.calls.swap(0, Ordering::SeqCst);
                assert_eq!(calls, usize::from(*kind == expected), "kind {}", kind);
            }
        }

        assert!(router.dispatch(update_with(base_message())).await.is_none());
    }

    #[tokio::test]
    async fn missing_handler_drops_event() {
        let router = EventRouter::default();
        let mut m = base_message();
        m.text = Some("hi".to_string());
        assert!(!router.has_handler(EventKind::Text));
        assert!(router.dispatch(update_with(m)).await.is_none());
    }
}
