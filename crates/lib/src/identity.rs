//! Message identity correlation: source message id <-> destination message id, per relay direction.
//!
//! A mapping is written once, when a source message is first relayed, and read when an edit for
//! that message arrives. Entries are never removed for the lifetime of the process.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Telegram message ids are only unique within a chat, so the source side is keyed by both.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct SourceMessageId {
    pub chat_id: i64,
    pub message_id: i64,
}

impl SourceMessageId {
    pub fn new(chat_id: i64, message_id: i64) -> Self {
        Self {
            chat_id,
            message_id,
        }
    }
}

impl fmt::Display for SourceMessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.chat_id, self.message_id)
    }
}

/// Discord message snowflake.
pub type DestinationMessageId = u64;

/// Relay direction a mapping belongs to.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub enum Direction {
    TelegramToDiscord,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::TelegramToDiscord => f.write_str("telegram->discord"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    #[error("{direction} mapping already exists for source message {source_id}")]
    Duplicate {
        direction: Direction,
        source_id: SourceMessageId,
    },
    #[error("{direction} destination message {destination_id} is already mapped")]
    DestinationTaken {
        direction: Direction,
        destination_id: DestinationMessageId,
    },
}

#[derive(Default)]
struct Maps {
    /// source id -> destination id (edit correlation)
    forward: BTreeMap<(Direction, SourceMessageId), DestinationMessageId>,
    /// destination id -> source id
    reverse: BTreeMap<(Direction, DestinationMessageId), SourceMessageId>,
}

/// In-memory store: (direction, source id) <-> destination id (bidirectional).
/// Both maps sit behind one lock so an insert is visible on both sides at once.
#[derive(Clone, Default)]
pub struct IdentityMap {
    inner: Arc<RwLock<Maps>>,
}

impl IdentityMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `source_id` was relayed as `destination_id`.
    /// Each source message is relayed at most once, so an existing entry on either side is an error
    /// and leaves the store unchanged.
    pub async fn insert(
        &self,
        direction: Direction,
        source_id: SourceMessageId,
        destination_id: DestinationMessageId,
    ) -> Result<(), IdentityError> {
        let mut maps = self.inner.write().await;
        if maps.forward.contains_key(&(direction, source_id)) {
            return Err(IdentityError::Duplicate {
                direction,
                source_id,
            });
        }
        if maps.reverse.contains_key(&(direction, destination_id)) {
            return Err(IdentityError::DestinationTaken {
                direction,
                destination_id,
            });
        }
        maps.forward.insert((direction, source_id), destination_id);
        maps.reverse.insert((direction, destination_id), source_id);
        Ok(())
    }

    /// Destination message a source message was relayed as.
    pub async fn lookup(
        &self,
        direction: Direction,
        source_id: SourceMessageId,
    ) -> Option<DestinationMessageId> {
        self.inner
            .read()
            .await
            .forward
            .get(&(direction, source_id))
            .copied()
    }

    /// Source message a destination message was relayed from.
    pub async fn reverse_lookup(
        &self,
        direction: Direction,
        destination_id: DestinationMessageId,
    ) -> Option<SourceMessageId> {
        self.inner
            .read()
            .await
            .reverse
            .get(&(direction, destination_id))
            .copied()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.forward.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const D: Direction = Direction::TelegramToDiscord;

    fn src(message_id: i64) -> SourceMessageId {
        SourceMessageId::new(-100, message_id)
    }

    #[tokio::test]
    async fn insert_then_lookup() {
        let map = IdentityMap::new();
        map.insert(D, src(10), 555).await.expect("insert");
        assert_eq!(map.lookup(D, src(10)).await, Some(555));
        assert_eq!(map.lookup(D, src(11)).await, None);
        assert_eq!(map.reverse_lookup(D, 555).await, Some(src(10)));
    }

    #[tokio::test]
    async fn second_insert_for_same_source_is_rejected() {
        let map = IdentityMap::new();
        map.insert(D, src(10), 555).await.expect("insert");
        let err = map.insert(D, src(10), 556).await.unwrap_err();
        assert_eq!(
            err,
            IdentityError::Duplicate {
                direction: D,
                source_id: src(10)
            }
        );
        assert_eq!(map.lookup(D, src(10)).await, Some(555));
        assert_eq!(map.reverse_lookup(D, 556).await, None);
    }

    #[tokio::test]
    async fn destination_reuse_is_rejected_without_partial_write() {
        let map = IdentityMap::new();
        map.insert(D, src(1), 900).await.expect("insert");
        assert!(matches!(
            map.insert(D, src(2), 900).await,
            Err(IdentityError::DestinationTaken { .. })
        ));
        assert_eq!(map.lookup(D, src(2)).await, None);
        assert_eq!(map.len().await, 1);
    }

    #[tokio::test]
    async fn same_message_id_in_different_chats_does_not_collide() {
        let map = IdentityMap::new();
        map.insert(D, SourceMessageId::new(-1, 10), 1).await.expect("insert");
        map.insert(D, SourceMessageId::new(-2, 10), 2).await.expect("insert");
        assert_eq!(map.lookup(D, SourceMessageId::new(-1, 10)).await, Some(1));
        assert_eq!(map.lookup(D, SourceMessageId::new(-2, 10)).await, Some(2));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_inserts_are_all_retrievable() {
        let map = IdentityMap::new();
        let mut handles = Vec::new();
        for i in 0..200i64 {
            let map = map.clone();
            handles.push(tokio::spawn(async move {
                map.insert(D, src(i), 10_000 + i as u64).await
            }));
        }
        for h in handles {
            h.await.expect("join").expect("insert");
        }
        assert_eq!(map.len().await, 200);
        for i in 0..200i64 {
            assert_eq!(map.lookup(D, src(i)).await, Some(10_000 + i as u64));
            assert_eq!(map.reverse_lookup(D, 10_000 + i as u64).await, Some(src(i)));
        }
    }
}
