//! Platform seams: the long-poll source (Telegram) and the push-style destination (Discord).
//!
//! The relay core only talks to the `SourcePlatform` and `DestinationPlatform` traits so the
//! wire calls stay opaque request/response functions. `TelegramSource` and `DiscordDestination`
//! are the HTTP implementations.

mod discord;
mod telegram;
mod types;

pub use discord::DiscordDestination;
pub use telegram::TelegramSource;
pub use types::{
    Audio, Chat, Document, Message, PhotoSize, Sticker, Update, User, Video, Voice,
};

use crate::identity::DestinationMessageId;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;

#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("api error: {0}")]
    Api(String),
    #[error("unexpected response: {0}")]
    Decode(String),
}

/// Chunked binary content; the stream ends when the download is complete.
pub type ByteStream = BoxStream<'static, Result<Bytes, PlatformError>>;

/// An attachment opened on the source platform: its server-side path and content stream.
pub struct SourceFile {
    /// Source-side file path (e.g. `voice/file_12.oga`); used to resolve the extension.
    pub path: String,
    pub stream: ByteStream,
}

/// Long-poll source of chat updates.
#[async_trait]
pub trait SourcePlatform: Send + Sync {
    /// Fetch updates with id >= `offset`, waiting up to `timeout_secs` for new ones. May be empty.
    async fn fetch_updates(&self, offset: i64, timeout_secs: u64)
        -> Result<Vec<Update>, PlatformError>;

    /// Resolve `file_id` and open its content as a byte stream.
    async fn open_file(&self, file_id: &str) -> Result<SourceFile, PlatformError>;

    /// Send a plain text reply to a chat.
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), PlatformError>;
}

/// Identity of the destination bot account, resolved once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelfIdentity {
    pub id: String,
    pub username: String,
}

/// A fully buffered file ready for a single upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUpload {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// Push-style destination that accepts sends, uploads and edits.
#[async_trait]
pub trait DestinationPlatform: Send + Sync {
    async fn resolve_self_identity(&self) -> Result<SelfIdentity, PlatformError>;

    async fn send_text(
        &self,
        channel_id: &str,
        text: &str,
    ) -> Result<DestinationMessageId, PlatformError>;

    async fn send_file(
        &self,
        channel_id: &str,
        file: FileUpload,
        caption: &str,
    ) -> Result<DestinationMessageId, PlatformError>;

    async fn edit_text(
        &self,
        channel_id: &str,
        message_id: DestinationMessageId,
        text: &str,
    ) -> Result<(), PlatformError>;
}
