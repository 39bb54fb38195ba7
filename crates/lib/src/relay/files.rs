//! File relay: download an attachment from Telegram, buffer it, and upload it to Discord once.
//!
//! The whole file is held in memory before the upload starts, so memory use per job is bounded by
//! the attachment size (Telegram bots can only download files up to 20 MB).

use crate::identity::DestinationMessageId;
use crate::platform::{
    ByteStream, DestinationPlatform, FileUpload, Message, PlatformError, SourcePlatform,
};
use crate::relay::{BridgeContext, ReadinessGate, RelayError};
use crate::router::Event;
use futures_util::StreamExt;
use std::sync::Arc;

/// One file transfer from source to destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayJob {
    pub channel_id: String,
    pub sender_name: String,
    /// Telegram file id of the content to download.
    pub file_id: String,
    pub file_name: String,
    pub caption: Option<String>,
    /// Append the extension of the source-side file path to `file_name`.
    pub resolve_extension: bool,
}

impl RelayJob {
    fn new(
        bridge: &BridgeContext,
        message: &Message,
        file_id: &str,
        file_name: String,
        resolve_extension: bool,
    ) -> Self {
        Self {
            channel_id: bridge.channel_id.clone(),
            sender_name: message.sender_name(),
            file_id: file_id.to_string(),
            file_name,
            caption: None,
            resolve_extension,
        }
    }

    /// Build the job for a media event. `None` for text and edit events, or when the payload is
    /// missing.
    pub fn for_event(event: &Event, bridge: &BridgeContext) -> Option<Self> {
        let job = match event {
            Event::Photo(m) => {
                let largest = m
                    .photo
                    .as_ref()?
                    .iter()
                    .max_by_key(|p| u64::from(p.width) * u64::from(p.height))?;
                let mut job = Self::new(bridge, m, &largest.file_id, "photo.jpg".to_string(), false);
                job.caption = m.caption.clone();
                job
            }
            Event::Sticker(m) => {
                let sticker = m.sticker.as_ref()?;
                let mut job =
                    Self::new(bridge, m, &sticker.file_id, "sticker.webp".to_string(), false);
                if bridge.forward_sticker_emoji {
                    job.caption = sticker.emoji.clone();
                }
                job
            }
            Event::Document(m) => {
                let doc = m.document.as_ref()?;
                named_or_resolved(bridge, m, &doc.file_id, doc.file_name.as_deref(), "document")
            }
            Event::Voice(m) => {
                let voice = m.voice.as_ref()?;
                match voice.mime_type.as_deref().and_then(extension_for_mime) {
                    Some(ext) => Self::new(bridge, m, &voice.file_id, format!("voice.{}", ext), false),
                    None => Self::new(bridge, m, &voice.file_id, "voice".to_string(), true),
                }
            }
            Event::Audio(m) => {
                let audio = m.audio.as_ref()?;
                named_or_resolved(bridge, m, &audio.file_id, audio.file_name.as_deref(), "audio")
            }
            Event::Video(m) => {
                let video = m.video.as_ref()?;
                named_or_resolved(bridge, m, &video.file_id, video.file_name.as_deref(), "video")
            }
            Event::Text(_) | Event::EditedMessage(_) => return None,
        };
        Some(job)
    }
}

/// Use the sender's original file name when Telegram has one, else `fallback` plus the resolved
/// extension.
fn named_or_resolved(
    bridge: &BridgeContext,
    message: &Message,
    file_id: &str,
    file_name: Option<&str>,
    fallback: &str,
) -> RelayJob {
    match file_name.map(str::trim).filter(|n| !n.is_empty()) {
        Some(name) => RelayJob::new(bridge, message, file_id, name.to_string(), false),
        None => RelayJob::new(bridge, message, file_id, fallback.to_string(), true),
    }
}

/// File extension (without dot) for a MIME type, e.g. `audio/ogg` -> `ogg`.
pub fn extension_for_mime(mime: &str) -> Option<&str> {
    let essence = mime.split(';').next()?.trim();
    let (_, subtype) = essence.split_once('/')?;
    let ext = match subtype {
        "mpeg" => "mp3",
        "mp4" if essence.starts_with("audio/") => "m4a",
        "x-wav" | "wav" => "wav",
        "quicktime" => "mov",
        "" => return None,
        other => other.strip_prefix("x-").unwrap_or(other),
    };
    Some(ext)
}

/// Extension (with dot) of the final path segment, or `""` when it has none.
pub fn extension_of(path: &str) -> &str {
    let name = path.rsplit('/').next().unwrap_or(path);
    match name.rfind('.') {
        Some(i) if i > 0 => &name[i..],
        _ => "",
    }
}

/// Caption posted with relayed content: bold sender name, then the text on its own line.
pub fn compose_caption(sender_name: &str, text: &str) -> String {
    format!("**{}**:\n{}", sender_name, text)
}

/// Read a chunked stream to the end into one buffer.
pub async fn collect_stream(mut stream: ByteStream) -> Result<Vec<u8>, PlatformError> {
    let mut buf = Vec::new();
    while let Some(chunk) = stream.next().await {
        buf.extend_from_slice(&chunk?);
    }
    Ok(buf)
}

/// Download-then-upload pipeline shared by all media handlers.
#[derive(Clone)]
pub struct FileRelayPipeline {
    source: Arc<dyn SourcePlatform>,
    destination: Arc<dyn DestinationPlatform>,
    ready: ReadinessGate,
}

impl FileRelayPipeline {
    pub fn new(
        source: Arc<dyn SourcePlatform>,
        destination: Arc<dyn DestinationPlatform>,
        ready: ReadinessGate,
    ) -> Self {
        Self {
            source,
            destination,
            ready,
        }
    }

    /// Relay one file. A failure only affects this job.
    pub async fn relay(&self, job: RelayJob) -> Result<DestinationMessageId, RelayError> {
        self.ready.wait().await?;
        let file = self
            .source
            .open_file(&job.file_id)
            .await
            .map_err(RelayError::Download)?;
        let bytes = collect_stream(file.stream)
            .await
            .map_err(RelayError::Download)?;
        let extension = if job.resolve_extension {
            extension_of(&file.path)
        } else {
            ""
        };
        let upload = FileUpload {
            file_name: format!("{}{}", job.file_name, extension),
            bytes,
        };
        log::debug!(
            "file relay: uploading {} ({} bytes) to channel {}",
            upload.file_name,
            upload.bytes.len(),
            job.channel_id
        );
        let caption = compose_caption(&job.sender_name, job.caption.as_deref().unwrap_or(""));
        self.destination
            .send_file(&job.channel_id, upload, &caption)
            .await
            .map_err(RelayError::Upload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{Chat, PhotoSize, Sticker, User, Voice};

    fn bridge(forward_sticker_emoji: bool) -> BridgeContext {
        BridgeContext {
            name: "team".to_string(),
            channel_id: "555".to_string(),
            forward_sticker_emoji,
        }
    }

    fn message() -> Message {
        Message {
            message_id: 3,
            chat: Chat {
                id: -100,
                title: None,
            },
            from: Some(User {
                id: 1,
                first_name: "Ada".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn sticker_event() -> Event {
        let mut m = message();
        m.sticker = Some(Sticker {
            file_id: "stk".to_string(),
            emoji: Some("😀".to_string()),
        });
        Event::Sticker(m)
    }

    #[test]
    fn extension_of_final_segment() {
        assert_eq!(extension_of("foo/bar.ogg"), ".ogg");
        assert_eq!(extension_of("voice/file_1.oga"), ".oga");
        assert_eq!(extension_of("dir.d/noext"), "");
        assert_eq!(extension_of(".hidden"), "");
        assert_eq!(extension_of("archive.tar.gz"), ".gz");
    }

    #[test]
    fn mime_extensions() {
        assert_eq!(extension_for_mime("audio/ogg"), Some("ogg"));
        assert_eq!(extension_for_mime("audio/mpeg"), Some("mp3"));
        assert_eq!(extension_for_mime("audio/mp4"), Some("m4a"));
        assert_eq!(extension_for_mime("video/mp4"), Some("mp4"));
        assert_eq!(extension_for_mime("audio/x-flac; rate=44100"), Some("flac"));
        assert_eq!(extension_for_mime("garbage"), None);
    }

    #[test]
    fn caption_format() {
        assert_eq!(compose_caption("Ada", "hi"), "**Ada**:\nhi");
        assert_eq!(compose_caption("Ada", ""), "**Ada**:\n");
    }

    #[test]
    fn sticker_caption_follows_bridge_flag() {
        let with = RelayJob::for_event(&sticker_event(), &bridge(true)).expect("job");
        assert_eq!(with.caption.as_deref(), Some("😀"));
        assert_eq!(with.file_name, "sticker.webp");
        let without = RelayJob::for_event(&sticker_event(), &bridge(false)).expect("job");
        assert_eq!(without.caption, None);
    }

    #[test]
    fn photo_job_picks_largest_variant() {
        let mut m = message();
        m.caption = Some("sunset".to_string());
        m.photo = Some(vec![
            PhotoSize {
                file_id: "s".to_string(),
                width: 90,
                height: 90,
            },
            PhotoSize {
                file_id: "l".to_string(),
                width: 1280,
                height: 960,
            },
            PhotoSize {
                file_id: "m".to_string(),
                width: 320,
                height: 240,
            },
        ]);
        let job = RelayJob::for_event(&Event::Photo(m), &bridge(false)).expect("job");
        assert_eq!(job.file_id, "l");
        assert_eq!(job.file_name, "photo.jpg");
        assert_eq!(job.caption.as_deref(), Some("sunset"));
        assert_eq!(job.sender_name, "Ada");
        assert_eq!(job.channel_id, "555");
        assert!(!job.resolve_extension);
    }

    #[test]
    fn voice_job_names_from_mime_or_resolves() {
        let mut m = message();
        m.voice = Some(Voice {
            file_id: "v".to_string(),
            mime_type: Some("audio/ogg".to_string()),
        });
        let job = RelayJob::for_event(&Event::Voice(m.clone()), &bridge(false)).expect("job");
        assert_eq!(job.file_name, "voice.ogg");
        assert!(!job.resolve_extension);

        m.voice = Some(Voice {
            file_id: "v".to_string(),
            mime_type: None,
        });
        let job = RelayJob::for_event(&Event::Voice(m), &bridge(false)).expect("job");
        assert_eq!(job.file_name, "voice");
        assert!(job.resolve_extension);
        assert_eq!(job.caption, None);
    }

    #[test]
    fn text_events_have_no_job() {
        let mut m = message();
        m.text = Some("hi".to_string());
        assert!(RelayJob::for_event(&Event::Text(m), &bridge(true)).is_none());
    }

    #[tokio::test]
    async fn collect_stream_concatenates_chunks() {
        let chunks: Vec<Result<bytes::Bytes, PlatformError>> = vec![
            Ok(bytes::Bytes::from_static(b"AB")),
            Ok(bytes::Bytes::from_static(b"CD")),
        ];
        let stream: ByteStream = futures_util::stream::iter(chunks).boxed();
        assert_eq!(collect_stream(stream).await.expect("collect"), b"ABCD".to_vec());
    }

    #[tokio::test]
    async fn collect_stream_surfaces_mid_stream_error() {
        let chunks: Vec<Result<bytes::Bytes, PlatformError>> = vec![
            Ok(bytes::Bytes::from_static(b"AB")),
            Err(PlatformError::Api("connection reset".to_string())),
        ];
        let stream: ByteStream = futures_util::stream::iter(chunks).boxed();
        assert!(collect_stream(stream).await.is_err());
    }
}
