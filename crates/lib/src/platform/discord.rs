//! Discord destination: bot REST API for identity, message create/edit, and attachment upload.

use crate::identity::DestinationMessageId;
use crate::platform::{DestinationPlatform, FileUpload, PlatformError, SelfIdentity};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;

const DISCORD_API_BASE: &str = "https://discord.com/api/v10";

#[derive(Debug, Deserialize)]
struct CurrentUser {
    id: String,
    username: String,
}

/// Subset of the Discord message object returned by create endpoints.
#[derive(Debug, Deserialize)]
struct CreatedMessage {
    id: String,
}

impl CreatedMessage {
    fn message_id(&self) -> Result<DestinationMessageId, PlatformError> {
        self.id
            .parse()
            .map_err(|_| PlatformError::Decode(format!("invalid message snowflake: {}", self.id)))
    }
}

/// Discord bot client for the destination side of the relay.
#[derive(Clone)]
pub struct DiscordDestination {
    token: String,
    api_base: String,
    client: reqwest::Client,
}

impl DiscordDestination {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            api_base: DISCORD_API_BASE.to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn authorization(&self) -> String {
        format!("Bot {}", self.token)
    }

    fn messages_url(&self, channel_id: &str) -> String {
        format!("{}/channels/{}/messages", self.api_base, channel_id)
    }
}

/// Turn a non-2xx response into `PlatformError::Api`, keeping the body for the log.
async fn check(res: reqwest::Response, what: &str) -> Result<reqwest::Response, PlatformError> {
    if res.status().is_success() {
        return Ok(res);
    }
    let status = res.status();
    let body = res.text().await.unwrap_or_default();
    Err(PlatformError::Api(format!("{} failed: {} {}", what, status, body)))
}

#[async_trait]
impl DestinationPlatform for DiscordDestination {
    async fn resolve_self_identity(&self) -> Result<SelfIdentity, PlatformError> {
        let url = format!("{}/users/@me", self.api_base);
        let res = self
            .client
            .get(&url)
            .header(reqwest::header::AUTHORIZATION, self.authorization())
            .send()
            .await?;
        let user: CurrentUser = check(res, "get current user").await?.json().await?;
        Ok(SelfIdentity {
            id: user.id,
            username: user.username,
        })
    }

    async fn send_text(
        &self,
        channel_id: &str,
        text: &str,
    ) -> Result<DestinationMessageId, PlatformError> {
        let res = self
            .client
            .post(self.messages_url(channel_id))
            .header(reqwest::header::AUTHORIZATION, self.authorization())
            .json(&serde_json::json!({ "content": text }))
            .send()
            .await?;
        let created: CreatedMessage = check(res, "create message").await?.json().await?;
        created.message_id()
    }

    async fn send_file(
        &self,
        channel_id: &str,
        file: FileUpload,
        caption: &str,
    ) -> Result<DestinationMessageId, PlatformError> {
        let payload = serde_json::json!({
            "content": caption,
            "attachments": [{ "id": 0, "filename": &file.file_name }],
        });
        let form = Form::new()
            .text("payload_json", payload.to_string())
            .part("files[0]", Part::bytes(file.bytes).file_name(file.file_name));
        let res = self
            .client
            .post(self.messages_url(channel_id))
            .header(reqwest::header::AUTHORIZATION, self.authorization())
            .multipart(form)
            .send()
            .await?;
        let created: CreatedMessage = check(res, "upload attachment").await?.json().await?;
        created.message_id()
    }

    async fn edit_text(
        &self,
        channel_id: &str,
        message_id: DestinationMessageId,
        text: &str,
    ) -> Result<(), PlatformError> {
        let url = format!("{}/{}", self.messages_url(channel_id), message_id);
        let res = self
            .client
            .patch(&url)
            .header(reqwest::header::AUTHORIZATION, self.authorization())
            .json(&serde_json::json!({ "content": text }))
            .send()
            .await?;
        check(res, "edit message").await?;
        Ok(())
    }
}
