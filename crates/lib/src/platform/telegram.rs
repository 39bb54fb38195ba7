//! Telegram source: long-poll getUpdates, getFile + file download, and sendMessage via Bot API.

use crate::platform::{PlatformError, SourceFile, SourcePlatform, Update};
use async_trait::async_trait;
use futures_util::StreamExt;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// Extra time on top of the long-poll timeout before the HTTP request itself is abandoned.
const REQUEST_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FileInfo {
    #[serde(default)]
    file_path: Option<String>,
}

/// Telegram Bot API client for the source side of the relay.
pub struct TelegramSource {
    token: String,
    api_base: String,
    client: reqwest::Client,
}

impl TelegramSource {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            api_base: telegram_api_base(),
            client: reqwest::Client::new(),
        }
    }

    /// Point the client at a different Bot API server (self-hosted or test endpoint).
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token, method)
    }

    /// POST a Bot API method with a JSON body and unwrap the `{ ok, result }` envelope.
    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        body: &serde_json::Value,
        timeout: Option<Duration>,
    ) -> Result<T, PlatformError> {
        let mut req = self.client.post(self.method_url(method)).json(body);
        if let Some(t) = timeout {
            req = req.timeout(t);
        }
        let res = req.send().await?;
        let status = res.status();
        let text = res.text().await?;
        let data: ApiResponse<T> = serde_json::from_str(&text)
            .map_err(|e| PlatformError::Decode(format!("{} response: {}", method, e)))?;
        if !status.is_success() || !data.ok {
            return Err(PlatformError::Api(format!(
                "{} failed: {} {}",
                method,
                status,
                data.description.unwrap_or_default()
            )));
        }
        data.result
            .ok_or_else(|| PlatformError::Decode(format!("{} returned no result", method)))
    }
}

#[async_trait]
impl SourcePlatform for TelegramSource {
    async fn fetch_updates(
        &self,
        offset: i64,
        timeout_secs: u64,
    ) -> Result<Vec<Update>, PlatformError> {
        let body = serde_json::json!({
            "offset": offset,
            "timeout": timeout_secs,
            "allowed_updates": ["message", "edited_message"],
        });
        let timeout = Duration::from_secs(timeout_secs) + REQUEST_GRACE;
        self.call("getUpdates", &body, Some(timeout)).await
    }

    async fn open_file(&self, file_id: &str) -> Result<SourceFile, PlatformError> {
        let body = serde_json::json!({ "file_id": file_id });
        let info: FileInfo = self.call("getFile", &body, None).await?;
        let path = info
            .file_path
            .ok_or_else(|| PlatformError::Decode(format!("getFile {} has no file_path", file_id)))?;
        let url = format!("{}/file/bot{}/{}", self.api_base, self.token, path);
        let res = self.client.get(&url).send().await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(PlatformError::Api(format!(
                "file download failed: {} {}",
                status, body
            )));
        }
        let stream = res
            .bytes_stream()
            .map(|chunk| chunk.map_err(PlatformError::from))
            .boxed();
        Ok(SourceFile { path, stream })
    }

    async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), PlatformError> {
        let body = serde_json::json!({ "chat_id": chat_id, "text": text });
        let _: serde_json::Value = self.call("sendMessage", &body, None).await?;
        Ok(())
    }
}

/// Resolve Telegram bot API base URL (for tests or custom endpoints).
pub fn telegram_api_base() -> String {
    std::env::var("TELEGRAM_API_BASE")
        .ok()
        .map(|s| s.trim().trim_end_matches('/').to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| TELEGRAM_API_BASE.to_string())
}
