use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::notify::{DeliveryKind, MessageRef, Notifier, NotifyError, NotifyResult};

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    pub text: Option<String>,
}

impl Message {
    pub fn reference(&self) -> MessageRef {
        MessageRef {
            chat_id: self.chat.id,
            message_id: self.message_id,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub data: Option<String>,
    pub message: Option<Message>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InlineKeyboardButton {
    pub text: String,
    pub callback_data: String,
}

impl InlineKeyboardButton {
    pub fn new(text: impl Into<String>, callback_data: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            callback_data: callback_data.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InlineKeyboardMarkup {
    pub inline_keyboard: Vec<Vec<InlineKeyboardButton>>,
}

impl InlineKeyboardMarkup {
    pub fn single_row(buttons: Vec<InlineKeyboardButton>) -> Self {
        Self {
            inline_keyboard: vec![buttons],
        }
    }
}

/// Minimal Bot API client over reqwest.
#[derive(Clone)]
pub struct TelegramClient {
    http: Client,
    base_url: String,
}

impl std::fmt::Debug for TelegramClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // base_url embeds the token
        f.debug_struct("TelegramClient").finish_non_exhaustive()
    }
}

impl TelegramClient {
    pub fn new(api_endpoint: &str, token: &str) -> NotifyResult<Self> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            http,
            base_url: format!("{}/bot{}", api_endpoint.trim_end_matches('/'), token),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/{}", self.base_url, method)
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, payload: &Value) -> NotifyResult<T> {
        let response = self
            .http
            .post(self.method_url(method))
            .json(payload)
            .send()
            .await?;
        unwrap_response(method, response).await
    }

    pub async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: Option<&InlineKeyboardMarkup>,
    ) -> NotifyResult<Message> {
        let mut payload = json!({ "chat_id": chat_id, "text": text });
        if let Some(keyboard) = keyboard {
            payload["reply_markup"] = serde_json::to_value(keyboard)
                .map_err(|err| NotifyError::Api(err.to_string()))?;
        }
        self.call("sendMessage", &payload).await
    }

    pub async fn edit_message_text(&self, message: MessageRef, text: &str) -> NotifyResult<()> {
        let payload = json!({
            "chat_id": message.chat_id,
            "message_id": message.message_id,
            "text": text,
        });
        let _: Value = self.call("editMessageText", &payload).await?;
        Ok(())
    }

    pub async fn delete_message(&self, message: MessageRef) -> NotifyResult<()> {
        let payload = json!({ "chat_id": message.chat_id, "message_id": message.message_id });
        let _: bool = self.call("deleteMessage", &payload).await?;
        Ok(())
    }

    pub async fn answer_callback_query(&self, callback_id: &str) -> NotifyResult<()> {
        let payload = json!({ "callback_query_id": callback_id });
        let _: bool = self.call("answerCallbackQuery", &payload).await?;
        Ok(())
    }

    /// Long-polls for updates after `offset`.
    pub async fn get_updates(
        &self,
        offset: i64,
        timeout_seconds: u64,
    ) -> NotifyResult<Vec<Update>> {
        let payload = json!({
            "offset": offset,
            "timeout": timeout_seconds,
            "allowed_updates": ["message", "callback_query"],
        });
        let response = self
            .http
            .post(self.method_url("getUpdates"))
            .timeout(Duration::from_secs(timeout_seconds + 10))
            .json(&payload)
            .send()
            .await?;
        unwrap_response("getUpdates", response).await
    }

    pub async fn send_file(
        &self,
        chat_id: i64,
        path: &Path,
        kind: DeliveryKind,
    ) -> NotifyResult<()> {
        let (method, field, mime) = match kind {
            DeliveryKind::Video => ("sendVideo", "video", "video/mp4"),
            DeliveryKind::Audio => ("sendAudio", "audio", "audio/mpeg"),
        };
        let bytes = tokio::fs::read(path).await.map_err(|source| NotifyError::Io {
            source,
            path: path.to_path_buf(),
        })?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| field.to_string());
        debug!(chat_id, path = %path.display(), bytes = bytes.len(), method, "uploading file");
        let part = Part::bytes(bytes).file_name(file_name).mime_str(mime)?;
        let form = Form::new()
            .text("chat_id", chat_id.to_string())
            .part(field, part);
        let response = self
            .http
            .post(self.method_url(method))
            .multipart(form)
            .send()
            .await?;
        let _: Value = unwrap_response(method, response).await?;
        Ok(())
    }
}

async fn unwrap_response<T: DeserializeOwned>(
    method: &str,
    response: reqwest::Response,
) -> NotifyResult<T> {
    let body: ApiResponse<T> = response.json().await?;
    match (body.ok, body.result) {
        (true, Some(result)) => Ok(result),
        (_, _) => Err(NotifyError::Api(format!(
            "{method}: {}",
            body.description.unwrap_or_else(|| "no description".to_string())
        ))),
    }
}

#[async_trait]
impl Notifier for TelegramClient {
    async fn notify(&self, recipient: i64, text: &str) -> NotifyResult<MessageRef> {
        let message = self.send_message(recipient, text, None).await?;
        Ok(message.reference())
    }

    async fn notify_edit(&self, message: MessageRef, text: &str) -> NotifyResult<()> {
        self.edit_message_text(message, text).await
    }

    async fn deliver_file(
        &self,
        recipient: i64,
        path: &Path,
        kind: DeliveryKind,
    ) -> NotifyResult<()> {
        self.send_file(recipient, path, kind).await
    }
}
