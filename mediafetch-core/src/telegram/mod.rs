mod client;

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::{TelegramSection, AUDIO_QUALITY};
use crate::notify::{DeliveryKind, MessageRef, Notifier};
use crate::pipeline::ProgressSink;
use crate::service::{FetchOutcome, FetchService, ServiceResult};
use crate::store::MediaRequest;

pub use client::{
    CallbackQuery, Chat, InlineKeyboardButton, InlineKeyboardMarkup, Message, TelegramClient,
    Update,
};

const PROGRESS_EDIT_INTERVAL: Duration = Duration::from_secs(2);
const POLL_RETRY_DELAY: Duration = Duration::from_secs(5);

/// What a pressed inline button asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackAction {
    /// `video:URL`: offer the quality keyboard.
    ChooseQuality { source: String },
    /// `audio:URL`
    Audio { source: String },
    /// `quality:URL:Q`
    Video { source: String, quality: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackParseError {
    UnknownPrefix,
    InvalidSource,
    InvalidQuality,
}

pub fn parse_callback(data: &str) -> Result<CallbackAction, CallbackParseError> {
    if let Some(source) = data.strip_prefix("video:") {
        let source = parse_source(source).ok_or(CallbackParseError::InvalidSource)?;
        return Ok(CallbackAction::ChooseQuality { source });
    }
    if let Some(source) = data.strip_prefix("audio:") {
        let source = parse_source(source).ok_or(CallbackParseError::InvalidSource)?;
        return Ok(CallbackAction::Audio { source });
    }
    if let Some(rest) = data.strip_prefix("quality:") {
        // The URL itself contains ':'; the quality is whatever follows the last one.
        let (source, quality) = rest
            .rsplit_once(':')
            .ok_or(CallbackParseError::InvalidQuality)?;
        if quality.is_empty() || quality.contains('/') {
            return Err(CallbackParseError::InvalidQuality);
        }
        let source = parse_source(source).ok_or(CallbackParseError::InvalidSource)?;
        return Ok(CallbackAction::Video {
            source,
            quality: quality.to_string(),
        });
    }
    Err(CallbackParseError::UnknownPrefix)
}

/// Accepts a chat message as a source only if it is a single http(s) URL.
pub fn parse_source(text: &str) -> Option<String> {
    let text = text.trim();
    let url = Url::parse(text).ok()?;
    match url.scheme() {
        "http" | "https" if url.host().is_some() => Some(text.to_string()),
        _ => None,
    }
}

fn quality_label(quality: &str) -> String {
    match quality.strip_prefix("hd") {
        Some(height) if !height.is_empty() => format!("{height}p"),
        _ => quality.to_string(),
    }
}

/// Runs one chat-initiated fetch: posts a progress message, relays progress
/// into it, then delivers the artifact or the error text.
///
/// Notifier failures are logged and never change the task's outcome.
pub async fn deliver_download(
    service: &FetchService,
    notifier: Arc<dyn Notifier>,
    chat_id: i64,
    request: MediaRequest,
    progress_buffer: usize,
) -> ServiceResult<FetchOutcome> {
    let status_message = match notifier.notify(chat_id, "Downloading 0%").await {
        Ok(message) => Some(message),
        Err(err) => {
            warn!(chat_id, error = %err, "failed to post progress message");
            None
        }
    };

    let (progress, relay) = match status_message {
        Some(message) => {
            let (sink, receiver) = ProgressSink::channel(progress_buffer);
            let relay = tokio::spawn(relay_progress(notifier.clone(), message, receiver));
            (sink, Some(relay))
        }
        None => (ProgressSink::none(), None),
    };

    let audio_only = request.audio_only;
    let result = service.fetch(request, progress).await;
    if let Some(relay) = relay {
        // The sink is dropped with the pipeline, which closes the channel.
        let _ = relay.await;
    }

    match &result {
        Ok(outcome) => {
            let kind = DeliveryKind::for_audio_only(audio_only);
            match notifier.deliver_file(chat_id, &outcome.path, kind).await {
                Ok(()) => {
                    info!(chat_id, path = %outcome.path.display(), %kind, "file delivered");
                    if let Err(err) = notifier.notify(chat_id, "File delivered.").await {
                        warn!(chat_id, error = %err, "failed to post completion message");
                    }
                }
                Err(err) => {
                    warn!(
                        chat_id,
                        path = %outcome.path.display(),
                        error = %err,
                        "file delivery failed"
                    );
                    let _ = notifier
                        .notify(chat_id, &format!("Error: could not send file: {err}"))
                        .await;
                }
            }
        }
        Err(err) => {
            if let Err(notify_err) = notifier.notify(chat_id, &format!("Error: {err}")).await {
                warn!(chat_id, error = %notify_err, "failed to post error message");
            }
        }
    }
    result
}

async fn relay_progress(
    notifier: Arc<dyn Notifier>,
    message: MessageRef,
    mut receiver: tokio::sync::mpsc::Receiver<String>,
) {
    let mut last_sent: Option<String> = None;
    let mut last_edit: Option<Instant> = None;
    while let Some(progress) = receiver.recv().await {
        if last_sent.as_deref() == Some(progress.as_str()) {
            continue;
        }
        let finished = progress == "100";
        let throttled = last_edit
            .map(|at| at.elapsed() < PROGRESS_EDIT_INTERVAL)
            .unwrap_or(false);
        if throttled && !finished {
            continue;
        }
        let text = format!("Downloading: {progress}%");
        if let Err(err) = notifier.notify_edit(message, &text).await {
            debug!(chat_id = message.chat_id, error = %err, "progress edit failed");
        }
        last_edit = Some(Instant::now());
        last_sent = Some(progress);
    }
}

/// Long-polling chat front end.
#[derive(Debug, Clone)]
pub struct TelegramBot {
    client: Arc<TelegramClient>,
    service: FetchService,
    qualities: Vec<String>,
    poll_timeout_seconds: u64,
    progress_buffer: usize,
}

impl TelegramBot {
    pub fn new(
        client: TelegramClient,
        service: FetchService,
        section: &TelegramSection,
        progress_buffer: usize,
    ) -> Self {
        Self {
            client: Arc::new(client),
            service,
            qualities: section.qualities.clone(),
            poll_timeout_seconds: section.poll_timeout_seconds,
            progress_buffer,
        }
    }

    /// Polls forever; each update is handled on its own task so a running
    /// download never stalls the poll.
    pub async fn run(self) {
        info!(qualities = ?self.qualities, "telegram bot polling");
        let mut offset = 0;
        loop {
            let updates = match self.client.get_updates(offset, self.poll_timeout_seconds).await {
                Ok(updates) => updates,
                Err(err) => {
                    warn!(error = %err, "getUpdates failed, retrying");
                    tokio::time::sleep(POLL_RETRY_DELAY).await;
                    continue;
                }
            };
            for update in updates {
                offset = offset.max(update.update_id + 1);
                let bot = self.clone();
                tokio::spawn(async move { bot.handle_update(update).await });
            }
        }
    }

    async fn handle_update(&self, update: Update) {
        if let Some(callback) = update.callback_query {
            self.handle_callback(callback).await;
        } else if let Some(message) = update.message {
            self.handle_message(message).await;
        }
    }

    async fn handle_message(&self, message: Message) {
        let chat_id = message.chat.id;
        let Some(text) = message.text.as_deref() else {
            return;
        };
        let Some(source) = parse_source(text) else {
            debug!(chat_id, "ignoring message without a link");
            return;
        };
        let keyboard = InlineKeyboardMarkup::single_row(vec![
            InlineKeyboardButton::new("Video", format!("video:{source}")),
            InlineKeyboardButton::new("Audio only", format!("audio:{source}")),
        ]);
        if let Err(err) = self
            .client
            .send_message(chat_id, "Choose an option:", Some(&keyboard))
            .await
        {
            warn!(chat_id, error = %err, "failed to send option keyboard");
        }
    }

    async fn handle_callback(&self, callback: CallbackQuery) {
        if let Err(err) = self.client.answer_callback_query(&callback.id).await {
            debug!(error = %err, "answerCallbackQuery failed");
        }
        let Some(message) = callback.message else {
            return;
        };
        let chat_id = message.chat.id;
        if let Err(err) = self.client.delete_message(message.reference()).await {
            debug!(chat_id, error = %err, "failed to delete keyboard message");
        }

        let data = callback.data.unwrap_or_default();
        match parse_callback(&data) {
            Ok(CallbackAction::ChooseQuality { source }) => {
                let buttons = self
                    .qualities
                    .iter()
                    .map(|quality| {
                        InlineKeyboardButton::new(
                            quality_label(quality),
                            format!("quality:{source}:{quality}"),
                        )
                    })
                    .collect();
                let keyboard = InlineKeyboardMarkup::single_row(buttons);
                if let Err(err) = self
                    .client
                    .send_message(chat_id, "Choose video quality:", Some(&keyboard))
                    .await
                {
                    warn!(chat_id, error = %err, "failed to send quality keyboard");
                }
            }
            Ok(CallbackAction::Audio { source }) => {
                self.download(chat_id, MediaRequest::new(source, AUDIO_QUALITY))
                    .await;
            }
            Ok(CallbackAction::Video { source, quality }) => {
                self.download(chat_id, MediaRequest::new(source, quality))
                    .await;
            }
            Err(err) => {
                warn!(chat_id, data = %data, error = ?err, "rejected callback");
                let _ = self
                    .client
                    .send_message(chat_id, "Error: invalid quality format", None)
                    .await;
            }
        }
    }

    async fn download(&self, chat_id: i64, request: MediaRequest) {
        let notifier: Arc<dyn Notifier> = self.client.clone();
        info!(
            chat_id,
            source = %request.source,
            quality = %request.quality,
            "chat download requested"
        );
        if let Err(err) =
            deliver_download(&self.service, notifier, chat_id, request, self.progress_buffer).await
        {
            warn!(chat_id, error = %err, "chat download failed");
        }
    }
}
