//! Messaging channel: the two outbound operations the core needs, plus a Telegram
//! Bot API client that also supplies inbound updates.

use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::types::ChatId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextFormat {
    #[default]
    Plain,
    Markdown,
}

/// An outbound text message, optionally with a one-time reply keyboard.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Outgoing {
    pub text: String,
    pub format: TextFormat,
    pub keyboard: Vec<String>,
}

impl Outgoing {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn markdown(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            format: TextFormat::Markdown,
            keyboard: Vec::new(),
        }
    }

    pub fn with_keyboard<I, S>(mut self, buttons: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keyboard = buttons.into_iter().map(Into::into).collect();
        self
    }
}

#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send_message(&self, chat: ChatId, message: &Outgoing) -> Result<()>;
    async fn send_document(&self, chat: ChatId, path: &Path) -> Result<()>;
}

/// One inbound text message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingText {
    pub update_id: i64,
    pub chat: ChatId,
    pub text: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    #[serde(default)]
    message: Option<Message>,
}

#[derive(Debug, Deserialize)]
struct Message {
    chat: Chat,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: ChatId,
}

/// Telegram Bot API client.
#[derive(Clone)]
pub struct TelegramClient {
    http: reqwest::Client,
    base: String,
}

impl std::fmt::Debug for TelegramClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // The base URL embeds the bot token.
        f.debug_struct("TelegramClient").finish_non_exhaustive()
    }
}

/// Long-poll wait passed to `getUpdates`, in seconds.
pub const POLL_TIMEOUT_SECS: u64 = 30;

impl TelegramClient {
    pub fn new(token: &str) -> Result<Self> {
        Self::with_api_url("https://api.telegram.org", token)
    }

    pub fn with_api_url(api_url: &str, token: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(POLL_TIMEOUT_SECS + 30))
            .build()
            .context("failed to build Telegram HTTP client")?;
        Ok(Self {
            http,
            base: format!("{}/bot{}", api_url.trim_end_matches('/'), token),
        })
    }

    async fn call<T: for<'de> Deserialize<'de>>(&self, method: &str, body: &Value) -> Result<T> {
        let resp: ApiResponse<T> = self
            .http
            .post(format!("{}/{}", self.base, method))
            .json(body)
            .send()
            .await
            .map_err(|e| anyhow!("telegram {method} request failed: {}", e.without_url()))?
            .json()
            .await
            .with_context(|| format!("telegram {method}: invalid response"))?;
        unwrap_response(method, resp)
    }

    /// Register the bot's command list shown by clients.
    pub async fn set_commands(&self) -> Result<()> {
        let body = json!({
            "commands": [{ "command": "report", "description": "Generate a scan report for an IP address" }]
        });
        let _: bool = self.call("setMyCommands", &body).await?;
        Ok(())
    }

    /// Long-poll for updates after `offset`, keeping only text messages.
    pub async fn get_updates(&self, offset: i64) -> Result<(i64, Vec<IncomingText>)> {
        let body = json!({
            "offset": offset,
            "timeout": POLL_TIMEOUT_SECS,
            "allowed_updates": ["message"],
        });
        let updates: Vec<Update> = self.call("getUpdates", &body).await?;
        Ok(collect_texts(offset, updates))
    }
}

fn unwrap_response<T>(method: &str, resp: ApiResponse<T>) -> Result<T> {
    if !resp.ok {
        return Err(anyhow!(
            "telegram {method} rejected: {}",
            resp.description.unwrap_or_else(|| "no description".into())
        ));
    }
    resp.result
        .ok_or_else(|| anyhow!("telegram {method}: missing result"))
}

/// Next offset plus the text messages contained in a batch of updates.
fn collect_texts(offset: i64, updates: Vec<Update>) -> (i64, Vec<IncomingText>) {
    let next = updates
        .iter()
        .map(|u| u.update_id + 1)
        .max()
        .unwrap_or(offset);
    let texts = updates
        .into_iter()
        .filter_map(|u| {
            let message = u.message?;
            Some(IncomingText {
                update_id: u.update_id,
                chat: message.chat.id,
                text: message.text?,
            })
        })
        .collect();
    (next, texts)
}

fn message_body(chat: ChatId, message: &Outgoing) -> Value {
    let mut body = json!({ "chat_id": chat, "text": message.text });
    if message.format == TextFormat::Markdown {
        body["parse_mode"] = json!("Markdown");
    }
    if !message.keyboard.is_empty() {
        let row: Vec<Value> = message
            .keyboard
            .iter()
            .map(|label| json!({ "text": label }))
            .collect();
        body["reply_markup"] = json!({
            "keyboard": [row],
            "one_time_keyboard": true,
            "resize_keyboard": true,
        });
    }
    body
}

#[async_trait]
impl Messenger for TelegramClient {
    async fn send_message(&self, chat: ChatId, message: &Outgoing) -> Result<()> {
        let _: Value = self.call("sendMessage", &message_body(chat, message)).await?;
        Ok(())
    }

    async fn send_document(&self, chat: ChatId, path: &Path) -> Result<()> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read document: {}", path.display()))?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "report.html".into());
        let part = Part::bytes(bytes).file_name(file_name).mime_str("text/html")?;
        let form = Form::new()
            .text("chat_id", chat.to_string())
            .part("document", part);

        let resp: ApiResponse<Value> = self
            .http
            .post(format!("{}/sendDocument", self.base))
            .multipart(form)
            .send()
            .await
            .map_err(|e| anyhow!("telegram sendDocument request failed: {}", e.without_url()))?
            .json()
            .await
            .context("telegram sendDocument: invalid response")?;
        unwrap_response("sendDocument", resp)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyboard_and_markdown_are_encoded() {
        let msg = Outgoing::markdown("pick").with_keyboard(["A", "B"]);
        let body = message_body(42, &msg);
        assert_eq!(body["chat_id"], 42);
        assert_eq!(body["parse_mode"], "Markdown");
        assert_eq!(body["reply_markup"]["keyboard"][0][1]["text"], "B");
        assert_eq!(body["reply_markup"]["one_time_keyboard"], true);

        let plain = message_body(1, &Outgoing::plain("hi"));
        assert!(plain.get("parse_mode").is_none());
        assert!(plain.get("reply_markup").is_none());
    }

    #[test]
    fn updates_keep_text_and_advance_offset() {
        let raw = r#"{"ok":true,"result":[
            {"update_id":10,"message":{"chat":{"id":7},"text":"/report"}},
            {"update_id":11,"message":{"chat":{"id":7},"photo":[]}},
            {"update_id":12,"edited_message":{"chat":{"id":7},"text":"x"}}
        ]}"#;
        let resp: ApiResponse<Vec<Update>> = serde_json::from_str(raw).unwrap();
        let (next, texts) = collect_texts(0, unwrap_response("getUpdates", resp).unwrap());
        assert_eq!(next, 13);
        assert_eq!(
            texts,
            vec![IncomingText {
                update_id: 10,
                chat: 7,
                text: "/report".into()
            }]
        );
    }

    #[test]
    fn rejected_call_reports_description() {
        let resp: ApiResponse<Value> =
            serde_json::from_str(r#"{"ok":false,"description":"Bad Request: chat not found"}"#).unwrap();
        let err = unwrap_response("sendMessage", resp).unwrap_err();
        assert!(err.to_string().contains("chat not found"));
    }

    #[test]
    fn debug_hides_token() {
        let client = TelegramClient::new("123:secret").unwrap();
        assert!(!format!("{client:?}").contains("secret"));
    }
}
