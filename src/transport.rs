//! Messaging-transport seam.
//!
//! The pipeline only needs three capabilities from the transport: send a
//! text message, send a message with action buttons, and download an
//! attachment by its opaque reference. [`Transport`] captures that seam so
//! the controller, committer, and approval router stay transport-agnostic
//! (tests use a recording mock).
//!
//! [`BotApi`] is the HTTP implementation against a Telegram-style Bot API,
//! including the long-poll update loop that turns wire JSON into
//! [`InboundEvent`]s.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

use crate::models::{ActorId, Command, InboundEvent};

/// One reviewer- or submitter-facing button.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionButton {
    /// Posts an action token back into the pipeline when pressed.
    Callback { label: String, data: String },
    /// Passive link, opens in the browser.
    Link { label: String, url: String },
}

impl ActionButton {
    pub fn callback(label: impl Into<String>, data: impl Into<String>) -> Self {
        Self::Callback {
            label: label.into(),
            data: data.into(),
        }
    }

    pub fn link(label: impl Into<String>, url: impl Into<String>) -> Self {
        Self::Link {
            label: label.into(),
            url: url.into(),
        }
    }
}

/// Outbound messaging and attachment retrieval.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_text(&self, chat: ActorId, text: &str) -> Result<()>;

    /// Send a message with rows of action buttons.
    async fn send_actions(
        &self,
        chat: ActorId,
        text: &str,
        rows: Vec<Vec<ActionButton>>,
    ) -> Result<()>;

    /// Download an attachment by its transport file reference.
    async fn download(&self, file_ref: &str) -> Result<Vec<u8>>;
}

/// Telegram-style Bot API client.
pub struct BotApi {
    client: reqwest::Client,
    api_base: String,
    file_base: String,
    poll_timeout_secs: u64,
}

impl BotApi {
    pub fn new(token: &str, poll_timeout_secs: u64) -> Result<Self> {
        // The request timeout must outlast the long-poll wait.
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(poll_timeout_secs + 10))
            .build()?;
        Ok(Self {
            client,
            api_base: format!("https://api.telegram.org/bot{}", token),
            file_base: format!("https://api.telegram.org/file/bot{}", token),
            poll_timeout_secs,
        })
    }

    async fn call(&self, method: &str, body: Value) -> Result<Value> {
        let url = format!("{}/{}", self.api_base, method);
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("transport call {} failed", method))?;
        let status = response.status();
        let json: Value = response
            .json()
            .await
            .with_context(|| format!("transport call {} returned invalid JSON", method))?;
        if !status.is_success() || json.get("ok").and_then(|v| v.as_bool()) != Some(true) {
            bail!("transport call {} rejected: {}", method, json);
        }
        Ok(json)
    }

    /// Fetch the next batch of updates, advancing the offset past every
    /// update returned.
    pub async fn poll_updates(&self, offset: &mut i64) -> Result<Vec<Value>> {
        let json = self
            .call(
                "getUpdates",
                json!({
                    "offset": *offset,
                    "timeout": self.poll_timeout_secs,
                    "allowed_updates": ["message", "callback_query"],
                }),
            )
            .await?;

        let updates = json
            .get("result")
            .and_then(|r| r.as_array())
            .cloned()
            .unwrap_or_default();

        for update in &updates {
            if let Some(id) = update.get("update_id").and_then(|v| v.as_i64()) {
                if id >= *offset {
                    *offset = id + 1;
                }
            }
        }

        Ok(updates)
    }

    /// Long-poll forever, feeding parsed events into the dispatcher.
    /// Transport errors are logged and retried after a short pause.
    pub async fn poll_loop(&self, events: UnboundedSender<InboundEvent>) {
        let mut offset = 0i64;
        loop {
            match self.poll_updates(&mut offset).await {
                Ok(updates) => {
                    for update in updates {
                        // Button presses are acknowledged right away so the
                        // sender's UI stops spinning; the action itself goes
                        // through the actor's mailbox like any other event.
                        if let Some(cb_id) = update
                            .pointer("/callback_query/id")
                            .and_then(|v| v.as_str())
                        {
                            if let Err(e) = self
                                .call("answerCallbackQuery", json!({ "callback_query_id": cb_id }))
                                .await
                            {
                                debug!("callback ack failed: {e:#}");
                            }
                        }

                        match event_from_update(&update) {
                            Some(event) => {
                                if events.send(event).is_err() {
                                    return;
                                }
                            }
                            None => debug!("ignoring unsupported update"),
                        }
                    }
                }
                Err(e) => {
                    warn!("update poll failed: {e:#}");
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
            }
        }
    }
}

#[async_trait]
impl Transport for BotApi {
    async fn send_text(&self, chat: ActorId, text: &str) -> Result<()> {
        self.call("sendMessage", json!({ "chat_id": chat, "text": text }))
            .await?;
        Ok(())
    }

    async fn send_actions(
        &self,
        chat: ActorId,
        text: &str,
        rows: Vec<Vec<ActionButton>>,
    ) -> Result<()> {
        let keyboard: Vec<Vec<Value>> = rows
            .iter()
            .map(|row| {
                row.iter()
                    .map(|button| match button {
                        ActionButton::Callback { label, data } => {
                            json!({ "text": label, "callback_data": data })
                        }
                        ActionButton::Link { label, url } => {
                            json!({ "text": label, "url": url })
                        }
                    })
                    .collect()
            })
            .collect();

        self.call(
            "sendMessage",
            json!({
                "chat_id": chat,
                "text": text,
                "reply_markup": { "inline_keyboard": keyboard },
            }),
        )
        .await?;
        Ok(())
    }

    async fn download(&self, file_ref: &str) -> Result<Vec<u8>> {
        let info = self
            .call("getFile", json!({ "file_id": file_ref }))
            .await?;
        let file_path = info
            .pointer("/result/file_path")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("getFile response missing file_path"))?;

        let url = format!("{}/{}", self.file_base, file_path);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("attachment download failed")?;
        if !response.status().is_success() {
            bail!("attachment download rejected: HTTP {}", response.status());
        }
        Ok(response.bytes().await?.to_vec())
    }
}

/// Map one wire update to an inbound event. Unsupported update kinds
/// return `None` and are skipped.
pub fn event_from_update(update: &Value) -> Option<InboundEvent> {
    if let Some(callback) = update.get("callback_query") {
        let actor = callback.pointer("/message/chat/id")?.as_i64()?;
        let data = callback.get("data")?.as_str()?.to_string();
        return Some(InboundEvent::Action { actor, data });
    }

    let message = update.get("message")?;
    let actor = message.pointer("/chat/id")?.as_i64()?;
    let caption = message
        .get("caption")
        .and_then(|c| c.as_str())
        .map(|c| c.to_string());
    let group = message
        .get("media_group_id")
        .and_then(|g| g.as_str())
        .map(|g| g.to_string());

    if let Some(sizes) = message.get("photo").and_then(|p| p.as_array()) {
        // Sizes are ordered smallest to largest; keep the largest.
        let file_ref = sizes.last()?.get("file_id")?.as_str()?.to_string();
        return Some(InboundEvent::Photo {
            actor,
            file_ref,
            group,
            caption,
        });
    }

    if let Some(video) = message.get("video") {
        let file_ref = video.get("file_id")?.as_str()?.to_string();
        return Some(InboundEvent::Video {
            actor,
            file_ref,
            group,
            caption,
        });
    }

    if let Some(voice) = message.get("voice") {
        let file_ref = voice.get("file_id")?.as_str()?.to_string();
        let mime = voice
            .get("mime_type")
            .and_then(|m| m.as_str())
            .map(|m| m.to_string());
        return Some(InboundEvent::Voice {
            actor,
            file_ref,
            mime,
        });
    }

    let text = message.get("text")?.as_str()?.trim();
    if text.is_empty() {
        return None;
    }

    if let Some(command) = parse_command(text) {
        return Some(InboundEvent::Command {
            actor,
            command,
        });
    }

    Some(InboundEvent::Text {
        actor,
        text: text.to_string(),
    })
}

fn parse_command(text: &str) -> Option<Command> {
    match text {
        "/start" => return Some(Command::Start),
        "/done" => return Some(Command::Finish),
        "/cancel" => return Some(Command::Cancel),
        "/list" => return Some(Command::List),
        _ => {}
    }
    if let Some(rest) = text.strip_prefix("/date") {
        return Some(Command::SetDate(rest.trim().to_string()));
    }
    if let Some(rest) = text.strip_prefix("/location") {
        return Some(Command::SetLocation(rest.trim().to_string()));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_update() {
        let update = json!({
            "update_id": 1,
            "message": { "chat": { "id": 42 }, "text": "hello there" }
        });
        match event_from_update(&update) {
            Some(InboundEvent::Text { actor, text }) => {
                assert_eq!(actor, 42);
                assert_eq!(text, "hello there");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_command_updates() {
        let cases = [
            ("/start", Command::Start),
            ("/done", Command::Finish),
            ("/cancel", Command::Cancel),
            ("/list", Command::List),
            ("/date 15.02.2026", Command::SetDate("15.02.2026".to_string())),
            (
                "/location 55.751244,37.618423",
                Command::SetLocation("55.751244,37.618423".to_string()),
            ),
        ];
        for (text, expected) in cases {
            let update = json!({ "message": { "chat": { "id": 1 }, "text": text } });
            match event_from_update(&update) {
                Some(InboundEvent::Command { command, .. }) => assert_eq!(command, expected),
                other => panic!("unexpected event for {}: {:?}", text, other),
            }
        }
    }

    #[test]
    fn test_photo_update_takes_largest_size() {
        let update = json!({
            "message": {
                "chat": { "id": 7 },
                "photo": [
                    { "file_id": "small" },
                    { "file_id": "medium" },
                    { "file_id": "large" }
                ],
                "media_group_id": "g1",
                "caption": "opening day"
            }
        });
        match event_from_update(&update) {
            Some(InboundEvent::Photo {
                file_ref,
                group,
                caption,
                ..
            }) => {
                assert_eq!(file_ref, "large");
                assert_eq!(group.as_deref(), Some("g1"));
                assert_eq!(caption.as_deref(), Some("opening day"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_callback_update() {
        let update = json!({
            "callback_query": {
                "id": "cb9",
                "data": "p:2024.05.12-workshop",
                "message": { "chat": { "id": 99 } }
            }
        });
        match event_from_update(&update) {
            Some(InboundEvent::Action { actor, data }) => {
                assert_eq!(actor, 99);
                assert_eq!(data, "p:2024.05.12-workshop");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_unsupported_update_is_skipped() {
        let update = json!({ "message": { "chat": { "id": 1 }, "sticker": {} } });
        assert!(event_from_update(&update).is_none());
    }
}
