use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{ChatTransport, MessageRef, Prompt, TransportError, MAX_CHOICE_BYTES};
use crate::models::UserId;

const API_BASE: &str = "https://api.telegram.org";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
const BUTTONS_PER_ROW: usize = 3;

/// An inbound text message or button press.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingUpdate {
    pub update_id: i64,
    pub user_id: UserId,
    pub text: String,
    pub first_name: Option<String>,
    pub user_name: Option<String>,
    pub language: Option<String>,
    /// Set for button presses; must be acknowledged.
    pub callback_id: Option<String>,
}

/// One `getUpdates` page. `last_update_id` also covers updates that were skipped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateBatch {
    pub updates: Vec<IncomingUpdate>,
    pub last_update_id: Option<i64>,
}

/// Telegram Bot API client over long polling.
#[derive(Clone)]
pub struct TelegramClient {
    client: Client,
    base_url: String,
}

impl TelegramClient {
    pub fn new(token: &str) -> Self {
        Self::with_base_url(API_BASE, token)
    }

    pub fn with_base_url(api_base: &str, token: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: format!("{}/bot{token}", api_base.trim_end_matches('/')),
        }
    }

    /// Confirm the token is accepted.
    pub async fn get_me(&self) -> Result<String, TransportError> {
        let result = self.call("getMe", serde_json::json!({}), None, REQUEST_TIMEOUT).await?;
        Ok(result["username"].as_str().unwrap_or_default().to_string())
    }

    /// Long-poll for updates after `offset`.
    pub async fn get_updates(
        &self,
        offset: Option<i64>,
        poll_timeout: Duration,
    ) -> Result<UpdateBatch, TransportError> {
        let mut payload = serde_json::json!({
            "timeout": poll_timeout.as_secs(),
            "allowed_updates": ["message", "callback_query"],
        });
        if let Some(offset) = offset {
            payload["offset"] = serde_json::json!(offset);
        }
        let result = self
            .call("getUpdates", payload, None, poll_timeout + REQUEST_TIMEOUT)
            .await?;
        Ok(parse_updates(&result))
    }

    /// Stop the button spinner on the client side.
    pub async fn answer_callback(&self, callback_id: &str) -> Result<(), TransportError> {
        self.call(
            "answerCallbackQuery",
            serde_json::json!({ "callback_query_id": callback_id }),
            None,
            REQUEST_TIMEOUT,
        )
        .await?;
        Ok(())
    }

    async fn call(
        &self,
        method: &str,
        payload: serde_json::Value,
        chat_id: Option<i64>,
        timeout: Duration,
    ) -> Result<serde_json::Value, TransportError> {
        let url = format!("{}/{method}", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&payload)
            .timeout(timeout)
            .send()
            .await?;
        let body: serde_json::Value = response.json().await?;
        if body["ok"].as_bool().unwrap_or(false) {
            return Ok(body["result"].clone());
        }
        Err(classify_error(
            body["error_code"].as_i64().unwrap_or(0),
            body["description"].as_str().unwrap_or("Unknown"),
            chat_id,
        ))
    }
}

#[async_trait]
impl ChatTransport for TelegramClient {
    async fn send_prompt(
        &self,
        user_id: UserId,
        prompt: &Prompt,
    ) -> Result<MessageRef, TransportError> {
        let mut payload = serde_json::json!({ "chat_id": user_id, "text": prompt.text });
        if !prompt.choices.is_empty() {
            payload["reply_markup"] = inline_keyboard(&prompt.choices);
        }
        let result = self
            .call("sendMessage", payload, Some(user_id), REQUEST_TIMEOUT)
            .await?;
        Ok(MessageRef {
            chat_id: result["chat"]["id"].as_i64().unwrap_or(user_id),
            message_id: result["message_id"].as_i64().unwrap_or_default(),
        })
    }

    async fn edit_prompt(&self, message: MessageRef, prompt: &Prompt) -> Result<(), TransportError> {
        let payload = serde_json::json!({
            "chat_id": message.chat_id,
            "message_id": message.message_id,
            "text": prompt.text,
            "reply_markup": inline_keyboard(&prompt.choices),
        });
        match self
            .call("editMessageText", payload, Some(message.chat_id), REQUEST_TIMEOUT)
            .await
        {
            Ok(_) | Err(TransportError::NotModified) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn delete_message(&self, message: MessageRef) -> Result<(), TransportError> {
        let payload = serde_json::json!({
            "chat_id": message.chat_id,
            "message_id": message.message_id,
        });
        match self
            .call("deleteMessage", payload, Some(message.chat_id), REQUEST_TIMEOUT)
            .await
        {
            Ok(_) | Err(TransportError::MessageGone) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// Map a Bot API failure onto the transport error taxonomy.
pub fn classify_error(code: i64, description: &str, chat_id: Option<i64>) -> TransportError {
    let lower = description.to_lowercase();
    if lower.contains("bot was blocked") || lower.contains("user is deactivated") {
        return TransportError::Blocked(chat_id.unwrap_or_default());
    }
    if lower.contains("message to delete not found")
        || lower.contains("message to edit not found")
        || lower.contains("message can't be deleted")
    {
        return TransportError::MessageGone;
    }
    if lower.contains("message is not modified") {
        return TransportError::NotModified;
    }
    TransportError::Api {
        code,
        description: description.to_string(),
    }
}

/// Inline keyboard, choice text doubling as callback data.
pub fn inline_keyboard(choices: &[String]) -> serde_json::Value {
    let rows: Vec<Vec<serde_json::Value>> = choices
        .chunks(BUTTONS_PER_ROW)
        .map(|row| {
            row.iter()
                .map(|choice| {
                    serde_json::json!({
                        "text": choice,
                        "callback_data": truncate_bytes(choice, MAX_CHOICE_BYTES),
                    })
                })
                .collect()
        })
        .collect();
    serde_json::json!({ "inline_keyboard": rows })
}

fn truncate_bytes(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Extract text messages and button presses from a `getUpdates` result.
pub fn parse_updates(result: &serde_json::Value) -> UpdateBatch {
    let Some(raw) = result.as_array() else {
        return UpdateBatch::default();
    };
    let last_update_id = raw.iter().filter_map(|u| u["update_id"].as_i64()).max();
    let updates = raw
        .iter()
        .filter_map(|update| {
            let update_id = update["update_id"].as_i64()?;
            let (from, text, callback_id) = if let Some(cb) = update.get("callback_query") {
                (
                    &cb["from"],
                    cb["data"].as_str()?,
                    cb["id"].as_str().map(str::to_string),
                )
            } else {
                let message = update.get("message")?;
                (&message["from"], message["text"].as_str()?, None)
            };
            Some(IncomingUpdate {
                update_id,
                user_id: from["id"].as_i64()?,
                text: text.to_string(),
                first_name: from["first_name"].as_str().map(str::to_string),
                user_name: from["username"].as_str().map(str::to_string),
                language: from["language_code"].as_str().map(str::to_string),
                callback_id,
            })
        })
        .collect();
    UpdateBatch {
        updates,
        last_update_id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocked_and_gone_classified() {
        assert!(matches!(
            classify_error(403, "Forbidden: bot was blocked by the user", Some(5)),
            TransportError::Blocked(5)
        ));
        assert!(matches!(
            classify_error(400, "Bad Request: message to delete not found", None),
            TransportError::MessageGone
        ));
        assert!(matches!(
            classify_error(400, "Bad Request: message is not modified: specified new message content", None),
            TransportError::NotModified
        ));
        assert!(matches!(
            classify_error(429, "Too Many Requests", None),
            TransportError::Api { code: 429, .. }
        ));
    }

    #[test]
    fn keyboard_rows_of_three() {
        let choices: Vec<String> = (1..=7).map(|i| i.to_string()).collect();
        let kb = inline_keyboard(&choices);
        let rows = kb["inline_keyboard"].as_array().unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[2][0]["callback_data"], "7");
    }

    #[test]
    fn long_callback_data_truncated_on_char_boundary() {
        let long = "Ибупрофен ".repeat(10);
        let kb = inline_keyboard(&[long.clone()]);
        let data = kb["inline_keyboard"][0][0]["callback_data"].as_str().unwrap();
        assert!(data.len() <= MAX_CHOICE_BYTES);
        assert!(long.starts_with(data));
    }

    #[test]
    fn parses_messages_and_callbacks() {
        let result = serde_json::json!([
            {
                "update_id": 10,
                "message": {
                    "message_id": 1,
                    "from": { "id": 77, "first_name": "Ann", "language_code": "ru" },
                    "chat": { "id": 77 },
                    "text": "/pain"
                }
            },
            {
                "update_id": 11,
                "callback_query": {
                    "id": "cb-1",
                    "from": { "id": 77, "username": "ann" },
                    "data": "Yes"
                }
            },
            { "update_id": 12, "message": { "from": { "id": 77 }, "sticker": {} } }
        ]);
        let batch = parse_updates(&result);
        assert_eq!(batch.last_update_id, Some(12));
        let updates = batch.updates;
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].text, "/pain");
        assert_eq!(updates[0].language.as_deref(), Some("ru"));
        assert_eq!(updates[1].callback_id.as_deref(), Some("cb-1"));
        assert_eq!(updates[1].text, "Yes");
    }
}
