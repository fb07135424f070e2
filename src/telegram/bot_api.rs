use log::{error, info};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Serialize)]
struct SendMessage {
    chat_id: String,
    text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    parse_mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_markup: Option<ReplyMarkup>,
    #[serde(skip_serializing_if = "Option::is_none")]
    disable_web_page_preview: Option<bool>,
}

#[derive(Debug, Serialize)]
struct CopyMessage {
    chat_id: String,
    from_chat_id: String,
    message_id: i64,
}

#[derive(Debug, Serialize)]
pub struct ReplyMarkup {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline_keyboard: Option<Vec<Vec<InlineButton>>>,
}

#[derive(Debug, Serialize)]
pub struct InlineButton {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_data: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ApiResponse {
    pub ok: bool,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
pub struct ResponseParameters {
    #[serde(default)]
    pub retry_after: Option<u64>,
}

/// Delivery errors split by retryability: the forwarder backs off on
/// `Transient` and writes a failed ledger row immediately on `Permanent`.
#[derive(Debug, thiserror::Error)]
pub enum BotApiError {
    #[error("transient Telegram API error: {message}")]
    Transient {
        message: String,
        retry_after: Option<u64>,
    },
    #[error("permanent Telegram API error: {0}")]
    Permanent(String),
}

impl BotApiError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    pub fn retry_after(&self) -> Option<u64> {
        match self {
            Self::Transient { retry_after, .. } => *retry_after,
            Self::Permanent(_) => None,
        }
    }
}

#[derive(Debug)]
pub struct BotApi {
    bot_token: String,
    client: reqwest::Client,
}

impl BotApi {
    pub fn new(bot_token: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        Self {
            bot_token: bot_token.to_string(),
            client,
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.bot_token.is_empty()
    }

    async fn request<T: Serialize>(
        &self,
        method: &str,
        payload: &T,
    ) -> Result<ApiResponse, BotApiError> {
        if self.bot_token.is_empty() {
            return Err(BotApiError::Permanent("bot token not configured".into()));
        }

        let url = format!("https://api.telegram.org/bot{}/{}", self.bot_token, method);

        let response = self
            .client
            .post(&url)
            .json(payload)
            .send()
            .await
            .map_err(|e| BotApiError::Transient {
                message: format!("request failed: {e}"),
                retry_after: None,
            })?;

        let status = response.status();
        let body: ApiResponse = response.json().await.map_err(|e| BotApiError::Transient {
            message: format!("malformed API response: {e}"),
            retry_after: None,
        })?;

        if body.ok {
            return Ok(body);
        }

        let message = body
            .description
            .unwrap_or_else(|| "unknown Telegram API error".to_string());

        if status.as_u16() == 429 {
            let retry_after = body.parameters.and_then(|p| p.retry_after);
            return Err(BotApiError::Transient {
                message,
                retry_after,
            });
        }
        if status.is_server_error() {
            return Err(BotApiError::Transient {
                message,
                retry_after: None,
            });
        }

        error!("Telegram API error on {method}: {message}");
        Err(BotApiError::Permanent(message))
    }

    /// `sendMessage` with MarkdownV2; the caller escapes the text.
    pub async fn send_message(&self, chat_id: &str, text: &str) -> Result<(), BotApiError> {
        let payload = SendMessage {
            chat_id: chat_id.to_string(),
            text: text.to_string(),
            parse_mode: Some("MarkdownV2".to_string()),
            reply_markup: None,
            disable_web_page_preview: Some(true),
        };
        self.request("sendMessage", &payload).await?;
        Ok(())
    }

    pub async fn send_message_with_buttons(
        &self,
        chat_id: &str,
        text: &str,
        buttons: Vec<(String, String)>,
    ) -> Result<(), BotApiError> {
        let inline_keyboard = buttons
            .into_iter()
            .map(|(label, callback)| {
                vec![InlineButton {
                    text: label,
                    callback_data: Some(callback),
                }]
            })
            .collect();

        let payload = SendMessage {
            chat_id: chat_id.to_string(),
            text: text.to_string(),
            parse_mode: Some("MarkdownV2".to_string()),
            reply_markup: Some(ReplyMarkup {
                inline_keyboard: Some(inline_keyboard),
            }),
            disable_web_page_preview: Some(true),
        };
        self.request("sendMessage", &payload).await?;
        Ok(())
    }

    pub async fn copy_message(
        &self,
        chat_id: &str,
        from_chat_id: &str,
        message_id: i64,
    ) -> Result<(), BotApiError> {
        let payload = CopyMessage {
            chat_id: chat_id.to_string(),
            from_chat_id: from_chat_id.to_string(),
            message_id,
        };
        self.request("copyMessage", &payload).await?;
        Ok(())
    }

    pub async fn get_me(&self) -> Result<serde_json::Value, BotApiError> {
        #[derive(Serialize)]
        struct Empty {}

        let response = self.request("getMe", &Empty {}).await?;
        Ok(response.result.unwrap_or(serde_json::Value::Null))
    }

    pub async fn set_webhook(&self, webhook_url: &str) -> Result<(), BotApiError> {
        #[derive(Serialize)]
        struct SetWebhook {
            url: String,
            allowed_updates: Vec<String>,
        }

        let payload = SetWebhook {
            url: webhook_url.to_string(),
            allowed_updates: vec!["message".to_string(), "callback_query".to_string()],
        };
        self.request("setWebhook", &payload).await?;
        info!("Telegram webhook set to {webhook_url}");
        Ok(())
    }
}
