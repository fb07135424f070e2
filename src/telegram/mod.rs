use axum::{
    extract::{Json, Path, State},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::AuthContext;
use crate::monitor::client::{IncomingMessage, MediaAttachment};
use crate::monitor::pipeline::IngestSource;
use crate::shared::error::{AppError, AppResult};
use crate::shared::models::MessageType;
use crate::shared::state::AppState;

pub mod bot_api;
pub mod commands;

#[derive(Debug, Deserialize, Serialize)]
pub struct TelegramUpdate {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<TelegramMessage>,
    #[serde(default)]
    pub edited_message: Option<TelegramMessage>,
    #[serde(default)]
    pub callback_query: Option<TelegramCallbackQuery>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct TelegramMessage {
    pub message_id: i64,
    pub from: Option<TelegramUser>,
    pub chat: TelegramChat,
    pub date: i64,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub photo: Option<Vec<TelegramPhotoSize>>,
    #[serde(default)]
    pub video: Option<TelegramVideo>,
    #[serde(default)]
    pub document: Option<TelegramDocument>,
    #[serde(default)]
    pub audio: Option<TelegramAudio>,
    #[serde(default)]
    pub voice: Option<TelegramVoice>,
    #[serde(default)]
    pub sticker: Option<TelegramSticker>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct TelegramUser {
    pub id: i64,
    pub is_bot: bool,
    pub first_name: String,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct TelegramChat {
    pub id: i64,
    #[serde(rename = "type")]
    pub chat_type: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct TelegramPhotoSize {
    pub file_id: String,
    pub file_unique_id: String,
    pub width: i32,
    pub height: i32,
    #[serde(default)]
    pub file_size: Option<i64>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct TelegramVideo {
    pub file_id: String,
    pub file_unique_id: String,
    pub duration: i32,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub file_size: Option<i64>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct TelegramDocument {
    pub file_id: String,
    pub file_unique_id: String,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub file_size: Option<i64>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct TelegramAudio {
    pub file_id: String,
    pub file_unique_id: String,
    pub duration: i32,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub file_size: Option<i64>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct TelegramVoice {
    pub file_id: String,
    pub file_unique_id: String,
    pub duration: i32,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub file_size: Option<i64>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct TelegramSticker {
    pub file_id: String,
    pub file_unique_id: String,
    #[serde(default)]
    pub emoji: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct TelegramCallbackQuery {
    pub id: String,
    pub from: TelegramUser,
    #[serde(default)]
    pub message: Option<TelegramMessage>,
    #[serde(default)]
    pub data: Option<String>,
}

pub fn configure() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(root))
        .route("/telegram/webhook/:secret", post(handle_webhook))
        .route("/test/bot", post(test_bot))
}

pub async fn root() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "message": "telewatch API",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Webhook intake: verify the path secret, acknowledge fast, process in
/// the background.
pub async fn handle_webhook(
    State(state): State<Arc<AppState>>,
    Path(secret): Path<String>,
    Json(update): Json<TelegramUpdate>,
) -> AppResult<Json<serde_json::Value>> {
    if secret != state.config.telegram.webhook_secret {
        return Err(AppError::Forbidden("invalid webhook secret".into()));
    }

    debug!("Telegram webhook received: update_id={}", update.update_id);
    tokio::spawn(async move {
        if let Err(e) = process_update(state, update).await {
            error!("Webhook update processing failed: {e}");
        }
    });

    Ok(Json(serde_json::json!({ "status": "ok" })))
}

async fn process_update(state: Arc<AppState>, update: TelegramUpdate) -> AppResult<()> {
    if let Some(message) = update.message.or(update.edited_message) {
        let is_command = message
            .text
            .as_deref()
            .map(|t| t.starts_with('/'))
            .unwrap_or(false);

        if is_command {
            commands::handle_command(&state, &message).await?;
        } else {
            ingest_group_message(&state, &message).await?;
        }
    }

    if let Some(callback) = update.callback_query {
        commands::handle_callback(&state, &callback).await?;
    }

    Ok(())
}

/// Bot-side ingestion: the same pipeline the session receivers feed,
/// once per tenant that monitors this chat.
async fn ingest_group_message(state: &Arc<AppState>, message: &TelegramMessage) -> AppResult<()> {
    let Some(incoming) = to_incoming(message) else {
        return Ok(());
    };

    let tenants: Vec<Uuid> = {
        use crate::shared::models::schema::groups::dsl::*;
        let mut conn = state.conn.get()?;
        groups
            .filter(group_id.eq(&incoming.chat_id))
            .filter(is_active.eq(true))
            .select(tenant_id)
            .distinct()
            .load(&mut conn)?
    };

    for tenant in tenants {
        if let Err(e) = state
            .pipeline
            .ingest(tenant, IngestSource::Webhook, incoming.clone())
            .await
        {
            error!("Webhook ingest for tenant {tenant} failed: {e}");
        }
    }

    Ok(())
}

/// Maps a webhook message onto the pipeline's input shape; `None` for
/// messages without a sender (channel service posts).
pub fn to_incoming(message: &TelegramMessage) -> Option<IncomingMessage> {
    let from = message.from.as_ref()?;

    let full_name = match &from.last_name {
        Some(last) => format!("{} {last}", from.first_name),
        None => from.first_name.clone(),
    };

    let text = message
        .text
        .clone()
        .or_else(|| message.caption.clone())
        .filter(|t| !t.is_empty());

    let sent_at = DateTime::<Utc>::from_timestamp(message.date, 0).unwrap_or_else(Utc::now);

    Some(IncomingMessage {
        chat_id: message.chat.id.to_string(),
        chat_title: message.chat.title.clone().unwrap_or_default(),
        message_id: message.message_id,
        sender_id: from.id.to_string(),
        sender_username: from.username.clone(),
        sender_full_name: Some(full_name),
        text,
        media: extract_media(message),
        sent_at,
    })
}

/// Opaque media descriptors: file ids and sizes only, never content.
fn extract_media(message: &TelegramMessage) -> Option<MediaAttachment> {
    if let Some(photos) = &message.photo {
        let largest = photos.last()?;
        return Some(MediaAttachment {
            kind: MessageType::Photo,
            info: serde_json::json!({
                "file_id": largest.file_id,
                "file_size": largest.file_size,
                "width": largest.width,
                "height": largest.height,
            }),
        });
    }
    if let Some(video) = &message.video {
        return Some(MediaAttachment {
            kind: MessageType::Video,
            info: serde_json::json!({
                "file_id": video.file_id,
                "file_size": video.file_size,
                "duration": video.duration,
                "mime_type": video.mime_type,
            }),
        });
    }
    if let Some(document) = &message.document {
        return Some(MediaAttachment {
            kind: MessageType::Document,
            info: serde_json::json!({
                "file_id": document.file_id,
                "file_name": document.file_name,
                "file_size": document.file_size,
                "mime_type": document.mime_type,
            }),
        });
    }
    if let Some(audio) = &message.audio {
        return Some(MediaAttachment {
            kind: MessageType::Audio,
            info: serde_json::json!({
                "file_id": audio.file_id,
                "duration": audio.duration,
                "mime_type": audio.mime_type,
            }),
        });
    }
    if let Some(voice) = &message.voice {
        return Some(MediaAttachment {
            kind: MessageType::Voice,
            info: serde_json::json!({
                "file_id": voice.file_id,
                "duration": voice.duration,
            }),
        });
    }
    if let Some(sticker) = &message.sticker {
        return Some(MediaAttachment {
            kind: MessageType::Sticker,
            info: serde_json::json!({
                "file_id": sticker.file_id,
                "emoji": sticker.emoji,
            }),
        });
    }
    None
}

/// Bot connectivity probe (`getMe`).
pub async fn test_bot(
    State(state): State<Arc<AppState>>,
    _ctx: AuthContext,
) -> AppResult<Json<serde_json::Value>> {
    let bot_info = state
        .bot
        .get_me()
        .await
        .map_err(|e| AppError::Upstream(format!("bot connection failed: {e}")))?;

    info!("Bot connectivity probe succeeded");
    Ok(Json(serde_json::json!({
        "status": "success",
        "bot_info": bot_info,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_message() -> TelegramMessage {
        TelegramMessage {
            message_id: 7,
            from: Some(TelegramUser {
                id: 42,
                is_bot: false,
                first_name: "Alice".into(),
                last_name: Some("Smith".into()),
                username: Some("Alice".into()),
            }),
            chat: TelegramChat {
                id: -100500,
                chat_type: "supergroup".into(),
                title: Some("signals".into()),
                username: None,
            },
            date: 1_700_000_000,
            text: Some("just bought BTC today".into()),
            caption: None,
            photo: None,
            video: None,
            document: None,
            audio: None,
            voice: None,
            sticker: None,
        }
    }

    #[test]
    fn test_to_incoming_text_message() {
        let incoming = to_incoming(&base_message()).expect("should convert");
        assert_eq!(incoming.chat_id, "-100500");
        assert_eq!(incoming.message_id, 7);
        assert_eq!(incoming.sender_id, "42");
        assert_eq!(incoming.sender_username.as_deref(), Some("Alice"));
        assert_eq!(incoming.sender_full_name.as_deref(), Some("Alice Smith"));
        assert_eq!(incoming.text.as_deref(), Some("just bought BTC today"));
        assert!(incoming.media.is_none());
        assert_eq!(incoming.message_type(), MessageType::Text);
    }

    #[test]
    fn test_to_incoming_photo_takes_largest_size() {
        let mut message = base_message();
        message.text = None;
        message.caption = Some("look".into());
        message.photo = Some(vec![
            TelegramPhotoSize {
                file_id: "small".into(),
                file_unique_id: "s".into(),
                width: 90,
                height: 90,
                file_size: Some(1_000),
            },
            TelegramPhotoSize {
                file_id: "large".into(),
                file_unique_id: "l".into(),
                width: 1280,
                height: 1280,
                file_size: Some(200_000),
            },
        ]);

        let incoming = to_incoming(&message).expect("should convert");
        assert_eq!(incoming.message_type(), MessageType::Photo);
        assert_eq!(incoming.text.as_deref(), Some("look"));
        assert_eq!(incoming.media_info()["file_id"], "large");
    }

    #[test]
    fn test_to_incoming_drops_senderless_posts() {
        let mut message = base_message();
        message.from = None;
        assert!(to_incoming(&message).is_none());
    }

    #[test]
    fn test_sticker_media_kind() {
        let mut message = base_message();
        message.text = None;
        message.sticker = Some(TelegramSticker {
            file_id: "st1".into(),
            file_unique_id: "u".into(),
            emoji: Some("🔥".into()),
        });

        let incoming = to_incoming(&message).expect("should convert");
        assert_eq!(incoming.message_type(), MessageType::Sticker);
        assert!(incoming.text.is_none());
    }
}
