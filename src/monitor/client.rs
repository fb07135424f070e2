use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::shared::models::MessageType;

/// A message as received from a user-account session or the bot webhook,
/// before any tenant filtering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingMessage {
    pub chat_id: String,
    pub chat_title: String,
    pub message_id: i64,
    pub sender_id: String,
    pub sender_username: Option<String>,
    pub sender_full_name: Option<String>,
    pub text: Option<String>,
    pub media: Option<MediaAttachment>,
    pub sent_at: DateTime<Utc>,
}

/// Opaque media descriptor: file ids, sizes, mime types. Archived as-is,
/// never downloaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaAttachment {
    pub kind: MessageType,
    pub info: serde_json::Value,
}

impl IncomingMessage {
    pub fn message_type(&self) -> MessageType {
        self.media.as_ref().map(|m| m.kind).unwrap_or(MessageType::Text)
    }

    pub fn media_info(&self) -> serde_json::Value {
        self.media
            .as_ref()
            .map(|m| m.info.clone())
            .unwrap_or_else(|| serde_json::json!({}))
    }
}

#[derive(Debug, Clone)]
pub enum ClientEvent {
    Message(IncomingMessage),
    /// Non-message traffic (typing, read receipts, membership churn).
    Other,
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("transient session error: {0}")]
    Transient(String),
    #[error("session artifact rejected: {0}")]
    ArtifactInvalid(String),
    #[error("authorization revoked: {0}")]
    AuthRevoked(String),
    #[error("session client not configured: {0}")]
    NotConfigured(String),
}

impl ClientError {
    /// Fatal errors escalate the account immediately; only transient ones
    /// go through the reconnect schedule.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Transient(_))
    }
}

/// One live receiver over a user-account session.
#[async_trait]
pub trait SessionStream: Send {
    /// Blocks until the next event arrives or the connection errors out.
    async fn next_event(&mut self) -> Result<ClientEvent, ClientError>;
}

/// Contract consumed from the external user-account client library:
/// given a persisted session artifact, open a connection and stream its
/// events.
#[async_trait]
pub trait SessionConnector: Send + Sync {
    async fn connect(&self, session_path: &str) -> Result<Box<dyn SessionStream>, ClientError>;
}

/// Stand-in connector for deployments where no MTProto client has been
/// linked. Activation fails fast with a clear operator-facing error
/// instead of retrying a connection that can never succeed.
#[derive(Debug, Default)]
pub struct DetachedConnector;

#[async_trait]
impl SessionConnector for DetachedConnector {
    async fn connect(&self, session_path: &str) -> Result<Box<dyn SessionStream>, ClientError> {
        if tokio::fs::metadata(session_path).await.is_err() {
            return Err(ClientError::ArtifactInvalid(format!(
                "session artifact missing: {session_path}"
            )));
        }
        Err(ClientError::NotConfigured(
            "no user-account client linked; set TELEGRAM_API_ID and TELEGRAM_API_HASH and link an MTProto session client".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatality_split() {
        assert!(!ClientError::Transient("flood".into()).is_fatal());
        assert!(ClientError::ArtifactInvalid("bad".into()).is_fatal());
        assert!(ClientError::AuthRevoked("revoked".into()).is_fatal());
        assert!(ClientError::NotConfigured("unlinked".into()).is_fatal());
    }

    #[test]
    fn test_message_type_defaults_to_text() {
        let msg = IncomingMessage {
            chat_id: "-100500".into(),
            chat_title: "g".into(),
            message_id: 1,
            sender_id: "7".into(),
            sender_username: Some("alice".into()),
            sender_full_name: None,
            text: Some("hello".into()),
            media: None,
            sent_at: Utc::now(),
        };
        assert_eq!(msg.message_type(), MessageType::Text);
        assert_eq!(msg.media_info(), serde_json::json!({}));
    }
}
