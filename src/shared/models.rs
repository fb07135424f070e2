use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Owner,
    Admin,
    Viewer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Admin => "admin",
            Self::Viewer => "viewer",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "owner" => Some(Self::Owner),
            "admin" => Some(Self::Admin),
            "viewer" => Some(Self::Viewer),
            _ => None,
        }
    }

    pub fn can_mutate(&self) -> bool {
        matches!(self, Self::Owner | Self::Admin)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plan {
    Free,
    Pro,
    Enterprise,
}

impl Plan {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Pro => "pro",
            Self::Enterprise => "enterprise",
        }
    }

    /// Case-sensitive on purpose: "Free" is not a valid plan.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "free" => Some(Self::Free),
            "pro" => Some(Self::Pro),
            "enterprise" => Some(Self::Enterprise),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountStatus {
    Pending,
    Active,
    Inactive,
    Error,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "active" => Some(Self::Active),
            "inactive" => Some(Self::Inactive),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Text,
    Photo,
    Video,
    Document,
    Audio,
    Voice,
    Sticker,
    Other,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Photo => "photo",
            Self::Video => "video",
            Self::Document => "document",
            Self::Audio => "audio",
            Self::Voice => "voice",
            Self::Sticker => "sticker",
            Self::Other => "other",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "text" => Some(Self::Text),
            "photo" => Some(Self::Photo),
            "video" => Some(Self::Video),
            "document" => Some(Self::Document),
            "audio" => Some(Self::Audio),
            "voice" => Some(Self::Voice),
            "sticker" => Some(Self::Sticker),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable, Insertable)]
#[diesel(table_name = organizations)]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub plan: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable, Insertable)]
#[diesel(table_name = users)]
pub struct User {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub telegram_id: i64,
    pub username: Option<String>,
    pub first_name: String,
    pub last_name: Option<String>,
    pub photo_url: Option<String>,
    pub role: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable, Insertable)]
#[diesel(table_name = groups)]
pub struct Group {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub group_id: String,
    pub group_name: String,
    pub group_type: String,
    pub invite_link: Option<String>,
    pub description: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable, Insertable)]
#[diesel(table_name = watchlist_users)]
pub struct WatchlistUser {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub username: String,
    pub user_id: Option<String>,
    pub full_name: Option<String>,
    pub group_ids: Vec<Uuid>,
    pub keywords: Vec<String>,
    pub forwarding_destination_ids: Vec<Uuid>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable, Insertable)]
#[diesel(table_name = destinations)]
pub struct Destination {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub destination_id: String,
    pub destination_name: String,
    pub destination_type: String,
    pub description: Option<String>,
    pub message_count: i64,
    pub last_forwarded: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable, Insertable)]
#[diesel(table_name = accounts)]
pub struct Account {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub session_path: String,
    pub metadata_path: String,
    pub phone_number: Option<String>,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub status: String,
    pub last_error: Option<String>,
    pub assigned_group_ids: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub last_activity: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable, Insertable)]
#[diesel(table_name = message_logs)]
pub struct MessageLog {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub group_id: String,
    pub group_name: String,
    pub user_id: String,
    pub username: String,
    pub message_id: String,
    pub message_text: Option<String>,
    pub message_type: String,
    pub media_info: serde_json::Value,
    pub matched_keywords: Vec<String>,
    pub timestamp: DateTime<Utc>,
    pub ingested_via: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable, Insertable)]
#[diesel(table_name = forwarded_messages)]
pub struct ForwardedMessage {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub message_log_id: Uuid,
    pub username: String,
    pub group_name: String,
    pub destination_id: Uuid,
    pub forwarded_at: DateTime<Utc>,
    pub outcome: String,
    pub failure_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable, Insertable)]
#[diesel(table_name = bot_commands)]
pub struct BotCommandLog {
    pub id: Uuid,
    pub tenant_id: Option<Uuid>,
    pub telegram_user_id: i64,
    pub command: String,
    pub args: String,
    pub timestamp: DateTime<Utc>,
}

pub mod schema {
    diesel::table! {
        organizations (id) {
            id -> Uuid,
            name -> Text,
            description -> Nullable<Text>,
            plan -> Text,
            created_at -> Timestamptz,
        }
    }

    diesel::table! {
        users (id) {
            id -> Uuid,
            tenant_id -> Uuid,
            telegram_id -> Int8,
            username -> Nullable<Text>,
            first_name -> Text,
            last_name -> Nullable<Text>,
            photo_url -> Nullable<Text>,
            role -> Text,
            is_active -> Bool,
            created_at -> Timestamptz,
            last_login -> Nullable<Timestamptz>,
        }
    }

    diesel::table! {
        groups (id) {
            id -> Uuid,
            tenant_id -> Uuid,
            group_id -> Text,
            group_name -> Text,
            group_type -> Text,
            invite_link -> Nullable<Text>,
            description -> Nullable<Text>,
            is_active -> Bool,
            created_at -> Timestamptz,
        }
    }

    diesel::table! {
        watchlist_users (id) {
            id -> Uuid,
            tenant_id -> Uuid,
            username -> Text,
            user_id -> Nullable<Text>,
            full_name -> Nullable<Text>,
            group_ids -> Array<Uuid>,
            keywords -> Array<Text>,
            forwarding_destination_ids -> Array<Uuid>,
            is_active -> Bool,
            created_at -> Timestamptz,
        }
    }

    diesel::table! {
        destinations (id) {
            id -> Uuid,
            tenant_id -> Uuid,
            destination_id -> Text,
            destination_name -> Text,
            destination_type -> Text,
            description -> Nullable<Text>,
            message_count -> Int8,
            last_forwarded -> Nullable<Timestamptz>,
            last_error -> Nullable<Text>,
            is_active -> Bool,
            created_at -> Timestamptz,
        }
    }

    diesel::table! {
        accounts (id) {
            id -> Uuid,
            tenant_id -> Uuid,
            name -> Text,
            session_path -> Text,
            metadata_path -> Text,
            phone_number -> Nullable<Text>,
            username -> Nullable<Text>,
            first_name -> Nullable<Text>,
            last_name -> Nullable<Text>,
            status -> Text,
            last_error -> Nullable<Text>,
            assigned_group_ids -> Array<Uuid>,
            created_at -> Timestamptz,
            last_activity -> Nullable<Timestamptz>,
        }
    }

    diesel::table! {
        message_logs (id) {
            id -> Uuid,
            tenant_id -> Uuid,
            group_id -> Text,
            group_name -> Text,
            user_id -> Text,
            username -> Text,
            message_id -> Text,
            message_text -> Nullable<Text>,
            message_type -> Text,
            media_info -> Jsonb,
            matched_keywords -> Array<Text>,
            timestamp -> Timestamptz,
            ingested_via -> Text,
        }
    }

    diesel::table! {
        forwarded_messages (id) {
            id -> Uuid,
            tenant_id -> Uuid,
            message_log_id -> Uuid,
            username -> Text,
            group_name -> Text,
            destination_id -> Uuid,
            forwarded_at -> Timestamptz,
            outcome -> Text,
            failure_reason -> Nullable<Text>,
        }
    }

    diesel::table! {
        bot_commands (id) {
            id -> Uuid,
            tenant_id -> Nullable<Uuid>,
            telegram_user_id -> Int8,
            command -> Text,
            args -> Text,
            timestamp -> Timestamptz,
        }
    }
}

pub use schema::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_rejects_case_variants() {
        assert_eq!(Plan::parse("free"), Some(Plan::Free));
        assert_eq!(Plan::parse("Free"), None);
        assert_eq!(Plan::parse("FREE"), None);
        assert_eq!(Plan::parse("premium"), None);
        assert_eq!(Plan::parse("enterprise"), Some(Plan::Enterprise));
    }

    #[test]
    fn test_role_gating() {
        assert!(Role::Owner.can_mutate());
        assert!(Role::Admin.can_mutate());
        assert!(!Role::Viewer.can_mutate());
        assert_eq!(Role::parse("viewer"), Some(Role::Viewer));
        assert_eq!(Role::parse("superuser"), None);
    }

    #[test]
    fn test_message_type_round_trip() {
        for kind in [
            MessageType::Text,
            MessageType::Photo,
            MessageType::Video,
            MessageType::Document,
            MessageType::Audio,
            MessageType::Voice,
            MessageType::Sticker,
            MessageType::Other,
        ] {
            assert_eq!(MessageType::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(MessageType::parse("gif"), None);
    }
}
