use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

pub const LOGIN_MAX_AGE_HOURS: i64 = 24;

/// Payload posted by the Telegram Login Widget. The `hash` field covers
/// every other present field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TelegramLoginPayload {
    pub id: i64,
    pub first_name: String,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub photo_url: Option<String>,
    pub auth_date: i64,
    pub hash: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginVerifyError {
    BadSignature,
    Expired,
}

impl std::fmt::Display for LoginVerifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BadSignature => write!(f, "login signature mismatch"),
            Self::Expired => write!(f, "login payload expired"),
        }
    }
}

impl std::error::Error for LoginVerifyError {}

/// The data-check string: all fields except `hash`, as sorted `k=v` lines.
fn data_check_string(payload: &TelegramLoginPayload) -> String {
    let mut pairs = vec![
        format!("auth_date={}", payload.auth_date),
        format!("first_name={}", payload.first_name),
        format!("id={}", payload.id),
    ];
    if let Some(last_name) = &payload.last_name {
        pairs.push(format!("last_name={last_name}"));
    }
    if let Some(photo_url) = &payload.photo_url {
        pairs.push(format!("photo_url={photo_url}"));
    }
    if let Some(username) = &payload.username {
        pairs.push(format!("username={username}"));
    }
    pairs.sort();
    pairs.join("\n")
}

/// Hex digest Telegram expects: HMAC-SHA256 over the data-check string,
/// keyed with SHA-256 of the bot token.
pub fn login_digest(payload: &TelegramLoginPayload, bot_token: &str) -> String {
    let key = Sha256::digest(bot_token.as_bytes());
    let mut mac = HmacSha256::new_from_slice(&key).expect("HMAC can take key of any size");
    mac.update(data_check_string(payload).as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

pub fn verify_login(
    payload: &TelegramLoginPayload,
    bot_token: &str,
    now: DateTime<Utc>,
) -> Result<(), LoginVerifyError> {
    let expected = login_digest(payload, bot_token);
    if !constant_time_compare(&expected, &payload.hash) {
        return Err(LoginVerifyError::BadSignature);
    }

    let age = now.timestamp() - payload.auth_date;
    if age > Duration::hours(LOGIN_MAX_AGE_HOURS).num_seconds() {
        return Err(LoginVerifyError::Expired);
    }

    Ok(())
}

fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }
    result == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOT_TOKEN: &str = "110201543:AAHdqTcvCH1vGWJxfSeofSAs0K5PALDsaw";

    fn signed_payload(auth_date: i64) -> TelegramLoginPayload {
        let mut payload = TelegramLoginPayload {
            id: 1001,
            first_name: "Alice".into(),
            last_name: None,
            username: Some("alice".into()),
            photo_url: None,
            auth_date,
            hash: String::new(),
        };
        payload.hash = login_digest(&payload, BOT_TOKEN);
        payload
    }

    #[test]
    fn test_verification_is_deterministic() {
        let payload = signed_payload(Utc::now().timestamp());
        let a = login_digest(&payload, BOT_TOKEN);
        let b = login_digest(&payload, BOT_TOKEN);
        assert_eq!(a, b);
        assert!(verify_login(&payload, BOT_TOKEN, Utc::now()).is_ok());
        assert!(verify_login(&payload, BOT_TOKEN, Utc::now()).is_ok());
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let mut payload = signed_payload(Utc::now().timestamp());
        payload.first_name = "Mallory".into();
        assert_eq!(
            verify_login(&payload, BOT_TOKEN, Utc::now()),
            Err(LoginVerifyError::BadSignature)
        );
    }

    #[test]
    fn test_wrong_bot_token_rejected() {
        let payload = signed_payload(Utc::now().timestamp());
        assert_eq!(
            verify_login(&payload, "999999:other-token", Utc::now()),
            Err(LoginVerifyError::BadSignature)
        );
    }

    #[test]
    fn test_stale_auth_date_rejected() {
        let now = Utc::now();
        let payload = signed_payload((now - Duration::hours(25)).timestamp());
        assert_eq!(
            verify_login(&payload, BOT_TOKEN, now),
            Err(LoginVerifyError::Expired)
        );
    }

    #[test]
    fn test_age_boundary_inside_window() {
        let now = Utc::now();
        let payload = signed_payload((now - Duration::hours(23)).timestamp());
        assert!(verify_login(&payload, BOT_TOKEN, now).is_ok());
    }

    #[test]
    fn test_optional_fields_change_digest() {
        let now = Utc::now().timestamp();
        let bare = signed_payload(now);
        let mut with_photo = bare.clone();
        with_photo.photo_url = Some("https://t.me/i/userpic/1.jpg".into());
        assert_ne!(login_digest(&bare, BOT_TOKEN), login_digest(&with_photo, BOT_TOKEN));
    }
}
