use dotenvy::dotenv;
use std::env;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub telegram: TelegramConfig,
    pub auth: AuthConfig,
    pub artifacts: ArtifactConfig,
    pub forwarding: ForwardingConfig,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub api_id: i32,
    pub api_hash: String,
    pub webhook_secret: String,
    /// Public HTTPS base of this deployment; when set, the webhook is
    /// registered with Telegram at boot.
    pub webhook_public_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub signing_key: String,
    pub token_lifetime_hours: i64,
}

#[derive(Debug, Clone)]
pub struct ArtifactConfig {
    pub root: String,
}

#[derive(Debug, Clone)]
pub struct ForwardingConfig {
    pub messages_per_window: u32,
    pub window_seconds: u64,
    pub max_attempts: u32,
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        dotenv().ok();

        Ok(Self {
            database: DatabaseConfig {
                url: env::var("DATABASE_URL")?,
                max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()?,
            },
            server: ServerConfig {
                port: env::var("SERVER_PORT")
                    .unwrap_or_else(|_| "8080".to_string())
                    .parse()?,
            },
            telegram: TelegramConfig {
                bot_token: env::var("TELEGRAM_BOT_TOKEN")?,
                api_id: env::var("TELEGRAM_API_ID")
                    .unwrap_or_else(|_| "0".to_string())
                    .parse()?,
                api_hash: env::var("TELEGRAM_API_HASH").unwrap_or_default(),
                webhook_secret: env::var("WEBHOOK_SECRET")?,
                webhook_public_url: env::var("WEBHOOK_PUBLIC_URL").ok(),
            },
            auth: AuthConfig {
                signing_key: env::var("TOKEN_SIGNING_KEY")?,
                token_lifetime_hours: env::var("TOKEN_LIFETIME_HOURS")
                    .unwrap_or_else(|_| "24".to_string())
                    .parse()?,
            },
            artifacts: ArtifactConfig {
                root: env::var("ARTIFACT_ROOT").unwrap_or_else(|_| "./data".to_string()),
            },
            forwarding: ForwardingConfig {
                messages_per_window: env::var("FORWARD_MESSAGES_PER_WINDOW")
                    .unwrap_or_else(|_| "20".to_string())
                    .parse()?,
                window_seconds: env::var("FORWARD_WINDOW_SECONDS")
                    .unwrap_or_else(|_| "60".to_string())
                    .parse()?,
                max_attempts: env::var("FORWARD_MAX_ATTEMPTS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()?,
            },
        })
    }
}
