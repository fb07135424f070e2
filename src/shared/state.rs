use crate::auth::tokens::TokenManager;
use crate::forwarding::Forwarder;
use crate::monitor::health::HealthMonitor;
use crate::monitor::pipeline::Pipeline;
use crate::monitor::supervisor::Supervisor;
use crate::shared::config::AppConfig;
use crate::shared::utils::DbPool;
use crate::telegram::bot_api::BotApi;
use std::sync::Arc;

pub struct AppState {
    pub conn: DbPool,
    pub config: AppConfig,
    pub tokens: Arc<TokenManager>,
    pub bot: Arc<BotApi>,
    pub forwarder: Arc<Forwarder>,
    pub pipeline: Arc<Pipeline>,
    pub supervisor: Arc<Supervisor>,
    pub health: Arc<HealthMonitor>,
}

impl Clone for AppState {
    fn clone(&self) -> Self {
        Self {
            conn: self.conn.clone(),
            config: self.config.clone(),
            tokens: Arc::clone(&self.tokens),
            bot: Arc::clone(&self.bot),
            forwarder: Arc::clone(&self.forwarder),
            pipeline: Arc::clone(&self.pipeline),
            supervisor: Arc::clone(&self.supervisor),
            health: Arc::clone(&self.health),
        }
    }
}
