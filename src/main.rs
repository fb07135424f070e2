use diesel::r2d2::{ConnectionManager, Pool};
use diesel::PgConnection;
use log::{error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tower::Layer;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use telewatch::auth::tokens::TokenManager;
use telewatch::forwarding::Forwarder;
use telewatch::monitor::balancer;
use telewatch::monitor::client::{DetachedConnector, SessionConnector};
use telewatch::monitor::health::HealthMonitor;
use telewatch::monitor::pipeline::Pipeline;
use telewatch::monitor::supervisor::Supervisor;
use telewatch::shared::config::AppConfig;
use telewatch::shared::state::AppState;
use telewatch::telegram::bot_api::BotApi;

const DRAIN_GRACE: Duration = Duration::from_secs(3);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = AppConfig::load()?;

    let manager = ConnectionManager::<PgConnection>::new(&config.database.url);
    let pool = Pool::builder()
        .max_size(config.database.max_connections)
        .build(manager)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let tokens = Arc::new(TokenManager::new(
        &config.auth.signing_key,
        config.auth.token_lifetime_hours,
    ));
    let bot = Arc::new(BotApi::new(&config.telegram.bot_token));
    let forwarder = Arc::new(Forwarder::new(
        pool.clone(),
        Arc::clone(&bot),
        config.forwarding.clone(),
        shutdown_rx.clone(),
    ));
    let pipeline = Arc::new(Pipeline::new(pool.clone(), Arc::clone(&forwarder)));
    let connector: Arc<dyn SessionConnector> = Arc::new(DetachedConnector);
    let supervisor = Arc::new(Supervisor::new(
        pool.clone(),
        Arc::clone(&pipeline),
        connector,
        shutdown_rx.clone(),
    ));
    let health = Arc::new(HealthMonitor::new(
        Arc::clone(&supervisor),
        shutdown_rx.clone(),
    ));
    health.start();

    let state = Arc::new(AppState {
        conn: pool,
        config: config.clone(),
        tokens,
        bot: Arc::clone(&bot),
        forwarder,
        pipeline,
        supervisor: Arc::clone(&supervisor),
        health,
    });

    if bot.is_configured() {
        match bot.get_me().await {
            Ok(me) => info!(
                "Bot connected: @{}",
                me.get("username").and_then(|v| v.as_str()).unwrap_or("?")
            ),
            Err(e) => warn!("Bot connectivity check failed: {e}"),
        }
    } else {
        warn!("TELEGRAM_BOT_TOKEN is empty; bot surface disabled");
    }

    if let Some(base) = &config.telegram.webhook_public_url {
        let url = format!(
            "{}/api/telegram/webhook/{}",
            base.trim_end_matches('/'),
            config.telegram.webhook_secret
        );
        if let Err(e) = bot.set_webhook(&url).await {
            warn!("Webhook registration failed: {e}");
        }
    }

    supervisor.resume().await;
    for tenant in active_tenants(&state) {
        if let Err(e) = balancer::rebalance_tenant(&state, tenant).await {
            error!("Startup rebalance for tenant {tenant} failed: {e}");
        }
    }

    let app = axum::Router::new()
        .nest("/api", telewatch::api_router::configure_api_routes())
        .layer(CorsLayer::permissive())
        .with_state(Arc::clone(&state));
    let app = tower_http::normalize_path::NormalizePathLayer::trim_trailing_slash().layer(app);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("telewatch {} listening on {addr}", env!("CARGO_PKG_VERSION"));

    axum::serve(listener, tower::make::Shared::new(app))
        .with_graceful_shutdown(shutdown_signal(shutdown_tx))
        .await?;

    info!("Draining receivers and in-flight deliveries...");
    supervisor.stop_all().await;
    tokio::time::sleep(DRAIN_GRACE).await;
    info!("Shutdown complete");
    Ok(())
}

/// Assignment caches are rebuilt on every boot; the store only remembers
/// which accounts are supposed to be active.
fn active_tenants(state: &Arc<AppState>) -> Vec<Uuid> {
    use diesel::prelude::*;
    use telewatch::shared::models::schema::accounts::dsl::*;
    use telewatch::shared::models::AccountStatus;

    match state.conn.get() {
        Ok(mut conn) => accounts
            .filter(status.eq(AccountStatus::Active.as_str()))
            .select(tenant_id)
            .distinct()
            .load(&mut conn)
            .unwrap_or_default(),
        Err(e) => {
            error!("Tenant scan skipped: {e}");
            Vec::new()
        }
    }
}

async fn shutdown_signal(shutdown_tx: watch::Sender<bool>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {e}");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {e}");
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown...");
        }
    }

    let _ = shutdown_tx.send(true);
}
