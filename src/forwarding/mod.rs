use axum::routing::get;
use axum::Router;
use std::sync::Arc;

use crate::shared::state::AppState;

pub mod engine;
pub mod handlers;

pub use engine::{ForwardRequest, Forwarder};

pub fn configure() -> Router<Arc<AppState>> {
    Router::new().route("/forwarded-messages", get(handlers::list_forwarded))
}
