//! Combines every module's routes into the `/api` surface.

use axum::Router;
use std::sync::Arc;

use crate::shared::state::AppState;

pub fn configure_api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .merge(crate::auth::configure())
        .merge(crate::directory::configure())
        .merge(crate::groups::configure())
        .merge(crate::watchlist::configure())
        .merge(crate::destinations::configure())
        .merge(crate::messages::configure())
        .merge(crate::accounts::configure())
        .merge(crate::forwarding::configure())
        .merge(crate::analytics::configure())
        .merge(crate::telegram::configure())
}
