use axum::{
    routing::{delete, get, post, put},
    Router,
};
use std::sync::Arc;

use crate::shared::state::AppState;

pub mod organizations;
pub mod users;

pub fn configure() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/organizations/current",
            get(organizations::current).put(organizations::update_current),
        )
        .route("/users", get(users::list_users))
        .route("/users/invite", post(users::invite_user))
        .route("/users/:id/role", put(users::update_role))
        .route("/users/:id", delete(users::deactivate_user))
}
