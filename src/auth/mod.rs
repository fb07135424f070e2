use axum::{
    extract::{Json, State},
    routing::{get, post},
    Router,
};
use chrono::Utc;
use diesel::prelude::*;
use log::info;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::shared::error::{AppError, AppResult};
use crate::shared::models::{Organization, Plan, Role, User};
use crate::shared::state::AppState;

pub mod context;
pub mod telegram_login;
pub mod tokens;

pub use context::AuthContext;

use telegram_login::{verify_login, LoginVerifyError, TelegramLoginPayload};

pub fn configure() -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/telegram", post(telegram))
        .route("/auth/me", get(me))
        .route("/auth/login", post(legacy_login))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
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
    pub organization_name: String,
}

impl RegisterRequest {
    fn login_payload(&self) -> TelegramLoginPayload {
        TelegramLoginPayload {
            id: self.id,
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            username: self.username.clone(),
            photo_url: self.photo_url.clone(),
            auth_date: self.auth_date,
            hash: self.hash.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub access_token: String,
    pub token_type: String,
    pub user: User,
}

fn map_verify_error(err: LoginVerifyError) -> AppError {
    match err {
        LoginVerifyError::BadSignature => AppError::Unauthenticated,
        LoginVerifyError::Expired => AppError::Unauthenticated,
    }
}

/// Atomic creation of an organization plus its owner. Idempotency key is
/// the Telegram account: a second registration with the same id conflicts.
pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RegisterRequest>,
) -> AppResult<Json<AuthResponse>> {
    verify_login(
        &body.login_payload(),
        &state.config.telegram.bot_token,
        Utc::now(),
    )
    .map_err(map_verify_error)?;

    let org_name = body.organization_name.trim().to_string();
    if org_name.is_empty() {
        return Err(AppError::Validation("organization_name is required".into()));
    }

    let mut conn = state.conn.get()?;
    let now = Utc::now();

    let user = conn.transaction::<User, AppError, _>(|conn| {
        use crate::shared::models::schema::organizations::dsl as orgs;
        use crate::shared::models::schema::users::dsl as users;

        let taken: i64 = users::users
            .filter(users::telegram_id.eq(body.id))
            .count()
            .get_result(conn)?;
        if taken > 0 {
            return Err(AppError::Conflict(
                "telegram account already registered".into(),
            ));
        }

        let org = Organization {
            id: Uuid::new_v4(),
            name: org_name,
            description: None,
            plan: Plan::Free.as_str().to_string(),
            created_at: now,
        };
        diesel::insert_into(orgs::organizations)
            .values(&org)
            .execute(conn)?;

        let user = User {
            id: Uuid::new_v4(),
            tenant_id: org.id,
            telegram_id: body.id,
            username: body.username.clone(),
            first_name: body.first_name.clone(),
            last_name: body.last_name.clone(),
            photo_url: body.photo_url.clone(),
            role: Role::Owner.as_str().to_string(),
            is_active: true,
            created_at: now,
            last_login: Some(now),
        };
        diesel::insert_into(users::users).values(&user).execute(conn)?;

        Ok(user)
    })?;

    info!(
        "Registered organization {} with owner telegram_id={}",
        user.tenant_id, user.telegram_id
    );

    let access_token = state
        .tokens
        .issue(user.id, user.tenant_id, Role::Owner)
        .map_err(|e| AppError::Internal(e.to_string()))?;

    Ok(Json(AuthResponse {
        access_token,
        token_type: "bearer".into(),
        user,
    }))
}

pub async fn telegram(
    State(state): State<Arc<AppState>>,
    Json(body): Json<TelegramLoginPayload>,
) -> AppResult<Json<AuthResponse>> {
    verify_login(&body, &state.config.telegram.bot_token, Utc::now()).map_err(map_verify_error)?;

    use crate::shared::models::schema::users::dsl::*;
    let mut conn = state.conn.get()?;

    let user: User = users
        .filter(telegram_id.eq(body.id))
        .filter(is_active.eq(true))
        .first(&mut conn)
        .optional()?
        .ok_or(AppError::Unauthenticated)?;

    let now = Utc::now();
    diesel::update(users.filter(id.eq(user.id)))
        .set((photo_url.eq(body.photo_url.clone()), last_login.eq(Some(now))))
        .execute(&mut conn)?;

    let user_role = Role::parse(&user.role)
        .ok_or_else(|| AppError::Internal(format!("unknown role {:?}", user.role)))?;
    let access_token = state
        .tokens
        .issue(user.id, user.tenant_id, user_role)
        .map_err(|e| AppError::Internal(e.to_string()))?;

    info!("Telegram login for user {} ({})", user.id, user.telegram_id);

    let user = User {
        photo_url: body.photo_url.clone(),
        last_login: Some(now),
        ..user
    };

    Ok(Json(AuthResponse {
        access_token,
        token_type: "bearer".into(),
        user,
    }))
}

pub async fn me(
    State(_state): State<Arc<AppState>>,
    ctx: AuthContext,
) -> AppResult<Json<User>> {
    Ok(Json(ctx.user))
}

/// The email/password flow was retired with the move to Telegram login.
pub async fn legacy_login() -> AppError {
    AppError::Gone
}
