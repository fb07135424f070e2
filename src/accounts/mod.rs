use axum::extract::{Json, Multipart, Path, State};
use axum::routing::{delete, get, post};
use axum::Router;
use chrono::Utc;
use diesel::prelude::*;
use log::{error, info, warn};
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::AuthContext;
use crate::monitor::balancer;
use crate::shared::error::{AppError, AppResult};
use crate::shared::models::{Account, AccountStatus};
use crate::shared::state::AppState;

pub mod artifacts;

use artifacts::{classify_upload, parse_metadata, ArtifactKind, ArtifactStore};

const UPLOAD_BODY_LIMIT: usize = 16 * 1024 * 1024;

pub fn configure() -> Router<Arc<AppState>> {
    Router::new()
        .route("/accounts", get(list_accounts))
        .route(
            "/accounts/upload",
            post(upload_account).layer(axum::extract::DefaultBodyLimit::max(UPLOAD_BODY_LIMIT)),
        )
        .route("/accounts/:id/activate", post(activate_account))
        .route("/accounts/:id/deactivate", post(deactivate_account))
        .route("/accounts/:id", delete(delete_account))
}

pub async fn list_accounts(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
) -> AppResult<Json<Vec<Account>>> {
    use crate::shared::models::schema::accounts::dsl::*;
    let mut conn = state.conn.get()?;
    let rows = accounts
        .filter(tenant_id.eq(ctx.tenant_id))
        .order(created_at.desc())
        .load::<Account>(&mut conn)?;
    Ok(Json(rows))
}

/// Single multipart operation carrying exactly one `.session` artifact
/// and one `.json` metadata artifact.
pub async fn upload_account(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    mut multipart: Multipart,
) -> AppResult<Json<Account>> {
    ctx.require_admin()?;

    let mut session: Option<(String, Vec<u8>)> = None;
    let mut metadata: Option<Vec<u8>> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("malformed multipart body: {e}")))?
    {
        let Some(file_name) = field.file_name().map(ToString::to_string) else {
            continue;
        };
        let kind = classify_upload(&file_name).ok_or_else(|| {
            AppError::ArtifactInvalid(format!(
                "unsupported file {file_name:?}; expected .session and .json"
            ))
        })?;
        let data = field
            .bytes()
            .await
            .map_err(|e| AppError::Validation(format!("upload read failed: {e}")))?
            .to_vec();

        match kind {
            ArtifactKind::Session => {
                if session.replace((file_name, data)).is_some() {
                    return Err(AppError::ArtifactInvalid(
                        "exactly one .session file expected".into(),
                    ));
                }
            }
            ArtifactKind::Metadata => {
                if metadata.replace(data).is_some() {
                    return Err(AppError::ArtifactInvalid(
                        "exactly one .json file expected".into(),
                    ));
                }
            }
        }
    }

    let (session_name, session_bytes) = session
        .ok_or_else(|| AppError::ArtifactInvalid("missing .session artifact".into()))?;
    let metadata_bytes =
        metadata.ok_or_else(|| AppError::ArtifactInvalid("missing .json artifact".into()))?;
    let meta = parse_metadata(&metadata_bytes)?;

    let store = ArtifactStore::new(&state.config.artifacts.root);
    let stored = store
        .store(ctx.tenant_id, &session_bytes, &metadata_bytes)
        .await?;

    let account_name = std::path::Path::new(&session_name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| session_name.clone());

    let account = Account {
        id: Uuid::new_v4(),
        tenant_id: ctx.tenant_id,
        name: account_name,
        session_path: stored.session_path,
        metadata_path: stored.metadata_path,
        phone_number: meta.phone_number,
        username: meta.username,
        first_name: meta.first_name,
        last_name: meta.last_name,
        status: AccountStatus::Pending.as_str().to_string(),
        last_error: None,
        assigned_group_ids: Vec::new(),
        created_at: Utc::now(),
        last_activity: None,
    };

    {
        use crate::shared::models::schema::accounts::dsl::*;
        let mut conn = state.conn.get()?;
        diesel::insert_into(accounts).values(&account).execute(&mut conn)?;
    }

    info!(
        "Tenant {}: account {} uploaded ({})",
        ctx.tenant_id, account.id, account.name
    );
    Ok(Json(account))
}

fn load_account(
    state: &Arc<AppState>,
    tenant: Uuid,
    account_id: Uuid,
) -> AppResult<Account> {
    use crate::shared::models::schema::accounts::dsl::*;
    let mut conn = state.conn.get()?;
    accounts
        .filter(id.eq(account_id))
        .filter(tenant_id.eq(tenant))
        .first(&mut conn)
        .optional()?
        .ok_or_else(|| AppError::NotFound("account not found".into()))
}

/// `pending`/`inactive`/`error` → `active` when the supervisor manages to
/// start the receiver, otherwise `error` with `last_error` populated.
pub async fn activate_account(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    Path(account_uuid): Path<Uuid>,
) -> AppResult<Json<Account>> {
    ctx.require_admin()?;

    let account = load_account(&state, ctx.tenant_id, account_uuid)?;

    use crate::shared::models::schema::accounts::dsl::*;
    match state.supervisor.start_account(&account).await {
        Ok(()) => {
            {
                let mut conn = state.conn.get()?;
                diesel::update(accounts.filter(id.eq(account.id)))
                    .set((
                        status.eq(AccountStatus::Active.as_str()),
                        last_error.eq(None::<String>),
                    ))
                    .execute(&mut conn)?;
            }
            info!("Tenant {}: account {} activated", ctx.tenant_id, account.id);

            if let Err(e) = balancer::rebalance_tenant(&state, ctx.tenant_id).await {
                error!("Rebalance after activation failed: {e}");
            }
        }
        Err(e) => {
            warn!(
                "Tenant {}: account {} failed to start: {e}",
                ctx.tenant_id, account.id
            );
            let mut conn = state.conn.get()?;
            diesel::update(accounts.filter(id.eq(account.id)))
                .set((
                    status.eq(AccountStatus::Error.as_str()),
                    last_error.eq(Some(e.to_string())),
                ))
                .execute(&mut conn)?;
        }
    }

    let updated = load_account(&state, ctx.tenant_id, account_uuid)?;
    Ok(Json(updated))
}

pub async fn deactivate_account(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    Path(account_uuid): Path<Uuid>,
) -> AppResult<Json<Account>> {
    ctx.require_admin()?;

    let account = load_account(&state, ctx.tenant_id, account_uuid)?;
    state.supervisor.stop_account(account.id).await;

    {
        use crate::shared::models::schema::accounts::dsl::*;
        let mut conn = state.conn.get()?;
        diesel::update(accounts.filter(id.eq(account.id)))
            .set((
                status.eq(AccountStatus::Inactive.as_str()),
                assigned_group_ids.eq(Vec::<Uuid>::new()),
            ))
            .execute(&mut conn)?;
    }

    info!("Tenant {}: account {} deactivated", ctx.tenant_id, account.id);

    if let Err(e) = balancer::rebalance_tenant(&state, ctx.tenant_id).await {
        error!("Rebalance after deactivation failed: {e}");
    }

    let updated = load_account(&state, ctx.tenant_id, account_uuid)?;
    Ok(Json(updated))
}

/// Removes the receiver, both artifacts, and the record.
pub async fn delete_account(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    Path(account_uuid): Path<Uuid>,
) -> AppResult<Json<serde_json::Value>> {
    ctx.require_admin()?;

    let account = load_account(&state, ctx.tenant_id, account_uuid)?;
    state.supervisor.stop_account(account.id).await;

    let store = ArtifactStore::new(&state.config.artifacts.root);
    store.remove(&account.session_path, &account.metadata_path).await;

    {
        use crate::shared::models::schema::accounts::dsl::*;
        let mut conn = state.conn.get()?;
        diesel::delete(accounts.filter(id.eq(account.id))).execute(&mut conn)?;
    }

    info!("Tenant {}: account {} deleted", ctx.tenant_id, account.id);

    if let Err(e) = balancer::rebalance_tenant(&state, ctx.tenant_id).await {
        error!("Rebalance after account delete failed: {e}");
    }

    Ok(Json(serde_json::json!({ "message": "Account deleted" })))
}
