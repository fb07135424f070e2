use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use diesel::prelude::*;
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::tokens::extract_bearer_token;
use crate::shared::error::AppError;
use crate::shared::models::{Role, User};
use crate::shared::state::AppState;

/// Per-request auth context. Every tenant-scoped handler takes one of
/// these; the extractor rejects before the handler body runs.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user: User,
    pub tenant_id: Uuid,
    pub role: Role,
}

impl AuthContext {
    pub fn require_admin(&self) -> Result<(), AppError> {
        if self.role.can_mutate() {
            Ok(())
        } else {
            Err(AppError::Forbidden("admin role required".into()))
        }
    }

    pub fn require_owner(&self) -> Result<(), AppError> {
        if self.role == Role::Owner {
            Ok(())
        } else {
            Err(AppError::Forbidden("owner role required".into()))
        }
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthContext {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or(AppError::Unauthenticated)?;

        let token = extract_bearer_token(header).ok_or(AppError::Unauthenticated)?;
        let claims = state
            .tokens
            .verify(token)
            .map_err(|_| AppError::Unauthenticated)?;

        let user_uuid = claims.user_id().map_err(|_| AppError::Unauthenticated)?;
        let tenant_uuid = claims.tenant().map_err(|_| AppError::Unauthenticated)?;

        // The store is authoritative for role and active flag; the token
        // only names the identity.
        use crate::shared::models::schema::users::dsl::*;
        let mut conn = state.conn.get()?;
        let user: User = users
            .filter(id.eq(user_uuid))
            .filter(tenant_id.eq(tenant_uuid))
            .filter(is_active.eq(true))
            .first(&mut conn)
            .optional()?
            .ok_or(AppError::Unauthenticated)?;

        let parsed_role = Role::parse(&user.role)
            .ok_or_else(|| AppError::Internal(format!("unknown role {:?}", user.role)))?;

        Ok(Self {
            user,
            tenant_id: tenant_uuid,
            role: parsed_role,
        })
    }
}
