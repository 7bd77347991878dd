use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

use muse_types::models::Role;

use crate::auth::{AppState, decode_token};
use crate::error::ApiError;

/// The authenticated caller, loaded fresh from the store on every request so
/// role changes and deleted accounts take effect immediately.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub id: Uuid,
    pub name: String,
    pub username: String,
    pub email: String,
    pub role: Role,
}

impl CurrentUser {
    /// Reject unless the caller's role is one of `allowed`.
    pub fn require_role(&self, allowed: &[Role]) -> Result<(), ApiError> {
        if self.role.is_one_of(allowed) {
            Ok(())
        } else {
            Err(ApiError::Forbidden("You do not have permission to perform this action".into()))
        }
    }

    /// Owner of `owner_id`, or an admin.
    pub fn may_manage(&self, owner_id: Uuid) -> bool {
        self.id == owner_id || self.role.is_privileged()
    }
}

/// Caller on routes where authentication is optional.
#[derive(Debug, Clone)]
pub struct Viewer(pub Option<CurrentUser>);

/// Extract and validate JWT from Authorization header.
pub async fn require_auth(State(state): State<AppState>, mut req: Request, next: Next) -> Result<Response, ApiError> {
    let token = bearer_token(&req).ok_or_else(|| ApiError::Unauthorized("No token, authorization denied".into()))?;
    let user = resolve_user(&state, &token).await?;
    req.extensions_mut().insert(user);
    Ok(next.run(req).await)
}

/// Like [`require_auth`], but anonymous or invalid credentials continue as
/// an anonymous [`Viewer`].
pub async fn optional_auth(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let user = match bearer_token(&req) {
        Some(token) => resolve_user(&state, &token).await.ok(),
        None => None,
    };
    req.extensions_mut().insert(Viewer(user));
    next.run(req).await
}

/// Admin and superadmin only. Must run after [`require_auth`].
pub async fn require_admin(req: Request, next: Next) -> Result<Response, ApiError> {
    let user = req
        .extensions()
        .get::<CurrentUser>()
        .ok_or_else(|| ApiError::Unauthorized("No token, authorization denied".into()))?;
    user.require_role(&[Role::Admin, Role::Superadmin])?;
    Ok(next.run(req).await)
}

fn bearer_token(req: &Request) -> Option<String> {
    req.headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string())
}

/// Resolve a bearer token to a live account.
pub async fn resolve_user(state: &AppState, token: &str) -> Result<CurrentUser, ApiError> {
    let claims = decode_token(&state.config.jwt_secret, token)?;
    let id = claims.sub.to_string();
    let row = state
        .with_db(move |db| db.get_user_by_id(&id))
        .await?
        .ok_or_else(|| ApiError::Unauthorized("Token is not valid".into()))?;
    let role = row
        .role
        .parse::<Role>()
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("user {}: {}", row.id, e)))?;
    Ok(CurrentUser {
        id: claims.sub,
        name: row.name,
        username: row.username,
        email: row.email,
        role,
    })
}
