//! `/admin/*` handlers. Routed behind `require_auth` + `require_admin`.

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use muse_types::api::{CreateVisitorRequest, InviteRequest, PhotoListResponse, Statistics};
use muse_types::models::Role;

use crate::auth::{AppState, provision_visitor_account};
use crate::error::ApiError;
use crate::middleware::CurrentUser;
use crate::photos::{PageQuery, load_model, total_pages};
use crate::validation::{normalize_email, validate_name};
use crate::{invitations, views};

pub async fn list_models(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let rows = state
        .with_db(|db| db.list_users_by_role(Role::Model.as_str()))
        .await?;
    let models = rows
        .iter()
        .map(|row| {
            Ok(json!({
                "user": views::user_summary(row)?,
                "details": views::profile_details(row),
                "created_at": views::parse_time(&row.created_at)?,
            }))
        })
        .collect::<Result<Vec<_>, ApiError>>()?;
    Ok(Json(json!({ "success": true, "count": models.len(), "models": models })))
}

/// Delete a model with every photo, grant and stored asset.
pub async fn delete_model(
    State(state): State<AppState>,
    Path(model_id): Path<Uuid>,
    Extension(current): Extension<CurrentUser>,
) -> Result<impl IntoResponse, ApiError> {
    let id = model_id.to_string();
    let removed = state
        .with_db(move |db| db.delete_model(&id))
        .await?
        .ok_or_else(|| ApiError::NotFound("Model not found".into()))?;

    if let Some(key) = &removed.profile_photo {
        state.storage.delete(key).await;
    }
    for photo in &removed.photos {
        state.storage.delete(&photo.original_key).await;
        state.storage.delete(&photo.blurred_key).await;
    }
    info!(
        "{} deleted model {} and {} photos",
        current.username,
        model_id,
        removed.photos.len()
    );

    Ok(Json(json!({ "success": true, "message": "Model deleted successfully" })))
}

pub async fn list_model_photos(
    State(state): State<AppState>,
    Path(model_id): Path<Uuid>,
    Query(query): Query<PageQuery>,
) -> Result<impl IntoResponse, ApiError> {
    load_model(&state, model_id).await?;
    let (page, limit, offset) = query.bounds();
    let mid = model_id.to_string();
    let (rows, total) = state
        .with_db(move |db| db.list_photos_by_model(&mid, false, offset, limit))
        .await?;
    let photos = rows
        .iter()
        .map(|row| views::photo(row, true))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Json(PhotoListResponse {
        success: true,
        photos,
        page,
        limit,
        total,
        total_pages: total_pages(total, limit),
    }))
}

pub async fn list_visitors(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let rows = state
        .with_db(|db| db.list_users_by_role(Role::Visitor.as_str()))
        .await?;
    let visitors = rows.iter().map(views::user_summary).collect::<Result<Vec<_>, _>>()?;
    Ok(Json(json!({ "success": true, "count": visitors.len(), "visitors": visitors })))
}

/// Create a visitor with generated credentials and mail them.
pub async fn create_visitor(
    State(state): State<AppState>,
    Json(req): Json<CreateVisitorRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let name = req.name.trim().to_string();
    validate_name(&name)?;
    let email = normalize_email(&req.email)?;

    let visitor = provision_visitor_account(&state, Some(&name), &email)
        .await?
        .ok_or_else(|| ApiError::Conflict("Email is already registered".into()))?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": "Visitor created successfully",
            "visitor": views::user_summary(&visitor)?,
        })),
    ))
}

pub async fn delete_visitor(
    State(state): State<AppState>,
    Path(visitor_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let id = visitor_id.to_string();
    let deleted = state
        .with_db(move |db| match db.get_user_by_id(&id)? {
            Some(user) if user.role == Role::Visitor.as_str() => db.delete_user(&id),
            _ => Ok(false),
        })
        .await?;
    if !deleted {
        return Err(ApiError::NotFound("Visitor not found".into()));
    }
    Ok(Json(json!({ "success": true, "message": "Visitor deleted successfully" })))
}

/// Admin-issued invitations are exempt from the sender quota.
pub async fn create_invitation(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Json(req): Json<InviteRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let invitation = invitations::issue(&state, &current, &req.email).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": "Invitation sent successfully",
            "invitation": views::invitation(&invitation, Utc::now())?,
        })),
    ))
}

pub async fn list_invitations(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let rows = state.with_db(|db| db.list_all_invitations()).await?;
    let now = Utc::now();
    let invitations = rows
        .iter()
        .map(|row| views::invitation(row, now))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(json!({ "success": true, "count": invitations.len(), "invitations": invitations })))
}

pub async fn delete_invitation(
    State(state): State<AppState>,
    Path(invitation_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let id = invitation_id.to_string();
    if !state.with_db(move |db| db.delete_invitation(&id)).await? {
        return Err(ApiError::NotFound("Invitation not found".into()));
    }
    Ok(Json(json!({ "success": true, "message": "Invitation deleted successfully" })))
}

pub async fn list_donations(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let rows = state.with_db(|db| db.list_donations()).await?;
    let donations = rows.iter().map(views::donation).collect::<Result<Vec<_>, _>>()?;
    Ok(Json(json!({ "success": true, "count": donations.len(), "donations": donations })))
}

pub async fn statistics(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let now = muse_db::to_db_time(Utc::now());
    let stats = state
        .with_db(move |db| {
            let invitations = db.count_invitations(&now)?;
            let totals = db.donation_totals()?;
            Ok(Statistics {
                models: db.count_users_by_role(Role::Model.as_str())?,
                visitors: db.count_users_by_role(Role::Visitor.as_str())?,
                invitations_pending: invitations.pending,
                invitations_accepted: invitations.accepted,
                invitations_expired: invitations.expired,
                donations_succeeded: totals.succeeded,
                donations_total_amount: totals.total_amount,
                unlock_grants: totals.grants,
            })
        })
        .await?;
    Ok(Json(json!({ "success": true, "statistics": stats })))
}
