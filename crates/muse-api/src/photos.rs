use std::collections::HashSet;

use axum::{
    Extension, Json,
    body::Bytes,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::IntoResponse,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use muse_db::models::{NewPhoto, PhotoRow};
use muse_db::photos::PhotoChanges;
use muse_types::api::{PhotoListResponse, PhotoView, UpdatePhotoRequest};
use muse_types::models::{PLATFORM_DONATION, Role};

use crate::auth::AppState;
use crate::error::ApiError;
use crate::middleware::{CurrentUser, Viewer};
use crate::views;

pub const DEFAULT_PAGE_SIZE: u32 = 12;
pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Name filter, models listing only.
    #[serde(default)]
    pub q: String,
}

fn default_page() -> u32 {
    1
}

fn default_limit() -> u32 {
    DEFAULT_PAGE_SIZE
}

impl PageQuery {
    /// (page, limit, offset) with page >= 1 and limit clamped.
    pub fn bounds(&self) -> (u32, u32, u32) {
        let page = self.page.max(1);
        let limit = self.limit.clamp(1, MAX_PAGE_SIZE);
        (page, limit, (page - 1).saturating_mul(limit))
    }
}

pub fn total_pages(total: u64, limit: u32) -> u64 {
    total.div_ceil(u64::from(limit.max(1)))
}

#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_price")]
    pub price: u32,
}

fn default_price() -> u32 {
    PLATFORM_DONATION
}

/// The model account behind `/models/{id}`, or 404.
pub(crate) async fn load_model(state: &AppState, model_id: Uuid) -> Result<muse_db::models::UserRow, ApiError> {
    let id = model_id.to_string();
    state
        .with_db(move |db| db.get_user_by_id(&id))
        .await?
        .filter(|u| u.role == Role::Model.as_str())
        .ok_or_else(|| ApiError::NotFound("Model not found".into()))
}

async fn load_photo(state: &AppState, model_id: Uuid, photo_id: Uuid) -> Result<PhotoRow, ApiError> {
    let id = photo_id.to_string();
    state
        .with_db(move |db| db.get_photo(&id))
        .await?
        .filter(|p| p.model_id == model_id.to_string())
        .ok_or_else(|| ApiError::NotFound("Photo not found".into()))
}

fn require_manager(current: &CurrentUser, model_id: Uuid) -> Result<(), ApiError> {
    if current.may_manage(model_id) {
        Ok(())
    } else {
        Err(ApiError::Forbidden("Not authorized to manage this model's photos".into()))
    }
}

/// Project photos for a viewer: the owning model and admins always see
/// originals, donors see the ones they unlocked, everyone else sees previews.
pub(crate) async fn project(
    state: &AppState,
    viewer: Option<&CurrentUser>,
    model_id: Uuid,
    rows: &[PhotoRow],
) -> Result<Vec<PhotoView>, ApiError> {
    let manager = viewer.is_some_and(|v| v.may_manage(model_id));
    let unlocked: HashSet<String> = match viewer {
        Some(v) if !manager && !rows.is_empty() => {
            let email = v.email.clone();
            state
                .with_db(move |db| db.list_unlocked_photos(&email, &muse_db::to_db_time(Utc::now())))
                .await?
                .into_iter()
                .map(|p| p.id)
                .collect()
        }
        _ => HashSet::new(),
    };
    rows.iter()
        .map(|row| views::photo(row, manager || unlocked.contains(&row.id)))
        .collect()
}

/// POST /models/{id}/photos
pub async fn upload_photo(
    State(state): State<AppState>,
    Path(model_id): Path<Uuid>,
    Query(query): Query<UploadQuery>,
    Extension(current): Extension<CurrentUser>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    require_manager(&current, model_id)?;
    load_model(&state, model_id).await?;

    let title = query.title.trim().to_string();
    if title.is_empty() {
        return Err(ApiError::Validation("Title is required".into()));
    }
    if query.price == 0 {
        return Err(ApiError::Validation("Price must be greater than zero".into()));
    }

    let stored = state.storage.save_photo(body.to_vec()).await?;

    let id = Uuid::new_v4().to_string();
    let (mid, original, blurred) = (model_id.to_string(), stored.original_key.clone(), stored.blurred_key.clone());
    let description = query.description.trim().to_string();
    let price = query.price;
    let inserted = state
        .with_db(move |db| {
            db.insert_photo(
                &NewPhoto {
                    id: &id,
                    model_id: &mid,
                    title: &title,
                    description: &description,
                    original_key: &original,
                    blurred_key: &blurred,
                    price,
                },
                &muse_db::to_db_time(Utc::now()),
            )
        })
        .await;
    let photo = match inserted {
        Ok(photo) => photo,
        Err(e) => {
            state.storage.delete(&stored.original_key).await;
            state.storage.delete(&stored.blurred_key).await;
            return Err(e);
        }
    };
    info!("{} uploaded photo {} for model {}", current.username, photo.id, model_id);

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": "Photo uploaded successfully",
            "photo": views::photo(&photo, true)?,
        })),
    ))
}

/// GET /models/{id}/photos
pub async fn list_photos(
    State(state): State<AppState>,
    Path(model_id): Path<Uuid>,
    Query(query): Query<PageQuery>,
    Extension(Viewer(viewer)): Extension<Viewer>,
) -> Result<impl IntoResponse, ApiError> {
    load_model(&state, model_id).await?;
    let (page, limit, offset) = query.bounds();
    let active_only = !viewer.as_ref().is_some_and(|v| v.may_manage(model_id));

    let mid = model_id.to_string();
    let (rows, total) = state
        .with_db(move |db| db.list_photos_by_model(&mid, active_only, offset, limit))
        .await?;
    let photos = project(&state, viewer.as_ref(), model_id, &rows).await?;

    Ok(Json(PhotoListResponse {
        success: true,
        photos,
        page,
        limit,
        total,
        total_pages: total_pages(total, limit),
    }))
}

/// GET /models/{id}/photos/{photo_id}
pub async fn get_photo(
    State(state): State<AppState>,
    Path((model_id, photo_id)): Path<(Uuid, Uuid)>,
    Extension(Viewer(viewer)): Extension<Viewer>,
) -> Result<impl IntoResponse, ApiError> {
    let photo = load_photo(&state, model_id, photo_id).await?;
    if !photo.is_active && !viewer.as_ref().is_some_and(|v| v.may_manage(model_id)) {
        return Err(ApiError::NotFound("Photo not found".into()));
    }
    let mut projected = project(&state, viewer.as_ref(), model_id, std::slice::from_ref(&photo)).await?;
    Ok(Json(json!({ "success": true, "photo": projected.pop() })))
}

/// PUT /models/{id}/photos/{photo_id}
pub async fn update_photo(
    State(state): State<AppState>,
    Path((model_id, photo_id)): Path<(Uuid, Uuid)>,
    Extension(current): Extension<CurrentUser>,
    Json(req): Json<UpdatePhotoRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_manager(&current, model_id)?;
    load_photo(&state, model_id, photo_id).await?;

    let title = req.title.map(|t| t.trim().to_string());
    if title.as_deref().is_some_and(str::is_empty) {
        return Err(ApiError::Validation("Title cannot be empty".into()));
    }
    if req.price == Some(0) {
        return Err(ApiError::Validation("Price must be greater than zero".into()));
    }

    let id = photo_id.to_string();
    let description = req.description;
    let (price, is_active) = (req.price, req.is_active);
    let photo = state
        .with_db(move |db| {
            db.update_photo(
                &id,
                &PhotoChanges {
                    title: title.as_deref(),
                    description: description.as_deref(),
                    price,
                    is_active,
                },
            )
        })
        .await?
        .ok_or_else(|| ApiError::NotFound("Photo not found".into()))?;

    Ok(Json(json!({
        "success": true,
        "message": "Photo updated successfully",
        "photo": views::photo(&photo, true)?,
    })))
}

/// DELETE /models/{id}/photos/{photo_id}
pub async fn delete_photo(
    State(state): State<AppState>,
    Path((model_id, photo_id)): Path<(Uuid, Uuid)>,
    Extension(current): Extension<CurrentUser>,
) -> Result<impl IntoResponse, ApiError> {
    require_manager(&current, model_id)?;
    load_photo(&state, model_id, photo_id).await?;

    let id = photo_id.to_string();
    let removed = state
        .with_db(move |db| db.delete_photo(&id))
        .await?
        .ok_or_else(|| ApiError::NotFound("Photo not found".into()))?;

    state.storage.delete(&removed.original_key).await;
    state.storage.delete(&removed.blurred_key).await;
    info!("{} deleted photo {}", current.username, photo_id);

    Ok(Json(json!({ "success": true, "message": "Photo deleted successfully" })))
}

/// GET /photos/{photo_id}/original
pub async fn get_original(
    State(state): State<AppState>,
    Path(photo_id): Path<Uuid>,
    Extension(current): Extension<CurrentUser>,
) -> Result<impl IntoResponse, ApiError> {
    let id = photo_id.to_string();
    let email = current.email.clone();
    let (photo, unlocked) = state
        .with_db(move |db| {
            let Some(photo) = db.get_photo(&id)? else {
                return Ok(None);
            };
            let unlocked = db.photo_unlocked_for(&email, &id, &muse_db::to_db_time(Utc::now()))?;
            Ok(Some((photo, unlocked)))
        })
        .await?
        .ok_or_else(|| ApiError::NotFound("Photo not found".into()))?;

    let owner = views::parse_id(&photo.model_id)?;
    if !current.may_manage(owner) && !(photo.is_active && unlocked) {
        return Err(ApiError::Forbidden("Donate to unlock this photo".into()));
    }

    let bytes = state.storage.read(&photo.original_key).await?;
    let content_type = match photo.original_key.rsplit('.').next() {
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        _ => "image/jpeg",
    };
    Ok(([(header::CONTENT_TYPE, content_type)], bytes))
}

/// GET /visitors/me/unlocked-photos
pub async fn my_unlocked_photos(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
) -> Result<impl IntoResponse, ApiError> {
    let email = current.email.clone();
    let rows = state
        .with_db(move |db| db.list_unlocked_photos(&email, &muse_db::to_db_time(Utc::now())))
        .await?;
    let photos = rows
        .iter()
        .map(|row| views::photo(row, true))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(json!({ "success": true, "count": photos.len(), "photos": photos })))
}
