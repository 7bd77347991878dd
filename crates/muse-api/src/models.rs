use axum::{
    Extension, Json,
    body::Bytes,
    extract::{Path, Query, State},
    response::IntoResponse,
};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use muse_db::models::ProfileFields;
use muse_types::api::{ModelListResponse, ModelProfile, UpdatePasswordRequest, UpdateProfileRequest};

use crate::auth::{AppState, hash_password};
use crate::error::ApiError;
use crate::middleware::{CurrentUser, Viewer};
use crate::photos::{PageQuery, load_model, project, total_pages};
use crate::validation::{validate_name, validate_password};
use crate::views;

/// Photos shown on a profile page.
const PROFILE_PHOTO_LIMIT: u32 = 100;

fn require_manager(current: &CurrentUser, model_id: Uuid) -> Result<(), ApiError> {
    if current.may_manage(model_id) {
        Ok(())
    } else {
        Err(ApiError::Forbidden("Not authorized to update this profile".into()))
    }
}

/// GET /models
pub async fn list_models(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let (page, limit, offset) = query.bounds();
    let search = query.q.trim().to_string();
    let (rows, total) = state
        .with_db(move |db| db.list_models_page(&search, offset, limit))
        .await?;
    let models = rows.iter().map(views::model_summary).collect::<Result<Vec<_>, _>>()?;

    Ok(Json(ModelListResponse {
        success: true,
        models,
        page,
        limit,
        total_pages: total_pages(total, limit),
        total_models: total,
    }))
}

/// GET /models/{id}
pub async fn get_model(
    State(state): State<AppState>,
    Path(model_id): Path<Uuid>,
    Extension(Viewer(viewer)): Extension<Viewer>,
) -> Result<impl IntoResponse, ApiError> {
    let model = load_model(&state, model_id).await?;
    let active_only = !viewer.as_ref().is_some_and(|v| v.may_manage(model_id));

    let mid = model.id.clone();
    let (rows, _) = state
        .with_db(move |db| db.list_photos_by_model(&mid, active_only, 0, PROFILE_PHOTO_LIMIT))
        .await?;
    let locked_photos = project(&state, viewer.as_ref(), model_id, &rows).await?;

    Ok(Json(json!({
        "success": true,
        "model": ModelProfile {
            id: model_id,
            name: model.name.clone(),
            username: model.username.clone(),
            email: model.email.clone(),
            profile_photo: model.profile_photo.as_deref().map(views::asset_url),
            details: views::profile_details(&model),
            locked_photos,
        },
    })))
}

/// PUT /models/{id}
pub async fn update_profile(
    State(state): State<AppState>,
    Path(model_id): Path<Uuid>,
    Extension(current): Extension<CurrentUser>,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_manager(&current, model_id)?;
    load_model(&state, model_id).await?;

    let name = req.name.trim().to_string();
    validate_name(&name)?;
    let details = req.details;

    let id = model_id.to_string();
    let updated = state
        .with_db(move |db| {
            db.update_profile(
                &id,
                &ProfileFields {
                    name: &name,
                    bio: &details.bio,
                    quote: &details.quote,
                    site_address: details.site_address.as_deref().filter(|s| !s.trim().is_empty()),
                    age: details.age,
                    zodiac: &details.zodiac,
                    height: details.height,
                    weight: details.weight,
                    eyes: &details.eyes,
                    hair: &details.hair,
                    favorite_book: &details.favorite_book,
                    future_goals: &details.future_goals,
                },
            )
        })
        .await?
        .ok_or_else(|| ApiError::NotFound("Model not found".into()))?;

    Ok(Json(json!({
        "success": true,
        "message": "Profile updated successfully",
        "user": views::user_summary(&updated)?,
        "details": views::profile_details(&updated),
    })))
}

/// POST /models/{id}/profile-photo
pub async fn upload_profile_photo(
    State(state): State<AppState>,
    Path(model_id): Path<Uuid>,
    Extension(current): Extension<CurrentUser>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    require_manager(&current, model_id)?;
    load_model(&state, model_id).await?;

    let key = state.storage.save_profile_photo(body.to_vec()).await?;
    let (id, new_key) = (model_id.to_string(), key.clone());
    let previous = match state.with_db(move |db| db.set_profile_photo(&id, Some(&new_key))).await {
        Ok(previous) => previous,
        Err(e) => {
            state.storage.delete(&key).await;
            return Err(e);
        }
    };
    if let Some(previous) = previous {
        state.storage.delete(&previous).await;
    }
    info!("Profile photo updated for model {}", model_id);

    Ok(Json(json!({
        "success": true,
        "message": "Profile photo updated successfully",
        "profile_photo": views::asset_url(&key),
    })))
}

/// DELETE /models/{id}/profile-photo
pub async fn delete_profile_photo(
    State(state): State<AppState>,
    Path(model_id): Path<Uuid>,
    Extension(current): Extension<CurrentUser>,
) -> Result<impl IntoResponse, ApiError> {
    require_manager(&current, model_id)?;
    load_model(&state, model_id).await?;

    let id = model_id.to_string();
    let previous = state.with_db(move |db| db.set_profile_photo(&id, None)).await?;
    if let Some(previous) = previous {
        state.storage.delete(&previous).await;
    }

    Ok(Json(json!({ "success": true, "message": "Profile photo removed" })))
}

/// POST /models/{id}/update-password
pub async fn update_password(
    State(state): State<AppState>,
    Path(model_id): Path<Uuid>,
    Extension(current): Extension<CurrentUser>,
    Json(req): Json<UpdatePasswordRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if current.id != model_id {
        return Err(ApiError::Forbidden("You can only change your own password".into()));
    }
    if req.password != req.confirm_password {
        return Err(ApiError::Validation("Passwords do not match".into()));
    }
    validate_password(&req.password)?;

    let hash = hash_password(&req.password)?;
    let id = model_id.to_string();
    let changed = state.with_db(move |db| db.set_password(&id, &hash)).await?;
    if !changed {
        return Err(ApiError::NotFound("User not found".into()));
    }

    Ok(Json(json!({ "success": true, "message": "Password updated successfully" })))
}
