use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{Duration, Utc};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use muse_db::invitations::IssueOutcome;
use muse_db::models::{InvitationRow, NewInvitation};
use muse_types::api::InviteRequest;
use muse_types::models::{InvitationStatus, Role};

use crate::auth::AppState;
use crate::error::ApiError;
use crate::mail;
use crate::middleware::CurrentUser;
use crate::validation::{generate_invitation_code, normalize_email, normalize_invitation_code};
use crate::views;

/// Invitations stay valid for a week.
pub const INVITATION_TTL_DAYS: i64 = 7;

/// Fresh codes tried before giving up on a collision streak.
const CODE_ATTEMPTS: usize = 8;

/// Issue an invitation from `sender` to `email`.
///
/// Models are held to the sender quota; admins are not. Visitors cannot invite.
pub async fn issue(state: &AppState, sender: &CurrentUser, email: &str) -> Result<InvitationRow, ApiError> {
    sender.require_role(&[Role::Model, Role::Admin, Role::Superadmin])?;
    let email = normalize_email(email)?;
    let enforce_quota = !sender.role.is_privileged();

    for _ in 0..CODE_ATTEMPTS {
        let now = Utc::now();
        let id = Uuid::new_v4().to_string();
        let code = generate_invitation_code();
        let expires_at = muse_db::to_db_time(now + Duration::days(INVITATION_TTL_DAYS));
        let sender_id = sender.id.to_string();
        let to = email.clone();

        let outcome = state
            .with_db(move |db| {
                db.create_invitation(
                    &NewInvitation {
                        id: &id,
                        code: &code,
                        email: &to,
                        sender_id: &sender_id,
                        expires_at: &expires_at,
                    },
                    enforce_quota,
                    &muse_db::to_db_time(now),
                )
            })
            .await?;

        match outcome {
            IssueOutcome::Issued(invitation) => {
                info!("{} invited {} ({})", sender.username, invitation.email, invitation.code);
                let expires = muse_db::parse_db_time(&invitation.expires_at)
                    .map(|t| t.format("%B %-d, %Y %H:%M UTC").to_string())
                    .unwrap_or_else(|_| invitation.expires_at.clone());
                state
                    .notify(mail::templates::invitation(
                        &invitation.email,
                        &sender.name,
                        &invitation.code,
                        &state.config.frontend_url,
                        &expires,
                    ))
                    .await;
                return Ok(invitation);
            }
            IssueOutcome::EmailRegistered => {
                return Err(ApiError::Conflict("A user with this email already exists".into()));
            }
            IssueOutcome::AlreadyInvited => {
                return Err(ApiError::Conflict("An invitation has already been sent to this email".into()));
            }
            IssueOutcome::QuotaExceeded => {
                return Err(ApiError::Conflict(format!(
                    "You can only have {} active or accepted invitations",
                    muse_db::invitations::INVITATION_QUOTA
                )));
            }
            IssueOutcome::CodeTaken => {
                warn!("Invitation code collision, retrying");
            }
        }
    }

    Err(ApiError::Internal(anyhow::anyhow!(
        "no unique invitation code after {} attempts",
        CODE_ATTEMPTS
    )))
}

/// Check that `code` is a live invitation for `email`.
pub async fn verify(state: &AppState, code: &str, email: &str) -> Result<InvitationRow, ApiError> {
    let code = normalize_invitation_code(code);
    let email = normalize_email(email)?;

    let invitation = state
        .with_db(move |db| db.get_invitation_by_code_and_email(&code, &email))
        .await?
        .ok_or_else(|| ApiError::NotFound("Invalid invitation code".into()))?;

    match views::effective_status(&invitation, Utc::now())? {
        InvitationStatus::Pending => Ok(invitation),
        InvitationStatus::Accepted => Err(ApiError::Conflict("Invitation has already been used".into())),
        InvitationStatus::Expired => Err(ApiError::Expired("Invitation has expired".into())),
    }
}

/// POST /auth/invite
pub async fn invite(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Json(req): Json<InviteRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let invitation = issue(&state, &current, &req.email).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": "Invitation sent successfully",
            "invitation": views::invitation(&invitation, Utc::now())?,
        })),
    ))
}

/// GET /auth/invitations
pub async fn list_mine(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
) -> Result<impl IntoResponse, ApiError> {
    let sender_id = current.id.to_string();
    let rows = state
        .with_db(move |db| db.list_invitations_by_sender(&sender_id))
        .await?;
    let now = Utc::now();
    let invitations = rows
        .iter()
        .map(|row| views::invitation(row, now))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(json!({ "success": true, "invitations": invitations })))
}

/// GET /auth/check_invitation/{email}/{code}
pub async fn check_invitation(
    State(state): State<AppState>,
    Path((email, code)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let invitation = verify(&state, &code, &email).await?;
    Ok(Json(json!({
        "success": true,
        "message": "Invitation is valid",
        "invitation": views::invitation(&invitation, Utc::now())?,
    })))
}
