use std::sync::Arc;

use anyhow::anyhow;
use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use chrono::Utc;
use hmac::{Hmac, Mac};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde_json::json;
use sha2::Sha256;
use tracing::{error, info, warn};
use uuid::Uuid;

use muse_billing::PaymentGateway;
use muse_db::Database;
use muse_db::models::{NewUser, UserRow};
use muse_db::queries::UserInsert;
use muse_gateway::dispatcher::Dispatcher;
use muse_types::api::{AdminRegisterRequest, AuthResponse, Claims, LoginRequest, RegisterRequest};
use muse_types::models::{DonationKind, DonationStatus, Role};

use crate::config::Config;
use crate::error::ApiError;
use crate::mail::{self, Mailer};
use crate::middleware::CurrentUser;
use crate::storage::Storage;
use crate::validation::{
    generate_password, generate_visitor_username, normalize_email, validate_name, validate_password,
    validate_username,
};
use crate::{invitations, views};

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub config: Config,
    pub dispatcher: Dispatcher,
    pub gateway: Arc<dyn PaymentGateway>,
    pub mailer: Arc<dyn Mailer>,
    pub storage: Storage,
}

impl AppStateInner {
    /// Run a blocking database call off the async runtime.
    pub async fn with_db<F, T>(&self, f: F) -> Result<T, ApiError>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                ApiError::Internal(anyhow!("blocking task failed"))
            })?
            .map_err(ApiError::Internal)
    }

    pub async fn notify(&self, email: mail::Email) {
        mail::notify(self.mailer.as_ref(), email).await;
    }
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let name = req.name.trim().to_string();
    let username = req.username.trim().to_string();
    validate_name(&name)?;
    validate_username(&username)?;
    validate_password(&req.password)?;
    let email = normalize_email(&req.email)?;

    if !req.role.is_one_of(&[Role::Model, Role::Visitor]) {
        return Err(ApiError::Forbidden("Only model and visitor accounts can register here".into()));
    }

    // Models need a live invitation for this exact email
    let invitation = match req.role {
        Role::Model => {
            let code = req
                .code
                .as_deref()
                .filter(|c| !c.trim().is_empty())
                .ok_or_else(|| ApiError::Validation("An invitation code is required".into()))?;
            Some(invitations::verify(&state, code, &email).await?)
        }
        _ => None,
    };

    let signup_donation = if req.role == Role::Model {
        find_signup_donation(&state, &email, req.donation_id).await?
    } else {
        None
    };

    let password_hash = hash_password(&req.password)?;
    let user_id = Uuid::new_v4().to_string();
    let now = muse_db::to_db_time(Utc::now());

    let outcome = {
        let id = user_id.clone();
        let email = email.clone();
        let role = req.role.as_str();
        let now = now.clone();
        state
            .with_db(move |db| {
                let user = NewUser {
                    id: &id,
                    name: &name,
                    username: &username,
                    email: &email,
                    password_hash: &password_hash,
                    role,
                    invited_by: invitation.as_ref().map(|i| i.sender_id.as_str()),
                };
                match &invitation {
                    Some(inv) => db.create_user_accepting_invitation(&user, &inv.id, &now),
                    None => db.create_user(&user),
                }
            })
            .await?
    };
    reject_insert_conflict(outcome)?;

    if let Some(donation_id) = signup_donation {
        let uid = user_id.clone();
        let linked = state
            .with_db(move |db| db.link_donation_model(&donation_id, &uid, &now))
            .await;
        if let Err(e) = linked {
            warn!("Could not link signup donation to {}: {}", user_id, e);
        }
    }

    let user = load_user(&state, &user_id).await?;
    info!("Registered {} {} ({})", user.role, user.username, user.id);

    state
        .notify(mail::templates::welcome(&user.email, &user.name, &state.config.frontend_url))
        .await;

    let message = match req.role {
        Role::Model => "Model registered successfully",
        _ => "Visitor registered successfully",
    };
    auth_response(&state, &user, message, StatusCode::CREATED)
}

pub async fn admin_register(
    State(state): State<AppState>,
    Json(req): Json<AdminRegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let Some(expected) = state.config.admin_registration_key.as_deref() else {
        return Err(ApiError::Forbidden("Admin registration is disabled".into()));
    };
    if !keys_match(&req.admin_key, expected) {
        return Err(ApiError::Forbidden("Invalid admin registration key".into()));
    }

    let name = req.name.trim().to_string();
    let username = req.username.trim().to_string();
    validate_name(&name)?;
    validate_username(&username)?;
    validate_password(&req.password)?;
    let email = normalize_email(&req.email)?;

    let password_hash = hash_password(&req.password)?;
    let user_id = Uuid::new_v4().to_string();
    let id = user_id.clone();
    let outcome = state
        .with_db(move |db| {
            db.create_user(&NewUser {
                id: &id,
                name: &name,
                username: &username,
                email: &email,
                password_hash: &password_hash,
                role: Role::Admin.as_str(),
                invited_by: None,
            })
        })
        .await?;
    reject_insert_conflict(outcome)?;

    let user = load_user(&state, &user_id).await?;
    info!("Registered admin {} ({})", user.username, user.id);
    auth_response(&state, &user, "Admin registered successfully", StatusCode::CREATED)
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let invalid = || ApiError::Unauthorized("Invalid credentials".into());
    let email = normalize_email(&req.email).map_err(|_| invalid())?;

    let user = state
        .with_db(move |db| db.get_user_by_email(&email))
        .await?
        .ok_or_else(invalid)?;

    if !verify_password(&req.password, &user.password)? {
        return Err(invalid());
    }

    auth_response(&state, &user, "Logged in successfully", StatusCode::OK)
}

pub async fn me(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
) -> Result<impl IntoResponse, ApiError> {
    let user = load_user(&state, &current.id.to_string()).await?;
    Ok(Json(json!({ "success": true, "user": views::user_summary(&user)? })))
}

/// Tries at a free generated visitor username.
const VISITOR_USERNAME_ATTEMPTS: usize = 4;

/// Create a visitor account with generated credentials and mail them.
/// `None` when the email is already registered. `name` defaults to the
/// generated username.
pub(crate) async fn provision_visitor_account(
    state: &AppState,
    name: Option<&str>,
    email: &str,
) -> Result<Option<UserRow>, ApiError> {
    let password = generate_password();
    let password_hash = hash_password(&password)?;

    for _ in 0..VISITOR_USERNAME_ATTEMPTS {
        let username = generate_visitor_username();
        let user_id = Uuid::new_v4().to_string();
        let display_name = name.unwrap_or(&username).to_string();
        let (id, login, to, hash) = (user_id.clone(), username.clone(), email.to_string(), password_hash.clone());
        let outcome = state
            .with_db(move |db| {
                db.create_user(&NewUser {
                    id: &id,
                    name: &display_name,
                    username: &login,
                    email: &to,
                    password_hash: &hash,
                    role: Role::Visitor.as_str(),
                    invited_by: None,
                })
            })
            .await?;

        match outcome {
            UserInsert::Created => {
                info!("Provisioned visitor {} for {}", username, email);
                state
                    .notify(mail::templates::visitor_credentials(
                        email,
                        &username,
                        &password,
                        &state.config.frontend_url,
                    ))
                    .await;
                return load_user(state, &user_id).await.map(Some);
            }
            UserInsert::EmailTaken => return Ok(None),
            UserInsert::UsernameTaken | UserInsert::InvitationUnavailable => continue,
        }
    }
    Err(ApiError::Internal(anyhow!("no free visitor username")))
}

async fn load_user(state: &AppState, id: &str) -> Result<UserRow, ApiError> {
    let id = id.to_string();
    state
        .with_db(move |db| db.get_user_by_id(&id))
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".into()))
}

/// Locate the succeeded signup donation a new model pays with. Returns its id
/// when one should be linked to the account.
async fn find_signup_donation(
    state: &AppState,
    email: &str,
    donation_id: Option<Uuid>,
) -> Result<Option<String>, ApiError> {
    if let Some(id) = donation_id {
        let id = id.to_string();
        let donation = state
            .with_db(move |db| db.get_donation(&id))
            .await?
            .ok_or_else(|| ApiError::NotFound("Signup donation not found".into()))?;
        let usable = donation.donor_email == email
            && donation.kind == DonationKind::ModelSignup.as_str()
            && donation.status == DonationStatus::Succeeded.as_str();
        if !usable {
            return Err(ApiError::Validation("Signup donation is not valid for this email".into()));
        }
        return Ok(Some(donation.id));
    }

    if !state.config.require_signup_fee {
        return Ok(None);
    }
    let email = email.to_string();
    let donation = state
        .with_db(move |db| db.find_succeeded_donation(&email, DonationKind::ModelSignup.as_str(), None))
        .await?
        .ok_or_else(|| ApiError::Forbidden("A signup donation is required to register".into()))?;
    Ok(Some(donation.id))
}

fn reject_insert_conflict(outcome: UserInsert) -> Result<(), ApiError> {
    match outcome {
        UserInsert::Created => Ok(()),
        UserInsert::EmailTaken => Err(ApiError::Conflict("Email is already registered".into())),
        UserInsert::UsernameTaken => Err(ApiError::Conflict("Username is already taken".into())),
        UserInsert::InvitationUnavailable => {
            Err(ApiError::Conflict("Invitation has already been used".into()))
        }
    }
}

fn auth_response(
    state: &AppState,
    user: &UserRow,
    message: &str,
    status: StatusCode,
) -> Result<(StatusCode, Json<AuthResponse>), ApiError> {
    let summary = views::user_summary(user)?;
    let token = create_token(&state.config.jwt_secret, summary.id, &summary.username, state.config.token_ttl_days)?;
    Ok((
        status,
        Json(AuthResponse {
            success: true,
            message: message.to_string(),
            token,
            user: summary,
        }),
    ))
}

/// Constant-time comparison of a submitted secret with the configured one,
/// over equal-length keyed digests of both.
fn keys_match(provided: &str, expected: &str) -> bool {
    let digest = |key: &str| {
        let mut mac = Hmac::<Sha256>::new_from_slice(b"muse-admin-registration").ok()?;
        mac.update(key.as_bytes());
        Some(mac)
    };
    match (digest(provided), digest(expected)) {
        (Some(provided), Some(expected)) => provided.verify_slice(&expected.finalize().into_bytes()).is_ok(),
        _ => false,
    }
}

pub fn hash_password(password: &str) -> Result<String, ApiError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| ApiError::Internal(anyhow!("password hashing failed: {}", e)))
}

pub fn verify_password(password: &str, stored_hash: &str) -> Result<bool, ApiError> {
    let parsed = PasswordHash::new(stored_hash)
        .map_err(|e| ApiError::Internal(anyhow!("stored password hash is unreadable: {}", e)))?;
    Ok(Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok())
}

pub fn create_token(secret: &str, user_id: Uuid, username: &str, ttl_days: i64) -> Result<String, ApiError> {
    let claims = Claims {
        sub: user_id,
        username: username.to_string(),
        exp: (Utc::now() + chrono::Duration::days(ttl_days)).timestamp() as usize,
    };

    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes()))
        .map_err(|e| ApiError::Internal(anyhow!("token encoding failed: {}", e)))
}

/// Validate a bearer token and return its claims.
pub fn decode_token(secret: &str, token: &str) -> Result<Claims, ApiError> {
    decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &Validation::default())
        .map(|data| data.claims)
        .map_err(|_| ApiError::Unauthorized("Invalid or expired token".into()))
}
