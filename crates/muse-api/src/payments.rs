//! Payment to unlock reconciliation.
//!
//! A donation moves `pending -> succeeded | failed` once per (donor, target)
//! pair. Two channels can drive it to a terminal state: the client calling a
//! `*_complete` endpoint after confirming the charge, and the gateway's
//! webhook. Both end in [`Database::settle_donation`], which is idempotent and
//! backed by unique indexes, so either order and any number of repeats
//! converge on one succeeded donation and one grant.
//!
//! [`Database::settle_donation`]: muse_db::Database::settle_donation

use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use muse_billing::{
    ChargeRequest, CheckoutRequest as CheckoutSessionRequest, PaymentMetadata, WebhookEvent, parse_webhook_event,
};
use muse_db::donations::SettleOutcome;
use muse_db::models::{DonationRow, GrantRow, NewDonation};
use muse_types::api::{
    CheckoutRequest, CheckoutResponse, PaymentCompleteRequest, PaymentCompleteResponse, PaymentIntentResponse,
    PhotoIntentRequest, SignupIntentRequest, UnlockStatusResponse, VerifyPaymentResponse, WebhookAck,
};
use muse_types::models::{DonationKind, DonationStatus, PLATFORM_DONATION, Role};

use crate::auth::{AppState, provision_visitor_account};
use crate::error::ApiError;
use crate::validation::normalize_email;
use crate::{invitations, views};

/// What a donation pays for, resolved against the catalog.
#[derive(Debug, Clone)]
struct Target {
    kind: DonationKind,
    target_id: Option<String>,
    /// Model credited with the donation.
    model_id: Option<String>,
    /// Whole currency units.
    amount: u32,
    label: String,
}

impl Target {
    fn signup() -> Self {
        Self {
            kind: DonationKind::ModelSignup,
            target_id: None,
            model_id: None,
            amount: PLATFORM_DONATION,
            label: "Model signup donation".into(),
        }
    }

    fn metadata(&self, donation_id: &str, donor_email: &str, donor_type: Role) -> PaymentMetadata {
        PaymentMetadata {
            donation_id: Some(donation_id.to_string()),
            donor_email: donor_email.to_string(),
            donor_type: donor_type.as_str().to_string(),
            kind: self.kind.as_str().to_string(),
            target_id: self.target_id.clone(),
        }
    }
}

/// Photo-level unlock at the photo's price, or model-level unlock at the
/// platform constant.
async fn resolve_unlock_target(
    state: &AppState,
    photo_id: Option<Uuid>,
    model_id: Option<Uuid>,
) -> Result<Target, ApiError> {
    if let Some(photo_id) = photo_id {
        let id = photo_id.to_string();
        let photo = state
            .with_db(move |db| db.get_photo(&id))
            .await?
            .ok_or_else(|| ApiError::NotFound("Photo not found".into()))?;
        if !photo.is_active {
            return Err(ApiError::NotFound("Photo not found".into()));
        }
        return Ok(Target {
            kind: DonationKind::PhotoUnlock,
            label: format!("Unlock photo: {}", photo.title),
            target_id: Some(photo.id),
            model_id: Some(photo.model_id),
            amount: photo.price,
        });
    }

    if let Some(model_id) = model_id {
        let id = model_id.to_string();
        let model = state
            .with_db(move |db| db.get_user_by_id(&id))
            .await?
            .filter(|u| u.role == Role::Model.as_str())
            .ok_or_else(|| ApiError::NotFound("Model not found".into()))?;
        return Ok(Target {
            kind: DonationKind::ModelUnlock,
            label: format!("Unlock all photos of {}", model.name),
            target_id: Some(model.id.clone()),
            model_id: Some(model.id),
            amount: PLATFORM_DONATION,
        });
    }

    Err(ApiError::Validation("Either photo_id or model_id is required".into()))
}

async fn find_succeeded(state: &AppState, email: &str, target: &Target) -> Result<Option<DonationRow>, ApiError> {
    let email = email.to_string();
    let kind = target.kind.as_str();
    let target_id = target.target_id.clone();
    state
        .with_db(move |db| db.find_succeeded_donation(&email, kind, target_id.as_deref()))
        .await
}

/// Create a gateway intent and the pending donation that tracks it, unless
/// the pair is already paid for.
async fn initiate(
    state: &AppState,
    email: &str,
    donor_type: Role,
    target: &Target,
) -> Result<PaymentIntentResponse, ApiError> {
    if let Some(existing) = find_succeeded(state, email, target).await? {
        debug!("{} already paid for {} {:?}", email, target.kind.as_str(), target.target_id);
        return Ok(PaymentIntentResponse {
            success: true,
            donation_id: views::parse_id(&existing.id)?,
            client_secret: None,
            payment_id: existing.stripe_payment_id.unwrap_or_default(),
            already_paid: true,
        });
    }

    let donation_id = Uuid::new_v4();
    let intent = state
        .gateway
        .create_payment_intent(&ChargeRequest {
            amount: target.amount,
            description: target.label.clone(),
            receipt_email: Some(email.to_string()),
            metadata: target.metadata(&donation_id.to_string(), email, donor_type),
        })
        .await?;
    let client_secret = intent
        .client_secret
        .clone()
        .ok_or_else(|| ApiError::Upstream("Payment gateway returned no client secret".into()))?;

    record_pending(state, donation_id, email, donor_type, target, Some(&intent.id), None).await?;
    info!(
        "Donation {} pending: {} {} for {}",
        donation_id,
        target.kind.as_str(),
        target.amount,
        email
    );

    Ok(PaymentIntentResponse {
        success: true,
        donation_id,
        client_secret: Some(client_secret),
        payment_id: intent.id,
        already_paid: false,
    })
}

async fn record_pending(
    state: &AppState,
    donation_id: Uuid,
    email: &str,
    donor_type: Role,
    target: &Target,
    payment_id: Option<&str>,
    session_id: Option<&str>,
) -> Result<DonationRow, ApiError> {
    let id = donation_id.to_string();
    let email = email.to_string();
    let target = target.clone();
    let payment_id = payment_id.map(str::to_string);
    let session_id = session_id.map(str::to_string);
    state
        .with_db(move |db| {
            db.insert_donation(
                &NewDonation {
                    id: &id,
                    donor_email: &email,
                    donor_type: donor_type.as_str(),
                    amount: target.amount,
                    kind: target.kind.as_str(),
                    target_id: target.target_id.as_deref(),
                    model_id: target.model_id.as_deref(),
                    stripe_payment_id: payment_id.as_deref(),
                    stripe_session_id: session_id.as_deref(),
                },
                &muse_db::to_db_time(Utc::now()),
            )
        })
        .await
}

/// Give a first-time donor a visitor account and mail the credentials.
/// Never fails the caller.
async fn provision_visitor(state: &AppState, email: &str) {
    if let Err(e) = try_provision_visitor(state, email).await {
        warn!("Visitor provisioning for {} failed: {}", email, e);
    }
}

async fn try_provision_visitor(state: &AppState, email: &str) -> Result<(), ApiError> {
    let lookup = email.to_string();
    if state.with_db(move |db| db.get_user_by_email(&lookup)).await?.is_some() {
        return Ok(());
    }
    provision_visitor_account(state, None, email).await?;
    Ok(())
}

/// POST /payments/create_signup_payment_intent
pub async fn create_signup_payment_intent(
    State(state): State<AppState>,
    Json(req): Json<SignupIntentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = normalize_email(&req.email)?;
    if req.donor_type != Role::Model {
        return Err(ApiError::Validation("Signup donations are for model accounts".into()));
    }
    let response = initiate(&state, &email, req.donor_type, &Target::signup()).await?;
    Ok(Json(response))
}

/// POST /payments/create_photo_payment_intent
pub async fn create_photo_payment_intent(
    State(state): State<AppState>,
    Json(req): Json<PhotoIntentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = normalize_email(&req.email)?;
    if !req.donor_type.is_one_of(&[Role::Visitor, Role::Model]) {
        return Err(ApiError::Validation("donor_type must be visitor or model".into()));
    }
    let target = resolve_unlock_target(&state, req.photo_id, req.model_id).await?;
    let response = initiate(&state, &email, req.donor_type, &target).await?;
    if !response.already_paid && req.donor_type == Role::Visitor {
        provision_visitor(&state, &email).await;
    }
    Ok(Json(response))
}

/// POST /payments/create_signup_payment_complete
pub async fn create_signup_payment_complete(
    State(state): State<AppState>,
    Json(req): Json<PaymentCompleteRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let response = complete(&state, &req, &[DonationKind::ModelSignup]).await?;
    Ok(Json(response))
}

/// POST /payments/create_photo_payment_complete
pub async fn create_photo_payment_complete(
    State(state): State<AppState>,
    Json(req): Json<PaymentCompleteRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let response = complete(&state, &req, &[DonationKind::PhotoUnlock, DonationKind::ModelUnlock]).await?;
    Ok(Json(response))
}

/// Client-driven completion. The intent's status is re-read from the
/// gateway; the status in the request body is informational only.
async fn complete(
    state: &AppState,
    req: &PaymentCompleteRequest,
    expected: &[DonationKind],
) -> Result<PaymentCompleteResponse, ApiError> {
    let id = req.donation_id.to_string();
    let donation = state
        .with_db(move |db| db.get_donation(&id))
        .await?
        .ok_or_else(|| ApiError::NotFound("Donation not found".into()))?;

    let kind: DonationKind = views::donation(&donation)?.kind;
    if !expected.contains(&kind) {
        return Err(ApiError::Validation("Donation is not of the expected kind".into()));
    }

    if donation.status == DonationStatus::Succeeded.as_str() {
        let grant = grant_for(state, &donation.id).await?;
        return completion_response(&donation, grant.as_ref(), true, "Payment already completed");
    }

    let payment_id = req.payment_intent.id.trim();
    if payment_id.is_empty() {
        return Err(ApiError::Validation("Payment intent id is required".into()));
    }
    if donation.stripe_payment_id.as_deref().is_some_and(|known| known != payment_id) {
        return Err(ApiError::Validation("Payment does not belong to this donation".into()));
    }

    let intent = state.gateway.retrieve_payment_intent(payment_id).await?;
    if intent
        .metadata
        .get("donation_id")
        .is_some_and(|meta_id| *meta_id != donation.id)
    {
        return Err(ApiError::Validation("Payment does not belong to this donation".into()));
    }
    if let Some(claimed) = &req.payment_intent.status {
        if *claimed != intent.status {
            debug!("Client reported status {} for {}, gateway says {}", claimed, intent.id, intent.status);
        }
    }

    let status = DonationStatus::from_gateway(&intent.status);
    if status == DonationStatus::Pending {
        let (id, pid) = (donation.id.clone(), intent.id.clone());
        state
            .with_db(move |db| db.set_donation_gateway_ids(&id, Some(&pid), None, &muse_db::to_db_time(Utc::now())))
            .await?;
        return Err(ApiError::Validation(format!(
            "Payment has not completed yet (status: {})",
            intent.status
        )));
    }

    match settle(state, &donation.id, Some(&intent.id), status).await? {
        SettleOutcome::NotFound => Err(ApiError::NotFound("Donation not found".into())),
        SettleOutcome::Settled { donation, grant } => {
            completion_response(&donation, grant.as_ref(), false, "Payment completed successfully")
        }
        SettleOutcome::AlreadySucceeded { donation, grant } => {
            completion_response(&donation, grant.as_ref(), true, "Payment already completed")
        }
        SettleOutcome::Duplicate { donation, existing } => {
            let kept = existing.unwrap_or(donation);
            let grant = grant_for(state, &kept.id).await?;
            completion_response(
                &kept,
                grant.as_ref(),
                true,
                "This item was already paid for; the duplicate payment will be refunded",
            )
        }
        SettleOutcome::Recorded { .. } => Err(ApiError::Validation(format!(
            "Payment was not successful (status: {})",
            intent.status
        ))),
    }
}

async fn grant_for(state: &AppState, donation_id: &str) -> Result<Option<GrantRow>, ApiError> {
    let id = donation_id.to_string();
    state.with_db(move |db| db.get_grant_for_donation(&id)).await
}

fn completion_response(
    donation: &DonationRow,
    grant: Option<&GrantRow>,
    already_completed: bool,
    message: &str,
) -> Result<PaymentCompleteResponse, ApiError> {
    Ok(PaymentCompleteResponse {
        success: true,
        message: message.to_string(),
        already_completed,
        donation: views::donation(donation)?,
        unlock: grant.map(views::grant).transpose()?,
    })
}

/// Drive a donation to `status` and apply the follow-up effects of a fresh
/// success. Shared by client completion and the webhook.
async fn settle(
    state: &AppState,
    donation_id: &str,
    payment_id: Option<&str>,
    status: DonationStatus,
) -> Result<SettleOutcome, ApiError> {
    let id = donation_id.to_string();
    let pid = payment_id.map(str::to_string);
    let outcome = state
        .with_db(move |db| db.settle_donation(&id, pid.as_deref(), status, &muse_db::to_db_time(Utc::now())))
        .await?;

    match &outcome {
        SettleOutcome::Settled { donation, grant } => {
            info!(
                "Donation {} succeeded ({} by {}){}",
                donation.id,
                donation.kind,
                donation.donor_email,
                if grant.is_some() { ", unlock granted" } else { "" }
            );
            if donation.kind == DonationKind::ModelSignup.as_str() {
                link_existing_model(state, donation).await;
            }
        }
        SettleOutcome::Duplicate { donation, existing } => {
            warn!(
                "Donation {} by {} duplicates succeeded donation {:?}; refund required",
                donation.id,
                donation.donor_email,
                existing.as_ref().map(|d| d.id.as_str())
            );
        }
        SettleOutcome::Recorded { donation } => {
            info!("Donation {} is now {}", donation.id, donation.status);
        }
        SettleOutcome::AlreadySucceeded { .. } | SettleOutcome::NotFound => {}
    }
    Ok(outcome)
}

/// A model who registered before paying gets the signup donation linked as
/// soon as it succeeds.
async fn link_existing_model(state: &AppState, donation: &DonationRow) {
    if donation.model_id.is_some() {
        return;
    }
    let (email, id) = (donation.donor_email.clone(), donation.id.clone());
    let linked = state
        .with_db(move |db| match db.get_user_by_email(&email)? {
            Some(user) if user.role == Role::Model.as_str() => {
                db.link_donation_model(&id, &user.id, &muse_db::to_db_time(Utc::now()))
            }
            _ => Ok(false),
        })
        .await;
    match linked {
        Ok(true) => debug!("Linked signup donation {} to its model", donation.id),
        Ok(false) => {}
        Err(e) => warn!("Could not link signup donation {}: {}", donation.id, e),
    }
}

/// POST /payments/checkout/photo/{photo_id}
pub async fn checkout_photo(
    State(state): State<AppState>,
    Path(photo_id): Path<Uuid>,
    Json(req): Json<CheckoutRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = normalize_email(&req.email)?;
    let target = resolve_unlock_target(&state, Some(photo_id), None).await?;
    let frontend = &state.config.frontend_url;
    let response = checkout(
        &state,
        &email,
        Role::Visitor,
        &target,
        format!("{}/payment/success?session_id={{CHECKOUT_SESSION_ID}}&photo_id={}", frontend, photo_id),
        format!("{}/photos/{}", frontend, photo_id),
    )
    .await?;
    if !response.already_paid {
        provision_visitor(&state, &email).await;
    }
    Ok(Json(response))
}

/// POST /payments/checkout/signup
pub async fn checkout_signup(
    State(state): State<AppState>,
    Json(req): Json<CheckoutRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = normalize_email(&req.email)?;
    let mut success_url = format!(
        "{}/register?session_id={{CHECKOUT_SESSION_ID}}&email={}",
        state.config.frontend_url, email
    );
    if let Some(code) = req.invitation_code.as_deref().filter(|c| !c.trim().is_empty()) {
        let invitation = invitations::verify(&state, code, &email).await?;
        success_url.push_str(&format!("&code={}", invitation.code));
    }
    let cancel_url = format!("{}/register", state.config.frontend_url);
    let response = checkout(&state, &email, Role::Model, &Target::signup(), success_url, cancel_url).await?;
    Ok(Json(response))
}

/// Hosted checkout variant of [`initiate`].
async fn checkout(
    state: &AppState,
    email: &str,
    donor_type: Role,
    target: &Target,
    success_url: String,
    cancel_url: String,
) -> Result<CheckoutResponse, ApiError> {
    if let Some(existing) = find_succeeded(state, email, target).await? {
        return Ok(CheckoutResponse {
            success: true,
            donation_id: views::parse_id(&existing.id)?,
            session_id: existing.stripe_session_id.unwrap_or_default(),
            url: None,
            already_paid: true,
        });
    }

    let donation_id = Uuid::new_v4();
    let session = state
        .gateway
        .create_checkout_session(&CheckoutSessionRequest {
            amount: target.amount,
            product_name: target.label.clone(),
            product_description: format!("Donation of {} to support our models", target.amount),
            customer_email: email.to_string(),
            success_url,
            cancel_url,
            metadata: target.metadata(&donation_id.to_string(), email, donor_type),
        })
        .await?;

    record_pending(
        state,
        donation_id,
        email,
        donor_type,
        target,
        session.payment_intent.as_deref(),
        Some(&session.id),
    )
    .await?;
    info!("Checkout session {} opened for donation {}", session.id, donation_id);

    Ok(CheckoutResponse {
        success: true,
        donation_id,
        session_id: session.id,
        url: session.url,
        already_paid: false,
    })
}

/// POST /payments/webhook
///
/// The signature is checked before anything is read or written. Failures
/// after verification return 500 so the gateway redelivers.
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    let event = parse_webhook_event(
        &body,
        signature,
        state.config.billing.webhook_secret.as_deref(),
        Utc::now().timestamp(),
    )
    .map_err(|e| {
        warn!("Webhook rejected: {}", e);
        ApiError::from(e)
    })?;

    match event {
        WebhookEvent::PaymentSucceeded(payment) => {
            reconcile(&state, Some(payment.id), None, payment.metadata, DonationStatus::Succeeded).await?;
        }
        WebhookEvent::PaymentFailed(payment) => {
            reconcile(&state, Some(payment.id), None, payment.metadata, DonationStatus::Failed).await?;
        }
        WebhookEvent::CheckoutCompleted {
            session_id,
            payment_intent,
            payment_status,
            metadata,
        } => {
            let status = DonationStatus::from_gateway(&payment_status);
            reconcile(&state, payment_intent, Some(session_id), metadata, status).await?;
        }
        WebhookEvent::Unknown { event_type } => {
            debug!("Ignoring webhook event {}", event_type);
        }
    }

    Ok((StatusCode::OK, Json(WebhookAck { received: true })))
}

/// Apply a gateway-reported status, keyed by the gateway's own identifiers.
async fn reconcile(
    state: &AppState,
    payment_id: Option<String>,
    session_id: Option<String>,
    metadata: Option<PaymentMetadata>,
    status: DonationStatus,
) -> Result<(), ApiError> {
    let donation = match locate_donation(state, payment_id.as_deref(), session_id.as_deref(), metadata.as_ref()).await? {
        Some(donation) => donation,
        None => match (&metadata, status) {
            (Some(meta), DonationStatus::Succeeded) => {
                record_from_metadata(state, meta, payment_id.as_deref(), session_id.as_deref()).await?
            }
            _ => {
                warn!(
                    "Webhook for unknown payment (intent {:?}, session {:?}), ignoring",
                    payment_id, session_id
                );
                return Ok(());
            }
        },
    };

    let now = muse_db::to_db_time(Utc::now());
    let (id, pid, sid) = (donation.id.clone(), payment_id.clone(), session_id.clone());
    state
        .with_db(move |db| db.set_donation_gateway_ids(&id, pid.as_deref(), sid.as_deref(), &now))
        .await?;

    if status == DonationStatus::Pending {
        debug!("Donation {} still pending at the gateway", donation.id);
        return Ok(());
    }

    settle(state, &donation.id, payment_id.as_deref(), status).await?;
    Ok(())
}

/// Find the donation a webhook refers to: by the id we put in the metadata,
/// then by gateway ids, then by the latest pending donation for the pair.
async fn locate_donation(
    state: &AppState,
    payment_id: Option<&str>,
    session_id: Option<&str>,
    metadata: Option<&PaymentMetadata>,
) -> Result<Option<DonationRow>, ApiError> {
    let donation_id = metadata.and_then(|m| m.donation_id.clone());
    let payment_id = payment_id.map(str::to_string);
    let session_id = session_id.map(str::to_string);
    let pair = metadata.map(|m| (m.donor_email.clone(), m.kind.clone(), m.target_id.clone()));

    state
        .with_db(move |db| {
            if let Some(id) = &donation_id {
                if let Some(found) = db.get_donation(id)? {
                    return Ok(Some(found));
                }
            }
            if let Some(pid) = &payment_id {
                if let Some(found) = db.find_donation_by_payment_id(pid)? {
                    return Ok(Some(found));
                }
            }
            if let Some(sid) = &session_id {
                if let Some(found) = db.find_donation_by_session_id(sid)? {
                    return Ok(Some(found));
                }
            }
            match &pair {
                Some((email, kind, target)) => db.find_pending_donation(email, kind, target.as_deref()),
                None => Ok(None),
            }
        })
        .await
}

/// A success for a payment this server has no record of (created out of
/// band, or the pending insert was lost). Recreate the donation from the
/// gateway metadata so the donor still gets their unlock.
async fn record_from_metadata(
    state: &AppState,
    meta: &PaymentMetadata,
    payment_id: Option<&str>,
    session_id: Option<&str>,
) -> Result<DonationRow, ApiError> {
    let kind: DonationKind = meta
        .kind
        .parse()
        .map_err(|e| ApiError::Validation(format!("Webhook metadata: {}", e)))?;
    let donor_type: Role = meta.donor_type.parse().unwrap_or(match kind {
        DonationKind::ModelSignup => Role::Model,
        _ => Role::Visitor,
    });

    let target = match (kind, meta.target_id.as_deref().map(str::parse::<Uuid>)) {
        (DonationKind::ModelSignup, _) => Target::signup(),
        (DonationKind::PhotoUnlock, Some(Ok(photo_id))) => resolve_unlock_target(state, Some(photo_id), None).await?,
        (DonationKind::ModelUnlock, Some(Ok(model_id))) => resolve_unlock_target(state, None, Some(model_id)).await?,
        _ => return Err(ApiError::Validation("Webhook metadata has no usable target".into())),
    };

    let donation_id = meta
        .donation_id
        .as_deref()
        .and_then(|id| id.parse::<Uuid>().ok())
        .unwrap_or_else(Uuid::new_v4);
    warn!("Recording donation {} from webhook metadata for {}", donation_id, meta.donor_email);
    record_pending(
        state,
        donation_id,
        &meta.donor_email,
        donor_type,
        &target,
        payment_id,
        session_id,
    )
    .await
}

/// GET /payments/verify/{session_id}
pub async fn verify_payment(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let sid = session_id.clone();
    let donation = state
        .with_db(move |db| match db.find_donation_by_session_id(&sid)? {
            Some(found) => Ok(Some(found)),
            None => db.find_donation_by_payment_id(&sid),
        })
        .await?
        .ok_or_else(|| ApiError::NotFound("Payment not found".into()))?;

    let view = views::donation(&donation)?;
    let succeeded = view.status == DonationStatus::Succeeded;
    let unlocked = succeeded && (!view.kind.grants_unlock() || grant_for(&state, &donation.id).await?.is_some());
    Ok(Json(VerifyPaymentResponse {
        success: succeeded,
        kind: view.kind,
        target_id: view.target_id,
        unlocked,
    }))
}

/// GET /payments/check_status/{email}/{photo_id}
pub async fn check_status(
    State(state): State<AppState>,
    Path((email, photo_id)): Path<(String, Uuid)>,
) -> Result<impl IntoResponse, ApiError> {
    let email = normalize_email(&email)?;
    let pid = photo_id.to_string();
    let unlocked = state
        .with_db(move |db| {
            if db.get_photo(&pid)?.is_none() {
                return Ok(None);
            }
            db.photo_unlocked_for(&email, &pid, &muse_db::to_db_time(Utc::now()))
                .map(Some)
        })
        .await?
        .ok_or_else(|| ApiError::NotFound("Photo not found".into()))?;
    Ok(Json(UnlockStatusResponse { success: true, unlocked }))
}
