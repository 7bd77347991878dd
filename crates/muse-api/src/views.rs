//! Row to wire conversions.

use anyhow::{Context, anyhow};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use muse_db::models::{ConversationRow, DonationRow, GrantRow, InvitationRow, MessageRow, PhotoRow, UserRow};
use muse_types::api::{
    ConversationView, DonationView, InvitationView, MessageView, ModelSummary, ParticipantView, PhotoView,
    ProfileDetails, UnlockGrantView, UserSummary,
};
use muse_types::models::InvitationStatus;

use crate::error::ApiError;

pub(crate) fn parse_id(raw: &str) -> Result<Uuid, ApiError> {
    raw.parse::<Uuid>()
        .with_context(|| format!("stored id '{}' is not a uuid", raw))
        .map_err(ApiError::Internal)
}

fn parse_opt_id(raw: Option<&str>) -> Result<Option<Uuid>, ApiError> {
    raw.map(parse_id).transpose()
}

pub(crate) fn parse_time(raw: &str) -> Result<DateTime<Utc>, ApiError> {
    muse_db::parse_db_time(raw).map_err(ApiError::Internal)
}

fn parse_enum<T>(raw: &str) -> Result<T, ApiError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse::<T>().map_err(|e| ApiError::Internal(anyhow!("{}", e)))
}

/// Public URL for a stored asset key.
pub fn asset_url(key: &str) -> String {
    format!("/uploads/{}", key)
}

pub fn user_summary(row: &UserRow) -> Result<UserSummary, ApiError> {
    Ok(UserSummary {
        id: parse_id(&row.id)?,
        name: row.name.clone(),
        username: row.username.clone(),
        email: row.email.clone(),
        role: parse_enum(&row.role)?,
        profile_photo: row.profile_photo.as_deref().map(asset_url),
    })
}

pub fn participant(row: &UserRow) -> Result<ParticipantView, ApiError> {
    Ok(ParticipantView {
        id: parse_id(&row.id)?,
        name: row.name.clone(),
        username: row.username.clone(),
        profile_photo: row.profile_photo.as_deref().map(asset_url),
    })
}

pub fn model_summary(row: &UserRow) -> Result<ModelSummary, ApiError> {
    Ok(ModelSummary {
        id: parse_id(&row.id)?,
        name: row.name.clone(),
        profile_photo: row.profile_photo.as_deref().map(asset_url),
    })
}

pub fn profile_details(row: &UserRow) -> ProfileDetails {
    ProfileDetails {
        bio: row.bio.clone(),
        quote: row.quote.clone(),
        site_address: row.site_address.clone(),
        age: row.age,
        zodiac: row.zodiac.clone(),
        height: row.height,
        weight: row.weight,
        eyes: row.eyes.clone(),
        hair: row.hair.clone(),
        favorite_book: row.favorite_book.clone(),
        future_goals: row.future_goals.clone(),
    }
}

/// Status as callers should see it: a pending invitation past its expiry
/// reads as expired even before the sweep has flipped the stored row.
pub fn effective_status(row: &InvitationRow, now: DateTime<Utc>) -> Result<InvitationStatus, ApiError> {
    let status: InvitationStatus = parse_enum(&row.status)?;
    if status == InvitationStatus::Pending && parse_time(&row.expires_at)? <= now {
        return Ok(InvitationStatus::Expired);
    }
    Ok(status)
}

pub fn invitation(row: &InvitationRow, now: DateTime<Utc>) -> Result<InvitationView, ApiError> {
    Ok(InvitationView {
        id: parse_id(&row.id)?,
        code: row.code.clone(),
        email: row.email.clone(),
        sender_id: parse_id(&row.sender_id)?,
        status: effective_status(row, now)?,
        expires_at: parse_time(&row.expires_at)?,
        created_at: parse_time(&row.created_at)?,
    })
}

pub fn donation(row: &DonationRow) -> Result<DonationView, ApiError> {
    Ok(DonationView {
        id: parse_id(&row.id)?,
        donor_email: row.donor_email.clone(),
        donor_type: parse_enum(&row.donor_type)?,
        amount: row.amount,
        kind: parse_enum(&row.kind)?,
        target_id: parse_opt_id(row.target_id.as_deref())?,
        model_id: parse_opt_id(row.model_id.as_deref())?,
        stripe_payment_id: row.stripe_payment_id.clone(),
        stripe_session_id: row.stripe_session_id.clone(),
        status: parse_enum(&row.status)?,
        created_at: parse_time(&row.created_at)?,
    })
}

pub fn grant(row: &GrantRow) -> Result<UnlockGrantView, ApiError> {
    Ok(UnlockGrantView {
        id: parse_id(&row.id)?,
        kind: row.kind.clone(),
        target_id: parse_id(&row.target_id)?,
        donor_email: row.donor_email.clone(),
        donation_id: parse_id(&row.donation_id)?,
        expires_at: row.expires_at.as_deref().map(parse_time).transpose()?,
        created_at: parse_time(&row.created_at)?,
    })
}

/// `unlocked` decides whether the original is reachable for this viewer.
pub fn photo(row: &PhotoRow, unlocked: bool) -> Result<PhotoView, ApiError> {
    Ok(PhotoView {
        id: parse_id(&row.id)?,
        model_id: parse_id(&row.model_id)?,
        title: row.title.clone(),
        description: row.description.clone(),
        blurred_url: asset_url(&row.blurred_key),
        original_url: unlocked.then(|| format!("/photos/{}/original", row.id)),
        price: row.price,
        is_active: row.is_active,
        unlocked,
        unlock_count: row.unlock_count,
        created_at: parse_time(&row.created_at)?,
    })
}

pub fn message(row: &MessageRow) -> Result<MessageView, ApiError> {
    let attachments: Vec<String> = serde_json::from_str(&row.attachments)
        .with_context(|| format!("message {} has unreadable attachments", row.id))
        .map_err(ApiError::Internal)?;
    Ok(MessageView {
        id: parse_id(&row.id)?,
        sender_id: parse_id(&row.sender_id)?,
        recipient_id: parse_id(&row.recipient_id)?,
        content: row.content.clone(),
        attachments,
        is_read: row.is_read,
        created_at: parse_time(&row.created_at)?,
    })
}

pub fn conversation(
    row: &ConversationRow,
    other: &UserRow,
    last_message: Option<&MessageRow>,
) -> Result<ConversationView, ApiError> {
    Ok(ConversationView {
        id: parse_id(&row.id)?,
        other_participant: participant(other)?,
        last_message: last_message.map(message).transpose()?,
        updated_at: parse_time(&row.updated_at)?,
    })
}
