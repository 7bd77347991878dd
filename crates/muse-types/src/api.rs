use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{DonationKind, DonationStatus, InvitationStatus, Role};

// -- JWT Claims --

/// Bearer token claims shared by the REST middleware and the WebSocket upgrade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub username: String,
    pub email: String,
    pub password: String,
    pub role: Role,
    /// Invitation code, required for `role = model`.
    #[serde(default)]
    pub code: Option<String>,
    /// Succeeded signup donation to link to the new account.
    #[serde(default)]
    pub donation_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct AdminRegisterRequest {
    pub name: String,
    pub username: String,
    pub email: String,
    pub password: String,
    pub admin_key: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserSummary {
    pub id: Uuid,
    pub name: String,
    pub username: String,
    pub email: String,
    pub role: Role,
    pub profile_photo: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub success: bool,
    pub message: String,
    pub token: String,
    pub user: UserSummary,
}

// -- Invitations --

#[derive(Debug, Deserialize)]
pub struct InviteRequest {
    pub email: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct InvitationView {
    pub id: Uuid,
    pub code: String,
    pub email: String,
    pub sender_id: Uuid,
    pub status: InvitationStatus,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

// -- Payments --

#[derive(Debug, Deserialize)]
pub struct SignupIntentRequest {
    pub email: String,
    #[serde(default = "default_signup_donor")]
    pub donor_type: Role,
}

fn default_signup_donor() -> Role {
    Role::Model
}

#[derive(Debug, Deserialize)]
pub struct PhotoIntentRequest {
    pub email: String,
    #[serde(default = "default_unlock_donor")]
    pub donor_type: Role,
    #[serde(default)]
    pub photo_id: Option<Uuid>,
    #[serde(default)]
    pub model_id: Option<Uuid>,
}

fn default_unlock_donor() -> Role {
    Role::Visitor
}

#[derive(Debug, Serialize)]
pub struct PaymentIntentResponse {
    pub success: bool,
    pub donation_id: Uuid,
    /// Absent when the pair was already paid for.
    pub client_secret: Option<String>,
    pub payment_id: String,
    pub already_paid: bool,
}

#[derive(Debug, Deserialize)]
pub struct GatewayPaymentRef {
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PaymentCompleteRequest {
    pub donation_id: Uuid,
    pub payment_intent: GatewayPaymentRef,
}

#[derive(Debug, Serialize)]
pub struct PaymentCompleteResponse {
    pub success: bool,
    pub message: String,
    pub already_completed: bool,
    pub donation: DonationView,
    pub unlock: Option<UnlockGrantView>,
}

#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    pub email: String,
    #[serde(default)]
    pub invitation_code: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub success: bool,
    pub donation_id: Uuid,
    pub session_id: String,
    pub url: Option<String>,
    pub already_paid: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DonationView {
    pub id: Uuid,
    pub donor_email: String,
    pub donor_type: Role,
    pub amount: u32,
    pub kind: DonationKind,
    pub target_id: Option<Uuid>,
    pub model_id: Option<Uuid>,
    pub stripe_payment_id: Option<String>,
    pub stripe_session_id: Option<String>,
    pub status: DonationStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnlockGrantView {
    pub id: Uuid,
    /// `photo` or `model`.
    pub kind: String,
    pub target_id: Uuid,
    pub donor_email: String,
    pub donation_id: Uuid,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct UnlockStatusResponse {
    pub success: bool,
    pub unlocked: bool,
}

#[derive(Debug, Serialize)]
pub struct VerifyPaymentResponse {
    pub success: bool,
    pub kind: DonationKind,
    pub target_id: Option<Uuid>,
    pub unlocked: bool,
}

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub received: bool,
}

// -- Photos --

#[derive(Debug, Clone, Serialize)]
pub struct PhotoView {
    pub id: Uuid,
    pub model_id: Uuid,
    pub title: String,
    pub description: String,
    pub blurred_url: String,
    /// Only present for viewers who may see the original.
    pub original_url: Option<String>,
    pub price: u32,
    pub is_active: bool,
    pub unlocked: bool,
    pub unlock_count: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct PhotoListResponse {
    pub success: bool,
    pub photos: Vec<PhotoView>,
    pub page: u32,
    pub limit: u32,
    pub total: u64,
    pub total_pages: u64,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePhotoRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub price: Option<u32>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

// -- Model profiles --

#[derive(Debug, Clone, Serialize)]
pub struct ModelSummary {
    pub id: Uuid,
    pub name: String,
    pub profile_photo: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ModelListResponse {
    pub success: bool,
    pub models: Vec<ModelSummary>,
    pub page: u32,
    pub limit: u32,
    pub total_pages: u64,
    pub total_models: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileDetails {
    #[serde(default)]
    pub bio: String,
    #[serde(default)]
    pub quote: String,
    #[serde(default)]
    pub site_address: Option<String>,
    #[serde(default)]
    pub age: u32,
    #[serde(default)]
    pub zodiac: String,
    #[serde(default)]
    pub height: u32,
    #[serde(default)]
    pub weight: u32,
    #[serde(default)]
    pub eyes: String,
    #[serde(default)]
    pub hair: String,
    #[serde(default)]
    pub favorite_book: String,
    #[serde(default)]
    pub future_goals: String,
}

#[derive(Debug, Serialize)]
pub struct ModelProfile {
    pub id: Uuid,
    pub name: String,
    pub username: String,
    pub email: String,
    pub profile_photo: Option<String>,
    /// Same shape as the `details` returned by a profile update.
    pub details: ProfileDetails,
    pub locked_photos: Vec<PhotoView>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateProfileRequest {
    pub name: String,
    #[serde(flatten)]
    pub details: ProfileDetails,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePasswordRequest {
    pub password: String,
    pub confirm_password: String,
}

// -- Chat --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantView {
    pub id: Uuid,
    pub name: String,
    pub username: String,
    pub profile_photo: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageView {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub recipient_id: Uuid,
    pub content: String,
    pub attachments: Vec<String>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversationView {
    pub id: Uuid,
    pub other_participant: ParticipantView,
    pub last_message: Option<MessageView>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ConversationDetail {
    pub conversation: ConversationView,
    pub messages: Vec<MessageView>,
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub recipient_id: Uuid,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct SentMessage {
    pub message: MessageView,
    pub conversation_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct MarkReadRequest {
    pub sender_id: Uuid,
}

// -- Admin --

#[derive(Debug, Deserialize)]
pub struct CreateVisitorRequest {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Default, Serialize)]
pub struct Statistics {
    pub models: u64,
    pub visitors: u64,
    pub invitations_pending: u64,
    pub invitations_accepted: u64,
    pub invitations_expired: u64,
    pub donations_succeeded: u64,
    pub donations_total_amount: u64,
    pub unlock_grants: u64,
}
