/// Database row types, mapped directly from SQLite rows.
/// Distinct from muse-types API models to keep the DB layer independent.

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: String,
    pub name: String,
    pub username: String,
    pub email: String,
    pub password: String,
    pub role: String,
    pub profile_photo: Option<String>,
    pub bio: String,
    pub quote: String,
    pub site_address: Option<String>,
    pub age: u32,
    pub zodiac: String,
    pub height: u32,
    pub weight: u32,
    pub eyes: String,
    pub hair: String,
    pub favorite_book: String,
    pub future_goals: String,
    pub invited_by: Option<String>,
    pub created_at: String,
}

pub struct NewUser<'a> {
    pub id: &'a str,
    pub name: &'a str,
    pub username: &'a str,
    pub email: &'a str,
    pub password_hash: &'a str,
    pub role: &'a str,
    pub invited_by: Option<&'a str>,
}

/// Editable profile columns.
pub struct ProfileFields<'a> {
    pub name: &'a str,
    pub bio: &'a str,
    pub quote: &'a str,
    pub site_address: Option<&'a str>,
    pub age: u32,
    pub zodiac: &'a str,
    pub height: u32,
    pub weight: u32,
    pub eyes: &'a str,
    pub hair: &'a str,
    pub favorite_book: &'a str,
    pub future_goals: &'a str,
}

#[derive(Debug, Clone)]
pub struct InvitationRow {
    pub id: String,
    pub code: String,
    pub email: String,
    pub sender_id: String,
    pub status: String,
    pub expires_at: String,
    pub created_at: String,
}

pub struct NewInvitation<'a> {
    pub id: &'a str,
    pub code: &'a str,
    pub email: &'a str,
    pub sender_id: &'a str,
    pub expires_at: &'a str,
}

#[derive(Debug, Clone)]
pub struct DonationRow {
    pub id: String,
    pub donor_email: String,
    pub donor_type: String,
    pub amount: u32,
    pub kind: String,
    pub target_id: Option<String>,
    pub model_id: Option<String>,
    pub stripe_payment_id: Option<String>,
    pub stripe_session_id: Option<String>,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
}

pub struct NewDonation<'a> {
    pub id: &'a str,
    pub donor_email: &'a str,
    pub donor_type: &'a str,
    pub amount: u32,
    pub kind: &'a str,
    pub target_id: Option<&'a str>,
    pub model_id: Option<&'a str>,
    pub stripe_payment_id: Option<&'a str>,
    pub stripe_session_id: Option<&'a str>,
}

#[derive(Debug, Clone)]
pub struct GrantRow {
    pub id: String,
    pub kind: String,
    pub target_id: String,
    pub donor_email: String,
    pub donation_id: String,
    pub expires_at: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct PhotoRow {
    pub id: String,
    pub model_id: String,
    pub title: String,
    pub description: String,
    pub original_key: String,
    pub blurred_key: String,
    pub price: u32,
    pub is_active: bool,
    pub unlock_count: u64,
    pub created_at: String,
}

pub struct NewPhoto<'a> {
    pub id: &'a str,
    pub model_id: &'a str,
    pub title: &'a str,
    pub description: &'a str,
    pub original_key: &'a str,
    pub blurred_key: &'a str,
    pub price: u32,
}

#[derive(Debug, Clone)]
pub struct ConversationRow {
    pub id: String,
    pub participant_a: String,
    pub participant_b: String,
    pub last_message_id: Option<String>,
    pub is_active: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl ConversationRow {
    pub fn has_participant(&self, user_id: &str) -> bool {
        self.participant_a == user_id || self.participant_b == user_id
    }

    /// The participant that is not `user_id`.
    pub fn other_participant(&self, user_id: &str) -> &str {
        if self.participant_a == user_id {
            &self.participant_b
        } else {
            &self.participant_a
        }
    }
}

#[derive(Debug, Clone)]
pub struct MessageRow {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub recipient_id: String,
    pub content: String,
    /// JSON array of attachment URLs.
    pub attachments: String,
    pub is_read: bool,
    pub created_at: String,
}

pub struct NewMessage<'a> {
    pub id: &'a str,
    pub sender_id: &'a str,
    pub recipient_id: &'a str,
    pub content: &'a str,
    pub attachments: &'a str,
}
