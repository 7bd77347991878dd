use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Flat platform donation, in whole currency units. Used for signup fees,
/// model-level unlocks and as the default photo price.
pub const PLATFORM_DONATION: u32 = 25;

/// Grant kinds stored on unlock grants.
pub const GRANT_PHOTO: &str = "photo";
pub const GRANT_MODEL: &str = "model";

/// Error returned when a stored or submitted enum value is not recognised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {} '{}'", self.kind, self.value)
    }
}

impl std::error::Error for UnknownVariant {}

// -- Roles --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Model,
    Visitor,
    Admin,
    Superadmin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Model => "model",
            Role::Visitor => "visitor",
            Role::Admin => "admin",
            Role::Superadmin => "superadmin",
        }
    }

    /// Admins and superadmins bypass ownership checks and invitation quotas.
    pub fn is_privileged(&self) -> bool {
        matches!(self, Role::Admin | Role::Superadmin)
    }

    /// True iff this role is one of `allowed`.
    pub fn is_one_of(&self, allowed: &[Role]) -> bool {
        allowed.contains(self)
    }
}

impl FromStr for Role {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "model" => Ok(Role::Model),
            "visitor" => Ok(Role::Visitor),
            "admin" => Ok(Role::Admin),
            "superadmin" => Ok(Role::Superadmin),
            other => Err(UnknownVariant { kind: "role", value: other.to_string() }),
        }
    }
}

// -- Invitations --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvitationStatus {
    Pending,
    Accepted,
    Expired,
}

impl InvitationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvitationStatus::Pending => "pending",
            InvitationStatus::Accepted => "accepted",
            InvitationStatus::Expired => "expired",
        }
    }
}

impl FromStr for InvitationStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(InvitationStatus::Pending),
            "accepted" => Ok(InvitationStatus::Accepted),
            "expired" => Ok(InvitationStatus::Expired),
            other => Err(UnknownVariant { kind: "invitation status", value: other.to_string() }),
        }
    }
}

// -- Donations --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DonationStatus {
    Pending,
    Succeeded,
    Failed,
}

impl DonationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DonationStatus::Pending => "pending",
            DonationStatus::Succeeded => "succeeded",
            DonationStatus::Failed => "failed",
        }
    }

    /// Map a gateway payment status onto the donation lifecycle.
    /// Intermediate gateway states (`processing`, `requires_action`, ...) stay pending.
    pub fn from_gateway(status: &str) -> Self {
        match status {
            "succeeded" | "complete" | "completed" | "paid" => DonationStatus::Succeeded,
            "canceled" | "failed" => DonationStatus::Failed,
            _ => DonationStatus::Pending,
        }
    }
}

impl FromStr for DonationStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DonationStatus::Pending),
            // Older rows used "completed" for the success state.
            "succeeded" | "completed" => Ok(DonationStatus::Succeeded),
            "failed" => Ok(DonationStatus::Failed),
            other => Err(UnknownVariant { kind: "donation status", value: other.to_string() }),
        }
    }
}

/// What a donation pays for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DonationKind {
    /// Unlocks one photo.
    PhotoUnlock,
    /// Unlocks every photo of one model.
    ModelUnlock,
    /// One-time model signup fee.
    ModelSignup,
}

impl DonationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DonationKind::PhotoUnlock => "photo_unlock",
            DonationKind::ModelUnlock => "model_unlock",
            DonationKind::ModelSignup => "model_signup",
        }
    }

    pub fn grants_unlock(&self) -> bool {
        self.grant_kind().is_some()
    }

    /// Kind recorded on the unlock grant this donation produces, if any.
    pub fn grant_kind(&self) -> Option<&'static str> {
        match self {
            DonationKind::PhotoUnlock => Some(GRANT_PHOTO),
            DonationKind::ModelUnlock => Some(GRANT_MODEL),
            DonationKind::ModelSignup => None,
        }
    }
}

impl FromStr for DonationKind {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "photo_unlock" => Ok(DonationKind::PhotoUnlock),
            "model_unlock" => Ok(DonationKind::ModelUnlock),
            "model_signup" => Ok(DonationKind::ModelSignup),
            other => Err(UnknownVariant { kind: "donation kind", value: other.to_string() }),
        }
    }
}
