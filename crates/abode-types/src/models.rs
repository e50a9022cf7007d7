use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{HousingId, MessageId, ReminderId, UserId, VisitId};

/// Directory entry for a user, as seen by other components.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub display_name: String,
    pub contact: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Housing {
    pub id: HousingId,
    pub owner_id: UserId,
    pub title: String,
    pub address: String,
    pub external_key: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VisitStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
    Refused,
}

impl VisitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Refused => "refused",
        }
    }

    /// Completed, cancelled and refused visits accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Refused)
    }
}

impl fmt::Display for VisitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: {raw:?}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub raw: String,
}

impl FromStr for VisitStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "confirmed" => Ok(Self::Confirmed),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            "refused" => Ok(Self::Refused),
            other => Err(UnknownVariant {
                kind: "visit status",
                raw: other.to_string(),
            }),
        }
    }
}

/// The side of a visit an actor claims to act for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActorRole {
    Requester,
    Host,
}

impl ActorRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Requester => "requester",
            Self::Host => "host",
        }
    }
}

impl fmt::Display for ActorRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActorRole {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "requester" => Ok(Self::Requester),
            "host" => Ok(Self::Host),
            other => Err(UnknownVariant {
                kind: "actor role",
                raw: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Visit {
    pub id: VisitId,
    pub housing_id: HousingId,
    pub requester_id: UserId,
    pub scheduled_at: DateTime<Utc>,
    pub status: VisitStatus,
    pub validated_by_requester: bool,
    pub notes: Option<String>,
    pub contact_phone: Option<String>,
    pub attached_documents: Vec<String>,
    pub linked_review_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderItem {
    pub id: ReminderId,
    pub visit_id: VisitId,
    pub recipient_id: UserId,
    pub recipient_role: ActorRole,
    pub fire_at: DateTime<Utc>,
    pub title: String,
    pub body: String,
    pub delivered: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub visit_id: VisitId,
    pub sender_id: UserId,
    /// `None` when no counter-party could be resolved at send time.
    pub receiver_id: Option<UserId>,
    pub content: Option<String>,
    pub attachments: Vec<String>,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Platform {
    Android,
    Ios,
    Web,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Android => "ANDROID",
            Self::Ios => "IOS",
            Self::Web => "WEB",
        }
    }
}

impl FromStr for Platform {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ANDROID" => Ok(Self::Android),
            "IOS" => Ok(Self::Ios),
            "WEB" => Ok(Self::Web),
            _ => Err(UnknownVariant {
                kind: "platform",
                raw: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushToken {
    pub user_id: UserId,
    pub platform: Platform,
    pub token: String,
}
