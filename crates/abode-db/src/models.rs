//! Database row types. These map directly to SQLite rows and are converted
//! into abode-types models at the edge of this crate.

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};

use abode_types::models::{Housing, Message, ReminderItem, User, Visit};

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub password: String,
    pub display_name: String,
    pub contact: Option<String>,
    pub created_at: String,
}

pub struct HousingRow {
    pub id: String,
    pub owner_id: String,
    pub title: String,
    pub address: String,
    pub external_key: Option<String>,
}

pub struct VisitRow {
    pub id: String,
    pub housing_id: String,
    pub requester_id: String,
    pub scheduled_at: String,
    pub status: String,
    pub validated_by_requester: bool,
    pub notes: Option<String>,
    pub contact_phone: Option<String>,
    pub attached_documents: String,
    pub linked_review_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

pub struct MessageRow {
    pub id: String,
    pub visit_id: String,
    pub sender_id: String,
    pub receiver_id: Option<String>,
    pub content: Option<String>,
    pub attachments: String,
    pub read: bool,
    pub created_at: String,
}

pub struct ReminderRow {
    pub id: String,
    pub visit_id: String,
    pub recipient_id: String,
    pub recipient_role: String,
    pub fire_at: String,
    pub title: String,
    pub body: String,
    pub delivered: bool,
}

/// Fixed-width UTC text so that string order equals time order in SQL.
pub fn encode_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn decode_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("corrupt timestamp {raw:?}"))
}

fn decode_list(raw: &str) -> Result<Vec<String>> {
    serde_json::from_str(raw).with_context(|| format!("corrupt string list {raw:?}"))
}

pub(crate) fn encode_list(items: &[String]) -> String {
    serde_json::to_string(items).unwrap_or_else(|_| "[]".to_string())
}

impl TryFrom<UserRow> for User {
    type Error = anyhow::Error;

    fn try_from(row: UserRow) -> Result<Self> {
        Ok(User {
            id: row.id.parse()?,
            display_name: row.display_name,
            contact: row.contact,
        })
    }
}

impl TryFrom<HousingRow> for Housing {
    type Error = anyhow::Error;

    fn try_from(row: HousingRow) -> Result<Self> {
        Ok(Housing {
            id: row.id.parse()?,
            owner_id: row.owner_id.parse()?,
            title: row.title,
            address: row.address,
            external_key: row.external_key,
        })
    }
}

impl TryFrom<VisitRow> for Visit {
    type Error = anyhow::Error;

    fn try_from(row: VisitRow) -> Result<Self> {
        Ok(Visit {
            id: row.id.parse()?,
            housing_id: row.housing_id.parse()?,
            requester_id: row.requester_id.parse()?,
            scheduled_at: decode_ts(&row.scheduled_at)?,
            status: row.status.parse()?,
            validated_by_requester: row.validated_by_requester,
            notes: row.notes,
            contact_phone: row.contact_phone,
            attached_documents: decode_list(&row.attached_documents)?,
            linked_review_id: row.linked_review_id,
            created_at: decode_ts(&row.created_at)?,
            updated_at: decode_ts(&row.updated_at)?,
        })
    }
}

impl TryFrom<MessageRow> for Message {
    type Error = anyhow::Error;

    fn try_from(row: MessageRow) -> Result<Self> {
        Ok(Message {
            id: row.id.parse()?,
            visit_id: row.visit_id.parse()?,
            sender_id: row.sender_id.parse()?,
            receiver_id: row.receiver_id.as_deref().map(str::parse).transpose()?,
            content: row.content,
            attachments: decode_list(&row.attachments)?,
            read: row.read,
            created_at: decode_ts(&row.created_at)?,
        })
    }
}

impl TryFrom<ReminderRow> for ReminderItem {
    type Error = anyhow::Error;

    fn try_from(row: ReminderRow) -> Result<Self> {
        Ok(ReminderItem {
            id: row.id.parse()?,
            visit_id: row.visit_id.parse()?,
            recipient_id: row.recipient_id.parse()?,
            recipient_role: row.recipient_role.parse()?,
            fire_at: decode_ts(&row.fire_at)?,
            title: row.title,
            body: row.body,
            delivered: row.delivered,
        })
    }
}
