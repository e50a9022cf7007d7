use crate::Database;
use crate::models::{
    HousingRow, MessageRow, ReminderRow, UserRow, VisitRow, encode_list, encode_ts,
};
use abode_types::models::{
    Housing, Message, Platform, PushToken, ReminderItem, User, Visit, VisitStatus,
};
use abode_types::{HousingId, ReminderId, UserId, VisitId};
use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row};
use tracing::warn;

const VISIT_COLUMNS: &str = "id, housing_id, requester_id, scheduled_at, status, \
     validated_by_requester, notes, contact_phone, attached_documents, linked_review_id, \
     created_at, updated_at";

const MESSAGE_COLUMNS: &str =
    "id, visit_id, sender_id, receiver_id, content, attachments, read, created_at";

const REMINDER_COLUMNS: &str =
    "id, visit_id, recipient_id, recipient_role, fire_at, title, body, delivered";

impl Database {
    // -- Users --

    pub fn create_user(
        &self,
        id: &UserId,
        username: &str,
        password_hash: &str,
        display_name: &str,
        contact: Option<&str>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, password, display_name, contact) VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![id.to_string(), username, password_hash, display_name, contact],
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "username", username))
    }

    pub fn get_user_by_id(&self, id: &UserId) -> Result<Option<User>> {
        self.with_conn(|conn| query_user(conn, "id", &id.to_string()))?
            .map(User::try_from)
            .transpose()
    }

    // -- Housings --

    pub fn insert_housing(&self, housing: &Housing) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO housings (id, owner_id, title, address, external_key) VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    housing.id.to_string(),
                    housing.owner_id.to_string(),
                    housing.title,
                    housing.address,
                    housing.external_key,
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_housing_by_id(&self, id: &HousingId) -> Result<Option<Housing>> {
        self.with_conn(|conn| query_housing(conn, "id", &id.to_string()))?
            .map(Housing::try_from)
            .transpose()
    }

    pub fn get_housing_by_external_key(&self, key: &str) -> Result<Option<Housing>> {
        self.with_conn(|conn| query_housing(conn, "external_key", key))?
            .map(Housing::try_from)
            .transpose()
    }

    // -- Visits --

    pub fn insert_visit(&self, visit: &Visit) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                &format!(
                    "INSERT INTO visits ({VISIT_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
                ),
                rusqlite::params![
                    visit.id.to_string(),
                    visit.housing_id.to_string(),
                    visit.requester_id.to_string(),
                    encode_ts(&visit.scheduled_at),
                    visit.status.as_str(),
                    visit.validated_by_requester,
                    visit.notes,
                    visit.contact_phone,
                    encode_list(&visit.attached_documents),
                    visit.linked_review_id,
                    encode_ts(&visit.created_at),
                    encode_ts(&visit.updated_at),
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_visit(&self, id: &VisitId) -> Result<Option<Visit>> {
        let row = self.with_conn(|conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {VISIT_COLUMNS} FROM visits WHERE id = ?1"))?;
            stmt.query_row([id.to_string()], visit_row).optional()
        })?;
        row.map(Visit::try_from).transpose()
    }

    /// Conditional status update: only applies while the stored status is still
    /// `expected`. Returns false when another writer got there first.
    pub fn update_visit_status(
        &self,
        id: &VisitId,
        expected: VisitStatus,
        next: VisitStatus,
        validated_by_requester: bool,
        now: &DateTime<Utc>,
    ) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE visits SET status = ?1, validated_by_requester = ?2, updated_at = ?3
                 WHERE id = ?4 AND status = ?5",
                rusqlite::params![
                    next.as_str(),
                    validated_by_requester,
                    encode_ts(now),
                    id.to_string(),
                    expected.as_str(),
                ],
            )?;
            Ok(changed == 1)
        })
    }

    /// Sets the review link once. Returns false if already linked.
    pub fn link_visit_review(&self, id: &VisitId, review_id: &str, now: &DateTime<Utc>) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE visits SET linked_review_id = ?1, updated_at = ?2
                 WHERE id = ?3 AND linked_review_id IS NULL",
                rusqlite::params![review_id, encode_ts(now), id.to_string()],
            )?;
            Ok(changed == 1)
        })
    }

    // -- Messages --

    pub fn insert_message(&self, message: &Message) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                &format!("INSERT INTO messages ({MESSAGE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"),
                rusqlite::params![
                    message.id.to_string(),
                    message.visit_id.to_string(),
                    message.sender_id.to_string(),
                    message.receiver_id.map(|id| id.to_string()),
                    message.content,
                    encode_list(&message.attachments),
                    message.read,
                    encode_ts(&message.created_at),
                ],
            )?;
            Ok(())
        })
    }

    /// All messages of a visit, oldest first.
    pub fn get_messages(&self, visit_id: &VisitId) -> Result<Vec<Message>> {
        let rows = self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages WHERE visit_id = ?1 ORDER BY created_at ASC, rowid ASC"
            ))?;
            let rows = stmt
                .query_map([visit_id.to_string()], message_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;
        rows.into_iter().map(Message::try_from).collect()
    }

    pub fn mark_messages_read(&self, visit_id: &VisitId, receiver_id: &UserId) -> Result<usize> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE messages SET read = 1 WHERE visit_id = ?1 AND receiver_id = ?2 AND read = 0",
                rusqlite::params![visit_id.to_string(), receiver_id.to_string()],
            )?;
            Ok(changed)
        })
    }

    // -- Reminders --

    /// Inserts all items in one transaction; nothing is written on failure.
    pub fn insert_reminders(&self, items: &[ReminderItem]) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            for item in items {
                insert_reminder_row(&tx, item)?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    pub fn insert_reminder(&self, item: &ReminderItem) -> Result<()> {
        self.with_conn(|conn| insert_reminder_row(conn, item))
    }

    /// Undelivered reminders with `fire_at` inside `[from, to]`. Rows that
    /// fail to decode are logged and left out.
    pub fn get_due_reminders(&self, from: &DateTime<Utc>, to: &DateTime<Utc>) -> Result<Vec<ReminderItem>> {
        let rows = self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {REMINDER_COLUMNS} FROM reminders
                 WHERE delivered = 0 AND fire_at >= ?1 AND fire_at <= ?2
                 ORDER BY fire_at ASC"
            ))?;
            let rows = stmt
                .query_map([encode_ts(from), encode_ts(to)], reminder_row)?
                .collect::<Vec<_>>();
            Ok(rows)
        })?;

        let items = rows
            .into_iter()
            .filter_map(|row| {
                match row.map_err(anyhow::Error::from).and_then(ReminderItem::try_from) {
                    Ok(item) => Some(item),
                    Err(e) => {
                        warn!("Skipping undecodable reminder row: {}", e);
                        None
                    }
                }
            })
            .collect();
        Ok(items)
    }

    pub fn get_reminders_for_visit(&self, visit_id: &VisitId) -> Result<Vec<ReminderItem>> {
        let rows = self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {REMINDER_COLUMNS} FROM reminders WHERE visit_id = ?1 ORDER BY fire_at ASC"
            ))?;
            let rows = stmt
                .query_map([visit_id.to_string()], reminder_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;
        rows.into_iter().map(ReminderItem::try_from).collect()
    }

    /// Flips `delivered` once. Returns false if it was already set.
    pub fn mark_reminder_delivered(&self, id: &ReminderId) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE reminders SET delivered = 1 WHERE id = ?1 AND delivered = 0",
                [id.to_string()],
            )?;
            Ok(changed == 1)
        })
    }

    // -- Push tokens --

    /// Registering the same token again for a user replaces the old registration.
    pub fn upsert_push_token(&self, token: &PushToken, now: &DateTime<Utc>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO push_tokens (user_id, token, platform, updated_at) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(user_id, token) DO UPDATE SET platform = excluded.platform, updated_at = excluded.updated_at",
                rusqlite::params![
                    token.user_id.to_string(),
                    token.token,
                    token.platform.as_str(),
                    encode_ts(now),
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_push_tokens(&self, user_id: &UserId) -> Result<Vec<PushToken>> {
        let rows = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT platform, token FROM push_tokens WHERE user_id = ?1 ORDER BY updated_at DESC",
            )?;
            let rows = stmt
                .query_map([user_id.to_string()], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;

        rows.into_iter()
            .map(|(platform, token)| {
                Ok::<_, anyhow::Error>(PushToken {
                    user_id: *user_id,
                    platform: platform.parse::<Platform>()?,
                    token,
                })
            })
            .collect()
    }

    pub fn delete_push_token(&self, user_id: &UserId, token: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "DELETE FROM push_tokens WHERE user_id = ?1 AND token = ?2",
                rusqlite::params![user_id.to_string(), token],
            )?;
            Ok(changed == 1)
        })
    }
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT id, username, password, display_name, contact, created_at FROM users WHERE {column} = ?1"
    ))?;

    stmt.query_row([value], |row| {
        Ok(UserRow {
            id: row.get(0)?,
            username: row.get(1)?,
            password: row.get(2)?,
            display_name: row.get(3)?,
            contact: row.get(4)?,
            created_at: row.get(5)?,
        })
    })
    .optional()
}

fn query_housing(conn: &Connection, column: &str, value: &str) -> Result<Option<HousingRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT id, owner_id, title, address, external_key FROM housings WHERE {column} = ?1"
    ))?;

    stmt.query_row([value], |row| {
        Ok(HousingRow {
            id: row.get(0)?,
            owner_id: row.get(1)?,
            title: row.get(2)?,
            address: row.get(3)?,
            external_key: row.get(4)?,
        })
    })
    .optional()
}

fn visit_row(row: &Row<'_>) -> rusqlite::Result<VisitRow> {
    Ok(VisitRow {
        id: row.get(0)?,
        housing_id: row.get(1)?,
        requester_id: row.get(2)?,
        scheduled_at: row.get(3)?,
        status: row.get(4)?,
        validated_by_requester: row.get(5)?,
        notes: row.get(6)?,
        contact_phone: row.get(7)?,
        attached_documents: row.get(8)?,
        linked_review_id: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

fn message_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        visit_id: row.get(1)?,
        sender_id: row.get(2)?,
        receiver_id: row.get(3)?,
        content: row.get(4)?,
        attachments: row.get(5)?,
        read: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn reminder_row(row: &Row<'_>) -> rusqlite::Result<ReminderRow> {
    Ok(ReminderRow {
        id: row.get(0)?,
        visit_id: row.get(1)?,
        recipient_id: row.get(2)?,
        recipient_role: row.get(3)?,
        fire_at: row.get(4)?,
        title: row.get(5)?,
        body: row.get(6)?,
        delivered: row.get(7)?,
    })
}

fn insert_reminder_row(conn: &Connection, item: &ReminderItem) -> Result<()> {
    conn.execute(
        &format!("INSERT INTO reminders ({REMINDER_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"),
        rusqlite::params![
            item.id.to_string(),
            item.visit_id.to_string(),
            item.recipient_id.to_string(),
            item.recipient_role.as_str(),
            encode_ts(&item.fire_at),
            item.title,
            item.body,
            item.delivered,
        ],
    )?;
    Ok(())
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
