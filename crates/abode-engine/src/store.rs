//! SQLite-backed implementations of the engine's ports.

use anyhow::Result;
use chrono::{DateTime, Utc};

use abode_db::Database;
use abode_types::models::{Housing, Message, PushToken, ReminderItem, User, Visit, VisitStatus};
use abode_types::{HousingRef, ReminderId, UserId, VisitId};

use crate::ports::{
    DirectoryLookup, HousingLookup, MessageStore, PushTokenStore, ReminderStore, VisitStore,
};

impl VisitStore for Database {
    fn insert_visit(&self, visit: &Visit) -> Result<()> {
        Database::insert_visit(self, visit)
    }

    fn get_visit(&self, id: &VisitId) -> Result<Option<Visit>> {
        Database::get_visit(self, id)
    }

    fn update_status(
        &self,
        id: &VisitId,
        expected: VisitStatus,
        next: VisitStatus,
        validated_by_requester: bool,
        now: &DateTime<Utc>,
    ) -> Result<bool> {
        self.update_visit_status(id, expected, next, validated_by_requester, now)
    }

    fn link_review(&self, id: &VisitId, review_id: &str, now: &DateTime<Utc>) -> Result<bool> {
        self.link_visit_review(id, review_id, now)
    }
}

impl MessageStore for Database {
    fn insert_message(&self, message: &Message) -> Result<()> {
        Database::insert_message(self, message)
    }

    fn messages_for_visit(&self, visit_id: &VisitId) -> Result<Vec<Message>> {
        self.get_messages(visit_id)
    }

    fn mark_read(&self, visit_id: &VisitId, receiver_id: &UserId) -> Result<usize> {
        self.mark_messages_read(visit_id, receiver_id)
    }
}

impl ReminderStore for Database {
    fn insert_batch(&self, items: &[ReminderItem]) -> Result<()> {
        self.insert_reminders(items)
    }

    fn insert_one(&self, item: &ReminderItem) -> Result<()> {
        self.insert_reminder(item)
    }

    fn due_between(&self, from: &DateTime<Utc>, to: &DateTime<Utc>) -> Result<Vec<ReminderItem>> {
        self.get_due_reminders(from, to)
    }

    fn mark_delivered(&self, id: &ReminderId) -> Result<bool> {
        self.mark_reminder_delivered(id)
    }

    fn for_visit(&self, visit_id: &VisitId) -> Result<Vec<ReminderItem>> {
        self.get_reminders_for_visit(visit_id)
    }
}

impl PushTokenStore for Database {
    fn register(&self, token: &PushToken, now: &DateTime<Utc>) -> Result<()> {
        self.upsert_push_token(token, now)
    }

    fn tokens_for(&self, user_id: &UserId) -> Result<Vec<PushToken>> {
        self.get_push_tokens(user_id)
    }

    fn remove(&self, user_id: &UserId, token: &str) -> Result<bool> {
        self.delete_push_token(user_id, token)
    }
}

impl DirectoryLookup for Database {
    fn find_by_id(&self, id: &UserId) -> Result<Option<User>> {
        self.get_user_by_id(id)
    }
}

impl HousingLookup for Database {
    fn find_by_id_or_external_key(&self, key: &HousingRef) -> Result<Option<Housing>> {
        match key {
            HousingRef::Id(id) => match self.get_housing_by_id(id)? {
                Some(housing) => Ok(Some(housing)),
                // Some listing sources issue UUID-shaped keys of their own.
                None => self.get_housing_by_external_key(&id.to_string()),
            },
            HousingRef::ExternalKey(key) => self.get_housing_by_external_key(key),
        }
    }
}
