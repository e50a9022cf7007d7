//! Contracts the engine consumes.
//!
//! Stores and lookups are synchronous (SQLite behind a mutex) and the engine
//! only calls them from the blocking pool; push delivery goes over the network
//! and is async.

use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use abode_types::models::{Housing, Message, PushToken, ReminderItem, User, Visit, VisitStatus};
use abode_types::{HousingRef, ReminderId, UserId, VisitId};

pub trait VisitStore: Send + Sync {
    fn insert_visit(&self, visit: &Visit) -> Result<()>;
    fn get_visit(&self, id: &VisitId) -> Result<Option<Visit>>;
    /// Applies only while the stored status equals `expected`.
    fn update_status(
        &self,
        id: &VisitId,
        expected: VisitStatus,
        next: VisitStatus,
        validated_by_requester: bool,
        now: &DateTime<Utc>,
    ) -> Result<bool>;
    fn link_review(&self, id: &VisitId, review_id: &str, now: &DateTime<Utc>) -> Result<bool>;
}

pub trait MessageStore: Send + Sync {
    fn insert_message(&self, message: &Message) -> Result<()>;
    /// Oldest first.
    fn messages_for_visit(&self, visit_id: &VisitId) -> Result<Vec<Message>>;
    fn mark_read(&self, visit_id: &VisitId, receiver_id: &UserId) -> Result<usize>;
}

pub trait ReminderStore: Send + Sync {
    /// All or nothing.
    fn insert_batch(&self, items: &[ReminderItem]) -> Result<()>;
    fn insert_one(&self, item: &ReminderItem) -> Result<()>;
    /// Undelivered items with `fire_at` in `[from, to]`.
    fn due_between(&self, from: &DateTime<Utc>, to: &DateTime<Utc>) -> Result<Vec<ReminderItem>>;
    /// Returns false if the item was already delivered.
    fn mark_delivered(&self, id: &ReminderId) -> Result<bool>;
    fn for_visit(&self, visit_id: &VisitId) -> Result<Vec<ReminderItem>>;
}

pub trait PushTokenStore: Send + Sync {
    fn register(&self, token: &PushToken, now: &DateTime<Utc>) -> Result<()>;
    fn tokens_for(&self, user_id: &UserId) -> Result<Vec<PushToken>>;
    fn remove(&self, user_id: &UserId, token: &str) -> Result<bool>;
}

pub trait DirectoryLookup: Send + Sync {
    fn find_by_id(&self, id: &UserId) -> Result<Option<User>>;
}

pub trait HousingLookup: Send + Sync {
    fn find_by_id_or_external_key(&self, key: &HousingRef) -> Result<Option<Housing>>;
}

/// Payload handed to a [`PushDeliverer`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub data: BTreeMap<String, String>,
}

impl Notification {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            data: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl ToString) -> Self {
        self.data.insert(key.to_string(), value.to_string());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenOutcome {
    Delivered,
    Failed { code: String },
}

impl TokenOutcome {
    /// Provider codes meaning the token will never work again.
    pub fn is_dead_token(&self) -> bool {
        matches!(self, Self::Failed { code } if code == "UNREGISTERED" || code == "INVALID_TOKEN")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenResult {
    pub token: String,
    pub outcome: TokenOutcome,
}

/// Raw push transport.
#[async_trait]
pub trait PushDeliverer: Send + Sync {
    async fn send(&self, tokens: &[String], notification: &Notification) -> Result<Vec<TokenResult>>;
}
