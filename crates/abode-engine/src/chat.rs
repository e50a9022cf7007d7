use std::sync::Arc;

use tracing::{debug, info};

use abode_types::models::{Message, Visit};
use abode_types::{MessageId, UserId, VisitId};

use crate::clock::Clock;
use crate::conversation::ConversationAuthorizer;
use crate::error::{EngineError, Result, blocking};
use crate::notify::Notifier;
use crate::ports::{MessageStore, Notification, VisitStore};

pub const MAX_CONTENT_CHARS: usize = 4000;
pub const MAX_ATTACHMENTS: usize = 10;

/// A stored message plus whoever the push notification went to.
#[derive(Debug, Clone)]
pub struct SentMessage {
    pub message: Message,
    pub notified: Option<UserId>,
}

/// Result of [`ChatService::mark_read`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadReceipt {
    pub updated: usize,
    /// Who should hear that their messages were read.
    pub counterparty: Option<UserId>,
}

/// Message store gated by [`ConversationAuthorizer`].
#[derive(Clone)]
pub struct ChatService {
    visits: Arc<dyn VisitStore>,
    messages: Arc<dyn MessageStore>,
    authorizer: ConversationAuthorizer,
    notifier: Notifier,
    clock: Arc<dyn Clock>,
}

impl ChatService {
    pub fn new(
        visits: Arc<dyn VisitStore>,
        messages: Arc<dyn MessageStore>,
        authorizer: ConversationAuthorizer,
        notifier: Notifier,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            visits,
            messages,
            authorizer,
            notifier,
            clock,
        }
    }

    pub fn authorizer(&self) -> &ConversationAuthorizer {
        &self.authorizer
    }

    fn load(&self, id: &VisitId) -> Result<Visit> {
        self.visits
            .get_visit(id)?
            .ok_or_else(|| EngineError::not_found("visit", id))
    }

    pub async fn send_message(
        &self,
        visit_id: &VisitId,
        sender: &UserId,
        content: Option<String>,
        attachments: Vec<String>,
    ) -> Result<SentMessage> {
        let this = self.clone();
        let (visit_id, sender) = (*visit_id, *sender);
        let sent = blocking(move || this.store_message(&visit_id, &sender, content, attachments)).await?;

        match sent.notified {
            Some(target) => {
                let message = &sent.message;
                let preview = match &message.content {
                    Some(text) => text.chars().take(120).collect::<String>(),
                    None => "Sent an attachment".to_string(),
                };
                let notification = Notification::new("New message", preview)
                    .with("type", "chat_message")
                    .with("visit_id", message.visit_id)
                    .with("message_id", message.id);
                self.notifier.notify_best_effort(&target, &notification).await;
            }
            None => debug!("Message {}: no receiver, notification skipped", sent.message.id),
        }

        Ok(sent)
    }

    /// Authorization, validation and insert; returns who to notify.
    fn store_message(
        &self,
        visit_id: &VisitId,
        sender: &UserId,
        content: Option<String>,
        attachments: Vec<String>,
    ) -> Result<SentMessage> {
        let visit = self.load(visit_id)?;
        let access = self.authorizer.authorize(&visit, sender)?;

        let content = content
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());
        let attachments: Vec<String> = attachments
            .into_iter()
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty())
            .collect();
        validate_body(content.as_deref(), &attachments)?;

        let receiver_id = self.authorizer.resolve_receiver(&visit, sender, &access)?;
        let message = Message {
            id: MessageId::new(),
            visit_id: visit.id,
            sender_id: *sender,
            receiver_id,
            content,
            attachments,
            read: false,
            created_at: self.clock.now(),
        };
        self.messages.insert_message(&message)?;

        info!(
            "Message {} on visit {} from {} ({})",
            message.id,
            visit.id,
            sender,
            access.role.as_str()
        );

        // The stored receiver can be empty; look again for the push target.
        let notified = self
            .authorizer
            .resolve_receiver(&visit, sender, &access)
            .unwrap_or_default();
        Ok(SentMessage { message, notified })
    }

    pub fn list_messages(&self, visit_id: &VisitId, actor: &UserId) -> Result<Vec<Message>> {
        let visit = self.load(visit_id)?;
        self.authorizer.authorize(&visit, actor)?;
        Ok(self.messages.messages_for_visit(visit_id)?)
    }

    /// Marks every message addressed to `actor` as read.
    pub fn mark_read(&self, visit_id: &VisitId, actor: &UserId) -> Result<ReadReceipt> {
        let visit = self.load(visit_id)?;
        let access = self.authorizer.authorize(&visit, actor)?;
        let updated = self.messages.mark_read(visit_id, actor)?;
        Ok(ReadReceipt {
            updated,
            counterparty: access.counterparty,
        })
    }
}

fn validate_body(content: Option<&str>, attachments: &[String]) -> Result<()> {
    if content.is_none() && attachments.is_empty() {
        return Err(EngineError::Validation(
            "a message needs content or at least one attachment".into(),
        ));
    }
    if content.is_some_and(|c| c.chars().count() > MAX_CONTENT_CHARS) {
        return Err(EngineError::Validation(format!(
            "message content exceeds {MAX_CONTENT_CHARS} characters"
        )));
    }
    if attachments.len() > MAX_ATTACHMENTS {
        return Err(EngineError::Validation(format!(
            "at most {MAX_ATTACHMENTS} attachments per message"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::conversation::FallbackPolicy;
    use crate::notify::testing::RecordingPush;
    use abode_db::Database;
    use abode_types::HousingId;
    use abode_types::models::{Housing, Platform, PushToken, VisitStatus};
    use chrono::{TimeZone, Utc};

    struct Setup {
        db: Arc<Database>,
        push: Arc<RecordingPush>,
        chat: ChatService,
        visit: Visit,
        host: UserId,
    }

    fn setup(status: VisitStatus, with_housing: bool) -> Setup {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let push = Arc::new(RecordingPush::default());
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();
        let host = UserId::new();
        let housing_id = HousingId::new();

        if with_housing {
            db.insert_housing(&Housing {
                id: housing_id,
                owner_id: host,
                title: "Loft".into(),
                address: "1 quai".into(),
                external_key: None,
            })
            .unwrap();
        }
        db.upsert_push_token(
            &PushToken {
                user_id: host,
                platform: Platform::Web,
                token: "host-browser".into(),
            },
            &now,
        )
        .unwrap();

        let visit = Visit {
            id: VisitId::new(),
            housing_id,
            requester_id: UserId::new(),
            scheduled_at: Utc.with_ymd_and_hms(2025, 3, 10, 10, 0, 0).unwrap(),
            status,
            validated_by_requester: false,
            notes: None,
            contact_phone: None,
            attached_documents: vec![],
            linked_review_id: None,
            created_at: now,
            updated_at: now,
        };
        db.insert_visit(&visit).unwrap();

        let notifier = Notifier::new(db.clone(), push.clone(), std::time::Duration::from_secs(5));
        let authorizer = ConversationAuthorizer::new(db.clone(), db.clone(), FallbackPolicy::Permissive);
        let chat = ChatService::new(
            db.clone(),
            db.clone(),
            authorizer,
            notifier,
            Arc::new(ManualClock::new(now)),
        );

        Setup {
            db,
            push,
            chat,
            visit,
            host,
        }
    }

    #[tokio::test]
    async fn requester_message_reaches_host() {
        let s = setup(VisitStatus::Confirmed, true);
        let sent = s
            .chat
            .send_message(&s.visit.id, &s.visit.requester_id, Some(" Bonjour ".into()), vec![])
            .await
            .unwrap();

        assert_eq!(sent.message.receiver_id, Some(s.host));
        assert_eq!(sent.message.content.as_deref(), Some("Bonjour"));
        assert_eq!(sent.notified, Some(s.host));
        assert_eq!(s.push.calls().len(), 1);
        assert_eq!(s.db.get_messages(&s.visit.id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn pending_visit_rejects_everyone() {
        let s = setup(VisitStatus::Pending, true);
        for actor in [s.visit.requester_id, s.host, UserId::new()] {
            let err = s
                .chat
                .send_message(&s.visit.id, &actor, Some("hi".into()), vec![])
                .await
                .unwrap_err();
            assert!(matches!(err, EngineError::Forbidden { .. }));
        }
        assert!(s.db.get_messages(&s.visit.id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn requester_can_send_without_resolvable_host() {
        let s = setup(VisitStatus::Confirmed, false);
        let sent = s
            .chat
            .send_message(&s.visit.id, &s.visit.requester_id, None, vec!["plan.pdf".into()])
            .await
            .unwrap();

        assert_eq!(sent.message.receiver_id, None);
        assert_eq!(sent.notified, None);
        assert!(s.push.calls().is_empty());
    }

    #[tokio::test]
    async fn empty_and_oversized_bodies_are_rejected() {
        let s = setup(VisitStatus::Confirmed, true);
        let requester = s.visit.requester_id;

        let empty = s
            .chat
            .send_message(&s.visit.id, &requester, Some("   ".into()), vec![" ".into()])
            .await;
        assert!(matches!(empty, Err(EngineError::Validation(_))));

        let long = "x".repeat(MAX_CONTENT_CHARS + 1);
        let too_long = s.chat.send_message(&s.visit.id, &requester, Some(long), vec![]).await;
        assert!(matches!(too_long, Err(EngineError::Validation(_))));
    }

    #[tokio::test]
    async fn push_failure_does_not_fail_the_send() {
        let mut s = setup(VisitStatus::Confirmed, true);
        let notifier = Notifier::new(
            s.db.clone(),
            Arc::new(RecordingPush {
                fail: true,
                ..Default::default()
            }),
            std::time::Duration::from_secs(5),
        );
        s.chat.notifier = notifier;

        let sent = s
            .chat
            .send_message(&s.visit.id, &s.visit.requester_id, Some("still here".into()), vec![])
            .await;
        assert!(sent.is_ok());
    }

    #[tokio::test]
    async fn mark_read_only_touches_the_actors_inbox() {
        let s = setup(VisitStatus::Confirmed, true);
        let requester = s.visit.requester_id;
        s.chat.send_message(&s.visit.id, &requester, Some("a".into()), vec![]).await.unwrap();
        s.chat.send_message(&s.visit.id, &requester, Some("b".into()), vec![]).await.unwrap();
        s.chat.send_message(&s.visit.id, &s.host, Some("c".into()), vec![]).await.unwrap();

        let receipt = s.chat.mark_read(&s.visit.id, &s.host).unwrap();
        assert_eq!(receipt.updated, 2);
        assert_eq!(receipt.counterparty, Some(requester));
        assert_eq!(s.chat.mark_read(&s.visit.id, &s.host).unwrap().updated, 0);

        let listed = s.chat.list_messages(&s.visit.id, &requester).unwrap();
        assert_eq!(listed.iter().filter(|m| m.read).count(), 2);
    }

    #[test]
    fn unknown_visit_is_not_found() {
        let s = setup(VisitStatus::Confirmed, true);
        assert!(matches!(
            s.chat.list_messages(&VisitId::new(), &s.host),
            Err(EngineError::NotFound { kind: "visit", .. })
        ));
    }
}
