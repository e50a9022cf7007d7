//! Who may chat about a visit, and with whom.
//!
//! Access is derived, not stored: the requester and the housing owner are the
//! natural parties, anyone already present in the visit's message history is
//! a participant, and [`provisional_access`] decides the last-resort case.

use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use abode_types::models::{Message, Visit, VisitStatus};
use abode_types::{HousingRef, UserId};

use crate::error::{EngineError, Result};
use crate::ports::{HousingLookup, MessageStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    Requester,
    Host,
    Participant,
    /// Let in by [`provisional_access`]; treated as the requester side.
    ProvisionalRequester,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Requester => "requester",
            Self::Host => "host",
            Self::Participant => "participant",
            Self::ProvisionalRequester => "provisional requester",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChatAccess {
    pub role: ChatRole,
    pub counterparty: Option<UserId>,
}

/// How to treat an actor who matches none of the known parties of a
/// confirmed visit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FallbackPolicy {
    /// Admit as the requester side, so a first message is never lost to an
    /// upstream id mix-up.
    #[default]
    Permissive,
    /// Deny.
    Strict,
}

impl FromStr for FallbackPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "permissive" => Ok(Self::Permissive),
            "strict" => Ok(Self::Strict),
            other => Err(format!("unknown chat fallback policy {other:?}")),
        }
    }
}

/// The single place the last-resort chat admission is decided.
pub fn provisional_access(
    policy: FallbackPolicy,
    visit: &Visit,
    actor: &UserId,
    verified_host: Option<&UserId>,
) -> bool {
    policy == FallbackPolicy::Permissive
        && visit.status == VisitStatus::Confirmed
        && verified_host != Some(actor)
}

#[derive(Clone)]
pub struct ConversationAuthorizer {
    housing: Arc<dyn HousingLookup>,
    messages: Arc<dyn MessageStore>,
    policy: FallbackPolicy,
}

impl ConversationAuthorizer {
    pub fn new(
        housing: Arc<dyn HousingLookup>,
        messages: Arc<dyn MessageStore>,
        policy: FallbackPolicy,
    ) -> Self {
        Self {
            housing,
            messages,
            policy,
        }
    }

    /// Owner of the visit's housing. A failing lookup counts as unresolved.
    pub fn resolve_host(&self, visit: &Visit) -> Option<UserId> {
        match self
            .housing
            .find_by_id_or_external_key(&HousingRef::Id(visit.housing_id))
        {
            Ok(Some(housing)) => Some(housing.owner_id),
            Ok(None) => {
                debug!("Visit {}: housing {} not found", visit.id, visit.housing_id);
                None
            }
            Err(e) => {
                warn!("Visit {}: housing lookup failed: {}", visit.id, e);
                None
            }
        }
    }

    fn history(&self, visit: &Visit) -> Result<Vec<Message>> {
        Ok(self.messages.messages_for_visit(&visit.id)?)
    }

    pub fn authorize(&self, visit: &Visit, actor: &UserId) -> Result<ChatAccess> {
        if visit.status != VisitStatus::Confirmed {
            return Err(EngineError::forbidden(
                "actor",
                format!("chat is only open on confirmed visits, this one is {}", visit.status),
            ));
        }

        let host = self.resolve_host(visit);

        if *actor == visit.requester_id {
            let counterparty = match host {
                Some(host) => Some(host),
                None => other_party_in(&self.history(visit)?, actor),
            };
            return Ok(ChatAccess {
                role: ChatRole::Requester,
                counterparty,
            });
        }

        if host.as_ref() == Some(actor) {
            return Ok(ChatAccess {
                role: ChatRole::Host,
                counterparty: Some(visit.requester_id),
            });
        }

        let history = self.history(visit)?;
        if let Some(msg) = history
            .iter()
            .find(|m| m.sender_id == *actor || m.receiver_id.as_ref() == Some(actor))
        {
            let counterparty = if msg.sender_id == *actor {
                msg.receiver_id
            } else {
                Some(msg.sender_id)
            };
            return Ok(ChatAccess {
                role: ChatRole::Participant,
                counterparty,
            });
        }

        if provisional_access(self.policy, visit, actor, host.as_ref()) {
            debug!("Visit {}: provisional chat access for {}", visit.id, actor);
            return Ok(ChatAccess {
                role: ChatRole::ProvisionalRequester,
                counterparty: host,
            });
        }

        Err(EngineError::forbidden(
            "actor",
            "not a party to this visit's conversation",
        ))
    }

    /// Receiver for an outbound message. `None` means no one could be found;
    /// the message is still stored.
    pub fn resolve_receiver(&self, visit: &Visit, actor: &UserId, access: &ChatAccess) -> Result<Option<UserId>> {
        if let Some(counterparty) = access.counterparty.filter(|id| id != actor) {
            return Ok(Some(counterparty));
        }

        if let Some(owner) = self.resolve_host(visit).filter(|id| id != actor) {
            return Ok(Some(owner));
        }

        Ok(other_party_in(&self.history(visit)?, actor))
    }
}

/// Earliest sender other than `actor`, else any other id seen in the history.
fn other_party_in(history: &[Message], actor: &UserId) -> Option<UserId> {
    history
        .iter()
        .map(|m| m.sender_id)
        .find(|id| id != actor)
        .or_else(|| {
            history
                .iter()
                .flat_map(|m| [Some(m.sender_id), m.receiver_id])
                .flatten()
                .find(|id| id != actor)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use abode_db::Database;
    use abode_types::models::Housing;
    use abode_types::{HousingId, MessageId, VisitId};
    use chrono::Utc;

    struct Setup {
        db: Arc<Database>,
        visit: Visit,
        host: UserId,
    }

    fn setup(status: VisitStatus) -> Setup {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let host = UserId::new();
        let housing = Housing {
            id: HousingId::new(),
            owner_id: host,
            title: "Studio".into(),
            address: "12 quai Sud".into(),
            external_key: None,
        };
        db.insert_housing(&housing).unwrap();
        let now = Utc::now();
        let visit = Visit {
            id: VisitId::new(),
            housing_id: housing.id,
            requester_id: UserId::new(),
            scheduled_at: now,
            status,
            validated_by_requester: false,
            notes: None,
            contact_phone: None,
            attached_documents: vec![],
            linked_review_id: None,
            created_at: now,
            updated_at: now,
        };
        Setup { db, visit, host }
    }

    fn authorizer(db: &Arc<Database>, policy: FallbackPolicy) -> ConversationAuthorizer {
        ConversationAuthorizer::new(db.clone(), db.clone(), policy)
    }

    fn message(visit: &Visit, sender: UserId, receiver: Option<UserId>) -> Message {
        Message {
            id: MessageId::new(),
            visit_id: visit.id,
            sender_id: sender,
            receiver_id: receiver,
            content: Some("hi".into()),
            attachments: vec![],
            read: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn unconfirmed_visits_deny_everyone() {
        for status in [
            VisitStatus::Pending,
            VisitStatus::Completed,
            VisitStatus::Cancelled,
            VisitStatus::Refused,
        ] {
            let s = setup(status);
            let auth = authorizer(&s.db, FallbackPolicy::Permissive);
            for actor in [s.visit.requester_id, s.host, UserId::new()] {
                assert!(matches!(
                    auth.authorize(&s.visit, &actor),
                    Err(EngineError::Forbidden { .. })
                ));
            }
        }
    }

    #[test]
    fn requester_and_host_see_each_other() {
        let s = setup(VisitStatus::Confirmed);
        let auth = authorizer(&s.db, FallbackPolicy::Strict);

        let requester = auth.authorize(&s.visit, &s.visit.requester_id).unwrap();
        assert_eq!(requester.role, ChatRole::Requester);
        assert_eq!(requester.counterparty, Some(s.host));

        let host = auth.authorize(&s.visit, &s.host).unwrap();
        assert_eq!(host.role, ChatRole::Host);
        assert_eq!(host.counterparty, Some(s.visit.requester_id));
    }

    #[test]
    fn history_makes_a_participant() {
        let s = setup(VisitStatus::Confirmed);
        let co_host = UserId::new();
        s.db.insert_message(&message(&s.visit, s.visit.requester_id, Some(co_host))).unwrap();
        let auth = authorizer(&s.db, FallbackPolicy::Strict);

        let access = auth.authorize(&s.visit, &co_host).unwrap();
        assert_eq!(access.role, ChatRole::Participant);
        assert_eq!(access.counterparty, Some(s.visit.requester_id));
    }

    #[test]
    fn strangers_depend_on_the_fallback_policy() {
        let s = setup(VisitStatus::Confirmed);
        let stranger = UserId::new();

        let strict = authorizer(&s.db, FallbackPolicy::Strict);
        assert!(matches!(
            strict.authorize(&s.visit, &stranger),
            Err(EngineError::Forbidden { .. })
        ));

        let permissive = authorizer(&s.db, FallbackPolicy::Permissive);
        let access = permissive.authorize(&s.visit, &stranger).unwrap();
        assert_eq!(access.role, ChatRole::ProvisionalRequester);
        assert_eq!(access.counterparty, Some(s.host));
    }

    #[test]
    fn provisional_access_never_covers_the_verified_host() {
        let s = setup(VisitStatus::Confirmed);
        assert!(!provisional_access(FallbackPolicy::Permissive, &s.visit, &s.host, Some(&s.host)));
        assert!(provisional_access(FallbackPolicy::Permissive, &s.visit, &UserId::new(), Some(&s.host)));
        assert!(!provisional_access(FallbackPolicy::Strict, &s.visit, &UserId::new(), None));
    }

    #[test]
    fn requester_without_host_falls_back_to_history() {
        let s = setup(VisitStatus::Confirmed);
        let mut orphan = s.visit.clone();
        orphan.housing_id = HousingId::new();
        let auth = authorizer(&s.db, FallbackPolicy::Permissive);

        let access = auth.authorize(&orphan, &orphan.requester_id).unwrap();
        assert_eq!(access.counterparty, None);
        assert_eq!(auth.resolve_receiver(&orphan, &orphan.requester_id, &access).unwrap(), None);

        let earlier = UserId::new();
        s.db.insert_message(&message(&orphan, earlier, Some(orphan.requester_id))).unwrap();
        let access = auth.authorize(&orphan, &orphan.requester_id).unwrap();
        assert_eq!(access.counterparty, Some(earlier));
    }

    #[test]
    fn receiver_search_order() {
        let s = setup(VisitStatus::Confirmed);
        let mut orphan = s.visit.clone();
        orphan.housing_id = HousingId::new();
        let auth = authorizer(&s.db, FallbackPolicy::Permissive);
        let actor = UserId::new();
        let access = ChatAccess {
            role: ChatRole::ProvisionalRequester,
            counterparty: None,
        };

        // Only the actor's own message, addressed to someone else.
        let other = UserId::new();
        s.db.insert_message(&message(&orphan, actor, Some(other))).unwrap();
        assert_eq!(auth.resolve_receiver(&orphan, &actor, &access).unwrap(), Some(other));

        // A foreign sender wins over a receiver id.
        let sender = UserId::new();
        s.db.insert_message(&message(&orphan, sender, None)).unwrap();
        assert_eq!(auth.resolve_receiver(&orphan, &actor, &access).unwrap(), Some(sender));

        // Housing owner wins over history.
        assert_eq!(auth.resolve_receiver(&s.visit, &actor, &access).unwrap(), Some(s.host));
    }

    #[test]
    fn policy_parses() {
        assert_eq!("Strict".parse::<FallbackPolicy>().unwrap(), FallbackPolicy::Strict);
        assert!("open".parse::<FallbackPolicy>().is_err());
    }
}
