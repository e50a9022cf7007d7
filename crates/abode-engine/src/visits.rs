use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use abode_types::models::{ActorRole, Housing, Visit, VisitStatus};
use abode_types::{HousingRef, UserId, VisitId};

use crate::clock::Clock;
use crate::error::{EngineError, Result, blocking};
use crate::notify::Notifier;
use crate::ports::{DirectoryLookup, HousingLookup, Notification, VisitStore};
use crate::reminders::{ReminderScheduler, ReminderSubject};

/// Input for [`VisitStateMachine::create_visit`].
#[derive(Debug, Clone)]
pub struct NewVisit {
    pub housing: HousingRef,
    pub requester_id: UserId,
    pub scheduled_at: DateTime<Utc>,
    pub notes: Option<String>,
    pub contact_phone: Option<String>,
    pub documents: Vec<String>,
}

/// Decides the status a transition request lands on.
///
/// Requesters may only withdraw. Hosts may confirm, refuse, cancel or complete,
/// and a host cancel is recorded as `refused`: `cancelled` always means the
/// requester withdrew.
pub fn plan_transition(
    current: VisitStatus,
    role: ActorRole,
    requested: VisitStatus,
) -> Result<VisitStatus> {
    let invalid = || EngineError::InvalidTransition {
        role,
        from: current,
        to: requested,
    };

    if current.is_terminal() {
        return Err(invalid());
    }

    let target = match (role, requested) {
        (ActorRole::Requester, VisitStatus::Cancelled) => VisitStatus::Cancelled,
        (ActorRole::Requester, _) => {
            return Err(EngineError::forbidden(
                "requester",
                format!("a requester may only cancel, not request {requested}"),
            ));
        }
        (ActorRole::Host, VisitStatus::Cancelled) => VisitStatus::Refused,
        (ActorRole::Host, VisitStatus::Pending) => {
            return Err(EngineError::forbidden(
                "host",
                "a host cannot move a visit back to pending",
            ));
        }
        (ActorRole::Host, other) => other,
    };

    if target == current {
        return Err(invalid());
    }
    Ok(target)
}

#[derive(Clone)]
pub struct VisitStateMachine {
    visits: Arc<dyn VisitStore>,
    housing: Arc<dyn HousingLookup>,
    directory: Arc<dyn DirectoryLookup>,
    scheduler: ReminderScheduler,
    notifier: Notifier,
    clock: Arc<dyn Clock>,
}

impl VisitStateMachine {
    pub fn new(
        visits: Arc<dyn VisitStore>,
        housing: Arc<dyn HousingLookup>,
        directory: Arc<dyn DirectoryLookup>,
        scheduler: ReminderScheduler,
        notifier: Notifier,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            visits,
            housing,
            directory,
            scheduler,
            notifier,
            clock,
        }
    }

    fn find_housing(&self, key: &HousingRef) -> Result<Option<Housing>> {
        self.housing
            .find_by_id_or_external_key(key)
            .map_err(|e| EngineError::dependency("housing lookup", e))
    }

    fn load(&self, id: &VisitId) -> Result<Visit> {
        self.visits
            .get_visit(id)?
            .ok_or_else(|| EngineError::not_found("visit", id))
    }

    fn display_name(&self, id: &UserId) -> Option<String> {
        match self.directory.find_by_id(id) {
            Ok(user) => user.map(|u| u.display_name),
            Err(e) => {
                warn!("Directory lookup for {} failed: {}", id, e);
                None
            }
        }
    }

    pub fn create_visit(&self, new: NewVisit) -> Result<Visit> {
        let now = self.clock.now();
        if new.scheduled_at <= now {
            return Err(EngineError::Validation(
                "scheduled_at must be in the future".into(),
            ));
        }

        let housing = self
            .find_housing(&new.housing)?
            .ok_or_else(|| EngineError::not_found("housing", &new.housing))?;

        let visit = Visit {
            id: VisitId::new(),
            housing_id: housing.id,
            requester_id: new.requester_id,
            scheduled_at: new.scheduled_at,
            status: VisitStatus::Pending,
            validated_by_requester: false,
            notes: non_blank(new.notes),
            contact_phone: non_blank(new.contact_phone),
            attached_documents: new
                .documents
                .into_iter()
                .filter_map(|d| non_blank(Some(d)))
                .collect(),
            linked_review_id: None,
            created_at: now,
            updated_at: now,
        };
        self.visits.insert_visit(&visit)?;

        info!(
            "Visit {} requested by {} for housing {} at {}",
            visit.id, visit.requester_id, visit.housing_id, visit.scheduled_at
        );
        Ok(visit)
    }

    /// Visible to the requester and the housing owner.
    pub fn get_visit(&self, id: &VisitId, actor: &UserId) -> Result<Visit> {
        let visit = self.load(id)?;
        if visit.requester_id == *actor {
            return Ok(visit);
        }
        let owner = self.find_housing(&HousingRef::Id(visit.housing_id))?.map(|h| h.owner_id);
        if owner.as_ref() == Some(actor) {
            return Ok(visit);
        }
        Err(EngineError::forbidden("actor", "not a party to this visit"))
    }

    /// Checks that `actor` really holds `role` on `visit` and returns the
    /// housing for the side effects. A requester needs no housing data to be
    /// authorized, so a failing lookup only costs the host notification.
    fn verify_role(&self, visit: &Visit, actor: &UserId, role: ActorRole) -> Result<Option<Housing>> {
        let key = HousingRef::Id(visit.housing_id);
        match role {
            ActorRole::Requester => {
                if visit.requester_id != *actor {
                    return Err(EngineError::forbidden(
                        "requester",
                        "only the requester of this visit may act as requester",
                    ));
                }
                match self.find_housing(&key) {
                    Ok(housing) => Ok(housing),
                    Err(e) => {
                        warn!("Visit {}: {}, continuing without host", visit.id, e);
                        Ok(None)
                    }
                }
            }
            ActorRole::Host => {
                let housing = self.find_housing(&key)?;
                if housing.as_ref().map(|h| h.owner_id) != Some(*actor) {
                    return Err(EngineError::forbidden(
                        "host",
                        "only the owner of the visited housing may act as host",
                    ));
                }
                Ok(housing)
            }
        }
    }

    pub async fn transition_visit(
        &self,
        id: &VisitId,
        actor: &UserId,
        role: ActorRole,
        requested: VisitStatus,
    ) -> Result<Visit> {
        let this = self.clone();
        let (id, actor) = (*id, *actor);
        let (updated, housing) =
            blocking(move || this.commit_transition(&id, &actor, role, requested)).await?;

        self.after_transition(&updated, housing).await;
        Ok(updated)
    }

    /// Store side of a transition: role check, planning, conditional write.
    fn commit_transition(
        &self,
        id: &VisitId,
        actor: &UserId,
        role: ActorRole,
        requested: VisitStatus,
    ) -> Result<(Visit, Option<Housing>)> {
        let visit = self.load(id)?;
        let housing = self.verify_role(&visit, actor, role)?;
        let target = plan_transition(visit.status, role, requested)?;

        let from = visit.status;
        let updated = self.apply(visit, role, target, false)?;
        info!("Visit {}: {} -> {} by {} {}", updated.id, from, target, role, actor);
        Ok((updated, housing))
    }

    /// Requester confirms the visit took place.
    pub async fn validate_visit(&self, id: &VisitId, requester: &UserId) -> Result<Visit> {
        let this = self.clone();
        let (id, requester) = (*id, *requester);
        blocking(move || this.commit_validation(&id, &requester)).await
    }

    fn commit_validation(&self, id: &VisitId, requester: &UserId) -> Result<Visit> {
        let visit = self.load(id)?;
        if visit.requester_id != *requester {
            return Err(EngineError::forbidden(
                "requester",
                "only the requester may validate a visit",
            ));
        }
        if visit.status != VisitStatus::Confirmed {
            return Err(EngineError::InvalidTransition {
                role: ActorRole::Requester,
                from: visit.status,
                to: VisitStatus::Completed,
            });
        }

        let updated = self.apply(visit, ActorRole::Requester, VisitStatus::Completed, true)?;
        info!("Visit {}: validated by requester {}", updated.id, requester);
        Ok(updated)
    }

    /// Attaches a review to a visit the requester validated. One link per visit.
    pub fn link_review(&self, id: &VisitId, requester: &UserId, review_id: &str) -> Result<Visit> {
        let review_id = review_id.trim();
        if review_id.is_empty() {
            return Err(EngineError::Validation("review id is empty".into()));
        }

        let mut visit = self.load(id)?;
        if visit.requester_id != *requester {
            return Err(EngineError::forbidden(
                "requester",
                "only the requester may review a visit",
            ));
        }
        if visit.status != VisitStatus::Completed || !visit.validated_by_requester {
            return Err(EngineError::Validation(
                "only validated visits can be reviewed".into(),
            ));
        }

        let now = self.clock.now();
        if !self.visits.link_review(id, review_id, &now)? {
            return Err(EngineError::Validation(
                "visit already has a review".into(),
            ));
        }
        visit.linked_review_id = Some(review_id.to_string());
        visit.updated_at = now;
        Ok(visit)
    }

    /// Conditional write: loses cleanly if another writer moved the visit first.
    fn apply(
        &self,
        mut visit: Visit,
        role: ActorRole,
        target: VisitStatus,
        validated: bool,
    ) -> Result<Visit> {
        let now = self.clock.now();
        let validated = validated || visit.validated_by_requester;
        if !self
            .visits
            .update_status(&visit.id, visit.status, target, validated, &now)?
        {
            let current = self.load(&visit.id)?.status;
            return Err(EngineError::InvalidTransition {
                role,
                from: current,
                to: target,
            });
        }
        visit.status = target;
        visit.validated_by_requester = validated;
        visit.updated_at = now;
        Ok(visit)
    }

    async fn requester_name(&self, visit: &Visit) -> Option<String> {
        let this = self.clone();
        let requester = visit.requester_id;
        blocking(move || Ok(this.display_name(&requester)))
            .await
            .ok()
            .flatten()
    }

    async fn after_transition(&self, visit: &Visit, housing: Option<Housing>) {
        let title = housing
            .as_ref()
            .map(|h| h.title.clone())
            .unwrap_or_else(|| "your visit".into());
        let base = |title: &str, body: String| {
            Notification::new(title, body)
                .with("type", "visit_status")
                .with("visit_id", visit.id)
                .with("status", visit.status)
        };

        match visit.status {
            VisitStatus::Confirmed => {
                let when = visit.scheduled_at.format("%Y-%m-%d %H:%M UTC");
                self.notifier
                    .notify_best_effort(
                        &visit.requester_id,
                        &base("Visit accepted", format!("Your visit of {title} on {when} was accepted.")),
                    )
                    .await;

                let subject = ReminderSubject {
                    housing_title: title.clone(),
                    requester_name: self
                        .requester_name(visit)
                        .await
                        .unwrap_or_else(|| ReminderSubject::default().requester_name),
                };
                let host_id = housing.map(|h| h.owner_id);
                let scheduler = self.scheduler.clone();
                let (visit, now) = (visit.clone(), self.clock.now());
                let visit_id = visit.id;
                let scheduled = blocking(move || Ok(scheduler.schedule(&visit, host_id, &subject, now))).await;
                if let Err(e) = scheduled {
                    warn!("Visit {}: reminders not scheduled: {}", visit_id, e);
                }
            }
            VisitStatus::Refused => {
                self.notifier
                    .notify_best_effort(
                        &visit.requester_id,
                        &base("Visit refused", format!("Your visit request for {title} was declined.")),
                    )
                    .await;
            }
            VisitStatus::Cancelled => match &housing {
                Some(h) => {
                    let who = self
                        .requester_name(visit)
                        .await
                        .unwrap_or_else(|| "The requester".into());
                    self.notifier
                        .notify_best_effort(
                            &h.owner_id,
                            &base("Visit cancelled", format!("{who} cancelled the visit of {title}.")),
                        )
                        .await;
                }
                None => warn!("Visit {} cancelled but host is unresolved, not notified", visit.id),
            },
            VisitStatus::Pending | VisitStatus::Completed => {}
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::notify::testing::RecordingPush;
    use abode_db::Database;
    use abode_types::HousingId;
    use abode_types::models::{Platform, PushToken};
    use chrono::{Duration, TimeZone};

    fn at(d: u32, h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, d, h, m, 0).unwrap()
    }

    #[test]
    fn requester_may_only_cancel() {
        use VisitStatus::*;
        assert_eq!(plan_transition(Pending, ActorRole::Requester, Cancelled).unwrap(), Cancelled);
        assert_eq!(plan_transition(Confirmed, ActorRole::Requester, Cancelled).unwrap(), Cancelled);
        for requested in [Confirmed, Refused, Completed, Pending] {
            assert!(matches!(
                plan_transition(Pending, ActorRole::Requester, requested),
                Err(EngineError::Forbidden { .. })
            ));
        }
    }

    #[test]
    fn host_cancel_becomes_refused() {
        use VisitStatus::*;
        assert_eq!(plan_transition(Pending, ActorRole::Host, Cancelled).unwrap(), Refused);
        assert_eq!(plan_transition(Confirmed, ActorRole::Host, Cancelled).unwrap(), Refused);
        assert_eq!(plan_transition(Pending, ActorRole::Host, Confirmed).unwrap(), Confirmed);
        assert_eq!(plan_transition(Confirmed, ActorRole::Host, Completed).unwrap(), Completed);
        assert!(matches!(
            plan_transition(Confirmed, ActorRole::Host, Pending),
            Err(EngineError::Forbidden { .. })
        ));
    }

    #[test]
    fn terminal_and_no_op_transitions_are_rejected() {
        use VisitStatus::*;
        for current in [Refused, Cancelled, Completed] {
            for role in [ActorRole::Requester, ActorRole::Host] {
                assert!(matches!(
                    plan_transition(current, role, Cancelled),
                    Err(EngineError::InvalidTransition { .. })
                ));
            }
        }
        assert!(matches!(
            plan_transition(Confirmed, ActorRole::Host, Confirmed),
            Err(EngineError::InvalidTransition { .. })
        ));
    }

    struct Setup {
        db: Arc<Database>,
        push: Arc<RecordingPush>,
        clock: Arc<ManualClock>,
        machine: VisitStateMachine,
        housing: Housing,
        requester: UserId,
    }

    fn setup() -> Setup {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let push = Arc::new(RecordingPush::default());
        let clock = Arc::new(ManualClock::new(at(1, 9, 0)));

        let host = UserId::new();
        let requester = UserId::new();
        db.create_user(&host, "host", "x", "Hélène", None).unwrap();
        db.create_user(&requester, "visitor", "x", "Marc", None).unwrap();
        for (user, raw) in [(host, "host-phone"), (requester, "visitor-phone")] {
            db.upsert_push_token(
                &PushToken {
                    user_id: user,
                    platform: Platform::Android,
                    token: raw.into(),
                },
                &at(1, 0, 0),
            )
            .unwrap();
        }

        let housing = Housing {
            id: HousingId::new(),
            owner_id: host,
            title: "Studio Bastille".into(),
            address: "12 rue de Lappe".into(),
            external_key: Some("listing-42".into()),
        };
        db.insert_housing(&housing).unwrap();

        let notifier = Notifier::new(db.clone(), push.clone(), std::time::Duration::from_secs(5));
        let machine = VisitStateMachine::new(
            db.clone(),
            db.clone(),
            db.clone(),
            ReminderScheduler::new(db.clone()),
            notifier,
            clock.clone(),
        );

        Setup {
            db,
            push,
            clock,
            machine,
            housing,
            requester,
        }
    }

    fn request(s: &Setup, housing: HousingRef) -> Result<Visit> {
        s.machine.create_visit(NewVisit {
            housing,
            requester_id: s.requester,
            scheduled_at: at(10, 10, 0),
            notes: Some("  ring twice ".into()),
            contact_phone: Some("   ".into()),
            documents: vec!["id.pdf".into(), " ".into()],
        })
    }

    #[test]
    fn create_resolves_external_key_and_trims() {
        let s = setup();
        let visit = request(&s, HousingRef::ExternalKey("listing-42".into())).unwrap();
        assert_eq!(visit.housing_id, s.housing.id);
        assert_eq!(visit.status, VisitStatus::Pending);
        assert_eq!(visit.notes.as_deref(), Some("ring twice"));
        assert_eq!(visit.contact_phone, None);
        assert_eq!(visit.attached_documents, vec!["id.pdf".to_string()]);
        assert!(s.db.get_visit(&visit.id).unwrap().is_some());
    }

    #[test]
    fn create_rejects_unknown_housing_and_past_dates() {
        let s = setup();
        assert!(matches!(
            request(&s, HousingRef::ExternalKey("nope".into())),
            Err(EngineError::NotFound { kind: "housing", .. })
        ));

        s.clock.set(at(10, 10, 0));
        assert!(matches!(
            request(&s, HousingRef::Id(s.housing.id)),
            Err(EngineError::Validation(_))
        ));
    }

    #[test]
    fn strangers_cannot_read_a_visit() {
        let s = setup();
        let visit = request(&s, HousingRef::Id(s.housing.id)).unwrap();
        assert!(s.machine.get_visit(&visit.id, &s.requester).is_ok());
        assert!(s.machine.get_visit(&visit.id, &s.housing.owner_id).is_ok());
        assert!(matches!(
            s.machine.get_visit(&visit.id, &UserId::new()),
            Err(EngineError::Forbidden { .. })
        ));
    }

    #[tokio::test]
    async fn confirm_notifies_and_schedules_reminders() {
        let s = setup();
        let visit = request(&s, HousingRef::Id(s.housing.id)).unwrap();

        let confirmed = s
            .machine
            .transition_visit(&visit.id, &s.housing.owner_id, ActorRole::Host, VisitStatus::Confirmed)
            .await
            .unwrap();
        assert_eq!(confirmed.status, VisitStatus::Confirmed);

        let calls = s.push.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, vec!["visitor-phone".to_string()]);
        assert_eq!(calls[0].1.data["status"], "confirmed");

        let reminders = s.db.get_reminders_for_visit(&visit.id).unwrap();
        assert_eq!(reminders.len(), 10);
        assert!(reminders
            .iter()
            .any(|r| r.recipient_id == s.housing.owner_id && r.body.starts_with("Marc")));
    }

    #[tokio::test]
    async fn wrong_actor_is_forbidden_before_any_write() {
        let s = setup();
        let visit = request(&s, HousingRef::Id(s.housing.id)).unwrap();

        let err = s
            .machine
            .transition_visit(&visit.id, &s.requester, ActorRole::Host, VisitStatus::Confirmed)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Forbidden { .. }));

        let err = s
            .machine
            .transition_visit(&visit.id, &UserId::new(), ActorRole::Requester, VisitStatus::Cancelled)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Forbidden { .. }));

        assert_eq!(s.db.get_visit(&visit.id).unwrap().unwrap().status, VisitStatus::Pending);
        assert!(s.push.calls().is_empty());
    }

    /// Housing lookup that can be switched off mid-test.
    struct FlakyHousing {
        db: Arc<Database>,
        down: std::sync::atomic::AtomicBool,
    }

    impl HousingLookup for FlakyHousing {
        fn find_by_id_or_external_key(&self, key: &HousingRef) -> anyhow::Result<Option<Housing>> {
            if self.down.load(std::sync::atomic::Ordering::SeqCst) {
                anyhow::bail!("housing service down");
            }
            self.db.find_by_id_or_external_key(key)
        }
    }

    fn with_flaky_housing(s: &mut Setup) -> Arc<FlakyHousing> {
        let housing = Arc::new(FlakyHousing {
            db: s.db.clone(),
            down: false.into(),
        });
        s.machine = VisitStateMachine::new(
            s.db.clone(),
            housing.clone(),
            s.db.clone(),
            ReminderScheduler::new(s.db.clone()),
            Notifier::new(s.db.clone(), s.push.clone(), std::time::Duration::from_secs(5)),
            s.clock.clone(),
        );
        housing
    }

    #[tokio::test]
    async fn requester_cancel_survives_housing_outage() {
        let mut s = setup();
        let housing = with_flaky_housing(&mut s);
        let visit = request(&s, HousingRef::Id(s.housing.id)).unwrap();
        housing.down.store(true, std::sync::atomic::Ordering::SeqCst);

        let cancelled = s
            .machine
            .transition_visit(&visit.id, &s.requester, ActorRole::Requester, VisitStatus::Cancelled)
            .await
            .unwrap();
        assert_eq!(cancelled.status, VisitStatus::Cancelled);
        assert_eq!(s.db.get_visit(&visit.id).unwrap().unwrap().status, VisitStatus::Cancelled);
        // Host unresolved, so nobody is told.
        assert!(s.push.calls().is_empty());
    }

    #[tokio::test]
    async fn host_actions_need_the_housing_lookup() {
        let mut s = setup();
        let housing = with_flaky_housing(&mut s);
        let visit = request(&s, HousingRef::Id(s.housing.id)).unwrap();
        housing.down.store(true, std::sync::atomic::Ordering::SeqCst);

        let err = s
            .machine
            .transition_visit(&visit.id, &s.housing.owner_id, ActorRole::Host, VisitStatus::Confirmed)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::DependencyUnavailable(_)));
        assert_eq!(s.db.get_visit(&visit.id).unwrap().unwrap().status, VisitStatus::Pending);
    }

    #[tokio::test]
    async fn strangers_learn_nothing_about_terminal_visits() {
        let s = setup();
        let visit = request(&s, HousingRef::Id(s.housing.id)).unwrap();
        s.machine
            .transition_visit(&visit.id, &s.requester, ActorRole::Requester, VisitStatus::Cancelled)
            .await
            .unwrap();

        for role in [ActorRole::Host, ActorRole::Requester] {
            let err = s
                .machine
                .transition_visit(&visit.id, &UserId::new(), role, VisitStatus::Confirmed)
                .await
                .unwrap_err();
            assert!(matches!(err, EngineError::Forbidden { .. }), "{err}");
        }

        // The real host still gets the terminal-state answer.
        let err = s
            .machine
            .transition_visit(&visit.id, &s.housing.owner_id, ActorRole::Host, VisitStatus::Confirmed)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn requester_cancel_notifies_host() {
        let s = setup();
        let visit = request(&s, HousingRef::Id(s.housing.id)).unwrap();

        s.machine
            .transition_visit(&visit.id, &s.requester, ActorRole::Requester, VisitStatus::Cancelled)
            .await
            .unwrap();

        let calls = s.push.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, vec!["host-phone".to_string()]);
        assert!(calls[0].1.body.starts_with("Marc cancelled"));
    }

    #[tokio::test]
    async fn stale_read_loses_the_conditional_write() {
        let s = setup();
        let visit = request(&s, HousingRef::Id(s.housing.id)).unwrap();
        // Another writer got there first.
        s.db.update_visit_status(&visit.id, VisitStatus::Pending, VisitStatus::Cancelled, false, &at(1, 9, 0))
            .unwrap();

        let err = s
            .machine
            .apply(visit, ActorRole::Host, VisitStatus::Confirmed, false)
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::InvalidTransition { from: VisitStatus::Cancelled, .. }
        ));
    }

    #[tokio::test]
    async fn validate_then_review_once() {
        let s = setup();
        let visit = request(&s, HousingRef::Id(s.housing.id)).unwrap();

        assert!(matches!(
            s.machine.validate_visit(&visit.id, &s.requester).await,
            Err(EngineError::InvalidTransition { .. })
        ));
        assert!(matches!(
            s.machine.link_review(&visit.id, &s.requester, "rev-1"),
            Err(EngineError::Validation(_))
        ));

        s.machine
            .transition_visit(&visit.id, &s.housing.owner_id, ActorRole::Host, VisitStatus::Confirmed)
            .await
            .unwrap();
        s.clock.advance(Duration::days(9));

        let done = s.machine.validate_visit(&visit.id, &s.requester).await.unwrap();
        assert_eq!(done.status, VisitStatus::Completed);
        assert!(done.validated_by_requester);

        let linked = s.machine.link_review(&visit.id, &s.requester, " rev-1 ").unwrap();
        assert_eq!(linked.linked_review_id.as_deref(), Some("rev-1"));
        assert!(matches!(
            s.machine.link_review(&visit.id, &s.requester, "rev-2"),
            Err(EngineError::Validation(_))
        ));
    }
}
