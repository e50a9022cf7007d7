use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use abode_types::models::{ActorRole, ReminderItem, Visit};
use abode_types::{ReminderId, UserId};

use crate::ports::ReminderStore;

/// Fixed lead times before a confirmed visit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReminderOffset {
    TwoDays,
    OneDay,
    TwoHours,
    OneHour,
    HalfHour,
}

impl ReminderOffset {
    pub const ALL: [ReminderOffset; 5] = [
        Self::TwoDays,
        Self::OneDay,
        Self::TwoHours,
        Self::OneHour,
        Self::HalfHour,
    ];

    pub fn lead(&self) -> Duration {
        match self {
            Self::TwoDays => Duration::days(2),
            Self::OneDay => Duration::days(1),
            Self::TwoHours => Duration::hours(2),
            Self::OneHour => Duration::hours(1),
            Self::HalfHour => Duration::minutes(30),
        }
    }

    fn phrase(&self) -> &'static str {
        match self {
            Self::TwoDays => "in 2 days",
            Self::OneDay => "tomorrow",
            Self::TwoHours => "in 2 hours",
            Self::OneHour => "in 1 hour",
            Self::HalfHour => "in 30 minutes",
        }
    }
}

/// Instants for `scheduled_at`, dropping every one that is not strictly after `now`.
pub fn reminder_instants(
    scheduled_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Vec<(ReminderOffset, DateTime<Utc>)> {
    ReminderOffset::ALL
        .iter()
        .map(|offset| (*offset, scheduled_at - offset.lead()))
        .filter(|(_, fire_at)| *fire_at > now)
        .collect()
}

/// Names used in reminder text. Missing directory data falls back to
/// neutral wording rather than blocking the schedule.
#[derive(Debug, Clone)]
pub struct ReminderSubject {
    pub housing_title: String,
    pub requester_name: String,
}

impl Default for ReminderSubject {
    fn default() -> Self {
        Self {
            housing_title: "the housing".to_string(),
            requester_name: "A visitor".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScheduleReport {
    pub created: usize,
    pub failed: usize,
    pub skipped_past: usize,
}

#[derive(Clone)]
pub struct ReminderScheduler {
    store: Arc<dyn ReminderStore>,
}

impl ReminderScheduler {
    pub fn new(store: Arc<dyn ReminderStore>) -> Self {
        Self { store }
    }

    /// Builds the reminder set for a visit that was just confirmed.
    pub fn plan(
        visit: &Visit,
        host_id: Option<UserId>,
        subject: &ReminderSubject,
        now: DateTime<Utc>,
    ) -> Vec<ReminderItem> {
        let when = visit.scheduled_at.format("%Y-%m-%d %H:%M UTC");
        let mut items = Vec::new();

        for (offset, fire_at) in reminder_instants(visit.scheduled_at, now) {
            items.push(ReminderItem {
                id: ReminderId::new(),
                visit_id: visit.id,
                recipient_id: visit.requester_id,
                recipient_role: ActorRole::Requester,
                fire_at,
                title: format!("Your visit is {}", offset.phrase()),
                body: format!("You are visiting {} on {}.", subject.housing_title, when),
                delivered: false,
            });

            if let Some(host_id) = host_id {
                items.push(ReminderItem {
                    id: ReminderId::new(),
                    visit_id: visit.id,
                    recipient_id: host_id,
                    recipient_role: ActorRole::Host,
                    fire_at,
                    title: format!("Visit {}", offset.phrase()),
                    body: format!(
                        "{} is visiting {} on {}.",
                        subject.requester_name, subject.housing_title, when
                    ),
                    delivered: false,
                });
            }
        }

        items
    }

    /// Persists the plan as one batch. A failed batch degrades to
    /// item-by-item inserts so one bad row cannot drop the whole set.
    pub fn schedule(
        &self,
        visit: &Visit,
        host_id: Option<UserId>,
        subject: &ReminderSubject,
        now: DateTime<Utc>,
    ) -> ScheduleReport {
        let items = Self::plan(visit, host_id, subject, now);
        let per_role = if host_id.is_some() { 2 } else { 1 };
        let mut report = ScheduleReport {
            skipped_past: ReminderOffset::ALL.len() * per_role - items.len(),
            ..Default::default()
        };

        if items.is_empty() {
            info!("Visit {}: every reminder instant already passed", visit.id);
            return report;
        }

        match self.store.insert_batch(&items) {
            Ok(()) => report.created = items.len(),
            Err(e) => {
                warn!(
                    "Visit {}: reminder batch failed ({}), retrying item by item",
                    visit.id, e
                );
                for item in &items {
                    match self.store.insert_one(item) {
                        Ok(()) => report.created += 1,
                        Err(e) => {
                            report.failed += 1;
                            warn!(
                                "Visit {}: reminder for {} at {} not stored: {}",
                                visit.id, item.recipient_id, item.fire_at, e
                            );
                        }
                    }
                }
            }
        }

        info!(
            "Visit {}: scheduled {} reminders ({} past, {} failed)",
            visit.id, report.created, report.skipped_past, report.failed
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use abode_db::Database;
    use abode_types::models::VisitStatus;
    use abode_types::{HousingId, VisitId};
    use chrono::TimeZone;
    use std::sync::Mutex;

    fn at(d: u32, h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, d, h, m, 0).unwrap()
    }

    fn confirmed_visit() -> Visit {
        Visit {
            id: VisitId::new(),
            housing_id: HousingId::new(),
            requester_id: UserId::new(),
            scheduled_at: at(10, 10, 0),
            status: VisitStatus::Confirmed,
            validated_by_requester: false,
            notes: None,
            contact_phone: None,
            attached_documents: vec![],
            linked_review_id: None,
            created_at: at(1, 0, 0),
            updated_at: at(1, 0, 0),
        }
    }

    #[test]
    fn instants_match_the_five_offsets() {
        let instants: Vec<_> = reminder_instants(at(10, 10, 0), at(1, 0, 0))
            .into_iter()
            .map(|(_, t)| t)
            .collect();
        assert_eq!(
            instants,
            vec![at(8, 10, 0), at(9, 10, 0), at(10, 8, 0), at(10, 9, 0), at(10, 9, 30)]
        );
    }

    #[test]
    fn past_and_present_instants_are_dropped() {
        // Exactly at the H-2 instant: J-2, J-1 and H-2 are gone.
        let left = reminder_instants(at(10, 10, 0), at(10, 8, 0));
        assert_eq!(
            left.iter().map(|(o, _)| *o).collect::<Vec<_>>(),
            vec![ReminderOffset::OneHour, ReminderOffset::HalfHour]
        );
        assert!(reminder_instants(at(10, 10, 0), at(10, 10, 0)).is_empty());
    }

    #[test]
    fn host_reminders_double_the_set() {
        let visit = confirmed_visit();
        let host = UserId::new();
        let subject = ReminderSubject::default();

        let requester_only = ReminderScheduler::plan(&visit, None, &subject, at(1, 0, 0));
        assert_eq!(requester_only.len(), 5);

        let both = ReminderScheduler::plan(&visit, Some(host), &subject, at(1, 0, 0));
        assert_eq!(both.len(), 10);
        assert_eq!(both.iter().filter(|r| r.recipient_id == host).count(), 5);
        assert!(both
            .iter()
            .filter(|r| r.recipient_role == ActorRole::Host)
            .all(|r| r.body.starts_with("A visitor")));
    }

    #[test]
    fn schedule_persists_batch() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let scheduler = ReminderScheduler::new(db.clone());
        let visit = confirmed_visit();

        let report = scheduler.schedule(&visit, Some(UserId::new()), &ReminderSubject::default(), at(9, 12, 0));
        // J-2 and J-1 already passed for both roles.
        assert_eq!(report, ScheduleReport { created: 6, failed: 0, skipped_past: 4 });
        assert_eq!(db.get_reminders_for_visit(&visit.id).unwrap().len(), 6);
    }

    /// Batch always fails; single inserts fail for the host role.
    struct FlakyStore {
        stored: Mutex<Vec<ReminderItem>>,
    }

    impl ReminderStore for FlakyStore {
        fn insert_batch(&self, _items: &[ReminderItem]) -> anyhow::Result<()> {
            anyhow::bail!("batch write rejected")
        }

        fn insert_one(&self, item: &ReminderItem) -> anyhow::Result<()> {
            if item.recipient_role == ActorRole::Host {
                anyhow::bail!("row rejected");
            }
            self.stored.lock().unwrap().push(item.clone());
            Ok(())
        }

        fn due_between(&self, _: &DateTime<Utc>, _: &DateTime<Utc>) -> anyhow::Result<Vec<ReminderItem>> {
            Ok(vec![])
        }

        fn mark_delivered(&self, _: &ReminderId) -> anyhow::Result<bool> {
            Ok(false)
        }

        fn for_visit(&self, _: &abode_types::VisitId) -> anyhow::Result<Vec<ReminderItem>> {
            Ok(self.stored.lock().unwrap().clone())
        }
    }

    #[test]
    fn failed_batch_falls_back_to_single_inserts() {
        let store = Arc::new(FlakyStore {
            stored: Mutex::new(vec![]),
        });
        let scheduler = ReminderScheduler::new(store.clone());
        let visit = confirmed_visit();

        let report = scheduler.schedule(&visit, Some(UserId::new()), &ReminderSubject::default(), at(1, 0, 0));
        assert_eq!(report, ScheduleReport { created: 5, failed: 5, skipped_past: 0 });
        assert!(store
            .stored
            .lock()
            .unwrap()
            .iter()
            .all(|r| r.recipient_role == ActorRole::Requester));
    }
}
