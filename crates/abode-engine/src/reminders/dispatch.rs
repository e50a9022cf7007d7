use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{info, warn};

use abode_types::models::{PushToken, ReminderItem, VisitStatus};

use crate::error::{Result, blocking};
use crate::notify::Notifier;
use crate::ports::{Notification, ReminderStore, VisitStore};

/// Counters for one dispatch pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub due: usize,
    /// Consumed and handed to the push provider (or nothing to hand over).
    pub delivered: usize,
    /// Consumed without sending because the visit left `confirmed`.
    pub stale: usize,
    /// Left untouched after a lookup failure; retried while still in window.
    pub failed: usize,
    /// Consumed, but the provider call itself failed.
    pub send_errors: usize,
}

enum ItemOutcome {
    Delivered,
    SendError,
    Stale,
    AlreadyTaken,
}

enum Claim {
    Send(Vec<PushToken>),
    Stale,
    Taken,
}

/// Scans for due reminders and hands them to the push provider.
///
/// Callers must not run two passes at once; the `delivered` flag is the only
/// guard at item level. See `PeriodicTask`.
#[derive(Clone)]
pub struct ReminderDispatcher {
    reminders: Arc<dyn ReminderStore>,
    visits: Arc<dyn VisitStore>,
    notifier: Notifier,
    tolerance: Duration,
}

impl ReminderDispatcher {
    pub fn new(
        reminders: Arc<dyn ReminderStore>,
        visits: Arc<dyn VisitStore>,
        notifier: Notifier,
        tolerance: Duration,
    ) -> Self {
        Self {
            reminders,
            visits,
            notifier,
            tolerance,
        }
    }

    pub async fn run_pass(&self, now: DateTime<Utc>) -> DispatchReport {
        let mut report = DispatchReport::default();

        let store = self.reminders.clone();
        let (from, to) = (now - self.tolerance, now + self.tolerance);
        let due = match blocking(move || Ok(store.due_between(&from, &to)?)).await {
            Ok(due) => due,
            Err(e) => {
                warn!("Reminder scan failed: {}", e);
                return report;
            }
        };
        report.due = due.len();

        for item in due {
            let (id, visit_id) = (item.id, item.visit_id);
            match self.dispatch_one(item).await {
                Ok(ItemOutcome::Delivered) => report.delivered += 1,
                Ok(ItemOutcome::SendError) => {
                    report.delivered += 1;
                    report.send_errors += 1;
                }
                Ok(ItemOutcome::Stale) => report.stale += 1,
                Ok(ItemOutcome::AlreadyTaken) => {}
                Err(e) => {
                    report.failed += 1;
                    warn!("Reminder {} for visit {} skipped: {}", id, visit_id, e);
                }
            }
        }

        if report.due > 0 {
            info!(
                "Reminder pass: {} due, {} delivered, {} stale, {} failed, {} send errors",
                report.due, report.delivered, report.stale, report.failed, report.send_errors
            );
        }
        report
    }

    async fn dispatch_one(&self, item: ReminderItem) -> Result<ItemOutcome> {
        let this = self.clone();
        let claim_item = item.clone();
        let tokens = match blocking(move || this.claim(&claim_item)).await? {
            Claim::Send(tokens) => tokens,
            Claim::Stale => return Ok(ItemOutcome::Stale),
            Claim::Taken => return Ok(ItemOutcome::AlreadyTaken),
        };

        let notification = Notification::new(&item.title, &item.body)
            .with("type", "visit_reminder")
            .with("visit_id", item.visit_id)
            .with("role", item.recipient_role);

        match self.notifier.send_to_tokens(&tokens, &notification).await {
            Ok(_) => Ok(ItemOutcome::Delivered),
            Err(e) => {
                warn!("Reminder {} consumed but not sent: {}", item.id, e);
                Ok(ItemOutcome::SendError)
            }
        }
    }

    /// Store side of one item: status re-check, token lookup, then the claim.
    fn claim(&self, item: &ReminderItem) -> Result<Claim> {
        let still_confirmed = self
            .visits
            .get_visit(&item.visit_id)?
            .is_some_and(|v| v.status == VisitStatus::Confirmed);

        if !still_confirmed {
            self.reminders.mark_delivered(&item.id)?;
            return Ok(Claim::Stale);
        }

        let tokens = self.notifier.lookup_tokens(&item.recipient_id)?;

        // Claim before sending: a failed send never un-delivers.
        if !self.reminders.mark_delivered(&item.id)? {
            return Ok(Claim::Taken);
        }
        Ok(Claim::Send(tokens))
    }
}
