mod dispatch;
mod schedule;

pub use dispatch::{DispatchReport, ReminderDispatcher};
pub use schedule::{
    ReminderOffset, ReminderScheduler, ReminderSubject, ScheduleReport, reminder_instants,
};
