pub mod clock;
pub mod delivery;
pub mod reminder_service;
pub mod scheduler;

pub use clock::{Clock, ManualClock, SystemClock};
pub use delivery::{DeliveryCoordinator, ReminderSender, SendOutcome};
pub use reminder_service::{CreateReminderRequest, ReminderService};
pub use scheduler::{RecoveryReport, Scheduler, SchedulerConfig, TickReport};
