pub mod escalation;
pub mod reminder;

pub use escalation::EscalationPolicy;
pub use reminder::{
    Channel, ChannelOutcome, Customer, DeliveryOutcome, DeliveryResult, HistoryFilter,
    NewReminder, Reminder, ReminderStats, ReminderStatus, Tier, TierCounts,
};
