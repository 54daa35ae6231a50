use uuid::Uuid;

use crate::domain::{DeliveryResult, ReminderStatus};
use crate::error::{ReminderError, ReminderResult};

pub mod memory_reminder_repository;
pub mod postgres_reminder_repository;

pub use memory_reminder_repository::InMemoryReminderRepository;
pub use postgres_reminder_repository::PostgresReminderRepository;

/// Rules every store applies before `transition` writes anything.
///
/// A claimed reminder can no longer be cancelled, and `sent`/`failed` are
/// only recorded together with the delivery result that decided them.
pub(crate) fn check_transition(
    id: Uuid,
    current: ReminderStatus,
    claimed: bool,
    next: ReminderStatus,
    result: Option<&DeliveryResult>,
) -> ReminderResult<()> {
    if !current.can_transition_to(next) {
        return Err(ReminderError::InvalidTransition {
            id,
            from: current,
            to: next,
        });
    }

    match next {
        ReminderStatus::Cancelled if claimed => Err(ReminderError::AlreadyExecuted(id)),
        ReminderStatus::Sent | ReminderStatus::Failed if result.is_none() => {
            Err(ReminderError::MissingDeliveryResult { id, status: next })
        }
        _ => Ok(()),
    }
}
