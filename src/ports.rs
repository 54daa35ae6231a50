//! Storage port for reminders.
//! The engine talks to persistence only through this trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{DeliveryResult, HistoryFilter, NewReminder, Reminder, ReminderStatus};
use crate::error::ReminderResult;

/// Source of truth for reminders and their lifecycle.
///
/// Implementations make every status and `executed_at` mutation atomic per
/// reminder: two concurrent callers can never both observe `pending` and
/// both win a claim.
#[async_trait]
pub trait ReminderRepository: Send + Sync {
    /// Validates `new` and stores it as `pending`. Rejects a second pending
    /// reminder for the same `(order_ref, tier)`.
    async fn create(&self, new: NewReminder, now: DateTime<Utc>) -> ReminderResult<Reminder>;

    async fn get(&self, id: Uuid) -> ReminderResult<Reminder>;

    /// Pending reminders with `scheduled_at <= before`, ordered by
    /// `scheduled_at`, `created_at`, then `id`.
    async fn list_pending(&self, before: DateTime<Utc>) -> ReminderResult<Vec<Reminder>>;

    /// Non-pending reminders matching `filter`, newest first.
    async fn list_history(&self, filter: &HistoryFilter) -> ReminderResult<Vec<Reminder>>;

    /// Pending reminders that were claimed but never got a delivery result.
    async fn list_unresolved_claims(&self) -> ReminderResult<Vec<Reminder>>;

    /// Claims a reminder if it is still pending and unclaimed. Returns `None`
    /// when another caller got there first or the reminder was cancelled.
    async fn claim(&self, id: Uuid, at: DateTime<Utc>) -> ReminderResult<Option<Reminder>>;

    /// Re-claims an unresolved claim whose attempt counter still equals
    /// `expected_attempts`.
    async fn reclaim(
        &self,
        id: Uuid,
        expected_attempts: i32,
        at: DateTime<Utc>,
    ) -> ReminderResult<Option<Reminder>>;

    async fn transition(
        &self,
        id: Uuid,
        status: ReminderStatus,
        result: Option<DeliveryResult>,
        at: DateTime<Utc>,
    ) -> ReminderResult<Reminder>;

    /// Cancels a pending, unclaimed reminder.
    async fn cancel(&self, id: Uuid, at: DateTime<Utc>) -> ReminderResult<Reminder>;

    /// Cheap reachability check for health reporting.
    async fn ping(&self) -> ReminderResult<()>;
}
