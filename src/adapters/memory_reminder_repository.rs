//! In-memory implementation of ReminderRepository.
//! Used when no database is configured and throughout the test suite.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::check_transition;
use crate::domain::{DeliveryResult, HistoryFilter, NewReminder, Reminder, ReminderStatus, Tier};
use crate::error::{ReminderError, ReminderResult};
use crate::ports::ReminderRepository;

#[derive(Default)]
struct State {
    reminders: HashMap<Uuid, Reminder>,
    /// `(order_ref, tier)` -> id of the pending reminder holding that slot.
    pending_index: HashMap<(String, Tier), Uuid>,
}

impl State {
    fn release_slot(&mut self, reminder: &Reminder) {
        let key = (reminder.order_ref.clone(), reminder.tier);
        if self.pending_index.get(&key) == Some(&reminder.id) {
            self.pending_index.remove(&key);
        }
    }
}

#[derive(Clone, Default)]
pub struct InMemoryReminderRepository {
    state: Arc<RwLock<State>>,
}

impl InMemoryReminderRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReminderRepository for InMemoryReminderRepository {
    async fn create(&self, new: NewReminder, now: DateTime<Utc>) -> ReminderResult<Reminder> {
        new.validate()?;

        let mut state = self.state.write().await;
        let key = (new.order_ref.clone(), new.tier);
        if let Some(existing) = state.pending_index.get(&key) {
            return Err(ReminderError::DuplicatePending {
                order_ref: new.order_ref,
                tier: new.tier,
                existing: *existing,
            });
        }

        let reminder = Reminder::new(new, now);
        state.pending_index.insert(key, reminder.id);
        state.reminders.insert(reminder.id, reminder.clone());

        Ok(reminder)
    }

    async fn get(&self, id: Uuid) -> ReminderResult<Reminder> {
        self.state
            .read()
            .await
            .reminders
            .get(&id)
            .cloned()
            .ok_or(ReminderError::NotFound(id))
    }

    async fn list_pending(&self, before: DateTime<Utc>) -> ReminderResult<Vec<Reminder>> {
        let state = self.state.read().await;
        let mut due: Vec<Reminder> = state
            .reminders
            .values()
            .filter(|r| r.status == ReminderStatus::Pending && r.scheduled_at <= before)
            .cloned()
            .collect();

        due.sort_by_key(Reminder::firing_key);
        Ok(due)
    }

    async fn list_history(&self, filter: &HistoryFilter) -> ReminderResult<Vec<Reminder>> {
        let state = self.state.read().await;
        let mut history: Vec<Reminder> = state
            .reminders
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();

        history.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(history)
    }

    async fn list_unresolved_claims(&self) -> ReminderResult<Vec<Reminder>> {
        let state = self.state.read().await;
        let mut claims: Vec<Reminder> = state
            .reminders
            .values()
            .filter(|r| r.is_unresolved_claim())
            .cloned()
            .collect();

        claims.sort_by_key(Reminder::firing_key);
        Ok(claims)
    }

    async fn claim(&self, id: Uuid, at: DateTime<Utc>) -> ReminderResult<Option<Reminder>> {
        let mut state = self.state.write().await;
        let reminder = state
            .reminders
            .get_mut(&id)
            .ok_or(ReminderError::NotFound(id))?;

        if reminder.status != ReminderStatus::Pending || reminder.executed_at.is_some() {
            return Ok(None);
        }

        reminder.executed_at = Some(at);
        reminder.attempts += 1;
        reminder.updated_at = at;
        Ok(Some(reminder.clone()))
    }

    async fn reclaim(
        &self,
        id: Uuid,
        expected_attempts: i32,
        at: DateTime<Utc>,
    ) -> ReminderResult<Option<Reminder>> {
        let mut state = self.state.write().await;
        let reminder = state
            .reminders
            .get_mut(&id)
            .ok_or(ReminderError::NotFound(id))?;

        if !reminder.is_unresolved_claim() || reminder.attempts != expected_attempts {
            return Ok(None);
        }

        reminder.executed_at = Some(at);
        reminder.attempts += 1;
        reminder.updated_at = at;
        Ok(Some(reminder.clone()))
    }

    async fn transition(
        &self,
        id: Uuid,
        status: ReminderStatus,
        result: Option<DeliveryResult>,
        at: DateTime<Utc>,
    ) -> ReminderResult<Reminder> {
        let mut state = self.state.write().await;
        let reminder = state
            .reminders
            .get_mut(&id)
            .ok_or(ReminderError::NotFound(id))?;

        check_transition(
            id,
            reminder.status,
            reminder.executed_at.is_some(),
            status,
            result.as_ref(),
        )?;

        reminder.status = status;
        if result.is_some() {
            reminder.delivery_result = result;
        }
        reminder.updated_at = at;
        let updated = reminder.clone();

        state.release_slot(&updated);
        Ok(updated)
    }

    async fn cancel(&self, id: Uuid, at: DateTime<Utc>) -> ReminderResult<Reminder> {
        let mut state = self.state.write().await;
        let reminder = state
            .reminders
            .get_mut(&id)
            .ok_or(ReminderError::NotFound(id))?;

        if reminder.status != ReminderStatus::Pending || reminder.executed_at.is_some() {
            return Err(ReminderError::AlreadyExecuted(id));
        }

        reminder.status = ReminderStatus::Cancelled;
        reminder.updated_at = at;
        let cancelled = reminder.clone();

        state.release_slot(&cancelled);
        Ok(cancelled)
    }

    async fn ping(&self) -> ReminderResult<()> {
        Ok(())
    }
}
