use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::info;
use uuid::Uuid;

use crate::domain::{
    Channel, Customer, EscalationPolicy, HistoryFilter, NewReminder, Reminder, ReminderStats, Tier,
};
use crate::error::{ReminderError, ReminderResult};
use crate::ports::ReminderRepository;
use crate::services::clock::Clock;
use crate::validation::{
    clean_text, normalize_phone, sanitize_string, validate_currency, validate_email,
    validate_payment_url, ValidationError, CUSTOMER_NAME_MAX_LEN, ORDER_REF_MAX_LEN,
};

/// Inbound request to contact a customer about an overdue order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateReminderRequest {
    pub customer_email: String,
    pub customer_name: String,
    #[serde(default)]
    pub customer_phone: Option<String>,
    pub order_ref: String,
    pub amount_due: BigDecimal,
    #[serde(default)]
    pub currency: Option<String>,
    pub due_date: NaiveDate,
    /// Explicit tier, as sent by operator tooling.
    #[serde(default)]
    pub tier: Option<String>,
    /// Used to derive the tier when `tier` is absent.
    #[serde(default)]
    pub days_past_due: Option<i64>,
    pub channels: Vec<String>,
    #[serde(default)]
    pub payment_url: Option<String>,
    #[serde(default)]
    pub schedule_at: Option<DateTime<Utc>>,
}

/// Entry point for callers: creates, schedules, cancels and reports on
/// reminders. Dispatch itself is left to the `Scheduler`.
pub struct ReminderService {
    repository: Arc<dyn ReminderRepository>,
    policy: EscalationPolicy,
    clock: Arc<dyn Clock>,
    default_currency: String,
    wakeup: Option<Arc<Notify>>,
}

impl ReminderService {
    pub fn new(
        repository: Arc<dyn ReminderRepository>,
        policy: EscalationPolicy,
        clock: Arc<dyn Clock>,
        default_currency: impl Into<String>,
    ) -> Self {
        Self {
            repository,
            policy,
            clock,
            default_currency: default_currency.into(),
            wakeup: None,
        }
    }

    /// Nudges the scheduling loop whenever a reminder is already due.
    pub fn with_wakeup(mut self, wakeup: Arc<Notify>) -> Self {
        self.wakeup = Some(wakeup);
        self
    }

    pub fn policy(&self) -> &EscalationPolicy {
        &self.policy
    }

    /// Creates a reminder due right now; the scheduler fires it on its next
    /// tick. A request carrying `scheduleAt` belongs to `schedule` or `submit`.
    pub async fn send_now(&self, request: CreateReminderRequest) -> ReminderResult<Reminder> {
        if request.schedule_at.is_some() {
            return Err(ValidationError::new(
                "scheduleAt",
                "not accepted for immediate sends; use schedule instead",
            )
            .into());
        }

        let now = self.clock.now();
        let new = self.prepare(request, now)?;
        let reminder = self.repository.create(new, now).await?;

        info!(
            reminder_id = %reminder.id,
            order_ref = %reminder.order_ref,
            tier = %reminder.tier,
            "reminder queued for immediate dispatch"
        );
        self.wake();

        Ok(reminder)
    }

    /// `send_now` for an automated overdue scan: the tier comes from the
    /// escalation policy unless the request names one.
    pub async fn send_overdue(
        &self,
        mut request: CreateReminderRequest,
        days_past_due: i64,
    ) -> ReminderResult<Reminder> {
        request.days_past_due = Some(days_past_due);
        self.send_now(request).await
    }

    pub async fn schedule(
        &self,
        request: CreateReminderRequest,
        at: DateTime<Utc>,
    ) -> ReminderResult<Reminder> {
        let now = self.clock.now();
        if at < now {
            return Err(ValidationError::new("scheduleAt", "must not be in the past").into());
        }

        let new = self.prepare(request, at)?;
        let reminder = self.repository.create(new, now).await?;

        info!(
            reminder_id = %reminder.id,
            order_ref = %reminder.order_ref,
            tier = %reminder.tier,
            scheduled_at = %reminder.scheduled_at,
            "reminder scheduled"
        );
        if at <= now {
            self.wake();
        }

        Ok(reminder)
    }

    /// Schedules when the request carries `scheduleAt`, otherwise sends now.
    pub async fn submit(&self, mut request: CreateReminderRequest) -> ReminderResult<Reminder> {
        match request.schedule_at.take() {
            Some(at) => self.schedule(request, at).await,
            None => self.send_now(request).await,
        }
    }

    pub async fn cancel(&self, id: Uuid) -> ReminderResult<Reminder> {
        let cancelled = self.repository.cancel(id, self.clock.now()).await?;
        info!(reminder_id = %id, order_ref = %cancelled.order_ref, "reminder cancelled");
        Ok(cancelled)
    }

    pub async fn get(&self, id: Uuid) -> ReminderResult<Reminder> {
        self.repository.get(id).await
    }

    pub async fn list_pending(&self, before: Option<DateTime<Utc>>) -> ReminderResult<Vec<Reminder>> {
        let before = before.unwrap_or_else(|| self.clock.now());
        self.repository.list_pending(before).await
    }

    pub async fn history(&self, filter: &HistoryFilter) -> ReminderResult<Vec<Reminder>> {
        self.repository.list_history(filter).await
    }

    /// Counts by status and tier, optionally scoped to one order.
    pub async fn stats(&self, order_ref: Option<&str>) -> ReminderResult<ReminderStats> {
        let filter = HistoryFilter {
            order_ref: order_ref.map(str::to_string),
            ..HistoryFilter::default()
        };

        let history = self.repository.list_history(&filter).await?;
        let pending: Vec<Reminder> = self
            .repository
            .list_pending(DateTime::<Utc>::MAX_UTC)
            .await?
            .into_iter()
            .filter(|r| order_ref.map_or(true, |order_ref| r.order_ref == order_ref))
            .collect();

        Ok(ReminderStats::tally(history.iter().chain(pending.iter())))
    }

    fn wake(&self) {
        if let Some(wakeup) = &self.wakeup {
            wakeup.notify_one();
        }
    }

    fn resolve_tier(&self, tier: Option<&str>, days_past_due: Option<i64>) -> Result<Tier, ValidationError> {
        match (tier, days_past_due) {
            (Some(tier), _) => tier.parse(),
            (None, Some(days)) if days <= 0 => {
                Err(ValidationError::new("daysPastDue", "order is not overdue"))
            }
            (None, Some(days)) => Ok(self.policy.classify(days)),
            (None, None) => Err(ValidationError::new(
                "tier",
                "is required unless daysPastDue is provided",
            )),
        }
    }

    /// Boundary validation: turns loosely typed request fields into a
    /// `NewReminder`. Store-level invariants are checked again on create.
    fn prepare(
        &self,
        request: CreateReminderRequest,
        scheduled_at: DateTime<Utc>,
    ) -> Result<NewReminder, ReminderError> {
        let order_ref = clean_text("orderRef", &request.order_ref, ORDER_REF_MAX_LEN)?;
        let name = clean_text("customerName", &request.customer_name, CUSTOMER_NAME_MAX_LEN)?;

        let email = request.customer_email.trim().to_string();
        validate_email(&email)?;

        let phone = match request.customer_phone.as_deref().map(str::trim) {
            Some(phone) if !phone.is_empty() => Some(normalize_phone(phone)?),
            _ => None,
        };

        let currency = request
            .currency
            .as_deref()
            .map(|c| c.trim().to_ascii_uppercase())
            .unwrap_or_else(|| self.default_currency.clone());
        validate_currency(&currency)?;

        let payment_url = match request.payment_url.as_deref().map(sanitize_string) {
            Some(url) if !url.is_empty() => {
                validate_payment_url(&url)?;
                Some(url)
            }
            _ => None,
        };

        let channels = request
            .channels
            .iter()
            .map(|channel| channel.parse::<Channel>())
            .collect::<Result<BTreeSet<_>, _>>()?;

        let tier = self.resolve_tier(request.tier.as_deref(), request.days_past_due)?;

        let new = NewReminder {
            order_ref,
            customer: Customer { name, email, phone },
            amount_due: request.amount_due,
            currency,
            due_date: request.due_date,
            tier,
            channels,
            payment_url,
            scheduled_at,
        };
        new.validate()?;

        Ok(new)
    }
}
