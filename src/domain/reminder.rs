//! Reminder domain entity.
//! Framework-agnostic representation of one scheduled or sent customer contact.

use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::validation::{validate_enum, validate_positive_amount, ValidationError, ValidationResult};

/// Severity and tone of a reminder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Gentle,
    Urgent,
    Final,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Gentle, Tier::Urgent, Tier::Final];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Gentle => "gentle",
            Tier::Urgent => "urgent",
            Tier::Final => "final",
        }
    }
}

impl FromStr for Tier {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim().to_ascii_lowercase();
        validate_enum("tier", &value, &["gentle", "urgent", "final"])?;
        Ok(match value.as_str() {
            "gentle" => Tier::Gentle,
            "urgent" => Tier::Urgent,
            _ => Tier::Final,
        })
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delivery medium for a reminder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Email,
    Sms,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Email => "email",
            Channel::Sms => "sms",
        }
    }
}

impl FromStr for Channel {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim().to_ascii_lowercase();
        validate_enum("channels", &value, &["email", "sms"])?;
        Ok(if value == "email" {
            Channel::Email
        } else {
            Channel::Sms
        })
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a reminder.
///
/// `Pending` is the only initial state; `Sent`, `Failed` and `Cancelled` are
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReminderStatus {
    Pending,
    Sent,
    Failed,
    Cancelled,
}

impl ReminderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReminderStatus::Pending => "pending",
            ReminderStatus::Sent => "sent",
            ReminderStatus::Failed => "failed",
            ReminderStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ReminderStatus::Pending)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    ///
    /// A delivery outcome may be re-confirmed (`sent -> sent`,
    /// `failed -> failed`) so that a repeated dispatch of the same claim
    /// records its result without changing the terminal state.
    pub fn can_transition_to(&self, next: ReminderStatus) -> bool {
        match (self, next) {
            (ReminderStatus::Pending, ReminderStatus::Pending) => false,
            (ReminderStatus::Pending, _) => true,
            (ReminderStatus::Sent, ReminderStatus::Sent) => true,
            (ReminderStatus::Failed, ReminderStatus::Failed) => true,
            _ => false,
        }
    }
}

impl FromStr for ReminderStatus {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim().to_ascii_lowercase();
        validate_enum("status", &value, &["pending", "sent", "failed", "cancelled"])?;
        Ok(match value.as_str() {
            "pending" => ReminderStatus::Pending,
            "sent" => ReminderStatus::Sent,
            "failed" => ReminderStatus::Failed,
            _ => ReminderStatus::Cancelled,
        })
    }
}

impl fmt::Display for ReminderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
}

/// Outcome of one channel attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelOutcome {
    pub channel: Channel,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_ref: Option<String>,
}

impl ChannelOutcome {
    pub fn delivered(channel: Channel, external_ref: Option<String>) -> Self {
        Self {
            channel,
            ok: true,
            error: None,
            external_ref,
        }
    }

    pub fn failed(channel: Channel, error: impl Into<String>) -> Self {
        Self {
            channel,
            ok: false,
            error: Some(error.into()),
            external_ref: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryOutcome {
    Sent,
    Failed,
}

impl From<DeliveryOutcome> for ReminderStatus {
    fn from(outcome: DeliveryOutcome) -> Self {
        match outcome {
            DeliveryOutcome::Sent => ReminderStatus::Sent,
            DeliveryOutcome::Failed => ReminderStatus::Failed,
        }
    }
}

/// Per-channel outcomes plus the aggregated overall status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryResult {
    pub overall: DeliveryOutcome,
    pub channels: Vec<ChannelOutcome>,
    pub completed_at: DateTime<Utc>,
}

impl DeliveryResult {
    /// The customer counts as reached when any channel succeeded.
    pub fn aggregate(channels: Vec<ChannelOutcome>, completed_at: DateTime<Utc>) -> Self {
        let overall = if channels.iter().any(|outcome| outcome.ok) {
            DeliveryOutcome::Sent
        } else {
            DeliveryOutcome::Failed
        };

        Self {
            overall,
            channels,
            completed_at,
        }
    }
}

/// Validated input for creating a reminder.
#[derive(Debug, Clone)]
pub struct NewReminder {
    pub order_ref: String,
    pub customer: Customer,
    pub amount_due: BigDecimal,
    pub currency: String,
    pub due_date: NaiveDate,
    pub tier: Tier,
    pub channels: BTreeSet<Channel>,
    pub payment_url: Option<String>,
    pub scheduled_at: DateTime<Utc>,
}

impl NewReminder {
    /// Invariants every stored reminder must satisfy.
    pub fn validate(&self) -> ValidationResult {
        validate_positive_amount(&self.amount_due)?;

        if self.channels.is_empty() {
            return Err(ValidationError::new("channels", "must not be empty"));
        }

        let has_phone = self
            .customer
            .phone
            .as_deref()
            .map(|phone| !phone.trim().is_empty())
            .unwrap_or(false);
        if self.channels.contains(&Channel::Sms) && !has_phone {
            return Err(ValidationError::new(
                "customerPhone",
                "is required when sms is among the channels",
            ));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reminder {
    pub id: Uuid,
    pub order_ref: String,
    pub customer: Customer,
    pub amount_due: BigDecimal,
    pub currency: String,
    pub due_date: NaiveDate,
    pub tier: Tier,
    pub channels: BTreeSet<Channel>,
    pub payment_url: Option<String>,
    pub status: ReminderStatus,
    pub scheduled_at: DateTime<Utc>,
    pub executed_at: Option<DateTime<Utc>>,
    pub delivery_result: Option<DeliveryResult>,
    pub attempts: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Reminder {
    pub fn new(new: NewReminder, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_ref: new.order_ref,
            customer: new.customer,
            amount_due: new.amount_due,
            currency: new.currency,
            due_date: new.due_date,
            tier: new.tier,
            channels: new.channels,
            payment_url: new.payment_url,
            status: ReminderStatus::Pending,
            scheduled_at: new.scheduled_at,
            executed_at: None,
            delivery_result: None,
            attempts: 0,
            created_at,
            updated_at: created_at,
        }
    }

    /// Claimed by a scheduler but no delivery result recorded yet.
    pub fn is_unresolved_claim(&self) -> bool {
        self.status == ReminderStatus::Pending
            && self.executed_at.is_some()
            && self.delivery_result.is_none()
    }

    /// Firing order: `scheduled_at`, then `created_at`, then `id`.
    pub fn firing_key(&self) -> (DateTime<Utc>, DateTime<Utc>, Uuid) {
        (self.scheduled_at, self.created_at, self.id)
    }
}

/// Filter for terminal (non-pending) reminders. The date range applies to
/// `created_at` and is inclusive on both ends.
#[derive(Debug, Clone, Default)]
pub struct HistoryFilter {
    pub order_ref: Option<String>,
    pub tier: Option<Tier>,
    pub status: Option<ReminderStatus>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl HistoryFilter {
    pub fn for_order(order_ref: impl Into<String>) -> Self {
        Self {
            order_ref: Some(order_ref.into()),
            ..Self::default()
        }
    }

    pub fn matches(&self, reminder: &Reminder) -> bool {
        if reminder.status == ReminderStatus::Pending {
            return false;
        }
        if let Some(order_ref) = &self.order_ref {
            if &reminder.order_ref != order_ref {
                return false;
            }
        }
        if self.tier.map_or(false, |tier| tier != reminder.tier) {
            return false;
        }
        if self.status.map_or(false, |status| status != reminder.status) {
            return false;
        }
        if self.from.map_or(false, |from| reminder.created_at < from) {
            return false;
        }
        if self.to.map_or(false, |to| reminder.created_at > to) {
            return false;
        }
        true
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierCounts {
    pub gentle: u64,
    pub urgent: u64,
    #[serde(rename = "final")]
    pub final_: u64,
}

/// Aggregate counts by status and tier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReminderStats {
    /// Reminders still pending, including ones being dispatched.
    pub scheduled_count: u64,
    /// Reminders with a delivery outcome (`sent` + `failed`).
    pub completed_count: u64,
    pub sent_count: u64,
    pub failed_count: u64,
    pub cancelled_count: u64,
    pub by_tier: TierCounts,
}

impl ReminderStats {
    pub fn tally<'a>(reminders: impl IntoIterator<Item = &'a Reminder>) -> Self {
        let mut stats = ReminderStats::default();

        for reminder in reminders {
            match reminder.status {
                ReminderStatus::Pending => stats.scheduled_count += 1,
                ReminderStatus::Sent => {
                    stats.sent_count += 1;
                    stats.completed_count += 1;
                }
                ReminderStatus::Failed => {
                    stats.failed_count += 1;
                    stats.completed_count += 1;
                }
                ReminderStatus::Cancelled => stats.cancelled_count += 1,
            }

            match reminder.tier {
                Tier::Gentle => stats.by_tier.gentle += 1,
                Tier::Urgent => stats.by_tier.urgent += 1,
                Tier::Final => stats.by_tier.final_ += 1,
            }
        }

        stats
    }
}
