//! Postgres implementation of ReminderRepository.
//!
//! The duplicate-pending guard is the partial unique index
//! `idx_payment_reminders_pending_slot`; claims are conditional updates so
//! that only one scheduler instance wins a reminder.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use std::collections::BTreeSet;
use tracing::debug;
use uuid::Uuid;

use super::check_transition;
use crate::domain::{
    Channel, Customer, DeliveryResult, HistoryFilter, NewReminder, Reminder, ReminderStatus, Tier,
};
use crate::error::{ReminderError, ReminderResult};
use crate::ports::ReminderRepository;

const UNIQUE_VIOLATION: &str = "23505";
const INSERT_ATTEMPTS: u32 = 2;

/// Postgres-backed reminder repository.
#[derive(Clone)]
pub struct PostgresReminderRepository {
    pool: PgPool,
}

impl PostgresReminderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_optional(&self, id: Uuid) -> ReminderResult<Option<Reminder>> {
        let row = sqlx::query_as::<_, ReminderRow>("SELECT * FROM payment_reminders WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(ReminderRow::into_domain).transpose()
    }

    async fn pending_slot_holder(&self, order_ref: &str, tier: Tier) -> ReminderResult<Option<Uuid>> {
        let id = sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM payment_reminders WHERE order_ref = $1 AND tier = $2 AND status = 'pending'",
        )
        .bind(order_ref)
        .bind(tier.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(id)
    }

    async fn insert(&self, reminder: &Reminder) -> Result<ReminderRow, sqlx::Error> {
        let channels: Vec<String> = reminder
            .channels
            .iter()
            .map(|channel| channel.as_str().to_string())
            .collect();

        sqlx::query_as::<_, ReminderRow>(
            r#"
            INSERT INTO payment_reminders (
                id, order_ref, customer_name, customer_email, customer_phone,
                amount_due, currency, due_date, tier, channels, payment_url,
                status, scheduled_at, attempts, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            RETURNING *
            "#,
        )
        .bind(reminder.id)
        .bind(&reminder.order_ref)
        .bind(&reminder.customer.name)
        .bind(&reminder.customer.email)
        .bind(&reminder.customer.phone)
        .bind(&reminder.amount_due)
        .bind(&reminder.currency)
        .bind(reminder.due_date)
        .bind(reminder.tier.as_str())
        .bind(&channels)
        .bind(&reminder.payment_url)
        .bind(reminder.status.as_str())
        .bind(reminder.scheduled_at)
        .bind(reminder.attempts)
        .bind(reminder.created_at)
        .bind(reminder.updated_at)
        .fetch_one(&self.pool)
        .await
    }

    /// A conditional update matched nothing: report `NotFound` for unknown
    /// ids, otherwise `None`.
    async fn missed_update(&self, id: Uuid) -> ReminderResult<Option<Reminder>> {
        match self.fetch_optional(id).await? {
            Some(_) => Ok(None),
            None => Err(ReminderError::NotFound(id)),
        }
    }

    fn collect(rows: Vec<ReminderRow>) -> ReminderResult<Vec<Reminder>> {
        rows.into_iter().map(ReminderRow::into_domain).collect()
    }
}

#[async_trait]
impl ReminderRepository for PostgresReminderRepository {
    async fn create(&self, new: NewReminder, now: DateTime<Utc>) -> ReminderResult<Reminder> {
        new.validate()?;

        let reminder = Reminder::new(new, now);

        // The slot holder can resolve between the failed INSERT and the
        // lookup; the slot is then free and one more INSERT settles it.
        for attempt in 1..=INSERT_ATTEMPTS {
            match self.insert(&reminder).await {
                Ok(row) => return row.into_domain(),
                Err(sqlx::Error::Database(db_err))
                    if db_err.code().as_deref() == Some(UNIQUE_VIOLATION) =>
                {
                    if let Some(existing) = self
                        .pending_slot_holder(&reminder.order_ref, reminder.tier)
                        .await?
                    {
                        return Err(ReminderError::DuplicatePending {
                            order_ref: reminder.order_ref,
                            tier: reminder.tier,
                            existing,
                        });
                    }
                    debug!(
                        order_ref = %reminder.order_ref,
                        tier = %reminder.tier,
                        attempt,
                        "pending slot released during insert"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(ReminderError::Storage(format!(
            "pending {} slot for order {} kept changing during insert",
            reminder.tier, reminder.order_ref
        )))
    }

    async fn get(&self, id: Uuid) -> ReminderResult<Reminder> {
        self.fetch_optional(id)
            .await?
            .ok_or(ReminderError::NotFound(id))
    }

    async fn list_pending(&self, before: DateTime<Utc>) -> ReminderResult<Vec<Reminder>> {
        let rows = sqlx::query_as::<_, ReminderRow>(
            r#"
            SELECT * FROM payment_reminders
            WHERE status = 'pending' AND scheduled_at <= $1
            ORDER BY scheduled_at ASC, created_at ASC, id ASC
            "#,
        )
        .bind(before)
        .fetch_all(&self.pool)
        .await?;

        Self::collect(rows)
    }

    async fn list_history(&self, filter: &HistoryFilter) -> ReminderResult<Vec<Reminder>> {
        let rows = sqlx::query_as::<_, ReminderRow>(
            r#"
            SELECT * FROM payment_reminders
            WHERE status <> 'pending'
              AND ($1::text IS NULL OR order_ref = $1)
              AND ($2::text IS NULL OR tier = $2)
              AND ($3::text IS NULL OR status = $3)
              AND ($4::timestamptz IS NULL OR created_at >= $4)
              AND ($5::timestamptz IS NULL OR created_at <= $5)
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(filter.order_ref.as_deref())
        .bind(filter.tier.map(|tier| tier.as_str()))
        .bind(filter.status.map(|status| status.as_str()))
        .bind(filter.from)
        .bind(filter.to)
        .fetch_all(&self.pool)
        .await?;

        Self::collect(rows)
    }

    async fn list_unresolved_claims(&self) -> ReminderResult<Vec<Reminder>> {
        let rows = sqlx::query_as::<_, ReminderRow>(
            r#"
            SELECT * FROM payment_reminders
            WHERE status = 'pending'
              AND executed_at IS NOT NULL
              AND delivery_result IS NULL
            ORDER BY scheduled_at ASC, created_at ASC, id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Self::collect(rows)
    }

    async fn claim(&self, id: Uuid, at: DateTime<Utc>) -> ReminderResult<Option<Reminder>> {
        let row = sqlx::query_as::<_, ReminderRow>(
            r#"
            UPDATE payment_reminders
            SET executed_at = $2, attempts = attempts + 1, updated_at = $2
            WHERE id = $1 AND status = 'pending' AND executed_at IS NULL
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(at)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => row.into_domain().map(Some),
            None => self.missed_update(id).await,
        }
    }

    async fn reclaim(
        &self,
        id: Uuid,
        expected_attempts: i32,
        at: DateTime<Utc>,
    ) -> ReminderResult<Option<Reminder>> {
        let row = sqlx::query_as::<_, ReminderRow>(
            r#"
            UPDATE payment_reminders
            SET executed_at = $2, attempts = attempts + 1, updated_at = $2
            WHERE id = $1
              AND status = 'pending'
              AND executed_at IS NOT NULL
              AND delivery_result IS NULL
              AND attempts = $3
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(at)
        .bind(expected_attempts)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => row.into_domain().map(Some),
            None => self.missed_update(id).await,
        }
    }

    async fn transition(
        &self,
        id: Uuid,
        status: ReminderStatus,
        result: Option<DeliveryResult>,
        at: DateTime<Utc>,
    ) -> ReminderResult<Reminder> {
        let mut tx = self.pool.begin().await?;

        let (current, executed_at) = sqlx::query_as::<_, (String, Option<DateTime<Utc>>)>(
            "SELECT status, executed_at FROM payment_reminders WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(ReminderError::NotFound(id))?;
        let current: ReminderStatus = current.parse()?;

        if let Err(e) = check_transition(id, current, executed_at.is_some(), status, result.as_ref()) {
            tx.rollback().await?;
            return Err(e);
        }

        let row = sqlx::query_as::<_, ReminderRow>(
            r#"
            UPDATE payment_reminders
            SET status = $2,
                delivery_result = COALESCE($3, delivery_result),
                updated_at = $4
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(result.map(Json))
        .bind(at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        row.into_domain()
    }

    async fn cancel(&self, id: Uuid, at: DateTime<Utc>) -> ReminderResult<Reminder> {
        let row = sqlx::query_as::<_, ReminderRow>(
            r#"
            UPDATE payment_reminders
            SET status = 'cancelled', updated_at = $2
            WHERE id = $1 AND status = 'pending' AND executed_at IS NULL
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(at)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => row.into_domain(),
            None => {
                self.missed_update(id).await?;
                Err(ReminderError::AlreadyExecuted(id))
            }
        }
    }

    async fn ping(&self) -> ReminderResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Internal row type for SQLx. Not exposed outside the adapter.
#[derive(Debug, sqlx::FromRow)]
struct ReminderRow {
    id: Uuid,
    order_ref: String,
    customer_name: String,
    customer_email: String,
    customer_phone: Option<String>,
    amount_due: BigDecimal,
    currency: String,
    due_date: NaiveDate,
    tier: String,
    channels: Vec<String>,
    payment_url: Option<String>,
    status: String,
    scheduled_at: DateTime<Utc>,
    executed_at: Option<DateTime<Utc>>,
    delivery_result: Option<Json<DeliveryResult>>,
    attempts: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ReminderRow {
    fn into_domain(self) -> ReminderResult<Reminder> {
        let channels = self
            .channels
            .iter()
            .map(|channel| channel.parse::<Channel>())
            .collect::<Result<BTreeSet<_>, _>>()
            .map_err(|e| ReminderError::Storage(format!("reminder {}: {}", self.id, e)))?;
        let tier: Tier = self
            .tier
            .parse()
            .map_err(|e| ReminderError::Storage(format!("reminder {}: {}", self.id, e)))?;
        let status: ReminderStatus = self
            .status
            .parse()
            .map_err(|e| ReminderError::Storage(format!("reminder {}: {}", self.id, e)))?;

        Ok(Reminder {
            id: self.id,
            order_ref: self.order_ref,
            customer: Customer {
                name: self.customer_name,
                email: self.customer_email,
                phone: self.customer_phone,
            },
            amount_due: self.amount_due,
            currency: self.currency.trim().to_string(),
            due_date: self.due_date,
            tier,
            channels,
            payment_url: self.payment_url,
            status,
            scheduled_at: self.scheduled_at,
            executed_at: self.executed_at,
            delivery_result: self.delivery_result.map(|json| json.0),
            attempts: self.attempts,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
