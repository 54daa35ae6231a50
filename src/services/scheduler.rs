use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::{ChannelOutcome, DeliveryResult, Reminder, ReminderStatus};
use crate::error::{ReminderError, ReminderResult};
use crate::ports::ReminderRepository;
use crate::services::clock::Clock;
use crate::services::delivery::DeliveryCoordinator;

pub const DEFAULT_TICK_INTERVAL_SECS: u64 = 5;
/// The first dispatch plus one re-attempt after an interrupted dispatch.
pub const DEFAULT_MAX_DISPATCH_ATTEMPTS: i32 = 2;
pub const ABANDONED_ERROR: &str = "abandoned after interrupted dispatch";

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub tick_interval: Duration,
    pub max_dispatch_attempts: i32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(DEFAULT_TICK_INTERVAL_SECS),
            max_dispatch_attempts: DEFAULT_MAX_DISPATCH_ATTEMPTS,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Pending reminders whose `scheduled_at` had passed.
    pub due: usize,
    /// Reminders this tick claimed and dispatched, in firing order.
    pub fired: Vec<Uuid>,
    pub sent: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub redispatched: Vec<Uuid>,
    pub abandoned: Vec<Uuid>,
}

/// Owns the passage of time: fires pending reminders once they are due.
///
/// Every dispatch goes through `fire`, whether the reminder was created for
/// immediate sending or scheduled for later.
pub struct Scheduler {
    repository: Arc<dyn ReminderRepository>,
    coordinator: DeliveryCoordinator,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
    wakeup: Arc<Notify>,
}

impl Scheduler {
    pub fn new(
        repository: Arc<dyn ReminderRepository>,
        coordinator: DeliveryCoordinator,
        clock: Arc<dyn Clock>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            repository,
            coordinator,
            clock,
            config,
            wakeup: Arc::new(Notify::new()),
        }
    }

    /// Handle that makes the running loop tick immediately.
    pub fn wakeup_handle(&self) -> Arc<Notify> {
        self.wakeup.clone()
    }

    /// Claims every due reminder in firing order, then dispatches the claimed
    /// ones concurrently and records their results.
    pub async fn tick(&self) -> ReminderResult<TickReport> {
        let now = self.clock.now();
        let due = self.repository.list_pending(now).await?;

        // A storage error stops further claims, but whatever was already
        // claimed still gets dispatched before the error is returned.
        let mut claimed = Vec::new();
        let mut claim_error = None;
        for reminder in due.iter().filter(|r| r.executed_at.is_none()) {
            match self.repository.claim(reminder.id, now).await {
                Ok(Some(reminder)) => claimed.push(reminder),
                Ok(None) => debug!(reminder_id = %reminder.id, "reminder claimed elsewhere or cancelled"),
                Err(ReminderError::NotFound(id)) => warn!(reminder_id = %id, "due reminder vanished before claim"),
                Err(e) => {
                    error!(
                        reminder_id = %reminder.id,
                        error = %e,
                        already_claimed = claimed.len(),
                        "claim failed; dispatching what was already claimed"
                    );
                    claim_error = Some(e);
                    break;
                }
            }
        }

        let mut report = TickReport {
            due: due.len(),
            fired: claimed.iter().map(|r| r.id).collect(),
            ..TickReport::default()
        };

        if !claimed.is_empty() {
            debug!("Firing {} due reminder(s)", claimed.len());

            let results = join_all(claimed.into_iter().map(|reminder| self.fire(reminder))).await;
            for result in results {
                match result {
                    Ok(reminder) if reminder.status == ReminderStatus::Sent => report.sent += 1,
                    Ok(_) => report.failed += 1,
                    Err(e) => {
                        error!("Failed to record delivery result: {}", e);
                        report.failed += 1;
                    }
                }
            }
        }

        match claim_error {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    /// Dispatches a claimed reminder and records the outcome.
    ///
    /// Firing the same claim twice never flips a terminal status: a result
    /// that disagrees with the recorded one is logged and the recorded
    /// reminder is returned unchanged.
    pub async fn fire(&self, reminder: Reminder) -> ReminderResult<Reminder> {
        let result = self.coordinator.dispatch(&reminder).await;
        let status = ReminderStatus::from(result.overall);

        match self
            .repository
            .transition(reminder.id, status, Some(result), self.clock.now())
            .await
        {
            Ok(updated) => {
                info!(
                    reminder_id = %updated.id,
                    order_ref = %updated.order_ref,
                    tier = %updated.tier,
                    status = %updated.status,
                    "reminder dispatched"
                );
                Ok(updated)
            }
            Err(err @ ReminderError::InvalidTransition { .. }) => {
                error!(reminder_id = %reminder.id, error = %err, "delivery result rejected by state machine");
                self.repository.get(reminder.id).await
            }
            Err(e) => Err(e),
        }
    }

    /// Resolves claims left behind by a previous process. Each one is
    /// re-dispatched once; claims that already had their re-attempt are
    /// marked failed.
    pub async fn recover(&self) -> ReminderResult<RecoveryReport> {
        let mut report = RecoveryReport::default();

        for claim in self.repository.list_unresolved_claims().await? {
            let now = self.clock.now();

            if claim.attempts >= self.config.max_dispatch_attempts {
                let outcomes = claim
                    .channels
                    .iter()
                    .map(|channel| ChannelOutcome::failed(*channel, ABANDONED_ERROR))
                    .collect();
                let result = DeliveryResult::aggregate(outcomes, now);
                match self
                    .repository
                    .transition(claim.id, ReminderStatus::Failed, Some(result), now)
                    .await
                {
                    Ok(_) => {}
                    Err(err @ ReminderError::InvalidTransition { .. }) => {
                        warn!(reminder_id = %claim.id, error = %err, "claim resolved elsewhere before abandonment");
                        continue;
                    }
                    Err(e) => return Err(e),
                }

                warn!(
                    reminder_id = %claim.id,
                    attempts = claim.attempts,
                    "abandoning reminder after interrupted re-attempt"
                );
                report.abandoned.push(claim.id);
                continue;
            }

            match self.repository.reclaim(claim.id, claim.attempts, now).await? {
                Some(reclaimed) => {
                    info!(
                        reminder_id = %reclaimed.id,
                        attempt = reclaimed.attempts,
                        "re-dispatching reminder interrupted mid-dispatch"
                    );
                    self.fire(reclaimed).await?;
                    report.redispatched.push(claim.id);
                }
                None => debug!(reminder_id = %claim.id, "claim resolved elsewhere"),
            }
        }

        Ok(report)
    }

    /// Runs the scheduling loop until `shutdown` flips to `true` or its
    /// sender is dropped.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            tick_secs = self.config.tick_interval.as_secs(),
            "Reminder scheduler started"
        );

        let mut interval = tokio::time::interval(self.config.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = interval.tick() => {}
                _ = self.wakeup.notified() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            }

            if let Err(e) = self.tick().await {
                error!("Scheduler tick error: {}", e);
            }
        }

        info!("Reminder scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryReminderRepository;
    use crate::domain::{Channel, Customer, HistoryFilter, NewReminder, Tier};
    use crate::services::clock::ManualClock;
    use crate::services::delivery::{ReminderSender, SendOutcome};
    use async_trait::async_trait;
    use bigdecimal::BigDecimal;
    use chrono::{DateTime, NaiveDate, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Records the order of sends; delivers unless told otherwise.
    #[derive(Default)]
    struct RecordingSender {
        sent: Mutex<Vec<String>>,
        reject: bool,
    }

    #[async_trait]
    impl ReminderSender for RecordingSender {
        async fn send(&self, reminder: &Reminder) -> anyhow::Result<SendOutcome> {
            self.sent.lock().unwrap().push(reminder.order_ref.clone());
            if self.reject {
                Ok(SendOutcome::rejected("rejected"))
            } else {
                Ok(SendOutcome::delivered(Some(format!("msg-{}", reminder.order_ref))))
            }
        }
    }

    struct Fixture {
        clock: ManualClock,
        repo: Arc<InMemoryReminderRepository>,
        sender: Arc<RecordingSender>,
        scheduler: Scheduler,
    }

    fn fixture(sender: RecordingSender) -> Fixture {
        let clock = ManualClock::new(Utc::now());
        let repo = Arc::new(InMemoryReminderRepository::new());
        let sender = Arc::new(sender);
        let coordinator = DeliveryCoordinator::new(Arc::new(clock.clone()), Duration::from_secs(1))
            .with_sender(Channel::Email, sender.clone());
        let scheduler = Scheduler::new(
            repo.clone(),
            coordinator,
            Arc::new(clock.clone()),
            SchedulerConfig::default(),
        );

        Fixture {
            clock,
            repo,
            sender,
            scheduler,
        }
    }

    fn scheduler_over(
        repository: Arc<dyn ReminderRepository>,
        clock: &ManualClock,
        sender: Arc<RecordingSender>,
    ) -> Scheduler {
        let coordinator = DeliveryCoordinator::new(Arc::new(clock.clone()), Duration::from_secs(1))
            .with_sender(Channel::Email, sender);
        Scheduler::new(
            repository,
            coordinator,
            Arc::new(clock.clone()),
            SchedulerConfig::default(),
        )
    }

    /// In-memory store that can fail the n-th claim or hand out a stale list
    /// of unresolved claims.
    struct ScriptedRepository {
        inner: InMemoryReminderRepository,
        claims: AtomicUsize,
        failing_claim: Option<usize>,
        stale_claims: Option<Vec<Reminder>>,
    }

    impl ScriptedRepository {
        fn new(inner: InMemoryReminderRepository) -> Self {
            Self {
                inner,
                claims: AtomicUsize::new(0),
                failing_claim: None,
                stale_claims: None,
            }
        }
    }

    #[async_trait]
    impl ReminderRepository for ScriptedRepository {
        async fn create(&self, new: NewReminder, now: DateTime<Utc>) -> ReminderResult<Reminder> {
            self.inner.create(new, now).await
        }

        async fn get(&self, id: Uuid) -> ReminderResult<Reminder> {
            self.inner.get(id).await
        }

        async fn list_pending(&self, before: DateTime<Utc>) -> ReminderResult<Vec<Reminder>> {
            self.inner.list_pending(before).await
        }

        async fn list_history(&self, filter: &HistoryFilter) -> ReminderResult<Vec<Reminder>> {
            self.inner.list_history(filter).await
        }

        async fn list_unresolved_claims(&self) -> ReminderResult<Vec<Reminder>> {
            match &self.stale_claims {
                Some(claims) => Ok(claims.clone()),
                None => self.inner.list_unresolved_claims().await,
            }
        }

        async fn claim(&self, id: Uuid, at: DateTime<Utc>) -> ReminderResult<Option<Reminder>> {
            let n = self.claims.fetch_add(1, Ordering::SeqCst) + 1;
            if self.failing_claim == Some(n) {
                return Err(ReminderError::Storage("connection reset".to_string()));
            }
            self.inner.claim(id, at).await
        }

        async fn reclaim(
            &self,
            id: Uuid,
            expected_attempts: i32,
            at: DateTime<Utc>,
        ) -> ReminderResult<Option<Reminder>> {
            self.inner.reclaim(id, expected_attempts, at).await
        }

        async fn transition(
            &self,
            id: Uuid,
            status: ReminderStatus,
            result: Option<DeliveryResult>,
            at: DateTime<Utc>,
        ) -> ReminderResult<Reminder> {
            self.inner.transition(id, status, result, at).await
        }

        async fn cancel(&self, id: Uuid, at: DateTime<Utc>) -> ReminderResult<Reminder> {
            self.inner.cancel(id, at).await
        }

        async fn ping(&self) -> ReminderResult<()> {
            self.inner.ping().await
        }
    }

    fn new_reminder(order_ref: &str, scheduled_at: chrono::DateTime<Utc>) -> NewReminder {
        NewReminder {
            order_ref: order_ref.to_string(),
            customer: Customer {
                name: "Kabir".to_string(),
                email: "kabir@example.com".to_string(),
                phone: None,
            },
            amount_due: BigDecimal::from(500),
            currency: "USD".to_string(),
            due_date: NaiveDate::from_ymd_opt(2026, 10, 1).unwrap(),
            tier: Tier::Gentle,
            channels: [Channel::Email].into_iter().collect(),
            payment_url: None,
            scheduled_at,
        }
    }

    #[tokio::test]
    async fn fires_due_reminders_in_schedule_order() {
        let f = fixture(RecordingSender::default());
        let now = f.clock.now();

        f.repo
            .create(new_reminder("ORD-B", now + chrono::Duration::minutes(2)), now)
            .await
            .unwrap();
        f.repo
            .create(new_reminder("ORD-A", now + chrono::Duration::minutes(1)), now)
            .await
            .unwrap();
        f.repo
            .create(new_reminder("ORD-C", now + chrono::Duration::hours(1)), now)
            .await
            .unwrap();

        f.clock.advance(chrono::Duration::minutes(5));
        let report = f.scheduler.tick().await.unwrap();

        assert_eq!(report.due, 2);
        assert_eq!(report.sent, 2);
        let fired: Vec<String> = futures::future::join_all(
            report.fired.iter().map(|id| f.repo.get(*id)),
        )
        .await
        .into_iter()
        .map(|r| r.unwrap().order_ref)
        .collect();
        assert_eq!(fired, vec!["ORD-A".to_string(), "ORD-B".to_string()]);

        let again = f.scheduler.tick().await.unwrap();
        assert!(again.fired.is_empty());
        assert_eq!(f.sender.sent.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn rejected_delivery_marks_failed() {
        let f = fixture(RecordingSender {
            reject: true,
            ..RecordingSender::default()
        });
        let now = f.clock.now();
        let reminder = f.repo.create(new_reminder("ORD-1", now), now).await.unwrap();

        let report = f.scheduler.tick().await.unwrap();
        assert_eq!(report.failed, 1);

        let stored = f.repo.get(reminder.id).await.unwrap();
        assert_eq!(stored.status, ReminderStatus::Failed);
        assert_eq!(stored.attempts, 1);
        assert!(stored.executed_at.is_some());
    }

    #[tokio::test]
    async fn recovery_redispatches_once_then_abandons() {
        let f = fixture(RecordingSender::default());
        let now = f.clock.now();

        let interrupted = f.repo.create(new_reminder("ORD-1", now), now).await.unwrap();
        f.repo.claim(interrupted.id, now).await.unwrap();

        let exhausted = f.repo.create(new_reminder("ORD-2", now), now).await.unwrap();
        f.repo.claim(exhausted.id, now).await.unwrap();
        f.repo.reclaim(exhausted.id, 1, now).await.unwrap();

        let report = f.scheduler.recover().await.unwrap();
        assert_eq!(report.redispatched, vec![interrupted.id]);
        assert_eq!(report.abandoned, vec![exhausted.id]);

        let sent = f.repo.get(interrupted.id).await.unwrap();
        assert_eq!(sent.status, ReminderStatus::Sent);
        assert_eq!(sent.attempts, 2);

        let abandoned = f.repo.get(exhausted.id).await.unwrap();
        assert_eq!(abandoned.status, ReminderStatus::Failed);
        let result = abandoned.delivery_result.unwrap();
        assert_eq!(result.channels[0].error.as_deref(), Some(ABANDONED_ERROR));

        assert_eq!(f.sender.sent.lock().unwrap().as_slice(), ["ORD-1".to_string()]);
    }

    #[tokio::test]
    async fn claim_error_still_dispatches_earlier_claims() {
        let clock = ManualClock::new(Utc::now());
        let now = clock.now();
        let inner = InMemoryReminderRepository::new();
        let first = inner.create(new_reminder("ORD-A", now), now).await.unwrap();
        let second = inner
            .create(new_reminder("ORD-B", now), now + chrono::Duration::seconds(1))
            .await
            .unwrap();

        let mut repo = ScriptedRepository::new(inner.clone());
        repo.failing_claim = Some(2);
        let sender = Arc::new(RecordingSender::default());
        let scheduler = scheduler_over(Arc::new(repo), &clock, sender.clone());

        clock.advance(chrono::Duration::minutes(1));
        let err = scheduler.tick().await.unwrap_err();
        assert!(matches!(err, ReminderError::Storage(_)));

        let fired = inner.get(first.id).await.unwrap();
        assert_eq!(fired.status, ReminderStatus::Sent);
        assert!(fired.delivery_result.is_some());
        assert!(inner.list_unresolved_claims().await.unwrap().is_empty());

        let untouched = inner.get(second.id).await.unwrap();
        assert_eq!(untouched.status, ReminderStatus::Pending);
        assert!(untouched.executed_at.is_none());
        assert_eq!(sender.sent.lock().unwrap().as_slice(), ["ORD-A".to_string()]);

        let report = scheduler.tick().await.unwrap();
        assert_eq!(report.fired, vec![second.id]);
        assert_eq!(inner.get(second.id).await.unwrap().status, ReminderStatus::Sent);
    }

    #[tokio::test]
    async fn refiring_with_a_conflicting_outcome_keeps_the_recorded_status() {
        let f = fixture(RecordingSender::default());
        let now = f.clock.now();
        let reminder = f.repo.create(new_reminder("ORD-1", now), now).await.unwrap();
        let claimed = f.repo.claim(reminder.id, now).await.unwrap().unwrap();

        let sent = f.scheduler.fire(claimed.clone()).await.unwrap();
        assert_eq!(sent.status, ReminderStatus::Sent);
        let recorded = sent.delivery_result.clone();
        assert!(recorded.is_some());

        let rejecting = scheduler_over(
            f.repo.clone(),
            &f.clock,
            Arc::new(RecordingSender {
                reject: true,
                ..RecordingSender::default()
            }),
        );
        let refired = rejecting.fire(claimed).await.unwrap();
        assert_eq!(refired.status, ReminderStatus::Sent);
        assert_eq!(refired.delivery_result, recorded);

        let stored = f.repo.get(reminder.id).await.unwrap();
        assert_eq!(stored.status, ReminderStatus::Sent);
        assert_eq!(stored.delivery_result, recorded);
    }

    #[tokio::test]
    async fn refiring_with_the_same_outcome_replaces_the_result() {
        let f = fixture(RecordingSender::default());
        let now = f.clock.now();
        let reminder = f.repo.create(new_reminder("ORD-1", now), now).await.unwrap();
        let claimed = f.repo.claim(reminder.id, now).await.unwrap().unwrap();

        let first = f.scheduler.fire(claimed.clone()).await.unwrap();
        assert_eq!(first.delivery_result.unwrap().completed_at, now);

        f.clock.advance(chrono::Duration::minutes(5));
        let second = f.scheduler.fire(claimed).await.unwrap();
        assert_eq!(second.status, ReminderStatus::Sent);

        let stored = f.repo.get(reminder.id).await.unwrap();
        assert_eq!(stored.status, ReminderStatus::Sent);
        assert_eq!(stored.delivery_result.unwrap().completed_at, f.clock.now());
        assert_eq!(f.sender.sent.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn recovery_skips_claims_resolved_elsewhere() {
        let clock = ManualClock::new(Utc::now());
        let now = clock.now();
        let inner = InMemoryReminderRepository::new();

        let resolved = inner.create(new_reminder("ORD-1", now), now).await.unwrap();
        inner.claim(resolved.id, now).await.unwrap();
        inner.reclaim(resolved.id, 1, now).await.unwrap();

        let interrupted = inner.create(new_reminder("ORD-2", now), now).await.unwrap();
        inner.claim(interrupted.id, now).await.unwrap();

        // Listed as unresolved, then another instance records its result.
        let snapshot = inner.list_unresolved_claims().await.unwrap();
        assert_eq!(snapshot.len(), 2);
        let result =
            DeliveryResult::aggregate(vec![ChannelOutcome::delivered(Channel::Email, None)], now);
        inner
            .transition(resolved.id, ReminderStatus::Sent, Some(result), now)
            .await
            .unwrap();

        let mut repo = ScriptedRepository::new(inner.clone());
        repo.stale_claims = Some(snapshot);
        let sender = Arc::new(RecordingSender::default());
        let scheduler = scheduler_over(Arc::new(repo), &clock, sender.clone());

        let report = scheduler.recover().await.unwrap();
        assert!(report.abandoned.is_empty());
        assert_eq!(report.redispatched, vec![interrupted.id]);

        assert_eq!(inner.get(resolved.id).await.unwrap().status, ReminderStatus::Sent);
        assert_eq!(inner.get(interrupted.id).await.unwrap().status, ReminderStatus::Sent);
        assert_eq!(sender.sent.lock().unwrap().as_slice(), ["ORD-2".to_string()]);
    }

    #[tokio::test]
    async fn tick_skips_claims_owned_by_another_instance() {
        let f = fixture(RecordingSender::default());
        let now = f.clock.now();
        let reminder = f.repo.create(new_reminder("ORD-1", now), now).await.unwrap();
        f.repo.claim(reminder.id, now).await.unwrap();

        let report = f.scheduler.tick().await.unwrap();
        assert_eq!(report.due, 1);
        assert!(report.fired.is_empty());
        assert!(f.sender.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn run_loop_fires_on_wakeup_and_stops_on_shutdown() {
        let f = fixture(RecordingSender::default());
        let now = f.clock.now();
        let reminder = f.repo.create(new_reminder("ORD-1", now), now).await.unwrap();

        let scheduler = Arc::new(f.scheduler);
        let wakeup = scheduler.wakeup_handle();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(scheduler.clone().run(shutdown_rx));

        wakeup.notify_one();
        let mut status = ReminderStatus::Pending;
        for _ in 0..50 {
            status = f.repo.get(reminder.id).await.unwrap().status;
            if status != ReminderStatus::Pending {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(status, ReminderStatus::Sent);

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("scheduler stops")
            .unwrap();
    }
}
