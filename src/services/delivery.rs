use async_trait::async_trait;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::domain::{Channel, ChannelOutcome, DeliveryResult, Reminder};
use crate::services::clock::Clock;

pub const TIMEOUT_ERROR: &str = "timeout";
pub const UNEXPECTED_ERROR: &str = "unexpected";
pub const NO_SENDER_ERROR: &str = "no sender configured for channel";

/// What a sender reports for one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendOutcome {
    pub ok: bool,
    pub error: Option<String>,
    pub external_ref: Option<String>,
}

impl SendOutcome {
    pub fn delivered(external_ref: Option<String>) -> Self {
        Self {
            ok: true,
            error: None,
            external_ref,
        }
    }

    pub fn rejected(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(error.into()),
            external_ref: None,
        }
    }
}

/// Delivery capability for one channel.
///
/// Expected failures (bad address, provider rejection) are returned as
/// `Ok` with `ok == false`. An `Err` is treated as an unexpected failure.
#[async_trait]
pub trait ReminderSender: Send + Sync {
    async fn send(&self, reminder: &Reminder) -> anyhow::Result<SendOutcome>;
}

/// Sends a reminder over each of its channels and folds the outcomes into
/// one `DeliveryResult`. Channels are attempted concurrently and in
/// isolation; nothing is retried here.
#[derive(Clone)]
pub struct DeliveryCoordinator {
    senders: HashMap<Channel, Arc<dyn ReminderSender>>,
    channel_timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl DeliveryCoordinator {
    pub fn new(clock: Arc<dyn Clock>, channel_timeout: Duration) -> Self {
        Self {
            senders: HashMap::new(),
            channel_timeout,
            clock,
        }
    }

    pub fn with_sender(mut self, channel: Channel, sender: Arc<dyn ReminderSender>) -> Self {
        self.senders.insert(channel, sender);
        self
    }

    pub fn has_sender(&self, channel: Channel) -> bool {
        self.senders.contains_key(&channel)
    }

    pub async fn dispatch(&self, reminder: &Reminder) -> DeliveryResult {
        let attempts = reminder
            .channels
            .iter()
            .map(|channel| self.attempt(*channel, reminder));
        let outcomes = join_all(attempts).await;

        DeliveryResult::aggregate(outcomes, self.clock.now())
    }

    async fn attempt(&self, channel: Channel, reminder: &Reminder) -> ChannelOutcome {
        let Some(sender) = self.senders.get(&channel).cloned() else {
            warn!(reminder_id = %reminder.id, %channel, "no sender configured");
            return ChannelOutcome::failed(channel, NO_SENDER_ERROR);
        };

        // Run the send on its own task so a panicking sender is contained.
        let payload = reminder.clone();
        let mut handle = tokio::spawn(async move { sender.send(&payload).await });

        match timeout(self.channel_timeout, &mut handle).await {
            Ok(Ok(Ok(outcome))) => {
                debug!(reminder_id = %reminder.id, %channel, ok = outcome.ok, "channel attempt finished");
                if outcome.ok {
                    ChannelOutcome::delivered(channel, outcome.external_ref)
                } else {
                    ChannelOutcome {
                        channel,
                        ok: false,
                        error: Some(outcome.error.unwrap_or_else(|| "rejected".to_string())),
                        external_ref: outcome.external_ref,
                    }
                }
            }
            Ok(Ok(Err(e))) => {
                warn!(reminder_id = %reminder.id, %channel, error = %e, "sender failed unexpectedly");
                ChannelOutcome::failed(channel, UNEXPECTED_ERROR)
            }
            Ok(Err(join_err)) => {
                warn!(reminder_id = %reminder.id, %channel, error = %join_err, "sender task aborted");
                ChannelOutcome::failed(channel, UNEXPECTED_ERROR)
            }
            Err(_) => {
                handle.abort();
                warn!(
                    reminder_id = %reminder.id,
                    %channel,
                    timeout_ms = self.channel_timeout.as_millis() as u64,
                    "channel attempt timed out"
                );
                ChannelOutcome::failed(channel, TIMEOUT_ERROR)
            }
        }
    }
}
