use async_trait::async_trait;
use failsafe::futures::CircuitBreaker as FuturesCircuitBreaker;
use failsafe::{backoff, failure_policy, Config, Error as FailsafeError, StateMachine};
use hmac::{Hmac, Mac};
use reqwest::{header::CONTENT_TYPE, Client, StatusCode};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{Channel, Reminder, Tier};
use crate::services::delivery::{ReminderSender, SendOutcome, TIMEOUT_ERROR};

pub const SIGNATURE_HEADER: &str = "X-Reminder-Signature";
pub const CIRCUIT_OPEN_ERROR: &str = "circuit breaker open";

type HmacSha256 = Hmac<Sha256>;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("HTTP request failed: {0}")]
    RequestError(#[from] reqwest::Error),
    #[error("Gateway returned {0}")]
    Upstream(StatusCode),
}

/// Message body posted to the gateway. Rendering into a template is the
/// gateway's job.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GatewayMessage<'a> {
    channel: Channel,
    reminder_id: Uuid,
    order_ref: &'a str,
    tier: Tier,
    recipient: &'a str,
    customer_name: &'a str,
    amount_due: String,
    currency: &'a str,
    due_date: String,
    payment_url: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct GatewayReceipt {
    id: Option<String>,
}

/// HTTP sender for one channel (an email or SMS provider gateway).
#[derive(Clone)]
pub struct GatewaySender {
    client: Client,
    base_url: String,
    channel: Channel,
    signing_secret: Option<String>,
    circuit_breaker: StateMachine<failure_policy::ConsecutiveFailures<backoff::EqualJittered>, ()>,
}

impl GatewaySender {
    /// Creates a sender with the default breaker: open after 3 consecutive
    /// failures, try again after 60-120s.
    pub fn new(
        channel: Channel,
        base_url: String,
        signing_secret: Option<String>,
        request_timeout: Duration,
    ) -> Self {
        Self::with_circuit_breaker(channel, base_url, signing_secret, request_timeout, 3, 60)
    }

    pub fn with_circuit_breaker(
        channel: Channel,
        base_url: String,
        signing_secret: Option<String>,
        request_timeout: Duration,
        failure_threshold: u32,
        reset_timeout_secs: u64,
    ) -> Self {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .unwrap_or_default();

        let backoff = backoff::equal_jittered(
            Duration::from_secs(reset_timeout_secs),
            Duration::from_secs(reset_timeout_secs * 2),
        );
        let policy = failure_policy::consecutive_failures(failure_threshold, backoff);
        let circuit_breaker = Config::new().failure_policy(policy).build();

        GatewaySender {
            client,
            base_url,
            channel,
            signing_secret,
            circuit_breaker,
        }
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// Returns the current state of the circuit breaker
    pub fn circuit_state(&self) -> String {
        if self.circuit_breaker.is_call_permitted() {
            "closed".to_string()
        } else {
            "open".to_string()
        }
    }

    fn signature_for(&self, body: &[u8]) -> anyhow::Result<Option<String>> {
        let Some(secret) = &self.signing_secret else {
            return Ok(None);
        };

        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| anyhow::anyhow!("invalid signing secret: {}", e))?;
        mac.update(body);
        Ok(Some(hex::encode(mac.finalize().into_bytes())))
    }
}

#[async_trait]
impl ReminderSender for GatewaySender {
    async fn send(&self, reminder: &Reminder) -> anyhow::Result<SendOutcome> {
        let recipient = match self.channel {
            Channel::Email => reminder.customer.email.as_str(),
            Channel::Sms => match reminder.customer.phone.as_deref() {
                Some(phone) => phone,
                None => return Ok(SendOutcome::rejected("no phone number on reminder")),
            },
        };

        let message = GatewayMessage {
            channel: self.channel,
            reminder_id: reminder.id,
            order_ref: &reminder.order_ref,
            tier: reminder.tier,
            recipient,
            customer_name: &reminder.customer.name,
            amount_due: reminder.amount_due.to_string(),
            currency: &reminder.currency,
            due_date: reminder.due_date.to_string(),
            payment_url: reminder.payment_url.as_deref(),
        };
        let body = serde_json::to_vec(&message)?;
        let signature = self.signature_for(&body)?;

        let url = format!("{}/messages", self.base_url.trim_end_matches('/'));
        let client = self.client.clone();

        let result = self
            .circuit_breaker
            .call(async move {
                let mut request = client
                    .post(&url)
                    .header(CONTENT_TYPE, "application/json")
                    .body(body);
                if let Some(signature) = signature {
                    request = request.header(SIGNATURE_HEADER, signature);
                }

                let response = request.send().await?;
                let status = response.status();

                if status.is_server_error() {
                    return Err(GatewayError::Upstream(status));
                }
                if !status.is_success() {
                    return Ok(SendOutcome::rejected(format!(
                        "provider rejected message: {}",
                        status
                    )));
                }

                let receipt = response.json::<GatewayReceipt>().await.ok();
                Ok(SendOutcome::delivered(receipt.and_then(|r| r.id)))
            })
            .await;

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(FailsafeError::Rejected) => SendOutcome::rejected(CIRCUIT_OPEN_ERROR),
            Err(FailsafeError::Inner(GatewayError::RequestError(e))) if e.is_timeout() => {
                SendOutcome::rejected(TIMEOUT_ERROR)
            }
            Err(FailsafeError::Inner(e)) => SendOutcome::rejected(e.to_string()),
        };

        if !outcome.ok {
            tracing::warn!(
                reminder_id = %reminder.id,
                channel = %self.channel,
                error = outcome.error.as_deref().unwrap_or_default(),
                "gateway did not accept reminder"
            );
        }

        Ok(outcome)
    }
}
