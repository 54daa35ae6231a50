use anyhow::Context;
use dotenvy::dotenv;
use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::domain::escalation::{DEFAULT_GENTLE_MAX_DAYS, DEFAULT_URGENT_MAX_DAYS};
use crate::domain::EscalationPolicy;
use crate::services::scheduler::{DEFAULT_MAX_DISPATCH_ATTEMPTS, DEFAULT_TICK_INTERVAL_SECS};
use crate::services::SchedulerConfig;
use crate::validation::validate_currency;

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => anyhow::bail!("LOG_FORMAT must be 'text' or 'json', got '{}'", other),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server_port: u16,
    /// Unset means the in-memory store.
    pub database_url: Option<String>,
    pub scheduler_tick_secs: u64,
    pub channel_timeout_ms: u64,
    pub max_dispatch_attempts: i32,
    pub escalation_gentle_max_days: i64,
    pub escalation_urgent_max_days: i64,
    pub default_currency: String,
    pub email_gateway_url: Option<String>,
    pub sms_gateway_url: Option<String>,
    pub gateway_signing_secret: Option<String>,
    pub gateway_failure_threshold: u32,
    pub gateway_reset_timeout_secs: u64,
    pub log_format: LogFormat,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok(); // Load .env file if present

        let config = Config {
            server_port: parse_var("SERVER_PORT", 3000)?,
            database_url: optional_var("DATABASE_URL"),
            scheduler_tick_secs: parse_var("SCHEDULER_TICK_SECS", DEFAULT_TICK_INTERVAL_SECS)?,
            channel_timeout_ms: parse_var("CHANNEL_TIMEOUT_MS", 10_000)?,
            max_dispatch_attempts: parse_var("MAX_DISPATCH_ATTEMPTS", DEFAULT_MAX_DISPATCH_ATTEMPTS)?,
            escalation_gentle_max_days: parse_var(
                "ESCALATION_GENTLE_MAX_DAYS",
                DEFAULT_GENTLE_MAX_DAYS,
            )?,
            escalation_urgent_max_days: parse_var(
                "ESCALATION_URGENT_MAX_DAYS",
                DEFAULT_URGENT_MAX_DAYS,
            )?,
            default_currency: optional_var("DEFAULT_CURRENCY")
                .unwrap_or_else(|| "USD".to_string())
                .to_ascii_uppercase(),
            email_gateway_url: optional_var("EMAIL_GATEWAY_URL"),
            sms_gateway_url: optional_var("SMS_GATEWAY_URL"),
            gateway_signing_secret: optional_var("GATEWAY_SIGNING_SECRET"),
            gateway_failure_threshold: parse_var("GATEWAY_FAILURE_THRESHOLD", 3)?,
            gateway_reset_timeout_secs: parse_var("GATEWAY_RESET_TIMEOUT_SECS", 60)?,
            log_format: parse_var("LOG_FORMAT", LogFormat::Text)?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.scheduler_tick_secs == 0 {
            anyhow::bail!("SCHEDULER_TICK_SECS must be at least 1");
        }
        if self.channel_timeout_ms == 0 {
            anyhow::bail!("CHANNEL_TIMEOUT_MS must be at least 1");
        }
        if self.max_dispatch_attempts < 1 {
            anyhow::bail!("MAX_DISPATCH_ATTEMPTS must be at least 1");
        }
        if self.gateway_failure_threshold == 0 {
            anyhow::bail!("GATEWAY_FAILURE_THRESHOLD must be at least 1");
        }
        validate_currency(&self.default_currency)
            .map_err(|e| anyhow::anyhow!("DEFAULT_CURRENCY is invalid: {}", e))?;
        if let Some(url) = &self.email_gateway_url {
            url::Url::parse(url).context("EMAIL_GATEWAY_URL is not a valid URL")?;
        }
        if let Some(url) = &self.sms_gateway_url {
            url::Url::parse(url).context("SMS_GATEWAY_URL is not a valid URL")?;
        }
        self.policy()?;
        Ok(())
    }

    pub fn policy(&self) -> anyhow::Result<EscalationPolicy> {
        EscalationPolicy::new(self.escalation_gentle_max_days, self.escalation_urgent_max_days)
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            tick_interval: Duration::from_secs(self.scheduler_tick_secs),
            max_dispatch_attempts: self.max_dispatch_attempts,
        }
    }

    pub fn channel_timeout(&self) -> Duration {
        Duration::from_millis(self.channel_timeout_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server_port: 3000,
            database_url: None,
            scheduler_tick_secs: DEFAULT_TICK_INTERVAL_SECS,
            channel_timeout_ms: 10_000,
            max_dispatch_attempts: DEFAULT_MAX_DISPATCH_ATTEMPTS,
            escalation_gentle_max_days: DEFAULT_GENTLE_MAX_DAYS,
            escalation_urgent_max_days: DEFAULT_URGENT_MAX_DAYS,
            default_currency: "USD".to_string(),
            email_gateway_url: None,
            sms_gateway_url: None,
            gateway_signing_secret: None,
            gateway_failure_threshold: 3,
            gateway_reset_timeout_secs: 60,
            log_format: LogFormat::Text,
        }
    }
}

fn optional_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match optional_var(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("{}", e))
            .with_context(|| format!("{} has an invalid value '{}'", key, raw)),
        None => Ok(default),
    }
}
