use crate::config::Config;
use crate::ports::ReminderRepository;
use anyhow::{Context, Result};
use std::time::Duration;

pub struct ValidationReport {
    pub environment: bool,
    pub store: bool,
    pub email_gateway: bool,
    pub sms_gateway: bool,
    pub errors: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.environment && self.store && self.email_gateway && self.sms_gateway
    }

    pub fn print(&self) {
        println!("\n=== Startup Validation Report ===");
        println!("Environment Variables: {}", status(self.environment));
        println!("Reminder Store:        {}", status(self.store));
        println!("Email Gateway:         {}", status(self.email_gateway));
        println!("SMS Gateway:           {}", status(self.sms_gateway));

        if !self.errors.is_empty() {
            println!("\nErrors:");
            for error in &self.errors {
                println!("  ❌ {}", error);
            }
        }

        println!("\nOverall Status: {}", if self.is_valid() { "✅ PASS" } else { "❌ FAIL" });
        println!("=================================\n");
    }
}

fn status(ok: bool) -> &'static str {
    if ok {
        "✅ OK"
    } else {
        "❌ FAILED"
    }
}

pub async fn validate_environment(
    config: &Config,
    repository: &dyn ReminderRepository,
) -> Result<ValidationReport> {
    let mut report = ValidationReport {
        environment: true,
        store: true,
        email_gateway: true,
        sms_gateway: true,
        errors: Vec::new(),
    };

    if let Err(e) = validate_env_vars(config) {
        report.environment = false;
        report.errors.push(format!("Environment: {}", e));
    }

    if let Err(e) = repository.ping().await {
        report.store = false;
        report.errors.push(format!("Store: {}", e));
    }

    if let Some(url) = &config.email_gateway_url {
        if let Err(e) = validate_gateway(url).await {
            report.email_gateway = false;
            report.errors.push(format!("Email gateway: {}", e));
        }
    }

    if let Some(url) = &config.sms_gateway_url {
        if let Err(e) = validate_gateway(url).await {
            report.sms_gateway = false;
            report.errors.push(format!("SMS gateway: {}", e));
        }
    }

    Ok(report)
}

fn validate_env_vars(config: &Config) -> Result<()> {
    if config.server_port == 0 {
        anyhow::bail!("SERVER_PORT must be greater than 0");
    }
    config.validate()?;

    if config.gateway_signing_secret.is_none()
        && (config.email_gateway_url.is_some() || config.sms_gateway_url.is_some())
    {
        tracing::warn!("GATEWAY_SIGNING_SECRET is unset; gateway requests will not be signed");
    }

    Ok(())
}

/// Any HTTP answer counts as reachable; only transport failures fail.
async fn validate_gateway(base_url: &str) -> Result<()> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()?;

    let response = client
        .get(base_url)
        .send()
        .await
        .context("Failed to connect to gateway")?;

    if response.status().is_server_error() {
        anyhow::bail!("Gateway returned status: {}", response.status());
    }

    Ok(())
}
