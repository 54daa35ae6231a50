use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use uuid::Uuid;

use crate::config::Config;
use crate::domain::{EscalationPolicy, Reminder};
use crate::services::ReminderService;

#[derive(Parser)]
#[command(name = "payment-reminders")]
#[command(about = "Payment Reminders - overdue payment escalation engine", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server and scheduler (default)
    Serve,

    /// Reminder inspection and management commands
    #[command(subcommand)]
    Reminders(ReminderCommands),

    /// Database management commands
    #[command(subcommand)]
    Db(DbCommands),

    /// Configuration validation
    Config,
}

#[derive(Subcommand)]
pub enum ReminderCommands {
    /// List pending reminders due at or before a point in time (default: now)
    Pending {
        /// RFC 3339 timestamp
        #[arg(long)]
        before: Option<DateTime<Utc>>,
    },

    /// Show a single reminder
    Get {
        #[arg(value_name = "ID")]
        id: Uuid,
    },

    /// Cancel a pending reminder
    Cancel {
        #[arg(value_name = "ID")]
        id: Uuid,
    },

    /// Show scheduled and completed counts
    Stats {
        #[arg(long)]
        order_ref: Option<String>,
    },

    /// Print the tier the escalation policy assigns to a number of days overdue
    Classify {
        #[arg(value_name = "DAYS", allow_hyphen_values = true)]
        days: i64,
    },
}

#[derive(Subcommand)]
pub enum DbCommands {
    /// Run database migrations
    Migrate,
}

pub async fn handle_reminders_pending(
    service: &ReminderService,
    before: Option<DateTime<Utc>>,
) -> anyhow::Result<()> {
    let reminders = service.list_pending(before).await?;

    if reminders.is_empty() {
        println!("No pending reminders");
        return Ok(());
    }

    println!(
        "{:<38} {:<20} {:<8} {:<26} {:<8}",
        "ID", "Order", "Tier", "Scheduled At", "Attempts"
    );
    println!("{}", "-".repeat(104));

    for reminder in reminders {
        println!(
            "{:<38} {:<20} {:<8} {:<26} {:<8}",
            reminder.id,
            reminder.order_ref,
            reminder.tier,
            reminder.scheduled_at.format("%Y-%m-%d %H:%M:%S UTC"),
            reminder.attempts
        );
    }

    Ok(())
}

pub async fn handle_reminders_get(service: &ReminderService, id: Uuid) -> anyhow::Result<()> {
    let reminder = service.get(id).await?;
    print_reminder(&reminder)?;
    Ok(())
}

pub async fn handle_reminders_cancel(service: &ReminderService, id: Uuid) -> anyhow::Result<()> {
    let reminder = service.cancel(id).await?;
    tracing::info!(reminder_id = %id, "reminder cancelled from CLI");
    println!("✓ Reminder {} cancelled (order {})", reminder.id, reminder.order_ref);
    Ok(())
}

pub async fn handle_reminders_stats(
    service: &ReminderService,
    order_ref: Option<&str>,
) -> anyhow::Result<()> {
    let stats = service.stats(order_ref).await?;

    match order_ref {
        Some(order_ref) => println!("Reminder stats for order {}:", order_ref),
        None => println!("Reminder stats:"),
    }
    println!("  Scheduled: {}", stats.scheduled_count);
    println!("  Completed: {}", stats.completed_count);
    println!("    Sent:      {}", stats.sent_count);
    println!("    Failed:    {}", stats.failed_count);
    println!("  Cancelled: {}", stats.cancelled_count);
    println!(
        "  By tier:   gentle={} urgent={} final={}",
        stats.by_tier.gentle, stats.by_tier.urgent, stats.by_tier.final_
    );

    Ok(())
}

pub fn handle_reminders_classify(policy: &EscalationPolicy, days: i64) -> anyhow::Result<()> {
    println!("{}", policy.classify(days));
    Ok(())
}

pub async fn handle_db_migrate(config: &Config) -> anyhow::Result<()> {
    let Some(database_url) = &config.database_url else {
        anyhow::bail!("DATABASE_URL is not set; nothing to migrate for the in-memory store");
    };

    let pool = crate::db::create_pool(database_url).await?;

    tracing::info!("Running database migrations...");
    crate::db::run_migrations(&pool).await?;

    println!("✓ Database migrations completed");

    Ok(())
}

pub fn handle_config_validate(config: &Config) -> anyhow::Result<()> {
    tracing::info!("Validating configuration...");
    config.validate()?;

    println!("Configuration:");
    println!("  Server Port: {}", config.server_port);
    println!(
        "  Database URL: {}",
        config
            .database_url
            .as_deref()
            .map(mask_password)
            .unwrap_or_else(|| "(unset, in-memory store)".to_string())
    );
    println!("  Scheduler Tick: {}s", config.scheduler_tick_secs);
    println!("  Channel Timeout: {}ms", config.channel_timeout_ms);
    println!("  Max Dispatch Attempts: {}", config.max_dispatch_attempts);
    println!(
        "  Escalation: gentle <= {}d, urgent <= {}d, final beyond",
        config.escalation_gentle_max_days, config.escalation_urgent_max_days
    );
    println!("  Default Currency: {}", config.default_currency);
    println!("  Email Gateway: {}", display_optional(&config.email_gateway_url));
    println!("  SMS Gateway: {}", display_optional(&config.sms_gateway_url));
    println!(
        "  Gateway Signing: {}",
        if config.gateway_signing_secret.is_some() { "enabled" } else { "disabled" }
    );

    tracing::info!("Configuration is valid");
    println!("✓ Configuration is valid");

    Ok(())
}

fn print_reminder(reminder: &Reminder) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(reminder)?);
    Ok(())
}

fn display_optional(value: &Option<String>) -> String {
    value.clone().unwrap_or_else(|| "(not configured)".to_string())
}

fn mask_password(url: &str) -> String {
    if let Some(at_pos) = url.rfind('@') {
        if let Some(colon_pos) = url[..at_pos].rfind(':') {
            if let Some(slash_pos) = url[..colon_pos].rfind("//") {
                let prefix = &url[..slash_pos + 2];
                let user_start = slash_pos + 2;
                let user = &url[user_start..colon_pos];
                let suffix = &url[at_pos..];
                return format!("{}{}:****{}", prefix, user, suffix);
            }
        }
    }
    url.to_string()
}
