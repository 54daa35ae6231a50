use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use payment_reminders::adapters::{InMemoryReminderRepository, PostgresReminderRepository};
use payment_reminders::cli::{self, Cli, Commands, DbCommands, ReminderCommands};
use payment_reminders::config::{Config, LogFormat};
use payment_reminders::domain::Channel;
use payment_reminders::gateway::GatewaySender;
use payment_reminders::ports::ReminderRepository;
use payment_reminders::services::{
    Clock, DeliveryCoordinator, ReminderService, Scheduler, SystemClock,
};
use payment_reminders::{create_app, db, startup, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?;

    init_tracing(&config);

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config).await,
        Commands::Reminders(command) => {
            let clock: Arc<dyn Clock> = Arc::new(SystemClock);
            let repository = build_repository(&config, true).await?;
            let service =
                ReminderService::new(repository, config.policy()?, clock, &config.default_currency);

            match command {
                ReminderCommands::Pending { before } => {
                    cli::handle_reminders_pending(&service, before).await
                }
                ReminderCommands::Get { id } => cli::handle_reminders_get(&service, id).await,
                ReminderCommands::Cancel { id } => cli::handle_reminders_cancel(&service, id).await,
                ReminderCommands::Stats { order_ref } => {
                    cli::handle_reminders_stats(&service, order_ref.as_deref()).await
                }
                ReminderCommands::Classify { days } => {
                    cli::handle_reminders_classify(service.policy(), days)
                }
            }
        }
        Commands::Db(DbCommands::Migrate) => cli::handle_db_migrate(&config).await,
        Commands::Config => {
            cli::handle_config_validate(&config)?;
            let repository = build_repository(&config, false).await?;
            let report = startup::validate_environment(&config, repository.as_ref()).await?;
            report.print();
            if !report.is_valid() {
                anyhow::bail!("Startup validation failed");
            }
            Ok(())
        }
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);

    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

async fn build_repository(
    config: &Config,
    migrate: bool,
) -> anyhow::Result<Arc<dyn ReminderRepository>> {
    match &config.database_url {
        Some(database_url) => {
            let pool = db::create_pool(database_url).await?;
            if migrate {
                db::run_migrations(&pool).await?;
            }
            Ok(Arc::new(PostgresReminderRepository::new(pool)))
        }
        None => {
            tracing::warn!("DATABASE_URL is unset; reminders are kept in memory only");
            Ok(Arc::new(InMemoryReminderRepository::new()))
        }
    }
}

fn build_coordinator(config: &Config, clock: Arc<dyn Clock>) -> DeliveryCoordinator {
    let mut coordinator = DeliveryCoordinator::new(clock, config.channel_timeout());

    let gateways = [
        (Channel::Email, &config.email_gateway_url),
        (Channel::Sms, &config.sms_gateway_url),
    ];

    for (channel, url) in gateways {
        match url {
            Some(url) => {
                let sender = GatewaySender::with_circuit_breaker(
                    channel,
                    url.clone(),
                    config.gateway_signing_secret.clone(),
                    config.channel_timeout(),
                    config.gateway_failure_threshold,
                    config.gateway_reset_timeout_secs,
                );
                tracing::info!(channel = %channel, url = %url, "Gateway sender configured");
                coordinator = coordinator.with_sender(channel, Arc::new(sender));
            }
            None => {
                tracing::warn!(
                    channel = %channel,
                    "No gateway configured; deliveries on this channel will fail"
                );
            }
        }
    }

    coordinator
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let repository = build_repository(&config, true).await?;

    let report = startup::validate_environment(&config, repository.as_ref()).await?;
    report.print();
    if !report.environment || !report.store {
        anyhow::bail!("Startup validation failed");
    }
    if !report.is_valid() {
        tracing::warn!("Gateway checks failed; affected channels will report delivery failures");
    }

    let coordinator = build_coordinator(&config, clock.clone());
    let scheduler = Arc::new(Scheduler::new(
        repository.clone(),
        coordinator,
        clock.clone(),
        config.scheduler_config(),
    ));

    let service = ReminderService::new(
        repository.clone(),
        config.policy()?,
        clock,
        &config.default_currency,
    )
    .with_wakeup(scheduler.wakeup_handle());

    // Claims left behind by a previous process
    let recovery = scheduler.recover().await?;
    tracing::info!(
        redispatched = recovery.redispatched.len(),
        abandoned = recovery.abandoned.len(),
        "Recovery completed"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler_task = tokio::spawn(scheduler.clone().run(shutdown_rx));

    let app = create_app(AppState {
        service: Arc::new(service),
        repository,
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    tracing::info!("listening on {}", addr);

    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    shutdown_tx.send(true).ok();
    scheduler_task.await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
