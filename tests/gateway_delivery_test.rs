use bigdecimal::BigDecimal;
use chrono::{NaiveDate, Utc};
use mockito::Matcher;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use payment_reminders::adapters::InMemoryReminderRepository;
use payment_reminders::domain::{Channel, EscalationPolicy, ReminderStatus};
use payment_reminders::gateway::GatewaySender;
use payment_reminders::services::{
    CreateReminderRequest, DeliveryCoordinator, ManualClock, ReminderService, Scheduler,
    SchedulerConfig,
};

fn request(order_ref: &str) -> CreateReminderRequest {
    CreateReminderRequest {
        customer_email: "tomas@example.com".to_string(),
        customer_name: "Tomás".to_string(),
        customer_phone: Some("+420 601 123 456".to_string()),
        order_ref: order_ref.to_string(),
        amount_due: BigDecimal::from(990),
        currency: Some("czk".to_string()),
        due_date: NaiveDate::from_ymd_opt(2026, 8, 15).unwrap(),
        tier: None,
        days_past_due: Some(30),
        channels: vec!["email".to_string(), "sms".to_string()],
        payment_url: None,
        schedule_at: None,
    }
}

#[tokio::test]
async fn test_reminder_delivered_through_gateways() {
    let mut email_server = mockito::Server::new_async().await;
    let mut sms_server = mockito::Server::new_async().await;

    let email_mock = email_server
        .mock("POST", "/messages")
        .match_header("x-reminder-signature", Matcher::Any)
        .match_body(Matcher::PartialJson(json!({
            "channel": "email",
            "tier": "final",
            "currency": "CZK",
            "recipient": "tomas@example.com",
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"id":"email-77"}"#)
        .create_async()
        .await;

    let sms_mock = sms_server
        .mock("POST", "/messages")
        .match_body(Matcher::PartialJson(json!({
            "channel": "sms",
            "recipient": "+420601123456",
        })))
        .with_status(500)
        .create_async()
        .await;

    let clock = ManualClock::new(Utc::now());
    let repository = Arc::new(InMemoryReminderRepository::new());
    let secret = Some("gateway-secret".to_string());
    let coordinator = DeliveryCoordinator::new(Arc::new(clock.clone()), Duration::from_secs(5))
        .with_sender(
            Channel::Email,
            Arc::new(GatewaySender::new(
                Channel::Email,
                email_server.url(),
                secret.clone(),
                Duration::from_secs(5),
            )),
        )
        .with_sender(
            Channel::Sms,
            Arc::new(GatewaySender::new(
                Channel::Sms,
                sms_server.url(),
                secret,
                Duration::from_secs(5),
            )),
        );
    let scheduler = Scheduler::new(
        repository.clone(),
        coordinator,
        Arc::new(clock.clone()),
        SchedulerConfig::default(),
    );
    let service = ReminderService::new(
        repository,
        EscalationPolicy::default(),
        Arc::new(clock),
        "USD",
    );

    let created = service.send_now(request("ORD-500")).await.unwrap();
    let report = scheduler.tick().await.unwrap();
    assert_eq!(report.sent, 1);

    email_mock.assert_async().await;
    sms_mock.assert_async().await;

    let stored = service.get(created.id).await.unwrap();
    assert_eq!(stored.status, ReminderStatus::Sent);

    let result = stored.delivery_result.unwrap();
    let email = result
        .channels
        .iter()
        .find(|c| c.channel == Channel::Email)
        .unwrap();
    let sms = result
        .channels
        .iter()
        .find(|c| c.channel == Channel::Sms)
        .unwrap();
    assert!(email.ok);
    assert_eq!(email.external_ref.as_deref(), Some("email-77"));
    assert!(!sms.ok);
    assert!(sms.error.as_deref().unwrap().contains("500"));
}

#[tokio::test]
async fn test_missing_gateway_fails_channel() {
    let clock = ManualClock::new(Utc::now());
    let repository = Arc::new(InMemoryReminderRepository::new());
    let coordinator = DeliveryCoordinator::new(Arc::new(clock.clone()), Duration::from_secs(1));
    let scheduler = Scheduler::new(
        repository.clone(),
        coordinator,
        Arc::new(clock.clone()),
        SchedulerConfig::default(),
    );
    let service = ReminderService::new(
        repository,
        EscalationPolicy::default(),
        Arc::new(clock),
        "USD",
    );

    let created = service.send_now(request("ORD-501")).await.unwrap();
    scheduler.tick().await.unwrap();

    let stored = service.get(created.id).await.unwrap();
    assert_eq!(stored.status, ReminderStatus::Failed);
    assert!(stored
        .delivery_result
        .unwrap()
        .channels
        .iter()
        .all(|c| c.error.as_deref() == Some("no sender configured for channel")));
}
