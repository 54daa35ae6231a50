pub mod adapters;
pub mod cli;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod ports;
pub mod services;
pub mod startup;
pub mod validation;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::ports::ReminderRepository;
use crate::services::ReminderService;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ReminderService>,
    pub repository: Arc<dyn ReminderRepository>,
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/reminders", post(handlers::reminders::create_reminder))
        .route("/reminders/pending", get(handlers::reminders::list_pending))
        .route("/reminders/history", get(handlers::reminders::list_history))
        .route("/reminders/stats", get(handlers::reminders::stats))
        .route("/reminders/:id", get(handlers::reminders::get_reminder))
        .route(
            "/reminders/:id/cancel",
            post(handlers::reminders::cancel_reminder),
        )
        .with_state(state)
}
