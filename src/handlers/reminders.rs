use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::domain::{HistoryFilter, ReminderStatus, Tier};
use crate::error::AppError;
use crate::services::CreateReminderRequest;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct PendingQuery {
    pub before: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub order_ref: Option<String>,
    pub tier: Option<String>,
    pub status: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl HistoryQuery {
    pub fn into_filter(self) -> Result<HistoryFilter, AppError> {
        let tier = self.tier.as_deref().map(str::parse::<Tier>).transpose()?;
        let status = self
            .status
            .as_deref()
            .map(str::parse::<ReminderStatus>)
            .transpose()?;
        let order_ref = self
            .order_ref
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty());

        if let (Some(from), Some(to)) = (self.from, self.to) {
            if from > to {
                return Err(AppError::BadRequest(
                    "'from' must not be later than 'to'".to_string(),
                ));
            }
        }

        Ok(HistoryFilter {
            order_ref,
            tier,
            status,
            from: self.from,
            to: self.to,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    pub order_ref: Option<String>,
}

pub async fn create_reminder(
    State(state): State<AppState>,
    Json(request): Json<CreateReminderRequest>,
) -> Result<impl IntoResponse, AppError> {
    let reminder = state.service.submit(request).await?;
    Ok((StatusCode::CREATED, Json(reminder)))
}

pub async fn get_reminder(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let reminder = state.service.get(id).await?;
    Ok(Json(reminder))
}

pub async fn cancel_reminder(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let reminder = state.service.cancel(id).await?;
    Ok(Json(reminder))
}

pub async fn list_pending(
    State(state): State<AppState>,
    Query(query): Query<PendingQuery>,
) -> Result<impl IntoResponse, AppError> {
    let reminders = state.service.list_pending(query.before).await?;
    Ok(Json(reminders))
}

pub async fn list_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<impl IntoResponse, AppError> {
    let filter = query.into_filter()?;
    let reminders = state.service.history(&filter).await?;
    Ok(Json(reminders))
}

pub async fn stats(
    State(state): State<AppState>,
    Query(query): Query<StatsQuery>,
) -> Result<impl IntoResponse, AppError> {
    let order_ref = query
        .order_ref
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty());
    let stats = state.service.stats(order_ref).await?;
    Ok(Json(stats))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_query_parses_enums() {
        let query = HistoryQuery {
            order_ref: Some(" ORD-9 ".to_string()),
            tier: Some("Urgent".to_string()),
            status: Some("sent".to_string()),
            ..HistoryQuery::default()
        };

        let filter = query.into_filter().unwrap();
        assert_eq!(filter.order_ref.as_deref(), Some("ORD-9"));
        assert_eq!(filter.tier, Some(Tier::Urgent));
        assert_eq!(filter.status, Some(ReminderStatus::Sent));
    }

    #[test]
    fn test_history_query_rejects_unknown_tier() {
        let query = HistoryQuery {
            tier: Some("polite".to_string()),
            ..HistoryQuery::default()
        };

        assert!(matches!(query.into_filter(), Err(AppError::Validation(_))));
    }

    #[test]
    fn test_history_query_rejects_inverted_range() {
        let now = Utc::now();
        let query = HistoryQuery {
            from: Some(now),
            to: Some(now - chrono::Duration::hours(1)),
            ..HistoryQuery::default()
        };

        assert!(matches!(query.into_filter(), Err(AppError::BadRequest(_))));
    }
}
