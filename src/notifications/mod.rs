//! Outbound customer notifications.
//!
//! Delivery is always best effort: callers log a failed send and carry on,
//! so an unreachable mail relay can never fail an order or a password reset.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

/// Sent after an order has been committed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderConfirmation {
    pub order_id: Uuid,
    pub order_number: String,
    pub user_id: Uuid,
    pub email: String,
    pub customer_name: String,
    pub grand_total: Decimal,
    pub currency: String,
    pub placed_at: DateTime<Utc>,
}

/// Carries the raw reset token; it is never persisted in this form.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PasswordResetNotice {
    pub user_id: Uuid,
    pub email: String,
    pub name: String,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    OrderConfirmation(OrderConfirmation),
    PasswordReset(PasswordResetNotice),
}

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("Delivery failed: {0}")]
    Delivery(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationService: Send + Sync {
    async fn send(&self, notification: Notification) -> Result<(), NotificationError>;
}

/// Writes notifications to the structured log. Default outside tests.
#[derive(Debug, Clone, Default)]
pub struct LogNotificationService;

#[async_trait]
impl NotificationService for LogNotificationService {
    async fn send(&self, notification: Notification) -> Result<(), NotificationError> {
        match &notification {
            Notification::OrderConfirmation(c) => info!(
                order_id = %c.order_id,
                order_number = %c.order_number,
                email = %c.email,
                total = %c.grand_total,
                currency = %c.currency,
                "order confirmation queued"
            ),
            Notification::PasswordReset(n) => info!(
                user_id = %n.user_id,
                email = %n.email,
                expires_at = %n.expires_at,
                "password reset email queued"
            ),
        }
        Ok(())
    }
}

/// Keeps every notification in memory; used by integration tests and local demos.
#[derive(Debug, Clone, Default)]
pub struct InMemoryNotificationService {
    sent: Arc<RwLock<Vec<Notification>>>,
}

impl InMemoryNotificationService {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sent(&self) -> Vec<Notification> {
        self.sent.read().await.clone()
    }

    pub async fn last_password_reset(&self) -> Option<PasswordResetNotice> {
        self.sent.read().await.iter().rev().find_map(|n| match n {
            Notification::PasswordReset(notice) => Some(notice.clone()),
            _ => None,
        })
    }

    pub async fn order_confirmations(&self) -> Vec<OrderConfirmation> {
        self.sent
            .read()
            .await
            .iter()
            .filter_map(|n| match n {
                Notification::OrderConfirmation(c) => Some(c.clone()),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl NotificationService for InMemoryNotificationService {
    async fn send(&self, notification: Notification) -> Result<(), NotificationError> {
        self.sent.write().await.push(notification);
        Ok(())
    }
}
