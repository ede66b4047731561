use crate::types::{OrderId, ProductId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;
use uuid::Uuid;

/// Order status stored as TEXT in database
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, ToSchema)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Processing,
    Completed,
    Cancelled,
}

impl OrderStatus {
    /// Completed and cancelled orders never change status again
    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Cancelled)
    }

    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        self == next || !self.is_terminal()
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Processing => "processing",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct OrderItemCreateDBRequest {
    pub product_id: ProductId,
    pub quantity: i32,
}

/// Database request for creating a new order
#[derive(Debug, Clone)]
pub struct OrderCreateDBRequest {
    pub user_id: UserId,
    pub status: OrderStatus,
    pub items: Vec<OrderItemCreateDBRequest>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct OrderItemDBResponse {
    pub id: Uuid,
    pub product_id: ProductId,
    pub quantity: i32,
}

/// Database response for an order, with its line items
#[derive(Debug, Clone)]
pub struct OrderDBResponse {
    pub id: OrderId,
    pub user_id: UserId,
    pub status: OrderStatus,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub items: Vec<OrderItemDBResponse>,
}

/// Result of a status change: the order as stored, and whether this call moved it into
/// `completed`.
#[derive(Debug, Clone)]
pub struct OrderStatusChange {
    pub order: OrderDBResponse,
    pub previous_status: OrderStatus,
}

impl OrderStatusChange {
    pub fn became_completed(&self) -> bool {
        self.previous_status != OrderStatus::Completed && self.order.status == OrderStatus::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses_do_not_transition() {
        assert!(OrderStatus::Pending.can_transition_to(OrderStatus::Processing));
        assert!(OrderStatus::Processing.can_transition_to(OrderStatus::Completed));
        assert!(OrderStatus::Pending.can_transition_to(OrderStatus::Cancelled));
        assert!(!OrderStatus::Completed.can_transition_to(OrderStatus::Pending));
        assert!(!OrderStatus::Cancelled.can_transition_to(OrderStatus::Completed));
        // Re-saving the same status is allowed
        assert!(OrderStatus::Completed.can_transition_to(OrderStatus::Completed));
    }
}
