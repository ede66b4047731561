use crate::{
    api::models::points::CreditResponse,
    db::models::orders::{OrderDBResponse, OrderItemCreateDBRequest, OrderItemDBResponse, OrderStatus},
    types::{OrderId, ProductId, UserId},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

// Request models
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderItemCreate {
    #[schema(value_type = String, format = "uuid")]
    pub product_id: ProductId,
    pub quantity: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderCreate {
    /// Owner of the order; defaults to the caller. Other users need Orders:CreateAll.
    #[schema(value_type = Option<String>, format = "uuid")]
    pub user_id: Option<UserId>,
    /// Initial status, `pending` when omitted
    pub status: Option<OrderStatus>,
    pub items: Vec<OrderItemCreate>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderUpdate {
    pub status: OrderStatus,
}

impl From<OrderItemCreate> for OrderItemCreateDBRequest {
    fn from(item: OrderItemCreate) -> Self {
        Self {
            product_id: item.product_id,
            quantity: item.quantity,
        }
    }
}

// Response models
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderItemResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: Uuid,
    #[schema(value_type = String, format = "uuid")]
    pub product_id: ProductId,
    pub quantity: i32,
}

impl From<OrderItemDBResponse> for OrderItemResponse {
    fn from(db: OrderItemDBResponse) -> Self {
        Self {
            id: db.id,
            product_id: db.product_id,
            quantity: db.quantity,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: OrderId,
    #[schema(value_type = String, format = "uuid")]
    pub user_id: UserId,
    pub status: OrderStatus,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub items: Vec<OrderItemResponse>,
}

impl From<OrderDBResponse> for OrderResponse {
    fn from(db: OrderDBResponse) -> Self {
        Self {
            id: db.id,
            user_id: db.user_id,
            status: db.status,
            completed_at: db.completed_at,
            created_at: db.created_at,
            updated_at: db.updated_at,
            items: db.items.into_iter().map(OrderItemResponse::from).collect(),
        }
    }
}

/// An order after a write that may have completed it. `credit` is present when this request
/// moved the order into `completed`; it is `null` if crediting failed and will be retried.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderWriteResponse {
    #[serde(flatten)]
    pub order: OrderResponse,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "present")]
    #[schema(value_type = Option<CreditResponse>)]
    pub credit: Option<Option<CreditResponse>>,
}

// A present `credit` field, even `null`, means crediting was attempted
fn present<'de, D>(deserializer: D) -> Result<Option<Option<CreditResponse>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<CreditResponse>::deserialize(deserializer).map(Some)
}

/// Query parameters for listing orders
#[derive(Debug, Deserialize, IntoParams)]
pub struct ListOrdersQuery {
    /// Filter by user ID (optional, Orders:ReadAll only for other users)
    #[param(value_type = Option<String>, format = "uuid")]
    pub user_id: Option<UserId>,

    /// Filter by status
    pub status: Option<OrderStatus>,

    /// Number of items to skip
    pub skip: Option<i64>,

    /// Maximum number of items to return
    pub limit: Option<i64>,
}
