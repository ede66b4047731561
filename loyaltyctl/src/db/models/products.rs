use crate::types::ProductId;
use bon::Builder;
use chrono::{DateTime, Utc};

/// Database request for creating a new product
#[derive(Debug, Clone, Builder)]
pub struct ProductCreateDBRequest {
    pub name: String,
    pub description: Option<String>,
    #[builder(default = true)]
    pub is_active: bool,
    #[builder(default = 0)]
    pub points: i64,
    pub points_cost: Option<i64>,
}

/// Database request for updating a product. `None` leaves a field untouched; for `points_cost`
/// `Some(None)` clears the explicit cost so redemptions fall back to `points`.
#[derive(Debug, Clone, Default)]
pub struct ProductUpdateDBRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub is_active: Option<bool>,
    pub points: Option<i64>,
    pub points_cost: Option<Option<i64>>,
}

/// Database response for a product
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ProductDBResponse {
    pub id: ProductId,
    pub name: String,
    pub description: Option<String>,
    pub is_active: bool,
    pub points: i64,
    pub points_cost: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProductDBResponse {
    /// Points spent per unit when this product is redeemed
    pub fn redemption_cost(&self) -> i64 {
        self.points_cost.unwrap_or(self.points)
    }
}
