use crate::{
    db::models::products::{ProductCreateDBRequest, ProductDBResponse, ProductUpdateDBRequest},
    types::ProductId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use utoipa::{IntoParams, ToSchema};

// Request models
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProductCreate {
    pub name: String,
    pub description: Option<String>,
    /// Points earned per unit purchased
    #[serde(default)]
    pub points: i64,
    /// Points spent per unit redeemed; defaults to `points` when absent
    pub points_cost: Option<i64>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct ProductUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub points: Option<i64>,
    /// Omit to leave unchanged, `null` to fall back to `points`
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<i64>)]
    pub points_cost: Option<Option<i64>>,
    pub is_active: Option<bool>,
}

// Distinguishes a missing field (None) from an explicit null (Some(None))
fn double_option<'de, D>(deserializer: D) -> Result<Option<Option<i64>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<i64>::deserialize(deserializer).map(Some)
}

impl ProductCreate {
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("Product name must not be empty".to_string());
        }
        if self.points < 0 {
            return Err("Points must not be negative".to_string());
        }
        if self.points_cost.is_some_and(|cost| cost < 0) {
            return Err("Points cost must not be negative".to_string());
        }
        Ok(())
    }
}

impl ProductUpdate {
    pub fn validate(&self) -> Result<(), String> {
        if self.name.as_deref().is_some_and(|name| name.trim().is_empty()) {
            return Err("Product name must not be empty".to_string());
        }
        if self.points.is_some_and(|points| points < 0) {
            return Err("Points must not be negative".to_string());
        }
        if matches!(self.points_cost, Some(Some(cost)) if cost < 0) {
            return Err("Points cost must not be negative".to_string());
        }
        Ok(())
    }
}

impl From<ProductCreate> for ProductCreateDBRequest {
    fn from(create: ProductCreate) -> Self {
        ProductCreateDBRequest::builder()
            .name(create.name.trim().to_string())
            .maybe_description(create.description)
            .is_active(create.is_active.unwrap_or(true))
            .points(create.points)
            .maybe_points_cost(create.points_cost)
            .build()
    }
}

impl From<ProductUpdate> for ProductUpdateDBRequest {
    fn from(update: ProductUpdate) -> Self {
        Self {
            name: update.name.map(|name| name.trim().to_string()),
            description: update.description,
            is_active: update.is_active,
            points: update.points,
            points_cost: update.points_cost,
        }
    }
}

// Response models
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProductResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: ProductId,
    pub name: String,
    pub description: Option<String>,
    pub is_active: bool,
    pub points: i64,
    pub points_cost: Option<i64>,
    /// What one unit costs to redeem
    pub redemption_cost: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<ProductDBResponse> for ProductResponse {
    fn from(db: ProductDBResponse) -> Self {
        Self {
            redemption_cost: db.redemption_cost(),
            id: db.id,
            name: db.name,
            description: db.description,
            is_active: db.is_active,
            points: db.points,
            points_cost: db.points_cost,
            created_at: db.created_at,
            updated_at: db.updated_at,
        }
    }
}

/// Query parameters for listing products
#[derive(Debug, Deserialize, IntoParams)]
pub struct ListProductsQuery {
    /// Number of items to skip
    pub skip: Option<i64>,

    /// Maximum number of items to return
    pub limit: Option<i64>,

    /// Case-insensitive name search
    pub search: Option<String>,

    /// Only active (true) or inactive (false) products
    pub is_active: Option<bool>,
}
