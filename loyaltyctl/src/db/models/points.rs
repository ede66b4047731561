use crate::types::{LedgerEntryId, OrderId, ProductId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Ledger entry kind stored as TEXT in database
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Hash, ToSchema)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum LedgerEntryKind {
    Credit,
    Redeem,
    Adjustment,
}

/// Database response for a ledger entry
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct LedgerEntryDBResponse {
    pub id: LedgerEntryId,
    pub user_id: UserId,
    pub order_id: Option<OrderId>,
    pub kind: LedgerEntryKind,
    /// Magnitude, always positive
    pub points: i64,
    /// +1 or -1
    pub direction: i16,
    pub note: Option<String>,
    pub actor_id: Option<UserId>,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntryDBResponse {
    /// The entry's contribution to the balance
    pub fn signed_points(&self) -> i64 {
        self.points * i64::from(self.direction)
    }
}

/// Database request for a manual balance adjustment
#[derive(Debug, Clone)]
pub struct AdjustmentDBRequest {
    pub user_id: UserId,
    /// Signed change to apply; never zero
    pub delta: i64,
    pub reason: Option<String>,
    pub actor_id: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RedemptionItem {
    pub product_id: ProductId,
    /// Missing or non-positive quantities count as one unit
    pub quantity: Option<i32>,
}

/// Database request for spending points on products
#[derive(Debug, Clone)]
pub struct RedemptionDBRequest {
    pub user_id: UserId,
    pub items: Vec<RedemptionItem>,
}

/// A ledger mutation together with the balance it left behind
#[derive(Debug, Clone)]
pub struct LedgerMutation {
    pub entry: LedgerEntryDBResponse,
    pub balance: i64,
}

/// What happened when crediting a completed order
#[derive(Debug, Clone)]
pub enum CreditOutcome {
    /// A new credit entry was written
    Credited(LedgerMutation),
    /// The order had been credited before; nothing was written
    AlreadyCredited(LedgerEntryDBResponse),
    /// The order earns no points; nothing was written
    NothingToCredit,
}
