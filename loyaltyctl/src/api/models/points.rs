use crate::{
    db::models::points::{CreditOutcome, LedgerEntryDBResponse, LedgerEntryKind, LedgerMutation, RedemptionItem},
    types::{LedgerEntryId, OrderId, ProductId, UserId},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

// Request models
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AdjustPointsRequest {
    /// Signed number of points to add (positive) or remove (negative). Must not be zero.
    pub points: i64,
    /// Why the balance is being corrected; stored on the ledger entry
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RedeemItemRequest {
    #[schema(value_type = String, format = "uuid")]
    pub product_id: ProductId,
    /// Units to redeem; missing or non-positive values count as one
    pub quantity: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RedeemRequest {
    pub items: Vec<RedeemItemRequest>,
}

impl From<RedeemItemRequest> for RedemptionItem {
    fn from(item: RedeemItemRequest) -> Self {
        Self {
            product_id: item.product_id,
            quantity: item.quantity,
        }
    }
}

// Response models
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LedgerEntryResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: LedgerEntryId,
    #[schema(value_type = String, format = "uuid")]
    pub user_id: UserId,
    #[schema(value_type = Option<String>, format = "uuid")]
    pub order_id: Option<OrderId>,
    pub kind: LedgerEntryKind,
    /// Magnitude of the entry, always positive
    pub points: i64,
    /// Contribution to the balance: negative for redemptions and removals
    pub signed_points: i64,
    pub note: Option<String>,
    /// Who triggered the entry, when it was not the system
    #[schema(value_type = Option<String>, format = "uuid")]
    pub actor_id: Option<UserId>,
    pub created_at: DateTime<Utc>,
}

impl From<LedgerEntryDBResponse> for LedgerEntryResponse {
    fn from(db: LedgerEntryDBResponse) -> Self {
        Self {
            signed_points: db.signed_points(),
            id: db.id,
            user_id: db.user_id,
            order_id: db.order_id,
            kind: db.kind,
            points: db.points,
            note: db.note,
            actor_id: db.actor_id,
            created_at: db.created_at,
        }
    }
}

/// A user's balance together with their most recent ledger entries
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PointsSummaryResponse {
    #[schema(value_type = String, format = "uuid")]
    pub user_id: UserId,
    pub total_points: i64,
    pub history: Vec<LedgerEntryResponse>,
}

/// Result of a ledger mutation: the entry written and the balance it left
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LedgerMutationResponse {
    pub total_points: i64,
    pub entry: LedgerEntryResponse,
}

impl From<LedgerMutation> for LedgerMutationResponse {
    fn from(mutation: LedgerMutation) -> Self {
        Self {
            total_points: mutation.balance,
            entry: mutation.entry.into(),
        }
    }
}

/// Outcome of crediting an order, reported alongside the order
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CreditResponse {
    /// A new credit entry was written
    Credited { total_points: i64, entry: LedgerEntryResponse },
    /// The order had been credited before
    AlreadyCredited { entry: LedgerEntryResponse },
    /// The order earns no points
    NothingToCredit,
}

impl From<CreditOutcome> for CreditResponse {
    fn from(outcome: CreditOutcome) -> Self {
        match outcome {
            CreditOutcome::Credited(mutation) => CreditResponse::Credited {
                total_points: mutation.balance,
                entry: mutation.entry.into(),
            },
            CreditOutcome::AlreadyCredited(entry) => CreditResponse::AlreadyCredited { entry: entry.into() },
            CreditOutcome::NothingToCredit => CreditResponse::NothingToCredit,
        }
    }
}

/// Query parameters for a user's points summary
#[derive(Debug, Deserialize, IntoParams)]
pub struct PointsHistoryQuery {
    /// Number of history entries to skip
    pub skip: Option<i64>,

    /// Maximum number of history entries to return
    pub limit: Option<i64>,
}

/// Query parameters for listing ledger entries
#[derive(Debug, Deserialize, IntoParams)]
pub struct ListLedgerEntriesQuery {
    /// Filter by user ID (optional, LoyaltyManager only for other users)
    #[param(value_type = Option<String>, format = "uuid")]
    pub user_id: Option<UserId>,

    /// Number of items to skip
    pub skip: Option<i64>,

    /// Maximum number of items to return
    pub limit: Option<i64>,
}
