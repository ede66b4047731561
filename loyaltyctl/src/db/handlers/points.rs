use crate::{
    config::PointsConfig,
    db::{
        errors::{DbError, Result},
        models::{
            orders::OrderStatus,
            points::{
                AdjustmentDBRequest, CreditOutcome, LedgerEntryDBResponse, LedgerEntryKind, LedgerMutation, RedemptionDBRequest,
            },
        },
    },
    rules,
    types::{LedgerEntryId, OrderId, ProductId, UserId},
};
use sqlx::{Connection, FromRow, PgConnection};
use std::{collections::HashMap, time::Duration};
use tracing::{debug, info, instrument, trace};

const ENTRY_COLUMNS: &str = "id, user_id, order_id, kind, points, direction, note, actor_id, created_at";

// Entry to append, before it has an id
struct NewEntry<'a> {
    user_id: UserId,
    order_id: Option<OrderId>,
    kind: LedgerEntryKind,
    points: i64,
    direction: i16,
    note: Option<&'a str>,
    actor_id: Option<UserId>,
}

#[derive(Debug, FromRow)]
struct RedeemableProduct {
    id: ProductId,
    is_active: bool,
    points: i64,
    points_cost: Option<i64>,
}

/// The points ledger. Every mutation locks the user's balance row, appends exactly one entry
/// and moves the balance by the entry's signed amount, all in one transaction.
pub struct Points<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Points<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    // SET does not take bind parameters, so the value is formatted in. It is always an integer.
    async fn set_lock_timeout(conn: &mut PgConnection, timeout: Duration) -> Result<()> {
        sqlx::query(&format!("SET LOCAL lock_timeout = '{}ms'", timeout.as_millis().max(1)))
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    /// Create the balance row if needed and lock it until the surrounding transaction ends.
    /// Returns the current total.
    async fn lock_balance(conn: &mut PgConnection, user_id: UserId) -> Result<i64> {
        let inserted = sqlx::query("INSERT INTO balances (user_id, total_points) VALUES ($1, 0) ON CONFLICT (user_id) DO NOTHING")
            .bind(user_id)
            .execute(&mut *conn)
            .await;

        match inserted {
            Ok(_) => {}
            // The only foreign key on balances is the user
            Err(e) => match DbError::from(e) {
                DbError::ForeignKeyViolation { .. } => return Err(DbError::NotFound),
                other => return Err(other),
            },
        }

        let total = sqlx::query_scalar::<_, i64>("SELECT total_points FROM balances WHERE user_id = $1 FOR UPDATE")
            .bind(user_id)
            .fetch_one(&mut *conn)
            .await?;

        trace!("Locked balance for user_id {}", user_id);
        Ok(total)
    }

    async fn append(conn: &mut PgConnection, entry: NewEntry<'_>) -> Result<LedgerMutation> {
        let written = sqlx::query_as::<_, LedgerEntryDBResponse>(&format!(
            r#"
            INSERT INTO ledger_entries (user_id, order_id, kind, points, direction, note, actor_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {ENTRY_COLUMNS}
            "#
        ))
        .bind(entry.user_id)
        .bind(entry.order_id)
        .bind(entry.kind)
        .bind(entry.points)
        .bind(entry.direction)
        .bind(entry.note)
        .bind(entry.actor_id)
        .fetch_one(&mut *conn)
        .await?;

        let balance = sqlx::query_scalar::<_, i64>(
            "UPDATE balances SET total_points = total_points + $2, updated_at = NOW() WHERE user_id = $1 RETURNING total_points",
        )
        .bind(entry.user_id)
        .bind(written.signed_points())
        .fetch_one(&mut *conn)
        .await?;

        Ok(LedgerMutation { entry: written, balance })
    }

    /// Credit the points earned by a completed order, plus the first-purchase bonus when the
    /// user has never had a ledger entry. Crediting an order twice is a no-op.
    #[instrument(skip(self, config), err)]
    pub async fn credit_for_completed_order(&mut self, order_id: OrderId, config: &PointsConfig) -> Result<CreditOutcome> {
        let mut tx = self.db.begin().await?;
        Self::set_lock_timeout(&mut tx, config.lock_timeout).await?;

        let (user_id, status) = sqlx::query_as::<_, (UserId, OrderStatus)>("SELECT user_id, status FROM orders WHERE id = $1")
            .bind(order_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(DbError::NotFound)?;

        if status != OrderStatus::Completed {
            return Err(DbError::Validation {
                message: format!("Order {order_id} is {status}, only completed orders earn points"),
            });
        }

        let balance = Self::lock_balance(&mut tx, user_id).await?;

        // Checked under the balance lock, so a concurrent credit of the same order waits and sees ours
        let existing = sqlx::query_as::<_, LedgerEntryDBResponse>(&format!(
            "SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE order_id = $1 AND kind = 'credit'"
        ))
        .bind(order_id)
        .fetch_optional(&mut *tx)
        .await?;
        if let Some(entry) = existing {
            debug!(%order_id, entry_id = %entry.id, "Order already credited");
            return Ok(CreditOutcome::AlreadyCredited(entry));
        }

        let lines = sqlx::query_as::<_, (i64, i32)>(
            "SELECT p.points, oi.quantity FROM order_items oi JOIN products p ON p.id = oi.product_id WHERE oi.order_id = $1",
        )
        .bind(order_id)
        .fetch_all(&mut *tx)
        .await?;
        let earned = rules::earned_points(lines).ok_or_else(|| DbError::Validation {
            message: format!("Points for order {order_id} overflow"),
        })?;

        let has_history = sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM ledger_entries WHERE user_id = $1)")
            .bind(user_id)
            .fetch_one(&mut *tx)
            .await?;

        let amount = rules::credit_amount(earned, balance, has_history, config.first_purchase_bonus);
        if amount.total() <= 0 {
            debug!(%order_id, "Order earns no points");
            return Ok(CreditOutcome::NothingToCredit);
        }

        let note = rules::credit_note(order_id, &amount);
        let mutation = Self::append(
            &mut tx,
            NewEntry {
                user_id,
                order_id: Some(order_id),
                kind: LedgerEntryKind::Credit,
                points: amount.total(),
                direction: 1,
                note: Some(note.as_str()),
                actor_id: None,
            },
        )
        .await?;
        tx.commit().await?;

        info!(
            %user_id,
            %order_id,
            earned = amount.earned,
            bonus = amount.bonus,
            balance = mutation.balance,
            "Credited points for completed order"
        );
        Ok(CreditOutcome::Credited(mutation))
    }

    /// Apply a signed manual correction to a user's balance on behalf of `actor_id`
    #[instrument(skip(self, request, config), fields(user_id = %request.user_id, delta = request.delta), err)]
    pub async fn adjust(&mut self, request: &AdjustmentDBRequest, config: &PointsConfig) -> Result<LedgerMutation> {
        if request.delta == 0 {
            return Err(DbError::Validation {
                message: "Adjustment must be a non-zero number of points".to_string(),
            });
        }
        let magnitude = request.delta.checked_abs().ok_or_else(|| DbError::Validation {
            message: "Adjustment is out of range".to_string(),
        })?;

        let mut tx = self.db.begin().await?;
        Self::set_lock_timeout(&mut tx, config.lock_timeout).await?;

        let balance = Self::lock_balance(&mut tx, request.user_id).await?;
        let after = balance.checked_add(request.delta).ok_or_else(|| DbError::Validation {
            message: "Adjustment would overflow the balance".to_string(),
        })?;
        if after < 0 && !config.allow_negative_adjustments {
            debug!(balance, "Rejected adjustment below zero");
            return Err(DbError::InsufficientPoints {
                required: magnitude,
                available: balance,
            });
        }

        let mutation = Self::append(
            &mut tx,
            NewEntry {
                user_id: request.user_id,
                order_id: None,
                kind: LedgerEntryKind::Adjustment,
                points: magnitude,
                direction: if request.delta > 0 { 1 } else { -1 },
                note: request.reason.as_deref(),
                actor_id: Some(request.actor_id),
            },
        )
        .await?;
        tx.commit().await?;

        info!(actor_id = %request.actor_id, balance = mutation.balance, "Adjusted points balance");
        Ok(mutation)
    }

    /// Spend points on products. Nothing is written unless the whole redemption is affordable.
    #[instrument(skip(self, request, config), fields(user_id = %request.user_id, items = request.items.len()), err)]
    pub async fn redeem(&mut self, request: &RedemptionDBRequest, config: &PointsConfig) -> Result<LedgerMutation> {
        if request.items.is_empty() {
            return Err(DbError::Validation {
                message: "At least one product must be redeemed".to_string(),
            });
        }

        let mut tx = self.db.begin().await?;
        Self::set_lock_timeout(&mut tx, config.lock_timeout).await?;

        let product_ids: Vec<ProductId> = request.items.iter().map(|item| item.product_id).collect();
        let products: HashMap<ProductId, RedeemableProduct> = sqlx::query_as::<_, RedeemableProduct>(
            "SELECT id, is_active, points, points_cost FROM products WHERE id = ANY($1)",
        )
        .bind(&product_ids)
        .fetch_all(&mut *tx)
        .await?
        .into_iter()
        .map(|p| (p.id, p))
        .collect();

        let mut lines = Vec::with_capacity(request.items.len());
        for item in &request.items {
            let product = products.get(&item.product_id).ok_or(DbError::NotFound)?;
            if !product.is_active {
                return Err(DbError::Validation {
                    message: format!("Product {} is not available for redemption", product.id),
                });
            }
            lines.push((product.points_cost.unwrap_or(product.points), item.quantity));
        }

        let total_cost = rules::redemption_cost(lines).ok_or_else(|| DbError::Validation {
            message: "Redemption cost is out of range".to_string(),
        })?;
        if total_cost <= 0 {
            return Err(DbError::Validation {
                message: "Redemption must cost at least one point".to_string(),
            });
        }

        let balance = Self::lock_balance(&mut tx, request.user_id).await?;
        if balance < total_cost {
            debug!(balance, total_cost, "Rejected redemption");
            return Err(DbError::InsufficientPoints {
                required: total_cost,
                available: balance,
            });
        }

        let note = rules::redemption_note(&request.items);
        let mutation = Self::append(
            &mut tx,
            NewEntry {
                user_id: request.user_id,
                order_id: None,
                kind: LedgerEntryKind::Redeem,
                points: total_cost,
                direction: -1,
                note: Some(note.as_str()),
                actor_id: Some(request.user_id),
            },
        )
        .await?;
        tx.commit().await?;

        info!(total_cost, balance = mutation.balance, "Redeemed points");
        Ok(mutation)
    }

    /// Current balance; zero for a user who has never had an entry.
    /// This is a read-only operation without locking
    pub async fn get_balance(&mut self, user_id: UserId) -> Result<i64> {
        let total = sqlx::query_scalar::<_, i64>("SELECT total_points FROM balances WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(total.unwrap_or(0))
    }

    /// List entries for a specific user, newest first
    pub async fn list_user_entries(&mut self, user_id: UserId, skip: i64, limit: i64) -> Result<Vec<LedgerEntryDBResponse>> {
        let entries = sqlx::query_as::<_, LedgerEntryDBResponse>(&format!(
            r#"
            SELECT {ENTRY_COLUMNS}
            FROM ledger_entries
            WHERE user_id = $1
            ORDER BY created_at DESC, id DESC
            OFFSET $2
            LIMIT $3
            "#
        ))
        .bind(user_id)
        .bind(skip)
        .bind(limit)
        .fetch_all(&mut *self.db)
        .await?;
        Ok(entries)
    }

    /// List entries across all users (admin view)
    pub async fn list_all_entries(&mut self, skip: i64, limit: i64) -> Result<Vec<LedgerEntryDBResponse>> {
        let entries = sqlx::query_as::<_, LedgerEntryDBResponse>(&format!(
            r#"
            SELECT {ENTRY_COLUMNS}
            FROM ledger_entries
            ORDER BY created_at DESC, id DESC
            OFFSET $1
            LIMIT $2
            "#
        ))
        .bind(skip)
        .bind(limit)
        .fetch_all(&mut *self.db)
        .await?;
        Ok(entries)
    }

    pub async fn get_entry_by_id(&mut self, id: LedgerEntryId) -> Result<Option<LedgerEntryDBResponse>> {
        let entry = sqlx::query_as::<_, LedgerEntryDBResponse>(&format!("SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE id = $1"))
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(entry)
    }

    /// Completed orders that earn points but have no credit entry. Orders never attempted come
    /// first, oldest completion first, then previously failed orders by their last attempt.
    pub async fn list_uncredited_completed_orders(&mut self, limit: i64) -> Result<Vec<OrderId>> {
        let ids = sqlx::query_scalar::<_, OrderId>(
            r#"
            SELECT o.id
            FROM orders o
            WHERE o.status = 'completed'
              AND NOT EXISTS (
                  SELECT 1 FROM ledger_entries le WHERE le.order_id = o.id AND le.kind = 'credit'
              )
              AND EXISTS (
                  SELECT 1
                  FROM order_items oi
                  JOIN products p ON p.id = oi.product_id
                  WHERE oi.order_id = o.id AND p.points > 0
              )
            ORDER BY o.credit_attempted_at ASC NULLS FIRST, o.completed_at ASC NULLS LAST, o.id
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&mut *self.db)
        .await?;
        Ok(ids)
    }

    /// Stamp a failed credit attempt, moving the order behind untried ones in the next sweep
    pub async fn record_failed_credit_attempt(&mut self, order_id: OrderId) -> Result<()> {
        sqlx::query("UPDATE orders SET credit_attempted_at = NOW() WHERE id = $1")
            .bind(order_id)
            .execute(&mut *self.db)
            .await?;
        Ok(())
    }
}
