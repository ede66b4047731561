use crate::{
    db::{
        errors::{DbError, Result},
        models::orders::{OrderCreateDBRequest, OrderDBResponse, OrderItemDBResponse, OrderStatus, OrderStatusChange},
    },
    types::{OrderId, UserId},
};
use chrono::{DateTime, Utc};
use sqlx::{Connection, FromRow, PgConnection};
use std::collections::HashMap;
use tracing::{debug, instrument};
use uuid::Uuid;

/// Filter for listing orders
#[derive(Debug, Clone)]
pub struct OrderFilter {
    pub skip: i64,
    pub limit: i64,
    pub user_id: Option<UserId>,
    pub status: Option<OrderStatus>,
}

impl OrderFilter {
    pub fn new(skip: i64, limit: i64) -> Self {
        Self {
            skip,
            limit,
            user_id: None,
            status: None,
        }
    }

    pub fn for_user(mut self, user_id: Option<UserId>) -> Self {
        self.user_id = user_id;
        self
    }

    pub fn with_status(mut self, status: Option<OrderStatus>) -> Self {
        self.status = status;
        self
    }
}

#[derive(Debug, Clone, FromRow)]
struct Order {
    id: OrderId,
    user_id: UserId,
    status: OrderStatus,
    completed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Order {
    fn with_items(self, items: Vec<OrderItemDBResponse>) -> OrderDBResponse {
        OrderDBResponse {
            id: self.id,
            user_id: self.user_id,
            status: self.status,
            completed_at: self.completed_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
            items,
        }
    }
}

#[derive(Debug, FromRow)]
struct OrderItemRow {
    order_id: OrderId,
    id: Uuid,
    product_id: Uuid,
    quantity: i32,
}

const ORDER_COLUMNS: &str = "id, user_id, status, completed_at, created_at, updated_at";

pub struct Orders<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Orders<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    async fn items_for(conn: &mut PgConnection, order_ids: &[OrderId]) -> Result<HashMap<OrderId, Vec<OrderItemDBResponse>>> {
        let rows = sqlx::query_as::<_, OrderItemRow>(
            "SELECT order_id, id, product_id, quantity FROM order_items WHERE order_id = ANY($1) ORDER BY id",
        )
        .bind(order_ids)
        .fetch_all(&mut *conn)
        .await?;

        let mut map: HashMap<OrderId, Vec<OrderItemDBResponse>> = HashMap::new();
        for row in rows {
            map.entry(row.order_id).or_default().push(OrderItemDBResponse {
                id: row.id,
                product_id: row.product_id,
                quantity: row.quantity,
            });
        }
        Ok(map)
    }

    /// Create an order and its line items atomically
    #[instrument(skip(self, request), fields(user_id = %request.user_id, items = request.items.len()), err)]
    pub async fn create(&mut self, request: &OrderCreateDBRequest) -> Result<OrderDBResponse> {
        if request.items.is_empty() {
            return Err(DbError::Validation {
                message: "An order needs at least one item".to_string(),
            });
        }
        if let Some(item) = request.items.iter().find(|item| item.quantity <= 0) {
            return Err(DbError::Validation {
                message: format!("Quantity for product {} must be positive", item.product_id),
            });
        }

        let mut tx = self.db.begin().await?;

        let order = sqlx::query_as::<_, Order>(&format!(
            r#"
            INSERT INTO orders (user_id, status, completed_at)
            VALUES ($1, $2, CASE WHEN $2 = 'completed' THEN NOW() END)
            RETURNING {ORDER_COLUMNS}
            "#
        ))
        .bind(request.user_id)
        .bind(request.status)
        .fetch_one(&mut *tx)
        .await?;

        for item in &request.items {
            sqlx::query("INSERT INTO order_items (order_id, product_id, quantity) VALUES ($1, $2, $3)")
                .bind(order.id)
                .bind(item.product_id)
                .bind(item.quantity)
                .execute(&mut *tx)
                .await?;
        }

        let order_id = order.id;
        let mut items = Self::items_for(&mut tx, &[order_id]).await?;
        tx.commit().await?;

        Ok(order.with_items(items.remove(&order_id).unwrap_or_default()))
    }

    pub async fn get_by_id(&mut self, id: OrderId) -> Result<Option<OrderDBResponse>> {
        let order = sqlx::query_as::<_, Order>(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;

        match order {
            Some(order) => {
                let mut items = Self::items_for(&mut *self.db, &[order.id]).await?;
                Ok(Some(order.with_items(items.remove(&id).unwrap_or_default())))
            }
            None => Ok(None),
        }
    }

    pub async fn list(&mut self, filter: &OrderFilter) -> Result<Vec<OrderDBResponse>> {
        let orders = sqlx::query_as::<_, Order>(&format!(
            r#"
            SELECT {ORDER_COLUMNS}
            FROM orders
            WHERE ($1::UUID IS NULL OR user_id = $1)
              AND ($2::TEXT IS NULL OR status = $2)
            ORDER BY created_at DESC, id DESC
            OFFSET $3
            LIMIT $4
            "#
        ))
        .bind(filter.user_id)
        .bind(filter.status)
        .bind(filter.skip)
        .bind(filter.limit)
        .fetch_all(&mut *self.db)
        .await?;

        let ids: Vec<OrderId> = orders.iter().map(|o| o.id).collect();
        let mut items = Self::items_for(&mut *self.db, &ids).await?;

        Ok(orders
            .into_iter()
            .map(|order| {
                let order_items = items.remove(&order.id).unwrap_or_default();
                order.with_items(order_items)
            })
            .collect())
    }

    /// Move an order to a new status. Terminal statuses (completed, cancelled) cannot be left.
    /// The row is locked for the duration so two concurrent updates see each other's result.
    #[instrument(skip(self), err)]
    pub async fn set_status(&mut self, id: OrderId, status: OrderStatus) -> Result<OrderStatusChange> {
        let mut tx = self.db.begin().await?;

        let current = sqlx::query_scalar::<_, OrderStatus>("SELECT status FROM orders WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(DbError::NotFound)?;

        if !current.can_transition_to(status) {
            return Err(DbError::Conflict {
                message: format!("Order {id} is {current} and cannot become {status}"),
            });
        }

        let order = sqlx::query_as::<_, Order>(&format!(
            r#"
            UPDATE orders SET
                status = $2,
                completed_at = CASE WHEN $2 = 'completed' THEN COALESCE(completed_at, NOW()) ELSE completed_at END,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {ORDER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(status)
        .fetch_one(&mut *tx)
        .await?;

        let mut items = Self::items_for(&mut tx, &[id]).await?;
        tx.commit().await?;

        debug!(order_id = %id, from = %current, to = %status, "Order status changed");

        Ok(OrderStatusChange {
            order: order.with_items(items.remove(&id).unwrap_or_default()),
            previous_status: current,
        })
    }
}
