use crate::{
    api::models::{
        orders::{ListOrdersQuery, OrderCreate, OrderResponse, OrderUpdate, OrderWriteResponse},
        points::CreditResponse,
        users::CurrentUser,
    },
    auth::permissions::{
        can_create_all_resources, can_create_own_resource, can_read_all_resources, can_read_own_resource, forbidden, operation,
        resource, RequiresPermission,
    },
    db::{
        handlers::{orders::OrderFilter, Orders, Points, Users},
        models::{
            orders::{OrderCreateDBRequest, OrderStatus},
            points::CreditOutcome,
        },
    },
    errors::{Error, Result},
    types::{Operation, OrderId, Permission, Resource},
    AppState,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use tracing::error;

/// Credit a freshly completed order. Runs after the status change has committed, so a failure
/// here leaves the order completed but uncredited; the reconciler picks it up later.
async fn credit_completed_order(state: &AppState, order_id: OrderId) -> Option<CreditResponse> {
    let mut conn = match state.db.acquire().await {
        Ok(conn) => conn,
        Err(e) => {
            error!(%order_id, "Failed to acquire connection to credit order: {}", e);
            return None;
        }
    };

    match Points::new(&mut conn).credit_for_completed_order(order_id, &state.config.points).await {
        Ok(outcome) => {
            if let (Some(metrics), CreditOutcome::Credited(mutation)) = (&state.metrics, &outcome) {
                metrics.record_credit(mutation.entry.points);
            }
            Some(outcome.into())
        }
        Err(e) => {
            error!(%order_id, "Failed to credit completed order: {}", e);
            if let Some(metrics) = &state.metrics {
                metrics.record_rejection(&e);
            }
            None
        }
    }
}

fn order_not_found(id: OrderId) -> Error {
    Error::NotFound {
        resource: "Order".to_string(),
        id: id.to_string(),
    }
}

/// List orders
#[utoipa::path(
    get,
    path = "/orders",
    tag = "orders",
    summary = "List orders",
    description = "List the caller's orders, or any user's with Orders:ReadAll",
    params(ListOrdersQuery),
    responses(
        (status = 200, description = "List of orders", body = [OrderResponse]),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden"),
        (status = 500, description = "Internal server error"),
    ),
    security(
        ("X-Loyalty-User" = [])
    )
)]
pub async fn list_orders(
    State(state): State<AppState>,
    Query(query): Query<ListOrdersQuery>,
    current_user: CurrentUser,
) -> Result<Json<Vec<OrderResponse>>> {
    let skip = query.skip.unwrap_or(0);
    let limit = query.limit.unwrap_or(100).clamp(1, 1000);

    let can_read_all = can_read_all_resources(&current_user, Resource::Orders);
    let user_filter = match query.user_id {
        Some(user_id) if can_read_all || can_read_own_resource(&current_user, Resource::Orders, user_id) => Some(user_id),
        Some(_) => return Err(forbidden(Resource::Orders, Operation::ReadAll)),
        None if can_read_all => None,
        None if can_read_own_resource(&current_user, Resource::Orders, current_user.id) => Some(current_user.id),
        None => return Err(forbidden(Resource::Orders, Operation::ReadOwn)),
    };

    let filter = OrderFilter::new(skip, limit).for_user(user_filter).with_status(query.status);
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let orders = Orders::new(&mut conn).list(&filter).await?;

    Ok(Json(orders.into_iter().map(OrderResponse::from).collect()))
}

/// Get a single order
#[utoipa::path(
    get,
    path = "/orders/{order_id}",
    tag = "orders",
    summary = "Get an order",
    params(
        ("order_id" = uuid::Uuid, Path, description = "Order ID"),
    ),
    responses(
        (status = 200, description = "Order details", body = OrderResponse),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Order not found"),
        (status = 500, description = "Internal server error"),
    ),
    security(
        ("X-Loyalty-User" = [])
    )
)]
pub async fn get_order(
    State(state): State<AppState>,
    Path(order_id): Path<OrderId>,
    current_user: CurrentUser,
) -> Result<Json<OrderResponse>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let order = Orders::new(&mut conn)
        .get_by_id(order_id)
        .await?
        .ok_or_else(|| order_not_found(order_id))?;

    // Other users' orders are reported as missing rather than forbidden
    if !can_read_all_resources(&current_user, Resource::Orders) && !can_read_own_resource(&current_user, Resource::Orders, order.user_id) {
        return Err(order_not_found(order_id));
    }

    Ok(Json(OrderResponse::from(order)))
}

/// Place an order
#[utoipa::path(
    post,
    path = "/orders",
    tag = "orders",
    summary = "Create an order",
    description = "Create an order for the caller (Orders:CreateOwn) or for another user (Orders:CreateAll). An order created as `completed` is credited immediately.",
    request_body = OrderCreate,
    responses(
        (status = 201, description = "Order created", body = OrderWriteResponse),
        (status = 400, description = "Bad request - empty order or invalid quantity"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "User not found"),
        (status = 409, description = "Unknown product"),
        (status = 500, description = "Internal server error"),
    ),
    security(
        ("X-Loyalty-User" = [])
    )
)]
pub async fn create_order(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(data): Json<OrderCreate>,
) -> Result<(StatusCode, Json<OrderWriteResponse>)> {
    let owner = data.user_id.unwrap_or(current_user.id);
    if !can_create_all_resources(&current_user, Resource::Orders) && !can_create_own_resource(&current_user, Resource::Orders, owner) {
        return Err(Error::InsufficientPermissions {
            required: Permission::Any(vec![
                Permission::Allow(Resource::Orders, Operation::CreateAll),
                Permission::Allow(Resource::Orders, Operation::CreateOwn),
            ]),
            action: Operation::CreateAll,
            resource: format!("orders for user {owner}"),
        });
    }

    let request = OrderCreateDBRequest {
        user_id: owner,
        status: data.status.unwrap_or(OrderStatus::Pending),
        items: data.items.into_iter().map(Into::into).collect(),
    };

    let order = {
        let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
        if owner != current_user.id && !Users::new(&mut conn).exists(owner).await? {
            return Err(Error::NotFound {
                resource: "User".to_string(),
                id: owner.to_string(),
            });
        }
        Orders::new(&mut conn).create(&request).await?
    };

    let credit = match order.status {
        OrderStatus::Completed => Some(credit_completed_order(&state, order.id).await),
        _ => None,
    };

    Ok((
        StatusCode::CREATED,
        Json(OrderWriteResponse {
            order: order.into(),
            credit,
        }),
    ))
}

/// Move an order through its lifecycle
#[utoipa::path(
    patch,
    path = "/orders/{order_id}",
    tag = "orders",
    summary = "Update order status",
    description = "Change an order's status (Orders:UpdateAll required). Moving an order into `completed` credits its owner. Completed and cancelled orders cannot change status.",
    request_body = OrderUpdate,
    params(
        ("order_id" = uuid::Uuid, Path, description = "Order ID"),
    ),
    responses(
        (status = 200, description = "Order updated", body = OrderWriteResponse),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Order not found"),
        (status = 409, description = "Order is in a terminal status"),
        (status = 500, description = "Internal server error"),
    ),
    security(
        ("X-Loyalty-User" = [])
    )
)]
pub async fn update_order(
    State(state): State<AppState>,
    Path(order_id): Path<OrderId>,
    _: RequiresPermission<resource::Orders, operation::UpdateAll>,
    Json(data): Json<OrderUpdate>,
) -> Result<Json<OrderWriteResponse>> {
    let change = {
        let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
        Orders::new(&mut conn).set_status(order_id, data.status).await?
    };

    let credit = if change.became_completed() {
        Some(credit_completed_order(&state, order_id).await)
    } else {
        None
    };

    Ok(Json(OrderWriteResponse {
        order: change.order.into(),
        credit,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        api::models::users::Role,
        config::{PointsConfig, ReconcilerConfig},
        db::{
            handlers::{Products, Repository},
            models::products::ProductUpdateDBRequest,
        },
        reconcile::{CreditReconciler, SweepReport},
        test_utils::*,
    };
    use serde_json::json;
    use sqlx::PgPool;

    #[sqlx::test]
    #[test_log::test]
    async fn test_completing_an_order_credits_its_owner(pool: PgPool) {
        let app = create_test_app(pool.clone()).await;
        let shopper = create_test_user(&pool, Role::StandardUser).await;
        let operator = create_test_user(&pool, Role::StoreOperator).await;
        let product = create_test_product(&pool, 100).await;
        let shopper_auth = add_auth_headers(&shopper);
        let operator_auth = add_auth_headers(&operator);

        let response = app
            .post("/api/v1/orders")
            .add_header(shopper_auth.0.clone(), shopper_auth.1.clone())
            .json(&json!({ "items": [{ "product_id": product.id, "quantity": 1 }] }))
            .await;
        response.assert_status(StatusCode::CREATED);
        let created: OrderWriteResponse = response.json();
        assert_eq!(created.order.status, OrderStatus::Pending);
        assert!(created.credit.is_none());

        let response = app
            .patch(&format!("/api/v1/orders/{}", created.order.id))
            .add_header(operator_auth.0.clone(), operator_auth.1.clone())
            .json(&json!({ "status": "completed" }))
            .await;
        response.assert_status_ok();
        let completed: OrderWriteResponse = response.json();
        assert!(completed.order.completed_at.is_some());
        // 100 earned plus the first purchase bonus
        match completed.credit {
            Some(Some(CreditResponse::Credited { total_points, entry })) => {
                assert_eq!(total_points, 200);
                assert_eq!(entry.order_id, Some(created.order.id));
            }
            other => panic!("expected a credit, got {other:?}"),
        }

        // Terminal statuses stay put
        app.patch(&format!("/api/v1/orders/{}", created.order.id))
            .add_header(operator_auth.0, operator_auth.1)
            .json(&json!({ "status": "cancelled" }))
            .await
            .assert_status(StatusCode::CONFLICT);

        let response = app
            .get("/api/v1/users/current/points")
            .add_header(shopper_auth.0, shopper_auth.1)
            .await;
        response.assert_status_ok();
        let body: serde_json::Value = response.json();
        assert_eq!(body["total_points"], 200);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_failed_credit_is_reported_as_null_and_retried(pool: PgPool) {
        let app = create_test_app(pool.clone()).await;
        let shopper = create_test_user(&pool, Role::StandardUser).await;
        let operator = create_test_user(&pool, Role::StoreOperator).await;
        // Two units of this overflow the earned total, so crediting fails after the status commits
        let product = create_test_product(&pool, i64::MAX).await;
        let order = create_test_order(&pool, shopper.id, &[(product.id, 2)], OrderStatus::Pending).await;
        let operator_auth = add_auth_headers(&operator);

        let response = app
            .patch(&format!("/api/v1/orders/{}", order.id))
            .add_header(operator_auth.0.clone(), operator_auth.1.clone())
            .json(&json!({ "status": "completed" }))
            .await;
        response.assert_status_ok();
        let body: serde_json::Value = response.json();
        assert!(body.get("credit").is_some_and(|credit| credit.is_null()));
        let completed: OrderWriteResponse = response.json();
        assert_eq!(completed.order.status, OrderStatus::Completed);
        assert!(matches!(completed.credit, Some(None)));

        let fetched: OrderResponse = app
            .get(&format!("/api/v1/orders/{}", order.id))
            .add_header(operator_auth.0, operator_auth.1)
            .await
            .json();
        assert_eq!(fetched.status, OrderStatus::Completed);

        let mut conn = pool.acquire().await.unwrap();
        assert_eq!(Points::new(&mut conn).get_balance(shopper.id).await.unwrap(), 0);

        let reconciler = CreditReconciler::new(pool.clone(), PointsConfig::default(), ReconcilerConfig::default(), None);
        let report = reconciler.sweep().await.unwrap();
        assert_eq!(report, SweepReport { credited: 0, skipped: 0, failed: 1 });

        // Once the catalogue is corrected the next sweep credits the order
        let update = ProductUpdateDBRequest {
            points: Some(10),
            ..Default::default()
        };
        Products::new(&mut conn).update(product.id, &update).await.unwrap();

        let report = reconciler.sweep().await.unwrap();
        assert_eq!(report, SweepReport { credited: 1, skipped: 0, failed: 0 });
        assert_eq!(Points::new(&mut conn).get_balance(shopper.id).await.unwrap(), 120);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_order_created_completed_is_credited(pool: PgPool) {
        let app = create_test_app(pool.clone()).await;
        let operator = create_test_user(&pool, Role::StoreOperator).await;
        let shopper = create_test_user(&pool, Role::StandardUser).await;
        let product = create_test_product(&pool, 30).await;
        let auth = add_auth_headers(&operator);

        let response = app
            .post("/api/v1/orders")
            .add_header(auth.0, auth.1)
            .json(&json!({
                "user_id": shopper.id,
                "status": "completed",
                "items": [{ "product_id": product.id, "quantity": 2 }],
            }))
            .await;
        response.assert_status(StatusCode::CREATED);
        let body: serde_json::Value = response.json();
        assert_eq!(body["user_id"], json!(shopper.id));
        assert_eq!(body["credit"]["status"], "credited");
        assert_eq!(body["credit"]["total_points"], 160);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_shoppers_only_see_and_place_their_own_orders(pool: PgPool) {
        let app = create_test_app(pool.clone()).await;
        let alice = create_test_user(&pool, Role::StandardUser).await;
        let bob = create_test_user(&pool, Role::StandardUser).await;
        let product = create_test_product(&pool, 10).await;
        let bobs_order = create_test_order(&pool, bob.id, &[(product.id, 1)], OrderStatus::Pending).await;
        let auth = add_auth_headers(&alice);

        app.get(&format!("/api/v1/orders/{}", bobs_order.id))
            .add_header(auth.0.clone(), auth.1.clone())
            .await
            .assert_status_not_found();

        app.get(&format!("/api/v1/orders?user_id={}", bob.id))
            .add_header(auth.0.clone(), auth.1.clone())
            .await
            .assert_status_forbidden();

        let response = app.get("/api/v1/orders").add_header(auth.0.clone(), auth.1.clone()).await;
        response.assert_status_ok();
        let orders: Vec<OrderResponse> = response.json();
        assert!(orders.is_empty());

        app.post("/api/v1/orders")
            .add_header(auth.0.clone(), auth.1.clone())
            .json(&json!({ "user_id": bob.id, "items": [{ "product_id": product.id, "quantity": 1 }] }))
            .await
            .assert_status_forbidden();

        // Shoppers cannot complete their own orders
        let own = create_test_order(&pool, alice.id, &[(product.id, 1)], OrderStatus::Pending).await;
        app.patch(&format!("/api/v1/orders/{}", own.id))
            .add_header(auth.0, auth.1)
            .json(&json!({ "status": "completed" }))
            .await
            .assert_status_forbidden();
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_invalid_orders_are_rejected(pool: PgPool) {
        let app = create_test_app(pool.clone()).await;
        let shopper = create_test_user(&pool, Role::StandardUser).await;
        let product = create_test_product(&pool, 10).await;
        let auth = add_auth_headers(&shopper);

        app.post("/api/v1/orders")
            .add_header(auth.0.clone(), auth.1.clone())
            .json(&json!({ "items": [] }))
            .await
            .assert_status_bad_request();

        app.post("/api/v1/orders")
            .add_header(auth.0, auth.1)
            .json(&json!({ "items": [{ "product_id": product.id, "quantity": 0 }] }))
            .await
            .assert_status_bad_request();
    }
}
