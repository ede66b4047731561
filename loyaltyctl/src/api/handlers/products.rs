use crate::{
    api::models::products::{ListProductsQuery, ProductCreate, ProductResponse, ProductUpdate},
    auth::permissions::{operation, resource, RequiresPermission},
    db::{
        handlers::{products::ProductFilter, Products, Repository},
        models::products::{ProductCreateDBRequest, ProductUpdateDBRequest},
    },
    errors::{Error, Result},
    types::ProductId,
    AppState,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};

fn product_not_found(id: ProductId) -> Error {
    Error::NotFound {
        resource: "Product".to_string(),
        id: id.to_string(),
    }
}

/// List products in the catalogue
#[utoipa::path(
    get,
    path = "/products",
    tag = "products",
    summary = "List products",
    params(ListProductsQuery),
    responses(
        (status = 200, description = "List of products", body = [ProductResponse]),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden"),
        (status = 500, description = "Internal server error"),
    ),
    security(
        ("X-Loyalty-User" = [])
    )
)]
pub async fn list_products(
    State(state): State<AppState>,
    Query(query): Query<ListProductsQuery>,
    _: RequiresPermission<resource::Products, operation::ReadAll>,
) -> Result<Json<Vec<ProductResponse>>> {
    let skip = query.skip.unwrap_or(0);
    let limit = query.limit.unwrap_or(100).clamp(1, 1000);
    let filter = ProductFilter::new(skip, limit)
        .with_search(query.search)
        .with_active(query.is_active);

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let products = Products::new(&mut conn).list(&filter).await?;

    Ok(Json(products.into_iter().map(ProductResponse::from).collect()))
}

/// Get a single product
#[utoipa::path(
    get,
    path = "/products/{product_id}",
    tag = "products",
    summary = "Get a product",
    params(
        ("product_id" = uuid::Uuid, Path, description = "Product ID"),
    ),
    responses(
        (status = 200, description = "Product details", body = ProductResponse),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Product not found"),
        (status = 500, description = "Internal server error"),
    ),
    security(
        ("X-Loyalty-User" = [])
    )
)]
pub async fn get_product(
    State(state): State<AppState>,
    Path(product_id): Path<ProductId>,
    _: RequiresPermission<resource::Products, operation::ReadAll>,
) -> Result<Json<ProductResponse>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let product = Products::new(&mut conn)
        .get_by_id(product_id)
        .await?
        .ok_or_else(|| product_not_found(product_id))?;
    Ok(Json(ProductResponse::from(product)))
}

/// Add a product to the catalogue
#[utoipa::path(
    post,
    path = "/products",
    tag = "products",
    summary = "Create a product",
    description = "Create a product with the points it earns per unit and, optionally, what it costs to redeem (Products:CreateAll required)",
    request_body = ProductCreate,
    responses(
        (status = 201, description = "Product created", body = ProductResponse),
        (status = 400, description = "Bad request - invalid product data"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden"),
        (status = 409, description = "A product with this name exists"),
        (status = 500, description = "Internal server error"),
    ),
    security(
        ("X-Loyalty-User" = [])
    )
)]
pub async fn create_product(
    State(state): State<AppState>,
    _: RequiresPermission<resource::Products, operation::CreateAll>,
    Json(data): Json<ProductCreate>,
) -> Result<(StatusCode, Json<ProductResponse>)> {
    data.validate().map_err(|message| Error::BadRequest { message })?;

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let product = Products::new(&mut conn).create(&ProductCreateDBRequest::from(data)).await?;

    Ok((StatusCode::CREATED, Json(ProductResponse::from(product))))
}

/// Update a product
#[utoipa::path(
    patch,
    path = "/products/{product_id}",
    tag = "products",
    summary = "Update a product",
    description = "Update a product. Changes apply to future orders and redemptions only. (Products:UpdateAll required)",
    request_body = ProductUpdate,
    params(
        ("product_id" = uuid::Uuid, Path, description = "Product ID"),
    ),
    responses(
        (status = 200, description = "Product updated", body = ProductResponse),
        (status = 400, description = "Bad request - invalid product data"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Product not found"),
        (status = 500, description = "Internal server error"),
    ),
    security(
        ("X-Loyalty-User" = [])
    )
)]
pub async fn update_product(
    State(state): State<AppState>,
    Path(product_id): Path<ProductId>,
    _: RequiresPermission<resource::Products, operation::UpdateAll>,
    Json(data): Json<ProductUpdate>,
) -> Result<Json<ProductResponse>> {
    data.validate().map_err(|message| Error::BadRequest { message })?;

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let product = Products::new(&mut conn)
        .update(product_id, &ProductUpdateDBRequest::from(data))
        .await?;
    Ok(Json(ProductResponse::from(product)))
}

/// Delete a product
#[utoipa::path(
    delete,
    path = "/products/{product_id}",
    tag = "products",
    summary = "Delete a product",
    description = "Delete a product that no order references. Deactivate it instead once it has been ordered. (Products:DeleteAll required)",
    params(
        ("product_id" = uuid::Uuid, Path, description = "Product ID"),
    ),
    responses(
        (status = 204, description = "Product deleted"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Product not found"),
        (status = 409, description = "Product is referenced by orders"),
        (status = 500, description = "Internal server error"),
    ),
    security(
        ("X-Loyalty-User" = [])
    )
)]
pub async fn delete_product(
    State(state): State<AppState>,
    Path(product_id): Path<ProductId>,
    _: RequiresPermission<resource::Products, operation::DeleteAll>,
) -> Result<StatusCode> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    match Products::new(&mut conn).delete(product_id).await? {
        true => Ok(StatusCode::NO_CONTENT),
        false => Err(product_not_found(product_id)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{api::models::users::Role, db::models::orders::OrderStatus, test_utils::*};
    use serde_json::json;
    use sqlx::PgPool;

    #[sqlx::test]
    #[test_log::test]
    async fn test_operator_manages_catalogue(pool: PgPool) {
        let app = create_test_app(pool.clone()).await;
        let operator = create_test_user(&pool, Role::StoreOperator).await;
        let auth = add_auth_headers(&operator);

        let response = app
            .post("/api/v1/products")
            .add_header(auth.0.clone(), auth.1.clone())
            .json(&json!({ "name": "Latte", "points": 40 }))
            .await;
        response.assert_status(StatusCode::CREATED);
        let created: ProductResponse = response.json();
        assert_eq!(created.redemption_cost, 40);
        assert!(created.is_active);

        let response = app
            .patch(&format!("/api/v1/products/{}", created.id))
            .add_header(auth.0.clone(), auth.1.clone())
            .json(&json!({ "points_cost": 300 }))
            .await;
        response.assert_status_ok();
        let updated: ProductResponse = response.json();
        assert_eq!(updated.points, 40);
        assert_eq!(updated.redemption_cost, 300);

        app.delete(&format!("/api/v1/products/{}", created.id))
            .add_header(auth.0.clone(), auth.1.clone())
            .await
            .assert_status(StatusCode::NO_CONTENT);

        app.get(&format!("/api/v1/products/{}", created.id))
            .add_header(auth.0, auth.1)
            .await
            .assert_status_not_found();
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_standard_user_can_browse_but_not_edit(pool: PgPool) {
        let app = create_test_app(pool.clone()).await;
        let user = create_test_user(&pool, Role::StandardUser).await;
        create_test_product(&pool, 10).await;

        let response = app
            .get("/api/v1/products")
            .add_header(add_auth_headers(&user).0, add_auth_headers(&user).1)
            .await;
        response.assert_status_ok();
        let products: Vec<ProductResponse> = response.json();
        assert_eq!(products.len(), 1);

        app.post("/api/v1/products")
            .add_header(add_auth_headers(&user).0, add_auth_headers(&user).1)
            .json(&json!({ "name": "Free lunch", "points": 1000 }))
            .await
            .assert_status_forbidden();
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_invalid_and_referenced_products(pool: PgPool) {
        let app = create_test_app(pool.clone()).await;
        let operator = create_test_user(&pool, Role::StoreOperator).await;
        let auth = add_auth_headers(&operator);

        app.post("/api/v1/products")
            .add_header(auth.0.clone(), auth.1.clone())
            .json(&json!({ "name": "Broken", "points": -5 }))
            .await
            .assert_status_bad_request();

        let product = create_test_product(&pool, 10).await;
        create_test_order(&pool, operator.id, &[(product.id, 1)], OrderStatus::Pending).await;

        app.delete(&format!("/api/v1/products/{}", product.id))
            .add_header(auth.0, auth.1)
            .await
            .assert_status(StatusCode::CONFLICT);
    }
}
