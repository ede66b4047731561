use crate::{
    db::{
        errors::{DbError, Result},
        handlers::repository::Repository,
        models::products::{ProductCreateDBRequest, ProductDBResponse, ProductUpdateDBRequest},
    },
    types::ProductId,
};
use sqlx::PgConnection;
use tracing::instrument;

/// Filter for listing products
#[derive(Debug, Clone)]
pub struct ProductFilter {
    pub skip: i64,
    pub limit: i64,
    /// Case-insensitive substring match on the name
    pub search: Option<String>,
    pub is_active: Option<bool>,
}

impl ProductFilter {
    pub fn new(skip: i64, limit: i64) -> Self {
        Self {
            skip,
            limit,
            search: None,
            is_active: None,
        }
    }

    pub fn with_search(mut self, search: Option<String>) -> Self {
        self.search = search.filter(|s| !s.trim().is_empty());
        self
    }

    pub fn with_active(mut self, is_active: Option<bool>) -> Self {
        self.is_active = is_active;
        self
    }
}

const PRODUCT_COLUMNS: &str = "id, name, description, is_active, points, points_cost, created_at, updated_at";

pub struct Products<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Products<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }
}

#[async_trait::async_trait]
impl<'c> Repository for Products<'c> {
    type CreateRequest = ProductCreateDBRequest;
    type UpdateRequest = ProductUpdateDBRequest;
    type Response = ProductDBResponse;
    type Id = ProductId;
    type Filter = ProductFilter;

    #[instrument(skip(self, request), fields(name = %request.name), err)]
    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response> {
        let product = sqlx::query_as::<_, ProductDBResponse>(&format!(
            r#"
            INSERT INTO products (name, description, is_active, points, points_cost)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {PRODUCT_COLUMNS}
            "#
        ))
        .bind(&request.name)
        .bind(&request.description)
        .bind(request.is_active)
        .bind(request.points)
        .bind(request.points_cost)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(product)
    }

    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>> {
        let product = sqlx::query_as::<_, ProductDBResponse>(&format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1"))
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(product)
    }

    #[instrument(skip(self, request), err)]
    async fn update(&mut self, id: Self::Id, request: &Self::UpdateRequest) -> Result<Self::Response> {
        // $6 distinguishes "leave points_cost alone" from "set it (possibly to NULL)"
        let (set_points_cost, points_cost) = match request.points_cost {
            Some(cost) => (true, cost),
            None => (false, None),
        };

        let product = sqlx::query_as::<_, ProductDBResponse>(&format!(
            r#"
            UPDATE products SET
                name = COALESCE($2, name),
                description = COALESCE($3, description),
                is_active = COALESCE($4, is_active),
                points = COALESCE($5, points),
                points_cost = CASE WHEN $6 THEN $7 ELSE points_cost END,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {PRODUCT_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(&request.name)
        .bind(&request.description)
        .bind(request.is_active)
        .bind(request.points)
        .bind(set_points_cost)
        .bind(points_cost)
        .fetch_optional(&mut *self.db)
        .await?;

        product.ok_or(DbError::NotFound)
    }

    /// Fails with a foreign key violation while orders still reference the product
    async fn delete(&mut self, id: Self::Id) -> Result<bool> {
        let result = sqlx::query("DELETE FROM products WHERE id = $1")
            .bind(id)
            .execute(&mut *self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list(&mut self, filter: &Self::Filter) -> Result<Vec<Self::Response>> {
        let search = filter.search.as_ref().map(|s| format!("%{}%", s.trim()));
        let products = sqlx::query_as::<_, ProductDBResponse>(&format!(
            r#"
            SELECT {PRODUCT_COLUMNS}
            FROM products
            WHERE ($1::TEXT IS NULL OR name ILIKE $1)
              AND ($2::BOOLEAN IS NULL OR is_active = $2)
            ORDER BY name ASC
            OFFSET $3
            LIMIT $4
            "#
        ))
        .bind(search)
        .bind(filter.is_active)
        .bind(filter.skip)
        .bind(filter.limit)
        .fetch_all(&mut *self.db)
        .await?;

        Ok(products)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::PgPool;

    #[sqlx::test]
    #[test_log::test]
    async fn test_create_and_fetch_product(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let mut products = Products::new(&mut conn);

        let created = products
            .create(&ProductCreateDBRequest::builder().name("Coffee".to_string()).points(50).build())
            .await
            .expect("Failed to create product");
        assert!(created.is_active);
        assert_eq!(created.points, 50);
        assert_eq!(created.points_cost, None);
        assert_eq!(created.redemption_cost(), 50);

        let fetched = products.get_by_id(created.id).await.unwrap().expect("Product should exist");
        assert_eq!(fetched.name, "Coffee");
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_update_points_cost_set_and_clear(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let mut products = Products::new(&mut conn);
        let product = products
            .create(&ProductCreateDBRequest::builder().name("Mug".to_string()).points(10).build())
            .await
            .unwrap();

        let updated = products
            .update(
                product.id,
                &ProductUpdateDBRequest {
                    points_cost: Some(Some(150)),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.redemption_cost(), 150);
        assert_eq!(updated.points, 10);

        // Unrelated update leaves the cost alone
        let renamed = products
            .update(
                product.id,
                &ProductUpdateDBRequest {
                    name: Some("Big Mug".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(renamed.points_cost, Some(150));

        let cleared = products
            .update(
                product.id,
                &ProductUpdateDBRequest {
                    points_cost: Some(None),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(cleared.points_cost, None);
        assert_eq!(cleared.redemption_cost(), 10);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_list_filters(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let mut products = Products::new(&mut conn);
        for (name, active) in [("Green Tea", true), ("Black Tea", false), ("Espresso", true)] {
            products
                .create(&ProductCreateDBRequest::builder().name(name.to_string()).is_active(active).build())
                .await
                .unwrap();
        }

        let teas = products
            .list(&ProductFilter::new(0, 10).with_search(Some("tea".to_string())))
            .await
            .unwrap();
        assert_eq!(teas.len(), 2);

        let active_teas = products
            .list(&ProductFilter::new(0, 10).with_search(Some("tea".to_string())).with_active(Some(true)))
            .await
            .unwrap();
        assert_eq!(active_teas.len(), 1);
        assert_eq!(active_teas[0].name, "Green Tea");

        let page = products.list(&ProductFilter::new(1, 1)).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].name, "Espresso");
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_update_missing_product_is_not_found(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let mut products = Products::new(&mut conn);
        let result = products.update(uuid::Uuid::new_v4(), &ProductUpdateDBRequest::default()).await;
        assert!(matches!(result, Err(DbError::NotFound)));
        assert!(!products.delete(uuid::Uuid::new_v4()).await.unwrap());
    }
}
