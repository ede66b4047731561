use crate::{
    api::models::users::{Role, UserResponse},
    config::{Config, PointsConfig, ProxyHeaderAuthConfig},
    db::{
        handlers::{Orders, Points, Products, Repository, Users},
        models::{
            orders::{OrderCreateDBRequest, OrderDBResponse, OrderItemCreateDBRequest, OrderStatus},
            points::{AdjustmentDBRequest, LedgerEntryDBResponse},
            products::{ProductCreateDBRequest, ProductDBResponse},
            users::UserCreateDBRequest,
        },
    },
    types::{ProductId, UserId},
};

use axum_test::TestServer;
use sqlx::PgPool;
use uuid::Uuid;

pub async fn create_test_app(pool: PgPool) -> TestServer {
    create_test_app_with_config(pool, create_test_config()).await
}

pub async fn create_test_app_with_config(pool: PgPool, config: Config) -> TestServer {
    let (router, _state) = crate::setup_app(pool, config).await.expect("Failed to setup test app");
    TestServer::new(router).expect("Failed to create test server")
}

pub fn create_test_config() -> Config {
    let database_url = std::env::var("TEST_DATABASE_URL").unwrap_or_else(|_| "postgres://postgres@localhost/test".to_string());

    Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        database_url,
        admin_email: "admin@test.com".to_string(),
        points: PointsConfig::default(),
        // Tests drive crediting explicitly
        reconciler: crate::config::ReconcilerConfig {
            enabled: false,
            ..Default::default()
        },
        enable_metrics: false,
        ..Default::default()
    }
}

async fn insert_user(pool: &PgPool, prefix: &str, display_name: &str, is_admin: bool, roles: Vec<Role>) -> UserResponse {
    let mut conn = pool.acquire().await.expect("Failed to acquire connection");
    let mut users_repo = Users::new(&mut conn);
    let username = format!("{prefix}_{}", Uuid::new_v4().simple());
    let email = format!("{username}@example.com");

    let user_create = UserCreateDBRequest {
        username,
        email,
        display_name: Some(display_name.to_string()),
        is_admin,
        roles,
    };

    let user = users_repo.create(&user_create).await.expect("Failed to create test user");
    UserResponse::from(user)
}

pub async fn create_test_user(pool: &PgPool, role: Role) -> UserResponse {
    insert_user(pool, "testuser", "Test User", false, vec![role]).await
}

pub async fn create_test_admin_user(pool: &PgPool, role: Role) -> UserResponse {
    insert_user(pool, "testadmin", "Test Admin User", true, vec![role]).await
}

/// A user with no roles, for repository tests that only need a ledger owner
pub async fn create_bare_user(pool: &PgPool) -> UserId {
    insert_user(pool, "bare", "Bare User", false, vec![]).await.id
}

pub fn add_auth_headers(user: &UserResponse) -> (String, String) {
    (ProxyHeaderAuthConfig::default().header_name, user.email.clone())
}

pub async fn create_test_product(pool: &PgPool, points: i64) -> ProductDBResponse {
    let mut conn = pool.acquire().await.expect("Failed to acquire connection");
    let request = ProductCreateDBRequest::builder()
        .name(format!("test_product_{}", Uuid::new_v4().simple()))
        .points(points)
        .build();
    Products::new(&mut conn)
        .create(&request)
        .await
        .expect("Failed to create test product")
}

/// Insert an order straight through the repository. No crediting happens, even for
/// `OrderStatus::Completed`.
pub async fn create_test_order(pool: &PgPool, user_id: UserId, items: &[(ProductId, i32)], status: OrderStatus) -> OrderDBResponse {
    let mut conn = pool.acquire().await.expect("Failed to acquire connection");
    let request = OrderCreateDBRequest {
        user_id,
        status,
        items: items
            .iter()
            .map(|&(product_id, quantity)| OrderItemCreateDBRequest { product_id, quantity })
            .collect(),
    };
    Orders::new(&mut conn).create(&request).await.expect("Failed to create test order")
}

/// Give a user points through a manual adjustment, recorded against a throwaway actor
pub async fn grant_test_points(pool: &PgPool, user_id: UserId, points: i64) -> LedgerEntryDBResponse {
    let actor_id = create_bare_user(pool).await;
    let mut conn = pool.acquire().await.expect("Failed to acquire connection");
    let request = AdjustmentDBRequest {
        user_id,
        delta: points,
        reason: Some("Test grant".to_string()),
        actor_id,
    };
    Points::new(&mut conn)
        .adjust(&request, &PointsConfig::default())
        .await
        .expect("Failed to grant test points")
        .entry
}
