use utoipa::{
    openapi::security::{ApiKey, ApiKeyValue, SecurityScheme},
    Modify, OpenApi,
};

use crate::api;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.security_schemes.insert(
                "X-Loyalty-User".to_string(),
                SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new("X-Loyalty-User"))),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    servers(
        (url = "/api/v1", description = "Loyalty API server")
    ),
    modifiers(&SecurityAddon),
    paths(
        api::handlers::users::list_users,
        api::handlers::users::create_user,
        api::handlers::users::get_user,
        api::handlers::users::update_user,
        api::handlers::users::delete_user,
        api::handlers::products::list_products,
        api::handlers::products::create_product,
        api::handlers::products::get_product,
        api::handlers::products::update_product,
        api::handlers::products::delete_product,
        api::handlers::orders::list_orders,
        api::handlers::orders::create_order,
        api::handlers::orders::get_order,
        api::handlers::orders::update_order,
        api::handlers::points::get_user_points,
        api::handlers::points::adjust_user_points,
        api::handlers::points::redeem_points,
        api::handlers::points::list_ledger_entries,
        api::handlers::points::get_ledger_entry,
    ),
    components(
        schemas(
            api::models::users::Role,
            api::models::users::UserCreate,
            api::models::users::UserUpdate,
            api::models::users::UserResponse,
            api::models::users::CurrentUser,
            api::models::products::ProductCreate,
            api::models::products::ProductUpdate,
            api::models::products::ProductResponse,
            api::models::orders::OrderItemCreate,
            api::models::orders::OrderCreate,
            api::models::orders::OrderUpdate,
            api::models::orders::OrderItemResponse,
            api::models::orders::OrderResponse,
            api::models::orders::OrderWriteResponse,
            api::models::points::AdjustPointsRequest,
            api::models::points::RedeemItemRequest,
            api::models::points::RedeemRequest,
            api::models::points::LedgerEntryResponse,
            api::models::points::PointsSummaryResponse,
            api::models::points::LedgerMutationResponse,
            api::models::points::CreditResponse,
            crate::db::models::orders::OrderStatus,
            crate::db::models::points::LedgerEntryKind,
        )
    ),
    tags(
        (name = "users", description = "User management API"),
        (name = "products", description = "Product catalogue API"),
        (name = "orders", description = "Order lifecycle API"),
        (name = "points", description = "Points balances, redemptions and the ledger"),
    ),
    info(
        title = "Loyalty API",
        version = "0.1.0",
        description = "API for crediting, adjusting and redeeming loyalty points against an append-only ledger",
    ),
)]
pub struct ApiDoc;
