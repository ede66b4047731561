mod api;
mod auth;
mod config;
mod db;
mod errors;
mod metrics;
mod openapi;
mod reconcile;
mod rules;
mod types;

#[cfg(test)]
mod test_utils;

use crate::{
    api::models::users::Role,
    db::{
        handlers::{Repository, Users},
        models::users::UserCreateDBRequest,
    },
    metrics::LedgerMetrics,
    openapi::ApiDoc,
    reconcile::CreditReconciler,
};
use axum::{
    http::{HeaderValue, Request, Response},
    routing::{delete, get, patch, post},
    Router,
};
use axum_prometheus::PrometheusMetricLayer;
use bon::Builder;
use clap::Parser;
use config::{Args, Config};
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, info, instrument, Span};
use utoipa::OpenApi;
use utoipa_rapidoc::RapiDoc;

pub use types::UserId;

#[derive(Clone, Builder)]
pub struct AppState {
    pub db: PgPool,
    pub config: Config,
    /// Ledger counters, present when metrics are enabled
    pub metrics: Option<LedgerMetrics>,
}

/// Create the initial admin user if it doesn't exist
pub async fn create_initial_admin_user(email: &str, db: &PgPool) -> Result<UserId, sqlx::Error> {
    // Use a transaction so a concurrent replica can't create it twice
    let mut tx = db.begin().await?;
    let mut user_repo = Users::new(&mut tx);

    if let Some(existing_user) = user_repo
        .get_user_by_email(email)
        .await
        .map_err(|e| sqlx::Error::Protocol(format!("Failed to check existing user: {e}")))?
    {
        tx.commit().await?;
        return Ok(existing_user.id);
    }

    let user_create = UserCreateDBRequest {
        username: email.to_string(),
        email: email.to_string(),
        display_name: None,
        is_admin: true,
        roles: vec![Role::StoreOperator, Role::LoyaltyManager],
    };

    let created_user = user_repo
        .create(&user_create)
        .await
        .map_err(|e| sqlx::Error::Protocol(format!("Failed to create admin user: {e}")))?;

    tx.commit().await?;
    info!("Created initial admin user {}", email);
    Ok(created_user.id)
}

/// Create CORS layer from configuration
fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let mut origins = Vec::new();
    for origin in &config.cors.allowed_origins {
        origins.push(origin.parse::<HeaderValue>()?);
    }

    let mut cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_credentials(config.cors.allow_credentials);

    if let Some(max_age) = config.cors.max_age {
        cors = cors.max_age(Duration::from_secs(max_age));
    }

    Ok(cors)
}

/// Build the application state and router
#[instrument(skip(pool, config))]
pub async fn setup_app(pool: PgPool, config: Config) -> anyhow::Result<(Router, AppState)> {
    debug!("Setting up application");

    let metrics = if config.enable_metrics {
        let registry = prometheus::Registry::new();
        Some(LedgerMetrics::new(&registry).map_err(|e| anyhow::anyhow!("Failed to create ledger metrics: {}", e))?)
    } else {
        None
    };

    let app_state = AppState::builder().db(pool).config(config).maybe_metrics(metrics).build();
    let router = build_router(&app_state)?;

    Ok((router, app_state))
}

#[instrument(skip(state))]
pub fn build_router(state: &AppState) -> anyhow::Result<Router> {
    let api_routes = Router::new()
        // User management (admin only for collection operations)
        .route("/users", get(api::handlers::users::list_users))
        .route("/users", post(api::handlers::users::create_user))
        .route("/users/{id}", get(api::handlers::users::get_user))
        .route("/users/{id}", patch(api::handlers::users::update_user))
        .route("/users/{id}", delete(api::handlers::users::delete_user))
        // Points as user sub-resources
        .route("/users/{user_id}/points", get(api::handlers::points::get_user_points))
        .route("/users/{user_id}/points/adjust", post(api::handlers::points::adjust_user_points))
        .route("/redemptions", post(api::handlers::points::redeem_points))
        .route("/ledger-entries", get(api::handlers::points::list_ledger_entries))
        .route("/ledger-entries/{entry_id}", get(api::handlers::points::get_ledger_entry))
        // Catalogue
        .route("/products", get(api::handlers::products::list_products))
        .route("/products", post(api::handlers::products::create_product))
        .route("/products/{id}", get(api::handlers::products::get_product))
        .route("/products/{id}", patch(api::handlers::products::update_product))
        .route("/products/{id}", delete(api::handlers::products::delete_product))
        // Orders
        .route("/orders", get(api::handlers::orders::list_orders))
        .route("/orders", post(api::handlers::orders::create_order))
        .route("/orders/{id}", get(api::handlers::orders::get_order))
        .route("/orders/{id}", patch(api::handlers::orders::update_order))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<_>| {
                    tracing::info_span!(
                        "request",
                        method = %request.method(),
                        uri = %request.uri(),
                    )
                })
                .on_response(|response: &Response<_>, latency: Duration, _span: &Span| {
                    tracing::info!(
                        status = %response.status(),
                        latency = ?latency,
                        "request completed"
                    );
                }),
        )
        .with_state(state.clone());

    let router = Router::new()
        .route("/healthz", get(|| async { "OK" }))
        .nest("/api/v1", api_routes)
        .merge(RapiDoc::with_openapi("/api-docs/openapi.json", ApiDoc::openapi()).path("/docs"));

    let mut router = router.layer(create_cors_layer(&state.config)?);

    if let Some(ledger_metrics) = state.metrics.clone() {
        let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();

        // HTTP metrics from axum-prometheus followed by the ledger counters
        router = router
            .route(
                "/internal/metrics",
                get(|| async move {
                    let mut rendered = metric_handle.render();
                    rendered.push_str(&ledger_metrics.render());
                    rendered
                }),
            )
            .layer(prometheus_layer);
    }

    Ok(router)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing with environment filter
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,sqlx=warn")),
        )
        .init();

    let args = Args::parse();
    debug!("{:?}", args);

    let config = Config::load(&args)?;
    if args.validate {
        info!("Configuration in {} is valid", args.config);
        return Ok(());
    }
    debug!("Starting loyalty service with configuration: {:#?}", config);

    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    create_initial_admin_user(&config.admin_email, &pool)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create initial admin user: {}", e))?;

    let (router, state) = setup_app(pool.clone(), config.clone()).await?;

    let shutdown = CancellationToken::new();
    let reconciler_handle = if config.reconciler.enabled {
        let reconciler = CreditReconciler::new(pool.clone(), config.points.clone(), config.reconciler.clone(), state.metrics.clone());
        Some(tokio::spawn(reconciler.run(shutdown.clone())))
    } else {
        info!("Credit reconciler disabled");
        None
    };

    let bind_addr = config.bind_address();
    let listener = TcpListener::bind(&bind_addr).await?;
    info!(
        "Loyalty service listening on http://{}, available at http://localhost:{}",
        bind_addr, config.port
    );

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    shutdown.cancel();
    if let Some(handle) = reconciler_handle {
        handle.await?;
    }
    pool.close().await;

    Ok(())
}

/// Wait for shutdown signal (SIGTERM or Ctrl+C)
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down gracefully...");
        },
        _ = terminate => {
            info!("Received SIGTERM, shutting down gracefully...");
        },
    }
}
