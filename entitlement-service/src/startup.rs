//! Application startup and lifecycle management.

use crate::config::EntitlementConfig;
use crate::handlers::{admin, health, payments, promo, refunds, views};
use crate::middleware::session_auth_middleware;
use crate::models::PackageCatalog;
use crate::services::{
    AdminOverride, Database, PaymentAdapter, PaymentGateway, PaymentWriter, PromoService,
    RazorpayGateway, RefundWorkflow, SessionService, SharedStore, SubscriptionLedger,
    ViewMetering,
};
use axum::{
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Router,
};
use secrecy::ExposeSecret;
use service_core::error::AppError;
use service_core::middleware::{metrics_middleware, request_id_middleware, REQUEST_ID_HEADER};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: EntitlementConfig,
    pub store: SharedStore,
    pub catalog: Arc<PackageCatalog>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub sessions: SessionService,
    pub ledger: SubscriptionLedger,
    pub metering: ViewMetering,
    pub payments: PaymentAdapter,
    pub promos: PromoService,
    pub refunds: RefundWorkflow,
    pub admin: AdminOverride,
}

impl AppState {
    pub fn new(
        config: EntitlementConfig,
        store: SharedStore,
        fallback: Option<SharedStore>,
        gateway: Arc<dyn PaymentGateway>,
        catalog: Arc<PackageCatalog>,
    ) -> Self {
        let ledger = SubscriptionLedger::new(store.clone());
        let writer = PaymentWriter::new(store.clone(), fallback);
        let payments = PaymentAdapter::new(
            store.clone(),
            writer,
            gateway.clone(),
            catalog.clone(),
            &config.purchase,
        );

        Self {
            sessions: SessionService::new(&config.session),
            metering: ViewMetering::new(store.clone()),
            promos: PromoService::new(store.clone()),
            refunds: RefundWorkflow::new(store.clone()),
            admin: AdminOverride::new(ledger.clone()),
            ledger,
            payments,
            catalog,
            gateway,
            store,
            config,
        }
    }
}

/// Builds the HTTP router. Everything except health checks, the catalog and the
/// gateway webhook requires a session token.
pub fn build_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/entitlement", get(views::get_entitlement))
        .route("/entitlement/can-view", get(views::can_view))
        .route("/record-view", post(views::record_view))
        .route("/initiate-payment", post(payments::initiate_payment))
        .route("/payments", get(payments::list_payments))
        .route("/payments/:payment_id", get(payments::get_payment))
        .route("/promo/validate", post(promo::validate_promo))
        .route("/refund/request", post(refunds::request_refund))
        .route("/admin/refunds", get(refunds::list_refunds))
        .route("/refund/decide", post(refunds::decide_refund))
        .route("/admin/promo-codes", post(promo::create_promo_code))
        .route("/admin/promo-codes/:code", get(promo::get_promo_code))
        .route("/admin/adjust-quota", post(admin::adjust_quota))
        .route("/admin/users/:user_id/entitlement", get(admin::user_entitlement))
        .route("/admin/payments/expire-stale", post(payments::expire_stale_payments))
        .route_layer(from_fn_with_state(state.clone(), session_auth_middleware));

    Router::new()
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness_check))
        .route("/metrics", get(health::metrics_handler))
        .route("/packages", get(payments::list_packages))
        .route("/webhooks/gateway", post(payments::gateway_webhook))
        .merge(protected)
        .layer(from_fn(metrics_middleware))
        .layer(from_fn(request_id_middleware))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            }),
        )
        .with_state(state)
}

/// Application container for managing server lifecycle.
pub struct Application {
    http_port: u16,
    http_listener: TcpListener,
    state: AppState,
}

impl Application {
    /// Connects PostgreSQL, runs migrations and wires the Razorpay gateway.
    pub async fn build(config: EntitlementConfig) -> Result<Self, AppError> {
        let db = Database::new(
            config.database.url.expose_secret(),
            config.database.max_connections,
            config.database.min_connections,
        )
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to connect to PostgreSQL");
            e
        })?;

        db.run_migrations().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to run migrations");
            e
        })?;

        let fallback: Option<SharedStore> = match &config.database.fallback_url {
            Some(url) => {
                let fallback_db = Database::new(
                    url.expose_secret(),
                    config.database.max_connections,
                    config.database.min_connections,
                )
                .await
                .map_err(|e| {
                    tracing::error!(error = %e, "Failed to connect to fallback PostgreSQL");
                    e
                })?;
                Some(Arc::new(fallback_db))
            }
            None => None,
        };

        let gateway = RazorpayGateway::new(config.gateway.clone())?;
        if gateway.is_configured() {
            tracing::info!("Razorpay gateway initialized");
        } else {
            tracing::warn!("Razorpay credentials not configured - checkout will fail");
        }

        Self::build_with_store(config, Arc::new(db), fallback, Arc::new(gateway)).await
    }

    /// Builds around an already constructed store and gateway. A fallback
    /// route is refused unless it reaches the same data as `store`.
    pub async fn build_with_store(
        config: EntitlementConfig,
        store: SharedStore,
        fallback: Option<SharedStore>,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Result<Self, AppError> {
        let fallback = match fallback {
            Some(fallback) => Some(
                PaymentWriter::verify_fallback(&store, fallback)
                    .await
                    .map_err(|e| {
                        tracing::error!(error = %e, "Fallback payment route rejected");
                        AppError::ConfigError(anyhow::anyhow!("fallback payment route: {}", e))
                    })?,
            ),
            None => None,
        };

        let catalog = match &config.catalog_path {
            Some(path) => PackageCatalog::from_json_file(path).map_err(|e| {
                tracing::error!(error = %e, path = %path, "Failed to load package catalog");
                AppError::ConfigError(e)
            })?,
            None => PackageCatalog::default_catalog(),
        };
        tracing::info!(packages = catalog.all().len(), "Package catalog loaded");

        let state = AppState::new(config.clone(), store, fallback, gateway, Arc::new(catalog));

        let http_addr = config.common.bind_address();
        let http_listener = TcpListener::bind(&http_addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %http_addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let http_port = http_listener.local_addr()?.port();

        tracing::info!(http_port = http_port, "Entitlement service listener bound");

        Ok(Self {
            http_port,
            http_listener,
            state,
        })
    }

    /// Get the HTTP port the server is listening on.
    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let router = build_router(self.state);

        tracing::info!(
            service = "entitlement-service",
            version = env!("CARGO_PKG_VERSION"),
            http_port = self.http_port,
            "Service ready to accept connections"
        );

        axum::serve(self.http_listener, router).await.map_err(|e| {
            tracing::error!(error = %e, "HTTP server error");
            std::io::Error::other(format!("HTTP server error: {}", e))
        })
    }
}
