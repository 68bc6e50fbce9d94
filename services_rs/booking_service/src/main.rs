mod catalog;
mod config;
mod db;
mod domain;
mod error;
mod handlers;
mod inventory;
mod lifecycle;
mod models;
mod notify;
mod state;
mod store;

use axum::extract::MatchedPath;
use axum::http::{header, header::HeaderName, Method, StatusCode};
use axum::routing::{get, patch, post};
use axum::Router;
use busline_common::gateway_auth::GatewayAuthLayer;
use busline_common::request_id::{RequestId, RequestIdLayer};
use config::Config;
use lifecycle::BookingLifecycle;
use notify::{HttpNotifier, LogNotifier, Notifier};
use state::AppState;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use store::postgres::PgLedgerStore;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(2);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let pool = match db::connect(&cfg.db_url).await {
        Ok(p) => p,
        Err(e) => {
            tracing::error!(error = %e, "db connect failed");
            std::process::exit(2);
        }
    };
    if let Err(e) = db::ensure_schema(&pool, &cfg.db_schema).await {
        tracing::error!(error = %e, "db ensure_schema failed");
        std::process::exit(2);
    }

    let http = match reqwest::Client::builder()
        .timeout(Duration::from_secs(20))
        .build()
    {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "http client init failed");
            std::process::exit(2);
        }
    };

    let notifier: Arc<dyn Notifier> = match cfg.notify_base_url.clone() {
        Some(base_url) => Arc::new(HttpNotifier::new(
            http,
            base_url,
            cfg.notify_internal_secret.clone(),
            cfg.service_id.clone(),
        )),
        None => {
            tracing::warn!("NOTIFY_BASE_URL not set; booking confirmations are only logged");
            Arc::new(LogNotifier)
        }
    };
    let store = Arc::new(PgLedgerStore::new(pool.clone(), cfg.db_schema.clone()));
    let lifecycle = Arc::new(BookingLifecycle::new(
        store,
        notifier,
        cfg.max_seats_per_booking,
    ));

    let state = AppState {
        pool,
        db_schema: cfg.db_schema.clone(),
        env_name: cfg.env_name.clone(),
        lifecycle,
    };

    let gateway = GatewayAuthLayer::new(cfg.require_gateway_secret, cfg.gateway_secret.clone())
        .with_allowed_callers(cfg.gateway_allowed_callers.clone());
    let app = router(state, gateway, &cfg.allowed_origins, cfg.max_body_bytes);

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], cfg.port)));
    tracing::info!(%addr, env = %cfg.env_name, "starting busline_booking_service");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(error = %e, %addr, "bind failed");
            std::process::exit(2);
        }
    };
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %e, "server error");
        std::process::exit(1);
    }
}

fn router(
    state: AppState,
    gateway: GatewayAuthLayer,
    allowed_origins: &[String],
    max_body_bytes: usize,
) -> Router {
    let authed = Router::new()
        .route("/bookings", post(handlers::create_booking))
        .route("/bookings/my-bookings", get(handlers::my_bookings))
        .route("/bookings/:booking", get(handlers::booking_by_reference))
        .route("/bookings/:booking/cancel", patch(handlers::cancel_booking))
        .route(
            "/bookings/:booking/complete",
            patch(handlers::complete_booking),
        )
        .route("/payments", post(handlers::create_payment))
        .route("/payments/history", get(handlers::payment_history))
        .route("/payments/:payment_id", get(handlers::payment_detail))
        .route("/stations", post(catalog::create_station))
        .route("/stations/search", get(catalog::search_stations))
        .route("/stations/cities", get(catalog::list_cities))
        .route("/stations/by-city/:city", get(catalog::stations_by_city))
        .route("/stations/:station_id", get(catalog::station_detail))
        .route(
            "/companies",
            get(catalog::list_companies).post(catalog::create_company),
        )
        .route("/companies/:company_id/buses", get(catalog::company_buses))
        .route("/buses", post(catalog::create_bus))
        .route(
            "/routes",
            get(catalog::list_routes).post(catalog::create_route),
        )
        .route("/routes/popular", get(catalog::popular_routes))
        .route("/schedules", post(catalog::create_schedule))
        .route("/schedules/search", get(catalog::search_schedules))
        .route(
            "/schedules/:schedule_id",
            get(catalog::schedule_detail).delete(catalog::deactivate_schedule),
        )
        .route(
            "/schedules/:schedule_id/status",
            patch(catalog::update_schedule_status),
        )
        .layer(gateway);

    let methods = [
        Method::GET,
        Method::POST,
        Method::PATCH,
        Method::DELETE,
        Method::OPTIONS,
    ];
    let cors = if allowed_origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(methods)
            .allow_headers(cors_allowed_headers())
            .allow_credentials(false)
    } else {
        let origins: Vec<axum::http::HeaderValue> = allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_methods(methods)
            .allow_headers(cors_allowed_headers())
            .allow_credentials(false)
            .allow_origin(AllowOrigin::list(origins))
    };

    Router::new()
        .route("/health", get(handlers::health))
        .merge(authed)
        // Unknown routes are 404, never the gateway layer's 401.
        .fallback(|| async { StatusCode::NOT_FOUND })
        .with_state(state)
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        // Log the matched route template, never the raw query string.
        .layer(
            TraceLayer::new_for_http().make_span_with(|req: &axum::http::Request<_>| {
                let path = req
                    .extensions()
                    .get::<MatchedPath>()
                    .map(MatchedPath::as_str)
                    .unwrap_or_else(|| req.uri().path());
                let request_id = req
                    .extensions()
                    .get::<RequestId>()
                    .map(RequestId::as_str)
                    .unwrap_or("");
                tracing::span!(
                    tracing::Level::INFO,
                    "http_request",
                    method = %req.method(),
                    path = %path,
                    request_id = %request_id
                )
            }),
        )
        .layer(RequestIdLayer::x_request_id())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}

fn cors_allowed_headers() -> Vec<HeaderName> {
    vec![
        header::ACCEPT,
        header::AUTHORIZATION,
        header::CONTENT_TYPE,
        HeaderName::from_static("x-request-id"),
    ]
}
