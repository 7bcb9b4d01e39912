use crate::auth::{
    guard::{AbuseGuard, CounterStore, GuardConfig, MemoryCounterStore, RedisCounterStore},
    identity::{DisabledVerifier, ExternalIdentityVerifier, GoogleVerifier, PgAuthenticator},
    session::{spawn_purge_worker, PgSessionStore, SessionStore},
    token::{TokenCodec, TokenConfig},
    LifecycleCoordinator,
};
use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::MatchedPath,
    http::{HeaderName, HeaderValue, Request},
    Extension,
};
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::PropagateRequestIdLayer, set_header::SetRequestHeaderLayer, trace::TraceLayer,
};
use tracing::{info, info_span, warn, Span};
use ulid::Ulid;
use utoipa_axum::router::OpenApiRouter;

pub(crate) mod handlers;
// OpenAPI router wiring and route registration live in openapi.rs.
mod openapi;

pub use openapi::openapi;

/// Build the API router with all documented routes registered.
#[must_use]
pub fn router() -> OpenApiRouter {
    openapi::api_router()
}

/// Everything the server needs, resolved from the CLI.
pub struct ServerConfig {
    pub port: u16,
    pub dsn: String,
    pub redis_url: Option<String>,
    pub token: TokenConfig,
    pub guard: GuardConfig,
    pub google_client_id: Option<String>,
    pub purge_interval: Duration,
}

/// Start the server
/// # Errors
/// Return error if failed to start the server
pub async fn new(config: ServerConfig) -> Result<()> {
    // Connect to database
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(&config.dsn)
        .await
        .context("Failed to connect to database")?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run database migrations")?;

    let codec = Arc::new(TokenCodec::new(&config.token)?);

    let counters: Arc<dyn CounterStore> = match &config.redis_url {
        Some(url) => Arc::new(
            RedisCounterStore::connect(url)
                .await
                .context("Failed to connect to redis")?,
        ),
        None => {
            warn!("No redis URL configured, abuse counters are process-local");
            Arc::new(MemoryCounterStore::new())
        }
    };
    let guard = AbuseGuard::new(counters, config.guard);

    let external: Arc<dyn ExternalIdentityVerifier> = match config.google_client_id {
        Some(client_id) => {
            let http = reqwest::Client::builder()
                .user_agent(crate::APP_USER_AGENT)
                .timeout(Duration::from_secs(10))
                .build()
                .context("Failed to build HTTP client")?;
            Arc::new(GoogleVerifier::new(client_id, http, pool.clone()))
        }
        None => Arc::new(DisabledVerifier),
    };

    let sessions: Arc<dyn SessionStore> = Arc::new(PgSessionStore::new(pool.clone()));
    spawn_purge_worker(sessions.clone(), config.purge_interval);

    let coordinator = Arc::new(LifecycleCoordinator::new(
        codec,
        sessions,
        guard,
        Arc::new(PgAuthenticator::new(pool.clone())),
        external,
    ));

    // Build the router from OpenAPI-wired routes. The document itself is
    // emitted by the `openapi` binary.
    let (router, _openapi) = router().split_for_parts();
    let app = router
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(Extension(coordinator))
                .layer(Extension(pool)),
        );

    let listener = TcpListener::bind(format!("::0:{}", config.port)).await?;

    info!("Listening on [::]:{}", config.port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Gracefully shutdown");
        })
        .await?;

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}
