//! HTTP surface: router, middleware stack, background jobs and server startup.

use anyhow::{anyhow, bail, Context, Result};
use axum::{
    body::Body,
    extract::MatchedPath,
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderName, HeaderValue, Method, Request,
    },
    routing::options,
    Extension, Router,
};
use sqlx::postgres::PgPoolOptions;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{error, info, info_span, warn, Span};
use ulid::Ulid;
use url::Url;
use utoipa_axum::router::OpenApiRouter;

use crate::{
    auth::{FederatedVerifier, TokenIssuer},
    email::{EmailDispatcher, EmailSender, EmailTemplates, EmailWorkerConfig},
    kv::{KvStore, MemoryKvStore, PgKvStore},
    store::{AuthStore, MemoryStore, PgStore},
};

pub(crate) mod cleanup;
pub(crate) mod error;
pub mod handlers;
// OpenAPI router wiring and route registration live in openapi.rs.
mod openapi;

pub use openapi::openapi;

use handlers::auth::{self, utils::CSRF_HEADER_NAME, AuthConfig, AuthDeps, AuthState};
use handlers::health;

/// Build the API router with all documented routes registered.
#[must_use]
pub fn router() -> OpenApiRouter {
    openapi::api_router()
}

/// Durable and shared state selected by the DSN.
pub struct Backends {
    pub store: Arc<dyn AuthStore>,
    pub kv: Arc<dyn KvStore>,
}

/// Collaborators built from CLI options.
pub struct Services {
    pub issuer: TokenIssuer,
    pub federated: Arc<dyn FederatedVerifier>,
    pub email_sender: Arc<dyn EmailSender>,
    pub email_templates: EmailTemplates,
    pub email_config: EmailWorkerConfig,
}

/// Open the backends for `dsn`: `postgres://…` shares state through the database,
/// `memory://` keeps everything in this process.
///
/// # Errors
/// Return error if the scheme is unsupported or the database is unreachable.
pub async fn connect(dsn: &str) -> Result<Backends> {
    if dsn.starts_with("memory://") {
        warn!("Using in-memory stores; state is lost on restart and not shared between instances");
        return Ok(Backends {
            store: Arc::new(MemoryStore::new()),
            kv: Arc::new(MemoryKvStore::new()),
        });
    }

    if !(dsn.starts_with("postgres://") || dsn.starts_with("postgresql://")) {
        bail!("Unsupported DSN scheme, expected postgres:// or memory://");
    }

    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(dsn)
        .await
        .context("Failed to connect to database")?;

    let store = PgStore::new(pool.clone());
    store.migrate().await.context("Failed to apply schema")?;

    Ok(Backends {
        store: Arc::new(store),
        kv: Arc::new(PgKvStore::new(pool)),
    })
}

/// Start the server
/// # Errors
/// Return error if failed to start the server
pub async fn new(
    port: u16,
    dsn: String,
    auth_config: AuthConfig,
    services: Services,
    cleanup_interval: Duration,
) -> Result<()> {
    let Backends { store, kv } = connect(&dsn).await?;

    // Verification and reset emails go through a bounded queue drained by a
    // background worker that retries with exponential backoff.
    let (dispatcher, email_worker) = EmailDispatcher::spawn(
        services.email_sender,
        services.email_templates,
        services.email_config,
    );

    let auth_state = Arc::new(AuthState::new(
        auth_config,
        AuthDeps {
            store,
            kv,
            issuer: services.issuer,
            notifier: Arc::new(dispatcher),
            federated: services.federated,
        },
    ));

    let cleanup_job = cleanup::spawn_cleanup_job(auth_state.clone(), cleanup_interval);

    let app = app(auth_state)?;

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    cleanup_job.abort();
    let _ = cleanup_job.await;

    // The worker exits once the last notifier handle is gone and the queue is drained.
    if tokio::time::timeout(Duration::from_secs(10), email_worker)
        .await
        .is_err()
    {
        warn!("Email worker did not drain before shutdown");
    }

    info!("Gracefully shutdown");
    Ok(())
}

/// Routes plus the middleware stack: request id, tracing, CORS, then per-route
/// rate limiting and CSRF validation.
///
/// # Errors
/// Return error if the frontend base URL cannot be turned into a CORS origin.
pub fn app(auth_state: Arc<AuthState>) -> Result<Router> {
    let frontend_origin = frontend_origin(auth_state.config().frontend_base_url())?;
    let cors = CorsLayer::new()
        .allow_headers([
            CONTENT_TYPE,
            AUTHORIZATION,
            HeaderName::from_static(CSRF_HEADER_NAME),
        ])
        .allow_methods([Method::GET, Method::POST])
        .allow_origin(AllowOrigin::exact(frontend_origin))
        .allow_credentials(true);

    // Build the router from OpenAPI-wired routes, then extend it with the
    // preflight-only `OPTIONS /health`.
    let (router, _openapi) = router().split_for_parts();
    let app = router.route("/health", options(health::health)).layer(
        ServiceBuilder::new()
            .layer(SetRequestHeaderLayer::if_not_present(
                HeaderName::from_static("x-request-id"),
                |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
            ))
            .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                "x-request-id",
            )))
            .layer(TraceLayer::new_for_http().make_span_with(make_span))
            .layer(cors)
            .layer(Extension(auth_state))
            .layer(axum::middleware::from_fn(auth::middleware::rate_limit))
            .layer(axum::middleware::from_fn(auth::middleware::csrf)),
    );

    Ok(app)
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

fn frontend_origin(frontend_base_url: &str) -> Result<HeaderValue> {
    let parsed = Url::parse(frontend_base_url)
        .with_context(|| format!("Invalid frontend base URL: {frontend_base_url}"))?;
    let host = parsed.host_str().ok_or_else(|| {
        anyhow!("Frontend base URL must include a valid host: {frontend_base_url}")
    })?;
    let port = parsed
        .port()
        .map_or_else(String::new, |port| format!(":{port}"));
    let origin = format!("{}://{}{}", parsed.scheme(), host, port);
    HeaderValue::from_str(&origin).context("Failed to build frontend origin header")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!("Failed to install SIGTERM handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}
