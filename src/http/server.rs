use crate::config::Config;
use crate::http::error::Error;
use crate::http::pipeline::{self, sweep_forever, Pipeline, RateLimiter};
use crate::http::{auth, resources, ApiContext};
use crate::models::resource::ResourceKind;
use crate::models::{DynStore, Store};
use anyhow::Context;
use axum::handler::HandlerWithoutStateExt;
use axum::http::Method;
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::Router;
use sqlx::PgPool;
use std::any::Any;
use std::future::Future;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{self, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

/// Runs the API until it is interrupted or a background task fails.
///
/// A background failure closes the listener, lets in-flight requests finish and then comes back
/// as `Err`, so the process exits non-zero.
pub async fn serve(config: Config, db: PgPool) -> anyhow::Result<()> {
    let config = Arc::new(config);
    let (supervisor, mut fatal) = Supervisor::new();

    let limiter = Arc::new(RateLimiter::new(
        config.rate_limit_max,
        Duration::from_secs(config.rate_limit_window_secs),
    ));
    supervisor.spawn("rate limit sweeper", sweep_forever(limiter.clone()));

    let api_context = ApiContext {
        config: config.clone(),
        store: Arc::new(Store::new(db)) as DynStore,
    };
    let app = api_router(api_context, Pipeline::standard(&config, limiter));

    // Port is configured in .env
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.port));
    let server = Server::start(addr, app, &supervisor)?;

    log::info!(
        "Server running in {} mode on port {}",
        config.app_env,
        server.local_addr().port()
    );

    let result = tokio::select! {
        Some(err) = fatal.next() => {
            log::error!("Error: {:#}", err);
            Err(err)
        }
        res = tokio::signal::ctrl_c() => {
            log::info!("interrupted, shutting down");
            res.context("failed to listen for ctrl-c")
        }
    };

    server.shutdown().await;
    result
}

/// Everything the API serves, in the order a request meets it.
///
/// The outermost layers go last: tracing sees every request, panics are caught before they
/// reach hyper, CORS answers preflights before anything is counted against the rate limit.
/// Uploaded files are served beside the API, so fetching one never goes through the pipeline.
pub(crate) fn api_router(api_context: ApiContext, pipeline: Pipeline) -> Router {
    let config = &api_context.config;

    let api = Router::new()
        .nest("/api/v1/bootcamps", resources::router(ResourceKind::Bootcamp, config))
        .nest("/api/v1/courses", resources::router(ResourceKind::Course, config))
        .nest("/api/v1/auth", auth::router())
        .nest("/api/v1/users", resources::router(ResourceKind::User, config))
        .nest("/api/v1/reviews", resources::router(ResourceKind::Review, config))
        .layer(middleware::from_fn_with_state(pipeline, pipeline::drive));

    let static_files = ServeDir::new(&config.file_upload_path)
        .not_found_service(route_not_found.into_service());

    Router::new()
        .merge(api)
        .fallback_service(static_files)
        .layer(
            CorsLayer::new()
                .allow_origin(cors::Any)
                .allow_headers(cors::Any)
                .allow_methods([
                    Method::GET,
                    Method::HEAD,
                    Method::PUT,
                    Method::PATCH,
                    Method::POST,
                    Method::DELETE,
                ]),
        )
        .layer(CatchPanicLayer::custom(panic_response))
        // Enables logging. Use `RUST_LOG=tower_http=debug`
        .layer(TraceLayer::new_for_http())
        .with_state(api_context)
}

async fn route_not_found() -> Error {
    Error::not_found("Not found")
}

fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic payload");

    Error::Anyhow(anyhow::anyhow!("handler panicked: {}", detail)).into_response()
}

/// A running HTTP listener. Dropping it without calling [`Server::shutdown`] leaves it running
/// until the runtime stops.
pub struct Server {
    local_addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    stopped: oneshot::Receiver<()>,
}

impl Server {
    /// Bind `addr` and start serving `app` on a supervised task.
    ///
    /// Binding happens before this returns, so a port that's already taken is reported here
    /// rather than through the supervisor.
    pub fn start(addr: SocketAddr, app: Router, supervisor: &Supervisor) -> anyhow::Result<Self> {
        let server = axum::Server::try_bind(&addr)
            .with_context(|| format!("failed to bind {}", addr))?
            .serve(app.into_make_service_with_connect_info::<SocketAddr>());
        let local_addr = server.local_addr();

        let (shutdown, shutdown_rx) = oneshot::channel::<()>();
        let (stopped_tx, stopped) = oneshot::channel();

        let graceful = server.with_graceful_shutdown(async {
            shutdown_rx.await.ok();
        });

        supervisor.spawn("http server", async move {
            let res = graceful.await.context("error running HTTP server");
            stopped_tx.send(()).ok();
            res
        });

        Ok(Self {
            local_addr,
            shutdown,
            stopped,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting connections and wait for in-flight requests to finish.
    pub async fn shutdown(self) {
        self.shutdown.send(()).ok();
        // An `Err` means the server task is already gone, which is just as stopped.
        self.stopped.await.ok();
    }
}

/// Spawns background tasks and reports any that fail or panic.
///
/// Nothing here restarts a task; a failure is treated as fatal by whoever holds the matching
/// [`FatalErrors`].
#[derive(Clone)]
pub struct Supervisor {
    fatal: mpsc::UnboundedSender<anyhow::Error>,
}

pub struct FatalErrors(mpsc::UnboundedReceiver<anyhow::Error>);

impl Supervisor {
    pub fn new() -> (Self, FatalErrors) {
        let (fatal, rx) = mpsc::unbounded_channel();
        (Self { fatal }, FatalErrors(rx))
    }

    pub fn spawn<F>(&self, name: &'static str, task: F)
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let fatal = self.fatal.clone();
        let handle = tokio::spawn(task);

        tokio::spawn(async move {
            let err = match handle.await {
                Ok(Ok(())) => {
                    log::debug!("background task `{}` finished", name);
                    return;
                }
                Ok(Err(e)) => e.context(format!("background task `{}` failed", name)),
                Err(e) => anyhow::anyhow!("background task `{}` panicked: {}", name, e),
            };

            // Nobody listening means we're already on the way out.
            fatal.send(err).ok();
        });
    }
}

impl FatalErrors {
    /// The next failure, or `None` once every [`Supervisor`] handle has been dropped.
    pub async fn next(&mut self) -> Option<anyhow::Error> {
        self.0.recv().await
    }
}
