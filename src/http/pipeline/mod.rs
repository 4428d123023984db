//! The request pipeline: an ordered list of stages run in front of the routers.
//!
//! Each stage gets a look at the request on the way in and may fail it, in which case the
//! failure goes straight to the error classifier and no later stage or handler runs. On the way
//! out, every stage gets a look at whatever response is leaving, success or failure.
//!
//! CORS and static files aren't stages: preflight requests need to be answered with a success,
//! which a stage can't do, and static files are a fallback service. Both are wired up in
//! `server::api_router()`.

use crate::config::Config;
use crate::http::error::Error;
use async_trait::async_trait;
use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, Uri};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::sync::Arc;
use url::form_urlencoded;

mod body;
mod cookies;
mod headers;
mod pollution;
mod rate_limit;
mod sanitize;
mod upload;

pub use body::{BodyParser, ParsedBody};
pub use cookies::{CookieParser, Cookies};
pub use headers::SecurityHeaders;
pub use pollution::ParamPollution;
pub use rate_limit::{sweep_forever, RateLimit, RateLimiter};
pub use sanitize::Sanitize;
pub use upload::UploadLimit;
pub(crate) use upload::{multipart_limit, too_large as upload_too_large};

/// Largest JSON body the body parser will buffer.
pub const JSON_LIMIT: usize = 1024 * 1024;

/// One unit of request processing.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Inspect or rewrite the request. Returning `Err` skips the rest of the pipeline.
    async fn before(&self, _req: &mut Request<Body>) -> Result<(), Error> {
        Ok(())
    }

    /// Called on every response leaving the pipeline, including failures.
    fn after(&self, _res: &mut Response) {}
}

#[derive(Clone)]
pub struct Pipeline {
    stages: Arc<[Box<dyn Stage>]>,
}

impl Pipeline {
    pub fn new(stages: Vec<Box<dyn Stage>>) -> Self {
        Self {
            stages: stages.into(),
        }
    }

    /// The stages every request goes through, in order.
    pub fn standard(config: &Config, rate_limiter: Arc<RateLimiter>) -> Self {
        Self::new(vec![
            Box::new(UploadLimit::new(config.max_file_upload)),
            Box::new(BodyParser::new(JSON_LIMIT)),
            Box::new(Sanitize),
            Box::new(SecurityHeaders),
            Box::new(RateLimit::new(rate_limiter)),
            Box::new(ParamPollution),
            Box::new(CookieParser),
        ])
    }

    pub async fn run(&self, mut req: Request<Body>, next: Next<Body>) -> Response {
        let mut response = match self.before(&mut req).await {
            Ok(()) => next.run(req).await,
            Err(e) => e.into_response(),
        };

        for stage in self.stages.iter() {
            stage.after(&mut response);
        }

        response
    }

    async fn before(&self, req: &mut Request<Body>) -> Result<(), Error> {
        for stage in self.stages.iter() {
            stage.before(req).await?;
        }
        Ok(())
    }
}

/// Middleware entry point, for `axum::middleware::from_fn_with_state`.
pub async fn drive(
    State(pipeline): State<Pipeline>,
    req: Request<Body>,
    next: Next<Body>,
) -> Response {
    pipeline.run(req, next).await
}

/// Decoded `key=value` pairs of the request's query string, in order.
pub(crate) fn query_pairs(uri: &Uri) -> Vec<(String, String)> {
    uri.query()
        .map(|query| {
            form_urlencoded::parse(query.as_bytes())
                .into_owned()
                .collect()
        })
        .unwrap_or_default()
}

/// Replace the request's query string with `pairs`, re-encoded.
pub(crate) fn replace_query(req: &mut Request<Body>, pairs: &[(String, String)]) -> Result<(), Error> {
    let query = form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish();

    let path = req.uri().path();
    let path_and_query = if query.is_empty() {
        path.to_string()
    } else {
        format!("{path}?{query}")
    };

    let mut parts = req.uri().clone().into_parts();
    parts.path_and_query = Some(
        path_and_query
            .parse()
            .map_err(|_| Error::bad_request("malformed query string"))?,
    );
    *req.uri_mut() = Uri::from_parts(parts).map_err(|_| Error::bad_request("malformed query string"))?;

    Ok(())
}
