use super::Stage;
use crate::http::error::Error;
use async_trait::async_trait;
use axum::body::Body;
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{HeaderMap, Request, StatusCode};
use hyper::body::HttpBody;
use serde_json::Value;

/// The parsed JSON body of a request, stashed in its extensions by [`BodyParser`].
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedBody(pub Value);

/// Buffers and parses JSON request bodies.
///
/// Anything that isn't JSON (multipart uploads in particular) is left alone for the handler.
/// The raw bytes are put back on the request after parsing.
pub struct BodyParser {
    limit: usize,
}

impl BodyParser {
    pub fn new(limit: usize) -> Self {
        Self { limit }
    }

    fn too_large() -> Error {
        Error::status(StatusCode::PAYLOAD_TOO_LARGE, "request entity too large")
    }
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|mime| {
            let mime = mime.trim();
            mime.eq_ignore_ascii_case("application/json") || mime.ends_with("+json")
        })
        .unwrap_or(false)
}

fn declared_length(headers: &HeaderMap) -> Option<usize> {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

/// Read `body` to the end, giving up as soon as it grows past `limit` bytes.
///
/// A chunked body has no declared length, so this is the only check it gets.
async fn read_at_most(body: &mut Body, limit: usize) -> Result<Vec<u8>, Error> {
    let mut buf = Vec::new();

    while let Some(chunk) = body.data().await {
        let chunk =
            chunk.map_err(|e| Error::bad_request(format!("failed to read request body: {e}")))?;

        if buf.len() + chunk.len() > limit {
            return Err(BodyParser::too_large());
        }
        buf.extend_from_slice(&chunk);
    }

    Ok(buf)
}

#[async_trait]
impl Stage for BodyParser {
    async fn before(&self, req: &mut Request<Body>) -> Result<(), Error> {
        if !is_json(req.headers()) {
            return Ok(());
        }

        if declared_length(req.headers()).map_or(false, |len| len > self.limit) {
            return Err(Self::too_large());
        }

        let bytes = read_at_most(req.body_mut(), self.limit).await?;

        let value = if bytes.iter().all(u8::is_ascii_whitespace) {
            Value::Object(Default::default())
        } else {
            serde_json::from_slice(&bytes).map_err(|e| Error::bad_request(e.to_string()))?
        };

        *req.body_mut() = Body::from(bytes);
        req.extensions_mut().insert(ParsedBody(value));

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn json_request(body: &'static str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/")
            .header(CONTENT_TYPE, "application/json; charset=utf-8")
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn parses_json() {
        let mut req = json_request(r#"{"name": "Devworks Bootcamp"}"#);
        BodyParser::new(1024).before(&mut req).await.unwrap();

        assert_eq!(
            req.extensions().get::<ParsedBody>(),
            Some(&ParsedBody(json!({ "name": "Devworks Bootcamp" })))
        );

        // the raw body is still there for anyone who wants it
        let raw = hyper::body::to_bytes(req.into_body()).await.unwrap();
        assert_eq!(&raw[..], br#"{"name": "Devworks Bootcamp"}"#);
    }

    #[tokio::test]
    async fn empty_body_is_an_empty_object() {
        let mut req = json_request("");
        BodyParser::new(1024).before(&mut req).await.unwrap();
        assert_eq!(
            req.extensions().get::<ParsedBody>(),
            Some(&ParsedBody(json!({})))
        );
    }

    #[tokio::test]
    async fn malformed_json_is_a_bad_request() {
        let mut req = json_request(r#"{"name": "#);
        let err = BodyParser::new(1024).before(&mut req).await.unwrap_err();
        assert_eq!(err.normalize().status_code, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        let mut req = json_request(r#"{"text": "0123456789"}"#);
        let err = BodyParser::new(8).before(&mut req).await.unwrap_err();
        assert_eq!(err.normalize().status_code, StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn chunked_body_stops_at_the_limit() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        // An endless chunked body with no `Content-Length`.
        let chunks_read = Arc::new(AtomicUsize::new(0));
        let counter = chunks_read.clone();
        let stream = futures::stream::repeat_with(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, std::io::Error>(vec![b' '; 512])
        });

        let mut req = Request::builder()
            .method("POST")
            .uri("/")
            .header(CONTENT_TYPE, "application/json")
            .body(Body::wrap_stream(stream))
            .unwrap();

        let err = BodyParser::new(1024).before(&mut req).await.unwrap_err();
        assert_eq!(err.normalize().status_code, StatusCode::PAYLOAD_TOO_LARGE);
        assert!(chunks_read.load(Ordering::SeqCst) <= 4);
    }

    #[tokio::test]
    async fn other_content_types_are_untouched() {
        let mut req = Request::builder()
            .method("POST")
            .uri("/")
            .header(CONTENT_TYPE, "text/plain")
            .body(Body::from("{not json"))
            .unwrap();
        BodyParser::new(1024).before(&mut req).await.unwrap();
        assert!(req.extensions().get::<ParsedBody>().is_none());
    }
}
