use super::{query_pairs, replace_query, ParsedBody, Stage};
use crate::http::error::Error;
use async_trait::async_trait;
use axum::body::Body;
use axum::http::Request;
use serde_json::Value;

/// Scrubs the parsed body and the query string:
///
/// * keys that start with `$` or contain `.` are dropped, so clients can't smuggle query
///   operators into a lookup
/// * `<` and `>` in string values are HTML-escaped
pub struct Sanitize;

#[async_trait]
impl Stage for Sanitize {
    async fn before(&self, req: &mut Request<Body>) -> Result<(), Error> {
        if let Some(ParsedBody(body)) = req.extensions_mut().get_mut::<ParsedBody>() {
            sanitize_value(body);
        }

        let pairs = query_pairs(req.uri());
        let cleaned: Vec<(String, String)> = pairs
            .iter()
            .filter(|(key, _)| !is_unsafe_query_key(key))
            .map(|(key, value)| (escape_html(key), escape_html(value)))
            .collect();

        if cleaned != pairs {
            replace_query(req, &cleaned)?;
        }

        Ok(())
    }
}

fn is_unsafe_key(key: &str) -> bool {
    key.starts_with('$') || key.contains('.')
}

/// Query keys may be nested with brackets, e.g. `averageCost[$lte]`; check every segment.
fn is_unsafe_query_key(key: &str) -> bool {
    key.split(|c| c == '[' || c == ']')
        .filter(|segment| !segment.is_empty())
        .any(is_unsafe_key)
}

fn escape_html(s: &str) -> String {
    s.replace('<', "&lt;").replace('>', "&gt;")
}

pub(crate) fn sanitize_value(value: &mut Value) {
    match value {
        Value::String(s) => {
            if s.contains(['<', '>']) {
                *s = escape_html(s);
            }
        }
        Value::Array(items) => items.iter_mut().for_each(sanitize_value),
        Value::Object(map) => {
            map.retain(|key, _| !is_unsafe_key(key));
            map.values_mut().for_each(sanitize_value);
        }
        _ => {}
    }
}
