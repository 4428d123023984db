use super::{query_pairs, replace_query, Stage};
use crate::http::error::Error;
use async_trait::async_trait;
use axum::body::Body;
use axum::http::Request;

/// Guards against HTTP parameter pollution: a query key given more than once keeps only its
/// last value, at the position of its first occurrence.
pub struct ParamPollution;

#[async_trait]
impl Stage for ParamPollution {
    async fn before(&self, req: &mut Request<Body>) -> Result<(), Error> {
        let pairs = query_pairs(req.uri());
        let deduped = last_value_wins(&pairs);

        if deduped.len() != pairs.len() {
            replace_query(req, &deduped)?;
        }

        Ok(())
    }
}

fn last_value_wins(pairs: &[(String, String)]) -> Vec<(String, String)> {
    let mut deduped: Vec<(String, String)> = Vec::with_capacity(pairs.len());
    for (key, value) in pairs {
        match deduped.iter_mut().find(|(k, _)| k == key) {
            Some((_, existing)) => *existing = value.clone(),
            None => deduped.push((key.clone(), value.clone())),
        }
    }
    deduped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn repeated_keys_collapse_to_last_value() {
        let mut req = Request::builder()
            .uri("/api/v1/bootcamps?sort=name&page=2&sort=-createdAt")
            .body(Body::empty())
            .unwrap();

        ParamPollution.before(&mut req).await.unwrap();

        assert_eq!(req.uri(), "/api/v1/bootcamps?sort=-createdAt&page=2");
    }

    #[tokio::test]
    async fn unique_keys_are_untouched() {
        let mut req = Request::builder()
            .uri("/api/v1/reviews?limit=5")
            .body(Body::empty())
            .unwrap();

        ParamPollution.before(&mut req).await.unwrap();

        assert_eq!(req.uri(), "/api/v1/reviews?limit=5");
    }
}
