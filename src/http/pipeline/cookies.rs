use super::Stage;
use crate::http::error::Error;
use async_trait::async_trait;
use axum::body::Body;
use axum::http::header::COOKIE;
use axum::http::Request;
use std::collections::HashMap;

/// Cookies sent with the request, by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cookies(HashMap<String, String>);

impl Cookies {
    /// Parse the values of one or more `Cookie` headers. The first occurrence of a name wins.
    pub fn parse<'a>(headers: impl IntoIterator<Item = &'a str>) -> Self {
        let mut cookies = HashMap::new();

        for pair in headers.into_iter().flat_map(|h| h.split(';')) {
            let Some((name, value)) = pair.split_once('=') else {
                continue;
            };
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            let value = value.trim();
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .unwrap_or(value);

            cookies
                .entry(name.to_string())
                .or_insert_with(|| value.to_string());
        }

        Self(cookies)
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }
}

/// Parses the `Cookie` header into a [`Cookies`] request extension.
pub struct CookieParser;

#[async_trait]
impl Stage for CookieParser {
    async fn before(&self, req: &mut Request<Body>) -> Result<(), Error> {
        let cookies = Cookies::parse(
            req.headers()
                .get_all(COOKIE)
                .iter()
                .filter_map(|v| v.to_str().ok()),
        );
        req.extensions_mut().insert(cookies);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pairs() {
        let cookies = Cookies::parse(["token=abc.def.ghi; theme=\"dark\"", "token=later; junk"]);
        assert_eq!(cookies.get("token"), Some("abc.def.ghi"));
        assert_eq!(cookies.get("theme"), Some("dark"));
        assert_eq!(cookies.get("junk"), None);
    }

    #[tokio::test]
    async fn stage_always_inserts_extension() {
        let mut req = Request::builder().uri("/").body(Body::empty()).unwrap();
        CookieParser.before(&mut req).await.unwrap();
        assert_eq!(req.extensions().get::<Cookies>(), Some(&Cookies::default()));
    }
}
