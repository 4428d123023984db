use crate::config::Config;
use crate::http::error::Error;
use crate::http::pipeline::{Cookies, ParsedBody};
use crate::http::ApiContext;
use async_trait::async_trait;
use axum::extract::{FromRef, FromRequestParts};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use jwt::{SignWithKey, VerifyWithKey};
use serde::de::DeserializeOwned;
use sha2::Sha384;
use time::OffsetDateTime;
use uuid::Uuid;

const SCHEME_PREFIX: &str = "Bearer ";

/// Name of the cookie the login token is also sent in.
pub const TOKEN_COOKIE: &str = "token";

pub(crate) const NOT_AUTHORIZED: &str = "Not authorized to access this route";

/// Add this as a parameter to a handler function to require the user to be logged in.
///
/// Parses a JWT from the `Authorization: Bearer <token>` header, falling back to the `token`
/// cookie.
pub struct AuthUser {
    pub user_id: Uuid,
}

/// Add this as a parameter to a handler function to optionally check if the user is logged in.
///
/// If a token is present it must be valid, otherwise the request is rejected; we don't want to
/// silently serve an anonymous view to somebody whose session just expired.
pub struct MaybeAuthUser(pub Option<AuthUser>);

#[derive(serde::Serialize, serde::Deserialize)]
struct AuthUserClaims {
    user_id: Uuid,
    /// Standard JWT `exp` claim.
    exp: i64,
}

impl AuthUser {
    pub(in crate::http) fn to_jwt(&self, config: &Config) -> String {
        let hmac = Hmac::<Sha384>::new_from_slice(config.hmac_key.as_bytes())
            .expect("HMAC-SHA-384 can accept any key length");

        AuthUserClaims {
            user_id: self.user_id,
            exp: (OffsetDateTime::now_utc() + time::Duration::days(config.jwt_expire_days))
                .unix_timestamp(),
        }
        .sign_with_key(&hmac)
        .expect("HMAC signing should be infallible")
    }

    /// Attempt to parse `Self` from a token string.
    fn from_token(config: &Config, token: &str) -> Result<Self, Error> {
        let hmac = Hmac::<Sha384>::new_from_slice(config.hmac_key.as_bytes())
            .expect("HMAC-SHA-384 can accept any key length");

        // `VerifyWithKey` checks the signature and the algorithm named in the header
        // before handing back the claims.
        let claims: AuthUserClaims = token.verify_with_key(&hmac).map_err(|e| {
            log::debug!("JWT failed to verify: {}", e);
            Error::unauthorized(NOT_AUTHORIZED)
        })?;

        // Because JWTs are stateless, we don't really have any mechanism here to invalidate them
        // besides expiration. You probably want to add more checks, like ensuring the user ID
        // exists and has not been deleted/banned/deactivated.
        if claims.exp < OffsetDateTime::now_utc().unix_timestamp() {
            log::debug!("token expired");
            return Err(Error::unauthorized(NOT_AUTHORIZED));
        }

        Ok(Self {
            user_id: claims.user_id,
        })
    }
}

/// The token from the `Authorization` header or, failing that, the session cookie.
fn find_token<'a>(headers: &'a HeaderMap, cookies: Option<&'a Cookies>) -> Option<&'a str> {
    let from_header = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix(SCHEME_PREFIX));

    from_header.or_else(|| cookies.and_then(|c| c.get(TOKEN_COOKIE)))
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    ApiContext: FromRef<S>,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let ctx = ApiContext::from_ref(state);
        let token = find_token(&parts.headers, parts.extensions.get::<Cookies>())
            .ok_or_else(|| Error::unauthorized(NOT_AUTHORIZED))?;

        Self::from_token(&ctx.config, token)
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for MaybeAuthUser
where
    S: Send + Sync,
    ApiContext: FromRef<S>,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let ctx = ApiContext::from_ref(state);
        let token = find_token(&parts.headers, parts.extensions.get::<Cookies>());

        Ok(Self(
            token
                .map(|token| AuthUser::from_token(&ctx.config, token))
                .transpose()?,
        ))
    }
}

/// The request body as left behind by the body parser and sanitizer stages, deserialized to `T`.
///
/// A request without a JSON body deserializes from `{}`.
pub struct JsonBody<T>(pub T);

#[async_trait]
impl<S, T> FromRequestParts<S> for JsonBody<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .extensions
            .remove::<ParsedBody>()
            .map(|ParsedBody(value)| value)
            .unwrap_or_else(|| serde_json::Value::Object(Default::default()));

        serde_json::from_value(value)
            .map(JsonBody)
            .map_err(|e| Error::bad_request(format!("invalid request body: {e}")))
    }
}
