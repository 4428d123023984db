use crate::config::Config;
use crate::http::error::Error;
use crate::http::extractor::{AuthUser, JsonBody, TOKEN_COOKIE};
use crate::http::resources::{method_not_allowed, not_found, prepare_fields, DataBody};
use crate::http::{ApiContext, Result};
use crate::models::document::Document;
use crate::models::resource::{Mode, ResourceKind};
use crate::models::user::{verify_password, LoginUser};
use axum::extract::State;
use axum::http::header::SET_COOKIE;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Map, Value};

pub(crate) fn router() -> Router<ApiContext> {
    Router::new()
        .route("/register", post(register).fallback(method_not_allowed))
        .route("/login", post(login).fallback(method_not_allowed))
        .route("/me", get(get_me).fallback(method_not_allowed))
        .route("/logout", get(logout).fallback(method_not_allowed))
}

#[derive(serde::Serialize)]
struct TokenBody {
    success: bool,
    token: String,
}

/// The token goes out twice: in the body for API clients and as an `HttpOnly` cookie for browsers.
fn token_response(config: &Config, status: StatusCode, auth_user: AuthUser) -> Response {
    let token = auth_user.to_jwt(config);

    let mut cookie = format!(
        "{}={}; Max-Age={}; Path=/; HttpOnly",
        TOKEN_COOKIE,
        token,
        config.jwt_expire_days * 24 * 60 * 60
    );
    if config.is_production() {
        cookie.push_str("; Secure");
    }

    let mut response = (
        status,
        Json(TokenBody {
            success: true,
            token,
        }),
    )
        .into_response();

    // A JWT is base64url and dots, always a valid header value.
    if let Ok(value) = HeaderValue::from_str(&cookie) {
        response.headers_mut().insert(SET_COOKIE, value);
    }

    response
}

async fn register(
    ctx: State<ApiContext>,
    JsonBody(mut fields): JsonBody<Map<String, Value>>,
) -> Result<Response> {
    prepare_fields(ResourceKind::User, &mut fields, Mode::Create).await?;

    // Everybody who doesn't ask to be a publisher is a plain user.
    fields
        .entry("role")
        .or_insert_with(|| Value::String("user".to_string()));

    let user = ctx
        .store
        .resource()
        .create(ResourceKind::User, fields)
        .await?;

    log::info!("registered user {}", user.id);

    Ok(token_response(
        &ctx.config,
        StatusCode::OK,
        AuthUser { user_id: user.id },
    ))
}

async fn login(ctx: State<ApiContext>, JsonBody(req): JsonBody<LoginUser>) -> Result<Response> {
    let (email, password) = match (req.email, req.password) {
        (Some(email), Some(password)) if !email.is_empty() && !password.is_empty() => {
            (email, password)
        }
        _ => return Err(Error::bad_request("Please provide an email and password")),
    };

    let user = ctx
        .store
        .resource()
        .find_by_field(ResourceKind::User, "email", &email)
        .await?
        .ok_or_else(|| Error::unauthorized("Invalid credentials"))?;

    let password_hash = user
        .field_str("password")
        .ok_or_else(|| Error::unauthorized("Invalid credentials"))?
        .to_string();

    verify_password(password, password_hash).await?;

    Ok(token_response(
        &ctx.config,
        StatusCode::OK,
        AuthUser { user_id: user.id },
    ))
}

async fn get_me(auth_user: AuthUser, ctx: State<ApiContext>) -> Result<Json<DataBody<Document>>> {
    let user = ctx
        .store
        .resource()
        .get(ResourceKind::User, auth_user.user_id)
        .await?
        .ok_or_else(|| not_found(ResourceKind::User, auth_user.user_id))?;

    Ok(Json(DataBody::new(user.public(ResourceKind::User))))
}

async fn logout() -> Response {
    // Overwrite the cookie with one that expires almost immediately.
    let cookie = format!("{}=none; Max-Age=10; Path=/; HttpOnly", TOKEN_COOKIE);

    let mut response = Json(DataBody::new(Map::new())).into_response();
    if let Ok(value) = HeaderValue::from_str(&cookie) {
        response.headers_mut().insert(SET_COOKIE, value);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::pipeline::{Pipeline, RateLimiter};
    use crate::http::server::api_router;
    use crate::http::types::Timestamptz;
    use crate::models::document::MockResourceCtrlTrait;
    use crate::models::user::hash_password;
    use crate::models::MockStoreTrait;
    use axum::body::Body;
    use axum::http::{self, Request};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use time::OffsetDateTime;
    use tower::ServiceExt;
    use uuid::Uuid;

    fn app(mock_store: MockStoreTrait) -> Router {
        let config = Config {
            hmac_key: "Yabba Dabba Doo!".to_string(),
            ..Default::default()
        };
        let limiter = Arc::new(RateLimiter::new(100, Duration::from_secs(600)));
        let pipeline = Pipeline::standard(&config, limiter);
        api_router(
            ApiContext {
                store: Arc::new(mock_store),
                config: Arc::new(config),
            },
            pipeline,
        )
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(http::Method::POST)
            .uri(uri)
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_of(response: Response) -> Value {
        let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn login_needs_both_fields() {
        let response = app(MockStoreTrait::new())
            .oneshot(post_json(
                "/api/v1/auth/login",
                json!({ "email": "john@gmail.com" }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            json_of(response).await,
            json!({ "success": false, "error": "Please provide an email and password" })
        );
    }

    #[tokio::test]
    async fn login_sets_the_token_cookie() {
        let hash = hash_password("123456".to_string()).await.unwrap();
        let user_id = Uuid::new_v4();

        let mut mock_store = MockStoreTrait::new();
        mock_store.expect_resource().returning(move || {
            let hash = hash.clone();
            let mut ctrl = MockResourceCtrlTrait::new();
            ctrl.expect_find_by_field()
                .withf(|kind, field, value| {
                    *kind == ResourceKind::User && field == "email" && value == "john@gmail.com"
                })
                .return_once(move |_, _, _| {
                    let mut fields = Map::new();
                    fields.insert("email".into(), "john@gmail.com".into());
                    fields.insert("password".into(), hash.into());
                    Ok(Some(Document {
                        id: user_id,
                        fields,
                        created_at: Timestamptz(OffsetDateTime::UNIX_EPOCH),
                    }))
                });
            Arc::new(ctrl)
        });

        let response = app(mock_store)
            .oneshot(post_json(
                "/api/v1/auth/login",
                json!({ "email": "john@gmail.com", "password": "123456" }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let cookie = response.headers()[SET_COOKIE].to_str().unwrap().to_string();
        assert!(cookie.starts_with("token="));
        assert!(cookie.contains("HttpOnly"));
        assert!(!cookie.contains("Secure"));

        let json = json_of(response).await;
        assert_eq!(json["success"], true);
        assert!(cookie.contains(json["token"].as_str().unwrap()));
    }

    #[tokio::test]
    async fn unknown_email_is_invalid_credentials() {
        let mut mock_store = MockStoreTrait::new();
        mock_store.expect_resource().returning(|| {
            let mut ctrl = MockResourceCtrlTrait::new();
            ctrl.expect_find_by_field()
                .return_once(|_, _, _| Ok(None));
            Arc::new(ctrl)
        });

        let response = app(mock_store)
            .oneshot(post_json(
                "/api/v1/auth/login",
                json!({ "email": "nobody@gmail.com", "password": "123456" }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_of(response).await["error"], "Invalid credentials");
    }

    #[tokio::test]
    async fn me_without_a_token_is_unauthorized() {
        let response = app(MockStoreTrait::new())
            .oneshot(
                Request::builder()
                    .uri("/api/v1/auth/me")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            json_of(response).await["error"],
            "Not authorized to access this route"
        );
    }

    #[tokio::test]
    async fn register_reports_a_taken_email() {
        let mut mock_store = MockStoreTrait::new();
        mock_store.expect_resource().returning(|| {
            let mut ctrl = MockResourceCtrlTrait::new();
            ctrl.expect_create()
                .withf(|_, fields| {
                    fields["role"] == "user"
                        && fields["password"].as_str().map_or(false, |p| p.starts_with("$argon2"))
                })
                .return_once(|_, _| {
                    Err(Error::DuplicateKey {
                        field: "email".to_string(),
                    })
                });
            Arc::new(ctrl)
        });

        let response = app(mock_store)
            .oneshot(post_json(
                "/api/v1/auth/register",
                json!({ "name": "John Doe", "email": "john@gmail.com", "password": "123456" }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            json_of(response).await["error"],
            "Duplicate email value entered"
        );
    }

    #[tokio::test]
    async fn register_hands_out_a_token() {
        let user_id = Uuid::new_v4();
        let mut mock_store = MockStoreTrait::new();
        mock_store.expect_resource().returning(move || {
            let mut ctrl = MockResourceCtrlTrait::new();
            ctrl.expect_create()
                .withf(|kind, fields| *kind == ResourceKind::User && fields["name"] == "John Doe")
                .return_once(move |_, fields| {
                    Ok(Document {
                        id: user_id,
                        fields,
                        created_at: Timestamptz(OffsetDateTime::UNIX_EPOCH),
                    })
                });
            Arc::new(ctrl)
        });

        let response = app(mock_store)
            .oneshot(post_json(
                "/api/v1/auth/register",
                json!({ "name": "John Doe", "email": "john@gmail.com", "password": "123456" }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let cookie = response.headers()[SET_COOKIE].to_str().unwrap().to_string();
        assert!(cookie.starts_with("token="));
        assert!(cookie.contains(&format!("Max-Age={}", 30 * 24 * 60 * 60)));

        let json = json_of(response).await;
        assert_eq!(json["success"], true);
        let token = json["token"].as_str().unwrap();
        assert!(!token.is_empty());
        assert!(cookie.contains(token));
    }

    #[tokio::test]
    async fn wrong_method_is_a_json_405() {
        let response = app(MockStoreTrait::new())
            .oneshot(
                Request::builder()
                    .uri("/api/v1/auth/login")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(
            json_of(response).await,
            json!({ "success": false, "error": "Method not allowed" })
        );
    }

    #[tokio::test]
    async fn logout_expires_the_cookie() {
        let response = app(MockStoreTrait::new())
            .oneshot(
                Request::builder()
                    .uri("/api/v1/auth/logout")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[SET_COOKIE],
            "token=none; Max-Age=10; Path=/; HttpOnly"
        );
    }
}
