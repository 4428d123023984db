use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::rejection::PathRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use itertools::Itertools;

/// Postgres SQLSTATE for `unique_violation`.
const UNIQUE_VIOLATION: &str = "23505";

/// A common error type that can be used throughout the API.
///
/// Can be returned in a `Result` from an API handler function or a pipeline stage.
///
/// Every variant is rendered through [`Error::normalize`], so clients always get the same
/// `{ "success": false, "error": ... }` envelope regardless of where the failure came from.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A value that cannot be interpreted as a resource id, e.g. a malformed UUID in the path.
    #[error("cannot interpret {value:?} as a resource id")]
    Cast { value: String },

    /// A write collided with a unique index on `field`.
    #[error("duplicate value for unique field `{field}`")]
    DuplicateKey { field: String },

    /// One message per failing field, in schema order.
    #[error("validation failed: {}", .messages.iter().join("; "))]
    Validation { messages: Vec<String> },

    /// A failure that already knows what the client should see. Either part may be missing,
    /// in which case the classifier falls back to `500` / `"Server Error"`.
    #[error("{}", .message.as_deref().unwrap_or("unclassified failure"))]
    Status {
        status: Option<StatusCode>,
        message: Option<String>,
    },

    /// Automatically return `500 Internal Server Error` on a `sqlx::Error`.
    ///
    /// Via the generated `From<sqlx::Error> for Error` impl,
    /// this allows using `?` on database calls in handler functions without a manual mapping step.
    ///
    /// The actual error message isn't returned to the client for security reasons.
    /// It should be logged instead.
    #[error("an error occurred with the database")]
    Sqlx(#[from] sqlx::Error),

    /// Return `500 Internal Server Error` on a `anyhow::Error`.
    ///
    /// `anyhow::Error` is used in a few places to capture context and backtraces
    /// on unrecoverable (but technically non-fatal) errors which could be highly useful for
    /// debugging. We use it a lot in our code for background tasks or making API calls
    /// to external services so we can use `.context()` to refine the logged error.
    #[error("an internal server error occurred")]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    pub fn status(status: StatusCode, message: impl Into<String>) -> Self {
        Self::Status {
            status: Some(status),
            message: Some(message.into()),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::status(StatusCode::NOT_FOUND, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::status(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::status(StatusCode::UNAUTHORIZED, message)
    }

    pub fn method_not_allowed() -> Self {
        Self::status(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed")
    }

    /// Convenient constructor for `Error::Validation`.
    ///
    /// ```rust,ignore
    /// Error::validation(["Please add a name", "Please add an address"])
    /// ```
    pub fn validation<M>(messages: impl IntoIterator<Item = M>) -> Self
    where
        M: Into<String>,
    {
        Self::Validation {
            messages: messages.into_iter().map(Into::into).collect(),
        }
    }

    /// Map this failure onto what the client gets to see.
    ///
    /// Pure: the same failure always normalizes to the same output.
    pub fn normalize(&self) -> NormalizedError {
        match self {
            Self::Cast { .. } => NormalizedError::new(StatusCode::NOT_FOUND, "Resource not found"),
            Self::DuplicateKey { field } => NormalizedError::new(
                StatusCode::BAD_REQUEST,
                format!("Duplicate {field} value entered"),
            ),
            Self::Validation { messages } => NormalizedError {
                message: ErrorMessage::Many(messages.clone()),
                status_code: StatusCode::BAD_REQUEST,
            },
            Self::Status { status, message } => {
                let fallback = NormalizedError::default();
                NormalizedError {
                    // An empty message is as good as none.
                    message: message
                        .as_deref()
                        .filter(|m| !m.is_empty())
                        .map(|m| ErrorMessage::One(m.to_string()))
                        .unwrap_or(fallback.message),
                    status_code: status.unwrap_or(fallback.status_code),
                }
            }
            Self::Sqlx(_) | Self::Anyhow(_) => NormalizedError::default(),
        }
    }
}

/// The message half of a [`NormalizedError`]. Serializes as either a string or an array.
#[derive(serde::Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum ErrorMessage {
    One(String),
    Many(Vec<String>),
}

/// The classifier's uniform output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedError {
    pub message: ErrorMessage,
    pub status_code: StatusCode,
}

impl NormalizedError {
    pub fn new(status_code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            message: ErrorMessage::One(message.into()),
            status_code,
        }
    }
}

impl Default for NormalizedError {
    fn default() -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Server Error")
    }
}

#[derive(serde::Serialize)]
struct ErrorBody<'a> {
    success: bool,
    error: &'a ErrorMessage,
}

impl IntoResponse for NormalizedError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            success: false,
            error: &self.message,
        };
        (self.status_code, Json(body)).into_response()
    }
}

/// Axum allows you to return `Result` from handler functions, but the error type
/// also must be some sort of response type.
///
/// This is the only place a failure turns into a response, so it is also where every failure
/// gets logged, before it is classified.
impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match &self {
            Self::Sqlx(e) => log::error!("SQLx error: {:?}", e),
            Self::Anyhow(e) => log::error!("Generic error: {:?}", e),
            other => log::error!("{:?}", other),
        }

        self.normalize().into_response()
    }
}

impl From<MultipartRejection> for Error {
    fn from(rejection: MultipartRejection) -> Self {
        Self::Status {
            status: Some(rejection.status()),
            message: Some(rejection.body_text()),
        }
    }
}

impl From<PathRejection> for Error {
    fn from(rejection: PathRejection) -> Self {
        Self::Status {
            status: Some(rejection.status()),
            message: Some(rejection.body_text()),
        }
    }
}

impl From<MultipartError> for Error {
    fn from(e: MultipartError) -> Self {
        Self::bad_request(e.to_string())
    }
}

/// A little helper trait for more easily converting database constraint errors into API errors.
///
/// ```rust,ignore
/// let document = sqlx::query_as::<_, DocumentFromQuery>(
///     "insert into document (kind, body) values ($1, $2) returning id, body, created_at",
/// )
///     .bind(kind.as_str())
///     .bind(Json(&fields))
///     .fetch_one(&self.pool)
///     .await
///     .on_duplicate_key()?;
/// ```
pub trait ResultExt<T> {
    /// Turn a unique violation on an index named `<kind>_<field>_key` into
    /// `Error::DuplicateKey { field }`.
    ///
    /// A violation whose index doesn't follow that convention stays a database error,
    /// and is reported as a plain `500`.
    fn on_duplicate_key(self) -> Result<T, Error>;
}

impl<T, E> ResultExt<T> for Result<T, E>
where
    E: Into<Error>,
{
    fn on_duplicate_key(self) -> Result<T, Error> {
        self.map_err(|e| match e.into() {
            Error::Sqlx(sqlx::Error::Database(dbe))
                if dbe.code().as_deref() == Some(UNIQUE_VIOLATION) =>
            {
                let field = dbe.constraint().and_then(unique_field).map(str::to_owned);
                match field {
                    Some(field) => Error::DuplicateKey { field },
                    None => Error::Sqlx(sqlx::Error::Database(dbe)),
                }
            }
            e => e,
        })
    }
}

/// `bootcamp_name_key` -> `name`
fn unique_field(constraint: &str) -> Option<&str> {
    let (_kind, field) = constraint.strip_suffix("_key")?.split_once('_')?;
    (!field.is_empty()).then_some(field)
}
