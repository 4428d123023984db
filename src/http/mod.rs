/// The error type every handler and pipeline stage returns, and the classifier that turns it
/// into the `{ "success": false, "error": ... }` envelope.
mod error;

/// Contains definitions for application-specific parameters to handler functions,
/// such as `AuthUser` which looks for a token in the `Authorization: Bearer <token>` header or
/// the `token` cookie, verifies it as a JWT and checks the signature,
/// then deserializes the information it contains.
pub mod extractor;

/// A catch-all module for other common types in the API.
pub mod types;

/// The stages every request passes through before it reaches a router.
pub mod pipeline;

// Modules introducing API routes. `resources` serves bootcamps, courses, reviews and users
// with one set of handlers; `auth` is everything to do with logging in.
//
// See `server::api_router()` for where they are mounted.
mod auth;
mod resources;

pub mod server;
pub use server::serve;

pub mod api_context;
pub use api_context::ApiContext;

pub use error::{Error, ErrorMessage, NormalizedError, ResultExt};

pub type Result<T, E = Error> = std::result::Result<T, E>;
