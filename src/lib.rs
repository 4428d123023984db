/// Runtime parameters, read from flags or the environment.
pub mod config;

/// The HTTP surface: error classification, the request pipeline and the resource routers.
pub mod http;

/// Persistence: the document store and the per-resource schemas.
pub mod models;
