use crate::config::Config;
use crate::models::DynStore;
use std::sync::Arc;

/// State shared by every handler.
#[derive(Clone)]
pub struct ApiContext {
    pub config: Arc<Config>,
    pub store: DynStore,
}
