use sqlx::PgPool;
use std::sync::Arc;

#[cfg(test)]
use mockall::automock;

pub mod document;
pub mod resource;
pub mod user;

use document::{DocumentController, DynResourceCtrl};

pub type DynStore = Arc<dyn StoreTrait + Send + Sync>;

/// Entry point to persistence for the handlers. A trait so tests can swap in mocks.
#[cfg_attr(test, automock)]
pub trait StoreTrait {
    fn resource(&self) -> DynResourceCtrl;
}

#[derive(Clone)]
pub struct Store {
    resource: DocumentController,
}

impl Store {
    pub fn new(pool: PgPool) -> Self {
        Self {
            resource: DocumentController::new(pool),
        }
    }
}

impl StoreTrait for Store {
    fn resource(&self) -> DynResourceCtrl {
        Arc::new(self.resource.clone())
    }
}
