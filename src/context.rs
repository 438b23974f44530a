use std::sync::Arc;

use crate::config::Config;
use sigmap_storage::Store;

/// Shared application state handed to every handler. The store is the
/// only mutable resource; everything else is read-only configuration.
#[derive(Clone)]
pub struct AppContext {
    pub store: Arc<dyn Store>,
    pub config: Arc<Config>,
}

impl AppContext {
    pub fn new(store: Arc<dyn Store>, config: Arc<Config>) -> Self {
        Self { store, config }
    }
}
