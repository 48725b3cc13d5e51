//! Shared application state threaded through services and consumers.

use std::sync::Arc;

use manman_core::bus::Broker;
use manman_core::catalog::CatalogStore;

use crate::config::ServerConfig;
use crate::object_store::ObjectStore;

#[derive(Clone)]
pub struct AppState {
    pub catalog: CatalogStore,
    pub broker: Arc<Broker>,
    pub objects: ObjectStore,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(
        catalog: CatalogStore,
        broker: Arc<Broker>,
        objects: ObjectStore,
        config: ServerConfig,
    ) -> Self {
        Self {
            catalog,
            broker,
            objects,
            config: Arc::new(config),
        }
    }
}
