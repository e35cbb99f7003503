//! dmareg daemon state

use std::sync::Arc;

use crate::config::DmaregConfig;
use crate::registry::Registry;

/// Daemon state shared by all connections
pub struct DaemonState {
    pub registry: Arc<Registry>,
    pub config: DmaregConfig,
}

impl DaemonState {
    pub fn new(config: DmaregConfig) -> Self {
        Self {
            registry: Arc::new(Registry::with_limits(config.registry.limits())),
            config,
        }
    }
}
