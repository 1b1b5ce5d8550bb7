//! Engine network lifecycle
//!
//! Staging and app containers share one internal bridge network. Containers
//! that need internet egress are additionally connected to the engine's
//! default `bridge` network.

use crate::engine::ContainerEngine;
use crate::error::{StagehandError, StagehandResult};
use std::sync::Arc;
use tracing::{debug, info};

/// Network shared by every container this backend creates
pub const INTERNAL_NETWORK: &str = "stagehand-internal";

/// Engine network that provides internet egress
pub const EGRESS_NETWORK: &str = "bridge";

/// Driver of the internal network
pub const INTERNAL_DRIVER: &str = "bridge";

/// Idempotent create/connect/delete by network name
#[derive(Clone)]
pub struct NetworkManager {
    engine: Arc<dyn ContainerEngine>,
}

impl NetworkManager {
    pub fn new(engine: Arc<dyn ContainerEngine>) -> Self {
        Self { engine }
    }

    async fn resolve(&self, name: &str) -> StagehandResult<Option<String>> {
        Ok(self
            .engine
            .list_networks()
            .await?
            .into_iter()
            .find(|n| n.name == name)
            .map(|n| n.id))
    }

    /// Create the network unless one with this name already exists
    pub async fn create(&self, name: &str, driver: &str, internal: bool) -> StagehandResult<()> {
        if let Some(id) = self.resolve(name).await? {
            debug!("Network {} already exists ({})", name, id);
            return Ok(());
        }

        let id = self.engine.create_network(name, driver, internal).await?;
        info!("Created network {} ({})", name, id);
        Ok(())
    }

    /// Attach a container; the network must already exist
    pub async fn connect(&self, container_id: &str, name: &str) -> StagehandResult<()> {
        let id = self
            .resolve(name)
            .await?
            .ok_or_else(|| StagehandError::NetworkNotFound(name.to_string()))?;

        debug!("Connecting {} to network {}", container_id, name);
        self.engine.connect_network(&id, container_id).await
    }

    /// Remove the network; absent or still-attached networks are left alone
    pub async fn delete(&self, name: &str) -> StagehandResult<()> {
        let Some(id) = self.resolve(name).await? else {
            debug!("Network {} does not exist", name);
            return Ok(());
        };

        match self.engine.remove_network(&id).await {
            Ok(()) => {
                info!("Removed network {}", name);
                Ok(())
            }
            Err(e) if e.is_benign() => {
                debug!("Keeping network {}: {}", name, e);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
