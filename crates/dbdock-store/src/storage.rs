use std::sync::Arc;

use async_trait::async_trait;
use dbdock_common::ManagedInstance;
use tokio::sync::RwLock;

use crate::Result;

/// Where the configured instance set lives between runs.
#[async_trait]
pub trait InstanceStore: Send + Sync {
    async fn load(&self) -> Result<Vec<ManagedInstance>>;
    async fn save(&self, instances: &[ManagedInstance]) -> Result<()>;
}

// In-memory storage implementation for development/testing
#[derive(Clone)]
pub struct InMemoryStore {
    instances: Arc<RwLock<Vec<ManagedInstance>>>,
}

impl InMemoryStore {
    pub fn new(instances: Vec<ManagedInstance>) -> Self {
        Self {
            instances: Arc::new(RwLock::new(instances)),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new(ManagedInstance::default_set())
    }
}

#[async_trait]
impl InstanceStore for InMemoryStore {
    async fn load(&self) -> Result<Vec<ManagedInstance>> {
        Ok(self.instances.read().await.clone())
    }

    async fn save(&self, instances: &[ManagedInstance]) -> Result<()> {
        *self.instances.write().await = instances.to_vec();
        Ok(())
    }
}
