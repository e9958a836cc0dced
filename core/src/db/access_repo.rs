use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use crate::access::{AccessList, AccessTarget};

#[async_trait]
pub trait AccessRepository: Send + Sync {
    /// Every persisted grant of the target, ordered by id.
    async fn load_access(&self, target: AccessTarget) -> Result<AccessList>;
}

pub type AccessRepositoryRef = Arc<dyn AccessRepository>;
