use crate::model::{CommitContext, EntitySet};
use anyhow::Result;

/// Persistence collaborator used by a root context on commit
#[async_trait::async_trait]
pub trait CommitStore: Send + Sync {
    /// Persist the batch and return the authoritative committed instances
    async fn commit(&self, context: CommitContext) -> Result<EntitySet>;
}
