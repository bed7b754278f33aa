use crate::model::{CommitContext, Entity, EntityCollection, EntityKey, EntitySet, Value};
use crate::store::CommitStore;
use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Persistence collaborator keeping committed rows in memory.
///
/// Applies optimistic locking to versioned classes and answers each commit
/// with fresh detached instances, the way a remote data store would.
#[derive(Debug, Default)]
pub struct InMemoryCommitStore {
    rows: Arc<RwLock<HashMap<EntityKey, Entity>>>,
}

impl InMemoryCommitStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored row for the identity, as a detached copy
    pub async fn get(&self, entity_name: &str, id: &str) -> Option<Entity> {
        let rows = self.rows.read().await;
        rows.get(&EntityKey::new(entity_name, id)).map(detached_copy)
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }
}

#[async_trait::async_trait]
impl CommitStore for InMemoryCommitStore {
    async fn commit(&self, context: CommitContext) -> Result<EntitySet> {
        let mut rows = self.rows.write().await;

        // Check every version before writing anything
        for entity in &context.commit_instances {
            if entity.is_new() || !entity.meta_class().versioned {
                continue;
            }
            if let Some(stored) = rows.get(&entity.key()) {
                if stored.version() != entity.version() {
                    return Err(anyhow!(
                        "optimistic lock failed for {}: stored version {:?}, committed version {:?}",
                        entity.key(),
                        stored.version(),
                        entity.version()
                    ));
                }
            }
        }

        let mut committed = EntitySet::new();
        for entity in &context.commit_instances {
            let row = detached_copy(entity);
            if entity.meta_class().versioned {
                let next = if entity.is_new() {
                    1
                } else {
                    entity.version().unwrap_or(0) + 1
                };
                row.set_version(Some(next));
            }
            rows.insert(row.key(), row.clone());
            committed.insert(detached_copy(&row));
        }
        for entity in &context.remove_instances {
            rows.remove(&entity.key());
        }

        log::debug!(
            "in-memory store committed {} and removed {} instances",
            context.commit_instances.len(),
            context.remove_instances.len()
        );
        Ok(committed)
    }
}

/// Shallow detached copy: references keep pointing at the original
/// instances, collections are rebuilt.
fn detached_copy(entity: &Entity) -> Entity {
    let state = entity.read_state();
    let copy = Entity::build(
        entity.meta_class().clone(),
        entity.id().clone(),
        false,
        state.version,
    );
    {
        let mut target = copy.write_state();
        for (name, value) in &state.values {
            let value = match value {
                Value::Collection(collection) => {
                    Value::Collection(EntityCollection::new(collection.kind(), collection.items()))
                }
                other => other.clone(),
            };
            target.values.insert(name.clone(), value);
        }
        target.unloaded = state.unloaded.clone();
    }
    copy
}
