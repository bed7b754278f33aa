use super::DataContext;
use crate::error::Result;
use crate::model::{
    CommitContext, CommitDecision, Entity, EntitySet, PostCommitEvent, PreCommitEvent,
};
use itertools::Itertools;
use log::{debug, info};

/// Result of [`DataContext::commit`]
#[derive(Debug, Clone)]
pub enum CommitOutcome {
    /// Changes were written; holds the authoritative committed instances
    Committed(EntitySet),
    /// A pre-commit subscriber cancelled the commit; nothing changed
    Prevented,
}

impl CommitOutcome {
    pub fn is_prevented(&self) -> bool {
        matches!(self, CommitOutcome::Prevented)
    }

    pub fn committed(&self) -> Option<&EntitySet> {
        match self {
            CommitOutcome::Committed(committed) => Some(committed),
            CommitOutcome::Prevented => None,
        }
    }
}

impl DataContext {
    /// Commit pending changes.
    ///
    /// A root context hands them to its commit delegate or store; a nested
    /// context merges them into its parent. Committed instances still
    /// managed here are merged back before the pending sets are cleared.
    /// A persistence error leaves the pending sets untouched.
    pub async fn commit(&self) -> Result<CommitOutcome> {
        let event = {
            let state = self.inner.state.lock();
            PreCommitEvent {
                modified: state.tracker.modified(),
                removed: state.tracker.removed(),
            }
        };
        if self.inner.events.publish_pre_commit(&event) == CommitDecision::Prevent {
            info!("commit prevented by a pre-commit listener");
            return Ok(CommitOutcome::Prevented);
        }

        let committed = self.perform_commit().await?;

        self.inner.events.publish_post_commit(&PostCommitEvent {
            committed: committed.clone(),
        });

        self.merge_committed(&committed)?;

        self.inner.state.lock().tracker.clear();

        info!("committed {} instances", committed.len());
        if self.inner.config.commit.dump_content {
            debug!("content after commit:\n{}", self.print_content());
        }
        Ok(CommitOutcome::Committed(committed))
    }

    async fn perform_commit(&self) -> Result<EntitySet> {
        let (modified, removed, parent, delegate) = {
            let state = self.inner.state.lock();
            if !state.tracker.has_changes() {
                return Ok(EntitySet::new());
            }
            (
                state.tracker.modified(),
                state.tracker.removed(),
                state.parent.clone(),
                state.commit_delegate.clone(),
            )
        };

        match parent {
            Some(parent) => self.commit_to_parent(&parent, &modified, &removed),
            None => {
                let context = CommitContext::new(
                    self.filter_committed(modified),
                    self.filter_committed(removed),
                );
                let store = delegate.unwrap_or_else(|| self.inner.store.clone());
                debug!(
                    "committing {} modified and {} removed instances",
                    context.commit_instances.len(),
                    context.remove_instances.len()
                );
                Ok(store.commit(context).await?)
            }
        }
    }

    /// Embeddable instances are persisted as part of their owner
    fn filter_committed(&self, instances: Vec<Entity>) -> Vec<Entity> {
        instances
            .into_iter()
            .filter(|entity| !self.inner.metadata.is_embeddable(entity.entity_name()))
            .collect()
    }

    fn commit_to_parent(
        &self,
        parent: &DataContext,
        modified: &[Entity],
        removed: &[Entity],
    ) -> Result<EntitySet> {
        let mut committed = EntitySet::new();
        for entity in modified {
            let merged = parent.merge_with(entity, false)?;
            parent.mark_modified_silently(&merged);
            committed.insert(merged);
        }
        for entity in removed {
            parent.remove(entity);
        }
        Ok(committed)
    }

    fn merge_committed(&self, committed: &EntitySet) -> Result<()> {
        let to_merge: Vec<Entity> = {
            let state = self.inner.state.lock();
            committed
                .iter()
                .filter(|entity| state.content.contains(entity))
                .cloned()
                .sorted_by_key(|entity| entity.key())
                .collect()
        };
        if !to_merge.is_empty() {
            self.merge_all(&to_merge, false)?;
        }
        Ok(())
    }
}
