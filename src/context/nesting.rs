use super::DataContext;
use crate::error::{DataContextError, Result};
use crate::logic::GraphCopier;
use crate::store::CommitStore;
use log::debug;
use std::sync::Arc;

impl DataContext {
    /// Create a context nested in `parent`, sharing its metadata, store and
    /// configuration and starting with a copy of its content
    pub fn child_of(parent: &DataContext) -> Result<DataContext> {
        let child = DataContext::with_config(
            parent.inner.metadata.clone(),
            parent.inner.store.clone(),
            parent.inner.config.clone(),
        );
        child.set_parent(parent)?;
        Ok(child)
    }

    pub fn parent(&self) -> Option<DataContext> {
        self.inner.state.lock().parent.clone()
    }

    /// Nest this context in `parent`.
    ///
    /// The parent's whole graph is copied and merged here, so edits in this
    /// context never touch the parent's instances until it commits. The
    /// parent can be set only once.
    pub fn set_parent(&self, parent: &DataContext) -> Result<()> {
        if self.ptr_eq(parent) {
            return Err(DataContextError::InvalidParent(
                "a context cannot be its own parent".to_string(),
            ));
        }
        if self.inner.state.lock().parent.is_some() {
            return Err(DataContextError::ParentAlreadySet);
        }
        let mut ancestor = parent.parent();
        while let Some(context) = ancestor {
            if self.ptr_eq(&context) {
                return Err(DataContextError::InvalidParent(
                    "the parent is nested in this context".to_string(),
                ));
            }
            ancestor = context.parent();
        }

        let instances = parent.get_all();
        let mut copier = GraphCopier::new(self.inner.metadata.as_ref());
        let copies = instances
            .iter()
            .map(|entity| copier.copy(entity))
            .collect::<Result<Vec<_>>>()?;

        self.inner.state.lock().parent = Some(parent.clone());
        debug!("copying {} instances from the parent context", copies.len());
        self.merge_all(&copies, true)?;
        Ok(())
    }

    pub fn commit_delegate(&self) -> Option<Arc<dyn CommitStore>> {
        self.inner.state.lock().commit_delegate.clone()
    }

    /// Replace the store of a root context for subsequent commits
    pub fn set_commit_delegate(&self, delegate: Option<Arc<dyn CommitStore>>) {
        self.inner.state.lock().commit_delegate = delegate;
    }
}
