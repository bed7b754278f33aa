use crate::model::Entity;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionKind {
    /// Ordered sequence, duplicates allowed
    List,
    /// Unordered set, one element per identity
    Set,
}

impl CollectionKind {
    pub fn name(&self) -> &'static str {
        match self {
            CollectionKind::List => "list",
            CollectionKind::Set => "set",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionChangeType {
    Add,
    Remove,
}

/// Callback invoked after a structural change of an observed collection
pub type CollectionListener = Arc<dyn Fn(CollectionChangeType, &[Entity]) + Send + Sync>;

/// Elements of a multi-valued property plus an optional change callback
pub struct ObservableCollection {
    kind: CollectionKind,
    items: Vec<Entity>,
    listener: Option<CollectionListener>,
}

/// Shared handle to the collection stored in a multi-valued property.
///
/// Element membership is by identity (see `Entity`'s `PartialEq`).
#[derive(Clone)]
pub struct EntityCollection(Arc<Mutex<ObservableCollection>>);

impl EntityCollection {
    pub fn new(kind: CollectionKind, items: impl IntoIterator<Item = Entity>) -> Self {
        let mut collected: Vec<Entity> = Vec::new();
        for item in items {
            if kind == CollectionKind::Set && collected.contains(&item) {
                continue;
            }
            collected.push(item);
        }
        EntityCollection(Arc::new(Mutex::new(ObservableCollection {
            kind,
            items: collected,
            listener: None,
        })))
    }

    pub fn list(items: impl IntoIterator<Item = Entity>) -> Self {
        Self::new(CollectionKind::List, items)
    }

    pub fn set(items: impl IntoIterator<Item = Entity>) -> Self {
        Self::new(CollectionKind::Set, items)
    }

    pub fn kind(&self) -> CollectionKind {
        self.0.lock().kind
    }

    pub fn len(&self) -> usize {
        self.0.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.lock().items.is_empty()
    }

    pub fn contains(&self, entity: &Entity) -> bool {
        self.0.lock().items.contains(entity)
    }

    /// Snapshot of the elements in order
    pub fn items(&self) -> Vec<Entity> {
        self.0.lock().items.clone()
    }

    pub fn get(&self, index: usize) -> Option<Entity> {
        self.0.lock().items.get(index).cloned()
    }

    /// Whether a change callback is attached
    pub fn is_observable(&self) -> bool {
        self.0.lock().listener.is_some()
    }

    /// Append an element. Sets ignore an element already present.
    pub fn add(&self, entity: Entity) -> bool {
        let listener = {
            let mut inner = self.0.lock();
            if inner.kind == CollectionKind::Set && inner.items.contains(&entity) {
                return false;
            }
            inner.items.push(entity.clone());
            inner.listener.clone()
        };
        if let Some(listener) = listener {
            listener(CollectionChangeType::Add, std::slice::from_ref(&entity));
        }
        true
    }

    /// Remove the first element with the identity of `entity`
    pub fn remove(&self, entity: &Entity) -> bool {
        let (removed, listener) = {
            let mut inner = self.0.lock();
            let removed = remove_item(&mut inner.items, entity);
            (removed, inner.listener.clone())
        };
        match (removed, listener) {
            (Some(removed), Some(listener)) => {
                listener(CollectionChangeType::Remove, std::slice::from_ref(&removed));
                true
            }
            (Some(_), None) => true,
            (None, _) => false,
        }
    }

    pub(crate) fn remove_silently(&self, entity: &Entity) -> bool {
        remove_item(&mut self.0.lock().items, entity).is_some()
    }

    /// Replace the element at `index` with `entity`, without notification
    pub(crate) fn replace_silently(&self, index: usize, entity: Entity) {
        if let Some(slot) = self.0.lock().items.get_mut(index) {
            *slot = entity;
        }
    }

    pub(crate) fn observe(&self, listener: CollectionListener) {
        self.0.lock().listener = Some(listener);
    }

    pub fn ptr_eq(&self, other: &EntityCollection) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }

    pub(crate) fn strong_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    /// Build the collection a destination property receives when `source` is
    /// copied over it: the source's kind, with the destination's elements first
    /// followed by source elements not already present.
    pub(crate) fn reconcile(
        source: &EntityCollection,
        destination: Option<&EntityCollection>,
    ) -> EntityCollection {
        let kind = source.kind();
        let source_items = source.items();
        match destination {
            None => EntityCollection::new(kind, source_items),
            Some(destination) => {
                let mut items = destination.items();
                for item in source_items {
                    if !items.contains(&item) {
                        items.push(item);
                    }
                }
                EntityCollection::new(kind, items)
            }
        }
    }
}

fn remove_item(items: &mut Vec<Entity>, entity: &Entity) -> Option<Entity> {
    let position = items.iter().position(|item| item == entity)?;
    Some(items.remove(position))
}

impl fmt::Debug for EntityCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.0.lock();
        let label = match inner.kind {
            CollectionKind::List => "List",
            CollectionKind::Set => "Set",
        };
        write!(f, "{}", label)?;
        f.debug_list()
            .entries(inner.items.iter().map(|item| item.key().to_string()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MetaClass;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn tag(id: &str) -> Entity {
        Entity::detached(Arc::new(MetaClass::new("Tag")), id, None)
    }

    #[test]
    fn set_rejects_duplicate_identity() {
        let set = EntityCollection::set(vec![tag("a"), tag("a"), tag("b")]);
        assert_eq!(set.len(), 2);
        assert!(!set.add(tag("b")));
        assert!(set.add(tag("c")));

        let list = EntityCollection::list(vec![tag("a"), tag("a")]);
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn listener_fires_on_structural_change_only() {
        let calls = Arc::new(AtomicUsize::new(0));
        let list = EntityCollection::list(vec![tag("a")]);
        let counter = calls.clone();
        list.observe(Arc::new(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        list.add(tag("b"));
        list.remove(&tag("a"));
        assert!(!list.remove(&tag("zzz")));
        list.remove_silently(&tag("b"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(list.is_empty());
    }

    #[test]
    fn reconcile_unions_and_keeps_destination_order() {
        let a = tag("a");
        let b = tag("b");
        let c = tag("c");
        let destination = EntityCollection::list(vec![a.clone(), b.clone()]);
        let source = EntityCollection::list(vec![tag("b"), c.clone()]);

        let merged = EntityCollection::reconcile(&source, Some(&destination));
        let items = merged.items();
        assert_eq!(items, vec![a, b.clone(), c]);
        assert!(items[1].ptr_eq(&b));
        assert!(!merged.ptr_eq(&destination));
        assert!(!merged.is_observable());
    }

    #[test]
    fn reconcile_takes_source_kind() {
        let source = EntityCollection::set(vec![tag("a")]);
        let merged = EntityCollection::reconcile(&source, None);
        assert_eq!(merged.kind(), CollectionKind::Set);
        assert_eq!(merged.items(), vec![tag("a")]);
    }
}
