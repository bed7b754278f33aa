use crate::context::ContextState;
use crate::error::Result;
use crate::model::{
    CollectionListener, Entity, EntityCollection, Metadata, PropertyChangeListener, Value,
};
use log::debug;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

/// One merge call into a context.
///
/// Carries the set of instances already merged during the call, which breaks
/// cycles and lets cross-references inside one batch resolve to a single
/// canonical instance. All writes made by the session are silent: no
/// property change listener runs while state is copied.
pub(crate) struct MergeSession<'a> {
    state: &'a mut ContextState,
    /// Incoming instances seen in this call, keyed by address
    merged: HashMap<usize, Entity>,
    /// Instances newly added to the modified set; published once the lock is released
    changed: Vec<Entity>,
}

impl<'a> MergeSession<'a> {
    pub fn new(state: &'a mut ContextState) -> Self {
        Self {
            state,
            merged: HashMap::new(),
            changed: Vec::new(),
        }
    }

    /// Merge `entity` and, when `deep`, everything reachable from it.
    /// Returns the canonical instance.
    pub fn merge(&mut self, entity: &Entity, deep: bool) -> Entity {
        let managed = self.internal_merge(entity);
        if deep {
            let mut roots = vec![entity.clone()];
            if !managed.ptr_eq(entity) {
                roots.push(managed.clone());
            }
            self.traverse(roots);
        }
        managed
    }

    /// Entities that entered the modified set during the session
    pub fn finish(self) -> Vec<Entity> {
        self.changed
    }

    fn internal_merge(&mut self, entity: &Entity) -> Entity {
        let managed = self.state.content.find(entity.entity_name(), entity.id());

        if self.merged.contains_key(&entity.addr()) {
            match managed {
                Some(managed) => return managed,
                None => {
                    // Reached again through a cycle before it was registered
                    debug!(
                        "instance {:?} was merged but has no managed instance yet",
                        entity
                    );
                    return entity.clone();
                }
            }
        }
        self.merged.insert(entity.addr(), entity.clone());

        match managed {
            Some(managed) => {
                if !managed.ptr_eq(entity) {
                    if accepts_state(entity, &managed) {
                        self.copy_state(entity, &managed);
                    }
                    self.copy_references(entity, &managed);
                }
                managed
            }
            None => {
                self.merge_references(entity);
                self.state.content.insert(entity.clone());
                entity.add_listener(self.state.listener.clone());
                if entity.is_new() && self.state.tracker.mark_modified(entity) {
                    self.changed.push(entity.clone());
                }
                entity.clone()
            }
        }
    }

    /// Copy scalar and collection state of `src` into the canonical `dst`
    fn copy_state(&mut self, src: &Entity, dst: &Entity) {
        let src_new = src.is_new();
        let dst_new = dst.is_new();

        for property in &src.meta_class().properties {
            let name = property.name.as_str();
            if property.is_single_reference()
                || property.read_only
                || !(src_new || src.is_loaded(name))
                || !(dst_new || dst.is_loaded(name))
            {
                continue;
            }
            let value = src.get(name);
            if src_new && value.is_null() {
                continue;
            }

            if property.is_many() {
                if let Value::Collection(source) = &value {
                    let copy = EntityCollection::reconcile(source, dst.collection(name).as_ref());
                    self.resolve_items(&copy);
                    copy.observe(collection_listener(&self.state.listener, dst, name));
                    dst.set_silently(name, Value::Collection(copy));
                }
                continue;
            }

            dst.set_silently(name, value);
        }

        let (is_new, version) = {
            let state = src.read_state();
            (state.is_new, state.version)
        };
        let mut state = dst.write_state();
        state.is_new = is_new;
        state.version = version;
    }

    /// Swap elements that already have a canonical instance for that instance
    fn resolve_items(&self, collection: &EntityCollection) {
        for (index, item) in collection.items().into_iter().enumerate() {
            if let Some(managed) = self.state.content.find(item.entity_name(), item.id()) {
                if !managed.ptr_eq(&item) {
                    collection.replace_silently(index, managed);
                }
            }
        }
    }

    fn copy_references(&mut self, src: &Entity, dst: &Entity) {
        let src_new = src.is_new();
        for property in &src.meta_class().properties {
            let name = property.name.as_str();
            if !property.is_single_reference()
                || property.read_only
                || !(src_new || src.is_loaded(name))
                || !dst.is_loaded(name)
            {
                continue;
            }
            match src.get(name) {
                Value::Reference(src_ref) => {
                    let dst_ref = self.internal_merge(&src_ref);
                    dst.set_silently(name, Value::Reference(dst_ref.clone()));
                    if property.embedded {
                        self.register_embedded(&dst_ref, dst, name);
                    }
                }
                _ if !src_new => dst.set_silently(name, Value::Null),
                _ => {}
            }
        }
    }

    /// Replace the loaded single references of a not yet managed instance
    /// with their canonical instances
    fn merge_references(&mut self, entity: &Entity) {
        for property in &entity.meta_class().properties {
            let name = property.name.as_str();
            if !property.is_single_reference() || property.read_only || !entity.is_loaded(name) {
                continue;
            }
            if let Some(reference) = entity.reference(name) {
                let managed = self.internal_merge(&reference);
                entity.set_silently(name, Value::Reference(managed.clone()));
                if property.embedded {
                    self.register_embedded(&managed, entity, name);
                }
            }
        }
    }

    fn register_embedded(&mut self, embedded: &Entity, owner: &Entity, property: &str) {
        self.state.embedded.register(embedded, owner, property);
        embedded.add_listener(self.state.listener.clone());
    }

    /// Walk every loaded reference and collection reachable from `roots`,
    /// merging each element and re-pointing the owner at the canonical
    /// instance. Collections of canonical owners become observable.
    fn traverse(&mut self, roots: Vec<Entity>) {
        let mut visited: HashMap<usize, Entity> = HashMap::new();
        let mut pending = roots;

        while let Some(entity) = pending.pop() {
            if visited.contains_key(&entity.addr()) {
                continue;
            }
            visited.insert(entity.addr(), entity.clone());
            let canonical = self.state.content.is_canonical(&entity);

            for property in &entity.meta_class().properties {
                let name = property.name.as_str();
                if !property.is_class() || property.read_only || !entity.is_loaded(name) {
                    continue;
                }
                match entity.get(name) {
                    Value::Reference(reference) => {
                        let managed = self.internal_merge(&reference);
                        if !managed.ptr_eq(&reference) {
                            entity.set_silently(name, Value::Reference(managed.clone()));
                        }
                        pending.push(managed);
                    }
                    Value::Collection(collection) => {
                        for (index, item) in collection.items().into_iter().enumerate() {
                            let managed = self.internal_merge(&item);
                            if !managed.ptr_eq(&item) {
                                collection.replace_silently(index, managed.clone());
                            }
                            pending.push(managed);
                        }
                        if canonical && !collection.is_observable() {
                            collection
                                .observe(collection_listener(&self.state.listener, &entity, name));
                        }
                    }
                    _ => {}
                }
            }
        }
    }
}

/// Whether scalar and collection state may be copied from `src` into the
/// canonical `dst`. Single references are copied regardless.
///
/// A new source never overwrites a persisted destination, and between two
/// persisted instances the older version loses.
fn accepts_state(src: &Entity, dst: &Entity) -> bool {
    let src_new = src.is_new();
    let dst_new = dst.is_new();
    if src_new && !dst_new {
        return false;
    }
    if !src_new && !dst_new && src.meta_class().versioned {
        let src_version = src.version().unwrap_or(0);
        let dst_version = dst.version().unwrap_or(0);
        if src_version < dst_version {
            debug!(
                "skipping stale state of {:?}: version {} is older than {}",
                src, src_version, dst_version
            );
            return false;
        }
    }
    true
}

/// Callback binding a collection to its owner: a structural change is
/// reported as a change of the owning property
pub(crate) fn collection_listener(
    listener: &Weak<dyn PropertyChangeListener>,
    owner: &Entity,
    property: &str,
) -> CollectionListener {
    let listener = listener.clone();
    let owner = owner.downgrade();
    let property = property.to_string();
    Arc::new(move |_, _| {
        if let (Some(listener), Some(owner)) = (listener.upgrade(), owner.upgrade()) {
            listener.property_changed(&owner, &property);
        }
    })
}

/// Check that every class reachable from `roots` is known to `metadata`,
/// before a merge touches any state
pub(crate) fn check_graph(roots: &[Entity], metadata: &dyn Metadata) -> Result<()> {
    let mut visited: HashSet<usize> = HashSet::new();
    let mut pending: Vec<Entity> = roots.to_vec();

    while let Some(entity) = pending.pop() {
        if !visited.insert(entity.addr()) {
            continue;
        }
        metadata.class(entity.entity_name())?;
        let state = entity.read_state();
        for value in state.values.values() {
            match value {
                Value::Reference(reference) => pending.push(reference.clone()),
                Value::Collection(collection) => pending.extend(collection.items()),
                _ => {}
            }
        }
    }
    Ok(())
}
