//! Unit of work over an identity-mapped entity graph.

mod commit;
mod nesting;

pub use commit::CommitOutcome;

use crate::config::DataContextConfig;
use crate::error::Result;
use crate::logic::merge::{check_graph, MergeSession};
use crate::logic::release::release_unreachable;
use crate::model::{
    ChangeEvent, CommitDecision, Entity, EntitySet, EventHub, Id, Metadata, PostCommitEvent,
    PreCommitEvent, PropertyChangeListener, Subscription, Value,
};
use crate::store::{ChangeTracker, CommitStore, EmbeddedOwners, IdentityMap};
use log::debug;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Weak};

/// Mutable state of one context, guarded by the context's lock
pub(crate) struct ContextState {
    pub content: IdentityMap,
    pub tracker: ChangeTracker,
    pub embedded: EmbeddedOwners,
    /// The owning context, as registered on managed instances
    pub listener: Weak<dyn PropertyChangeListener>,
    pub parent: Option<DataContext>,
    pub commit_delegate: Option<Arc<dyn CommitStore>>,
}

impl ContextState {
    fn new(listener: Weak<dyn PropertyChangeListener>) -> Self {
        Self {
            content: IdentityMap::new(),
            tracker: ChangeTracker::new(),
            embedded: EmbeddedOwners::default(),
            listener,
            parent: None,
            commit_delegate: None,
        }
    }

    /// Stop tracking `entity` and the embedded objects it owns
    fn detach(&mut self, entity: &Entity) {
        entity.remove_listener(&self.listener);
        for embedded in self.embedded.release_owner(entity) {
            if !self.content.is_canonical(&embedded) {
                embedded.remove_listener(&self.listener);
            }
        }
    }

    /// Stop managing every instance and hand back the handles the state held
    fn drain(&mut self) -> Vec<Entity> {
        let mut held = self.content.drain();
        held.extend(self.tracker.drain());
        held.extend(self.embedded.drain());
        for entity in &held {
            entity.remove_listener(&self.listener);
        }
        held
    }

    /// Remove `removed` from every loaded collection that may hold it.
    /// Returns the owners whose collection changed.
    fn remove_from_collections(&mut self, removed: &Entity) -> Vec<Entity> {
        let mut owners = Vec::new();
        for owner in self.content.all() {
            let class = owner.meta_class().clone();
            for property in &class.properties {
                if !property.is_many()
                    || property.target_entity() != Some(removed.entity_name())
                    || !owner.is_loaded(&property.name)
                {
                    continue;
                }
                if let Some(collection) = owner.collection(&property.name) {
                    if collection.remove_silently(removed) && self.tracker.mark_modified(&owner) {
                        owners.push(owner.clone());
                    }
                }
            }
        }
        owners
    }
}

pub(crate) struct ContextInner {
    metadata: Arc<dyn Metadata>,
    store: Arc<dyn CommitStore>,
    config: DataContextConfig,
    state: Mutex<ContextState>,
    events: EventHub,
}

impl ContextInner {
    fn publish_changes(&self, entities: Vec<Entity>) {
        for entity in entities {
            self.events.publish_change(&ChangeEvent { entity });
        }
    }
}

impl Drop for ContextInner {
    fn drop(&mut self) {
        let held = self.state.get_mut().drain();
        let released = release_unreachable(held);
        if released > 0 {
            debug!("released {} unreachable instances", released);
        }
    }
}

impl PropertyChangeListener for ContextInner {
    fn property_changed(&self, entity: &Entity, property: &str) {
        let changed: Vec<Entity> = {
            let mut state = self.state.lock();
            let mut targets = Vec::new();
            if state.content.is_canonical(entity) {
                targets.push(entity.clone());
            }
            for owner in state.embedded.owners_of(entity) {
                if state.content.is_canonical(&owner) {
                    targets.push(owner);
                }
            }
            targets
                .into_iter()
                .filter(|target| state.tracker.mark_modified(target))
                .collect()
        };
        if !changed.is_empty() {
            debug!("{:?}.{} changed", entity, property);
        }
        self.publish_changes(changed);
    }
}

/// Client-side unit of work.
///
/// Holds one canonical instance per identity, tracks pending upserts and
/// deletes, and commits them to a [`CommitStore`] or to a parent context.
/// Cloning yields another handle to the same context.
#[derive(Clone)]
pub struct DataContext {
    inner: Arc<ContextInner>,
}

impl DataContext {
    pub fn new(metadata: Arc<dyn Metadata>, store: Arc<dyn CommitStore>) -> Self {
        Self::with_config(metadata, store, DataContextConfig::default())
    }

    pub fn with_config(
        metadata: Arc<dyn Metadata>,
        store: Arc<dyn CommitStore>,
        config: DataContextConfig,
    ) -> Self {
        let inner = Arc::new_cyclic(|weak: &Weak<ContextInner>| {
            let listener: Weak<dyn PropertyChangeListener> = weak.clone();
            ContextInner {
                metadata,
                store,
                config,
                state: Mutex::new(ContextState::new(listener)),
                events: EventHub::new(),
            }
        });
        Self { inner }
    }

    pub fn metadata(&self) -> &Arc<dyn Metadata> {
        &self.inner.metadata
    }

    pub fn config(&self) -> &DataContextConfig {
        &self.inner.config
    }

    /// Canonical instance for the identity, if present
    pub fn find(&self, entity_name: &str, id: &str) -> Option<Entity> {
        self.inner.state.lock().content.find(entity_name, id)
    }

    /// Whether an instance with the identity of `entity` is managed here
    pub fn contains(&self, entity: &Entity) -> bool {
        self.inner.state.lock().content.contains(entity)
    }

    /// All canonical instances, ordered by class name then id
    pub fn get_all(&self) -> Vec<Entity> {
        self.inner.state.lock().content.all()
    }

    /// Merge with the configured default depth
    pub fn merge(&self, entity: &Entity) -> Result<Entity> {
        self.merge_with(entity, self.inner.config.merge.deep_by_default)
    }

    /// Merge `entity` into the context and return its canonical instance.
    ///
    /// A shallow merge resolves only single references; a deep merge also
    /// walks collections and nested references.
    pub fn merge_with(&self, entity: &Entity, deep: bool) -> Result<Entity> {
        check_graph(std::slice::from_ref(entity), self.inner.metadata.as_ref())?;
        let (managed, changed) = {
            let mut state = self.inner.state.lock();
            let mut session = MergeSession::new(&mut state);
            let managed = session.merge(entity, deep);
            (managed, session.finish())
        };
        self.inner.publish_changes(changed);
        Ok(managed)
    }

    /// Merge a batch in one session, so references between its members
    /// resolve to one canonical instance each
    pub fn merge_all(&self, entities: &[Entity], deep: bool) -> Result<EntitySet> {
        check_graph(entities, self.inner.metadata.as_ref())?;
        let (merged, changed) = {
            let mut state = self.inner.state.lock();
            let mut session = MergeSession::new(&mut state);
            let merged: EntitySet = entities
                .iter()
                .map(|entity| session.merge(entity, deep))
                .collect();
            (merged, session.finish())
        };
        self.inner.publish_changes(changed);
        Ok(merged)
    }

    /// Instantiate a new entity of the named class and merge it
    pub fn create(&self, entity_name: &str) -> Result<Entity> {
        let class = self.inner.metadata.class(entity_name)?;
        self.merge_with(&Entity::new(class), false)
    }

    /// Schedule the instance for deletion.
    ///
    /// Returns false when no instance with its identity is managed here.
    pub fn remove(&self, entity: &Entity) -> bool {
        let changed = {
            let mut state = self.inner.state.lock();
            let Some(managed) = state.content.find_key(&entity.key()) else {
                return false;
            };
            state.tracker.mark_removed(&managed);
            state.content.remove(&managed.key());
            state.detach(&managed);
            let mut changed = vec![managed.clone()];
            changed.extend(state.remove_from_collections(&managed));
            changed
        };
        self.inner.publish_changes(changed);
        true
    }

    /// Forget the instance without scheduling a deletion
    pub fn evict(&self, entity: &Entity) -> bool {
        let mut state = self.inner.state.lock();
        let key = entity.key();
        state.tracker.forget(&key);
        let managed = state.content.remove(&key);
        match managed {
            Some(managed) => {
                state.detach(&managed);
                true
            }
            None => false,
        }
    }

    /// Evict every instance and drop all pending changes.
    ///
    /// Instances still reachable from a handle held outside the context
    /// keep their values; references among the rest are released so
    /// cyclic graphs can be freed.
    pub fn clear(&self) {
        let held = self.inner.state.lock().drain();
        let released = release_unreachable(held);
        debug!("context cleared, {} instances released", released);
    }

    pub fn has_changes(&self) -> bool {
        self.inner.state.lock().tracker.has_changes()
    }

    pub fn is_modified(&self, entity: &Entity) -> bool {
        self.inner.state.lock().tracker.is_modified(entity)
    }

    pub fn is_removed(&self, entity: &Entity) -> bool {
        self.inner.state.lock().tracker.is_removed(entity)
    }

    /// Instances with a pending upsert, ordered by key
    pub fn modified(&self) -> Vec<Entity> {
        self.inner.state.lock().tracker.modified()
    }

    /// Instances with a pending delete, ordered by key
    pub fn removed(&self) -> Vec<Entity> {
        self.inner.state.lock().tracker.removed()
    }

    pub fn add_change_listener(
        &self,
        listener: impl Fn(&ChangeEvent) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.events.subscribe_change(listener)
    }

    /// Subscribers run in registration order; the first to answer
    /// [`CommitDecision::Prevent`] cancels the commit
    pub fn add_pre_commit_listener(
        &self,
        listener: impl Fn(&PreCommitEvent) -> CommitDecision + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.events.subscribe_pre_commit(listener)
    }

    pub fn add_post_commit_listener(
        &self,
        listener: impl Fn(&PostCommitEvent) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.events.subscribe_post_commit(listener)
    }

    /// Record a pending upsert without publishing a change event
    pub(crate) fn mark_modified_silently(&self, entity: &Entity) {
        self.inner.state.lock().tracker.mark_modified(entity);
    }

    pub(crate) fn ptr_eq(&self, other: &DataContext) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Render the content as an indented tree, one section per class
    pub fn print_content(&self) -> String {
        let entities = self.get_all();
        let mut out = String::new();
        let mut current_class: Option<String> = None;
        for entity in entities {
            if current_class.as_deref() != Some(entity.entity_name()) {
                out.push_str(&format!("=== {} ===\n", entity.entity_name()));
                current_class = Some(entity.entity_name().to_string());
            }
            print_entity(&mut out, &entity, 1, &mut HashSet::new());
        }
        out
    }
}

fn print_entity(out: &mut String, entity: &Entity, level: usize, visited: &mut HashSet<Id>) {
    let pad = "  ".repeat(level);
    let key = entity.key().to_string();
    if !visited.insert(key) {
        out.push_str(&format!("{}{:?} ...\n", pad, entity));
        return;
    }
    out.push_str(&format!("{}{:?}\n", pad, entity));

    for property in entity.meta_class().properties.iter().filter(|p| p.is_class()) {
        if !entity.is_loaded(&property.name) {
            continue;
        }
        match entity.get(&property.name) {
            Value::Reference(reference) => {
                out.push_str(&format!("{}  {}:\n", pad, property.name));
                print_entity(out, &reference, level + 2, visited);
            }
            Value::Collection(collection) => {
                out.push_str(&format!("{}  {}: [\n", pad, property.name));
                for item in collection.items() {
                    print_entity(out, &item, level + 2, visited);
                }
                out.push_str(&format!("{}  ]\n", pad));
            }
            _ => {}
        }
    }
}

impl fmt::Debug for DataContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("DataContext")
            .field("instances", &state.content.len())
            .field("modified", &state.tracker.modified().len())
            .field("removed", &state.tracker.removed().len())
            .field("nested", &state.parent.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DataType, EntityCollection, MetaClass, MetaProperty, MetadataRegistry};
    use crate::store::InMemoryCommitStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn context() -> DataContext {
        let metadata = MetadataRegistry::new()
            .with_class(
                MetaClass::new("Customer")
                    .with_property(MetaProperty::scalar("name", DataType::String))
                    .with_property(MetaProperty::embedded("address", "Address"))
                    .with_property(MetaProperty::list("orders", "Order")),
            )
            .with_class(
                MetaClass::new("Order")
                    .with_property(MetaProperty::scalar("number", DataType::String))
                    .with_property(MetaProperty::reference("customer", "Customer")),
            )
            .with_class(
                MetaClass::new("Address")
                    .embeddable()
                    .with_property(MetaProperty::scalar("city", DataType::String)),
            );
        DataContext::new(Arc::new(metadata), Arc::new(InMemoryCommitStore::new()))
    }

    fn detached(context: &DataContext, name: &str, id: &str) -> Entity {
        Entity::detached(context.metadata().class(name).unwrap(), id, None)
    }

    #[test]
    fn edits_of_managed_instances_are_tracked() {
        let context = context();
        let events = Arc::new(AtomicUsize::new(0));
        let counter = events.clone();
        context.add_change_listener(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let customer = context.merge(&detached(&context, "Customer", "c1")).unwrap();
        assert!(!context.has_changes());

        customer.set("name", "Ann").unwrap();
        customer.set("name", "Bob").unwrap();
        assert!(context.is_modified(&customer));
        assert_eq!(events.load(Ordering::SeqCst), 2);

        let stray = detached(&context, "Customer", "c2");
        stray.set("name", "not managed").unwrap();
        assert!(!context.is_modified(&stray));
    }

    #[test]
    fn collection_changes_dirty_the_owner() {
        let context = context();
        let customer = detached(&context, "Customer", "c1");
        customer
            .set("orders", EntityCollection::list(vec![detached(&context, "Order", "o1")]))
            .unwrap();
        let customer = context.merge(&customer).unwrap();
        assert!(!context.has_changes());

        let orders = customer.collection("orders").unwrap();
        assert!(orders.is_observable());
        orders.add(detached(&context, "Order", "o2"));
        assert!(context.is_modified(&customer));
    }

    #[test]
    fn embedded_change_dirties_owner() {
        let context = context();
        let customer = detached(&context, "Customer", "c1");
        let address = detached(&context, "Address", "a1");
        customer.set("address", &address).unwrap();
        let customer = context.merge(&customer).unwrap();

        address.set("city", "Oslo").unwrap();
        assert!(context.is_modified(&customer));
        assert!(context.is_modified(&address));

        context.evict(&customer);
        context.evict(&address);
        assert!(!context.has_changes());
        assert_eq!(address.listener_count(), 0);
    }

    #[test]
    fn remove_scrubs_collections_and_dirties_owner() {
        let context = context();
        let order = detached(&context, "Order", "o1");
        let customer = detached(&context, "Customer", "c1");
        customer
            .set("orders", EntityCollection::list(vec![order.clone()]))
            .unwrap();
        context.merge(&customer).unwrap();

        assert!(context.remove(&order));
        assert!(!context.remove(&order));
        assert!(context.is_removed(&order));
        assert!(context.find("Order", "o1").is_none());
        assert!(customer.collection("orders").unwrap().is_empty());
        assert!(context.is_modified(&customer));
        assert_eq!(order.listener_count(), 0);
    }

    #[test]
    fn evict_forgets_without_scheduling_delete() {
        let context = context();
        let created = context.create("Customer").unwrap();
        assert!(context.is_modified(&created));

        assert!(context.evict(&created));
        assert!(!context.contains(&created));
        assert!(!context.has_changes());
        assert!(!context.evict(&created));
        assert!(context.create("Nope").is_err());
    }

    fn cyclic_pair(context: &DataContext) -> (Entity, Entity) {
        let customer = detached(context, "Customer", "c1");
        let order = detached(context, "Order", "o1");
        order.set("customer", &customer).unwrap();
        customer
            .set("orders", EntityCollection::list(vec![order.clone()]))
            .unwrap();
        (customer, order)
    }

    #[test]
    fn dropping_the_context_frees_cyclic_graphs() {
        let context = context();
        let (customer, order) = cyclic_pair(&context);
        let managed = context.merge(&customer).unwrap();
        let weak_customer = customer.downgrade();
        let weak_order = order.downgrade();

        drop((customer, order, managed));
        assert!(weak_customer.upgrade().is_some());
        drop(context);

        assert!(weak_customer.upgrade().is_none());
        assert!(weak_order.upgrade().is_none());
    }

    #[test]
    fn clear_keeps_graphs_still_in_use() {
        let context = context();
        let (customer, order) = cyclic_pair(&context);
        context.merge(&customer).unwrap();
        order.set("number", "A-1").unwrap();
        assert!(context.has_changes());
        drop(order);

        context.clear();

        assert!(context.get_all().is_empty());
        assert!(!context.has_changes());
        assert_eq!(customer.listener_count(), 0);
        let order = customer.collection("orders").unwrap().items()[0].clone();
        assert!(order.reference("customer").unwrap().ptr_eq(&customer));
        assert_eq!(order.listener_count(), 0);

        order.set("number", "A-2").unwrap();
        assert!(!context.has_changes());
    }

    #[test]
    fn print_content_terminates_on_cycles() {
        let context = context();
        let (customer, _order) = cyclic_pair(&context);
        context.merge(&customer).unwrap();

        let printed = context.print_content();
        assert!(printed.starts_with("=== Customer ===\n"));
        assert!(printed.contains("=== Order ==="));
        assert!(printed.contains("Order-o1"));
        assert!(printed.contains("Customer-c1 ..."));
    }
}
