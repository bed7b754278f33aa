use crate::model::{Entity, EntityKey, Id};
use std::collections::HashMap;

/// Canonical instances of one context, keyed by class name then id
#[derive(Debug, Default)]
pub struct IdentityMap {
    entries: HashMap<String, HashMap<Id, Entity>>,
}

impl IdentityMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find(&self, entity_name: &str, id: &str) -> Option<Entity> {
        self.entries
            .get(entity_name)
            .and_then(|instances| instances.get(id))
            .cloned()
    }

    pub fn find_key(&self, key: &EntityKey) -> Option<Entity> {
        self.find(&key.entity_name, &key.id)
    }

    /// Whether an instance with the identity of `entity` is present
    pub fn contains(&self, entity: &Entity) -> bool {
        self.entries
            .get(entity.entity_name())
            .map(|instances| instances.contains_key(entity.id()))
            .unwrap_or(false)
    }

    /// Whether `entity` itself is the canonical instance for its identity
    pub fn is_canonical(&self, entity: &Entity) -> bool {
        self.find(entity.entity_name(), entity.id())
            .map(|managed| managed.ptr_eq(entity))
            .unwrap_or(false)
    }

    /// Store `entity` as canonical, returning the instance it displaced
    pub fn insert(&mut self, entity: Entity) -> Option<Entity> {
        self.entries
            .entry(entity.entity_name().to_string())
            .or_default()
            .insert(entity.id().clone(), entity)
    }

    pub fn remove(&mut self, key: &EntityKey) -> Option<Entity> {
        let instances = self.entries.get_mut(&key.entity_name)?;
        let removed = instances.remove(&key.id);
        if instances.is_empty() {
            self.entries.remove(&key.entity_name);
        }
        removed
    }

    /// Class names with at least one instance, sorted
    pub fn entity_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.keys().cloned().collect();
        names.sort();
        names
    }

    /// Instances of one class, sorted by id
    pub fn instances_of(&self, entity_name: &str) -> Vec<Entity> {
        let mut instances: Vec<Entity> = self
            .entries
            .get(entity_name)
            .map(|instances| instances.values().cloned().collect())
            .unwrap_or_default();
        instances.sort_by(|a, b| a.id().cmp(b.id()));
        instances
    }

    /// All instances, sorted by key
    pub fn all(&self) -> Vec<Entity> {
        self.entity_names()
            .iter()
            .flat_map(|name| self.instances_of(name))
            .collect()
    }

    /// Take every instance out of the map
    pub fn drain(&mut self) -> Vec<Entity> {
        self.entries
            .drain()
            .flat_map(|(_, instances)| instances.into_values())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MetaClass;
    use std::sync::Arc;

    #[test]
    fn insert_find_remove() {
        let orders = Arc::new(MetaClass::new("Order"));
        let customers = Arc::new(MetaClass::new("Customer"));
        let mut map = IdentityMap::new();

        let order = Entity::detached(orders.clone(), "o1", None);
        assert!(map.insert(order.clone()).is_none());
        map.insert(Entity::detached(customers, "c1", None));

        assert!(map.find("Order", "o1").unwrap().ptr_eq(&order));
        assert!(map.find("Order", "o2").is_none());
        assert!(map.find("Missing", "o1").is_none());

        let copy = Entity::detached(orders, "o1", None);
        assert!(map.contains(&copy));
        assert!(map.is_canonical(&order));
        assert!(!map.is_canonical(&copy));

        assert_eq!(map.len(), 2);
        assert_eq!(map.entity_names(), vec!["Customer", "Order"]);
        assert_eq!(map.all()[0].entity_name(), "Customer");

        assert!(map.remove(&order.key()).is_some());
        assert!(map.remove(&order.key()).is_none());
        assert_eq!(map.entity_names(), vec!["Customer"]);
    }
}
