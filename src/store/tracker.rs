use crate::model::{Entity, EntityKey};
use std::collections::{BTreeMap, HashMap};

/// Pending upserts and deletes of a context.
///
/// An identity is never in both sets at once.
#[derive(Debug, Default)]
pub struct ChangeTracker {
    modified: BTreeMap<EntityKey, Entity>,
    removed: BTreeMap<EntityKey, Entity>,
}

impl ChangeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a pending upsert. Ignored for instances already removed.
    pub fn mark_modified(&mut self, entity: &Entity) -> bool {
        let key = entity.key();
        if self.removed.contains_key(&key) {
            return false;
        }
        self.modified.insert(key, entity.clone());
        true
    }

    pub fn mark_removed(&mut self, entity: &Entity) {
        let key = entity.key();
        self.modified.remove(&key);
        self.removed.insert(key, entity.clone());
    }

    /// Drop any pending change for the identity
    pub fn forget(&mut self, key: &EntityKey) {
        self.modified.remove(key);
        self.removed.remove(key);
    }

    pub fn is_modified(&self, entity: &Entity) -> bool {
        self.modified.contains_key(&entity.key())
    }

    pub fn is_removed(&self, entity: &Entity) -> bool {
        self.removed.contains_key(&entity.key())
    }

    pub fn has_changes(&self) -> bool {
        !(self.modified.is_empty() && self.removed.is_empty())
    }

    pub fn modified(&self) -> Vec<Entity> {
        self.modified.values().cloned().collect()
    }

    pub fn removed(&self) -> Vec<Entity> {
        self.removed.values().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.modified.clear();
        self.removed.clear();
    }

    /// Take every pending instance out of both sets
    pub fn drain(&mut self) -> Vec<Entity> {
        let modified = std::mem::take(&mut self.modified);
        let removed = std::mem::take(&mut self.removed);
        modified.into_values().chain(removed.into_values()).collect()
    }
}

/// Back-references from embedded sub-objects to the entities that own them.
///
/// A change of an embedded object marks each registered owner dirty.
#[derive(Debug, Default)]
pub struct EmbeddedOwners {
    owners: HashMap<EntityKey, BTreeMap<EntityKey, (Entity, String)>>,
}

impl EmbeddedOwners {
    pub fn register(&mut self, embedded: &Entity, owner: &Entity, property: &str) {
        self.owners
            .entry(embedded.key())
            .or_default()
            .insert(owner.key(), (owner.clone(), property.to_string()));
    }

    /// Owners whose property still points at this very instance
    pub fn owners_of(&self, embedded: &Entity) -> Vec<Entity> {
        self.owners
            .get(&embedded.key())
            .map(|owners| {
                owners
                    .values()
                    .filter(|(owner, property)| {
                        owner
                            .reference(property)
                            .map(|current| current.ptr_eq(embedded))
                            .unwrap_or(false)
                    })
                    .map(|(owner, _)| owner.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Drop every back-reference held by `owner`, returning the embedded
    /// instances it owned
    pub fn release_owner(&mut self, owner: &Entity) -> Vec<Entity> {
        let owner_key = owner.key();
        let mut released = Vec::new();
        self.owners.retain(|_, owners| {
            if let Some((owner, property)) = owners.remove(&owner_key) {
                if let Some(embedded) = owner.reference(&property) {
                    released.push(embedded);
                }
            }
            !owners.is_empty()
        });
        released
    }

    /// Drop the whole table, returning the owners and the embedded
    /// instances they currently point at
    pub fn drain(&mut self) -> Vec<Entity> {
        let mut held = Vec::new();
        for (_, owners) in self.owners.drain() {
            for (_, (owner, property)) in owners {
                held.extend(owner.reference(&property));
                held.push(owner);
            }
        }
        held
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}
