use crate::model::{Entity, EntityKey};
use std::collections::HashMap;

/// Batch of instances handed to a persistence collaborator
#[derive(Debug, Clone, Default)]
pub struct CommitContext {
    /// Instances to insert or update
    pub commit_instances: Vec<Entity>,
    /// Instances to delete
    pub remove_instances: Vec<Entity>,
}

impl CommitContext {
    pub fn new(commit_instances: Vec<Entity>, remove_instances: Vec<Entity>) -> Self {
        Self {
            commit_instances,
            remove_instances,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.commit_instances.is_empty() && self.remove_instances.is_empty()
    }
}

/// Ordered set of entities, one per identity, with lookup by key
#[derive(Debug, Clone, Default)]
pub struct EntitySet {
    entities: Vec<Entity>,
    index: HashMap<EntityKey, usize>,
}

impl EntitySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entity; an entity with the same identity replaces the earlier one
    pub fn insert(&mut self, entity: Entity) {
        let key = entity.key();
        match self.index.get(&key) {
            Some(&position) => self.entities[position] = entity,
            None => {
                self.index.insert(key, self.entities.len());
                self.entities.push(entity);
            }
        }
    }

    pub fn get(&self, entity_name: &str, id: &str) -> Option<&Entity> {
        self.get_by_key(&EntityKey::new(entity_name, id))
    }

    pub fn get_by_key(&self, key: &EntityKey) -> Option<&Entity> {
        self.index.get(key).map(|&position| &self.entities[position])
    }

    /// The member with the same identity as `entity`
    pub fn find(&self, entity: &Entity) -> Option<&Entity> {
        self.get_by_key(&entity.key())
    }

    pub fn contains(&self, entity: &Entity) -> bool {
        self.index.contains_key(&entity.key())
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Entity> {
        self.entities.iter()
    }

    pub fn into_vec(self) -> Vec<Entity> {
        self.entities
    }
}

impl FromIterator<Entity> for EntitySet {
    fn from_iter<I: IntoIterator<Item = Entity>>(iter: I) -> Self {
        let mut set = EntitySet::new();
        for entity in iter {
            set.insert(entity);
        }
        set
    }
}

impl IntoIterator for EntitySet {
    type Item = Entity;
    type IntoIter = std::vec::IntoIter<Entity>;

    fn into_iter(self) -> Self::IntoIter {
        self.entities.into_iter()
    }
}

impl<'a> IntoIterator for &'a EntitySet {
    type Item = &'a Entity;
    type IntoIter = std::slice::Iter<'a, Entity>;

    fn into_iter(self) -> Self::IntoIter {
        self.entities.iter()
    }
}
