use crate::model::{Entity, EntityCollection, Value};
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};

/// Break reference cycles in the graph reachable from `instances`.
///
/// `instances` must be the last handles the caller holds. An instance still
/// reachable from a handle held anywhere else keeps its values; every other
/// instance drops its references and collections, so cycles among them no
/// longer keep each other alive. Returns the number of released instances.
///
/// The graph must not be navigated concurrently while this runs.
pub(crate) fn release_unreachable(instances: Vec<Entity>) -> usize {
    let mut graph = Graph::default();
    for entity in instances {
        graph.add(entity);
    }
    graph.explore();
    let live = graph.live();
    graph.release(&live)
}

/// Handles found while walking the graph. Exactly one handle per instance
/// and per collection is kept here, so every other strong count is either
/// a handle inside the graph (counted in `inbound`) or an outside one.
#[derive(Default)]
struct Graph {
    nodes: HashMap<usize, Entity>,
    collections: HashMap<usize, EntityCollection>,
    inbound: HashMap<usize, usize>,
    collection_inbound: HashMap<usize, usize>,
    edges: HashMap<usize, Vec<usize>>,
    collection_items: HashMap<usize, Vec<usize>>,
    pending: Vec<usize>,
}

impl Graph {
    fn add(&mut self, entity: Entity) -> usize {
        let addr = entity.addr();
        if let Entry::Vacant(slot) = self.nodes.entry(addr) {
            slot.insert(entity);
            self.pending.push(addr);
        }
        addr
    }

    fn visit(&mut self, entity: Entity) -> usize {
        let addr = self.add(entity);
        *self.inbound.entry(addr).or_default() += 1;
        addr
    }

    fn explore(&mut self) {
        while let Some(addr) = self.pending.pop() {
            let values: Vec<Value> = match self.nodes.get(&addr) {
                Some(entity) => entity.read_state().values.values().cloned().collect(),
                None => continue,
            };
            let mut targets = Vec::new();
            for value in values {
                match value {
                    Value::Reference(reference) => targets.push(self.visit(reference)),
                    Value::Collection(collection) => {
                        let collection_addr = collection.addr();
                        *self.collection_inbound.entry(collection_addr).or_default() += 1;
                        if !self.collections.contains_key(&collection_addr) {
                            let items: Vec<usize> = collection
                                .items()
                                .into_iter()
                                .map(|item| self.visit(item))
                                .collect();
                            self.collection_items.insert(collection_addr, items);
                            self.collections.insert(collection_addr, collection);
                        }
                        if let Some(items) = self.collection_items.get(&collection_addr) {
                            targets.extend(items.iter().copied());
                        }
                    }
                    Value::Scalar(_) | Value::Null => {}
                }
            }
            self.edges.insert(addr, targets);
        }
    }

    /// Instances reachable from a handle held outside the graph
    fn live(&self) -> HashSet<usize> {
        let mut pending: Vec<usize> = self
            .nodes
            .iter()
            .filter(|(addr, entity)| {
                entity.strong_count() > 1 + self.inbound.get(*addr).copied().unwrap_or(0)
            })
            .map(|(addr, _)| *addr)
            .collect();
        for (addr, collection) in &self.collections {
            let inbound = self.collection_inbound.get(addr).copied().unwrap_or(0);
            if collection.strong_count() > 1 + inbound {
                pending.extend(self.collection_items.get(addr).into_iter().flatten());
            }
        }

        let mut live = HashSet::new();
        while let Some(addr) = pending.pop() {
            if live.insert(addr) {
                pending.extend(self.edges.get(&addr).into_iter().flatten());
            }
        }
        live
    }

    fn release(self, live: &HashSet<usize>) -> usize {
        let mut released = 0;
        for (addr, entity) in &self.nodes {
            if live.contains(addr) {
                continue;
            }
            entity
                .write_state()
                .values
                .retain(|_, value| !matches!(value, Value::Reference(_) | Value::Collection(_)));
            released += 1;
        }
        released
    }
}
