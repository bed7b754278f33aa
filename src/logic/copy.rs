use crate::error::{DataContextError, Result};
use crate::model::{Entity, EntityCollection, Metadata, Value};
use std::collections::HashMap;

/// Produces disconnected copies of entity graphs.
///
/// Copies keep id, new flag, version and unloaded markers of their source.
/// One copier shares its copies across calls, so a node reachable from
/// several roots is copied once.
pub struct GraphCopier<'a> {
    metadata: &'a dyn Metadata,
    /// Source address to (source, copy)
    copied: HashMap<usize, (Entity, Entity)>,
}

impl<'a> GraphCopier<'a> {
    pub fn new(metadata: &'a dyn Metadata) -> Self {
        Self {
            metadata,
            copied: HashMap::new(),
        }
    }

    pub fn copy(&mut self, entity: &Entity) -> Result<Entity> {
        if let Some((_, copy)) = self.copied.get(&entity.addr()) {
            return Ok(copy.clone());
        }

        let class = self
            .metadata
            .get_class(entity.entity_name())
            .ok_or_else(|| DataContextError::GraphCopy {
                key: entity.key(),
                reason: format!("no class named '{}' in metadata", entity.entity_name()),
            })?;
        let (is_new, version) = {
            let state = entity.read_state();
            (state.is_new, state.version)
        };
        let copy = Entity::build(class.clone(), entity.id().clone(), is_new, version);
        self.copied
            .insert(entity.addr(), (entity.clone(), copy.clone()));

        for property in class.properties.iter().filter(|p| !p.read_only) {
            let name = property.name.as_str();
            if !entity.is_loaded(name) {
                copy.set_unloaded(name);
                continue;
            }
            let value = match entity.get(name) {
                Value::Null => continue,
                Value::Scalar(value) => Value::Scalar(value),
                Value::Reference(reference) => Value::Reference(self.copy(&reference)?),
                Value::Collection(collection) => {
                    let items = collection
                        .items()
                        .iter()
                        .map(|item| self.copy(item))
                        .collect::<Result<Vec<_>>>()?;
                    Value::Collection(EntityCollection::new(collection.kind(), items))
                }
            };
            copy.set_silently(name, value);
        }

        Ok(copy)
    }
}

/// Deep copy of the graph reachable from `entity`
pub fn copy_graph(entity: &Entity, metadata: &dyn Metadata) -> Result<Entity> {
    GraphCopier::new(metadata).copy(entity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CollectionKind, DataType, MetaClass, MetaProperty, MetadataRegistry};

    fn registry() -> MetadataRegistry {
        MetadataRegistry::new()
            .with_class(
                MetaClass::new("Customer")
                    .versioned()
                    .with_property(MetaProperty::scalar("name", DataType::String))
                    .with_property(MetaProperty::scalar("rank", DataType::Number).read_only())
                    .with_property(MetaProperty::set("orders", "Order")),
            )
            .with_class(
                MetaClass::new("Order")
                    .with_property(MetaProperty::scalar("number", DataType::String))
                    .with_property(MetaProperty::reference("customer", "Customer")),
            )
    }

    #[test]
    fn copies_cyclic_graph_without_aliasing() {
        let registry = registry();
        let customer = Entity::detached(registry.class("Customer").unwrap(), "c1", Some(4));
        let order = Entity::detached(registry.class("Order").unwrap(), "o1", None);
        customer.set("name", "Ann").unwrap();
        order.set("customer", &customer).unwrap();
        customer
            .set("orders", EntityCollection::set(vec![order.clone()]))
            .unwrap();
        order.set_unloaded("number");

        let copy = copy_graph(&customer, &registry).unwrap();
        assert!(!copy.ptr_eq(&customer));
        assert_eq!(copy.key(), customer.key());
        assert_eq!(copy.version(), Some(4));
        assert!(!copy.is_new());
        assert_eq!(copy.scalar("name"), Some(serde_json::json!("Ann")));

        let orders = copy.collection("orders").unwrap();
        assert_eq!(orders.kind(), CollectionKind::Set);
        assert!(!orders.ptr_eq(&customer.collection("orders").unwrap()));
        let order_copy = orders.get(0).unwrap();
        assert!(!order_copy.ptr_eq(&order));
        assert!(order_copy.reference("customer").unwrap().ptr_eq(&copy));
        assert!(!order_copy.is_loaded("number"));
    }

    #[test]
    fn unknown_class_is_a_copy_error() {
        let stray = Entity::with_id(std::sync::Arc::new(MetaClass::new("Stray")), "s1");
        let err = copy_graph(&stray, &registry()).unwrap_err();
        assert!(matches!(err, DataContextError::GraphCopy { .. }));
    }
}
