use crate::error::{DataContextError, Result};
use crate::model::common::json_kind;
use crate::model::{generate_id, EntityCollection, EntityKey, Id, MetaClass, MetaProperty};
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};

/// Receives notifications when a property of an entity is written.
pub trait PropertyChangeListener: Send + Sync {
    fn property_changed(&self, entity: &Entity, property: &str);
}

/// Value of a single entity property
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Scalar(serde_json::Value),
    Reference(Entity),
    Collection(EntityCollection),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_entity(&self) -> Option<&Entity> {
        match self {
            Value::Reference(entity) => Some(entity),
            _ => None,
        }
    }

    pub fn as_collection(&self) -> Option<&EntityCollection> {
        match self {
            Value::Collection(collection) => Some(collection),
            _ => None,
        }
    }

    pub fn as_scalar(&self) -> Option<&serde_json::Value> {
        match self {
            Value::Scalar(value) => Some(value),
            _ => None,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Scalar(_) => "scalar",
            Value::Reference(_) => "reference",
            Value::Collection(_) => "collection",
        }
    }

    /// Equality used for change detection: references and collections
    /// compare by instance, scalars by value.
    pub(crate) fn same_as(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Scalar(a), Value::Scalar(b)) => a == b,
            (Value::Reference(a), Value::Reference(b)) => a.ptr_eq(b),
            (Value::Collection(a), Value::Collection(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    /// Check the value against the declared range of `property`: scalars
    /// against the data type, collections against the declared kind
    pub(crate) fn check_range(&self, key: &EntityKey, property: &MetaProperty) -> Result<()> {
        let found = match self {
            Value::Null => return Ok(()),
            Value::Scalar(value) => match property.data_type() {
                Some(data_type) if data_type.accepts(value) => return Ok(()),
                Some(_) => json_kind(value),
                None => "scalar",
            },
            Value::Reference(_) if property.is_single_reference() => return Ok(()),
            Value::Reference(_) => "reference",
            Value::Collection(collection) => match property.collection_kind() {
                Some(kind) if kind == collection.kind() => return Ok(()),
                Some(_) => collection.kind().name(),
                None => "collection",
            },
        };
        let expected = match (property.collection_kind(), property.data_type()) {
            (Some(kind), _) => kind.name(),
            (None, Some(data_type)) => data_type.name(),
            (None, None) => "reference",
        };
        Err(DataContextError::unsupported_value(
            key.clone(),
            &property.name,
            expected,
            found,
        ))
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Scalar(value) => write!(f, "{}", value),
            Value::Reference(entity) => write!(f, "{:?}", entity),
            Value::Collection(collection) => write!(f, "{:?}", collection),
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            other => Value::Scalar(other),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Scalar(serde_json::Value::String(value.to_string()))
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Scalar(serde_json::Value::String(value))
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Scalar(serde_json::Value::from(value))
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Scalar(serde_json::Value::from(value))
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Scalar(serde_json::Value::Bool(value))
    }
}

impl From<Entity> for Value {
    fn from(entity: Entity) -> Self {
        Value::Reference(entity)
    }
}

impl From<&Entity> for Value {
    fn from(entity: &Entity) -> Self {
        Value::Reference(entity.clone())
    }
}

impl From<Option<Entity>> for Value {
    fn from(entity: Option<Entity>) -> Self {
        entity.map(Value::Reference).unwrap_or(Value::Null)
    }
}

impl From<EntityCollection> for Value {
    fn from(collection: EntityCollection) -> Self {
        Value::Collection(collection)
    }
}

/// Mutable state of an entity instance
#[derive(Debug, Clone, Default)]
pub(crate) struct EntityState {
    pub is_new: bool,
    pub version: Option<i64>,
    pub values: HashMap<String, Value>,
    /// Properties whose value was never fetched
    pub unloaded: HashSet<String>,
}

impl EntityState {
    pub fn is_loaded(&self, property: &str) -> bool {
        !self.unloaded.contains(property)
    }

    pub fn get(&self, property: &str) -> Value {
        self.values.get(property).cloned().unwrap_or_default()
    }

    pub fn put(&mut self, property: &str, value: Value) {
        self.unloaded.remove(property);
        if value.is_null() {
            self.values.remove(property);
        } else {
            self.values.insert(property.to_string(), value);
        }
    }
}

struct EntityCell {
    class: Arc<MetaClass>,
    id: Id,
    state: RwLock<EntityState>,
    listeners: Mutex<Vec<Weak<dyn PropertyChangeListener>>>,
}

/// Shared handle to a domain object.
///
/// Clones point at the same instance. `==` and `Hash` compare identity
/// (class name and id); use [`Entity::ptr_eq`] to tell instances apart.
#[derive(Clone)]
pub struct Entity(Arc<EntityCell>);

impl Entity {
    /// Create a new (never persisted) instance with a generated id
    pub fn new(class: Arc<MetaClass>) -> Self {
        Self::with_id(class, generate_id())
    }

    /// Create a new (never persisted) instance with the given id
    pub fn with_id(class: Arc<MetaClass>, id: impl Into<Id>) -> Self {
        Self::build(class, id.into(), true, None)
    }

    /// Create an instance representing an already persisted row
    pub fn detached(class: Arc<MetaClass>, id: impl Into<Id>, version: Option<i64>) -> Self {
        Self::build(class, id.into(), false, version)
    }

    pub(crate) fn build(class: Arc<MetaClass>, id: Id, is_new: bool, version: Option<i64>) -> Self {
        Entity(Arc::new(EntityCell {
            class,
            id,
            state: RwLock::new(EntityState {
                is_new,
                version,
                ..Default::default()
            }),
            listeners: Mutex::new(Vec::new()),
        }))
    }

    pub fn id(&self) -> &Id {
        &self.0.id
    }

    pub fn entity_name(&self) -> &str {
        &self.0.class.name
    }

    pub fn meta_class(&self) -> &Arc<MetaClass> {
        &self.0.class
    }

    pub fn key(&self) -> EntityKey {
        EntityKey::new(self.entity_name(), self.id().clone())
    }

    pub fn is_new(&self) -> bool {
        self.0.state.read().is_new
    }

    pub fn version(&self) -> Option<i64> {
        self.0.state.read().version
    }

    pub fn set_version(&self, version: Option<i64>) {
        self.0.state.write().version = version;
    }

    /// Mark the instance as persisted
    pub fn set_detached(&self) {
        self.0.state.write().is_new = false;
    }

    pub fn is_loaded(&self, property: &str) -> bool {
        self.0.state.read().is_loaded(property)
    }

    /// Mark a property as not fetched; its value is dropped
    pub fn set_unloaded(&self, property: &str) {
        let mut state = self.0.state.write();
        state.values.remove(property);
        state.unloaded.insert(property.to_string());
    }

    /// Current value of a property; `Null` if unset or not loaded
    pub fn get(&self, property: &str) -> Value {
        self.0.state.read().get(property)
    }

    pub fn reference(&self, property: &str) -> Option<Entity> {
        self.get(property).as_entity().cloned()
    }

    pub fn collection(&self, property: &str) -> Option<EntityCollection> {
        self.get(property).as_collection().cloned()
    }

    pub fn scalar(&self, property: &str) -> Option<serde_json::Value> {
        self.get(property).as_scalar().cloned()
    }

    /// Write a property and notify listeners if the value changed
    pub fn set(&self, property: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        let meta = self.meta_property(property)?;
        if meta.read_only {
            return Err(DataContextError::ReadOnlyProperty {
                entity: self.entity_name().to_string(),
                property: property.to_string(),
            });
        }
        value.check_range(&self.key(), meta)?;

        let changed = {
            let mut state = self.0.state.write();
            let changed = !state.is_loaded(property) || !state.get(property).same_as(&value);
            state.put(property, value);
            changed
        };
        if changed {
            self.fire_property_changed(property);
        }
        Ok(())
    }

    /// Write a property without notifying listeners
    pub(crate) fn set_silently(&self, property: &str, value: Value) {
        self.0.state.write().put(property, value);
    }

    pub(crate) fn meta_property(&self, property: &str) -> Result<&MetaProperty> {
        self.0
            .class
            .property(property)
            .ok_or_else(|| DataContextError::UnknownProperty {
                entity: self.entity_name().to_string(),
                property: property.to_string(),
            })
    }

    pub(crate) fn read_state(&self) -> RwLockReadGuard<'_, EntityState> {
        self.0.state.read()
    }

    pub(crate) fn write_state(&self) -> RwLockWriteGuard<'_, EntityState> {
        self.0.state.write()
    }

    pub fn add_listener(&self, listener: Weak<dyn PropertyChangeListener>) {
        let mut listeners = self.0.listeners.lock();
        let addr = listener_addr(&listener);
        if !listeners.iter().any(|l| listener_addr(l) == addr) {
            listeners.push(listener);
        }
    }

    pub fn remove_listener(&self, listener: &Weak<dyn PropertyChangeListener>) {
        let addr = listener_addr(listener);
        self.0
            .listeners
            .lock()
            .retain(|l| listener_addr(l) != addr && l.strong_count() > 0);
    }

    pub fn listener_count(&self) -> usize {
        self.0
            .listeners
            .lock()
            .iter()
            .filter(|l| l.strong_count() > 0)
            .count()
    }

    fn fire_property_changed(&self, property: &str) {
        let listeners: Vec<Arc<dyn PropertyChangeListener>> = self
            .0
            .listeners
            .lock()
            .iter()
            .filter_map(Weak::upgrade)
            .collect();
        for listener in listeners {
            listener.property_changed(self, property);
        }
    }

    /// Whether both handles point at the same instance
    pub fn ptr_eq(&self, other: &Entity) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Address of the instance, used for identity sets during traversal
    pub(crate) fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }

    /// Number of live handles to the instance
    pub(crate) fn strong_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    pub(crate) fn downgrade(&self) -> WeakEntity {
        WeakEntity(Arc::downgrade(&self.0))
    }
}

/// Non-owning handle, used by collection observers to reach their owner
#[derive(Clone)]
pub(crate) struct WeakEntity(Weak<EntityCell>);

impl WeakEntity {
    pub fn upgrade(&self) -> Option<Entity> {
        self.0.upgrade().map(Entity)
    }
}

fn listener_addr(listener: &Weak<dyn PropertyChangeListener>) -> usize {
    listener.as_ptr() as *const () as usize
}

impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || (self.id() == other.id() && self.entity_name() == other.entity_name())
    }
}

impl Eq for Entity {}

impl Hash for Entity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.entity_name().hash(state);
        self.id().hash(state);
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.0.state.try_read();
        write!(f, "{}-{}", self.entity_name(), self.id())?;
        if let Some(state) = state {
            if state.is_new {
                write!(f, " [new]")?;
            }
            if let Some(version) = state.version {
                write!(f, " v{}", version)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DataType;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn customer_class() -> Arc<MetaClass> {
        Arc::new(
            MetaClass::new("Customer")
                .with_property(MetaProperty::scalar("name", DataType::String))
                .with_property(MetaProperty::scalar("score", DataType::Number).read_only())
                .with_property(MetaProperty::reference("referrer", "Customer"))
                .with_property(MetaProperty::list("friends", "Customer")),
        )
    }

    #[derive(Default)]
    struct Counter(AtomicUsize);

    impl PropertyChangeListener for Counter {
        fn property_changed(&self, _entity: &Entity, _property: &str) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn set_notifies_only_on_change() {
        let customer = Entity::new(customer_class());
        let counter = Arc::new(Counter::default());
        let listener: Arc<dyn PropertyChangeListener> = counter.clone();
        customer.add_listener(Arc::downgrade(&listener));

        customer.set("name", "Ann").unwrap();
        customer.set("name", "Ann").unwrap();
        customer.set("name", "Bob").unwrap();
        assert_eq!(counter.0.load(Ordering::SeqCst), 2);

        customer.remove_listener(&Arc::downgrade(&listener));
        customer.set("name", "Cid").unwrap();
        assert_eq!(counter.0.load(Ordering::SeqCst), 2);
        assert_eq!(customer.listener_count(), 0);
    }

    #[test]
    fn set_validates_property() {
        let class = customer_class();
        let customer = Entity::new(class.clone());
        let other = Entity::new(class);

        assert!(matches!(
            customer.set("missing", 1),
            Err(DataContextError::UnknownProperty { .. })
        ));
        assert!(matches!(
            customer.set("score", 1),
            Err(DataContextError::ReadOnlyProperty { .. })
        ));
        assert!(matches!(
            customer.set("name", &other),
            Err(DataContextError::UnsupportedValue { .. })
        ));
        assert!(matches!(
            customer.set("friends", &other),
            Err(DataContextError::UnsupportedValue { .. })
        ));
        customer.set("referrer", &other).unwrap();
        assert!(customer.reference("referrer").unwrap().ptr_eq(&other));
    }

    #[test]
    fn set_checks_data_type_and_collection_kind() {
        let class = customer_class();
        let customer = Entity::new(class.clone());
        let friend = Entity::new(class);

        assert!(matches!(
            customer.set("name", 5),
            Err(DataContextError::UnsupportedValue {
                expected: "string",
                found: "number",
                ..
            })
        ));
        assert!(customer.get("name").is_null());
        customer.set("name", "Ann").unwrap();

        assert!(matches!(
            customer.set("friends", EntityCollection::set(vec![friend.clone()])),
            Err(DataContextError::UnsupportedValue {
                expected: "list",
                found: "set",
                ..
            })
        ));
        customer
            .set("friends", EntityCollection::list(vec![friend]))
            .unwrap();
        assert_eq!(customer.collection("friends").map(|c| c.len()), Some(1));
    }

    #[test]
    fn equality_is_by_identity_not_instance() {
        let class = customer_class();
        let a = Entity::detached(class.clone(), "c1", Some(1));
        let b = Entity::detached(class, "c1", Some(2));
        assert_eq!(a, b);
        assert!(!a.ptr_eq(&b));
        assert_eq!(format!("{:?}", a), "Customer-c1 v1");
    }

    #[test]
    fn unloaded_property_reads_null_until_written() {
        let customer = Entity::detached(customer_class(), "c1", None);
        customer.set("name", "Ann").unwrap();
        customer.set_unloaded("name");
        assert!(!customer.is_loaded("name"));
        assert!(customer.get("name").is_null());
        customer.set("name", "Ann").unwrap();
        assert!(customer.is_loaded("name"));
    }
}
