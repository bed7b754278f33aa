use crate::error::{DataContextError, Result};
use crate::model::MetaClass;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Metadata collaborator: describes entity classes and their properties.
///
/// Per-instance state (loaded properties, new flag, version) is carried by
/// [`crate::model::Entity`] itself.
pub trait Metadata: Send + Sync {
    /// Find a class definition by name
    fn get_class(&self, entity_name: &str) -> Option<Arc<MetaClass>>;

    fn class(&self, entity_name: &str) -> Result<Arc<MetaClass>> {
        self.get_class(entity_name)
            .ok_or_else(|| DataContextError::UnknownEntity(entity_name.to_string()))
    }

    /// Embeddable classes are committed as part of their owner
    fn is_embeddable(&self, entity_name: &str) -> bool {
        self.get_class(entity_name)
            .map(|class| class.embeddable)
            .unwrap_or(false)
    }
}

/// Serialized form of a registry, as found in a schema file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaDocument {
    pub classes: Vec<MetaClass>,
}

/// In-memory [`Metadata`] implementation holding class definitions
#[derive(Debug, Clone, Default)]
pub struct MetadataRegistry {
    classes: HashMap<String, Arc<MetaClass>>,
}

impl MetadataRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_class(mut self, class: MetaClass) -> Self {
        self.register(class);
        self
    }

    /// Add or replace a class definition
    pub fn register(&mut self, class: MetaClass) -> Arc<MetaClass> {
        let class = Arc::new(class);
        self.classes.insert(class.name.clone(), class.clone());
        class
    }

    pub fn from_document(document: SchemaDocument) -> Result<Self> {
        let mut registry = Self::new();
        for class in document.classes {
            registry.register(class);
        }
        registry.validate()?;
        Ok(registry)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let document: SchemaDocument = serde_json::from_str(json)
            .map_err(|e| DataContextError::InvalidArgument(format!("malformed schema: {}", e)))?;
        Self::from_document(document)
    }

    /// Load class definitions from a JSON schema file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            DataContextError::InvalidArgument(format!(
                "cannot read schema file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_json(&json)
    }

    /// Check that every reference property points at a registered class
    pub fn validate(&self) -> Result<()> {
        for class in self.classes.values() {
            for property in &class.properties {
                if let Some(target) = property.target_entity() {
                    if !self.classes.contains_key(target) {
                        return Err(DataContextError::UnknownEntity(format!(
                            "{} (referenced by {}.{})",
                            target, class.name, property.name
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

impl Metadata for MetadataRegistry {
    fn get_class(&self, entity_name: &str) -> Option<Arc<MetaClass>> {
        self.classes.get(entity_name).cloned()
    }
}
