use crate::model::{CollectionKind, DataType};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cardinality {
    One,
    Many,
}

/// What a property holds: a plain value or a reference to other entities
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PropertyRange {
    Datatype {
        #[serde(rename = "type")]
        data_type: DataType,
    },
    Class {
        /// Name of the referenced entity class
        entity: String,
        cardinality: Cardinality,
        /// `true` for ordered sequences, `false` for sets. Only meaningful for `Many`.
        #[serde(default = "default_ordered")]
        ordered: bool,
    },
}

fn default_ordered() -> bool {
    true
}

/// Describes one property of an entity class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaProperty {
    pub name: String,
    pub range: PropertyRange,

    /// Read-only properties are computed and never copied or merged
    #[serde(default)]
    pub read_only: bool,

    /// Reference to an embeddable sub-object owned by the declaring entity
    #[serde(default)]
    pub embedded: bool,
}

impl MetaProperty {
    pub fn scalar(name: &str, data_type: DataType) -> Self {
        Self {
            name: name.to_string(),
            range: PropertyRange::Datatype { data_type },
            read_only: false,
            embedded: false,
        }
    }

    pub fn reference(name: &str, entity: &str) -> Self {
        Self {
            name: name.to_string(),
            range: PropertyRange::Class {
                entity: entity.to_string(),
                cardinality: Cardinality::One,
                ordered: false,
            },
            read_only: false,
            embedded: false,
        }
    }

    pub fn embedded(name: &str, entity: &str) -> Self {
        Self {
            embedded: true,
            ..Self::reference(name, entity)
        }
    }

    pub fn list(name: &str, entity: &str) -> Self {
        Self {
            name: name.to_string(),
            range: PropertyRange::Class {
                entity: entity.to_string(),
                cardinality: Cardinality::Many,
                ordered: true,
            },
            read_only: false,
            embedded: false,
        }
    }

    pub fn set(name: &str, entity: &str) -> Self {
        Self {
            name: name.to_string(),
            range: PropertyRange::Class {
                entity: entity.to_string(),
                cardinality: Cardinality::Many,
                ordered: false,
            },
            read_only: false,
            embedded: false,
        }
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn is_class(&self) -> bool {
        matches!(self.range, PropertyRange::Class { .. })
    }

    pub fn is_many(&self) -> bool {
        matches!(
            self.range,
            PropertyRange::Class {
                cardinality: Cardinality::Many,
                ..
            }
        )
    }

    /// Single-valued reference to another entity
    pub fn is_single_reference(&self) -> bool {
        self.is_class() && !self.is_many()
    }

    /// Collection kind a multi-valued property holds
    pub fn collection_kind(&self) -> Option<CollectionKind> {
        match self.range {
            PropertyRange::Class {
                cardinality: Cardinality::Many,
                ordered,
                ..
            } => Some(if ordered {
                CollectionKind::List
            } else {
                CollectionKind::Set
            }),
            _ => None,
        }
    }

    pub fn data_type(&self) -> Option<DataType> {
        match self.range {
            PropertyRange::Datatype { data_type } => Some(data_type),
            PropertyRange::Class { .. } => None,
        }
    }

    /// Name of the referenced class, if this is a reference property
    pub fn target_entity(&self) -> Option<&str> {
        match &self.range {
            PropertyRange::Class { entity, .. } => Some(entity),
            PropertyRange::Datatype { .. } => None,
        }
    }
}

/// Represents an entity class: the typed properties its instances carry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaClass {
    /// Name of the class (e.g., "Order", "Customer", "Address")
    pub name: String,

    /// Properties in declaration order
    pub properties: Vec<MetaProperty>,

    /// Embeddable classes are persisted as part of their owner
    #[serde(default)]
    pub embeddable: bool,

    /// Whether instances carry an optimistic-lock version
    #[serde(default)]
    pub versioned: bool,
}

impl MetaClass {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            properties: Vec::new(),
            embeddable: false,
            versioned: false,
        }
    }

    pub fn with_property(mut self, property: MetaProperty) -> Self {
        self.properties.push(property);
        self
    }

    pub fn embeddable(mut self) -> Self {
        self.embeddable = true;
        self
    }

    pub fn versioned(mut self) -> Self {
        self.versioned = true;
        self
    }

    pub fn property(&self, name: &str) -> Option<&MetaProperty> {
        self.properties.iter().find(|p| p.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_definition_from_json() {
        let json = r#"{
            "name": "Order",
            "versioned": true,
            "properties": [
                {"name": "number", "range": {"kind": "datatype", "type": "String"}},
                {"name": "customer", "range": {"kind": "class", "entity": "Customer", "cardinality": "one"}},
                {"name": "lines", "range": {"kind": "class", "entity": "OrderLine", "cardinality": "many"}},
                {"name": "total", "range": {"kind": "datatype", "type": "Number"}, "read_only": true}
            ]
        }"#;

        let class: MetaClass = serde_json::from_str(json).unwrap();
        assert!(class.versioned);
        assert!(!class.embeddable);
        assert!(class.property("customer").unwrap().is_single_reference());

        let lines = class.property("lines").unwrap();
        assert!(lines.is_many());
        assert_eq!(lines.target_entity(), Some("OrderLine"));
        assert!(matches!(lines.range, PropertyRange::Class { ordered: true, .. }));

        assert!(class.property("total").unwrap().read_only);
        assert!(class.property("missing").is_none());
    }

    #[test]
    fn builders_set_range() {
        let tags = MetaProperty::set("tags", "Tag");
        assert!(matches!(tags.range, PropertyRange::Class { ordered: false, .. }));
        assert_eq!(tags.collection_kind(), Some(CollectionKind::Set));
        assert_eq!(
            MetaProperty::list("lines", "Line").collection_kind(),
            Some(CollectionKind::List)
        );
        assert_eq!(MetaProperty::reference("owner", "Customer").collection_kind(), None);
        assert!(MetaProperty::embedded("address", "Address").embedded);
        assert!(!MetaProperty::scalar("name", DataType::String).is_class());
    }
}
