use crate::model::EntityKey;

pub type Result<T> = std::result::Result<T, DataContextError>;

/// Errors raised by the data context and its merge engine.
#[derive(Debug, thiserror::Error)]
pub enum DataContextError {
    /// A precondition on a public operation was violated
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The metadata has no class with this name
    #[error("unknown entity class: {0}")]
    UnknownEntity(String),

    #[error("entity class '{entity}' has no property '{property}'")]
    UnknownProperty { entity: String, property: String },

    #[error("property '{property}' of '{entity}' is read-only")]
    ReadOnlyProperty { entity: String, property: String },

    /// A property holds a value whose kind does not match its declared range
    #[error("unsupported value in {key}.{property}: expected {expected}, found {found}")]
    UnsupportedValue {
        key: EntityKey,
        property: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("invalid parent context: {0}")]
    InvalidParent(String),

    #[error("parent context is already set")]
    ParentAlreadySet,

    /// A fresh instance could not be built while copying a graph
    #[error("cannot copy graph of {key}: {reason}")]
    GraphCopy { key: EntityKey, reason: String },

    /// Error returned by the persistence collaborator, passed through untouched
    #[error(transparent)]
    Persistence(#[from] anyhow::Error),
}

impl DataContextError {
    pub(crate) fn unsupported_value(
        key: EntityKey,
        property: &str,
        expected: &'static str,
        found: &'static str,
    ) -> Self {
        DataContextError::UnsupportedValue {
            key,
            property: property.to_string(),
            expected,
            found,
        }
    }

    /// Whether the error came from the persistence collaborator during commit
    pub fn is_persistence(&self) -> bool {
        matches!(self, DataContextError::Persistence(_))
    }
}
