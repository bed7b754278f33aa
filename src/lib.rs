pub mod config;
pub mod context;
pub mod error;
pub mod logic;
pub mod model;
pub mod store;

pub use config::{init_logging, DataContextConfig};
pub use context::{CommitOutcome, DataContext};
pub use error::{DataContextError, Result};
pub use logic::{copy_graph, GraphCopier};

// Export all model types
pub use model::*;

// Export store types
pub use store::{CommitStore, InMemoryCommitStore};
