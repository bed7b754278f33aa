pub mod class;
pub mod collection;
pub mod commit;
pub mod common;
pub mod events;
pub mod instance;
pub mod schema;

pub use class::*;
pub use collection::*;
pub use commit::*;
pub use common::*;
pub use events::*;
pub use instance::{Entity, PropertyChangeListener, Value};
pub use schema::*;
