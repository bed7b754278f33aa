pub mod identity_map;
pub mod memory;
pub mod tracker;
pub mod traits;

pub use identity_map::*;
pub use memory::*;
pub use tracker::*;
pub use traits::*;
