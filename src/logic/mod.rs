pub mod copy;
pub mod merge;
pub mod release;

pub use copy::*;
