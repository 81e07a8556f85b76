pub mod execution;
pub mod order;
pub mod position;

pub use execution::*;
pub use order::*;
pub use position::*;
