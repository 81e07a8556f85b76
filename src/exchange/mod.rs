mod traits;

pub use traits::{Broker, ExecutionFilter, OrderFilter, DEFAULT_QUERY_LIMIT};
