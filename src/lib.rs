// Core infrastructure modules
pub mod core;

// Database access layers
pub mod builder;
pub mod config;
pub mod connection;
pub mod model;
pub mod pool;
pub mod result_set;
pub mod transaction;
pub mod value;

// Re-export the main entry points for convenience
pub use builder::{QueryBuilder, QueryKind};
pub use config::{load_pool_config, PoolConfig};
pub use connection::Connection;
pub use crate::core::{ConstraintKind, ConstraintViolation, QuarryError, Result};
pub use model::{Model, Table};
pub use pool::{ConnectionPool, PoolStatus, PooledConnection};
pub use result_set::ResultSet;
pub use transaction::{IsolationLevel, Transaction};
pub use value::SqlValue;
