pub mod constant;
pub mod db;
pub mod error;
mod opts;
pub mod protocol;
pub mod query;
pub mod record;
pub mod tokio;

pub use db::{KeyIter, Tyrant};
pub use opts::Opts;
pub use query::{Condition, ConditionExpr, MAX_RESULTS, Order, Query};
pub use record::{DbType, Value};
pub use self::tokio::Conn;
