//! Execution Layer
//!
//! Adapter capability, the Postgres, SQLite and MySQL implementations and
//! the shared result types.

pub mod adapter;
pub mod mysql;
pub mod postgres;
pub mod result;
pub mod sqlite;

pub use adapter::*;
pub use mysql::*;
pub use postgres::*;
pub use result::*;
pub use sqlite::*;
