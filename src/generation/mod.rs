pub mod client;
pub mod context;
pub mod proposal;
pub mod schema;

pub use client::*;
pub use context::*;
pub use proposal::*;
pub use schema::*;
