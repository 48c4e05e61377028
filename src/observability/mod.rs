pub mod execution_log;

pub use execution_log::*;
