pub mod agent;
pub mod config;
pub mod conversation;
pub mod error;
pub mod execution;
pub mod execution_loop;
pub mod generation;
pub mod intent;
pub mod llm;
pub mod observability;
pub mod policy;
pub mod prompts;
pub mod sandbox;
pub mod validator;
pub mod visualization;

pub use agent::{AgentHealth, AgentResponse, DataAgent, DataAgentFlow, ResponseStatus};
pub use error::{AgentError, ErrorCode, Result};
pub use policy::{AgentPolicy, SqlDialect};
pub use validator::{validate, ValidationOutcome};
