//! Sandbox executors for generated chart code

pub mod executor;
pub mod local;
pub mod remote;

pub use executor::*;
pub use local::*;
pub use remote::*;

use crate::config::SandboxConfig;
use std::sync::Arc;
use tracing::info;

/// Pick the executor once from configuration: remote when an endpoint is
/// set, otherwise the local fallback.
pub fn create_executor(config: &SandboxConfig) -> Arc<dyn SandboxExecutor> {
    match config.endpoint.as_deref().map(str::trim).filter(|e| !e.is_empty()) {
        Some(endpoint) => {
            info!(
                max_sessions = config.max_sessions,
                "Using remote sandbox session pool"
            );
            Arc::new(RemoteSandboxExecutor::new(
                endpoint,
                config.api_token.clone(),
                config.max_sessions,
                config.acquire_timeout(),
            ))
        }
        None => Arc::new(LocalSandboxExecutor::new(config.python.clone())),
    }
}
