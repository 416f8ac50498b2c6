#![forbid(unsafe_code)]

pub mod agent;
pub mod config;
pub mod error;
pub mod llm;
pub mod mcp;
pub mod protocol;
pub mod session;

// Re-exports for convenience
pub use agent::{BotContext, DelegateAgent};
pub use config::Config;
pub use error::{AgentError, Result};
