//! Agents
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  BOT              Front conversation (one per connection)   │
//! │  - Conversation: history, handle_query round trips          │
//! │  - run_bot: session event loop                              │
//! ├─────────────────────────────────────────────────────────────┤
//! │  DELEGATE         Tool-using agent (shared)                 │
//! │  - DelegateAgent: reasoning loop, direct tool calls         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  TOOLS            Tool trait, registry, implementations     │
//! │  - WeatherTool, McpTool                                     │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod bot;
pub mod delegate;
pub mod tool;
pub mod tool_registry;
pub mod tools;

pub use bot::{handle_query_spec, run_bot, BotContext, Conversation, QueryHandler, HANDLE_QUERY};
pub use delegate::{extract_answer, AgentRun, DelegateAgent};
pub use tool::{Tool, ToolKind};
pub use tool_registry::ToolRegistry;
