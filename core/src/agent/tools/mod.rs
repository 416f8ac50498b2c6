//! Built-in tool implementations for the delegate agent.
//!
//! - **Web**: current weather lookup
//! - **MCP**: proxies for tools served by MCP servers

pub mod mcp;
pub mod weather;

pub use mcp::McpTool;
pub use weather::WeatherTool;
