//! Bot registry
//!
//! Bots are compiled in. The runner picks one by name; script-style names
//! such as `agent_delegated.py` or `bots/agent-delegated.rs` resolve to the
//! same entry.

use anyhow::{anyhow, Result};
use delegated_agent_core::{BotContext, Config};
use futures_util::future::BoxFuture;
use std::path::Path;
use std::sync::Arc;

pub mod agent_delegated;

pub const DEFAULT_BOT: &str = "agent_delegated";

/// A bot the runner can serve
pub struct BotEntry {
    pub name: &'static str,
    pub description: &'static str,
    pub build: fn(&Config) -> BoxFuture<'_, Result<BotContext>>,
}

const BOTS: &[BotEntry] = &[BotEntry {
    name: agent_delegated::NAME,
    description: agent_delegated::DESCRIPTION,
    build: agent_delegated::build,
}];

/// Reduce a bot argument to a registry key
pub fn normalize_name(name: &str) -> String {
    let file_name = Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(name);
    let stem = file_name
        .strip_suffix(".py")
        .or_else(|| file_name.strip_suffix(".rs"))
        .unwrap_or(file_name);
    stem.replace('-', "_")
}

pub fn names() -> Vec<&'static str> {
    BOTS.iter().map(|b| b.name).collect()
}

pub fn find(name: &str) -> Option<&'static BotEntry> {
    let key = normalize_name(name);
    BOTS.iter().find(|b| b.name == key)
}

/// Build the named bot
pub async fn load(name: &str, config: &Config) -> Result<Arc<BotContext>> {
    let entry = find(name).ok_or_else(|| {
        anyhow!(
            "unknown bot '{}' (available: {})",
            name,
            names().join(", ")
        )
    })?;
    tracing::info!(bot = entry.name, "loading bot: {}", entry.description);
    let ctx = (entry.build)(config).await?;
    Ok(Arc::new(ctx))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("agent_delegated"), "agent_delegated");
        assert_eq!(normalize_name("agent_delegated.py"), "agent_delegated");
        assert_eq!(normalize_name("./bots/agent-delegated.rs"), "agent_delegated");
    }

    #[test]
    fn test_find() {
        assert!(find("agent_delegated.py").is_some());
        assert!(find(DEFAULT_BOT).is_some());
        assert!(find("nonexistent_bot").is_none());
    }

    #[tokio::test]
    async fn test_load_unknown_bot() {
        let err = load("nonexistent_bot", &Config::default()).await.err().unwrap();
        let message = err.to_string();
        assert!(message.contains("nonexistent_bot"));
        assert!(message.contains(DEFAULT_BOT));
    }
}
