//! `delegated-agent` - a health assistant bot with a delegated tool agent
//!
//! Serves the bot over an offer/answer signalling endpoint plus a WebSocket
//! data channel, or runs one-shot queries against the delegate agent.

use anyhow::{Context, Result};
use clap::Parser;
use console::Style;
use delegated_agent_core::config::load_dotenv;
use delegated_agent_core::{Config, DelegateAgent};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};

mod bots;
mod cli;
mod server;

#[tokio::main]
async fn main() -> Result<()> {
    let dotenv = load_dotenv();
    let cli = Cli::parse();

    if cli.version {
        let blue = Style::new().blue();
        println!(
            "{} v{} ({})",
            blue.apply_to("delegated-agent"),
            env!("CARGO_PKG_VERSION"),
            env!("GIT_HASH")
        );
        return Ok(());
    }

    init_tracing(cli.verbose);
    if let Some(path) = dotenv {
        tracing::debug!("loaded environment from {}", path.display());
    }

    let mut config = Config::load().context("Failed to load configuration")?;
    cli.apply_overrides(&mut config);

    match &cli.command {
        Some(Commands::Query { text }) => {
            let agent = delegate_agent(&config).await?;
            let result = agent.query(text).await;
            agent.close().await;
            match result.context("Query failed")? {
                Some(answer) => println!("{}", answer),
                None => println!("{}", Style::new().dim().apply_to("(no answer)")),
            }
        }

        Some(Commands::CallTool { tool, input }) => {
            let agent = delegate_agent(&config).await?;
            let result = agent.call_tool(tool, Value::String(input.clone())).await;
            agent.close().await;
            let output = result.with_context(|| format!("Tool '{}' failed", tool))?;
            println!("{}", serde_json::to_string_pretty(&output)?);
        }

        Some(Commands::Tools) => {
            let agent = delegate_agent(&config).await?;
            let bold = Style::new().bold();
            for spec in agent.tools().specs().await {
                println!("{}  {}", bold.apply_to(&spec.name), spec.description);
            }
            agent.close().await;
        }

        None => {
            let ctx = match bots::load(&cli.bot, &config).await {
                Ok(ctx) => ctx,
                Err(e) => {
                    tracing::error!("Error loading bot {}. Error: {:#}", cli.bot, e);
                    std::process::exit(1);
                }
            };
            server::run(&config, ctx).await?;
        }
    }

    Ok(())
}

async fn delegate_agent(config: &Config) -> Result<DelegateAgent> {
    config
        .aws
        .require_credentials()
        .context("AWS credentials are required for the delegate agent")?;
    DelegateAgent::from_config(config)
        .await
        .context("Failed to start the delegate agent")
}

/// Log to stderr. `RUST_LOG` wins over `-v`.
fn init_tracing(verbose: u8) {
    let level = if verbose > 0 { "trace" } else { "debug" };
    let default_filter = format!(
        "delegated_agent={level},delegated_agent_core={level},tower_http={level},info",
        level = level
    );
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
