//! CLI argument parsing using clap 4.x derive macros

use clap::{ArgAction, Parser, Subcommand};
use delegated_agent_core::Config;

use crate::bots::DEFAULT_BOT;

/// Run a bot behind the signalling and data channel API
///
/// The bot answers health questions and delegates location and weather
/// lookups to a tool-using agent on AWS Bedrock. AWS credentials are read
/// from AWS_ACCESS_KEY_ID, AWS_SECRET_ACCESS_KEY and AWS_REGION (or `.env`).
#[derive(Parser, Debug)]
#[command(name = "delegated-agent")]
#[command(author, version, about, long_about = None)]
#[command(disable_version_flag = true)]
pub struct Cli {
    /// One-shot commands against the delegate agent
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Bot to run, by name or script file name (e.g. agent_delegated.py)
    #[arg(default_value = DEFAULT_BOT)]
    pub bot: String,

    /// Host for the HTTP server
    #[arg(long)]
    pub host: Option<String>,

    /// Port for the HTTP server
    #[arg(long)]
    pub port: Option<u16>,

    /// Public proxy host name, without protocol
    #[arg(short = 'x', long)]
    pub proxy: Option<String>,

    /// Verbose logging (TRACE)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Print version information
    #[arg(long)]
    pub version: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Ask the delegate agent a single question
    Query {
        /// The question, e.g. "largest zoo in Seattle?"
        text: String,
    },

    /// Invoke one delegate tool directly, without reasoning
    CallTool {
        /// Tool name, e.g. search_places
        tool: String,

        /// Tool input: plain text or JSON (a "query" field is unwrapped)
        input: String,
    },

    /// List the delegate agent's tools
    Tools,
}

impl Cli {
    /// Command line values win over the config file and environment
    pub fn apply_overrides(&self, config: &mut Config) {
        if let Some(host) = &self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(proxy) = &self.proxy {
            config.server.proxy = Some(proxy.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runner_invocation() {
        let cli = Cli::try_parse_from(["delegated-agent", "agent_delegated.py", "--port", "9000", "-x", "abc.ngrok.app"])
            .unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.bot, "agent_delegated.py");

        let mut config = Config::default();
        cli.apply_overrides(&mut config);
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "localhost");
        assert_eq!(config.server.proxy.as_deref(), Some("abc.ngrok.app"));
    }

    #[test]
    fn test_defaults_and_subcommands() {
        let cli = Cli::try_parse_from(["delegated-agent"]).unwrap();
        assert_eq!(cli.bot, DEFAULT_BOT);
        assert_eq!(cli.verbose, 0);

        let cli = Cli::try_parse_from(["delegated-agent", "-vv", "query", "largest zoo in Seattle?"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.command, Some(Commands::Query { text }) if text == "largest zoo in Seattle?"));

        let cli = Cli::try_parse_from(["delegated-agent", "-v", "query", "zoo?"]).unwrap();
        assert_eq!(cli.verbose, 1);
        assert!(matches!(cli.command, Some(Commands::Query { text }) if text == "zoo?"));

        let cli = Cli::try_parse_from(["delegated-agent", "-v", "tools"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Tools)));
        assert_eq!(cli.bot, DEFAULT_BOT);

        let cli = Cli::try_parse_from(["delegated-agent", "call-tool", "search_places", "zoo"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::CallTool { tool, .. }) if tool == "search_places"));
    }
}
