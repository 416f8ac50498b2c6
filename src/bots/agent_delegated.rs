//! Health assistant that delegates location and weather questions

use anyhow::{Context, Result};
use delegated_agent_core::agent::QueryHandler;
use delegated_agent_core::llm::{BedrockModel, ChatModel, RetryConfig, RetryModel};
use delegated_agent_core::{BotContext, Config, DelegateAgent};
use futures_util::future::BoxFuture;
use std::sync::Arc;

pub const NAME: &str = "agent_delegated";
pub const DESCRIPTION: &str = "health assistant with a delegated places and weather agent";

pub fn build(config: &Config) -> BoxFuture<'_, Result<BotContext>> {
    Box::pin(async move {
        config
            .aws
            .require_credentials()
            .context("AWS credentials are required for the Bedrock models")?;

        let bedrock = BedrockModel::from_settings(&config.aws, &config.bot.model_id)
            .await
            .context("Failed to create the bot model")?;
        let model: Arc<dyn ChatModel> =
            Arc::new(RetryModel::new(Arc::new(bedrock), RetryConfig::default()));

        let agent = DelegateAgent::from_config(config)
            .await
            .context("Failed to start the delegate agent")?;

        Ok(BotContext {
            name: NAME.to_string(),
            model,
            handler: QueryHandler::new(Arc::new(agent)),
            config: config.bot.clone(),
        })
    })
}
