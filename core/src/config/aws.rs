//! AWS credentials and region
//!
//! Credentials are only ever read from the process environment (after
//! `.env` loading); they are never written to the config file.

use crate::error::{OptionExt, Result};

/// Region used when `AWS_REGION` is unset or empty
pub const DEFAULT_REGION: &str = "us-east-1";

pub const ACCESS_KEY_ID_VAR: &str = "AWS_ACCESS_KEY_ID";
pub const SECRET_ACCESS_KEY_VAR: &str = "AWS_SECRET_ACCESS_KEY";
pub const SESSION_TOKEN_VAR: &str = "AWS_SESSION_TOKEN";
pub const REGION_VAR: &str = "AWS_REGION";

/// Static AWS credentials plus region
#[derive(Clone, PartialEq, Eq)]
pub struct AwsSettings {
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
    pub region: String,
}

impl Default for AwsSettings {
    fn default() -> Self {
        Self {
            access_key_id: None,
            secret_access_key: None,
            session_token: None,
            region: DEFAULT_REGION.to_string(),
        }
    }
}

impl AwsSettings {
    /// Read settings from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through an arbitrary lookup (environment, test map, ...)
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        Self {
            access_key_id: non_empty(ACCESS_KEY_ID_VAR),
            secret_access_key: non_empty(SECRET_ACCESS_KEY_VAR),
            session_token: non_empty(SESSION_TOKEN_VAR),
            region: non_empty(REGION_VAR).unwrap_or_else(|| DEFAULT_REGION.to_string()),
        }
    }

    /// Access key id and secret, or a `MissingConfig` error naming the absent variable
    pub fn require_credentials(&self) -> Result<(&str, &str)> {
        let access_key_id = self.access_key_id.as_deref().ok_or_missing(ACCESS_KEY_ID_VAR)?;
        let secret_access_key = self
            .secret_access_key
            .as_deref()
            .ok_or_missing(SECRET_ACCESS_KEY_VAR)?;
        Ok((access_key_id, secret_access_key))
    }

    pub fn has_credentials(&self) -> bool {
        self.access_key_id.is_some() && self.secret_access_key.is_some()
    }

    /// Environment entries handed to child processes (MCP servers).
    /// The region is always present; credentials only when known.
    pub fn to_env(&self) -> Vec<(String, String)> {
        let mut env = Vec::with_capacity(4);
        if let Some(key) = &self.access_key_id {
            env.push((ACCESS_KEY_ID_VAR.to_string(), key.clone()));
        }
        if let Some(secret) = &self.secret_access_key {
            env.push((SECRET_ACCESS_KEY_VAR.to_string(), secret.clone()));
        }
        if let Some(token) = &self.session_token {
            env.push((SESSION_TOKEN_VAR.to_string(), token.clone()));
        }
        env.push((REGION_VAR.to_string(), self.region.clone()));
        env
    }
}

impl std::fmt::Debug for AwsSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsSettings")
            .field("access_key_id", &self.access_key_id)
            .field(
                "secret_access_key",
                &self.secret_access_key.as_ref().map(|_| "<redacted>"),
            )
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .field("region", &self.region)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AgentError;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_region_defaults_when_unset_or_blank() {
        let settings = AwsSettings::from_lookup(lookup(&[]));
        assert_eq!(settings.region, "us-east-1");

        let settings = AwsSettings::from_lookup(lookup(&[("AWS_REGION", "  ")]));
        assert_eq!(settings.region, "us-east-1");

        let settings = AwsSettings::from_lookup(lookup(&[("AWS_REGION", "eu-west-1")]));
        assert_eq!(settings.region, "eu-west-1");
    }

    #[test]
    fn test_require_credentials_names_missing_variable() {
        let settings = AwsSettings::from_lookup(lookup(&[("AWS_ACCESS_KEY_ID", "AKIA123")]));
        match settings.require_credentials() {
            Err(AgentError::MissingConfig { key }) => assert_eq!(key, "AWS_SECRET_ACCESS_KEY"),
            other => panic!("unexpected result: {:?}", other),
        }

        let settings = AwsSettings::from_lookup(lookup(&[
            ("AWS_ACCESS_KEY_ID", "AKIA123"),
            ("AWS_SECRET_ACCESS_KEY", "shh"),
        ]));
        assert_eq!(settings.require_credentials().unwrap(), ("AKIA123", "shh"));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let settings = AwsSettings::from_lookup(lookup(&[
            ("AWS_ACCESS_KEY_ID", "AKIA123"),
            ("AWS_SECRET_ACCESS_KEY", "very-secret"),
            ("AWS_SESSION_TOKEN", "token-value"),
        ]));
        let printed = format!("{:?}", settings);
        assert!(printed.contains("AKIA123"));
        assert!(!printed.contains("very-secret"));
        assert!(!printed.contains("token-value"));
    }

    #[test]
    fn test_to_env_always_carries_region() {
        let env = AwsSettings::default().to_env();
        assert_eq!(env, vec![("AWS_REGION".to_string(), "us-east-1".to_string())]);
    }
}
