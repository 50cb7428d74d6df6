use anyhow::{Context, Result};
use std::env;

/// Runtime configuration, all from the environment. Required values are
/// validated up front so a misconfigured deployment fails at startup instead
/// of mid-request.
#[derive(Debug, Clone)]
pub struct Config {
    pub stripe_secret_key: String,
    pub store_endpoint: String,
    pub store_project_id: String,
    pub store_api_key: String,
    pub database_id: String,
    /// Base URL for checkout redirect construction, no trailing slash.
    pub frontend_url: String,
    pub port: u16,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            stripe_secret_key: require("STRIPE_SECRET_KEY")?,
            store_endpoint: require("STORE_ENDPOINT")?,
            store_project_id: require("STORE_PROJECT_ID")?,
            store_api_key: require("STORE_API_KEY")?,
            database_id: require("DATABASE_ID")?,
            frontend_url: require("FRONTEND_URL")?.trim_end_matches('/').to_string(),
            port: env::var("PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(8080),
        })
    }
}

fn require(name: &str) -> Result<String> {
    env::var(name).with_context(|| format!("{name} not set"))
}

#[cfg(test)]
impl Config {
    /// Placeholder configuration for handler tests; the store and gateway are
    /// stubbed there, so only `frontend_url` matters.
    pub fn for_tests() -> Self {
        Self {
            stripe_secret_key: "sk_test_placeholder".to_string(),
            store_endpoint: "http://store.test/v1".to_string(),
            store_project_id: "project".to_string(),
            store_api_key: "key".to_string(),
            database_id: "db".to_string(),
            frontend_url: "https://app.test".to_string(),
            port: 0,
        }
    }
}
