//! Shared application state.

use std::time::Duration;

use crate::config::Config;
use crate::error::ConfigError;

/// Read-only state handed to every request. Built once before the listener
/// starts.
#[derive(Debug, Clone)]
pub struct AppState {
    pub config: Config,
    /// Pooled client for the admin backend. Never follows redirects, so
    /// `Location` headers reach the rewriter untouched.
    pub client: reqwest::Client,
}

impl AppState {
    pub fn new(config: Config) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .no_proxy()
            .connect_timeout(config.upstream_connect_timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(ConfigError::HttpClient)?;
        Ok(Self { config, client })
    }
}
