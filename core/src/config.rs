//! Client configuration resolved from the environment.
//!
//! Precedence for the base URL: `SMARTWASTE_API_URL`, then the deployment
//! derived from `SMARTWASTE_DEPLOYMENT_HOST`, then the local default.

use std::env;
use std::time::Duration;

use thiserror::Error;
use url::Url;

pub const ENV_API_URL: &str = "SMARTWASTE_API_URL";
pub const ENV_DEPLOYMENT_HOST: &str = "SMARTWASTE_DEPLOYMENT_HOST";
pub const ENV_TIMEOUT_SECS: &str = "SMARTWASTE_API_TIMEOUT_SECS";
pub const ENV_MAX_CONCURRENT: &str = "SMARTWASTE_MAX_CONCURRENT_REQUESTS";

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 5;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid base URL '{value}': {reason}")]
    InvalidBaseUrl { value: String, reason: String },

    #[error("invalid value for {key}: '{value}'")]
    InvalidNumber { key: &'static str, value: String },

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },
}

/// Where the API is hosted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deployment {
    Local,
    Staging,
    Production,
}

impl Deployment {
    pub fn from_host(host: &str) -> Self {
        let host = host.trim().to_ascii_lowercase();
        if host == "localhost" || host == "127.0.0.1" {
            Deployment::Local
        } else if host.contains("staging") {
            Deployment::Staging
        } else {
            Deployment::Production
        }
    }

    pub fn base_url(self) -> &'static str {
        match self {
            Deployment::Local => "http://localhost:3000/api",
            Deployment::Staging => "https://staging-api.smartwaste.com/api",
            Deployment::Production => "https://api.smartwaste.com/api",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub base_url: Url,
    /// Deadline for one round trip, including reading the body.
    pub timeout: Duration,
    /// Cap used by `ApiClient::batch`.
    pub max_concurrent_requests: usize,
}

impl ClientConfig {
    pub fn new(base_url: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            base_url: parse_base_url(base_url)?,
            timeout: DEFAULT_TIMEOUT,
            max_concurrent_requests: DEFAULT_MAX_CONCURRENT_REQUESTS,
        })
    }

    pub fn for_deployment(deployment: Deployment) -> Result<Self, ConfigError> {
        Self::new(deployment.base_url())
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, ConfigError> {
        if timeout.is_zero() {
            return Err(ConfigError::Zero { field: "timeout" });
        }
        self.timeout = timeout;
        Ok(self)
    }

    pub fn with_max_concurrent_requests(mut self, limit: usize) -> Result<Self, ConfigError> {
        if limit == 0 {
            return Err(ConfigError::Zero {
                field: "max_concurrent_requests",
            });
        }
        self.max_concurrent_requests = limit;
        Ok(self)
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as `from_env`, reading variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match lookup(ENV_API_URL).filter(|v| !v.trim().is_empty()) {
            Some(url) => Self::new(url.trim())?,
            None => {
                let deployment = lookup(ENV_DEPLOYMENT_HOST)
                    .map(|host| Deployment::from_host(&host))
                    .unwrap_or(Deployment::Local);
                Self::for_deployment(deployment)?
            }
        };

        if let Some(raw) = lookup(ENV_TIMEOUT_SECS) {
            let secs = parse_number(ENV_TIMEOUT_SECS, &raw)?;
            config = config.with_timeout(Duration::from_secs(secs))?;
        }
        if let Some(raw) = lookup(ENV_MAX_CONCURRENT) {
            let limit = parse_number(ENV_MAX_CONCURRENT, &raw)?;
            let limit = usize::try_from(limit).map_err(|_| ConfigError::InvalidNumber {
                key: ENV_MAX_CONCURRENT,
                value: raw.clone(),
            })?;
            config = config.with_max_concurrent_requests(limit)?;
        }
        Ok(config)
    }
}

fn parse_number(key: &'static str, raw: &str) -> Result<u64, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidNumber {
        key,
        value: raw.to_string(),
    })
}

fn parse_base_url(input: &str) -> Result<Url, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidBaseUrl {
        value: input.to_string(),
        reason,
    };
    let url = Url::parse(input).map_err(|e| invalid(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme '{}'", url.scheme())));
    }
    if url.cannot_be_a_base() {
        return Err(invalid("URL cannot be a base".to_string()));
    }
    Ok(url)
}
