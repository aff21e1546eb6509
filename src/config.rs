use std::{env, str::FromStr, time::Duration};

use anyhow::{anyhow, Context, Result};

use crate::marketdata::{RetryPolicy, DEFAULT_BASE_URL};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub token: String,
    pub api_url: String,
    pub api_key: Option<String>,
    pub cache_ttl: Duration,
    pub cache_capacity: usize,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Config {
    pub fn from_env() -> Result<Config> {
        Config::from_vars(|name| env::var(name).ok())
    }

    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Config> {
        let token = var("GECKOBOT_TOKEN").ok_or(anyhow!("GECKOBOT_TOKEN is not set"))?;
        Ok(Config {
            token,
            api_url: var("GECKOBOT_API_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_owned()),
            api_key: var("GECKOBOT_API_KEY").filter(|key| !key.is_empty()),
            cache_ttl: Duration::from_secs(parse_var(&var, "GECKOBOT_CACHE_TTL_SECS", 300)?),
            cache_capacity: parse_var(&var, "GECKOBOT_CACHE_CAPACITY", 1024)?,
            request_timeout: Duration::from_secs(parse_var(&var, "GECKOBOT_TIMEOUT_SECS", 10)?),
            retry: RetryPolicy {
                max_retries: parse_var(&var, "GECKOBOT_MAX_RETRIES", 2)?,
                backoff: Duration::from_millis(parse_var(&var, "GECKOBOT_RETRY_BACKOFF_MS", 500)?),
            },
        })
    }
}

fn parse_var<T>(var: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match var(name) {
        Some(value) => value
            .trim()
            .parse()
            .with_context(|| format!("Invalid value for {}: {:?}", name, value)),
        None => Ok(default),
    }
}
