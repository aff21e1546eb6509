use std::{collections::HashMap, future::Future, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use log::{info, warn};
use reqwest::{header::ACCEPT, Client, ClientBuilder};
use serde::de::DeserializeOwned;

use super::api::{LookupError, MarketApi, MarketEntry, SimplePrice};

pub const DEFAULT_BASE_URL: &str = "https://api.coingecko.com/api/v3";

/// How many times a failed upstream call is retried, and the first delay.
/// The delay doubles after every attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub async fn run<T, F, Fut>(&self, what: &str, mut attempt: F) -> Result<T, LookupError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LookupError>>,
    {
        let mut delay = self.backoff;
        let mut retries = 0;
        loop {
            match attempt().await {
                Err(e) if e.is_retryable() && retries < self.max_retries => {
                    retries += 1;
                    warn!(
                        "{}: {}, retry {}/{} in {:?}",
                        what, e, retries, self.max_retries, delay
                    );
                    tokio::time::sleep(delay).await;
                    delay = next_delay(delay);
                }
                res => return res,
            }
        }
    }
}

fn next_delay(delay: Duration) -> Duration {
    delay.saturating_mul(2)
}

fn http_client(timeout: Duration) -> ClientBuilder {
    Client::builder()
        .user_agent(concat!("Geckobot/", env!("CARGO_PKG_VERSION")))
        .timeout(timeout)
}

pub struct CoinGeckoClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    retry: RetryPolicy,
}

impl CoinGeckoClient {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<CoinGeckoClient> {
        let client = http_client(timeout).build()?;
        Ok(CoinGeckoClient {
            client,
            base_url: base_url.trim_end_matches('/').to_owned(),
            api_key,
            retry,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, LookupError> {
        let mut request = self
            .client
            .get(self.url(path))
            .query(query)
            .header(ACCEPT, "application/json");
        if let Some(ref key) = self.api_key {
            request = request.header("x-cg-demo-api-key", key);
        }
        let resp_payload = request
            .send()
            .await
            .map_err(|e| LookupError::Unavailable(e.to_string()))?;
        let status = resp_payload.status();
        info!("CoinGecko {} response code: {}", path, status);
        if !status.is_success() {
            return Err(LookupError::Unavailable(format!("{} returned {}", path, status)));
        }
        let body = resp_payload
            .text()
            .await
            .map_err(|e| LookupError::Unavailable(e.to_string()))?;
        serde_json::from_str(&body).map_err(|e| LookupError::Malformed(format!("{}: {}", path, e)))
    }
}

#[async_trait]
impl MarketApi for CoinGeckoClient {
    async fn simple_price(&self, id: &str) -> Result<HashMap<String, SimplePrice>, LookupError> {
        let query = [
            ("ids", id.to_owned()),
            ("vs_currencies", "usd".to_owned()),
            ("include_24hr_change", "true".to_owned()),
            ("include_market_cap", "true".to_owned()),
        ];
        self.retry
            .run("CoinGecko simple price", || self.get_json("/simple/price", &query))
            .await
    }

    async fn markets(&self, limit: u32) -> Result<Vec<MarketEntry>, LookupError> {
        let query = [
            ("vs_currency", "usd".to_owned()),
            ("order", "market_cap_desc".to_owned()),
            ("per_page", limit.to_string()),
            ("page", "1".to_owned()),
            ("sparkline", "false".to_owned()),
            ("price_change_percentage", "24h".to_owned()),
        ];
        self.retry
            .run("CoinGecko markets", || self.get_json("/coins/markets", &query))
            .await
    }
}
