use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

/// Upstream market-data endpoints the lookup layer depends on.
#[async_trait]
pub trait MarketApi: Sync + Send {
    /// `/simple/price` for a single coin id, keyed by id.
    async fn simple_price(&self, id: &str) -> Result<HashMap<String, SimplePrice>, LookupError>;

    /// `/coins/markets`, first page of `limit` rows by descending market cap.
    async fn markets(&self, limit: u32) -> Result<Vec<MarketEntry>, LookupError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LookupError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("upstream unavailable: {0}")]
    Unavailable(String),
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl LookupError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, LookupError::Unavailable(_))
    }
}

/// One value of the `/simple/price` response object.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SimplePrice {
    pub usd: Option<f64>,
    pub usd_24h_change: Option<f64>,
    pub usd_market_cap: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRecord {
    pub id: String,
    pub symbol: String,
    /// Same as `symbol`: the simple price endpoint carries no display name.
    pub name: String,
    pub current_price: f64,
    pub price_change_percentage_24h: f64,
    pub market_cap: Option<f64>,
    pub last_updated: DateTime<Utc>,
}

/// A `/coins/markets` row. Fields not modelled here are kept in `other`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketEntry {
    pub id: String,
    pub symbol: String,
    pub name: String,
    pub current_price: Option<f64>,
    pub price_change_percentage_24h: Option<f64>,
    pub market_cap: Option<f64>,
    pub market_cap_rank: Option<u32>,
    #[serde(flatten)]
    pub other: BTreeMap<String, JsonValue>,
}
