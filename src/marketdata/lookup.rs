use std::{collections::HashMap, fmt, sync::Arc};

use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, Shared};
use log::{debug, info, warn};
use tokio::sync::Mutex;

use super::api::{LookupError, MarketApi, MarketEntry, PriceRecord};
use super::cache::TtlCache;
use super::resolver::resolve;

/// Key of a cached lookup. Each variant renders with its own prefix so the
/// price and top-list namespaces never collide in the shared store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    Price(String),
    Top(u32),
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKey::Price(symbol) => write!(f, "price:{}", symbol),
            CacheKey::Top(limit) => write!(f, "top:{}", limit),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Cached {
    Price(PriceRecord),
    Top(Arc<Vec<MarketEntry>>),
}

type Pending = Shared<BoxFuture<'static, Result<Cached, LookupError>>>;

/// Price and top-list lookups over a [`MarketApi`], backed by a shared
/// [`TtlCache`]. At most one upstream request per cache key is in flight;
/// concurrent callers for that key wait on it and share its result.
pub struct MarketData {
    api: Arc<dyn MarketApi>,
    cache: Arc<TtlCache<Cached>>,
    pending: Arc<Mutex<HashMap<String, Pending>>>,
}

impl MarketData {
    pub fn new(api: Arc<dyn MarketApi>, cache: Arc<TtlCache<Cached>>) -> MarketData {
        MarketData {
            api,
            cache,
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Soft variant of [`MarketData::lookup_price`]: failures are logged and
    /// reported as `None`.
    pub async fn get_price(&self, symbol: &str) -> Option<PriceRecord> {
        match self.lookup_price(symbol).await {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("Price lookup for {:?} failed: {}", symbol, e);
                None
            }
        }
    }

    pub async fn lookup_price(&self, symbol: &str) -> Result<PriceRecord, LookupError> {
        let symbol = symbol.trim().to_uppercase();
        if symbol.is_empty() {
            return Err(LookupError::NotFound("empty symbol".to_owned()));
        }
        let id = resolve(&symbol);
        let key = CacheKey::Price(symbol.clone());
        let api = self.api.clone();
        let cached = self
            .fetch_coalesced(key, move || {
                async move { fetch_price(api.as_ref(), id, symbol).await.map(Cached::Price) }.boxed()
            })
            .await?;
        match cached {
            Cached::Price(record) => Ok(record),
            Cached::Top(_) => Err(LookupError::Malformed(
                "price key holds a top list".to_owned(),
            )),
        }
    }

    /// Soft variant of [`MarketData::lookup_top_list`]: failures are logged
    /// and reported as an empty list.
    pub async fn get_top_list(&self, limit: u32) -> Arc<Vec<MarketEntry>> {
        match self.lookup_top_list(limit).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Top {} lookup failed: {}", limit, e);
                Arc::default()
            }
        }
    }

    /// Top `limit` coins by market cap, in upstream order. `limit` is
    /// forwarded as is; range checks belong to the caller.
    pub async fn lookup_top_list(&self, limit: u32) -> Result<Arc<Vec<MarketEntry>>, LookupError> {
        let api = self.api.clone();
        let cached = self
            .fetch_coalesced(CacheKey::Top(limit), move || {
                async move {
                    info!("Fetching top {} coins", limit);
                    let entries = api.markets(limit).await?;
                    info!("Fetched {} market entries", entries.len());
                    Ok(Cached::Top(Arc::new(entries)))
                }
                .boxed()
            })
            .await?;
        match cached {
            Cached::Top(entries) => Ok(entries),
            Cached::Price(_) => Err(LookupError::Malformed(
                "top-list key holds a price".to_owned(),
            )),
        }
    }

    pub async fn purge_expired(&self) -> usize {
        self.cache.purge_expired().await
    }

    async fn fetch_coalesced<F>(&self, key: CacheKey, fetch: F) -> Result<Cached, LookupError>
    where
        F: FnOnce() -> BoxFuture<'static, Result<Cached, LookupError>>,
    {
        let key = key.to_string();
        if let Some(hit) = self.cache.get(&key).await {
            debug!("Using cached data for {}", key);
            return Ok(hit);
        }

        let request = {
            let mut pending = self.pending.lock().await;
            // A request may have completed between the miss above and taking the lock.
            if let Some(hit) = self.cache.get(&key).await {
                return Ok(hit);
            }
            match pending.get(&key) {
                Some(request) => {
                    debug!("Joining in-flight request for {}", key);
                    request.clone()
                }
                None => {
                    let cache = self.cache.clone();
                    let in_flight = self.pending.clone();
                    let cache_key = key.clone();
                    let upstream = fetch();
                    // Runs to completion even when every caller has gone away.
                    let task = tokio::spawn(async move {
                        let res = upstream.await;
                        if let Ok(ref value) = res {
                            cache.insert(cache_key.clone(), value.clone()).await;
                        }
                        in_flight.lock().await.remove(&cache_key);
                        res
                    });
                    let request = async move {
                        task.await.unwrap_or_else(|e| {
                            Err(LookupError::Unavailable(format!("request task failed: {}", e)))
                        })
                    }
                    .boxed()
                    .shared();
                    pending.insert(key.clone(), request.clone());
                    request
                }
            }
        };

        request.await
    }
}

async fn fetch_price(
    api: &dyn MarketApi,
    id: String,
    symbol: String,
) -> Result<PriceRecord, LookupError> {
    info!("Fetching price for {} ({})", symbol, id);
    let mut prices = api.simple_price(&id).await?;
    let price = prices.remove(&id).ok_or_else(|| {
        LookupError::NotFound(format!(
            "{} (id {}), available: {:?}",
            symbol,
            id,
            prices.keys().collect::<Vec<_>>()
        ))
    })?;
    let current_price = price
        .usd
        .ok_or_else(|| LookupError::Malformed(format!("no usd price for {}", id)))?;
    info!("{} price: ${}", symbol, current_price);
    Ok(PriceRecord {
        id,
        name: symbol.clone(),
        symbol,
        current_price,
        price_change_percentage_24h: price.usd_24h_change.unwrap_or(0.0),
        market_cap: price.usd_market_cap,
        last_updated: Utc::now(),
    })
}
