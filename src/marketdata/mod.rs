mod api;
mod cache;
mod coingecko;
mod lookup;
mod resolver;

pub use api::{LookupError, MarketApi, MarketEntry, PriceRecord, SimplePrice};
pub use cache::TtlCache;
pub use coingecko::{CoinGeckoClient, RetryPolicy, DEFAULT_BASE_URL};
pub use lookup::{CacheKey, Cached, MarketData};
pub use resolver::resolve;
