/// Well-known tickers whose CoinGecko id differs from the lower-cased ticker.
const KNOWN_IDS: &[(&str, &str)] = &[
    ("btc", "bitcoin"),
    ("eth", "ethereum"),
    ("ada", "cardano"),
    ("bnb", "binancecoin"),
    ("sol", "solana"),
    ("matic", "polygon-ecosystem-token"),
    ("dot", "polkadot"),
    ("avax", "avalanche-2"),
    ("ltc", "litecoin"),
    ("atom", "cosmos"),
    ("link", "chainlink"),
    ("doge", "dogecoin"),
];

/// Maps a ticker such as `BTC` to the upstream coin id (`bitcoin`).
///
/// Unknown tickers fall back to their lower-cased form, on the assumption that
/// the upstream id space overlaps the ticker space for most coins.
pub fn resolve(symbol: &str) -> String {
    let symbol = symbol.trim().to_ascii_lowercase();
    KNOWN_IDS
        .iter()
        .find(|(ticker, _)| *ticker == symbol)
        .map(|(_, id)| (*id).to_owned())
        .unwrap_or(symbol)
}
