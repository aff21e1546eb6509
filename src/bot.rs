use std::{sync::Arc, time::Duration};

use chrono::Utc;
use log::{info, warn};
use pretty_duration::pretty_duration;
use rust_decimal::{prelude::FromPrimitive, Decimal};
use teloxide::{
    payloads::SendMessageSetters,
    prelude::*,
    types::ParseMode,
    utils::{command::BotCommands, html},
};

use crate::marketdata::{LookupError, MarketData, MarketEntry, PriceRecord};

pub const DEFAULT_TOP_LIMIT: u32 = 10;
pub const MAX_TOP_LIMIT: u32 = 100;

#[derive(BotCommands, Clone, Debug, PartialEq)]
#[command(rename_rule = "lowercase", description = "Crypto prices from CoinGecko:")]
pub enum Command {
    #[command(description = "show this message.")]
    Help,
    #[command(description = "price of a coin, e.g. /price BTC")]
    Price(String),
    #[command(description = "top coins by market cap, e.g. /top 5")]
    Top(String),
}

pub async fn answer(
    bot: Bot,
    msg: Message,
    cmd: Command,
    market: Arc<MarketData>,
) -> ResponseResult<()> {
    info!("Chat {}: {:?}", msg.chat.id, cmd);
    let reply = match cmd {
        Command::Help => html::escape(&Command::descriptions().to_string()),
        Command::Price(symbol) => price_reply(&market, &symbol).await,
        Command::Top(limit) => top_reply(&market, &limit).await,
    };
    bot.send_message(msg.chat.id, reply)
        .parse_mode(ParseMode::Html)
        .await?;
    Ok(())
}

pub async fn price_reply(market: &MarketData, symbol: &str) -> String {
    let symbol = symbol.trim().to_uppercase();
    if symbol.is_empty() {
        return "Please specify a cryptocurrency symbol. Example: /price BTC".to_owned();
    }
    match market.lookup_price(&symbol).await {
        Ok(record) => format_price(&record),
        Err(LookupError::NotFound(_)) => format!(
            "❌ Could not find price data for {}. Please check the symbol and try again.",
            html::escape(&symbol)
        ),
        Err(e) => {
            warn!("Price for {}: {}", symbol, e);
            "❌ Sorry, there was an error fetching the price data. Please try again later."
                .to_owned()
        }
    }
}

pub async fn top_reply(market: &MarketData, arg: &str) -> String {
    let limit = match parse_top_limit(arg) {
        Some(limit) => limit,
        None => {
            return format!(
                "Please specify a limit between 1 and {}. Example: /top 5",
                MAX_TOP_LIMIT
            )
        }
    };
    match market.lookup_top_list(limit).await {
        Ok(entries) if !entries.is_empty() => format!(
            "<b>🏆 Top {} Cryptocurrencies</b>\n<pre>{}</pre>",
            limit,
            html::escape(&format_top_table(&entries))
        ),
        Ok(_) => "❌ Could not fetch top cryptocurrencies. Please try again later.".to_owned(),
        Err(e) => {
            warn!("Top {}: {}", limit, e);
            "❌ Could not fetch top cryptocurrencies. Please try again later.".to_owned()
        }
    }
}

/// Only the leading integer counts, so `5abc` is 5 and `3.7` is 3.
/// No digits at all (and zero) mean the default limit; anything else must
/// fall within `1..=MAX_TOP_LIMIT`.
pub fn parse_top_limit(arg: &str) -> Option<u32> {
    let arg = arg.trim();
    let unsigned = arg.trim_start_matches(['+', '-']);
    let sign_len = arg.len() - unsigned.len();
    if sign_len > 1 {
        return Some(DEFAULT_TOP_LIMIT);
    }
    let digits = unsigned
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(unsigned.len());
    if digits == 0 {
        return Some(DEFAULT_TOP_LIMIT);
    }
    // Too many digits for an i64 is out of range all the same.
    let limit = arg[..sign_len + digits].parse::<i64>().ok()?;
    match limit {
        0 => Some(DEFAULT_TOP_LIMIT),
        n if (1..=MAX_TOP_LIMIT as i64).contains(&n) => Some(n as u32),
        _ => None,
    }
}

pub fn format_price(record: &PriceRecord) -> String {
    let age = (Utc::now() - record.last_updated)
        .to_std()
        .unwrap_or_default();
    format!(
        "<b>{} ({})</b>\nCurrent Price: {}\n24h Change: {}\nMarket Cap: {}\n<i>Updated {}</i>",
        html::escape(&record.name),
        html::escape(&record.symbol),
        format_usd(record.current_price, price_decimals(record.current_price)),
        format_change(record.price_change_percentage_24h),
        record
            .market_cap
            .filter(|cap| *cap > 0.0)
            .map(|cap| format_usd(cap, 0))
            .unwrap_or_else(|| "N/A".to_owned()),
        format_age(age),
    )
}

pub fn format_top_table(entries: &[MarketEntry]) -> String {
    let mut table = String::from("Rank | Symbol | Name                 | Price       | 24h Change\n");
    table.push_str("-----|--------|----------------------|-------------|-----------\n");
    for (i, entry) in entries.iter().enumerate() {
        let name: String = entry.name.chars().take(20).collect();
        let price = entry
            .current_price
            .map(|p| format!("{:.2}", p))
            .unwrap_or_else(|| "-".to_owned());
        let change = entry
            .price_change_percentage_24h
            .map(|c| format!("{:+.2}%", c))
            .unwrap_or_else(|| "-".to_owned());
        table.push_str(&format!(
            "{:>4} | {:<6} | {:<20} | ${:>10} | {:>10}\n",
            i + 1,
            entry.symbol.to_uppercase(),
            name,
            price,
            change
        ));
    }
    table
}

fn price_decimals(price: f64) -> u32 {
    if price.abs() < 1.0 {
        6
    } else {
        2
    }
}

/// `$` amount rounded to `dp` places with thousands separators.
pub fn format_usd(value: f64, dp: u32) -> String {
    let text = match Decimal::from_f64(value) {
        Some(d) => format!("{:.*}", dp as usize, d.round_dp(dp)),
        None => return format!("${}", value),
    };
    let (sign, digits) = match text.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", text.as_str()),
    };
    let (int, frac) = match digits.split_once('.') {
        Some((int, frac)) => (int, Some(frac)),
        None => (digits, None),
    };
    let mut grouped = String::with_capacity(int.len() + int.len() / 3);
    for (i, c) in int.chars().enumerate() {
        if i > 0 && (int.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    match frac {
        Some(frac) => format!("{}${}.{}", sign, grouped, frac),
        None => format!("{}${}", sign, grouped),
    }
}

pub fn format_change(pct: f64) -> String {
    let marker = if pct >= 0.0 { "📈" } else { "📉" };
    format!("{} {:+.2}%", marker, pct)
}

fn format_age(age: Duration) -> String {
    if age < Duration::from_secs(1) {
        "just now".to_owned()
    } else {
        format!(
            "{} ago",
            pretty_duration(&Duration::from_secs(age.as_secs()), None)
        )
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, HashMap};

    use async_trait::async_trait;

    use super::*;
    use crate::marketdata::{MarketApi, SimplePrice, TtlCache};

    struct StaticApi {
        result: Result<(), LookupError>,
    }

    #[async_trait]
    impl MarketApi for StaticApi {
        async fn simple_price(
            &self,
            id: &str,
        ) -> Result<HashMap<String, SimplePrice>, LookupError> {
            self.result.clone()?;
            let mut prices = HashMap::new();
            if id == "bitcoin" {
                prices.insert(
                    id.to_owned(),
                    SimplePrice {
                        usd: Some(50000.0),
                        usd_24h_change: Some(2.5),
                        usd_market_cap: Some(1e12),
                    },
                );
            }
            Ok(prices)
        }

        async fn markets(&self, limit: u32) -> Result<Vec<MarketEntry>, LookupError> {
            self.result.clone()?;
            Ok((0..limit)
                .map(|i| MarketEntry {
                    id: format!("coin-{}", i),
                    symbol: format!("c{}", i),
                    name: format!("Coin {}", i),
                    current_price: Some(100.0 / (i + 1) as f64),
                    price_change_percentage_24h: Some(-0.5),
                    market_cap: None,
                    market_cap_rank: Some(i + 1),
                    other: BTreeMap::new(),
                })
                .collect())
        }
    }

    fn market(result: Result<(), LookupError>) -> MarketData {
        MarketData::new(
            Arc::new(StaticApi { result }),
            Arc::new(TtlCache::new(Duration::from_secs(300), 16)),
        )
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            Command::parse("/price btc", "geckobot").unwrap(),
            Command::Price("btc".to_owned())
        );
        assert_eq!(
            Command::parse("/top 5", "geckobot").unwrap(),
            Command::Top("5".to_owned())
        );
        assert_eq!(Command::parse("/help", "geckobot").unwrap(), Command::Help);
    }

    #[test]
    fn test_parse_top_limit() {
        assert_eq!(parse_top_limit(""), Some(10));
        assert_eq!(parse_top_limit("abc"), Some(10));
        assert_eq!(parse_top_limit("0"), Some(10));
        assert_eq!(parse_top_limit(" 5 "), Some(5));
        assert_eq!(parse_top_limit("100"), Some(100));
        assert_eq!(parse_top_limit("101"), None);
        assert_eq!(parse_top_limit("-3"), None);
    }

    #[test]
    fn test_parse_top_limit_leading_integer() {
        assert_eq!(parse_top_limit("5abc"), Some(5));
        assert_eq!(parse_top_limit("3.7"), Some(3));
        assert_eq!(parse_top_limit("+5"), Some(5));
        assert_eq!(parse_top_limit("-"), Some(10));
        assert_eq!(parse_top_limit("--5"), Some(10));
        assert_eq!(parse_top_limit("-0"), Some(10));
        assert_eq!(parse_top_limit("0x20"), Some(10));
        assert_eq!(parse_top_limit("200 coins"), None);
        assert_eq!(parse_top_limit("99999999999999999999"), None);
    }

    #[test]
    fn test_format_usd() {
        assert_eq!(format_usd(50000.0, 2), "$50,000.00");
        assert_eq!(format_usd(1234567.891, 2), "$1,234,567.89");
        assert_eq!(format_usd(999.0, 2), "$999.00");
        assert_eq!(format_usd(1e12, 0), "$1,000,000,000,000");
        assert_eq!(format_usd(-1500.5, 2), "-$1,500.50");
        assert_eq!(format_usd(0.000123, 6), "$0.000123");
    }

    #[test]
    fn test_format_change() {
        assert_eq!(format_change(2.5), "📈 +2.50%");
        assert_eq!(format_change(-1.234), "📉 -1.23%");
        assert_eq!(format_change(0.0), "📈 +0.00%");
    }

    #[test]
    fn test_format_age() {
        assert_eq!(format_age(Duration::from_millis(400)), "just now");
        assert!(format_age(Duration::from_secs(125)).ends_with(" ago"));
    }

    #[test]
    fn test_format_price_without_market_cap() {
        let record = PriceRecord {
            id: "xyz".to_owned(),
            symbol: "XYZ".to_owned(),
            name: "XYZ".to_owned(),
            current_price: 12.0,
            price_change_percentage_24h: -3.0,
            market_cap: None,
            last_updated: Utc::now(),
        };
        let text = format_price(&record);
        assert!(text.starts_with("<b>XYZ (XYZ)</b>"));
        assert!(text.contains("Current Price: $12.00"));
        assert!(text.contains("24h Change: 📉 -3.00%"));
        assert!(text.contains("Market Cap: N/A"));
        assert!(text.ends_with("<i>Updated just now</i>"));
    }

    #[test]
    fn test_top_table_layout() {
        let entries = vec![MarketEntry {
            id: "a-very-long-named-coin".to_owned(),
            symbol: "avl".to_owned(),
            name: "A Very Long Named Coin Indeed".to_owned(),
            current_price: Some(1.5),
            price_change_percentage_24h: None,
            market_cap: None,
            market_cap_rank: None,
            other: BTreeMap::new(),
        }];
        let table = format_top_table(&entries);
        let lines: Vec<_> = table.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(
            lines[2],
            "   1 | AVL    | A Very Long Named Co | $      1.50 |          -"
        );
    }

    #[tokio::test]
    async fn test_price_reply() {
        let text = price_reply(&market(Ok(())), "btc").await;
        assert!(text.contains("<b>BTC (BTC)</b>"));
        assert!(text.contains("$50,000.00"));
        assert!(text.contains("+2.50%"));
        assert!(text.contains("$1,000,000,000,000"));
    }

    #[tokio::test]
    async fn test_price_reply_errors() {
        assert!(price_reply(&market(Ok(())), "  ").await.starts_with("Please specify"));
        assert!(price_reply(&market(Ok(())), "<xyz>")
            .await
            .contains("Could not find price data for &lt;XYZ&gt;"));
        let down = market(Err(LookupError::Unavailable("HTTP 503".into())));
        assert!(price_reply(&down, "btc").await.contains("Please try again later"));
    }

    #[tokio::test]
    async fn test_top_reply() {
        let text = top_reply(&market(Ok(())), "3").await;
        assert!(text.starts_with("<b>🏆 Top 3 Cryptocurrencies</b>\n<pre>"));
        assert!(text.contains("C0"));
        assert!(text.contains("C2"));
        assert!(!text.contains("C3"));

        assert!(top_reply(&market(Ok(())), "250").await.contains("between 1 and 100"));
        let down = market(Err(LookupError::Unavailable("HTTP 503".into())));
        assert!(top_reply(&down, "").await.contains("Could not fetch"));
    }
}
