use std::{sync::Arc, time::Duration};

use anyhow::Result;
use geckobot::{
    bot::{self, Command},
    config::Config,
    marketdata::{CoinGeckoClient, MarketData, TtlCache},
};
use log::info;
use teloxide::{prelude::*, utils::command::BotCommands};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::from_env()?;
    let client = CoinGeckoClient::new(
        &config.api_url,
        config.api_key.clone(),
        config.request_timeout,
        config.retry,
    )?;
    let cache = Arc::new(TtlCache::new(config.cache_ttl, config.cache_capacity));
    let market = Arc::new(MarketData::new(Arc::new(client), cache));

    let janitor = market.clone();
    let purge_interval = config.cache_ttl.max(Duration::from_secs(1));
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(purge_interval).await;
            let purged = janitor.purge_expired().await;
            if purged > 0 {
                info!("Purged {} expired cache entries", purged);
            }
        }
    });

    let bot = Bot::new(config.token);
    bot.set_my_commands(Command::bot_commands()).await?;
    info!("Geckobot started, querying {}", config.api_url);

    let handler = Update::filter_message()
        .filter_command::<Command>()
        .endpoint(bot::answer);
    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![market])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
    Ok(())
}
