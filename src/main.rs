//! TTL Cache demo
//!
//! Stores a few entries, shows the cache before and after they expire, then
//! shuts the cache down. Tunables come from the environment (see
//! [`CacheConfig::from_env`]).

use std::time::Duration;

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ttl_cache::{CacheConfig, TtlCache};

#[tokio::main]
async fn main() -> ttl_cache::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ttl_cache=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = CacheConfig::from_env();
    info!(
        "Configuration loaded: sweep_interval={:?}, sweep_batch_size={}, heap={:?}",
        config.sweep_interval, config.sweep_batch_size, config.heap
    );

    let cache: TtlCache<String, Vec<u8>> = TtlCache::with_sweeper(config)?;

    cache.set("a".into(), b"a hi".to_vec(), Duration::from_secs(2));
    cache.set("b".into(), b"b hi".to_vec(), Duration::from_secs(2));
    cache.set("c".into(), b"c hi".to_vec(), Duration::from_secs(20));

    println!("size: {}", cache.len());
    println!("oldest: {:?}", cache.oldest_key());
    println!("keys: {:?}", cache.keys());
    print_entry(&cache, "a");
    print_entry(&cache, "c");

    tokio::time::sleep(Duration::from_secs(2)).await;
    print_entry(&cache, "a");

    for k in 0..=100 {
        cache.set(k.to_string(), b"hi".to_vec(), Duration::from_secs(2));
    }
    for key in cache.keys() {
        print_entry(&cache, &key);
    }

    println!("stats: {:?}", cache.stats());
    cache.shutdown();
    Ok(())
}

fn print_entry(cache: &TtlCache<String, Vec<u8>>, key: &str) {
    match cache.get(&key.to_string()) {
        Some((value, expires_at)) => println!(
            "{} => {} (expires at {})",
            key,
            String::from_utf8_lossy(&value),
            expires_at
        ),
        None => println!("{} not found", key),
    }
}
