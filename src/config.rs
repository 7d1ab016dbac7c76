use crate::market::types::{DEFAULT_POLL_INTERVAL_MS, DEFAULT_TICK_INTERVAL_MS};

pub const TICK_INTERVAL_ENV: &str = "KLINE_TICK_INTERVAL_MS";
pub const POLL_INTERVAL_ENV: &str = "KLINE_SYNC_POLL_MS";

fn parse_interval_override(raw: Option<String>) -> Option<u64> {
    raw.map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .and_then(|value| value.parse::<u64>().ok())
}

pub fn resolve_tick_interval_ms() -> u64 {
    parse_interval_override(std::env::var(TICK_INTERVAL_ENV).ok())
        .unwrap_or(DEFAULT_TICK_INTERVAL_MS)
}

pub fn resolve_poll_interval_ms() -> u64 {
    parse_interval_override(std::env::var(POLL_INTERVAL_ENV).ok())
        .unwrap_or(DEFAULT_POLL_INTERVAL_MS)
}
