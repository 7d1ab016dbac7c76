use crate::error::EngineError;
use crate::market::types::{Candle, Timeframe, SECONDS_TIMESTAMP_THRESHOLD};
use serde::Deserialize;
use std::borrow::Cow;
use std::collections::hash_map::Entry;
use std::collections::HashMap;

const MOCK_BASE_PRICE: f64 = 100.0;
const MOCK_MIN_PRICE: f64 = 0.01;

pub fn candle_bucket_open_time(timestamp_ms: i64, interval_ms: i64) -> i64 {
    if interval_ms <= 0 {
        return timestamp_ms;
    }
    timestamp_ms - timestamp_ms.rem_euclid(interval_ms)
}

/// Returns the series in millisecond resolution, copying only when a rescale is needed.
pub fn normalize_timestamps(raw: &[Candle]) -> Cow<'_, [Candle]> {
    let Some(max_timestamp) = raw.iter().map(|candle| candle.timestamp).max() else {
        return Cow::Borrowed(raw);
    };
    if max_timestamp >= SECONDS_TIMESTAMP_THRESHOLD {
        return Cow::Borrowed(raw);
    }

    Cow::Owned(
        raw.iter()
            .map(|candle| Candle {
                timestamp: candle.timestamp.saturating_mul(1_000),
                ..*candle
            })
            .collect(),
    )
}

/// Collapses a time-ordered raw series into sparse buckets for `timeframe`.
///
/// Open and close come from the first and last candle seen for a bucket in input
/// order; the resulting buckets are sorted ascending by their open time.
pub fn aggregate(raw: &[Candle], timeframe: Timeframe) -> Vec<Candle> {
    if raw.is_empty() {
        return Vec::new();
    }

    let normalized = normalize_timestamps(raw);
    let interval_ms = timeframe.duration_ms();
    let mut bucket_index: HashMap<i64, usize> = HashMap::new();
    let mut buckets: Vec<Candle> = Vec::new();

    for candle in normalized.iter() {
        let bucket_open = candle_bucket_open_time(candle.timestamp, interval_ms);
        match bucket_index.entry(bucket_open) {
            Entry::Occupied(slot) => buckets[*slot.get()].merge(candle),
            Entry::Vacant(slot) => {
                slot.insert(buckets.len());
                buckets.push(Candle {
                    timestamp: bucket_open,
                    ..*candle
                });
            }
        }
    }

    buckets.sort_unstable_by_key(|bucket| bucket.timestamp);
    buckets
}

#[derive(Debug, Deserialize)]
pub struct CandleWire {
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl TryFrom<CandleWire> for Candle {
    type Error = EngineError;

    fn try_from(value: CandleWire) -> Result<Self, Self::Error> {
        if !value.open.is_finite()
            || !value.high.is_finite()
            || !value.low.is_finite()
            || !value.close.is_finite()
            || !value.volume.is_finite()
        {
            return Err(EngineError::InvalidArgument(
                "candle values must be finite".to_string(),
            ));
        }
        if value.volume < 0.0 {
            return Err(EngineError::InvalidArgument(
                "candle volume must be non-negative".to_string(),
            ));
        }

        Ok(Candle::new(
            value.timestamp,
            value.open,
            value.high,
            value.low,
            value.close,
            value.volume,
        ))
    }
}

pub fn parse_candles_payload(payload: &mut [u8]) -> Result<Vec<Candle>, EngineError> {
    let wire: Vec<CandleWire> = simd_json::serde::from_slice(payload)?;
    wire.into_iter().map(Candle::try_from).collect()
}

pub fn build_mock_series(count: usize, interval_ms: i64, end_ms: i64) -> Vec<Candle> {
    let aligned_end = candle_bucket_open_time(end_ms, interval_ms);
    let span = i64::try_from(count)
        .unwrap_or(i64::MAX)
        .saturating_mul(interval_ms);
    let start = aligned_end.saturating_sub(span);
    let mut candles = Vec::with_capacity(count);
    let mut price = MOCK_BASE_PRICE;

    for step in 0..count {
        let offset = i64::try_from(step)
            .unwrap_or(i64::MAX)
            .saturating_mul(interval_ms);
        let open_time = start.saturating_add(offset);
        let drift = ((step % 7) as f64 - 3.0) * 0.021;
        let open = price;
        let close = (open + drift).max(MOCK_MIN_PRICE);
        let high = open.max(close) * 1.0125;
        let low = open.min(close) * 0.989;
        let volume = 2.0 + (step % 5) as f64 * 0.3;
        candles.push(Candle::new(open_time, open, high, low, close, volume));
        price = close;
    }

    candles
}
