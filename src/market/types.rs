use crate::config::{resolve_poll_interval_ms, resolve_tick_interval_ms};
use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

pub const DEFAULT_TIMEFRAME: Timeframe = Timeframe::M1;
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 2_000;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 300;
pub const DEFAULT_POLL_FALLBACK: bool = true;
pub const DEFAULT_MIN_PRICE: f64 = 1e-8;
pub const DEFAULT_MIN_VOLUME: f64 = 0.0;
pub const DEFAULT_PRICE_STEP_FRACTION: f64 = 0.01;
pub const DEFAULT_VOLUME_JITTER: (f64, f64) = (0.9, 1.1);
pub const DEFAULT_VISIBILITY_THRESHOLD: f64 = 0.3;
pub const MIN_TICK_INTERVAL_MS: u64 = 50;
pub const MAX_TICK_INTERVAL_MS: u64 = 60_000;
pub const MIN_POLL_INTERVAL_MS: u64 = 16;
pub const MAX_POLL_INTERVAL_MS: u64 = 5_000;
pub const MAX_PRICE_STEP_FRACTION: f64 = 0.5;

/// Inputs whose largest timestamp is below this are treated as epoch seconds.
pub const SECONDS_TIMESTAMP_THRESHOLD: i64 = 1_000_000_000_000;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "3m")]
    M3,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1d")]
    D1,
    #[serde(rename = "3d")]
    D3,
    #[serde(rename = "5d")]
    D5,
    #[serde(rename = "1w")]
    W1,
    #[serde(rename = "3w")]
    W3,
    #[serde(rename = "1M")]
    Mo1,
    #[serde(rename = "3M")]
    Mo3,
}

impl Timeframe {
    pub const ALL: [Timeframe; 13] = [
        Self::M1,
        Self::M3,
        Self::M5,
        Self::M15,
        Self::H1,
        Self::H4,
        Self::D1,
        Self::D3,
        Self::D5,
        Self::W1,
        Self::W3,
        Self::Mo1,
        Self::Mo3,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::M1 => "1m",
            Self::M3 => "3m",
            Self::M5 => "5m",
            Self::M15 => "15m",
            Self::H1 => "1h",
            Self::H4 => "4h",
            Self::D1 => "1d",
            Self::D3 => "3d",
            Self::D5 => "5d",
            Self::W1 => "1w",
            Self::W3 => "3w",
            Self::Mo1 => "1M",
            Self::Mo3 => "3M",
        }
    }

    /// Month-like values are fixed 30/90 day periods, not calendar months.
    pub fn minutes(self) -> i64 {
        match self {
            Self::M1 => 1,
            Self::M3 => 3,
            Self::M5 => 5,
            Self::M15 => 15,
            Self::H1 => 60,
            Self::H4 => 240,
            Self::D1 => 1_440,
            Self::D3 => 4_320,
            Self::D5 => 7_200,
            Self::W1 => 10_080,
            Self::W3 => 30_240,
            Self::Mo1 => 43_200,
            Self::Mo3 => 129_600,
        }
    }

    pub fn duration_ms(self) -> i64 {
        self.minutes() * 60_000
    }
}

impl FromStr for Timeframe {
    type Err = EngineError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        Self::ALL
            .into_iter()
            .find(|timeframe| timeframe.as_str() == trimmed)
            .ok_or_else(|| EngineError::InvalidArgument(format!("unknown timeframe '{trimmed}'")))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Candle {
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    pub fn new(timestamp: i64, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    pub fn merge(&mut self, later: &Candle) {
        self.high = self.high.max(later.high);
        self.low = self.low.min(later.low);
        self.close = later.close;
        self.volume += later.volume;
    }
}

/// Candle point in the shape the chart surface consumes: `time` is epoch seconds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChartCandle {
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl From<&Candle> for ChartCandle {
    fn from(candle: &Candle) -> Self {
        Self {
            time: candle.timestamp.div_euclid(1_000),
            open: candle.open,
            high: candle.high,
            low: candle.low,
            close: candle.close,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChartVolume {
    pub time: i64,
    pub value: f64,
    pub direction: i8,
}

impl ChartVolume {
    pub fn from_candle(candle: &Candle, direction: i8) -> Self {
        Self {
            time: candle.timestamp.div_euclid(1_000),
            value: candle.volume,
            direction,
        }
    }
}

pub fn direction_from_closes(previous_close: f64, next_close: f64) -> i8 {
    if next_close >= previous_close {
        1
    } else {
        -1
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SyncMessage {
    pub timeframe: Timeframe,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SessionArgs {
    pub timeframe: Option<Timeframe>,
    pub tick_interval_ms: Option<u64>,
    pub poll_interval_ms: Option<u64>,
    pub poll_fallback: Option<bool>,
    pub min_price: Option<f64>,
    pub min_volume: Option<f64>,
    pub price_step_fraction: Option<f64>,
    pub volume_jitter: Option<(f64, f64)>,
    pub visibility_threshold: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub timeframe: Timeframe,
    pub tick_interval_ms: u64,
    pub poll_interval_ms: u64,
    pub poll_fallback: bool,
    pub min_price: f64,
    pub min_volume: f64,
    pub price_step_fraction: f64,
    pub volume_jitter: (f64, f64),
    pub visibility_threshold: f64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeframe: DEFAULT_TIMEFRAME,
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            poll_fallback: DEFAULT_POLL_FALLBACK,
            min_price: DEFAULT_MIN_PRICE,
            min_volume: DEFAULT_MIN_VOLUME,
            price_step_fraction: DEFAULT_PRICE_STEP_FRACTION,
            volume_jitter: DEFAULT_VOLUME_JITTER,
            visibility_threshold: DEFAULT_VISIBILITY_THRESHOLD,
        }
    }
}

impl SessionArgs {
    pub fn normalize(self) -> Result<SessionConfig, EngineError> {
        let timeframe = self.timeframe.unwrap_or(DEFAULT_TIMEFRAME);

        let tick_interval_ms = self
            .tick_interval_ms
            .unwrap_or_else(resolve_tick_interval_ms);
        if !(MIN_TICK_INTERVAL_MS..=MAX_TICK_INTERVAL_MS).contains(&tick_interval_ms) {
            return Err(EngineError::InvalidArgument(format!(
                "tickIntervalMs must be between {MIN_TICK_INTERVAL_MS} and {MAX_TICK_INTERVAL_MS}"
            )));
        }

        let poll_interval_ms = self
            .poll_interval_ms
            .unwrap_or_else(resolve_poll_interval_ms);
        if !(MIN_POLL_INTERVAL_MS..=MAX_POLL_INTERVAL_MS).contains(&poll_interval_ms) {
            return Err(EngineError::InvalidArgument(format!(
                "pollIntervalMs must be between {MIN_POLL_INTERVAL_MS} and {MAX_POLL_INTERVAL_MS}"
            )));
        }

        let poll_fallback = self.poll_fallback.unwrap_or(DEFAULT_POLL_FALLBACK);

        let min_price = self.min_price.unwrap_or(DEFAULT_MIN_PRICE);
        if !min_price.is_finite() || min_price <= 0.0 {
            return Err(EngineError::InvalidArgument(
                "minPrice must be a finite positive number".to_string(),
            ));
        }

        let min_volume = self.min_volume.unwrap_or(DEFAULT_MIN_VOLUME);
        if !min_volume.is_finite() || min_volume < 0.0 {
            return Err(EngineError::InvalidArgument(
                "minVolume must be a finite non-negative number".to_string(),
            ));
        }

        let price_step_fraction = self
            .price_step_fraction
            .unwrap_or(DEFAULT_PRICE_STEP_FRACTION);
        if !price_step_fraction.is_finite()
            || price_step_fraction <= 0.0
            || price_step_fraction > MAX_PRICE_STEP_FRACTION
        {
            return Err(EngineError::InvalidArgument(format!(
                "priceStepFraction must be in (0, {MAX_PRICE_STEP_FRACTION}]"
            )));
        }

        let volume_jitter = self.volume_jitter.unwrap_or(DEFAULT_VOLUME_JITTER);
        let (jitter_min, jitter_max) = volume_jitter;
        if !jitter_min.is_finite()
            || !jitter_max.is_finite()
            || jitter_min <= 0.0
            || jitter_min > jitter_max
        {
            return Err(EngineError::InvalidArgument(
                "volumeJitter must be a positive (min, max) pair with min <= max".to_string(),
            ));
        }

        let visibility_threshold = self
            .visibility_threshold
            .unwrap_or(DEFAULT_VISIBILITY_THRESHOLD);
        if !(0.0..=1.0).contains(&visibility_threshold) {
            return Err(EngineError::InvalidArgument(
                "visibilityThreshold must be between 0 and 1".to_string(),
            ));
        }

        Ok(SessionConfig {
            timeframe,
            tick_interval_ms,
            poll_interval_ms,
            poll_fallback,
            min_price,
            min_volume,
            price_step_fraction,
            volume_jitter,
            visibility_threshold,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_every_timeframe_to_minutes() {
        assert_eq!(Timeframe::M3.minutes(), 3);
        assert_eq!(Timeframe::M15.duration_ms(), 900_000);
        assert_eq!(Timeframe::D5.minutes(), 5 * 24 * 60);
        assert_eq!(Timeframe::W3.minutes(), 21 * 24 * 60);
        assert_eq!(Timeframe::Mo1.duration_ms(), 2_592_000_000);
        assert_eq!(Timeframe::Mo3.minutes(), 90 * 24 * 60);
    }

    #[test]
    fn timeframe_labels_round_trip_through_from_str() {
        for timeframe in Timeframe::ALL {
            assert_eq!(timeframe.as_str().parse::<Timeframe>().ok(), Some(timeframe));
        }
        assert!("2m".parse::<Timeframe>().is_err());
    }

    #[test]
    fn timeframe_serializes_as_short_label() {
        let message = SyncMessage {
            timeframe: Timeframe::Mo1,
        };
        let encoded = simd_json::serde::to_string(&message).expect("sync message should encode");
        assert_eq!(encoded, r#"{"timeframe":"1M"}"#);
    }

    #[test]
    fn chart_points_use_second_resolution() {
        let candle = Candle::new(120_999, 1.0, 2.0, 0.5, 1.5, 10.0);
        assert_eq!(ChartCandle::from(&candle).time, 120);
        assert_eq!(ChartVolume::from_candle(&candle, 1).time, 120);
    }

    #[test]
    fn derives_direction_from_closes() {
        assert_eq!(direction_from_closes(10.0, 10.0), 1);
        assert_eq!(direction_from_closes(10.0, 11.0), 1);
        assert_eq!(direction_from_closes(10.0, 9.0), -1);
    }

    #[test]
    fn normalizes_session_args_defaults() {
        let config = SessionArgs {
            tick_interval_ms: Some(DEFAULT_TICK_INTERVAL_MS),
            poll_interval_ms: Some(DEFAULT_POLL_INTERVAL_MS),
            ..SessionArgs::default()
        }
        .normalize()
        .expect("defaults should be valid");

        assert_eq!(config, SessionConfig::default());
    }

    #[test]
    fn rejects_non_positive_min_price() {
        let result = SessionArgs {
            min_price: Some(0.0),
            ..SessionArgs::default()
        }
        .normalize();

        assert!(result.is_err());
    }

    #[test]
    fn validates_tick_interval_range() {
        let result = SessionArgs {
            tick_interval_ms: Some(1),
            ..SessionArgs::default()
        }
        .normalize();

        assert!(result.is_err());
    }

    #[test]
    fn validates_poll_interval_range() {
        let result = SessionArgs {
            tick_interval_ms: Some(DEFAULT_TICK_INTERVAL_MS),
            poll_interval_ms: Some(60_000),
            ..SessionArgs::default()
        }
        .normalize();

        assert!(result.is_err());
    }

    #[test]
    fn validates_volume_jitter_ordering() {
        let result = SessionArgs {
            tick_interval_ms: Some(DEFAULT_TICK_INTERVAL_MS),
            poll_interval_ms: Some(DEFAULT_POLL_INTERVAL_MS),
            volume_jitter: Some((1.2, 0.8)),
            ..SessionArgs::default()
        }
        .normalize();

        assert!(result.is_err());
    }
}
