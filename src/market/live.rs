use crate::market::types::{direction_from_closes, Candle, SessionConfig};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LiveTick {
    pub price_delta: f64,
    pub volume_jitter: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickLimits {
    pub min_price: f64,
    pub min_volume: f64,
}

impl From<&SessionConfig> for TickLimits {
    fn from(config: &SessionConfig) -> Self {
        Self {
            min_price: config.min_price,
            min_volume: config.min_volume,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickOutcome {
    pub candle: Candle,
    pub direction: i8,
}

pub fn update_last(bucket: &mut Candle, new_close: f64, new_volume: f64) {
    bucket.high = bucket.high.max(new_close);
    bucket.low = bucket.low.min(new_close);
    bucket.close = new_close;
    bucket.volume = new_volume;
}

/// Moves only the last bucket of an aggregated series; `None` when the series is empty.
pub fn apply_tick(series: &mut [Candle], tick: LiveTick, limits: TickLimits) -> Option<TickOutcome> {
    let last = series.last_mut()?;
    let previous_close = last.close;
    let new_close = limits.min_price.max(previous_close + tick.price_delta);
    let new_volume = limits.min_volume.max(last.volume * tick.volume_jitter);
    update_last(last, new_close, new_volume);

    Some(TickOutcome {
        candle: *last,
        direction: direction_from_closes(previous_close, new_close),
    })
}

pub trait TickSource: Send {
    /// Draws the next tick for `last`; `None` skips this interval.
    fn next_tick(&mut self, last: &Candle) -> Option<LiveTick>;
}

#[derive(Debug)]
pub struct SyntheticTicks {
    rng: StdRng,
    price_step_fraction: f64,
    volume_jitter: (f64, f64),
}

impl SyntheticTicks {
    pub fn new(seed: u64, price_step_fraction: f64, volume_jitter: (f64, f64)) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            price_step_fraction,
            volume_jitter,
        }
    }

    pub fn from_config(seed: u64, config: &SessionConfig) -> Self {
        Self::new(seed, config.price_step_fraction, config.volume_jitter)
    }
}

impl TickSource for SyntheticTicks {
    fn next_tick(&mut self, last: &Candle) -> Option<LiveTick> {
        let unit: f64 = self.rng.gen();
        let price_delta = (unit - 0.5) * last.close * self.price_step_fraction;
        let (jitter_min, jitter_max) = self.volume_jitter;
        let volume_jitter = if jitter_min < jitter_max {
            self.rng.gen_range(jitter_min..=jitter_max)
        } else {
            jitter_min
        };

        Some(LiveTick {
            price_delta,
            volume_jitter,
        })
    }
}

/// Ticks pushed from outside the session, drained one per interval.
#[derive(Debug, Clone, Default)]
pub struct QueuedTicks {
    queue: Arc<Mutex<VecDeque<LiveTick>>>,
}

impl QueuedTicks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, tick: LiveTick) {
        self.queue.lock().push_back(tick);
    }

    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }
}

impl TickSource for QueuedTicks {
    fn next_tick(&mut self, _last: &Candle) -> Option<LiveTick> {
        self.queue.lock().pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIMITS: TickLimits = TickLimits {
        min_price: 0.01,
        min_volume: 0.0,
    };

    fn series() -> Vec<Candle> {
        vec![
            Candle::new(0, 10.0, 12.0, 9.0, 11.0, 100.0),
            Candle::new(60_000, 11.0, 11.5, 10.5, 11.0, 50.0),
        ]
    }

    #[test]
    fn empty_series_is_a_no_op() {
        let mut empty: Vec<Candle> = Vec::new();
        let tick = LiveTick {
            price_delta: 1.0,
            volume_jitter: 1.0,
        };
        assert!(apply_tick(&mut empty, tick, LIMITS).is_none());
    }

    #[test]
    fn moves_only_the_last_bucket() {
        let mut candles = series();
        let first_before = candles[0];
        let outcome = apply_tick(
            &mut candles,
            LiveTick {
                price_delta: 1.0,
                volume_jitter: 1.1,
            },
            LIMITS,
        )
        .expect("non-empty series should tick");

        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0], first_before);
        assert_eq!(outcome.candle, candles[1]);
        assert_eq!(candles[1].open, 11.0);
        assert_eq!(candles[1].close, 12.0);
        assert_eq!(candles[1].high, 12.0);
        assert_eq!(candles[1].low, 10.5);
        assert!((candles[1].volume - 55.0).abs() < 1e-9);
        assert_eq!(outcome.direction, 1);
    }

    #[test]
    fn falling_close_widens_low_and_marks_direction_down() {
        let mut candles = series();
        let outcome = apply_tick(
            &mut candles,
            LiveTick {
                price_delta: -1.0,
                volume_jitter: 0.9,
            },
            LIMITS,
        )
        .expect("non-empty series should tick");

        assert_eq!(outcome.candle.close, 10.0);
        assert_eq!(outcome.candle.low, 10.0);
        assert_eq!(outcome.candle.high, 11.5);
        assert_eq!(outcome.direction, -1);
    }

    #[test]
    fn clamps_close_to_positive_floor() {
        let mut candles = series();
        let outcome = apply_tick(
            &mut candles,
            LiveTick {
                price_delta: -1_000.0,
                volume_jitter: 1.0,
            },
            LIMITS,
        )
        .expect("non-empty series should tick");

        assert_eq!(outcome.candle.close, LIMITS.min_price);
        assert_eq!(outcome.candle.low, LIMITS.min_price);
    }

    #[test]
    fn volume_respects_minimum() {
        let mut candles = series();
        let limits = TickLimits {
            min_price: 0.01,
            min_volume: 75.0,
        };
        let outcome = apply_tick(
            &mut candles,
            LiveTick {
                price_delta: 0.0,
                volume_jitter: 0.9,
            },
            limits,
        )
        .expect("non-empty series should tick");

        assert_eq!(outcome.candle.volume, 75.0);
    }

    #[test]
    fn synthetic_ticks_never_produce_non_positive_close() {
        let mut candles = vec![Candle::new(0, 0.05, 0.05, 0.05, 0.05, 1.0)];
        let mut source = SyntheticTicks::new(7, 0.5, (0.9, 1.1));

        for _ in 0..10_000 {
            let last = candles[candles.len() - 1];
            let tick = source.next_tick(&last).expect("synthetic source always ticks");
            assert!((0.9..=1.1).contains(&tick.volume_jitter));
            let outcome = apply_tick(&mut candles, tick, LIMITS).expect("series is non-empty");
            assert!(outcome.candle.close > 0.0);
            assert!(outcome.candle.low <= outcome.candle.close);
            assert!(outcome.candle.close <= outcome.candle.high);
        }
    }

    #[test]
    fn synthetic_ticks_are_deterministic_for_a_seed() {
        let last = Candle::new(0, 10.0, 10.0, 10.0, 10.0, 1.0);
        let mut left = SyntheticTicks::new(42, 0.01, (0.9, 1.1));
        let mut right = SyntheticTicks::new(42, 0.01, (0.9, 1.1));

        for _ in 0..16 {
            assert_eq!(left.next_tick(&last), right.next_tick(&last));
        }
    }

    #[test]
    fn queued_ticks_drain_in_order() {
        let queued = QueuedTicks::new();
        let mut source = queued.clone();
        let last = Candle::new(0, 1.0, 1.0, 1.0, 1.0, 1.0);
        let first = LiveTick {
            price_delta: 0.5,
            volume_jitter: 1.0,
        };
        let second = LiveTick {
            price_delta: -0.5,
            volume_jitter: 1.0,
        };
        queued.push(first);
        queued.push(second);

        assert_eq!(queued.pending(), 2);
        assert_eq!(source.next_tick(&last), Some(first));
        assert_eq!(source.next_tick(&last), Some(second));
        assert_eq!(source.next_tick(&last), None);
    }
}
