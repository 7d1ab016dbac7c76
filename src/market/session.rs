use crate::error::EngineError;
use crate::market::aggregate::aggregate;
use crate::market::live::{apply_tick, SyntheticTicks, TickLimits, TickSource};
use crate::market::surface::ChartSurface;
use crate::market::sync::{SyncSubscription, TimeframeSync};
use crate::market::types::{
    direction_from_closes, Candle, ChartCandle, ChartVolume, SessionConfig, Timeframe,
};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Who owns writes to a session's timeframe for its whole lifetime.
#[derive(Debug, Clone)]
pub enum TimeframeMode {
    /// Only the owner changes the timeframe, through [`ChartSession::set_timeframe`].
    Controlled,
    /// The session follows the sync channel; local selections are published to it.
    Uncontrolled(TimeframeSync),
}

struct TimerHandle {
    cancellation_token: CancellationToken,
    join_handle: JoinHandle<()>,
}

impl TimerHandle {
    /// Spawns on the current tokio runtime; `None` when called outside one.
    fn spawn<F, Fut>(task: F) -> Option<Self>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(error) => {
                tracing::warn!("session timer not started: {error}");
                return None;
            }
        };
        let cancellation_token = CancellationToken::new();
        let join_handle = runtime.spawn(task(cancellation_token.clone()));
        Some(Self {
            cancellation_token,
            join_handle,
        })
    }

    fn cancel(self) {
        self.cancellation_token.cancel();
        self.join_handle.abort();
    }
}

struct SessionCore<S> {
    raw: Vec<Candle>,
    timeframe: Timeframe,
    aggregated: Vec<Candle>,
    surface: Option<S>,
    ticks: Box<dyn TickSource>,
    limits: TickLimits,
    active: bool,
    visible: bool,
    size: Option<(u32, u32)>,
    disposed: bool,
}

impl<S: ChartSurface> SessionCore<S> {
    fn is_live(&self) -> bool {
        !self.disposed && self.active && self.visible
    }

    fn refresh(&mut self, fit: bool) {
        self.aggregated = aggregate(&self.raw, self.timeframe);
        let Some(surface) = self.surface.as_mut() else {
            return;
        };

        let candles: Vec<ChartCandle> = self.aggregated.iter().map(ChartCandle::from).collect();
        let volumes: Vec<ChartVolume> = self
            .aggregated
            .iter()
            .map(|candle| {
                ChartVolume::from_candle(candle, direction_from_closes(candle.open, candle.close))
            })
            .collect();

        if let Err(error) = surface.set_data(&candles, &volumes) {
            tracing::warn!(
                timeframe = self.timeframe.as_str(),
                "failed to replace surface data: {error}"
            );
        }

        if fit {
            if let Err(error) = surface.fit_content() {
                tracing::debug!("fit to content skipped: {error}");
            }
        }
    }

    fn apply_timeframe(&mut self, timeframe: Timeframe) -> bool {
        if self.disposed || self.timeframe == timeframe {
            return false;
        }
        tracing::debug!(
            from = self.timeframe.as_str(),
            to = timeframe.as_str(),
            "switching session timeframe"
        );
        self.timeframe = timeframe;
        self.refresh(true);
        true
    }

    fn live_tick(&mut self) {
        if !self.is_live() {
            return;
        }
        let Some(last) = self.aggregated.last().copied() else {
            return;
        };
        let Some(tick) = self.ticks.next_tick(&last) else {
            return;
        };
        let Some(outcome) = apply_tick(&mut self.aggregated, tick, self.limits) else {
            return;
        };

        if let Some(surface) = self.surface.as_mut() {
            let candle = ChartCandle::from(&outcome.candle);
            let volume = ChartVolume::from_candle(&outcome.candle, outcome.direction);
            if let Err(error) = surface.update_last(candle, volume) {
                tracing::warn!("failed to update last candle: {error}");
            }
        }
    }
}

/// Owns one chart surface and keeps it consistent with `(raw series, timeframe)`.
///
/// Timers run as tasks on the current tokio runtime. Outside a runtime an
/// uncontrolled session never follows the sync channel and live ticks stay off.
/// Dropping the session disposes it.
pub struct ChartSession<S: ChartSurface> {
    core: Arc<Mutex<SessionCore<S>>>,
    config: SessionConfig,
    mode: TimeframeMode,
    tick_timer: Option<TimerHandle>,
    sync_timer: Option<TimerHandle>,
}

impl<S: ChartSurface> ChartSession<S> {
    pub fn mount(
        surface: S,
        raw: Vec<Candle>,
        mode: TimeframeMode,
        config: SessionConfig,
    ) -> Self {
        let ticks = SyntheticTicks::from_config(rand::random(), &config);
        let mut core = SessionCore {
            raw,
            timeframe: config.timeframe,
            aggregated: Vec::new(),
            surface: Some(surface),
            ticks: Box::new(ticks),
            limits: TickLimits::from(&config),
            active: false,
            visible: false,
            size: None,
            disposed: false,
        };
        core.refresh(true);

        let core = Arc::new(Mutex::new(core));
        let sync_timer = match &mode {
            TimeframeMode::Controlled => None,
            TimeframeMode::Uncontrolled(sync) => spawn_sync_loop(
                Arc::clone(&core),
                sync.subscribe(),
                Duration::from_millis(config.poll_interval_ms),
                config.poll_fallback,
            ),
        };

        tracing::debug!(timeframe = config.timeframe.as_str(), "chart session mounted");
        Self {
            core,
            config,
            mode,
            tick_timer: None,
            sync_timer,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn timeframe(&self) -> Timeframe {
        self.core.lock().timeframe
    }

    pub fn aggregated(&self) -> Vec<Candle> {
        self.core.lock().aggregated.clone()
    }

    pub fn size(&self) -> Option<(u32, u32)> {
        self.core.lock().size
    }

    pub fn is_live(&self) -> bool {
        self.tick_timer.is_some()
    }

    pub fn is_disposed(&self) -> bool {
        self.core.lock().disposed
    }

    pub fn set_tick_source(&self, ticks: impl TickSource + 'static) {
        self.core.lock().ticks = Box::new(ticks);
    }

    pub fn set_raw_series(&self, raw: Vec<Candle>) {
        let mut writable = self.core.lock();
        if writable.disposed {
            return;
        }
        writable.raw = raw;
        writable.refresh(false);
    }

    /// Applies a timeframe from the controlling owner. Returns whether anything changed.
    pub fn set_timeframe(&self, timeframe: Timeframe) -> Result<bool, EngineError> {
        match self.mode {
            TimeframeMode::Controlled => Ok(self.core.lock().apply_timeframe(timeframe)),
            TimeframeMode::Uncontrolled(_) => Err(EngineError::ModeMismatch(
                "uncontrolled session follows the sync channel",
            )),
        }
    }

    /// Publishes a local timeframe pick; the session applies it when the sync channel delivers it.
    pub fn select_timeframe(&self, timeframe: Timeframe) -> Result<(), EngineError> {
        match &self.mode {
            TimeframeMode::Uncontrolled(sync) => {
                sync.publish(timeframe);
                Ok(())
            }
            TimeframeMode::Controlled => Err(EngineError::ModeMismatch(
                "controlled session timeframe is owned by its controller",
            )),
        }
    }

    pub fn set_active(&mut self, active: bool) {
        let changed = {
            let mut writable = self.core.lock();
            let changed = !writable.disposed && writable.active != active;
            writable.active = active;
            changed
        };
        if changed {
            self.restart_tick_loop();
        }
    }

    pub fn set_visible(&mut self, visible: bool) {
        let changed = {
            let mut writable = self.core.lock();
            let changed = !writable.disposed && writable.visible != visible;
            writable.visible = visible;
            changed
        };
        if changed {
            self.restart_tick_loop();
        }
    }

    /// Marks the session visible when at least `visibility_threshold` of it is on screen.
    pub fn set_visible_ratio(&mut self, ratio: f64) {
        self.set_visible(ratio >= self.config.visibility_threshold);
    }

    pub fn resize(&self, width: u32, height: u32) {
        let mut writable = self.core.lock();
        if writable.disposed {
            return;
        }
        writable.size = Some((width, height));
        if let Some(surface) = writable.surface.as_mut() {
            if let Err(error) = surface.resize(width, height) {
                tracing::warn!(width, height, "failed to resize surface: {error}");
            }
        }
    }

    /// Cancels every timer and releases the surface. Safe to call more than once.
    pub fn dispose(&mut self) {
        if let Some(timer) = self.tick_timer.take() {
            timer.cancel();
        }
        if let Some(timer) = self.sync_timer.take() {
            timer.cancel();
        }

        let mut writable = self.core.lock();
        if writable.disposed {
            return;
        }
        writable.disposed = true;
        writable.size = None;
        if let Some(mut surface) = writable.surface.take() {
            if let Err(error) = surface.remove() {
                tracing::warn!("failed to remove surface: {error}");
            }
        }
        tracing::debug!("chart session disposed");
    }

    fn restart_tick_loop(&mut self) {
        if let Some(timer) = self.tick_timer.take() {
            timer.cancel();
        }
        if self.core.lock().is_live() {
            self.tick_timer = spawn_tick_loop(
                Arc::clone(&self.core),
                Duration::from_millis(self.config.tick_interval_ms),
            );
        }
    }
}

impl<S: ChartSurface> Drop for ChartSession<S> {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn spawn_tick_loop<S: ChartSurface>(
    core: Arc<Mutex<SessionCore<S>>>,
    period: Duration,
) -> Option<TimerHandle> {
    TimerHandle::spawn(move |cancel_token| async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => break,
                _ = ticker.tick() => {
                    let disposed = {
                        let mut writable = core.lock();
                        writable.live_tick();
                        writable.disposed
                    };
                    if disposed {
                        break;
                    }
                }
            }
        }
    })
}

fn spawn_sync_loop<S: ChartSurface>(
    core: Arc<Mutex<SessionCore<S>>>,
    mut subscription: SyncSubscription,
    poll_period: Duration,
    poll_fallback: bool,
) -> Option<TimerHandle> {
    TimerHandle::spawn(move |cancel_token| async move {
        let mut poll = tokio::time::interval(poll_period);
        poll.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            // Collapse everything pending into the newest value so a stale
            // queued broadcast never follows a fresher one.
            let incoming = tokio::select! {
                _ = cancel_token.cancelled() => break,
                message = subscription.recv() => {
                    subscription.latest(poll_fallback).or(Some(message))
                }
                _ = poll.tick(), if poll_fallback => subscription.latest(true),
            };
            let Some(message) = incoming else {
                continue;
            };

            let disposed = {
                let mut writable = core.lock();
                writable.apply_timeframe(message.timeframe);
                writable.disposed
            };
            if disposed {
                break;
            }
        }
    })
}
