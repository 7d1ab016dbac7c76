pub mod config;
pub mod error;
pub mod market;

use error::EngineError;
use market::aggregate::build_mock_series;
use market::session::{ChartSession, TimeframeMode};
use market::surface::{EventSurface, SurfaceEvent};
use market::sync::TimeframeSync;
use market::types::{SessionArgs, Timeframe};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing_subscriber::EnvFilter;

const DEMO_CANDLES: usize = 720;
const DEMO_SURFACE_SIZE: (u32, u32) = (960, 540);
const DEMO_TIMEFRAMES: [Timeframe; 3] = [Timeframe::M5, Timeframe::M15, Timeframe::H1];

fn now_unix_ms() -> i64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(duration) => duration.as_millis().min(i64::MAX as u128) as i64,
        Err(_) => 0,
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

async fn log_surface_events(chart: &'static str, mut events: UnboundedReceiver<SurfaceEvent>) {
    while let Some(event) = events.recv().await {
        match &event {
            SurfaceEvent::CandlesBootstrap { candles, .. } => {
                tracing::info!(chart, event = event.name(), candles = candles.len());
            }
            SurfaceEvent::CandleUpdate { candle, volume } => {
                tracing::info!(
                    chart,
                    event = event.name(),
                    close = candle.close,
                    direction = volume.direction
                );
            }
            SurfaceEvent::SurfaceResize { width, height } => {
                tracing::info!(chart, event = event.name(), width, height);
            }
            SurfaceEvent::FitContent | SurfaceEvent::SurfaceRemoved => {
                tracing::info!(chart, event = event.name());
            }
        }
    }
}

async fn run_demo() -> Result<(), EngineError> {
    let config = SessionArgs::default().normalize()?;
    let sync = TimeframeSync::new();
    let raw = build_mock_series(DEMO_CANDLES, Timeframe::M1.duration_ms(), now_unix_ms());

    let mut sessions = Vec::new();
    let mut listeners = Vec::new();
    for chart in ["primary", "secondary"] {
        let (surface, events) = EventSurface::channel();
        listeners.push(tokio::spawn(log_surface_events(chart, events)));

        let mut session = ChartSession::mount(
            surface,
            raw.clone(),
            TimeframeMode::Uncontrolled(sync.clone()),
            config.clone(),
        );
        session.resize(DEMO_SURFACE_SIZE.0, DEMO_SURFACE_SIZE.1);
        session.set_active(true);
        session.set_visible_ratio(1.0);
        sessions.push(session);
    }

    let hold = Duration::from_millis(config.tick_interval_ms * 2);
    for timeframe in DEMO_TIMEFRAMES {
        tokio::time::sleep(hold).await;
        if let Some(picker) = sessions.first() {
            tracing::info!(timeframe = timeframe.as_str(), "selecting timeframe");
            picker.select_timeframe(timeframe)?;
        }
    }
    tokio::time::sleep(hold).await;

    for mut session in sessions {
        session.dispose();
    }
    for listener in listeners {
        if let Err(error) = listener.await {
            tracing::warn!("surface event listener failed: {error}");
        }
    }
    Ok(())
}

pub fn run() -> Result<(), EngineError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run_demo())
}
