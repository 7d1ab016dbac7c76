use crate::error::EngineError;
use crate::market::types::{ChartCandle, ChartVolume};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use super::{
    CANDLES_BOOTSTRAP_EVENT, CANDLE_UPDATE_EVENT, FIT_CONTENT_EVENT, SURFACE_REMOVED_EVENT,
    SURFACE_RESIZE_EVENT,
};

/// A rendering surface owned by exactly one chart session.
///
/// Every call may fail; the owning session logs and swallows those failures.
pub trait ChartSurface: Send + 'static {
    fn set_data(
        &mut self,
        candles: &[ChartCandle],
        volumes: &[ChartVolume],
    ) -> Result<(), EngineError>;

    fn update_last(&mut self, candle: ChartCandle, volume: ChartVolume) -> Result<(), EngineError>;

    fn fit_content(&mut self) -> Result<(), EngineError>;

    fn resize(&mut self, width: u32, height: u32) -> Result<(), EngineError>;

    fn remove(&mut self) -> Result<(), EngineError>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "payload")]
pub enum SurfaceEvent {
    #[serde(rename = "candles_bootstrap")]
    CandlesBootstrap {
        candles: Vec<ChartCandle>,
        volumes: Vec<ChartVolume>,
    },
    #[serde(rename = "candle_update")]
    CandleUpdate {
        candle: ChartCandle,
        volume: ChartVolume,
    },
    #[serde(rename = "fit_content")]
    FitContent,
    #[serde(rename = "surface_resize")]
    SurfaceResize { width: u32, height: u32 },
    #[serde(rename = "surface_removed")]
    SurfaceRemoved,
}

impl SurfaceEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::CandlesBootstrap { .. } => CANDLES_BOOTSTRAP_EVENT,
            Self::CandleUpdate { .. } => CANDLE_UPDATE_EVENT,
            Self::FitContent => FIT_CONTENT_EVENT,
            Self::SurfaceResize { .. } => SURFACE_RESIZE_EVENT,
            Self::SurfaceRemoved => SURFACE_REMOVED_EVENT,
        }
    }
}

/// Surface that forwards every call as a named event to a frontend listener.
#[derive(Debug)]
pub struct EventSurface {
    sender: UnboundedSender<SurfaceEvent>,
    removed: bool,
}

impl EventSurface {
    pub fn channel() -> (Self, UnboundedReceiver<SurfaceEvent>) {
        let (sender, receiver) = unbounded_channel();
        (
            Self {
                sender,
                removed: false,
            },
            receiver,
        )
    }

    fn emit(&self, event: SurfaceEvent) -> Result<(), EngineError> {
        if self.removed {
            return Err(EngineError::SurfaceDisposed);
        }
        let name = event.name();
        self.sender
            .send(event)
            .map_err(|_| EngineError::Surface(format!("no listener for {name} event")))
    }
}

impl ChartSurface for EventSurface {
    fn set_data(
        &mut self,
        candles: &[ChartCandle],
        volumes: &[ChartVolume],
    ) -> Result<(), EngineError> {
        self.emit(SurfaceEvent::CandlesBootstrap {
            candles: candles.to_vec(),
            volumes: volumes.to_vec(),
        })
    }

    fn update_last(&mut self, candle: ChartCandle, volume: ChartVolume) -> Result<(), EngineError> {
        self.emit(SurfaceEvent::CandleUpdate { candle, volume })
    }

    fn fit_content(&mut self) -> Result<(), EngineError> {
        self.emit(SurfaceEvent::FitContent)
    }

    fn resize(&mut self, width: u32, height: u32) -> Result<(), EngineError> {
        self.emit(SurfaceEvent::SurfaceResize { width, height })
    }

    fn remove(&mut self) -> Result<(), EngineError> {
        let result = self.emit(SurfaceEvent::SurfaceRemoved);
        self.removed = true;
        result
    }
}
