pub mod aggregate;
pub mod live;
pub mod session;
pub mod surface;
pub mod sync;
pub mod types;

pub const CANDLES_BOOTSTRAP_EVENT: &str = "candles_bootstrap";
pub const CANDLE_UPDATE_EVENT: &str = "candle_update";
pub const FIT_CONTENT_EVENT: &str = "fit_content";
pub const SURFACE_RESIZE_EVENT: &str = "surface_resize";
pub const SURFACE_REMOVED_EVENT: &str = "surface_removed";
