use serde::ser::Serializer;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("timeframe mode mismatch: {0}")]
    ModeMismatch(&'static str),
    #[error("surface error: {0}")]
    Surface(String),
    #[error("surface already disposed")]
    SurfaceDisposed,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json decode error: {0}")]
    SimdJson(#[from] simd_json::Error),
}

impl serde::Serialize for EngineError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
