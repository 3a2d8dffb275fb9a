use crate::config::ConfigError;
use crate::ingest::CycleError;
use crate::routing::RoutingError;
use crate::statements::DecodeError;
use crate::telemetry::TelemetryError;
use std::fmt;

/// Startup and command-level failures surfaced by the binaries.
#[derive(Debug)]
pub enum AppError {
    Config(ConfigError),
    Telemetry(TelemetryError),
    Io(std::io::Error),
    Routing(RoutingError),
    Decode(DecodeError),
    Cycle(CycleError),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Config(err) => write!(f, "configuration error: {}", err),
            AppError::Telemetry(err) => write!(f, "telemetry error: {}", err),
            AppError::Io(err) => write!(f, "io error: {}", err),
            AppError::Routing(err) => write!(f, "routing error: {}", err),
            AppError::Decode(err) => write!(f, "decode error: {}", err),
            AppError::Cycle(err) => write!(f, "ingestion error: {}", err),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::Config(err) => Some(err),
            AppError::Telemetry(err) => Some(err),
            AppError::Io(err) => Some(err),
            AppError::Routing(err) => Some(err),
            AppError::Decode(err) => Some(err),
            AppError::Cycle(err) => Some(err),
        }
    }
}

impl From<ConfigError> for AppError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<TelemetryError> for AppError {
    fn from(value: TelemetryError) -> Self {
        Self::Telemetry(value)
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<RoutingError> for AppError {
    fn from(value: RoutingError) -> Self {
        Self::Routing(value)
    }
}

impl From<DecodeError> for AppError {
    fn from(value: DecodeError) -> Self {
        Self::Decode(value)
    }
}

impl From<CycleError> for AppError {
    fn from(value: CycleError) -> Self {
        Self::Cycle(value)
    }
}
