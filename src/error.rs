use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    Configuration,
    VolumeOutOfRange,
    InvalidSampleCount,
    GridOverflow,
    InvalidInput,
    Io,
    Internal,
}

/// Planning failure. Raised before any step reaches a driver, so a failed
/// plan never leaves a half-executed protocol behind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanError {
    pub code: ErrorCode,
    pub message: String,
}

impl PlanError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Configuration, message)
    }

    pub fn volume_out_of_range(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::VolumeOutOfRange, message)
    }

    pub fn invalid_sample_count(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidSampleCount, message)
    }

    pub fn grid_overflow(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::GridOverflow, message)
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }
}

impl Error for PlanError {}

impl fmt::Display for PlanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

impl From<std::io::Error> for PlanError {
    fn from(err: std::io::Error) -> Self {
        PlanError::new(ErrorCode::Io, err.to_string())
    }
}

impl From<serde_json::Error> for PlanError {
    fn from(err: serde_json::Error) -> Self {
        PlanError::new(ErrorCode::InvalidInput, err.to_string())
    }
}

impl From<csv::Error> for PlanError {
    fn from(err: csv::Error) -> Self {
        PlanError::new(ErrorCode::Io, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_names_code() {
        let err = PlanError::configuration("negative water volume");
        assert_eq!(err.to_string(), "Configuration: negative water volume");
    }

    #[test]
    fn test_json_error_is_invalid_input() {
        let err: PlanError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert_eq!(err.code, ErrorCode::InvalidInput);
    }
}
