use thiserror::Error;

pub type Result<T> = std::result::Result<T, DriverError>;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("Browser launch failed: {0}")]
    Launch(String),

    #[error("Timed out waiting for {0}")]
    Timeout(String),

    #[error("Element not found: {0}")]
    ElementMissing(String),

    #[error("CDP error: {0}")]
    Cdp(String),

    #[error("Decode error: {0}")]
    Decode(String),
}

/// Collapse a chromiumoxide error into the driver taxonomy.
pub(crate) fn cdp(err: impl std::fmt::Display) -> DriverError {
    DriverError::Cdp(err.to_string())
}
