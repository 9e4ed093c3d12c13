use noticewatch_driver::DriverError;
use otp_client::OtpError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

/// Job-level error taxonomy. Per-row extraction problems never surface here;
/// they are absorbed with a log line and a degraded row.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no answer configured for security challenge {question:?} (identifier {identifier})")]
    ChallengeAnswerMissing {
        identifier: String,
        question: String,
    },

    #[error("one-time code never became available for {identifier}")]
    OtpTimeout {
        identifier: String,
        #[source]
        source: OtpError,
    },

    #[error("session cookie absent after login for {identifier}: the portal did not accept the login")]
    SessionTokenMissing { identifier: String },

    #[error("notice grid navigation failed: {0}")]
    Navigation(String),

    #[error("webhook delivery rejected (status {status}): {message}")]
    Delivery { status: u16, message: String },

    #[error("webhook delivery failed before a response was received: {0}")]
    DeliveryTransport(String),

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
