use thiserror::Error;

pub type Result<T> = std::result::Result<T, OtpError>;

#[derive(Debug, Error)]
pub enum OtpError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("code not issued after {attempts} attempts")]
    Timeout {
        attempts: u32,
        #[source]
        source: Option<Box<OtpError>>,
    },
}

impl From<reqwest::Error> for OtpError {
    fn from(err: reqwest::Error) -> Self {
        OtpError::Network(err.to_string())
    }
}
