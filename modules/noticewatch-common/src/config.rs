use std::env;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Target portal
    pub portal_base_url: String,

    // External services
    pub otp_service_url: String,
    pub storage_upload_url: String,
    pub webhook_url: String,

    // Session persistence
    pub session_file: String,

    // Web server
    pub api_host: String,
    pub api_port: u16,

    // Browser
    pub chrome_headless: bool,
}

impl Config {
    /// Load configuration from environment variables.
    /// Panics with a clear message if required vars are missing.
    pub fn from_env() -> Self {
        Self {
            portal_base_url: required_env("PORTAL_BASE_URL")
                .trim_end_matches('/')
                .to_string(),
            otp_service_url: required_env("OTP_SERVICE_URL"),
            storage_upload_url: required_env("STORAGE_UPLOAD_URL"),
            webhook_url: required_env("WEBHOOK_URL"),
            session_file: env::var("SESSION_FILE")
                .unwrap_or_else(|_| "data/session.token".to_string()),
            api_host: env::var("API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            api_port: env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .expect("API_PORT must be a number"),
            chrome_headless: env::var("CHROME_HEADLESS")
                .map(|v| v != "false" && v != "0")
                .unwrap_or(true),
        }
    }
}

fn required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}
