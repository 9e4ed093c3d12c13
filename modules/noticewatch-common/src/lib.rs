pub mod config;
pub mod types;

pub use config::Config;
pub use types::{
    parse_watermark, Credentials, Notice, ScrapeRequest, PORTAL_TIMESTAMP_FORMAT,
    WIRE_TIMESTAMP_FORMAT,
};
