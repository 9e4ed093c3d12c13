//! Capability boundary over the browser-automation driver.
//!
//! The login and crawl algorithms are written purely against [`PortalPage`]
//! and [`PortalBrowser`]; portal markup changes only ever touch selector
//! constants and this crate's chromiumoxide implementation.

pub mod chromium;
pub mod error;
mod traits;

pub use chromium::ChromiumBrowser;
pub use error::{DriverError, Result};
pub use traits::{PortalBrowser, PortalPage};

/// Identifying user-agent presented to the portal and to direct document
/// fetches, so both paths look like the same browser.
pub const PORTAL_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) \
     Chrome/120.0.0.0 Safari/537.36 NoticeWatch/0.1";
