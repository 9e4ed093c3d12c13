use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// One rendered browser surface inside an authenticated (or soon to be
/// authenticated) portal context. Every operation suspends at the driver
/// boundary; timeouts are the caller's per-wait budgets.
#[async_trait]
pub trait PortalPage: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<()>;

    /// URL the page actually ended up on, after any server-side redirects.
    async fn current_url(&self) -> Result<String>;

    /// Poll until the selector matches an element or the timeout elapses.
    async fn wait_for(&self, selector: &str, timeout: Duration) -> Result<()>;

    /// Visible text of the first matching element, `None` when absent.
    async fn read_text(&self, selector: &str) -> Result<Option<String>>;

    async fn read_attribute(&self, selector: &str, attribute: &str)
        -> Result<Option<String>>;

    /// Raw inner markup of the first matching element, `None` when absent.
    async fn read_inner_html(&self, selector: &str) -> Result<Option<String>>;

    async fn fill(&self, selector: &str, value: &str) -> Result<()>;

    async fn click(&self, selector: &str) -> Result<()>;

    /// Number of elements currently matching the selector.
    async fn count(&self, selector: &str) -> Result<usize>;

    async fn cookie(&self, name: &str) -> Result<Option<String>>;

    async fn set_cookie(&self, name: &str, value: &str) -> Result<()>;

    /// Full cookie jar of the context, for request paths that bypass the
    /// browser but must share its session.
    async fn cookies(&self) -> Result<Vec<(String, String)>>;

    async fn close(&self) -> Result<()>;
}

/// An isolated browser context. One per job; concurrent jobs never share one.
#[async_trait]
pub trait PortalBrowser: Send + Sync {
    async fn open_page(&self) -> Result<Box<dyn PortalPage>>;

    /// Open `url` in an auxiliary tab and capture the body of the first
    /// network response whose URL contains `url_fragment`. The tab is closed
    /// on every exit path, success or failure.
    async fn capture_response(
        &self,
        url: &str,
        url_fragment: &str,
        timeout: Duration,
    ) -> Result<Vec<u8>>;

    async fn close(&self) -> Result<()>;
}
