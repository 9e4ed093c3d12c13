//! chromiumoxide-backed implementation of the portal capability traits.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::emulation::SetUserAgentOverrideParams;
use chromiumoxide::cdp::browser_protocol::network::{
    CookieParam, EnableParams, EventResponseReceived, GetResponseBodyParams, SetCookiesParams,
};
use chromiumoxide::Page;
use futures::StreamExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{cdp, DriverError, Result};
use crate::traits::{PortalBrowser, PortalPage};
use crate::PORTAL_USER_AGENT;

/// Poll step for selector waits. chromiumoxide has no built-in wait, so the
/// driver polls `find_element` until the caller's budget runs out.
const WAIT_POLL: Duration = Duration::from_millis(250);

/// Navigation budget applied inside `navigate` itself.
const NAVIGATION_TIMEOUT: Duration = Duration::from_secs(30);

pub struct ChromiumBrowser {
    browser: Mutex<Browser>,
    handler_task: JoinHandle<()>,
    cookie_domain: String,
}

impl ChromiumBrowser {
    /// Launch a fresh, isolated browser context. Fatal if Chromium cannot
    /// start; nothing is retried here.
    pub async fn launch(headless: bool, cookie_domain: &str) -> Result<Self> {
        let mut builder = BrowserConfig::builder()
            .window_size(1366, 768)
            .no_sandbox()
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage");
        if !headless {
            builder = builder.with_head();
        }
        let config = builder.build().map_err(DriverError::Launch)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| DriverError::Launch(e.to_string()))?;

        // The handler stream must be driven for the CDP connection to make
        // progress; it ends when the browser goes away.
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        debug!(headless, "Chromium context launched");
        Ok(Self {
            browser: Mutex::new(browser),
            handler_task,
            cookie_domain: cookie_domain.to_string(),
        })
    }

    async fn new_blank_page(&self) -> Result<Page> {
        let page = self
            .browser
            .lock()
            .await
            .new_page("about:blank")
            .await
            .map_err(cdp)?;
        let ua = SetUserAgentOverrideParams::builder()
            .user_agent(PORTAL_USER_AGENT)
            .build()
            .map_err(DriverError::Cdp)?;
        page.execute(ua).await.map_err(cdp)?;
        Ok(page)
    }
}

#[async_trait]
impl PortalBrowser for ChromiumBrowser {
    async fn open_page(&self) -> Result<Box<dyn PortalPage>> {
        let page = self.new_blank_page().await?;
        Ok(Box::new(ChromiumPage {
            page,
            cookie_domain: self.cookie_domain.clone(),
        }))
    }

    async fn capture_response(
        &self,
        url: &str,
        url_fragment: &str,
        timeout: Duration,
    ) -> Result<Vec<u8>> {
        let page = self.new_blank_page().await?;
        let result = capture_on_page(&page, url, url_fragment, timeout).await;
        // The auxiliary tab is closed on its own exit path, whatever the
        // capture outcome was.
        if let Err(e) = page.close().await {
            warn!(error = %e, "Failed to close auxiliary tab");
        }
        result
    }

    async fn close(&self) -> Result<()> {
        let mut browser = self.browser.lock().await;
        let outcome = browser.close().await.map(|_| ()).map_err(cdp);
        self.handler_task.abort();
        outcome
    }
}

/// Wait for a response whose URL contains `url_fragment`, then pull its body
/// over CDP. The navigation itself is allowed to fail: protected-document
/// viewers often abort the top-level load while still streaming the resource.
async fn capture_on_page(
    page: &Page,
    url: &str,
    url_fragment: &str,
    timeout: Duration,
) -> Result<Vec<u8>> {
    page.execute(EnableParams::default()).await.map_err(cdp)?;
    let mut responses = page
        .event_listener::<EventResponseReceived>()
        .await
        .map_err(cdp)?;

    if let Err(e) = page.goto(url).await {
        debug!(url, error = %e, "Auxiliary navigation did not complete; still listening");
    }

    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            maybe_event = responses.next() => {
                let Some(event) = maybe_event else {
                    return Err(DriverError::Cdp("response event stream closed".to_string()));
                };
                if !event.response.url.contains(url_fragment) {
                    continue;
                }
                debug!(url = %event.response.url, "Matched protected-document response");
                let body = page
                    .execute(GetResponseBodyParams::new(event.request_id.clone()))
                    .await
                    .map_err(cdp)?
                    .result;
                return if body.base64_encoded {
                    base64::engine::general_purpose::STANDARD
                        .decode(body.body.as_bytes())
                        .map_err(|e| DriverError::Decode(e.to_string()))
                } else {
                    Ok(body.body.into_bytes())
                };
            }
            _ = &mut deadline => {
                return Err(DriverError::Timeout(format!("response matching {url_fragment:?}")));
            }
        }
    }
}

pub struct ChromiumPage {
    page: Page,
    cookie_domain: String,
}

#[async_trait]
impl PortalPage for ChromiumPage {
    async fn navigate(&self, url: &str) -> Result<()> {
        tokio::time::timeout(NAVIGATION_TIMEOUT, async {
            self.page.goto(url).await.map_err(cdp)?;
            self.page.wait_for_navigation().await.map_err(cdp)?;
            Ok(())
        })
        .await
        .map_err(|_| DriverError::Timeout(format!("navigation to {url}")))?
    }

    async fn current_url(&self) -> Result<String> {
        self.page
            .url()
            .await
            .map_err(cdp)?
            .ok_or_else(|| DriverError::Cdp("page reported no url".to_string()))
    }

    async fn wait_for(&self, selector: &str, timeout: Duration) -> Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.page.find_element(selector).await.is_ok() {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(DriverError::Timeout(selector.to_string()));
            }
            tokio::time::sleep(WAIT_POLL).await;
        }
    }

    async fn read_text(&self, selector: &str) -> Result<Option<String>> {
        match self.page.find_element(selector).await {
            Ok(element) => element.inner_text().await.map_err(cdp),
            Err(_) => Ok(None),
        }
    }

    async fn read_attribute(
        &self,
        selector: &str,
        attribute: &str,
    ) -> Result<Option<String>> {
        match self.page.find_element(selector).await {
            Ok(element) => element.attribute(attribute).await.map_err(cdp),
            Err(_) => Ok(None),
        }
    }

    async fn read_inner_html(&self, selector: &str) -> Result<Option<String>> {
        let expression = format!(
            "(() => {{ const el = document.querySelector({selector:?}); \
             return el ? el.innerHTML : null; }})()"
        );
        let evaluated = self.page.evaluate(expression).await.map_err(cdp)?;
        evaluated
            .into_value::<Option<String>>()
            .map_err(|e| DriverError::Cdp(e.to_string()))
    }

    async fn fill(&self, selector: &str, value: &str) -> Result<()> {
        let element = self
            .page
            .find_element(selector)
            .await
            .map_err(|_| DriverError::ElementMissing(selector.to_string()))?;
        element.click().await.map_err(cdp)?;
        element.type_str(value).await.map_err(cdp)?;
        Ok(())
    }

    async fn click(&self, selector: &str) -> Result<()> {
        let element = self
            .page
            .find_element(selector)
            .await
            .map_err(|_| DriverError::ElementMissing(selector.to_string()))?;
        element.click().await.map_err(cdp)?;
        Ok(())
    }

    async fn count(&self, selector: &str) -> Result<usize> {
        match self.page.find_elements(selector).await {
            Ok(elements) => Ok(elements.len()),
            Err(_) => Ok(0),
        }
    }

    async fn cookie(&self, name: &str) -> Result<Option<String>> {
        let cookies = self.page.get_cookies().await.map_err(cdp)?;
        Ok(cookies
            .into_iter()
            .find(|c| c.name == name)
            .map(|c| c.value))
    }

    async fn set_cookie(&self, name: &str, value: &str) -> Result<()> {
        let param = CookieParam::builder()
            .name(name)
            .value(value)
            .domain(self.cookie_domain.clone())
            .path("/")
            .build()
            .map_err(DriverError::Cdp)?;
        self.page
            .execute(SetCookiesParams::new(vec![param]))
            .await
            .map_err(cdp)?;
        Ok(())
    }

    async fn cookies(&self) -> Result<Vec<(String, String)>> {
        let cookies = self.page.get_cookies().await.map_err(cdp)?;
        Ok(cookies.into_iter().map(|c| (c.name, c.value)).collect())
    }

    async fn close(&self) -> Result<()> {
        self.page.clone().close().await.map_err(cdp)
    }
}
