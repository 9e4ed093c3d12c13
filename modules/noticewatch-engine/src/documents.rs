//! Protected-document recovery: turn a transient, access-protected document
//! reference into a durable public URL.
//!
//! Which recovery strategy works depends on an undocumented portal variant,
//! so the pipeline probes: a direct authenticated fetch first (cheap, no
//! extra tab), then response interception through an auxiliary tab.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use noticewatch_driver::{PortalBrowser, PortalPage, PORTAL_USER_AGENT};
use reqwest::header;
use tracing::{debug, warn};

use crate::portal::PortalConfig;

/// Resource path the portal's internal viewer streams protected bytes from.
const VIEWER_RESOURCE_FRAGMENT: &str = "/docviewer/stream";
/// Budget for the viewer to produce a matching response.
const INTERCEPT_TIMEOUT: Duration = Duration::from_secs(20);

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum filename stem length handed to storage.
const FILENAME_STEM_MAX: usize = 80;

// ---------------------------------------------------------------------------
// Boundaries
// ---------------------------------------------------------------------------

/// Direct authenticated GET of a protected URL, sharing the browser's
/// session via its cookie jar.
#[async_trait]
pub trait DirectFetcher: Send + Sync {
    async fn fetch(&self, url: &str, cookie_header: &str, referer: &str) -> Result<Vec<u8>>;
}

pub struct HttpDirectFetcher {
    client: reqwest::Client,
}

impl HttpDirectFetcher {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .expect("Failed to build HTTP client");
        Self { client }
    }
}

impl Default for HttpDirectFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DirectFetcher for HttpDirectFetcher {
    async fn fetch(&self, url: &str, cookie_header: &str, referer: &str) -> Result<Vec<u8>> {
        let resp = self
            .client
            .get(url)
            .header(header::USER_AGENT, PORTAL_USER_AGENT)
            .header(
                header::ACCEPT,
                "application/pdf,application/octet-stream;q=0.9,*/*;q=0.8",
            )
            .header(header::REFERER, referer)
            .header(header::COOKIE, cookie_header)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            bail!("document fetch returned status {status}");
        }
        let content_type = resp
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if content_type.starts_with("text/html") {
            bail!("portal returned the viewer shell instead of document bytes");
        }
        Ok(resp.bytes().await?.to_vec())
    }
}

/// Durable storage for recovered documents. Returns a publicly resolvable
/// URL for the uploaded bytes.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn upload(&self, filename: &str, bytes: Vec<u8>) -> Result<String>;
}

pub struct HttpObjectStore {
    client: reqwest::Client,
    upload_url: String,
}

impl HttpObjectStore {
    pub fn new(upload_url: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .expect("Failed to build HTTP client");
        Self {
            client,
            upload_url: upload_url.to_string(),
        }
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn upload(&self, filename: &str, bytes: Vec<u8>) -> Result<String> {
        let resp = self
            .client
            .post(&self.upload_url)
            .header("x-filename", filename)
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .body(bytes)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            bail!("upload rejected (status {status}): {message}");
        }
        let public_url = resp.text().await?.trim().to_string();
        if public_url.is_empty() {
            bail!("upload succeeded but returned no public URL");
        }
        Ok(public_url)
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

pub struct DocumentPipeline {
    direct: Box<dyn DirectFetcher>,
    store: Arc<dyn ObjectStore>,
    portal: PortalConfig,
}

impl DocumentPipeline {
    pub fn new(store: Arc<dyn ObjectStore>, portal: PortalConfig) -> Self {
        Self {
            direct: Box::new(HttpDirectFetcher::new()),
            store,
            portal,
        }
    }

    pub fn with_fetcher(
        direct: Box<dyn DirectFetcher>,
        store: Arc<dyn ObjectStore>,
        portal: PortalConfig,
    ) -> Self {
        Self {
            direct,
            store,
            portal,
        }
    }

    /// Recover the document behind `document_url` and upload it. Best-effort
    /// end to end: every failure yields `None` and a log line.
    pub async fn recover(
        &self,
        browser: &dyn PortalBrowser,
        page: &dyn PortalPage,
        document_url: &str,
        company: &str,
        subject: &str,
    ) -> Option<String> {
        let bytes = match self.recover_bytes(browser, page, document_url).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(url = %document_url, error = %e, "Document recovery failed");
                return None;
            }
        };

        let filename = document_filename(company, subject);
        match self.store.upload(&filename, bytes).await {
            Ok(public_url) => {
                debug!(url = %public_url, "Document uploaded");
                Some(public_url)
            }
            Err(e) => {
                warn!(filename, error = %e, "Document upload failed");
                None
            }
        }
    }

    async fn recover_bytes(
        &self,
        browser: &dyn PortalBrowser,
        page: &dyn PortalPage,
        document_url: &str,
    ) -> Result<Vec<u8>> {
        let cookie_header = page
            .cookies()
            .await
            .context("reading browser cookies")?
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("; ");

        match self
            .direct
            .fetch(document_url, &cookie_header, &self.portal.notices_url())
            .await
        {
            Ok(bytes) if !bytes.is_empty() => return Ok(bytes),
            Ok(_) => debug!(url = %document_url, "Direct fetch returned no bytes"),
            Err(e) => debug!(url = %document_url, error = %e, "Direct fetch failed"),
        }

        debug!(url = %document_url, "Trying response interception");
        browser
            .capture_response(document_url, VIEWER_RESOURCE_FRAGMENT, INTERCEPT_TIMEOUT)
            .await
            .context("response interception failed")
    }
}

/// Storage filename derived from company and subject.
pub fn document_filename(company: &str, subject: &str) -> String {
    let slug = |s: &str| {
        s.chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_lowercase()
                } else {
                    '-'
                }
            })
            .collect::<String>()
    };
    let mut stem = format!("{}-{}", slug(company), slug(subject));
    while stem.contains("--") {
        stem = stem.replace("--", "-");
    }
    let stem = stem.trim_matches('-');
    let stem = if stem.is_empty() { "document" } else { stem };
    let stem: String = stem.chars().take(FILENAME_STEM_MAX).collect();
    format!("{}.pdf", stem.trim_end_matches('-'))
}
