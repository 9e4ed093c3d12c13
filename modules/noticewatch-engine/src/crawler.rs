//! Incremental crawl of the notice grid.
//!
//! The grid is sorted newest-first by the portal (an external invariant this
//! system does not enforce); enumeration stops at the first row at or before
//! the watermark. Every extraction step degrades to a fallback value instead
//! of raising, so a bad row can never abort the crawl.

use std::sync::LazyLock;
use std::time::Duration;

use chrono::NaiveDateTime;
use noticewatch_common::{Notice, PORTAL_TIMESTAMP_FORMAT, WIRE_TIMESTAMP_FORMAT};
use noticewatch_driver::{PortalBrowser, PortalPage};
use regex::Regex;
use tracing::{debug, info, warn};

use crate::documents::DocumentPipeline;
use crate::error::{EngineError, Result};
use crate::portal::selectors::{
    document_link, grid_cell, subject_link, COL_COMPANY, COL_SUBJECT, COL_TIMESTAMP, COL_TYPE,
    DETAIL_BODY, DETAIL_CLOSE, GRID_ROWS, GRID_TABLE, NOTICES_MENU, NOTICES_SUBMENU,
};
use crate::portal::PortalConfig;

/// Budget for the grid to render when its URL is directly addressable.
const DIRECT_GRID_TIMEOUT: Duration = Duration::from_secs(10);
/// Budget for each menu step and the grid itself on the traversal variant.
const MENU_TIMEOUT: Duration = Duration::from_secs(10);
const GRID_TIMEOUT: Duration = Duration::from_secs(30);
/// Budget for a row's detail modal to render.
const MODAL_TIMEOUT: Duration = Duration::from_secs(5);

/// Leading lines of the detail modal markup that are layout scaffolding,
/// not notice content.
const DETAIL_BOILERPLATE_LINES: usize = 4;

/// Sentinel for grid cells the portal left blank.
const MISSING_FIELD: &str = "N/A";

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").expect("valid regex"));

pub struct NoticeCrawler<'a> {
    page: &'a dyn PortalPage,
    browser: &'a dyn PortalBrowser,
    documents: &'a DocumentPipeline,
    portal: &'a PortalConfig,
}

impl<'a> NoticeCrawler<'a> {
    pub fn new(
        page: &'a dyn PortalPage,
        browser: &'a dyn PortalBrowser,
        documents: &'a DocumentPipeline,
        portal: &'a PortalConfig,
    ) -> Self {
        Self {
            page,
            browser,
            documents,
            portal,
        }
    }

    /// Enumerate notices strictly newer than the watermark, newest-first.
    /// Each call performs a fresh navigation and read; the result is finite
    /// and not restartable.
    pub async fn scan(&self, watermark: NaiveDateTime) -> Result<Vec<Notice>> {
        self.open_grid().await?;

        let total = self.page.count(GRID_ROWS).await.unwrap_or(0);
        info!(rows = total, watermark = %watermark, "Notice grid rendered; scanning");

        let mut notices = Vec::new();
        for row in 1..=total {
            let raw_timestamp = match self.page.read_text(&grid_cell(row, COL_TIMESTAMP)).await {
                Ok(Some(text)) if !text.trim().is_empty() => text.trim().to_string(),
                Ok(_) => {
                    warn!(row, "Row timestamp blank; skipping row");
                    continue;
                }
                Err(e) => {
                    warn!(row, error = %e, "Row timestamp unreadable; skipping row");
                    continue;
                }
            };
            let noticed_at =
                match NaiveDateTime::parse_from_str(&raw_timestamp, PORTAL_TIMESTAMP_FORMAT) {
                    Ok(parsed) => parsed,
                    Err(e) => {
                        warn!(row, raw = %raw_timestamp, error = %e,
                              "Row timestamp malformed; skipping row");
                        continue;
                    }
                };
            if noticed_at <= watermark {
                debug!(row, "Reached watermark; stopping scan");
                break;
            }

            notices.push(self.extract_row(row, noticed_at).await);
        }

        Ok(notices)
    }

    /// Direct navigation first; portal variants that only expose the grid
    /// behind the main menu fall back to the traversal sequence. Failure
    /// here is fatal to the whole crawl.
    async fn open_grid(&self) -> Result<()> {
        self.page
            .navigate(&self.portal.notices_url())
            .await
            .map_err(|e| EngineError::Navigation(e.to_string()))?;
        if self.page.wait_for(GRID_TABLE, DIRECT_GRID_TIMEOUT).await.is_ok() {
            return Ok(());
        }

        debug!("Grid URL not directly addressable; traversing the menu");
        let traverse = async {
            self.page.navigate(&self.portal.dashboard_url()).await?;
            self.page.wait_for(NOTICES_MENU, MENU_TIMEOUT).await?;
            self.page.click(NOTICES_MENU).await?;
            self.page.wait_for(NOTICES_SUBMENU, MENU_TIMEOUT).await?;
            self.page.click(NOTICES_SUBMENU).await?;
            self.page.wait_for(GRID_TABLE, GRID_TIMEOUT).await
        };
        traverse
            .await
            .map_err(|e| EngineError::Navigation(e.to_string()))
    }

    /// Structured fields from fixed column positions. Every step yields a
    /// fallback value on failure, so extraction itself cannot raise.
    async fn extract_row(&self, row: usize, noticed_at: NaiveDateTime) -> Notice {
        let notice_type = self.cell_or_missing(row, COL_TYPE).await;
        let subject = self.cell_or_missing(row, COL_SUBJECT).await;
        let company = self.cell_or_missing(row, COL_COMPANY).await;
        let notice_text = self.read_body(row).await;
        let document_url = self.recover_document(row, &company, &subject).await;

        Notice {
            notice_type,
            subject,
            company,
            notice_text,
            notice_at: noticed_at.format(WIRE_TIMESTAMP_FORMAT).to_string(),
            document_url,
            notice_at_parsed: noticed_at,
        }
    }

    async fn cell_or_missing(&self, row: usize, column: usize) -> String {
        match self.page.read_text(&grid_cell(row, column)).await {
            Ok(Some(text)) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => MISSING_FIELD.to_string(),
            Err(e) => {
                debug!(row, column, error = %e, "Cell unreadable; using sentinel");
                MISSING_FIELD.to_string()
            }
        }
    }

    /// Free-text body from the row's detail modal; falls back to the row
    /// link's title attribute when the modal cannot be opened or read within
    /// its budget.
    async fn read_body(&self, row: usize) -> String {
        let link = subject_link(row);

        let clicked = self.page.click(&link).await.is_ok();
        if clicked && self.page.wait_for(DETAIL_BODY, MODAL_TIMEOUT).await.is_ok() {
            let markup = self.page.read_inner_html(DETAIL_BODY).await;
            let _ = self.page.click(DETAIL_CLOSE).await;
            if let Ok(Some(html)) = markup {
                let text = clean_detail_markup(&html);
                if !text.is_empty() {
                    return text;
                }
            }
        } else if clicked {
            // A modal that renders after the wait budget would stay open and
            // overlay the grid for every following row.
            let _ = self.page.click(DETAIL_CLOSE).await;
        }

        debug!(row, "Detail view unavailable; falling back to title attribute");
        match self.page.read_attribute(&link, "title").await {
            Ok(Some(title)) if !title.trim().is_empty() => title.trim().to_string(),
            _ => MISSING_FIELD.to_string(),
        }
    }

    /// Attachment recovery is best-effort: any failure degrades the row to
    /// "no document" instead of dropping it.
    async fn recover_document(&self, row: usize, company: &str, subject: &str) -> Option<String> {
        let href = match self.page.read_attribute(&document_link(row), "href").await {
            Ok(Some(href)) if !href.trim().is_empty() => href.trim().to_string(),
            Ok(_) => return None,
            Err(e) => {
                debug!(row, error = %e, "Document link unreadable; treating as no document");
                return None;
            }
        };
        let document_url = absolutize(&href, &self.portal.base_url);
        self.documents
            .recover(self.browser, self.page, &document_url, company, subject)
            .await
    }
}

/// Drop the modal's structural boilerplate, strip tags, and collapse
/// whitespace into a single-line body text.
fn clean_detail_markup(html: &str) -> String {
    let content = html
        .lines()
        .skip(DETAIL_BOILERPLATE_LINES)
        .collect::<Vec<_>>()
        .join("\n");
    let text = TAG_RE.replace_all(&content, "");
    let text = text
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">");
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Portal hrefs are frequently relative; resolve them against the base URL.
fn absolutize(href: &str, base_url: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        return href.to_string();
    }
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        href.trim_start_matches('/')
    )
}
