//! Test doubles for the engine's boundaries.
//!
//! One mock per trait boundary:
//! - `MockBrowser` / `MockPage` (PortalBrowser / PortalPage) — a scripted
//!   portal simulator driving the same selector constants as production
//! - `MemorySessionStore` (SessionStore) — in-memory single slot
//! - `MemoryObjectStore` (ObjectStore) — records uploads
//! - `MemoryWebhookSink` (WebhookSink) — records deliveries
//! - `MockDirectFetcher` (DirectFetcher) — URL→bytes map
//! - `StaticOtpTransport` (OtpTransport) — always-ready code, counts calls
//!
//! No network, no Chromium, no filesystem.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result as AnyResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use noticewatch_common::Notice;
use noticewatch_driver::{DriverError, PortalBrowser, PortalPage, Result as DriverResult};
use otp_client::{LookupOutcome, OtpClient, OtpTransport, Result as OtpResult, RetryPolicy};

use crate::documents::{DirectFetcher, ObjectStore};
use crate::error::EngineError;
use crate::portal::selectors::{
    document_link, grid_cell, subject_link, CHALLENGE_ANSWER_INPUT, CHALLENGE_PANEL,
    CHALLENGE_QUESTION, COL_COMPANY, COL_SUBJECT, COL_TIMESTAMP, COL_TYPE, DASHBOARD_MARKER,
    DETAIL_BODY, DETAIL_CLOSE, GRID_ROWS, GRID_TABLE, LOGIN_SUBMIT, NOTICES_MENU,
    NOTICES_SUBMENU, OTP_INPUT, OTP_SUBMIT, OTP_TRIGGER, PASSWORD_INPUT, USERNAME_INPUT,
};
use crate::portal::PortalConfig;
use crate::session_store::SessionStore;
use crate::webhook::WebhookSink;

// ---------------------------------------------------------------------------
// Portal simulator
// ---------------------------------------------------------------------------

/// One row of the simulated notice grid.
#[derive(Debug, Clone)]
pub struct SimRow {
    pub notice_type: String,
    pub subject: String,
    pub company: String,
    /// Grid timestamp text, `DD-MM-YYYY HH:mm`.
    pub timestamp: String,
    /// Title attribute used as the body fallback.
    pub title: String,
    /// Detail modal markup; `None` means the modal never renders.
    pub body_html: Option<String>,
    /// The modal opens (and overlays the grid) but its body only renders
    /// after any realistic wait budget.
    pub body_renders_late: bool,
    pub document_href: Option<String>,
}

impl SimRow {
    pub fn new(timestamp: &str, subject: &str) -> Self {
        Self {
            notice_type: "Circular".to_string(),
            subject: subject.to_string(),
            company: "ACME LTD".to_string(),
            timestamp: timestamp.to_string(),
            title: format!("{subject} (summary)"),
            body_html: Some(format!(
                "<div class=\"hdr\">\n<span>Notices</span>\n<hr/>\n<div>meta</div>\n<p>{subject} body</p>"
            )),
            body_renders_late: false,
            document_href: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoginStage {
    None,
    Challenge,
    Otp,
}

/// Scripted portal state shared between the mock browser and its pages.
pub struct SimState {
    pub portal: PortalConfig,

    // Behavior knobs
    pub valid_tokens: Vec<String>,
    pub challenge_question: String,
    /// Cookie value the portal issues after a successful full login;
    /// `None` simulates a portal that never sets the session cookie.
    pub login_cookie: Option<String>,
    /// Whether the grid URL is directly addressable (vs menu traversal).
    pub direct_grid: bool,
    pub rows: Vec<SimRow>,

    // Live state
    current_url: String,
    cookies: HashMap<String, String>,
    authenticated: bool,
    stage: LoginStage,
    open_modal: Option<usize>,

    // Recordings
    pub fills: Vec<(String, String)>,
    pub clicks: Vec<String>,
    pub modal_opens: Vec<usize>,
    pub cell_reads: Vec<(usize, usize)>,
    pub page_closes: usize,
}

impl SimState {
    pub fn new(portal: PortalConfig) -> Self {
        Self {
            portal,
            valid_tokens: Vec::new(),
            challenge_question: "What was the name of your first school?".to_string(),
            login_cookie: Some("fresh-session-token".to_string()),
            direct_grid: true,
            rows: Vec::new(),
            current_url: "about:blank".to_string(),
            cookies: HashMap::new(),
            authenticated: false,
            stage: LoginStage::None,
            open_modal: None,
            fills: Vec::new(),
            clicks: Vec::new(),
            modal_opens: Vec::new(),
            cell_reads: Vec::new(),
            page_closes: 0,
        }
    }

    /// The browser context starts out with a cookie the portal still accepts.
    pub fn with_live_session(mut self) -> Self {
        self.cookies
            .insert(self.portal.session_cookie.clone(), "live-token".to_string());
        self.valid_tokens.push("live-token".to_string());
        self
    }

    pub fn with_rows(mut self, rows: Vec<SimRow>) -> Self {
        self.rows = rows;
        self
    }

    pub fn shared(self) -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(self))
    }

    fn session_ok(&self) -> bool {
        if self.authenticated {
            return true;
        }
        self.cookies
            .get(&self.portal.session_cookie)
            .is_some_and(|t| self.valid_tokens.contains(t))
    }

    /// Where the portal actually lands a navigation request.
    fn resolve(&self, url: &str) -> String {
        if url == self.portal.login_url() {
            return self.portal.login_url();
        }
        if url == self.portal.dashboard_url() {
            return if self.session_ok() {
                self.portal.dashboard_url()
            } else {
                self.portal.login_url()
            };
        }
        if url == self.portal.notices_url() {
            if !self.session_ok() {
                return self.portal.login_url();
            }
            return if self.direct_grid {
                self.portal.notices_url()
            } else {
                // Menu-traversal variant: the grid URL bounces back to the
                // dashboard.
                self.portal.dashboard_url()
            };
        }
        url.to_string()
    }

    fn on_login_page(&self) -> bool {
        self.current_url == self.portal.login_url()
    }

    fn on_dashboard(&self) -> bool {
        self.current_url == self.portal.dashboard_url()
    }

    fn on_grid(&self) -> bool {
        self.current_url == self.portal.notices_url()
    }

    fn visible(&self, selector: &str) -> bool {
        match selector {
            USERNAME_INPUT | PASSWORD_INPUT | LOGIN_SUBMIT => self.on_login_page(),
            CHALLENGE_PANEL | CHALLENGE_QUESTION | CHALLENGE_ANSWER_INPUT | OTP_TRIGGER => {
                self.on_login_page() && self.stage != LoginStage::None
            }
            OTP_INPUT | OTP_SUBMIT => self.on_login_page() && self.stage == LoginStage::Otp,
            DASHBOARD_MARKER => self.on_dashboard() && self.session_ok(),
            NOTICES_MENU | NOTICES_SUBMENU => self.on_dashboard(),
            GRID_TABLE | GRID_ROWS => self.on_grid(),
            DETAIL_BODY => self
                .open_modal
                .and_then(|row| self.rows.get(row - 1))
                .is_some_and(|r| r.body_html.is_some() && !r.body_renders_late),
            _ => false,
        }
    }

    /// Fills recorded against the credential inputs. Zero on a skipped login.
    pub fn credential_fills(&self) -> usize {
        self.fills
            .iter()
            .filter(|(sel, _)| sel == USERNAME_INPUT || sel == PASSWORD_INPUT)
            .count()
    }
}

pub struct MockPage {
    state: Arc<Mutex<SimState>>,
}

#[async_trait]
impl PortalPage for MockPage {
    async fn navigate(&self, url: &str) -> DriverResult<()> {
        let mut s = self.state.lock().unwrap();
        s.current_url = s.resolve(url);
        Ok(())
    }

    async fn current_url(&self) -> DriverResult<String> {
        Ok(self.state.lock().unwrap().current_url.clone())
    }

    async fn wait_for(&self, selector: &str, _timeout: Duration) -> DriverResult<()> {
        let s = self.state.lock().unwrap();
        if s.visible(selector) {
            Ok(())
        } else {
            Err(DriverError::Timeout(selector.to_string()))
        }
    }

    async fn read_text(&self, selector: &str) -> DriverResult<Option<String>> {
        let mut s = self.state.lock().unwrap();
        if selector == CHALLENGE_QUESTION && s.visible(CHALLENGE_QUESTION) {
            return Ok(Some(s.challenge_question.clone()));
        }
        for row in 1..=s.rows.len() {
            for column in [COL_TYPE, COL_SUBJECT, COL_COMPANY, COL_TIMESTAMP] {
                if selector == grid_cell(row, column) {
                    if !s.on_grid() {
                        return Ok(None);
                    }
                    s.cell_reads.push((row, column));
                    let value = {
                        let r = &s.rows[row - 1];
                        match column {
                            COL_TYPE => r.notice_type.clone(),
                            COL_SUBJECT => r.subject.clone(),
                            COL_COMPANY => r.company.clone(),
                            _ => r.timestamp.clone(),
                        }
                    };
                    return Ok(Some(value));
                }
            }
        }
        Ok(None)
    }

    async fn read_attribute(
        &self,
        selector: &str,
        attribute: &str,
    ) -> DriverResult<Option<String>> {
        let s = self.state.lock().unwrap();
        for row in 1..=s.rows.len() {
            if selector == subject_link(row) && attribute == "title" {
                return Ok(Some(s.rows[row - 1].title.clone()));
            }
            if selector == document_link(row) && attribute == "href" {
                return Ok(s.rows[row - 1].document_href.clone());
            }
        }
        Ok(None)
    }

    async fn read_inner_html(&self, selector: &str) -> DriverResult<Option<String>> {
        let s = self.state.lock().unwrap();
        if selector == DETAIL_BODY {
            return Ok(s
                .open_modal
                .and_then(|row| s.rows.get(row - 1))
                .and_then(|r| r.body_html.clone()));
        }
        Ok(None)
    }

    async fn fill(&self, selector: &str, value: &str) -> DriverResult<()> {
        let mut s = self.state.lock().unwrap();
        s.fills.push((selector.to_string(), value.to_string()));
        Ok(())
    }

    async fn click(&self, selector: &str) -> DriverResult<()> {
        let mut s = self.state.lock().unwrap();
        s.clicks.push(selector.to_string());
        match selector {
            LOGIN_SUBMIT => s.stage = LoginStage::Challenge,
            OTP_TRIGGER => s.stage = LoginStage::Otp,
            OTP_SUBMIT => {
                s.authenticated = true;
                if let Some(token) = s.login_cookie.clone() {
                    let name = s.portal.session_cookie.clone();
                    s.cookies.insert(name, token.clone());
                    s.valid_tokens.push(token);
                }
                s.current_url = s.portal.dashboard_url();
            }
            NOTICES_SUBMENU => {
                if s.on_dashboard() {
                    s.current_url = s.portal.notices_url();
                }
            }
            DETAIL_CLOSE => s.open_modal = None,
            _ => {
                // An open modal overlays the grid; clicks on the rows behind
                // it land on the overlay and do nothing.
                if s.open_modal.is_some() {
                    return Ok(());
                }
                for row in 1..=s.rows.len() {
                    if selector == subject_link(row) {
                        s.open_modal = Some(row);
                        s.modal_opens.push(row);
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    async fn count(&self, selector: &str) -> DriverResult<usize> {
        let s = self.state.lock().unwrap();
        if selector == GRID_ROWS && s.on_grid() {
            Ok(s.rows.len())
        } else {
            Ok(0)
        }
    }

    async fn cookie(&self, name: &str) -> DriverResult<Option<String>> {
        Ok(self.state.lock().unwrap().cookies.get(name).cloned())
    }

    async fn set_cookie(&self, name: &str, value: &str) -> DriverResult<()> {
        self.state
            .lock()
            .unwrap()
            .cookies
            .insert(name.to_string(), value.to_string());
        Ok(())
    }

    async fn cookies(&self) -> DriverResult<Vec<(String, String)>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .cookies
            .iter()
            .map(|(n, v)| (n.clone(), v.clone()))
            .collect())
    }

    async fn close(&self) -> DriverResult<()> {
        self.state.lock().unwrap().page_closes += 1;
        Ok(())
    }
}

#[derive(Clone)]
pub struct MockBrowser {
    state: Arc<Mutex<SimState>>,
    captures: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    pub capture_calls: Arc<Mutex<Vec<String>>>,
    close_calls: Arc<AtomicUsize>,
}

impl MockBrowser {
    pub fn new(state: Arc<Mutex<SimState>>) -> Self {
        Self {
            state,
            captures: Arc::new(Mutex::new(HashMap::new())),
            capture_calls: Arc::new(Mutex::new(Vec::new())),
            close_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Register the bytes the viewer would stream for `url`.
    pub fn with_capture(self, url: &str, bytes: Vec<u8>) -> Self {
        self.captures
            .lock()
            .unwrap()
            .insert(url.to_string(), bytes);
        self
    }

    pub fn close_count(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PortalBrowser for MockBrowser {
    async fn open_page(&self) -> DriverResult<Box<dyn PortalPage>> {
        Ok(Box::new(MockPage {
            state: self.state.clone(),
        }))
    }

    async fn capture_response(
        &self,
        url: &str,
        url_fragment: &str,
        _timeout: Duration,
    ) -> DriverResult<Vec<u8>> {
        self.capture_calls.lock().unwrap().push(url.to_string());
        self.captures
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| DriverError::Timeout(url_fragment.to_string()))
    }

    async fn close(&self) -> DriverResult<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemorySessionStore
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemorySessionStore {
    token: Mutex<Option<String>>,
    saves: Mutex<Vec<String>>,
}

impl MemorySessionStore {
    pub fn preloaded(token: &str) -> Self {
        Self {
            token: Mutex::new(Some(token.to_string())),
            saves: Mutex::new(Vec::new()),
        }
    }

    pub fn current(&self) -> Option<String> {
        self.token.lock().unwrap().clone()
    }

    /// Every token ever saved, in order.
    pub fn saved(&self) -> Vec<String> {
        self.saves.lock().unwrap().clone()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self) -> AnyResult<Option<String>> {
        Ok(self.token.lock().unwrap().clone())
    }

    async fn save(&self, token: &str) -> AnyResult<()> {
        *self.token.lock().unwrap() = Some(token.to_string());
        self.saves.lock().unwrap().push(token.to_string());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryObjectStore
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryObjectStore {
    uploads: Mutex<Vec<(String, Vec<u8>)>>,
}

impl MemoryObjectStore {
    pub fn uploads(&self) -> Vec<(String, Vec<u8>)> {
        self.uploads.lock().unwrap().clone()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn upload(&self, filename: &str, bytes: Vec<u8>) -> AnyResult<String> {
        self.uploads
            .lock()
            .unwrap()
            .push((filename.to_string(), bytes));
        Ok(format!("https://files.example/{filename}"))
    }
}

// ---------------------------------------------------------------------------
// MemoryWebhookSink
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryWebhookSink {
    deliveries: Mutex<Vec<Vec<Notice>>>,
    fail_status: Option<u16>,
}

impl MemoryWebhookSink {
    pub fn failing(status: u16) -> Self {
        Self {
            deliveries: Mutex::new(Vec::new()),
            fail_status: Some(status),
        }
    }

    pub fn deliveries(&self) -> Vec<Vec<Notice>> {
        self.deliveries.lock().unwrap().clone()
    }
}

#[async_trait]
impl WebhookSink for MemoryWebhookSink {
    async fn deliver(&self, notices: &[Notice]) -> Result<(), EngineError> {
        if let Some(status) = self.fail_status {
            return Err(EngineError::Delivery {
                status,
                message: "forced failure".to_string(),
            });
        }
        self.deliveries.lock().unwrap().push(notices.to_vec());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MockDirectFetcher
// ---------------------------------------------------------------------------

/// URL→bytes map; unregistered URLs fail, pushing the pipeline onto the
/// interception strategy.
#[derive(Default)]
pub struct MockDirectFetcher {
    responses: Mutex<HashMap<String, Vec<u8>>>,
}

impl MockDirectFetcher {
    pub fn with_response(self, url: &str, bytes: Vec<u8>) -> Self {
        self.responses
            .lock()
            .unwrap()
            .insert(url.to_string(), bytes);
        self
    }
}

#[async_trait]
impl DirectFetcher for MockDirectFetcher {
    async fn fetch(&self, url: &str, _cookie_header: &str, _referer: &str) -> AnyResult<Vec<u8>> {
        match self.responses.lock().unwrap().get(url) {
            Some(bytes) => Ok(bytes.clone()),
            None => bail!("no direct response configured for {url}"),
        }
    }
}

// ---------------------------------------------------------------------------
// StaticOtpTransport
// ---------------------------------------------------------------------------

/// Transport whose code is always ready. Counts lookups so tests can assert
/// that failing logins never reach the OTP service.
pub struct StaticOtpTransport {
    code: String,
    calls: Arc<AtomicU32>,
}

#[async_trait]
impl OtpTransport for StaticOtpTransport {
    async fn lookup(&self, _: &str, _: DateTime<Utc>) -> OtpResult<LookupOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(LookupOutcome::Ready(self.code.clone()))
    }
}

/// An OtpClient backed by [`StaticOtpTransport`], plus its call counter.
pub fn static_otp(code: &str) -> (Arc<OtpClient>, Arc<AtomicU32>) {
    let calls = Arc::new(AtomicU32::new(0));
    let transport = StaticOtpTransport {
        code: code.to_string(),
        calls: calls.clone(),
    };
    let client = OtpClient::with_transport(Box::new(transport), RetryPolicy::default());
    (Arc::new(client), calls)
}

/// Portal config every sim test runs against.
pub fn sim_portal() -> PortalConfig {
    PortalConfig::new("https://portal.example")
}
