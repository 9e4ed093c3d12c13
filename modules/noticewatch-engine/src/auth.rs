//! Login state machine. Produces an authenticated page, performing the full
//! three-factor sequence only when neither the current browser context nor a
//! persisted token is still accepted by the portal.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use noticewatch_common::Credentials;
use noticewatch_driver::{PortalBrowser, PortalPage};
use otp_client::OtpClient;
use tracing::{debug, info, warn};

use crate::error::{EngineError, Result};
use crate::portal::selectors::{
    CHALLENGE_ANSWER_INPUT, CHALLENGE_PANEL, CHALLENGE_QUESTION, DASHBOARD_MARKER, LOGIN_SUBMIT,
    OTP_INPUT, OTP_SUBMIT, OTP_TRIGGER, PASSWORD_INPUT, USERNAME_INPUT,
};
use crate::portal::PortalConfig;
use crate::session_store::SessionStore;

/// Budget for each form panel to appear.
const FORM_TIMEOUT: Duration = Duration::from_secs(10);
/// Budget for the portal to land on the authenticated page after submit.
const LANDING_TIMEOUT: Duration = Duration::from_secs(30);

pub struct AuthSession {
    browser: Box<dyn PortalBrowser>,
    page: Box<dyn PortalPage>,
    store: Arc<dyn SessionStore>,
    otp: Arc<OtpClient>,
    portal: PortalConfig,
    closed: bool,
}

impl AuthSession {
    /// Acquire a page in a fresh browser context. Fatal if the automation
    /// driver cannot produce one.
    pub async fn init(
        browser: Box<dyn PortalBrowser>,
        store: Arc<dyn SessionStore>,
        otp: Arc<OtpClient>,
        portal: PortalConfig,
    ) -> Result<Self> {
        let page = browser.open_page().await?;
        Ok(Self {
            browser,
            page,
            store,
            otp,
            portal,
            closed: false,
        })
    }

    /// The authenticated page. Only meaningful after `login` succeeded.
    pub fn page(&self) -> &dyn PortalPage {
        self.page.as_ref()
    }

    pub fn browser(&self) -> &dyn PortalBrowser {
        self.browser.as_ref()
    }

    /// Reach an authenticated state, re-submitting credentials only when
    /// strictly necessary. On every success path the current session cookie
    /// is persisted, overwriting the slot.
    pub async fn login(&mut self, credentials: &Credentials) -> Result<()> {
        let identifier = credentials.identifier();

        if self.probe_alive().await? {
            info!(identifier, "Existing session still live; skipping login");
            return self.persist_token(identifier).await;
        }

        if let Some(token) = self.store.load().await? {
            debug!(identifier, "Injecting persisted session token");
            self.page
                .set_cookie(&self.portal.session_cookie, &token)
                .await?;
            if self.probe_alive().await? {
                info!(identifier, "Persisted token accepted; skipping login");
                return self.persist_token(identifier).await;
            }
            debug!(identifier, "Persisted token rejected by portal");
        }

        self.full_login(credentials).await?;
        self.persist_token(identifier).await
    }

    /// Navigate to the authenticated-only landing page; a redirect back to
    /// the login page means the session is not alive.
    async fn probe_alive(&self) -> Result<bool> {
        self.page.navigate(&self.portal.dashboard_url()).await?;
        let landed = self.page.current_url().await?;
        Ok(landed.starts_with(&self.portal.dashboard_url()))
    }

    /// The full three-factor sequence: credentials, knowledge challenge,
    /// out-of-band one-time code. Strictly sequential; the only retries are
    /// the ones OTP polling performs internally.
    async fn full_login(&self, credentials: &Credentials) -> Result<()> {
        let identifier = credentials.identifier();
        info!(identifier, "Performing full portal login");

        self.page.navigate(&self.portal.login_url()).await?;
        self.page.wait_for(USERNAME_INPUT, FORM_TIMEOUT).await?;
        self.page.fill(USERNAME_INPUT, identifier).await?;
        self.page
            .fill(PASSWORD_INPUT, credentials.password())
            .await?;
        self.page.click(LOGIN_SUBMIT).await?;

        self.page.wait_for(CHALLENGE_PANEL, FORM_TIMEOUT).await?;
        let question = self
            .page
            .read_text(CHALLENGE_QUESTION)
            .await?
            .map(|q| q.trim().to_string())
            .filter(|q| !q.is_empty())
            .ok_or_else(|| {
                EngineError::Navigation("challenge panel rendered without a question".to_string())
            })?;
        let answer = credentials.answer_for(&question).ok_or_else(|| {
            EngineError::ChallengeAnswerMissing {
                identifier: identifier.to_string(),
                question: question.clone(),
            }
        })?;
        self.page.fill(CHALLENGE_ANSWER_INPUT, answer).await?;

        let requested_at = Utc::now();
        self.page.click(OTP_TRIGGER).await?;
        let code = self
            .otp
            .fetch_code(identifier, requested_at)
            .await
            .map_err(|source| EngineError::OtpTimeout {
                identifier: identifier.to_string(),
                source,
            })?;

        self.page.wait_for(OTP_INPUT, FORM_TIMEOUT).await?;
        self.page.fill(OTP_INPUT, &code).await?;
        self.page.click(OTP_SUBMIT).await?;
        self.page.wait_for(DASHBOARD_MARKER, LANDING_TIMEOUT).await?;

        info!(identifier, "Portal login completed");
        Ok(())
    }

    /// Capture the session cookie and overwrite the persisted slot. An
    /// absent cookie means the portal did not actually accept the login.
    async fn persist_token(&self, identifier: &str) -> Result<()> {
        let token = self
            .page
            .cookie(&self.portal.session_cookie)
            .await?
            .ok_or_else(|| EngineError::SessionTokenMissing {
                identifier: identifier.to_string(),
            })?;
        self.store.save(&token).await?;
        Ok(())
    }

    /// Best-effort teardown. Idempotent; failures are logged and never
    /// override the job's original outcome.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.page.close().await {
            warn!(error = %e, "Failed to close portal page");
        }
        if let Err(e) = self.browser.close().await {
            warn!(error = %e, "Failed to close browser context");
        }
    }
}
