//! URL layout and markup contract of the target portal. Everything the
//! engine knows about the portal's structure lives here; a markup change
//! touches this file and nothing else.

/// URL layout of the portal one job operates against.
#[derive(Debug, Clone)]
pub struct PortalConfig {
    pub base_url: String,
    /// Name of the cookie the portal issues for an authenticated session.
    pub session_cookie: String,
}

impl PortalConfig {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            session_cookie: "JSESSIONID".to_string(),
        }
    }

    /// Login entry point.
    pub fn login_url(&self) -> String {
        format!("{}/login", self.base_url)
    }

    /// Authenticated-only landing page, used as the liveness probe target.
    pub fn dashboard_url(&self) -> String {
        format!("{}/dashboard", self.base_url)
    }

    /// The notice grid.
    pub fn notices_url(&self) -> String {
        format!("{}/notices", self.base_url)
    }

    /// Host the session cookie is scoped to.
    pub fn cookie_domain(&self) -> String {
        url::Url::parse(&self.base_url)
            .ok()
            .and_then(|u| u.host_str().map(String::from))
            .unwrap_or_else(|| self.base_url.clone())
    }
}

/// Selectors for every element the engine touches. The mocks interpret the
/// same constants, so tests and production drive identical markup.
pub mod selectors {
    // Login form
    pub const USERNAME_INPUT: &str = "#loginId";
    pub const PASSWORD_INPUT: &str = "#loginPassword";
    pub const LOGIN_SUBMIT: &str = "#loginSubmit";

    // Security challenge panel
    pub const CHALLENGE_PANEL: &str = "#securityChallenge";
    pub const CHALLENGE_QUESTION: &str = "#securityChallenge .challenge-question";
    pub const CHALLENGE_ANSWER_INPUT: &str = "#challengeAnswer";

    // OTP step
    pub const OTP_TRIGGER: &str = "#sendOtp";
    pub const OTP_INPUT: &str = "#otpCode";
    pub const OTP_SUBMIT: &str = "#verifyOtp";

    // Authenticated landing page
    pub const DASHBOARD_MARKER: &str = "#dashboardHome";

    // Menu traversal (portal variants where the grid URL is not directly
    // addressable)
    pub const NOTICES_MENU: &str = "#mainMenu .menu-notices";
    pub const NOTICES_SUBMENU: &str = "#mainMenu .menu-notices-all";

    // Notice grid
    pub const GRID_TABLE: &str = "#noticeGrid";
    pub const GRID_ROWS: &str = "#noticeGrid tbody tr";

    // Detail modal
    pub const DETAIL_BODY: &str = "#noticeDetailModal .modal-body";
    pub const DETAIL_CLOSE: &str = "#noticeDetailModal .btn-close";

    // Fixed column positions inside a grid row
    pub const COL_TYPE: usize = 1;
    pub const COL_SUBJECT: usize = 2;
    pub const COL_COMPANY: usize = 3;
    pub const COL_TIMESTAMP: usize = 4;
    pub const COL_DOCUMENT: usize = 5;

    /// Cell at (1-based) row and column.
    pub fn grid_cell(row: usize, column: usize) -> String {
        format!("#noticeGrid tbody tr:nth-child({row}) td:nth-child({column})")
    }

    /// Link that opens the row's detail modal.
    pub fn subject_link(row: usize) -> String {
        format!("#noticeGrid tbody tr:nth-child({row}) td:nth-child({COL_SUBJECT}) a")
    }

    /// Download action for the row's protected document, when present.
    pub fn document_link(row: usize) -> String {
        format!("#noticeGrid tbody tr:nth-child({row}) td:nth-child({COL_DOCUMENT}) a")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_are_rooted_at_base() {
        let portal = PortalConfig::new("https://portal.example/");
        assert_eq!(portal.login_url(), "https://portal.example/login");
        assert_eq!(portal.dashboard_url(), "https://portal.example/dashboard");
        assert_eq!(portal.notices_url(), "https://portal.example/notices");
    }

    #[test]
    fn cookie_domain_is_host_only() {
        let portal = PortalConfig::new("https://portal.example:8443/app");
        assert_eq!(portal.cookie_domain(), "portal.example");
    }
}
