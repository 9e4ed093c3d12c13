//! One end-to-end run: establish a session, crawl, deliver, and guarantee
//! cleanup on every exit path.

use std::sync::Arc;

use chrono::NaiveDateTime;
use noticewatch_common::Credentials;
use noticewatch_driver::PortalBrowser;
use otp_client::OtpClient;
use tracing::{error, info};

use crate::auth::AuthSession;
use crate::crawler::NoticeCrawler;
use crate::documents::{DocumentPipeline, ObjectStore};
use crate::error::Result;
use crate::portal::PortalConfig;
use crate::session_store::SessionStore;
use crate::webhook::WebhookSink;

/// Everything a job needs, assembled by the front end (or by tests, from
/// mocks). The browser context is owned by exactly one job.
pub struct JobDeps {
    pub browser: Box<dyn PortalBrowser>,
    pub session_store: Arc<dyn SessionStore>,
    pub otp: Arc<OtpClient>,
    pub object_store: Arc<dyn ObjectStore>,
    pub webhook: Arc<dyn WebhookSink>,
    pub portal: PortalConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobOutcome {
    pub notices: usize,
    pub delivered: bool,
}

/// Run one scrape job to completion. The session is closed exactly once on
/// every path; the success path closes it early to free the browser before
/// potentially long delivery I/O, and the final close is then a no-op.
pub async fn run_job(
    credentials: Credentials,
    watermark: NaiveDateTime,
    deps: JobDeps,
) -> Result<JobOutcome> {
    let JobDeps {
        browser,
        session_store,
        otp,
        object_store,
        webhook,
        portal,
    } = deps;

    let mut session = AuthSession::init(browser, session_store, otp, portal.clone()).await?;
    let outcome = run_to_delivery(
        &mut session,
        &credentials,
        watermark,
        object_store,
        webhook,
        &portal,
    )
    .await;
    session.close().await;

    match &outcome {
        Ok(result) => info!(
            identifier = %credentials.identifier(),
            notices = result.notices,
            delivered = result.delivered,
            "Scrape job finished"
        ),
        Err(e) => error!(
            identifier = %credentials.identifier(),
            error = %e,
            "Scrape job failed"
        ),
    }
    outcome
}

async fn run_to_delivery(
    session: &mut AuthSession,
    credentials: &Credentials,
    watermark: NaiveDateTime,
    object_store: Arc<dyn ObjectStore>,
    webhook: Arc<dyn WebhookSink>,
    portal: &PortalConfig,
) -> Result<JobOutcome> {
    session.login(credentials).await?;

    let notices = {
        let pipeline = DocumentPipeline::new(object_store, portal.clone());
        let crawler = NoticeCrawler::new(session.page(), session.browser(), &pipeline, portal);
        crawler.scan(watermark).await?
    };

    if notices.is_empty() {
        info!("No notices newer than watermark; nothing to deliver");
        return Ok(JobOutcome {
            notices: 0,
            delivered: false,
        });
    }

    // Free the browser before delivery; the orchestrator's final close
    // becomes a no-op.
    session.close().await;

    webhook.deliver(&notices).await?;
    Ok(JobOutcome {
        notices: notices.len(),
        delivered: true,
    })
}
