//! HTTP front end. One endpoint triggers a scrape job; the request is
//! acknowledged immediately and the job runs detached, reporting its outcome
//! through logs and the delivery webhook only.

use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDateTime;
use serde_json::{json, Value};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use noticewatch_common::{parse_watermark, Config, Credentials, ScrapeRequest};
use noticewatch_driver::ChromiumBrowser;
use noticewatch_engine::{
    run_job, FileSessionStore, HttpObjectStore, HttpWebhookSink, JobDeps, PortalConfig,
};
use otp_client::OtpClient;

struct AppState {
    config: Config,
}

async fn health() -> &'static str {
    "ok"
}

/// Accept a scrape trigger. Validation failures are the caller's problem and
/// answer 400; everything past this point is detached from the request.
async fn scrape_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ScrapeRequest>,
) -> (StatusCode, Json<Value>) {
    let credentials = Credentials::new(
        request.identifier,
        request.password,
        request.security_answers,
    );
    if let Err(e) = credentials.validate() {
        return (StatusCode::BAD_REQUEST, Json(json!({ "error": e.to_string() })));
    }
    let watermark = match parse_watermark(&request.last_known_notice_at) {
        Ok(parsed) => parsed,
        Err(e) => {
            return (StatusCode::BAD_REQUEST, Json(json!({ "error": e.to_string() })));
        }
    };

    info!(
        identifier = %credentials.identifier(),
        watermark = %watermark,
        "Scrape job accepted"
    );
    let config = state.config.clone();
    tokio::spawn(async move {
        if let Err(e) = launch_job(config, credentials, watermark).await {
            error!(error = %e, "Scrape job did not complete");
        }
    });

    (StatusCode::ACCEPTED, Json(json!({ "status": "accepted" })))
}

/// Assemble the production dependency set and run one job. Owns the browser
/// context for the job's whole lifetime.
async fn launch_job(
    config: Config,
    credentials: Credentials,
    watermark: NaiveDateTime,
) -> Result<()> {
    let portal = PortalConfig::new(&config.portal_base_url);
    let browser =
        ChromiumBrowser::launch(config.chrome_headless, &portal.cookie_domain()).await?;

    let deps = JobDeps {
        browser: Box::new(browser),
        session_store: Arc::new(FileSessionStore::new(&config.session_file)),
        otp: Arc::new(OtpClient::new(&config.otp_service_url)),
        object_store: Arc::new(HttpObjectStore::new(&config.storage_upload_url)),
        webhook: Arc::new(HttpWebhookSink::new(&config.webhook_url)),
        portal,
    };

    run_job(credentials, watermark, deps).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("noticewatch=info".parse()?),
        )
        .init();

    let config = Config::from_env();
    let addr = format!("{}:{}", config.api_host, config.api_port);
    let state = Arc::new(AppState { config });

    let app = Router::new()
        .route("/health", get(health))
        .route("/scrape", post(scrape_handler))
        .with_state(state)
        // Logging layer: method + path only, never request bodies (they
        // carry credentials)
        .layer(
            tower_http::trace::TraceLayer::new_for_http().make_span_with(
                |request: &axum::http::Request<_>| {
                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        path = %request.uri().path(),
                    )
                },
            ),
        );

    info!("NoticeWatch API starting on {addr}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
