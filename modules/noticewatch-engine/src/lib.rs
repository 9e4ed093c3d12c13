pub mod auth;
pub mod crawler;
pub mod documents;
pub mod error;
pub mod job;
pub mod portal;
pub mod session_store;
pub mod webhook;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use auth::AuthSession;
pub use crawler::NoticeCrawler;
pub use documents::{DirectFetcher, DocumentPipeline, HttpObjectStore, ObjectStore};
pub use error::EngineError;
pub use job::{run_job, JobDeps, JobOutcome};
pub use portal::PortalConfig;
pub use session_store::{FileSessionStore, SessionStore};
pub use webhook::{HttpWebhookSink, WebhookSink};
