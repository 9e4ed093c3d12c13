pub mod error;

pub use error::{OtpError, Result};

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

/// Outcome of a single lookup against the code-issuing service.
#[derive(Debug, Clone)]
pub enum LookupOutcome {
    /// The service has issued a code for this login attempt.
    Ready(String),
    /// The service answered 404: the code is not generated yet.
    NotReady,
}

/// One lookup round trip. The HTTP implementation is the production path;
/// tests script this boundary directly.
#[async_trait]
pub trait OtpTransport: Send + Sync {
    async fn lookup(
        &self,
        identifier: &str,
        requested_at: DateTime<Utc>,
    ) -> Result<LookupOutcome>;
}

// ---------------------------------------------------------------------------
// HTTP transport
// ---------------------------------------------------------------------------

pub struct HttpOtpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpOtpTransport {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl OtpTransport for HttpOtpTransport {
    async fn lookup(
        &self,
        identifier: &str,
        requested_at: DateTime<Utc>,
    ) -> Result<LookupOutcome> {
        let url = format!(
            "{}/{}?requestedAt={}",
            self.base_url,
            identifier,
            requested_at.to_rfc3339()
        );
        let resp = self.client.get(&url).send().await?;

        let status = resp.status();
        if status.as_u16() == 404 {
            return Ok(LookupOutcome::NotReady);
        }
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(OtpError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| OtpError::Parse(e.to_string()))?;
        let code = body
            .get("otp")
            .and_then(|v| {
                v.as_u64()
                    .map(|n| n.to_string())
                    .or_else(|| v.as_str().map(String::from))
            })
            .ok_or_else(|| OtpError::Parse("response missing otp field".to_string()))?;
        Ok(LookupOutcome::Ready(code))
    }
}

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

/// Backoff parameters for one polling sequence.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Applied once before the first attempt, giving the issuing service
    /// time to generate the code.
    pub initial_delay: Duration,
    /// First inter-attempt delay.
    pub retry_delay: Duration,
    pub backoff_factor: u32,
    pub retry_delay_cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_delay: Duration::from_secs(10),
            retry_delay: Duration::from_secs(5),
            backoff_factor: 2,
            retry_delay_cap: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Next inter-attempt delay: grow the prior one by the backoff factor,
    /// capped.
    pub fn next_delay(&self, prior: Duration) -> Duration {
        (prior * self.backoff_factor).min(self.retry_delay_cap)
    }
}

// ---------------------------------------------------------------------------
// OtpClient
// ---------------------------------------------------------------------------

/// Polls the code-issuing service until a code is available or attempts are
/// exhausted. Each `fetch_code` call is a fresh, independent polling
/// sequence scoped to one login attempt; no code is ever cached.
pub struct OtpClient {
    transport: Box<dyn OtpTransport>,
    policy: RetryPolicy,
}

impl OtpClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            transport: Box::new(HttpOtpTransport::new(base_url)),
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_transport(transport: Box<dyn OtpTransport>, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    pub async fn fetch_code(
        &self,
        identifier: &str,
        requested_at: DateTime<Utc>,
    ) -> Result<String> {
        tokio::time::sleep(self.policy.initial_delay).await;

        let mut delay = self.policy.retry_delay;
        let mut last_error: Option<OtpError> = None;

        for attempt in 1..=self.policy.max_attempts {
            match self.transport.lookup(identifier, requested_at).await {
                Ok(LookupOutcome::Ready(code)) => {
                    debug!(identifier, attempt, "One-time code received");
                    return Ok(code);
                }
                Ok(LookupOutcome::NotReady) => {
                    debug!(identifier, attempt, "Code not issued yet");
                }
                Err(e) => {
                    warn!(identifier, attempt, error = %e, "OTP lookup failed");
                    last_error = Some(e);
                }
            }

            if attempt < self.policy.max_attempts {
                tokio::time::sleep(delay).await;
                delay = self.policy.next_delay(delay);
            }
        }

        Err(OtpError::Timeout {
            attempts: self.policy.max_attempts,
            source: last_error.map(Box::new),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Transport returning a scripted sequence of outcomes, one per attempt.
    struct ScriptedTransport {
        script: Mutex<Vec<Result<LookupOutcome>>>,
        calls: Mutex<u32>,
    }

    impl ScriptedTransport {
        fn new(script: Vec<Result<LookupOutcome>>) -> Self {
            let mut script = script;
            script.reverse();
            Self {
                script: Mutex::new(script),
                calls: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl OtpTransport for ScriptedTransport {
        async fn lookup(&self, _: &str, _: DateTime<Utc>) -> Result<LookupOutcome> {
            *self.calls.lock().unwrap() += 1;
            self.script
                .lock()
                .unwrap()
                .pop()
                .unwrap_or(Ok(LookupOutcome::NotReady))
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::default()
    }

    #[test]
    fn next_delay_doubles_and_caps() {
        let policy = RetryPolicy::default();
        let d1 = policy.retry_delay;
        let d2 = policy.next_delay(d1);
        let d3 = policy.next_delay(d2);
        let d4 = policy.next_delay(d3);
        assert_eq!(d1, Duration::from_secs(5));
        assert_eq!(d2, Duration::from_secs(10));
        assert_eq!(d3, Duration::from_secs(20));
        assert_eq!(d4, Duration::from_secs(30), "capped at retry_delay_cap");
        assert_eq!(policy.next_delay(d4), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_attempt_k() {
        let transport = ScriptedTransport::new(vec![
            Ok(LookupOutcome::NotReady),
            Ok(LookupOutcome::NotReady),
            Ok(LookupOutcome::Ready("482913".into())),
        ]);
        let client = OtpClient::with_transport(Box::new(transport), fast_policy());
        let code = client.fetch_code("ORG123", Utc::now()).await.unwrap();
        assert_eq!(code, "482913");
    }

    #[tokio::test(start_paused = true)]
    async fn follows_backoff_schedule() {
        // 3 failed attempts before success: initial 10s, then 5s and 10s
        // between attempts = 25s of sleeping before the final lookup.
        let transport = ScriptedTransport::new(vec![
            Ok(LookupOutcome::NotReady),
            Ok(LookupOutcome::NotReady),
            Ok(LookupOutcome::Ready("000111".into())),
        ]);
        let client = OtpClient::with_transport(Box::new(transport), fast_policy());
        let started = tokio::time::Instant::now();
        client.fetch_code("ORG123", Utc::now()).await.unwrap();
        assert_eq!(started.elapsed(), Duration::from_secs(10 + 5 + 10));
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_raises_timeout() {
        let transport = ScriptedTransport::new(vec![]);
        let client = OtpClient::with_transport(Box::new(transport), fast_policy());
        let err = client.fetch_code("ORG123", Utc::now()).await.unwrap_err();
        match err {
            OtpError::Timeout { attempts, source } => {
                assert_eq!(attempts, 4);
                assert!(source.is_none(), "no hard error occurred");
            }
            other => panic!("expected Timeout, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_carries_last_hard_error() {
        let transport = ScriptedTransport::new(vec![
            Ok(LookupOutcome::NotReady),
            Err(OtpError::Api {
                status: 500,
                message: "boom".into(),
            }),
            Ok(LookupOutcome::NotReady),
            Err(OtpError::Parse("response missing otp field".into())),
        ]);
        let client = OtpClient::with_transport(Box::new(transport), fast_policy());
        let err = client.fetch_code("ORG123", Utc::now()).await.unwrap_err();
        match err {
            OtpError::Timeout {
                source: Some(cause),
                ..
            } => assert!(matches!(*cause, OtpError::Parse(_))),
            other => panic!("expected Timeout with cause, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn hard_error_does_not_stop_polling() {
        let transport = ScriptedTransport::new(vec![
            Err(OtpError::Api {
                status: 502,
                message: "bad gateway".into(),
            }),
            Ok(LookupOutcome::Ready("775533".into())),
        ]);
        let client = OtpClient::with_transport(Box::new(transport), fast_policy());
        let code = client.fetch_code("ORG123", Utc::now()).await.unwrap();
        assert_eq!(code, "775533");
    }
}
