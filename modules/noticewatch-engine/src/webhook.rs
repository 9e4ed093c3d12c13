//! Webhook delivery of a crawled batch. One POST, no retry: the batch is
//! held nowhere else, so a failed delivery loses it for that run and the
//! watermark simply does not advance downstream.

use async_trait::async_trait;
use noticewatch_common::Notice;
use tracing::info;

use crate::error::EngineError;

#[async_trait]
pub trait WebhookSink: Send + Sync {
    async fn deliver(&self, notices: &[Notice]) -> Result<(), EngineError>;
}

pub struct HttpWebhookSink {
    client: reqwest::Client,
    url: String,
}

impl HttpWebhookSink {
    pub fn new(url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.to_string(),
        }
    }
}

#[async_trait]
impl WebhookSink for HttpWebhookSink {
    async fn deliver(&self, notices: &[Notice]) -> Result<(), EngineError> {
        let resp = self
            .client
            .post(&self.url)
            .json(&notices)
            .send()
            .await
            .map_err(|e| EngineError::DeliveryTransport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(EngineError::Delivery {
                status: status.as_u16(),
                message,
            });
        }

        info!(count = notices.len(), "Notice batch delivered");
        Ok(())
    }
}
