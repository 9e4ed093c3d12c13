use std::collections::HashMap;
use std::fmt;

use anyhow::{bail, Result};
use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Timestamp format the portal renders inside the notice grid.
pub const PORTAL_TIMESTAMP_FORMAT: &str = "%d-%m-%Y %H:%M";

/// Fixed text representation used on the webhook wire.
pub const WIRE_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Number of security-challenge answers the portal registers per account.
pub const SECURITY_ANSWER_COUNT: usize = 3;

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// Login credentials for one job invocation. Owned by that invocation and
/// never persisted. Secrets stay out of Debug output and logs; errors carry
/// the identifier only.
#[derive(Clone)]
pub struct Credentials {
    identifier: String,
    password: String,
    security_answers: HashMap<String, String>,
}

impl Credentials {
    pub fn new(
        identifier: String,
        password: String,
        security_answers: HashMap<String, String>,
    ) -> Self {
        Self {
            identifier,
            password,
            security_answers,
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    /// Look up the answer for a displayed challenge question by exact match
    /// after trimming both sides.
    pub fn answer_for(&self, question: &str) -> Option<&str> {
        let wanted = question.trim();
        self.security_answers
            .iter()
            .find(|(q, _)| q.trim() == wanted)
            .map(|(_, a)| a.trim())
    }

    /// Shape check performed before any browser work starts.
    pub fn validate(&self) -> Result<()> {
        if self.identifier.trim().is_empty() {
            bail!("identifier must not be empty");
        }
        if self.password.is_empty() {
            bail!("password must not be empty");
        }
        if self.security_answers.len() != SECURITY_ANSWER_COUNT {
            bail!(
                "expected exactly {SECURITY_ANSWER_COUNT} security answers, got {}",
                self.security_answers.len()
            );
        }
        for (question, answer) in &self.security_answers {
            if question.trim().is_empty() || answer.trim().is_empty() {
                bail!("security questions and answers must not be blank");
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("identifier", &self.identifier)
            .field("password", &"<redacted>")
            .field("security_answers", &"<redacted>")
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Notice
// ---------------------------------------------------------------------------

/// One structured record extracted from the notice grid. Immutable once
/// built; serializes to the webhook wire shape.
#[derive(Debug, Clone, Serialize)]
pub struct Notice {
    #[serde(rename = "type")]
    pub notice_type: String,
    pub subject: String,
    pub company: String,
    #[serde(rename = "noticeText")]
    pub notice_text: String,
    #[serde(rename = "noticeAt")]
    pub notice_at: String,
    #[serde(rename = "documentUrl", skip_serializing_if = "Option::is_none")]
    pub document_url: Option<String>,
    /// Parsed grid timestamp, kept for ordering checks. Not on the wire.
    #[serde(skip_serializing)]
    pub notice_at_parsed: NaiveDateTime,
}

// ---------------------------------------------------------------------------
// ScrapeRequest
// ---------------------------------------------------------------------------

/// Inbound job trigger accepted by the HTTP front end.
#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeRequest {
    pub identifier: String,
    pub password: String,
    pub security_answers: HashMap<String, String>,
    /// ISO-8601 timestamp of the most recent notice the consumer already has.
    pub last_known_notice_at: String,
}

impl fmt::Debug for ScrapeRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScrapeRequest")
            .field("identifier", &self.identifier)
            .field("last_known_notice_at", &self.last_known_notice_at)
            .finish_non_exhaustive()
    }
}

/// Parse a caller-supplied watermark. Accepts ISO-8601 with or without
/// seconds, and full RFC 3339 (the offset is dropped after conversion to
/// the portal's local clock, which is what grid timestamps are compared in).
pub fn parse_watermark(value: &str) -> Result<NaiveDateTime> {
    let trimmed = value.trim();
    if let Ok(parsed) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S") {
        return Ok(parsed);
    }
    if let Ok(parsed) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M") {
        return Ok(parsed);
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(parsed.naive_utc());
    }
    bail!("invalid watermark timestamp: {trimmed:?}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn answers() -> HashMap<String, String> {
        HashMap::from([
            ("First school?".to_string(), "Hilltop".to_string()),
            ("Birth city?".to_string(), "Pune".to_string()),
            ("Pet name?".to_string(), "Rex".to_string()),
        ])
    }

    #[test]
    fn validate_accepts_three_answers() {
        let creds = Credentials::new("ORG123".into(), "secret".into(), answers());
        assert!(creds.validate().is_ok());
    }

    #[test]
    fn validate_rejects_wrong_answer_count() {
        let mut two = answers();
        two.remove("Pet name?");
        let creds = Credentials::new("ORG123".into(), "secret".into(), two);
        assert!(creds.validate().is_err());
    }

    #[test]
    fn validate_rejects_blank_answer() {
        let mut bad = answers();
        bad.insert("Pet name?".to_string(), "   ".to_string());
        let creds = Credentials::new("ORG123".into(), "secret".into(), bad);
        assert!(creds.validate().is_err());
    }

    #[test]
    fn answer_lookup_trims_both_sides() {
        let creds = Credentials::new("ORG123".into(), "secret".into(), answers());
        assert_eq!(creds.answer_for("  First school?  "), Some("Hilltop"));
        assert_eq!(creds.answer_for("Unknown question?"), None);
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let creds = Credentials::new("ORG123".into(), "hunter2".into(), answers());
        let rendered = format!("{creds:?}");
        assert!(rendered.contains("ORG123"));
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("Hilltop"));
    }

    #[test]
    fn watermark_parses_without_seconds() {
        let parsed = parse_watermark("2023-01-01T00:00").unwrap();
        assert_eq!(parsed.format("%Y-%m-%d %H:%M").to_string(), "2023-01-01 00:00");
    }

    #[test]
    fn watermark_parses_rfc3339() {
        let parsed = parse_watermark("2023-01-01T00:00:00Z").unwrap();
        assert_eq!(parsed.format("%Y-%m-%d %H:%M").to_string(), "2023-01-01 00:00");
    }

    #[test]
    fn watermark_rejects_garbage() {
        assert!(parse_watermark("yesterday").is_err());
    }

    #[test]
    fn notice_wire_shape_omits_missing_document() {
        let notice = Notice {
            notice_type: "Circular".into(),
            subject: "Margin update".into(),
            company: "ACME LTD".into(),
            notice_text: "Body".into(),
            notice_at: "2023-01-05T10:00:00".into(),
            document_url: None,
            notice_at_parsed: NaiveDateTime::parse_from_str(
                "05-01-2023 10:00",
                PORTAL_TIMESTAMP_FORMAT,
            )
            .unwrap(),
        };
        let json = serde_json::to_value(&notice).unwrap();
        assert_eq!(json["type"], "Circular");
        assert_eq!(json["noticeText"], "Body");
        assert_eq!(json["noticeAt"], "2023-01-05T10:00:00");
        assert!(json.get("documentUrl").is_none());
        assert!(json.get("notice_at_parsed").is_none());
    }
}
