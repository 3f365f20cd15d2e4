//! HTTP delivery to the collection endpoint.

use crate::{RemoteSink, SendOutcome, SinkError, SinkResult};
use async_trait::async_trait;
use attendance_database::{format_timestamp, AttendanceRecord};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Longest response excerpt carried into a rejection reason.
const MAX_REASON_LEN: usize = 512;

/// HTTP sink configuration.
#[derive(Debug, Clone)]
pub struct HttpSinkConfig {
    pub endpoint: Url,
    /// Whole-request timeout.
    pub timeout: Duration,
}

/// Form body posted for each record.
#[derive(Debug, Serialize)]
struct AttendanceForm<'a> {
    device_user_id: &'a str,
    timestamp: String,
}

/// Optional JSON diagnostics in the endpoint's reply.
#[derive(Debug, Default, Deserialize)]
struct EndpointReply {
    #[serde(default)]
    message: Option<serde_json::Value>,
    #[serde(default)]
    log: Option<serde_json::Value>,
}

/// [`RemoteSink`] that POSTs form-encoded records.
pub struct HttpSink {
    config: HttpSinkConfig,
    client: Client,
}

impl HttpSink {
    pub fn new(config: HttpSinkConfig) -> SinkResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| SinkError::Client(e.to_string()))?;

        Ok(Self { config, client })
    }

    pub fn endpoint(&self) -> &Url {
        &self.config.endpoint
    }
}

#[async_trait]
impl RemoteSink for HttpSink {
    async fn send(&self, record: &AttendanceRecord) -> SinkResult<SendOutcome> {
        let form = AttendanceForm {
            device_user_id: &record.subject_id,
            timestamp: format_timestamp(&record.timestamp),
        };

        debug!(
            url = %self.config.endpoint,
            subject_id = %record.subject_id,
            timestamp = %form.timestamp,
            "Sending attendance record"
        );

        let response = self
            .client
            .post(self.config.endpoint.clone())
            .form(&form)
            .send()
            .await?;

        classify(response).await
    }
}

async fn classify(response: Response) -> SinkResult<SendOutcome> {
    let status = response.status();
    let is_json = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("application/json"));

    let body = match response.text().await {
        Ok(body) => body,
        Err(e) if status.is_success() => {
            warn!(status = status.as_u16(), error = %e, "Accepted, but reply body was unreadable");
            return Ok(SendOutcome::Accepted);
        }
        Err(e) => {
            debug!(error = %e, "Failed to read error body");
            String::new()
        }
    };
    let reply = if is_json {
        serde_json::from_str::<EndpointReply>(&body).unwrap_or_default()
    } else {
        EndpointReply::default()
    };

    if status.is_success() {
        if is_json {
            debug!(
                status = status.as_u16(),
                message = ?reply.message,
                log = ?reply.log,
                "Endpoint accepted record"
            );
        } else {
            debug!(status = status.as_u16(), body = %body, "Endpoint accepted record");
        }
        return Ok(SendOutcome::Accepted);
    }

    if status.is_server_error() {
        return Err(SinkError::Unavailable {
            status: status.as_u16(),
            body: truncate(&body),
        });
    }

    Ok(SendOutcome::Rejected {
        status: status.as_u16(),
        reason: rejection_reason(status, &reply, &body),
    })
}

fn rejection_reason(status: StatusCode, reply: &EndpointReply, body: &str) -> String {
    match &reply.message {
        Some(serde_json::Value::String(message)) => return truncate(message),
        Some(other) => return truncate(&other.to_string()),
        None => {}
    }
    let body = body.trim();
    if !body.is_empty() {
        return truncate(body);
    }
    status
        .canonical_reason()
        .map(str::to_string)
        .unwrap_or_else(|| format!("HTTP {}", status.as_u16()))
}

fn truncate(text: &str) -> String {
    match text.char_indices().nth(MAX_REASON_LEN) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
