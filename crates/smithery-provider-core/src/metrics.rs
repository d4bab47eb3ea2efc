use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Success,
    Error,
    Cancelled,
}

/// One completed chat request. Token counts are estimates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestRecord {
    pub id: String,
    pub model: String,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub completed_at: OffsetDateTime,
    pub duration_ms: f64,
    pub status: RequestStatus,
    pub error_message: Option<String>,
    /// Zero-based credential index; `None` when the request never reached
    /// the upstream.
    pub token_index: Option<usize>,
    pub client_ip: Option<String>,
}

pub trait MetricsSink: Send + Sync {
    fn record(&self, record: RequestRecord);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetricsSink;

impl MetricsSink for NoopMetricsSink {
    fn record(&self, _record: RequestRecord) {}
}
