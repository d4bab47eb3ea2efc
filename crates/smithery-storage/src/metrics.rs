use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use smithery_provider_core::{MetricsSink, RequestRecord, RequestStatus};

use crate::{StorageError, StorageResult};

/// Record selection; bounds are inclusive and apply to `completed_at`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsFilter {
    pub start: Option<OffsetDateTime>,
    pub end: Option<OffsetDateTime>,
    pub model: Option<String>,
}

impl MetricsFilter {
    pub(crate) fn model_name(&self) -> Option<&str> {
        self.model.as_deref().filter(|model| !model.is_empty())
    }

    fn matches(&self, record: &RequestRecord) -> bool {
        if self.start.is_some_and(|start| record.completed_at < start) {
            return false;
        }
        if self.end.is_some_and(|end| record.completed_at > end) {
            return false;
        }
        self.model_name().is_none_or(|model| record.model == model)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSummary {
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
    pub request_count: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub average_latency_ms: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TokenUsage {
    pub usage_count: u64,
    pub total_tokens: i64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_completed_at: Option<OffsetDateTime>,
}

/// Read side of a request metrics backend.
#[async_trait]
pub trait MetricsStore: Send + Sync {
    /// Newest first.
    async fn list(
        &self,
        filter: &MetricsFilter,
        limit: usize,
        offset: usize,
    ) -> StorageResult<Vec<RequestRecord>>;

    async fn count(&self, filter: &MetricsFilter) -> StorageResult<usize>;

    async fn summarize(&self, filter: &MetricsFilter) -> StorageResult<MetricsSummary>;

    /// Usage per credential index; records that never reached the upstream
    /// are left out.
    async fn summarize_by_token(
        &self,
        filter: &MetricsFilter,
    ) -> StorageResult<BTreeMap<usize, TokenUsage>>;
}

/// Bounded in-memory ring of request records; the oldest entry is evicted
/// once `max_records` is reached.
#[derive(Debug)]
pub struct MemoryMetricsStore {
    records: Mutex<VecDeque<RequestRecord>>,
    max_records: usize,
}

impl MemoryMetricsStore {
    pub fn new(max_records: usize) -> Self {
        let max_records = max_records.max(1);
        Self {
            records: Mutex::new(VecDeque::with_capacity(max_records.min(1024))),
            max_records,
        }
    }

    fn with_records<T>(&self, f: impl FnOnce(&mut VecDeque<RequestRecord>) -> T) -> T {
        let mut guard = match self.records.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    pub fn add(&self, record: RequestRecord) {
        let max = self.max_records;
        self.with_records(|records| {
            while records.len() >= max {
                records.pop_front();
            }
            records.push_back(record);
        });
    }

    pub fn len(&self) -> usize {
        self.with_records(|records| records.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Newest first.
    pub fn list(&self, filter: &MetricsFilter, limit: usize, offset: usize) -> Vec<RequestRecord> {
        self.with_records(|records| {
            records
                .iter()
                .rev()
                .filter(|record| filter.matches(record))
                .skip(offset)
                .take(limit)
                .cloned()
                .collect()
        })
    }

    pub fn count(&self, filter: &MetricsFilter) -> usize {
        self.with_records(|records| records.iter().filter(|r| filter.matches(r)).count())
    }

    pub fn summarize(&self, filter: &MetricsFilter) -> MetricsSummary {
        self.with_records(|records| {
            let mut summary = MetricsSummary::default();
            let mut latency_sum = 0.0;
            for record in records.iter().filter(|r| filter.matches(r)) {
                summary.prompt_tokens += record.prompt_tokens;
                summary.completion_tokens += record.completion_tokens;
                summary.total_tokens += record.total_tokens;
                summary.request_count += 1;
                if record.status == RequestStatus::Success {
                    summary.success_count += 1;
                }
                latency_sum += record.duration_ms;
            }
            summary.error_count = summary.request_count - summary.success_count;
            if summary.request_count > 0 {
                summary.average_latency_ms = latency_sum / summary.request_count as f64;
            }
            summary
        })
    }

    /// Usage per credential index; records that never reached the upstream
    /// are left out.
    pub fn summarize_by_token(&self, filter: &MetricsFilter) -> BTreeMap<usize, TokenUsage> {
        self.with_records(|records| {
            let mut out: BTreeMap<usize, TokenUsage> = BTreeMap::new();
            for record in records.iter().filter(|r| filter.matches(r)) {
                let Some(index) = record.token_index else {
                    continue;
                };
                let entry = out.entry(index).or_default();
                entry.usage_count += 1;
                entry.total_tokens += record.total_tokens;
                if entry
                    .last_completed_at
                    .is_none_or(|last| record.completed_at > last)
                {
                    entry.last_completed_at = Some(record.completed_at);
                }
            }
            out
        })
    }
}

impl MetricsSink for MemoryMetricsStore {
    fn record(&self, record: RequestRecord) {
        self.add(record);
    }
}

#[async_trait]
impl MetricsStore for MemoryMetricsStore {
    async fn list(
        &self,
        filter: &MetricsFilter,
        limit: usize,
        offset: usize,
    ) -> StorageResult<Vec<RequestRecord>> {
        Ok(MemoryMetricsStore::list(self, filter, limit, offset))
    }

    async fn count(&self, filter: &MetricsFilter) -> StorageResult<usize> {
        Ok(MemoryMetricsStore::count(self, filter))
    }

    async fn summarize(&self, filter: &MetricsFilter) -> StorageResult<MetricsSummary> {
        Ok(MemoryMetricsStore::summarize(self, filter))
    }

    async fn summarize_by_token(
        &self,
        filter: &MetricsFilter,
    ) -> StorageResult<BTreeMap<usize, TokenUsage>> {
        Ok(MemoryMetricsStore::summarize_by_token(self, filter))
    }
}

/// Accepts RFC 3339 timestamps or UNIX seconds (fractions allowed).
pub fn parse_time_param(raw: &str) -> StorageResult<OffsetDateTime> {
    let raw = raw.trim();
    if let Ok(seconds) = raw.parse::<f64>() {
        if !seconds.is_finite() {
            return Err(StorageError::InvalidTime(raw.to_string()));
        }
        let nanos = (seconds * 1_000_000_000.0) as i128;
        return OffsetDateTime::from_unix_timestamp_nanos(nanos)
            .map_err(|_| StorageError::InvalidTime(raw.to_string()));
    }
    let normalized = if raw.ends_with('Z') || raw.ends_with('z') {
        raw.to_string()
    } else if has_offset(raw) {
        raw.to_string()
    } else {
        format!("{raw}Z")
    };
    OffsetDateTime::parse(&normalized, &Rfc3339)
        .map_err(|_| StorageError::InvalidTime(raw.to_string()))
}

/// True when the string ends with `+hh:mm` or `-hh:mm`.
fn has_offset(raw: &str) -> bool {
    let bytes = raw.as_bytes();
    bytes.len() > 6
        && matches!(bytes[bytes.len() - 6], b'+' | b'-')
        && bytes[bytes.len() - 3] == b':'
}
