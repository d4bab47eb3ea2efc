use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use sea_orm::sea_query::{Index, OnConflict};
use sea_orm::{
    ActiveValue, ColumnTrait, ConnectOptions, ConnectionTrait, Database, DatabaseConnection,
    EntityTrait, FromQueryResult, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Schema,
    Select,
};
use time::{OffsetDateTime, UtcOffset};
use tracing::warn;

use smithery_provider_core::{MetricsSink, RequestRecord, RequestStatus};

use crate::entities::{self, request_metrics};
use crate::metrics::{MetricsFilter, MetricsStore, MetricsSummary, TokenUsage};
use crate::{StorageError, StorageResult};

#[derive(Debug, FromQueryResult)]
struct SummaryRow {
    request_count: Option<i64>,
    prompt_tokens: Option<i64>,
    completion_tokens: Option<i64>,
    total_tokens: Option<i64>,
    duration_ms: Option<f64>,
}

#[derive(Debug, FromQueryResult)]
struct TokenUsageRow {
    token_index: Option<i64>,
    usage_count: Option<i64>,
    total_tokens: Option<i64>,
    last_completed_at: Option<OffsetDateTime>,
}

/// Request metrics persisted in SQLite, so history survives restarts.
///
/// Timestamps are stored in UTC; window filters compare against
/// `completed_at` like the in-memory store.
#[derive(Clone)]
pub struct SqliteMetricsStore {
    db: DatabaseConnection,
}

impl SqliteMetricsStore {
    /// Opens the database file at `path`, creating it and its directory.
    pub async fn open(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| StorageError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        let store = Self::connect(&format!("sqlite://{}?mode=rwc", path.display())).await?;
        store.db.execute_unprepared("PRAGMA journal_mode=WAL").await?;
        Ok(store)
    }

    /// Connects to `dsn` and brings the schema up to date.
    pub async fn connect(dsn: &str) -> StorageResult<Self> {
        let mut options = ConnectOptions::new(dsn.to_string());
        options.max_connections(1).sqlx_logging(false);
        let db = Database::connect(options).await?;
        let store = Self { db };
        store.sync().await?;
        Ok(store)
    }

    async fn sync(&self) -> StorageResult<()> {
        use request_metrics::Column;

        Schema::new(self.db.get_database_backend())
            .builder()
            .register(entities::RequestMetrics)
            .sync(&self.db)
            .await?;

        let statements = vec![
            Index::create()
                .name("idx_request_metrics_completed_at")
                .table(entities::RequestMetrics)
                .col(Column::CompletedAt)
                .if_not_exists()
                .to_owned(),
            Index::create()
                .name("idx_request_metrics_token_index")
                .table(entities::RequestMetrics)
                .col(Column::TokenIndex)
                .if_not_exists()
                .to_owned(),
        ];
        for statement in statements {
            self.db.execute(&statement).await?;
        }
        Ok(())
    }

    /// Inserts a record, replacing any earlier row with the same id.
    pub async fn insert(&self, record: &RequestRecord) -> StorageResult<()> {
        use request_metrics::Column;

        let active = request_metrics::ActiveModel {
            request_id: ActiveValue::Set(record.id.clone()),
            model: ActiveValue::Set(record.model.clone()),
            prompt_tokens: ActiveValue::Set(record.prompt_tokens),
            completion_tokens: ActiveValue::Set(record.completion_tokens),
            total_tokens: ActiveValue::Set(record.total_tokens),
            started_at: ActiveValue::Set(utc(record.started_at)),
            completed_at: ActiveValue::Set(utc(record.completed_at)),
            duration_ms: ActiveValue::Set(record.duration_ms),
            status: ActiveValue::Set(status_label(record.status).to_string()),
            error_message: ActiveValue::Set(record.error_message.clone()),
            token_index: ActiveValue::Set(record.token_index.and_then(|i| i64::try_from(i).ok())),
            client_ip: ActiveValue::Set(record.client_ip.clone()),
            ..Default::default()
        };

        entities::RequestMetrics::insert(active)
            .on_conflict(
                OnConflict::column(Column::RequestId)
                    .update_columns([
                        Column::Model,
                        Column::PromptTokens,
                        Column::CompletionTokens,
                        Column::TotalTokens,
                        Column::StartedAt,
                        Column::CompletedAt,
                        Column::DurationMs,
                        Column::Status,
                        Column::ErrorMessage,
                        Column::TokenIndex,
                        Column::ClientIp,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await?;
        Ok(())
    }
}

impl MetricsSink for SqliteMetricsStore {
    fn record(&self, record: RequestRecord) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(request_id = %record.id, "no runtime available to persist request metrics");
            return;
        };
        let store = self.clone();
        handle.spawn(async move {
            if let Err(err) = store.insert(&record).await {
                warn!(
                    event = "metrics_persist_failed",
                    request_id = %record.id,
                    error = %err,
                    "failed to persist request metrics"
                );
            }
        });
    }
}

#[async_trait]
impl MetricsStore for SqliteMetricsStore {
    async fn list(
        &self,
        filter: &MetricsFilter,
        limit: usize,
        offset: usize,
    ) -> StorageResult<Vec<RequestRecord>> {
        use request_metrics::Column;

        let rows = filtered(filter)
            .order_by_desc(Column::CompletedAt)
            .order_by_desc(Column::Id)
            .limit(limit as u64)
            .offset(offset as u64)
            .all(&self.db)
            .await?;
        Ok(rows.into_iter().map(into_record).collect())
    }

    async fn count(&self, filter: &MetricsFilter) -> StorageResult<usize> {
        let count = filtered(filter).count(&self.db).await?;
        Ok(usize::try_from(count).unwrap_or(usize::MAX))
    }

    async fn summarize(&self, filter: &MetricsFilter) -> StorageResult<MetricsSummary> {
        use request_metrics::Column;

        let Some(row) = filtered(filter)
            .select_only()
            .column_as(Column::Id.count(), "request_count")
            .column_as(Column::PromptTokens.sum(), "prompt_tokens")
            .column_as(Column::CompletionTokens.sum(), "completion_tokens")
            .column_as(Column::TotalTokens.sum(), "total_tokens")
            .column_as(Column::DurationMs.sum(), "duration_ms")
            .into_model::<SummaryRow>()
            .one(&self.db)
            .await?
        else {
            return Ok(MetricsSummary::default());
        };
        let success_count = filtered(filter)
            .filter(Column::Status.eq(status_label(RequestStatus::Success)))
            .count(&self.db)
            .await?;

        let request_count = row.request_count.unwrap_or(0).max(0) as u64;
        let mut summary = MetricsSummary {
            prompt_tokens: row.prompt_tokens.unwrap_or(0),
            completion_tokens: row.completion_tokens.unwrap_or(0),
            total_tokens: row.total_tokens.unwrap_or(0),
            request_count,
            success_count,
            error_count: request_count.saturating_sub(success_count),
            average_latency_ms: 0.0,
        };
        if request_count > 0 {
            summary.average_latency_ms = row.duration_ms.unwrap_or(0.0) / request_count as f64;
        }
        Ok(summary)
    }

    async fn summarize_by_token(
        &self,
        filter: &MetricsFilter,
    ) -> StorageResult<BTreeMap<usize, TokenUsage>> {
        use request_metrics::Column;

        let rows = filtered(filter)
            .filter(Column::TokenIndex.is_not_null())
            .select_only()
            .column(Column::TokenIndex)
            .column_as(Column::Id.count(), "usage_count")
            .column_as(Column::TotalTokens.sum(), "total_tokens")
            .column_as(Column::CompletedAt.max(), "last_completed_at")
            .group_by(Column::TokenIndex)
            .into_model::<TokenUsageRow>()
            .all(&self.db)
            .await?;

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let index = usize::try_from(row.token_index?).ok()?;
                let usage = TokenUsage {
                    usage_count: row.usage_count.unwrap_or(0).max(0) as u64,
                    total_tokens: row.total_tokens.unwrap_or(0),
                    last_completed_at: row.last_completed_at,
                };
                Some((index, usage))
            })
            .collect())
    }
}

fn filtered(filter: &MetricsFilter) -> Select<entities::RequestMetrics> {
    use request_metrics::Column;

    let mut query = entities::RequestMetrics::find();
    if let Some(start) = filter.start {
        query = query.filter(Column::CompletedAt.gte(utc(start)));
    }
    if let Some(end) = filter.end {
        query = query.filter(Column::CompletedAt.lte(utc(end)));
    }
    if let Some(model) = filter.model_name() {
        query = query.filter(Column::Model.eq(model));
    }
    query
}

fn into_record(row: request_metrics::Model) -> RequestRecord {
    RequestRecord {
        id: row.request_id,
        model: row.model,
        prompt_tokens: row.prompt_tokens,
        completion_tokens: row.completion_tokens,
        total_tokens: row.total_tokens,
        started_at: row.started_at,
        completed_at: row.completed_at,
        duration_ms: row.duration_ms,
        status: parse_status(&row.status),
        error_message: row.error_message,
        token_index: row.token_index.and_then(|i| usize::try_from(i).ok()),
        client_ip: row.client_ip,
    }
}

fn utc(at: OffsetDateTime) -> OffsetDateTime {
    at.to_offset(UtcOffset::UTC)
}

fn status_label(status: RequestStatus) -> &'static str {
    match status {
        RequestStatus::Success => "success",
        RequestStatus::Error => "error",
        RequestStatus::Cancelled => "cancelled",
    }
}

fn parse_status(label: &str) -> RequestStatus {
    match label {
        "success" => RequestStatus::Success,
        "cancelled" => RequestStatus::Cancelled,
        _ => RequestStatus::Error,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration as StdDuration;

    use time::Duration;

    use super::*;

    async fn store() -> SqliteMetricsStore {
        SqliteMetricsStore::connect("sqlite::memory:").await.unwrap()
    }

    fn record(
        id: &str,
        model: &str,
        at: i64,
        status: RequestStatus,
        token_index: Option<usize>,
    ) -> RequestRecord {
        let completed_at = OffsetDateTime::from_unix_timestamp(at).unwrap();
        RequestRecord {
            id: id.to_string(),
            model: model.to_string(),
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
            started_at: completed_at - Duration::seconds(1),
            completed_at,
            duration_ms: 1000.0,
            status,
            error_message: (status == RequestStatus::Error).then(|| "boom".to_string()),
            token_index,
            client_ip: Some("10.0.0.1".to_string()),
        }
    }

    fn ids(records: Vec<RequestRecord>) -> Vec<String> {
        records.into_iter().map(|r| r.id).collect()
    }

    #[tokio::test]
    async fn lists_newest_first_with_filters_and_paging() {
        let store = store().await;
        for (i, model) in ["gpt-5", "kimi-k2", "gpt-5", "gpt-5"].iter().enumerate() {
            store
                .insert(&record(&format!("r{i}"), model, 100 + i as i64, RequestStatus::Success, Some(0)))
                .await
                .unwrap();
        }

        let all = MetricsFilter::default();
        assert_eq!(store.count(&all).await.unwrap(), 4);
        assert_eq!(ids(store.list(&all, 2, 0).await.unwrap()), vec!["r3", "r2"]);
        assert_eq!(ids(store.list(&all, 2, 2).await.unwrap()), vec!["r1", "r0"]);

        let gpt = MetricsFilter {
            model: Some("gpt-5".to_string()),
            ..Default::default()
        };
        assert_eq!(store.count(&gpt).await.unwrap(), 3);

        let window = MetricsFilter {
            start: Some(OffsetDateTime::from_unix_timestamp(101).unwrap()),
            end: Some(OffsetDateTime::from_unix_timestamp(102).unwrap()),
            model: Some(String::new()),
        };
        assert_eq!(ids(store.list(&window, 10, 0).await.unwrap()), vec!["r2", "r1"]);
    }

    #[tokio::test]
    async fn records_keep_their_fields() {
        let store = store().await;
        store
            .insert(&record("e", "gpt-5", 500, RequestStatus::Error, None))
            .await
            .unwrap();

        let listed = store.list(&MetricsFilter::default(), 1, 0).await.unwrap();
        let stored = &listed[0];
        assert_eq!(stored.status, RequestStatus::Error);
        assert_eq!(stored.error_message.as_deref(), Some("boom"));
        assert_eq!(stored.token_index, None);
        assert_eq!(stored.client_ip.as_deref(), Some("10.0.0.1"));
        assert_eq!(stored.completed_at.unix_timestamp(), 500);
        assert_eq!(stored.started_at.unix_timestamp(), 499);
    }

    #[tokio::test]
    async fn same_id_overwrites_the_row() {
        let store = store().await;
        store
            .insert(&record("x", "gpt-5", 10, RequestStatus::Error, Some(0)))
            .await
            .unwrap();
        store
            .insert(&record("x", "gpt-5", 11, RequestStatus::Success, Some(1)))
            .await
            .unwrap();

        let listed = store.list(&MetricsFilter::default(), 10, 0).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].status, RequestStatus::Success);
        assert_eq!(listed[0].token_index, Some(1));
    }

    #[tokio::test]
    async fn summaries_match_the_recorded_requests() {
        let store = store().await;
        store.insert(&record("a", "gpt-5", 1, RequestStatus::Success, Some(0))).await.unwrap();
        store.insert(&record("b", "gpt-5", 2, RequestStatus::Error, Some(1))).await.unwrap();
        store.insert(&record("c", "gpt-5", 3, RequestStatus::Cancelled, Some(0))).await.unwrap();
        store.insert(&record("d", "gpt-5", 4, RequestStatus::Error, None)).await.unwrap();

        let summary = store.summarize(&MetricsFilter::default()).await.unwrap();
        assert_eq!(summary.request_count, 4);
        assert_eq!(summary.success_count, 1);
        assert_eq!(summary.error_count, 3);
        assert_eq!(summary.total_tokens, 60);
        assert_eq!(summary.prompt_tokens, 40);
        assert!((summary.average_latency_ms - 1000.0).abs() < f64::EPSILON);

        let by_token = store.summarize_by_token(&MetricsFilter::default()).await.unwrap();
        assert_eq!(by_token.keys().copied().collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(by_token[&0].usage_count, 2);
        assert_eq!(by_token[&0].total_tokens, 30);
        assert_eq!(
            by_token[&0].last_completed_at.map(|at| at.unix_timestamp()),
            Some(3)
        );
        assert_eq!(by_token[&1].usage_count, 1);
    }

    #[tokio::test]
    async fn empty_store_summarizes_to_zero() {
        let store = store().await;
        assert_eq!(
            store.summarize(&MetricsFilter::default()).await.unwrap(),
            MetricsSummary::default()
        );
        assert!(store
            .summarize_by_token(&MetricsFilter::default())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn sink_writes_reach_the_database() {
        let store = store().await;
        store.record(record("s", "gpt-5", 7, RequestStatus::Success, Some(0)));

        let filter = MetricsFilter::default();
        let mut stored = 0;
        for _ in 0..100 {
            stored = store.count(&filter).await.unwrap();
            if stored == 1 {
                break;
            }
            tokio::time::sleep(StdDuration::from_millis(10)).await;
        }
        assert_eq!(stored, 1);
    }
}
