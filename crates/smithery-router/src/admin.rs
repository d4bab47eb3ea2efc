use std::collections::BTreeSet;

use axum::Json;
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::warn;

use smithery_provider_core::{ProxyError, RequestRecord};
use smithery_storage::{MetricsFilter, MetricsSummary, StorageError, parse_time_param};

use crate::{RouterState, error_response};

const DEFAULT_PAGE_SIZE: usize = 50;
const MAX_PAGE_SIZE: usize = 1000;

#[derive(Debug, Deserialize)]
struct VisibilityUpdate {
    hidden_models: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct MetricsQuery {
    start: Option<String>,
    end: Option<String>,
    model: Option<String>,
    limit: Option<String>,
    page: Option<String>,
}

#[derive(Debug, Serialize)]
struct Pagination {
    total: usize,
    page: usize,
    page_size: usize,
    total_pages: usize,
}

#[derive(Debug, Serialize)]
struct RequestsPage {
    data: Vec<RequestRecord>,
    pagination: Pagination,
}

#[derive(Debug, Serialize)]
struct TokenStat {
    token_index: usize,
    token_label: String,
    token_email: Option<String>,
    usage_count: u64,
    total_tokens: i64,
    #[serde(with = "time::serde::rfc3339::option")]
    last_completed_at: Option<OffsetDateTime>,
}

#[derive(Debug, Serialize)]
struct SummaryBody {
    #[serde(flatten)]
    summary: MetricsSummary,
    #[serde(with = "time::serde::rfc3339::option")]
    window_start: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    window_end: Option<OffsetDateTime>,
    token_stats: Vec<TokenStat>,
}

pub(crate) async fn get_visibility(State(state): State<RouterState>) -> Response {
    Json(state.visibility.describe()).into_response()
}

pub(crate) async fn put_visibility(State(state): State<RouterState>, body: Bytes) -> Response {
    let update: VisibilityUpdate = match serde_json::from_slice(&body) {
        Ok(update) => update,
        Err(err) => {
            return error_response(&ProxyError::InvalidRequest(format!(
                "invalid visibility update: {err}"
            )));
        }
    };
    match state.visibility.set_hidden(&update.hidden_models).await {
        Ok(_) => Json(state.visibility.describe()).into_response(),
        Err(err) => error_response(&ProxyError::Internal(err.to_string())),
    }
}

pub(crate) async fn metrics_requests(
    State(state): State<RouterState>,
    Query(query): Query<MetricsQuery>,
) -> Response {
    let (filter, page_size, page) = match parse_filter(&query).and_then(|filter| {
        let page_size = parse_bounded(query.limit.as_deref(), "limit", DEFAULT_PAGE_SIZE, 1, MAX_PAGE_SIZE)?;
        let page = parse_bounded(query.page.as_deref(), "page", 1, 1, usize::MAX)?;
        Ok((filter, page_size, page))
    }) {
        Ok(parsed) => parsed,
        Err(err) => return error_response(&err),
    };

    let total = match state.metrics.count(&filter).await {
        Ok(total) => total,
        Err(err) => return storage_error(err),
    };
    let total_pages = total.div_ceil(page_size);
    let current_page = if total == 0 { 1 } else { page.min(total_pages) };
    let offset = (current_page - 1) * page_size;
    let data = match state.metrics.list(&filter, page_size, offset).await {
        Ok(data) => data,
        Err(err) => return storage_error(err),
    };

    Json(RequestsPage {
        data,
        pagination: Pagination {
            total,
            page: current_page,
            page_size,
            total_pages,
        },
    })
    .into_response()
}

pub(crate) async fn metrics_summary(
    State(state): State<RouterState>,
    Query(query): Query<MetricsQuery>,
) -> Response {
    let filter = match parse_filter(&query) {
        Ok(filter) => filter,
        Err(err) => return error_response(&err),
    };

    let (summary, by_token) = match tokio::try_join!(
        state.metrics.summarize(&filter),
        state.metrics.summarize_by_token(&filter)
    ) {
        Ok(stats) => stats,
        Err(err) => return storage_error(err),
    };
    let credentials = state.engine.pool().snapshot();

    let indexes: BTreeSet<usize> = (0..credentials.len())
        .chain(by_token.keys().copied())
        .collect();
    let token_stats = indexes
        .into_iter()
        .map(|index| {
            let usage = by_token.get(&index).cloned().unwrap_or_default();
            let credential = credentials.get(index);
            TokenStat {
                token_index: index,
                token_label: credential
                    .map(|credential| credential.name.clone())
                    .unwrap_or_else(|| format!("token-{}", index + 1)),
                token_email: credential.and_then(|credential| credential.masked_email.clone()),
                usage_count: usage.usage_count,
                total_tokens: usage.total_tokens,
                last_completed_at: usage.last_completed_at,
            }
        })
        .collect();

    Json(SummaryBody {
        summary,
        window_start: filter.start,
        window_end: filter.end,
        token_stats,
    })
    .into_response()
}

fn storage_error(err: StorageError) -> Response {
    warn!(event = "metrics_query_failed", error = %err);
    error_response(&ProxyError::Internal(format!("metrics store: {err}")))
}

fn parse_filter(query: &MetricsQuery) -> Result<MetricsFilter, ProxyError> {
    let start = parse_time(query.start.as_deref(), "start")?;
    let end = parse_time(query.end.as_deref(), "end")?;
    if let (Some(start), Some(end)) = (start, end)
        && start > end
    {
        return Err(ProxyError::InvalidRequest(
            "start must not be later than end".to_string(),
        ));
    }
    Ok(MetricsFilter {
        start,
        end,
        model: non_blank(query.model.as_deref()).map(str::to_string),
    })
}

fn parse_time(raw: Option<&str>, field: &str) -> Result<Option<OffsetDateTime>, ProxyError> {
    non_blank(raw)
        .map(|raw| {
            parse_time_param(raw)
                .map_err(|_| ProxyError::InvalidRequest(format!("invalid `{field}` time: {raw}")))
        })
        .transpose()
}

fn parse_bounded(
    raw: Option<&str>,
    field: &str,
    default: usize,
    min: usize,
    max: usize,
) -> Result<usize, ProxyError> {
    let Some(raw) = non_blank(raw) else {
        return Ok(default);
    };
    match raw.parse::<usize>() {
        Ok(value) if (min..=max).contains(&value) => Ok(value),
        _ => Err(ProxyError::InvalidRequest(format!(
            "`{field}` must be an integer between {min} and {max}"
        ))),
    }
}

fn non_blank(raw: Option<&str>) -> Option<&str> {
    raw.map(str::trim).filter(|raw| !raw.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(start: Option<&str>, end: Option<&str>) -> MetricsQuery {
        MetricsQuery {
            start: start.map(str::to_string),
            end: end.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn rejects_inverted_windows() {
        let err = parse_filter(&query(Some("200"), Some("100"))).unwrap_err();
        assert_eq!(err.status(), 400);
        assert!(parse_filter(&query(Some("100"), Some("200"))).is_ok());
        assert!(parse_filter(&query(Some(""), None)).unwrap().start.is_none());
    }

    #[test]
    fn page_bounds_are_enforced() {
        assert_eq!(parse_bounded(None, "limit", 50, 1, 1000).unwrap(), 50);
        assert_eq!(parse_bounded(Some("1000"), "limit", 50, 1, 1000).unwrap(), 1000);
        assert!(parse_bounded(Some("0"), "limit", 50, 1, 1000).is_err());
        assert!(parse_bounded(Some("1001"), "limit", 50, 1, 1000).is_err());
        assert!(parse_bounded(Some("abc"), "page", 1, 1, usize::MAX).is_err());
    }
}
