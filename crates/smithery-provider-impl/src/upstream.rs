use std::future::Future;
use std::time::Instant;

use tracing::{info, warn};

use smithery_provider_core::{ProxyError, UpstreamCtx, UpstreamHttpResponse};

fn log_upstream_request(ctx: &UpstreamCtx, provider: &str, model: &str, is_stream: bool) -> Instant {
    info!(
        event = "upstream_request",
        trace_id = %ctx.trace_id,
        provider = %provider,
        credential_index = ctx.credential_index,
        attempt_no = ctx.attempt_no,
        model = %model,
        is_stream = is_stream
    );
    Instant::now()
}

/// Sends one upstream request, logging the attempt and its result.
pub async fn send_with_logging<F, Fut>(
    ctx: &UpstreamCtx,
    provider: &str,
    model: &str,
    is_stream: bool,
    send: F,
) -> Result<UpstreamHttpResponse, ProxyError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<UpstreamHttpResponse, ProxyError>>,
{
    let started_at = log_upstream_request(ctx, provider, model, is_stream);
    match send().await {
        Ok(response) => {
            info!(
                event = "upstream_response",
                trace_id = %ctx.trace_id,
                provider = %provider,
                status = response.status,
                elapsed_ms = started_at.elapsed().as_millis() as u64,
            );
            Ok(response)
        }
        Err(err) => {
            warn!(
                event = "upstream_response",
                trace_id = %ctx.trace_id,
                provider = %provider,
                status = "error",
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                error = %err
            );
            Err(err)
        }
    }
}
