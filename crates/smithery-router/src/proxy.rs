use std::convert::Infallible;
use std::time::{Duration, Instant};

use axum::Json;
use axum::body::Body;
use axum::extract::{Extension, State};
use axum::http::{HeaderName, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures_util::StreamExt;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};

use smithery_core::{ChatCall, ChatSession};
use smithery_protocol::openai::create_chat_completions::request::{
    CreateChatCompletionRequest, CreateChatCompletionRequestBody,
};
use smithery_protocol::openai::list_models::response::{ListModelsResponse, ListObjectType};
use smithery_protocol::openai::list_models::types::{Model, ModelObjectType};
use smithery_protocol::sse::{DONE_FRAME, HEARTBEAT_FRAME, encode_data_frame};
use smithery_provider_core::{ProxyError, StreamEvent};

use crate::{RequestContext, RouterState, error_response};

const SSE_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);
const SSE_CHANNEL_CAPACITY: usize = 32;
const MODEL_OWNER: &str = "smithery";

pub(crate) async fn chat_completions(
    State(state): State<RouterState>,
    Extension(ctx): Extension<RequestContext>,
    body: Bytes,
) -> Response {
    let body: CreateChatCompletionRequestBody = match serde_json::from_slice(&body) {
        Ok(body) => body,
        Err(err) => {
            return error_response(&ProxyError::InvalidRequest(format!(
                "invalid request body: {err}"
            )));
        }
    };
    let is_stream = body.is_stream();
    let model = body.model.clone();
    info!(
        event = "downstream_received",
        trace_id = %ctx.trace_id,
        model = %model,
        is_stream = is_stream,
        client_ip = ?ctx.client_ip
    );

    let started_at = Instant::now();
    let call = ChatCall {
        trace_id: ctx.trace_id.clone(),
        request: CreateChatCompletionRequest { body },
        client_ip: ctx.client_ip,
    };
    let result = if is_stream {
        state.engine.stream(call).await.map(sse_response)
    } else {
        state
            .engine
            .complete(call)
            .await
            .map(|response| Json(response).into_response())
    };

    let mut response = match result {
        Ok(response) => {
            info!(
                event = "downstream_responded",
                trace_id = %ctx.trace_id,
                model = %model,
                status = response.status().as_u16(),
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                is_stream = is_stream
            );
            response
        }
        Err(err) => {
            warn!(
                event = "downstream_responded",
                trace_id = %ctx.trace_id,
                model = %model,
                status = err.status(),
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                is_stream = is_stream,
                error = %err
            );
            error_response(&err)
        }
    };
    if let Ok(value) = HeaderValue::from_str(&ctx.trace_id) {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

pub(crate) async fn list_models(State(state): State<RouterState>) -> Json<ListModelsResponse> {
    let created = OffsetDateTime::now_utc().unix_timestamp();
    let data = state
        .engine
        .gate()
        .visible_models()
        .into_iter()
        .map(|id| Model {
            id,
            object: ModelObjectType::Model,
            created,
            owned_by: MODEL_OWNER.to_string(),
        })
        .collect();
    Json(ListModelsResponse {
        object: ListObjectType::List,
        data,
    })
}

fn sse_response(session: ChatSession) -> Response {
    let rx = wrap_sse_stream_with_heartbeat(encode_events(session.events), SSE_HEARTBEAT_INTERVAL);
    let stream = ReceiverStream::new(rx).map(Ok::<_, Infallible>);

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(HeaderName::from_static("x-accel-buffering"), "no")
        .body(Body::from_stream(stream))
        .unwrap_or_else(|_| {
            (StatusCode::INTERNAL_SERVER_ERROR, "response_build_failed").into_response()
        })
}

/// Serializes relay events into SSE frames. Closing the output drops the
/// event receiver, which cancels the relay.
fn encode_events(mut events: mpsc::Receiver<StreamEvent>) -> mpsc::Receiver<Bytes> {
    let (tx, rx) = mpsc::channel::<Bytes>(SSE_CHANNEL_CAPACITY);
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                event = events.recv() => event,
                _ = tx.closed() => break,
            };
            let frame = match event {
                Some(StreamEvent::Chunk(chunk)) => match serde_json::to_string(&chunk) {
                    Ok(json) => encode_data_frame(&json),
                    Err(err) => {
                        warn!(event = "chunk_encode_failed", error = %err);
                        continue;
                    }
                },
                Some(StreamEvent::Done) => Bytes::from_static(DONE_FRAME),
                None => break,
            };
            if tx.send(frame).await.is_err() {
                break;
            }
        }
    });
    rx
}

fn wrap_sse_stream_with_heartbeat(
    mut upstream_rx: mpsc::Receiver<Bytes>,
    period: Duration,
) -> mpsc::Receiver<Bytes> {
    let (tx, rx) = mpsc::channel::<Bytes>(SSE_CHANNEL_CAPACITY);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // First tick fires immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                maybe_chunk = upstream_rx.recv() => {
                    let Some(chunk) = maybe_chunk else {
                        break;
                    };
                    if tx.send(chunk).await.is_err() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if tx.send(Bytes::from_static(HEARTBEAT_FRAME)).await.is_err() {
                        break;
                    }
                }
                _ = tx.closed() => break,
            }
        }
    });
    rx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn idle_streams_get_keep_alive_comments() {
        let (upstream_tx, upstream_rx) = mpsc::channel::<Bytes>(4);
        let mut rx = wrap_sse_stream_with_heartbeat(upstream_rx, Duration::from_secs(15));

        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(HEARTBEAT_FRAME));

        upstream_tx.send(Bytes::from_static(b"data: x\n\n")).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"data: x\n\n"));

        drop(upstream_tx);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn dropping_the_client_closes_the_event_receiver() {
        let (events_tx, events_rx) = mpsc::channel::<StreamEvent>(1);
        let frames = encode_events(events_rx);
        drop(frames);

        tokio::time::timeout(Duration::from_secs(1), events_tx.closed())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn done_event_becomes_the_done_frame() {
        let (events_tx, events_rx) = mpsc::channel::<StreamEvent>(1);
        let mut frames = encode_events(events_rx);
        events_tx.send(StreamEvent::Done).await.unwrap();
        drop(events_tx);

        assert_eq!(frames.recv().await.unwrap(), Bytes::from_static(DONE_FRAME));
        assert!(frames.recv().await.is_none());
    }
}
