use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use smithery_provider_core::{
    ChatStream, ProxyError, RelayOutcome, RequestStatus, StreamEvent, UpstreamBody,
};
use smithery_transform::generate_content::openai_chat_completions2smithery::stream::SmitheryToOpenAIChatCompletionStreamState;

const EVENT_CHANNEL_CAPACITY: usize = 32;

/// Runs the relay state machine over an upstream body on its own task.
///
/// Events reach the returned channel in relay order. When the receiver is
/// dropped the task stops reading and drops the upstream body, which closes
/// the connection.
pub fn spawn_relay(
    trace_id: String,
    body: UpstreamBody,
    state: SmitheryToOpenAIChatCompletionStreamState,
) -> ChatStream {
    let id = state.id().to_string();
    let model = state.model().to_string();
    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let (outcome_tx, outcome_rx) = oneshot::channel();

    tokio::spawn(async move {
        let mut relay = Relay {
            state,
            tx,
            text: String::new(),
        };
        let (status, error) = relay.run(body).await;
        if let Some(error) = &error {
            warn!(
                event = "relay_failed",
                trace_id = %trace_id,
                completion_id = %relay.state.id(),
                error = %error,
            );
        }
        debug!(
            event = "relay_finished",
            trace_id = %trace_id,
            completion_id = %relay.state.id(),
            status = ?status,
            skipped_events = relay.state.skipped_events(),
        );
        let _ = outcome_tx.send(RelayOutcome {
            status,
            completion_text: relay.text,
            error: error.map(|err| err.to_string()),
        });
    });

    ChatStream {
        id,
        model,
        events: rx,
        outcome: outcome_rx,
    }
}

struct Relay {
    state: SmitheryToOpenAIChatCompletionStreamState,
    tx: mpsc::Sender<StreamEvent>,
    text: String,
}

struct Disconnected;

impl Relay {
    async fn run(&mut self, body: UpstreamBody) -> (RequestStatus, Option<ProxyError>) {
        match body {
            UpstreamBody::Bytes(bytes) => {
                let mut events = self.state.push_bytes(&bytes);
                events.extend(self.state.finish());
                match self.forward(events).await {
                    Ok(()) => (RequestStatus::Success, None),
                    Err(Disconnected) => (RequestStatus::Cancelled, None),
                }
            }
            UpstreamBody::Stream(mut rx) => loop {
                let item = tokio::select! {
                    _ = self.tx.closed() => return (RequestStatus::Cancelled, None),
                    item = rx.recv() => item,
                };
                let (events, failure) = match item {
                    Some(Ok(bytes)) => (self.state.push_bytes(&bytes), None),
                    Some(Err(err)) => (self.state.abort(), Some(err)),
                    None => (self.state.finish(), None),
                };
                if self.forward(events).await.is_err() {
                    return (RequestStatus::Cancelled, None);
                }
                if let Some(err) = failure {
                    return (RequestStatus::Error, Some(err));
                }
                if self.state.is_terminal() {
                    return (RequestStatus::Success, None);
                }
            },
        }
    }

    async fn forward(&mut self, events: Vec<StreamEvent>) -> Result<(), Disconnected> {
        for event in events {
            if let Some(text) = event.as_chunk().and_then(|chunk| chunk.delta_text()) {
                self.text.push_str(text);
            }
            self.tx.send(event).await.map_err(|_| Disconnected)?;
        }
        Ok(())
    }
}
