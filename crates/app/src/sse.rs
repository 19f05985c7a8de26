use std::{
    convert::Infallible,
    pin::Pin,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    task::{Context, Poll},
};

use axum::response::sse::Event;
use metrics::gauge;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, warn};

use hookboard_core::{MessageType, WebhookMessage};
use hookboard_storage::{InsertEvent, InsertSubscription};

const MESSAGE_EVENT: &str = "message";
const LAGGED_EVENT: &str = "lagged";

/// Fans store insert notifications out to live dashboard clients.
#[derive(Clone, Default)]
pub struct SseHub {
    clients: Arc<AtomicUsize>,
}

impl SseHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps a store subscription as an SSE stream. Dropping the stream
    /// releases the subscription and the client slot.
    pub fn stream(
        &self,
        subscription: InsertSubscription,
        filter: Option<MessageType>,
    ) -> SseStream {
        let guard = ClientGuard::new(self.clients.clone());
        let events = subscription.filter_map(move |event| match event {
            InsertEvent::Inserted(message) => {
                if filter.is_some_and(|wanted| wanted != message.message_type) {
                    return None;
                }
                message_event(&message).map(Ok)
            }
            InsertEvent::Lagged(skipped) => {
                debug!(stage = "sse", skipped, "live client lagged behind inserts");
                Some(Ok(Event::default()
                    .event(LAGGED_EVENT)
                    .data(skipped.to_string())))
            }
        });

        SseStream {
            inner: Box::pin(events),
            _guard: guard,
        }
    }

    pub fn connected(&self) -> usize {
        self.clients.load(Ordering::SeqCst)
    }
}

fn message_event(message: &WebhookMessage) -> Option<Event> {
    match serde_json::to_string(message) {
        Ok(data) => Some(
            Event::default()
                .id(message.id.clone())
                .event(MESSAGE_EVENT)
                .data(data),
        ),
        Err(err) => {
            warn!(stage = "sse", id = %message.id, error = %err, "failed to encode message event");
            None
        }
    }
}

pub struct SseStream {
    inner: Pin<Box<dyn Stream<Item = Result<Event, Infallible>> + Send>>,
    _guard: ClientGuard,
}

impl Stream for SseStream {
    type Item = Result<Event, Infallible>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        this.inner.as_mut().poll_next(cx)
    }
}

struct ClientGuard {
    clients: Arc<AtomicUsize>,
}

impl ClientGuard {
    fn new(clients: Arc<AtomicUsize>) -> Self {
        let value = clients.fetch_add(1, Ordering::SeqCst) + 1;
        gauge!("sse_clients").set(value as f64);
        Self { clients }
    }
}

impl Drop for ClientGuard {
    fn drop(&mut self) {
        let value = self.clients.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        gauge!("sse_clients").set(value as f64);
    }
}
