use std::{
    pin::Pin,
    task::{Context, Poll},
};

use tokio::sync::broadcast;
use tokio_stream::{
    wrappers::{errors::BroadcastStreamRecvError, BroadcastStream},
    Stream, StreamExt,
};

use hookboard_core::WebhookMessage;

const DEFAULT_BUFFER: usize = 256;

/// Item yielded by an [`InsertSubscription`].
#[derive(Debug, Clone, PartialEq)]
pub enum InsertEvent {
    Inserted(WebhookMessage),
    /// The subscriber fell behind and `n` notifications were dropped.
    Lagged(u64),
}

/// Fan-out of committed inserts to any number of subscribers.
#[derive(Clone)]
pub struct InsertNotifier {
    sender: broadcast::Sender<WebhookMessage>,
}

impl InsertNotifier {
    pub fn new(buffer: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer.max(1));
        Self { sender }
    }

    /// Publishes a committed row. Having no subscribers is not an error.
    pub fn publish(&self, message: &WebhookMessage) {
        let _ = self.sender.send(message.clone());
    }

    pub fn subscribe(&self) -> InsertSubscription {
        InsertSubscription::from_receiver(self.sender.subscribe())
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for InsertNotifier {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER)
    }
}

/// Cancellable watch over inserts; dropping it unsubscribes.
pub struct InsertSubscription {
    inner: Pin<Box<dyn Stream<Item = InsertEvent> + Send>>,
}

impl InsertSubscription {
    pub fn from_receiver(receiver: broadcast::Receiver<WebhookMessage>) -> Self {
        let stream = BroadcastStream::new(receiver).map(|result| match result {
            Ok(message) => InsertEvent::Inserted(message),
            Err(BroadcastStreamRecvError::Lagged(skipped)) => InsertEvent::Lagged(skipped),
        });
        Self {
            inner: Box::pin(stream),
        }
    }
}

impl Stream for InsertSubscription {
    type Item = InsertEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        this.inner.as_mut().poll_next(cx)
    }
}
