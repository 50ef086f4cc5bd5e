//! Filtered and stream-based consumption of session log events

use std::sync::Arc;
use tokio::sync::broadcast;

use super::SessionLogEvent;

/// Errors surfaced to log subscribers
#[derive(Debug, thiserror::Error)]
pub enum LogStreamError {
    #[error("log bus closed")]
    Closed,
    #[error("receiver lagged, {0} messages skipped")]
    Lagged(u64),
}

/// Receiver wrapper that only yields events passing a predicate
///
/// Useful for observers that care about one level or one message family
/// without draining everything themselves.
pub struct FilteredReceiver<F>
where
    F: Fn(&SessionLogEvent) -> bool + Send + Sync + 'static,
{
    receiver: broadcast::Receiver<SessionLogEvent>,
    filter: Arc<F>,
}

impl<F> FilteredReceiver<F>
where
    F: Fn(&SessionLogEvent) -> bool + Send + Sync + 'static,
{
    pub fn new(receiver: broadcast::Receiver<SessionLogEvent>, filter: F) -> Self {
        Self {
            receiver,
            filter: Arc::new(filter),
        }
    }

    /// Wait for the next event that passes the filter
    pub async fn recv(&mut self) -> Result<SessionLogEvent, LogStreamError> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if (self.filter)(&event) {
                        return Ok(event);
                    }
                }
                Err(broadcast::error::RecvError::Closed) => return Err(LogStreamError::Closed),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    return Err(LogStreamError::Lagged(skipped));
                }
            }
        }
    }

    /// Drain buffered events without blocking; `None` when nothing matches
    pub fn try_recv(&mut self) -> Result<Option<SessionLogEvent>, LogStreamError> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if (self.filter)(&event) {
                        return Ok(Some(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return Ok(None),
                Err(broadcast::error::TryRecvError::Closed) => return Err(LogStreamError::Closed),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    return Err(LogStreamError::Lagged(skipped));
                }
            }
        }
    }

    /// Whether a given event would pass this receiver's filter
    #[must_use]
    pub fn would_receive(&self, event: &SessionLogEvent) -> bool {
        (self.filter)(event)
    }
}

/// Adapt a broadcast receiver into a `Stream`, dropping lag errors
pub fn into_stream(
    receiver: broadcast::Receiver<SessionLogEvent>,
) -> impl futures::Stream<Item = SessionLogEvent> {
    use futures::StreamExt;
    tokio_stream::wrappers::BroadcastStream::new(receiver)
        .filter_map(|item| async move { item.ok() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log_bus::{LogLevel, SessionLogBus};

    #[tokio::test]
    async fn test_filtered_receiver_skips_non_matching() {
        let bus = SessionLogBus::new();
        let mut errors = FilteredReceiver::new(bus.subscribe_admin(), |event: &SessionLogEvent| {
            event.level == LogLevel::Error
        });

        bus.broadcast("s1", LogLevel::Info, "noise");
        bus.broadcast("s1", LogLevel::Error, "boom");

        let received = errors.recv().await.expect("error event");
        assert_eq!(received.message, "boom");
    }

    #[tokio::test]
    async fn test_try_recv_empty() {
        let bus = SessionLogBus::new();
        let mut rx = FilteredReceiver::new(bus.subscribe_admin(), |_: &SessionLogEvent| true);
        assert!(matches!(rx.try_recv(), Ok(None)));
    }

    #[tokio::test]
    async fn test_stream_adapter_yields_events() {
        use futures::StreamExt;

        let bus = SessionLogBus::new();
        let mut stream = Box::pin(into_stream(bus.subscribe_admin()));
        bus.broadcast("", LogLevel::Info, "first");
        let event = stream.next().await.expect("stream yields");
        assert_eq!(event.message, "first");
    }
}
