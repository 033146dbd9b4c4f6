//! In-process pub/sub for function log lines and package lifecycle events,
//! fanned out to HTTP control-plane subscribers.
//!
//! Built on `tokio::sync::broadcast`, with a subscription stream that skips
//! past lag gaps via `try_recv` before falling back to a registered waker —
//! the same shape as a multi-consumer SSE broadcaster.

use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// A package lifecycle transition, published whenever the registry
/// publishes a new snapshot or a deploy commits/rolls back.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LifecycleEvent {
    FunctionLoaded { package: String, generation: u64 },
    FunctionUnloaded { package: String },
    FunctionUpdated { package: String, generation: u64 },
    FunctionDeployed { package: String },
    FunctionDeleted { package: String },
}

/// One persisted log record, mirrored onto the bus as it's written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    pub level: String,
    pub pid: u32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

/// Everything a subscriber of `/api/events` receives.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "topic", rename_all = "snake_case")]
pub enum BusEvent {
    Lifecycle(LifecycleEvent),
    LogNew(LogRecord),
}

/// The shared publish/subscribe handle, cheaply cloneable.
#[derive(Clone)]
pub struct Bus {
    tx: broadcast::Sender<BusEvent>,
}

impl Bus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publishing is best-effort: if there are no subscribers the send
    /// returns an error that is intentionally discarded — durable event
    /// delivery is out of scope.
    pub fn publish_lifecycle(&self, event: LifecycleEvent) {
        let _ = self.tx.send(BusEvent::Lifecycle(event));
    }

    pub fn publish_log(&self, record: LogRecord) {
        let _ = self.tx.send(BusEvent::LogNew(record));
    }

    pub fn subscribe(&self) -> BusSubscription {
        BusSubscription {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new(1024)
    }
}

/// A live subscription, implementing `Stream<Item = Result<BusEvent, Infallible>>`
/// so it can be adapted directly into an SSE body by the HTTP crate.
pub struct BusSubscription {
    rx: broadcast::Receiver<BusEvent>,
}

impl futures_core::Stream for BusSubscription {
    type Item = Result<BusEvent, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Poll::Ready(Some(Ok(event))),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(broadcast::error::TryRecvError::Closed) => return Poll::Ready(None),
                Err(broadcast::error::TryRecvError::Empty) => break,
            }
        }

        let rx = &mut self.rx;
        let mut recv_fut = Box::pin(rx.recv());
        match recv_fut.as_mut().poll(cx) {
            Poll::Ready(Ok(event)) => Poll::Ready(Some(Ok(event))),
            Poll::Ready(Err(broadcast::error::RecvError::Closed)) => Poll::Ready(None),
            Poll::Ready(Err(broadcast::error::RecvError::Lagged(_))) => {
                cx.waker().wake_by_ref();
                Poll::Pending
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
