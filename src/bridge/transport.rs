//! Request/response correlation over a one-way channel
//!
//! Each [`Transport::call`] gets a fresh correlation id and a pending entry.
//! The entry leaves the pending map exactly once: when the correlated response
//! arrives, when the timeout fires, when the inbound channel closes, or when
//! the caller drops the call future. Whoever removes the entry settles it, so
//! a call never sees both a response and a timeout.

use crate::metrics;
use crate::utils::error::BridgeError;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Instant;
use uuid::Uuid;

use super::channel::{IsolatedEnd, MessageSink};
use super::messages::{HostMessage, IsolatedMessage, Request, RequestKind, ResponseBody};

/// Default correlated request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(30_000);

/// An outstanding correlated request
struct PendingRequest {
    kind: RequestKind,
    target: String,
    sender: oneshot::Sender<Result<Value, BridgeError>>,
    created_at: Instant,
}

#[derive(Default)]
struct PendingMap {
    inner: Mutex<HashMap<String, PendingRequest>>,
}

impl PendingMap {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, PendingRequest>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn insert(&self, id: String, request: PendingRequest) {
        self.lock().insert(id, request);
    }

    fn remove(&self, id: &str) -> Option<PendingRequest> {
        self.lock().remove(id)
    }

    fn len(&self) -> usize {
        self.lock().len()
    }

    fn drain(&self) -> Vec<PendingRequest> {
        self.lock().drain().map(|(_, request)| request).collect()
    }
}

/// Removes a pending entry if the call future is dropped early
struct PendingGuard {
    pending: Arc<PendingMap>,
    id: String,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.pending.remove(&self.id);
    }
}

/// Correlating client transport for the isolated side
pub struct Transport {
    sink: Arc<dyn MessageSink<IsolatedMessage>>,
    inbound: Mutex<Option<mpsc::Receiver<HostMessage>>>,
    listener_started: AtomicBool,
    pending: Arc<PendingMap>,
    events: broadcast::Sender<HostMessage>,
}

impl Transport {
    /// Create a transport over an outbound sink and inbound receiver
    ///
    /// Nothing is spawned until the first call, post or subscription.
    pub fn new(
        sink: Arc<dyn MessageSink<IsolatedMessage>>,
        inbound: mpsc::Receiver<HostMessage>,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            sink,
            inbound: Mutex::new(Some(inbound)),
            listener_started: AtomicBool::new(false),
            pending: Arc::new(PendingMap::default()),
            events,
        }
    }

    /// Create a transport from the isolated ends of an in-process pair
    pub fn from_isolated_end(end: IsolatedEnd) -> Self {
        Self::new(Arc::new(end.outbound), end.inbound)
    }

    /// Send a correlated request and wait for its response
    ///
    /// # Errors
    ///
    /// - `BridgeError::Timeout` if no response arrives within `timeout`
    /// - `BridgeError::Remote` if the host answered with `success: false`
    /// - `BridgeError::ChannelClosed` if the channel closed first
    pub async fn call(&self, request: Request, timeout: Duration) -> Result<Value, BridgeError> {
        self.ensure_listener();

        let id = Uuid::new_v4().to_string();
        let kind = request.kind();
        let target = request.target().to_string();
        let (sender, mut receiver) = oneshot::channel();

        self.pending.insert(
            id.clone(),
            PendingRequest {
                kind,
                target: target.clone(),
                sender,
                created_at: Instant::now(),
            },
        );
        let _guard = PendingGuard {
            pending: self.pending.clone(),
            id: id.clone(),
        };
        metrics::set_pending_requests(self.pending.len());

        self.sink.post(request.into_message(id.clone())).await?;
        tracing::debug!(%id, kind = kind.as_str(), %target, "Request sent");

        match tokio::time::timeout(timeout, &mut receiver).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(BridgeError::ChannelClosed),
            Err(_) => match self.pending.remove(&id) {
                Some(expired) => {
                    metrics::record_transport_timeout(kind.as_str());
                    metrics::set_pending_requests(self.pending.len());
                    tracing::warn!(
                        %id,
                        kind = kind.as_str(),
                        target = %expired.target,
                        "Request timeout"
                    );
                    Err(BridgeError::Timeout {
                        kind: kind.as_str(),
                        id,
                        timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                    })
                }
                // The response won the race and has already been delivered
                None => receiver.try_recv().unwrap_or(Err(BridgeError::ChannelClosed)),
            },
        }
    }

    /// Post a message without waiting for anything
    pub async fn post(&self, message: IsolatedMessage) -> Result<(), BridgeError> {
        self.ensure_listener();
        self.sink.post(message).await
    }

    /// Subscribe to uncorrelated host messages (`DATA`, `SYNC_UPDATE`)
    pub fn subscribe(&self) -> broadcast::Receiver<HostMessage> {
        let receiver = self.events.subscribe();
        self.ensure_listener();
        receiver
    }

    /// Number of requests awaiting a response
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Whether the receive loop has been attached
    pub fn is_listening(&self) -> bool {
        self.listener_started.load(Ordering::SeqCst)
    }

    /// Attach the receive loop exactly once
    fn ensure_listener(&self) {
        if self.listener_started.swap(true, Ordering::SeqCst) {
            return;
        }

        let receiver = self
            .inbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(receiver) = receiver else {
            return;
        };

        let pending = self.pending.clone();
        let events = self.events.clone();
        tokio::spawn(listen(receiver, pending, events));
        tracing::debug!("Transport listener initialized");
    }
}

async fn listen(
    mut receiver: mpsc::Receiver<HostMessage>,
    pending: Arc<PendingMap>,
    events: broadcast::Sender<HostMessage>,
) {
    while let Some(message) = receiver.recv().await {
        match message.response() {
            Some((kind, body)) => settle(&pending, kind, body),
            None => {
                // No subscribers is fine
                let _ = events.send(message);
            }
        }
    }

    let orphaned = pending.drain();
    if !orphaned.is_empty() {
        tracing::warn!(count = orphaned.len(), "Channel closed with requests in flight");
    }
    for request in orphaned {
        let _ = request.sender.send(Err(BridgeError::ChannelClosed));
    }
    metrics::set_pending_requests(0);
}

fn settle(pending: &PendingMap, kind: RequestKind, body: &ResponseBody) {
    let Some(request) = pending.remove(&body.id) else {
        tracing::debug!(id = %body.id, kind = kind.as_str(), "Ignoring unmatched response");
        return;
    };
    metrics::set_pending_requests(pending.len());

    if request.kind != kind {
        tracing::warn!(
            id = %body.id,
            expected = request.kind.as_str(),
            got = kind.as_str(),
            "Response kind does not match request"
        );
    }

    let result = if body.success {
        Ok(body.data.clone().unwrap_or(Value::Null))
    } else {
        let message = body
            .error
            .clone()
            .unwrap_or_else(|| format!("{} failed", kind.as_str()));
        tracing::debug!(id = %body.id, target = %request.target, error = %message, "Request failed");
        Err(BridgeError::Remote(message))
    };

    tracing::debug!(
        id = %body.id,
        elapsed_ms = request.created_at.elapsed().as_millis() as u64,
        "Request settled"
    );
    // The caller may have given up already
    let _ = request.sender.send(result);
}
