use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tether_core::request::TurnResolver;
use tether_core::{
    ConversationRequest, Event, EventBus, OriginContext, RequestOrigin, RequestSink,
    TetherError, TurnHandle,
};
use tokio::sync::mpsc;
use tracing::debug;

/// A request waiting for the session, paired with the resolver of its handle.
pub struct QueuedRequest {
    pub request: ConversationRequest,
    pub resolver: TurnResolver,
}

/// FIFO admission of conversation requests.
///
/// Admin- and system-originated requests share one queue with no priority
/// between them: arrival order is the only order.
#[derive(Clone)]
pub struct RequestQueue {
    tx: mpsc::UnboundedSender<QueuedRequest>,
    depth: Arc<AtomicUsize>,
    capacity: Option<usize>,
    events: EventBus,
}

/// The consuming end, owned by the single turn runner.
pub struct QueueReceiver {
    rx: mpsc::UnboundedReceiver<QueuedRequest>,
    depth: Arc<AtomicUsize>,
}

impl RequestQueue {
    /// `capacity` of `None` means unbounded.
    pub fn new(capacity: Option<usize>, events: EventBus) -> (Self, QueueReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let depth = Arc::new(AtomicUsize::new(0));
        let queue = Self {
            tx,
            depth: Arc::clone(&depth),
            capacity,
            events,
        };
        (queue, QueueReceiver { rx, depth })
    }

    pub fn enqueue(
        &self,
        context: Arc<dyn OriginContext>,
        origin: RequestOrigin,
        prompt: impl Into<String>,
    ) -> tether_core::Result<TurnHandle> {
        let capacity = self.capacity;
        let depth = self
            .depth
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |d| match capacity {
                Some(cap) if d >= cap => None,
                _ => Some(d + 1),
            })
            .map_err(|depth| TetherError::QueueFull {
                depth,
                capacity: capacity.unwrap_or(depth),
            })?
            + 1;

        let request = ConversationRequest::new(context, origin, prompt.into());
        let (resolver, handle) = TurnHandle::channel(request.id);
        let request_id = request.id;
        let origin = request.origin.to_string();

        if self.tx.send(QueuedRequest { request, resolver }).is_err() {
            self.depth.fetch_sub(1, Ordering::SeqCst);
            return Err(TetherError::QueueClosed);
        }

        debug!(%request_id, %origin, depth, "request enqueued");
        self.events.publish(Event::RequestEnqueued {
            request_id,
            origin,
            depth,
        });
        Ok(handle)
    }

    /// Requests admitted but not yet picked up by the runner.
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }
}

impl RequestSink for RequestQueue {
    fn submit(
        &self,
        context: Arc<dyn OriginContext>,
        origin: RequestOrigin,
        prompt: String,
    ) -> tether_core::Result<TurnHandle> {
        self.enqueue(context, origin, prompt)
    }
}

impl QueueReceiver {
    /// Next request in arrival order; `None` once every producer is gone.
    pub async fn recv(&mut self) -> Option<QueuedRequest> {
        let item = self.rx.recv().await?;
        self.depth.fetch_sub(1, Ordering::SeqCst);
        Some(item)
    }
}
