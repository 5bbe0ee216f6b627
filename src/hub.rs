// Broadcast hub: fans snapshots out to per-subscriber bounded queues.
//
// Each subscriber owns a drop-oldest queue drained by its own delivery worker (the connection
// task). Publishing never waits on a subscriber: a full queue loses its oldest frame instead.

use crate::models::{Snapshot, SubscriberDiagnostics, SubscriberState};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::Notify;

pub type SubscriberId = u64;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HubError {
    #[error("broadcast hub is shutting down")]
    ShuttingDown,
}

/// One serialized snapshot, shared by every queue it is pushed to.
#[derive(Debug)]
pub struct Frame {
    pub sequence: u64,
    pub json: Arc<str>,
}

#[derive(Serialize)]
struct SnapshotEnvelope<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(flatten)]
    snapshot: &'a Snapshot,
}

impl Frame {
    pub fn from_snapshot(snapshot: &Snapshot) -> Result<Self, serde_json::Error> {
        let json = serde_json::to_string(&SnapshotEnvelope {
            kind: "snapshot",
            snapshot,
        })?;
        Ok(Self {
            sequence: snapshot.sequence,
            json: json.into(),
        })
    }
}

struct SlotInner {
    queue: VecDeque<Arc<Frame>>,
    state: SubscriberState,
}

struct Slot {
    id: SubscriberId,
    capacity: usize,
    inner: Mutex<SlotInner>,
    notify: Notify,
    dropped: AtomicU64,
}

impl Slot {
    fn lock(&self) -> MutexGuard<'_, SlotInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns false when the subscriber no longer takes frames.
    fn push(&self, frame: Arc<Frame>) -> bool {
        let mut inner = self.lock();
        if matches!(
            inner.state,
            SubscriberState::Draining | SubscriberState::Closed
        ) {
            return false;
        }
        if inner.queue.len() >= self.capacity {
            inner.queue.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        inner.queue.push_back(frame);
        drop(inner);
        self.notify.notify_one();
        true
    }

    fn begin_drain(&self) {
        let mut inner = self.lock();
        if inner.state != SubscriberState::Closed {
            inner.state = SubscriberState::Draining;
        }
        drop(inner);
        self.notify.notify_one();
    }

    fn diagnostics(&self) -> SubscriberDiagnostics {
        let inner = self.lock();
        SubscriberDiagnostics {
            id: self.id,
            state: inner.state,
            dropped_frames: self.dropped.load(Ordering::Relaxed),
            queued: inner.queue.len(),
        }
    }
}

pub struct BroadcastHub {
    registry: Mutex<HashMap<SubscriberId, Arc<Slot>>>,
    next_id: AtomicU64,
    queue_capacity: usize,
    accepting: AtomicBool,
}

impl BroadcastHub {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            registry: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            queue_capacity: queue_capacity.max(1),
            accepting: AtomicBool::new(true),
        }
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<SubscriberId, Arc<Slot>>> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Registers a new subscriber in the `connecting` state. It receives every frame published
    /// after this call returns.
    pub fn subscribe(self: &Arc<Self>) -> Result<SubscriberHandle, HubError> {
        if !self.accepting.load(Ordering::Acquire) {
            return Err(HubError::ShuttingDown);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let slot = Arc::new(Slot {
            id,
            capacity: self.queue_capacity,
            inner: Mutex::new(SlotInner {
                queue: VecDeque::with_capacity(self.queue_capacity),
                state: SubscriberState::Connecting,
            }),
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
        });
        {
            let mut registry = self.registry();
            // Re-check under the lock so shutdown cannot miss a late registration.
            if !self.accepting.load(Ordering::Acquire) {
                return Err(HubError::ShuttingDown);
            }
            registry.insert(id, slot.clone());
        }
        tracing::info!(subscriber = id, "subscriber registered");
        Ok(SubscriberHandle {
            slot,
            hub: Arc::downgrade(self),
        })
    }

    /// Serializes `snapshot` once and queues it for every live subscriber. Returns how many
    /// subscribers took the frame.
    pub fn publish(&self, snapshot: &Snapshot) -> usize {
        match Frame::from_snapshot(snapshot) {
            Ok(frame) => self.publish_frame(Arc::new(frame)),
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    sequence = snapshot.sequence,
                    operation = "serialize_snapshot",
                    "snapshot serialization failed"
                );
                0
            }
        }
    }

    pub fn publish_frame(&self, frame: Arc<Frame>) -> usize {
        // Registry lock is held only to copy the slot list; pushes happen outside it.
        let slots: Vec<Arc<Slot>> = self.registry().values().cloned().collect();
        slots
            .iter()
            .filter(|slot| slot.push(frame.clone()))
            .count()
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry().len()
    }

    pub fn diagnostics(&self) -> Vec<SubscriberDiagnostics> {
        let slots: Vec<Arc<Slot>> = self.registry().values().cloned().collect();
        let mut out: Vec<SubscriberDiagnostics> = slots.iter().map(|s| s.diagnostics()).collect();
        out.sort_by_key(|d| d.id);
        out
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    /// Stops accepting subscribers and tells every existing one to drain and close.
    pub fn shutdown(&self) {
        let slots: Vec<Arc<Slot>> = {
            let registry = self.registry();
            self.accepting.store(false, Ordering::Release);
            registry.values().cloned().collect()
        };
        tracing::info!(subscribers = slots.len(), "broadcast hub shutting down");
        for slot in slots {
            slot.begin_drain();
        }
    }

    fn remove(&self, id: SubscriberId) {
        if self.registry().remove(&id).is_some() {
            tracing::info!(subscriber = id, "subscriber removed");
        }
    }
}

/// A subscriber's end of the hub. Dropping it closes and deregisters the subscriber.
pub struct SubscriberHandle {
    slot: Arc<Slot>,
    hub: Weak<BroadcastHub>,
}

impl SubscriberHandle {
    pub fn id(&self) -> SubscriberId {
        self.slot.id
    }

    pub fn state(&self) -> SubscriberState {
        self.slot.lock().state
    }

    pub fn dropped_frames(&self) -> u64 {
        self.slot.dropped.load(Ordering::Relaxed)
    }

    pub fn queued(&self) -> usize {
        self.slot.lock().queue.len()
    }

    /// Handshake finished; the subscriber is now receiving frames.
    pub fn activate(&self) {
        let mut inner = self.slot.lock();
        if inner.state == SubscriberState::Connecting {
            inner.state = SubscriberState::Active;
        }
    }

    /// Stops new frames; already queued ones are still returned by `recv`.
    pub fn close(&self) {
        self.slot.begin_drain();
    }

    /// Next queued frame, waiting if the queue is empty. Returns `None` once the subscriber
    /// is draining and its queue is empty; it is then closed and removed from the hub.
    pub async fn recv(&mut self) -> Option<Arc<Frame>> {
        loop {
            if let Some(next) = self.poll_queue() {
                return next;
            }
            self.slot.notify.notified().await;
        }
    }

    /// Non-waiting variant of `recv`: `None` if nothing is queued right now.
    pub fn try_recv(&mut self) -> Option<Arc<Frame>> {
        self.poll_queue().flatten()
    }

    /// `Some(frame)` for a frame, `Some(None)` when finished, `None` to keep waiting.
    fn poll_queue(&mut self) -> Option<Option<Arc<Frame>>> {
        let mut inner = self.slot.lock();
        if let Some(frame) = inner.queue.pop_front() {
            return Some(Some(frame));
        }
        match inner.state {
            SubscriberState::Draining | SubscriberState::Closed => {
                inner.state = SubscriberState::Closed;
                drop(inner);
                self.deregister();
                Some(None)
            }
            _ => None,
        }
    }

    fn deregister(&self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.remove(self.slot.id);
        }
    }
}

impl Drop for SubscriberHandle {
    fn drop(&mut self) {
        {
            let mut inner = self.slot.lock();
            inner.state = SubscriberState::Closed;
            inner.queue.clear();
        }
        self.deregister();
    }
}
