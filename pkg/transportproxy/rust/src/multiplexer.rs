// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Event Multiplexer
//!
//! The single ordered delivery point of a proxy. Registry events and relayed
//! upstream events are both published here; every publish is written to all
//! matching subscriber channels while the subscriber table is locked, so each
//! subscriber observes the same global order.
//!
//! Hand-off is an unbounded channel send: a slow or dead subscriber never
//! blocks the publisher, and a dropped one is detached on the next publish or
//! by its own `Drop`.

use crate::proto::{Event, GetEventsRequest, event};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_stream::Stream;
use tonic::Status;
use tracing::{debug, info};

pub type SubscriberId = u64;

type Delivery = Result<Event, Status>;

/// Why a subscriber left the ATTACHED state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetachReason {
    Cancelled,
    UpstreamError,
    Disconnected,
}

impl fmt::Display for DetachReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DetachReason::Cancelled => write!(f, "cancelled"),
            DetachReason::UpstreamError => write!(f, "upstream error"),
            DetachReason::Disconnected => write!(f, "disconnected"),
        }
    }
}

/// Per-subscriber event selection; `None` matches anything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventFilter {
    pub kind: Option<event::Kind>,
    pub pid: Option<i32>,
    pub group_id: Option<i64>,
}

impl EventFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn matches(&self, event: &Event) -> bool {
        self.kind.is_none_or(|k| event.kind() == k)
            && self.pid.is_none_or(|p| event.pid == p)
            && self.group_id.is_none_or(|g| event.group_id == g)
    }
}

impl From<&GetEventsRequest> for EventFilter {
    fn from(request: &GetEventsRequest) -> Self {
        Self {
            kind: match request.kind() {
                event::Kind::None => None,
                kind => Some(kind),
            },
            pid: (request.pid != 0).then_some(request.pid),
            group_id: (request.group_id != 0).then_some(request.group_id),
        }
    }
}

struct Subscriber {
    filter: EventFilter,
    tx: mpsc::UnboundedSender<Delivery>,
}

#[derive(Default)]
struct HubState {
    next_id: SubscriberId,
    subscribers: BTreeMap<SubscriberId, Subscriber>,
    closed: bool,
}

#[derive(Default)]
pub struct EventMultiplexer {
    state: Mutex<HubState>,
}

impl EventMultiplexer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Attach a subscriber, delivering `primer` to it before anything
    /// published afterwards. Returns `None` once the multiplexer is closed.
    pub fn attach(
        self: &Arc<Self>,
        filter: EventFilter,
        primer: impl IntoIterator<Item = Event>,
    ) -> Option<Subscription> {
        let mut state = self.state.lock();
        if state.closed {
            return None;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        for event in primer.into_iter().filter(|e| filter.matches(e)) {
            // The receiver is alive until this function returns.
            let _ = tx.send(Ok(event));
        }

        state.next_id += 1;
        let id = state.next_id;
        state.subscribers.insert(id, Subscriber { filter, tx });
        info!(
            subscriber_id = id,
            subscribers = state.subscribers.len(),
            "subscriber attached"
        );

        Some(Subscription {
            id,
            rx,
            hub: Arc::downgrade(self),
        })
    }

    /// Deliver one event to every matching subscriber. Returns how many
    /// subscribers received it.
    pub fn publish(&self, event: &Event) -> usize {
        let mut state = self.state.lock();
        Self::deliver(&mut state, event)
    }

    /// Deliver a batch with no other publish interleaved.
    pub fn publish_all(&self, events: &[Event]) {
        if events.is_empty() {
            return;
        }
        let mut state = self.state.lock();
        for event in events {
            Self::deliver(&mut state, event);
        }
    }

    /// Terminate every subscriber with `status`. The multiplexer stays open.
    pub fn fail(&self, status: Status) -> usize {
        let mut state = self.state.lock();
        let subscribers = std::mem::take(&mut state.subscribers);
        let count = subscribers.len();
        for (id, subscriber) in subscribers {
            let _ = subscriber.tx.send(Err(status.clone()));
            debug!(subscriber_id = id, reason = %DetachReason::UpstreamError, "subscriber detached");
        }
        count
    }

    /// Complete every subscriber after its pending events and refuse new
    /// ones. Returns `false` if already closed.
    pub fn close(&self) -> bool {
        let mut state = self.state.lock();
        if state.closed {
            return false;
        }
        state.closed = true;
        let subscribers = std::mem::take(&mut state.subscribers);
        info!(subscribers = subscribers.len(), "event multiplexer closed");
        for id in subscribers.keys() {
            debug!(subscriber_id = id, reason = %DetachReason::Disconnected, "subscriber detached");
        }
        true
    }

    /// Remove a subscriber. A second detach of the same id is a no-op
    /// returning `false`.
    pub fn detach(&self, id: SubscriberId, reason: DetachReason) -> bool {
        let removed = self.state.lock().subscribers.remove(&id).is_some();
        if removed {
            debug!(subscriber_id = id, reason = %reason, "subscriber detached");
        }
        removed
    }

    pub fn subscriber_count(&self) -> usize {
        self.state.lock().subscribers.len()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    fn deliver(state: &mut HubState, event: &Event) -> usize {
        let mut delivered = 0;
        let mut gone = Vec::new();
        for (id, subscriber) in &state.subscribers {
            if !subscriber.filter.matches(event) {
                continue;
            }
            if subscriber.tx.send(Ok(event.clone())).is_ok() {
                delivered += 1;
            } else {
                gone.push(*id);
            }
        }
        for id in gone {
            state.subscribers.remove(&id);
            debug!(subscriber_id = id, reason = %DetachReason::Cancelled, "subscriber detached");
        }
        delivered
    }
}

/// Receiving end of one subscriber. Dropping it detaches the subscriber.
pub struct Subscription {
    id: SubscriberId,
    rx: mpsc::UnboundedReceiver<Delivery>,
    hub: Weak<EventMultiplexer>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }
}

impl Stream for Subscription {
    type Item = Delivery;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.detach(self.id, DetachReason::Cancelled);
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
