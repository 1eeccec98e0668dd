//! Lifecycle event fan-out
//!
//! The upstream manager and session gateway publish [`DomainEvent`]s; anyone
//! holding the [`EventBus`] can subscribe. Slow subscribers lose the oldest
//! events rather than stalling producers.

use tokio::sync::broadcast;
use tracing::{trace, warn};

use crate::DomainEvent;

const CAPACITY: usize = 256;

/// Owner of the broadcast channel
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<DomainEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CAPACITY);
        Self { tx }
    }

    /// Producer handle
    pub fn sender(&self) -> EventSender {
        EventSender { tx: self.tx.clone() }
    }

    /// Events emitted from now on
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub struct EventSender {
    tx: broadcast::Sender<DomainEvent>,
}

impl EventSender {
    /// Publish `event`; returns how many subscribers saw it
    pub fn emit(&self, event: DomainEvent) -> usize {
        let kind = event.type_name();
        let upstream = event.upstream().map(str::to_string);
        let delivered = self.tx.send(event).unwrap_or(0);
        trace!(event = kind, upstream = upstream.as_deref().unwrap_or("-"), delivered, "[Events] Emitted");
        delivered
    }
}

pub struct EventReceiver {
    rx: broadcast::Receiver<DomainEvent>,
}

impl EventReceiver {
    /// Next event, or `None` once every producer is gone
    pub async fn recv(&mut self) -> Option<DomainEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "[Events] Subscriber fell behind");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Skip ahead to the first event `matches` accepts
    pub async fn recv_matching<F>(&mut self, mut matches: F) -> Option<DomainEvent>
    where
        F: FnMut(&DomainEvent) -> bool,
    {
        while let Some(event) = self.recv().await {
            if matches(&event) {
                return Some(event);
            }
        }
        None
    }

    /// Already-queued event, if any
    pub fn try_recv(&mut self) -> Option<DomainEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(missed)) => {
                    warn!(missed, "[Events] Subscriber fell behind");
                }
                Err(_) => return None,
            }
        }
    }
}
