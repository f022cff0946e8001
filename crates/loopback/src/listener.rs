//! Channel event listeners

use std::net::SocketAddr;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::error;

/// Identity of the channel an event originates from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    /// Reader name (also used for the I/O thread name)
    pub name: String,
    /// Listening address handed to the producer
    pub address: SocketAddr,
}

impl std::fmt::Display for ChannelInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.name, self.address)
    }
}

/// Receives lifecycle notifications from a channel.
///
/// Callbacks run on the reader's I/O thread. Both have empty defaults so an
/// implementor only overrides what it cares about.
pub trait ChannelListener: Send + Sync {
    /// No data arrived within the configured window. The reader keeps waiting.
    fn on_data_flow_timeout(&self, _source: &ChannelInfo, _timeout: Duration) {}

    /// The read loop ended (end of stream, error, liveness lost or disposal)
    fn on_completed(&self, _source: &ChannelInfo) {}
}

/// Ordered listener list with per-listener panic isolation
#[derive(Default, Clone)]
pub struct ListenerSet {
    listeners: Arc<RwLock<Vec<Arc<dyn ChannelListener>>>>,
}

impl ListenerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, listener: Arc<dyn ChannelListener>) {
        self.listeners.write().push(listener);
    }

    /// Remove a listener by identity. Returns false if it was not registered.
    pub fn remove(&self, listener: &Arc<dyn ChannelListener>) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|l| !Arc::ptr_eq(l, listener));
        listeners.len() != before
    }

    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }

    pub fn notify_data_flow_timeout(&self, source: &ChannelInfo, timeout: Duration) {
        self.for_each("data flow timeout", |l| l.on_data_flow_timeout(source, timeout));
    }

    pub fn notify_completed(&self, source: &ChannelInfo) {
        self.for_each("completed", |l| l.on_completed(source));
    }

    fn for_each(&self, event: &str, f: impl Fn(&dyn ChannelListener)) {
        // Snapshot so a listener may (un)register others without deadlocking
        let snapshot: Vec<_> = self.listeners.read().clone();
        for listener in snapshot {
            if catch_unwind(AssertUnwindSafe(|| f(listener.as_ref()))).is_err() {
                error!("Channel listener panicked while handling '{}' event", event);
            }
        }
    }
}
