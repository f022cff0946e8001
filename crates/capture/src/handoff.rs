//! Single-slot rendezvous between the reassembly thread and the consumer
//!
//! The producer blocks on [`FrameProducer::offer`] until the consumer calls
//! [`FrameConsumer::take`], so at most one completed frame is ever in
//! flight. Closing the handoff wakes both sides, and once closed no further
//! item changes hands even if the other side is still waiting.

use crossbeam_channel::{Receiver, Sender, TryRecvError, bounded, select};
use parking_lot::Mutex;

/// Create a connected producer, consumer and closer
pub fn rendezvous<T>() -> (FrameProducer<T>, FrameConsumer<T>, HandoffCloser) {
    let (frame_tx, frame_rx) = bounded(0);
    let (stop_tx, stop_rx) = bounded::<()>(0);

    (
        FrameProducer {
            frames: frame_tx,
            stop: stop_rx.clone(),
        },
        FrameConsumer {
            frames: frame_rx,
            stop: stop_rx,
        },
        HandoffCloser {
            stop: Mutex::new(Some(stop_tx)),
        },
    )
}

/// Sending half, owned by the I/O thread
pub struct FrameProducer<T> {
    frames: Sender<T>,
    stop: Receiver<()>,
}

impl<T> FrameProducer<T> {
    /// Block until the consumer takes `item`. Returns false if the handoff
    /// was closed or the consumer is gone.
    pub fn offer(&self, item: T) -> bool {
        if is_stopped(&self.stop) {
            return false;
        }
        select! {
            send(self.frames, item) -> sent => sent.is_ok(),
            recv(self.stop) -> _ => false,
        }
    }
}

/// Receiving half, used by whichever thread drives the capture loop
pub struct FrameConsumer<T> {
    frames: Receiver<T>,
    stop: Receiver<()>,
}

impl<T> FrameConsumer<T> {
    /// Block until a producer offers an item. Returns None once the handoff
    /// is closed or the producer has gone away.
    pub fn take(&self) -> Option<T> {
        if is_stopped(&self.stop) {
            return None;
        }
        select! {
            recv(self.frames) -> item => item.ok().filter(|_| !is_stopped(&self.stop)),
            recv(self.stop) -> _ => None,
        }
    }
}

/// `select!` picks at random among ready branches, so closure is checked first
fn is_stopped(stop: &Receiver<()>) -> bool {
    matches!(stop.try_recv(), Err(TryRecvError::Disconnected))
}

/// Closes the handoff; every pending and future offer/take returns at once
pub struct HandoffCloser {
    stop: Mutex<Option<Sender<()>>>,
}

impl HandoffCloser {
    /// Idempotent
    pub fn close(&self) {
        // Dropping the only sender disconnects every stop receiver
        self.stop.lock().take();
    }

    pub fn is_closed(&self) -> bool {
        self.stop.lock().is_none()
    }
}
