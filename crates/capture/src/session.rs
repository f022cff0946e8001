//! Capture session state shared by all strategies

use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

use tracing::debug;

use crate::Rect;

/// Session lifecycle. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    /// Constructed, resources still being acquired
    Idle = 0,
    /// Fully constructed, frames may be grabbed
    Active = 1,
    /// Torn down; never reused
    Disposed = 2,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Active,
            _ => Self::Disposed,
        }
    }
}

/// Negotiated parameters and lifecycle of one capture session
#[derive(Debug)]
pub struct CaptureSession {
    bounds: Rect,
    scale_x: f64,
    scale_y: f64,
    show_pointer: bool,
    state: AtomicU8,
    frame_counter: AtomicU64,
}

impl CaptureSession {
    pub fn new(bounds: Rect, scale_x: f64, scale_y: f64, show_pointer: bool) -> Self {
        Self {
            bounds,
            scale_x,
            scale_y,
            show_pointer,
            state: AtomicU8::new(SessionState::Idle as u8),
            frame_counter: AtomicU64::new(0),
        }
    }

    pub fn bounds(&self) -> Rect {
        self.bounds
    }

    pub fn scale_x(&self) -> f64 {
        self.scale_x
    }

    pub fn scale_y(&self) -> f64 {
        self.scale_y
    }

    pub fn show_pointer(&self) -> bool {
        self.show_pointer
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn is_disposed(&self) -> bool {
        self.state() == SessionState::Disposed
    }

    /// Idle -> Active. Returns false if the session is not idle.
    pub fn activate(&self) -> bool {
        self.state
            .compare_exchange(
                SessionState::Idle as u8,
                SessionState::Active as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    /// Move to Disposed and run `teardown` if this call made the transition
    pub fn dispose(&self, teardown: impl FnOnce()) -> bool {
        let previous = self
            .state
            .swap(SessionState::Disposed as u8, Ordering::SeqCst);
        if previous == SessionState::Disposed as u8 {
            return false;
        }
        debug!("Session {} disposed", self.bounds);
        teardown();
        true
    }

    /// Next frame sequence number
    pub fn next_sequence(&self) -> u64 {
        self.frame_counter.fetch_add(1, Ordering::Relaxed)
    }
}
