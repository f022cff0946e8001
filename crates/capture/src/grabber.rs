//! Paced capture loop feeding listeners
//!
//! A [`ScreenGrabber`] owns one [`ScreenSource`] and a thread that grabs at
//! the configured rate, fanning every frame out to its listeners.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::{
    CaptureBackend, CaptureError, CaptureResult, CaptureSettings, Frame, Rect, ScreenSource,
};

/// Receives grabber lifecycle events on the grab thread
pub trait GrabberListener: Send + Sync {
    fn on_started(&self, _bounds: Rect) {}

    /// Frame data is only valid for the duration of the call; clone the
    /// [`Frame`] (cheap, shares the pixel buffer) to keep it.
    fn on_grabbed(&self, _frame: &Frame) {}

    fn on_error(&self, _error: &CaptureError) {}

    fn on_disposed(&self) {}
}

/// Grab loop statistics
#[derive(Debug, Clone, Default)]
pub struct GrabberStats {
    pub frames_grabbed: u64,
    pub empty_grabs: u64,
    pub errors: u64,
    pub avg_grab_time_us: u64,
}

/// Paced capture thread around a screen source
pub struct ScreenGrabber {
    source: Arc<dyn ScreenSource>,
    interval: Duration,
    listeners: Arc<RwLock<Vec<Arc<dyn GrabberListener>>>>,
    stats: Arc<Mutex<GrabberStats>>,
    disposed: AtomicBool,
    stop: Mutex<Option<Sender<()>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl ScreenGrabber {
    pub fn new(source: Arc<dyn ScreenSource>, snaps_per_second: u32) -> Self {
        Self {
            source,
            interval: Duration::from_secs_f64(1.0 / snaps_per_second.max(1) as f64),
            listeners: Arc::new(RwLock::new(Vec::new())),
            stats: Arc::new(Mutex::new(GrabberStats::default())),
            disposed: AtomicBool::new(false),
            stop: Mutex::new(None),
            thread: Mutex::new(None),
        }
    }

    /// Open the source `settings` describe and pace it at their rate
    pub fn open(settings: &CaptureSettings) -> CaptureResult<Self> {
        let backend = CaptureBackend::open(settings)?;
        Ok(Self::new(Arc::new(backend), settings.snaps_per_second))
    }

    pub fn source(&self) -> &Arc<dyn ScreenSource> {
        &self.source
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn stats(&self) -> GrabberStats {
        self.stats.lock().clone()
    }

    pub fn add_listener(&self, listener: Arc<dyn GrabberListener>) {
        self.listeners.write().push(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn GrabberListener>) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|l| !Arc::ptr_eq(l, listener));
        listeners.len() != before
    }

    pub fn is_running(&self) -> bool {
        self.thread.lock().is_some() && !self.is_disposed()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Start the grab thread. Starting a running grabber is a no-op.
    pub fn start(&self) -> CaptureResult<()> {
        if self.is_disposed() {
            return Err(CaptureError::Disposed);
        }

        let mut thread = self.thread.lock();
        if thread.is_some() {
            return Ok(());
        }

        let (stop_tx, stop_rx) = bounded::<()>(0);
        let worker = GrabLoop {
            source: self.source.clone(),
            interval: self.interval,
            listeners: self.listeners.clone(),
            stats: self.stats.clone(),
            stop: stop_rx,
        };

        let handle = thread::Builder::new()
            .name(format!("screen-grabber-{}", self.source.kind()))
            .spawn(move || worker.run())
            .map_err(|e| CaptureError::Thread(e.to_string()))?;

        *self.stop.lock() = Some(stop_tx);
        *thread = Some(handle);
        info!(
            "Started {} grabber at {:?} per frame",
            self.source.kind(),
            self.interval
        );
        Ok(())
    }

    /// Stop the loop, dispose the source, wait for the thread and notify
    /// listeners. Idempotent.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("Disposing {} grabber", self.source.kind());

        self.stop.lock().take();
        // Unblocks a grab waiting on the source
        self.source.dispose();

        if let Some(handle) = self.thread.lock().take() {
            if handle.thread().id() == thread::current().id() {
                debug!("Grabber disposed from its own thread, not joining");
            } else if handle.join().is_err() {
                error!("Grabber thread panicked");
            }
        }

        notify(&self.listeners, |l| l.on_disposed());
        info!("Grabber disposed, {:?}", self.stats());
    }
}

impl Drop for ScreenGrabber {
    fn drop(&mut self) {
        self.dispose();
    }
}

struct GrabLoop {
    source: Arc<dyn ScreenSource>,
    interval: Duration,
    listeners: Arc<RwLock<Vec<Arc<dyn GrabberListener>>>>,
    stats: Arc<Mutex<GrabberStats>>,
    stop: Receiver<()>,
}

impl GrabLoop {
    fn run(self) {
        let bounds = self.source.bounds();
        notify(&self.listeners, |l| l.on_started(bounds));

        loop {
            let loop_start = Instant::now();

            match self.source.grab_frame() {
                Ok(Some(frame)) => {
                    self.record(loop_start.elapsed(), |s| s.frames_grabbed += 1);
                    notify(&self.listeners, |l| l.on_grabbed(&frame));
                }
                Ok(None) => {
                    if self.source.is_disposed() {
                        break;
                    }
                    self.record(loop_start.elapsed(), |s| s.empty_grabs += 1);
                }
                Err(e) => {
                    self.record(loop_start.elapsed(), |s| s.errors += 1);
                    warn!("Grab error: {}", e);
                    notify(&self.listeners, |l| l.on_error(&e));
                    if matches!(e, CaptureError::StreamEnded | CaptureError::Disposed) {
                        break;
                    }
                }
            }

            // Rate limiting; a closed stop channel ends the wait at once
            let wait = self.interval.saturating_sub(loop_start.elapsed());
            match self.stop.recv_timeout(wait) {
                Err(RecvTimeoutError::Timeout) => {}
                _ => break,
            }
        }

        debug!("Grab loop ended");
    }

    fn record(&self, grab_time: Duration, update: impl FnOnce(&mut GrabberStats)) {
        let mut stats = self.stats.lock();
        update(&mut stats);
        let samples = stats.frames_grabbed + stats.empty_grabs + stats.errors;
        let micros = grab_time.as_micros() as u64;
        // Running average
        stats.avg_grab_time_us = if samples <= 1 {
            micros
        } else {
            (stats.avg_grab_time_us * (samples - 1) + micros) / samples
        };
    }
}

fn notify(
    listeners: &RwLock<Vec<Arc<dyn GrabberListener>>>,
    event: impl Fn(&dyn GrabberListener),
) {
    let snapshot: Vec<_> = listeners.read().iter().cloned().collect();
    for listener in snapshot {
        if catch_unwind(AssertUnwindSafe(|| event(listener.as_ref()))).is_err() {
            error!("Grabber listener panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Point, SourceKind};
    use std::sync::atomic::AtomicU64;

    /// Source producing numbered 2x2 frames without touching the screen
    struct PatternSource {
        disposed: AtomicBool,
        grabs: AtomicU64,
        fail_every: u64,
    }

    impl PatternSource {
        fn new(fail_every: u64) -> Arc<Self> {
            Arc::new(Self {
                disposed: AtomicBool::new(false),
                grabs: AtomicU64::new(0),
                fail_every,
            })
        }
    }

    impl ScreenSource for PatternSource {
        fn kind(&self) -> SourceKind {
            SourceKind::Direct
        }

        fn bounds(&self) -> Rect {
            Rect::new(0, 0, 2, 2)
        }

        fn scale_x(&self) -> f64 {
            1.0
        }

        fn scale_y(&self) -> f64 {
            1.0
        }

        fn grab_frame(&self) -> CaptureResult<Option<Frame>> {
            if self.disposed.load(Ordering::SeqCst) {
                return Ok(None);
            }
            let n = self.grabs.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_every > 0 && n % self.fail_every == 0 {
                return Err(CaptureError::CaptureFailed(format!("grab {}", n)));
            }
            Ok(Some(Frame::new(vec![n as u8; 12], 2, 2, n)))
        }

        fn pointer_position(&self) -> Point {
            self.bounds().far_corner()
        }

        fn is_show_pointer(&self) -> bool {
            false
        }

        fn dispose(&self) {
            self.disposed.store(true, Ordering::SeqCst);
        }

        fn is_disposed(&self) -> bool {
            self.disposed.load(Ordering::SeqCst)
        }
    }

    #[derive(Default)]
    struct Counter {
        started: AtomicU64,
        grabbed: AtomicU64,
        errors: AtomicU64,
        disposed: AtomicU64,
    }

    impl GrabberListener for Counter {
        fn on_started(&self, _bounds: Rect) {
            self.started.fetch_add(1, Ordering::SeqCst);
        }

        fn on_grabbed(&self, frame: &Frame) {
            assert_eq!(frame.len(), 12);
            self.grabbed.fetch_add(1, Ordering::SeqCst);
        }

        fn on_error(&self, _error: &CaptureError) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }

        fn on_disposed(&self) {
            self.disposed.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Panicker;

    impl GrabberListener for Panicker {
        fn on_grabbed(&self, _frame: &Frame) {
            panic!("listener bug");
        }
    }

    fn wait_for(cond: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "timed out");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_grabs_and_disposes() {
        let source = PatternSource::new(0);
        let grabber = ScreenGrabber::new(source.clone(), 60);
        let counter = Arc::new(Counter::default());
        grabber.add_listener(counter.clone());

        grabber.start().unwrap();
        assert!(grabber.is_running());
        wait_for(|| counter.grabbed.load(Ordering::SeqCst) >= 3);

        grabber.dispose();
        grabber.dispose();

        assert!(source.is_disposed());
        assert!(!grabber.is_running());
        assert_eq!(counter.started.load(Ordering::SeqCst), 1);
        assert_eq!(counter.disposed.load(Ordering::SeqCst), 1);
        assert!(grabber.stats().frames_grabbed >= 3);
    }

    #[test]
    fn test_errors_reported_and_loop_continues() {
        let source = PatternSource::new(2);
        let grabber = ScreenGrabber::new(source, 60);
        let counter = Arc::new(Counter::default());
        grabber.add_listener(counter.clone());

        grabber.start().unwrap();
        wait_for(|| {
            counter.errors.load(Ordering::SeqCst) >= 2
                && counter.grabbed.load(Ordering::SeqCst) >= 2
        });
        grabber.dispose();

        let stats = grabber.stats();
        assert!(stats.errors >= 2);
        assert!(stats.frames_grabbed >= 2);
    }

    #[test]
    fn test_panicking_listener_isolated() {
        let grabber = ScreenGrabber::new(PatternSource::new(0), 60);
        let counter = Arc::new(Counter::default());
        grabber.add_listener(Arc::new(Panicker));
        grabber.add_listener(counter.clone());

        grabber.start().unwrap();
        wait_for(|| counter.grabbed.load(Ordering::SeqCst) >= 2);
        grabber.dispose();
    }

    #[test]
    fn test_start_after_dispose_fails() {
        let grabber = ScreenGrabber::new(PatternSource::new(0), 10);
        grabber.dispose();
        assert!(matches!(grabber.start(), Err(CaptureError::Disposed)));
    }

    #[test]
    fn test_dispose_interrupts_slow_pacing() {
        let grabber = ScreenGrabber::new(PatternSource::new(0), 1);
        let counter = Arc::new(Counter::default());
        grabber.add_listener(counter.clone());
        grabber.start().unwrap();
        wait_for(|| counter.grabbed.load(Ordering::SeqCst) >= 1);

        let started = Instant::now();
        grabber.dispose();
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn test_remove_listener() {
        let grabber = ScreenGrabber::new(PatternSource::new(0), 10);
        let counter: Arc<dyn GrabberListener> = Arc::new(Counter::default());
        grabber.add_listener(counter.clone());
        assert!(grabber.remove_listener(&counter));
        assert!(!grabber.remove_listener(&counter));
    }
}
