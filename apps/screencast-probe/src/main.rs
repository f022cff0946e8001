//! Screencast Probe
//!
//! Opens a capture source, grabs frames for a while and reports the
//! achieved rate. Frames are counted and inspected, never stored.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use crossbeam_channel::{Sender, bounded};
use parking_lot::Mutex;
use tracing::{info, warn};

use screencast_capture::{
    CaptureError, CaptureSettings, Frame, GrabberListener, GrabberType, Quality, Rect,
    ScreenGrabber,
};

#[derive(Parser)]
#[command(name = "screencast-probe")]
#[command(about = "Grab screen frames and report capture throughput")]
#[command(version)]
struct Cli {
    /// JSON settings file; flags below override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Capture strategy: auto, direct or ffmpeg
    #[arg(long)]
    grabber: Option<GrabberType>,

    /// Encoder output quality (144p .. 1080p)
    #[arg(long)]
    quality: Option<Quality>,

    /// Requested frames per second
    #[arg(long)]
    fps: Option<u32>,

    /// Composite the pointer into frames
    #[arg(long)]
    show_pointer: bool,

    /// ffmpeg executable
    #[arg(long)]
    ffmpeg: Option<String>,

    /// Stop after this many frames
    #[arg(long, default_value_t = 50)]
    frames: u64,

    /// Stop after this many seconds even if fewer frames arrived
    #[arg(long, default_value_t = 30)]
    seconds: u64,
}

impl Cli {
    fn settings(&self) -> anyhow::Result<CaptureSettings> {
        let mut settings = match &self.config {
            Some(path) => CaptureSettings::from_json_file(path)
                .with_context(|| format!("failed to load settings from {}", path.display()))?,
            None => CaptureSettings::default(),
        };

        if let Some(grabber) = self.grabber {
            settings.grabber = grabber;
        }
        if let Some(quality) = self.quality {
            settings.quality = quality;
        }
        if let Some(fps) = self.fps {
            settings.snaps_per_second = fps;
        }
        if self.show_pointer {
            settings.grab_pointer = true;
        }
        if let Some(ffmpeg) = &self.ffmpeg {
            settings.ffmpeg_path = ffmpeg.clone();
        }

        settings.validate()?;
        Ok(settings)
    }
}

/// Counts frames and signals once the target is reached
struct FrameCounter {
    target: u64,
    frames: AtomicU64,
    errors: AtomicU64,
    geometry: Mutex<Option<(u32, u32)>>,
    /// Arrival of the first and latest frame
    span: Mutex<Option<(Instant, Instant)>>,
    done: Mutex<Option<Sender<()>>>,
}

impl FrameCounter {
    fn new(target: u64, done: Sender<()>) -> Self {
        Self {
            target,
            frames: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            geometry: Mutex::new(None),
            span: Mutex::new(None),
            done: Mutex::new(Some(done)),
        }
    }

    fn finish(&self) {
        if let Some(done) = self.done.lock().take() {
            let _ = done.send(());
        }
    }
}

impl GrabberListener for FrameCounter {
    fn on_started(&self, bounds: Rect) {
        info!("Grabber started, bounds={}", bounds);
    }

    fn on_grabbed(&self, frame: &Frame) {
        let now = Instant::now();
        let mut span = self.span.lock();
        *span = Some(span.map_or((now, now), |(first, _)| (first, now)));
        drop(span);

        let mut geometry = self.geometry.lock();
        match *geometry {
            None => {
                info!(
                    "First frame {}x{}, {} bytes",
                    frame.width,
                    frame.height,
                    frame.len()
                );
                *geometry = Some((frame.width, frame.height));
            }
            Some(size) if size != (frame.width, frame.height) => {
                warn!(
                    "Frame geometry changed from {}x{} to {}x{}",
                    size.0, size.1, frame.width, frame.height
                );
                *geometry = Some((frame.width, frame.height));
            }
            Some(_) => {}
        }
        drop(geometry);

        if self.frames.fetch_add(1, Ordering::SeqCst) + 1 >= self.target {
            self.finish();
        }
    }

    fn on_error(&self, error: &CaptureError) {
        self.errors.fetch_add(1, Ordering::SeqCst);
        if matches!(error, CaptureError::StreamEnded) {
            self.finish();
        }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("screencast_probe=info".parse()?)
                .add_directive("screencast_capture=info".parse()?)
                .add_directive("loopback_channel=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let settings = cli.settings()?;
    info!(
        "Starting Screencast Probe: grabber={:?}, quality={}, {} fps, pointer={}",
        settings.grabber,
        settings.quality.name(),
        settings.snaps_per_second,
        settings.grab_pointer
    );

    let grabber = ScreenGrabber::open(&settings).context("failed to open capture source")?;
    let source = grabber.source().clone();
    info!(
        "Using {} source, bounds={}, scale={}x{}",
        source.kind(),
        source.bounds(),
        source.scale_x(),
        source.scale_y()
    );

    let (done_tx, done_rx) = bounded(1);
    let counter = Arc::new(FrameCounter::new(cli.frames.max(1), done_tx));
    grabber.add_listener(counter.clone());

    let started = Instant::now();
    grabber.start()?;

    if done_rx.recv_timeout(Duration::from_secs(cli.seconds)).is_err() {
        warn!("Stopped after {}s without reaching {} frames", cli.seconds, cli.frames);
    }
    grabber.dispose();

    let frames = counter.frames.load(Ordering::SeqCst);
    let measured = counter
        .span
        .lock()
        .map_or(Duration::ZERO, |(first, last)| last - first);
    let fps = if frames > 1 && !measured.is_zero() {
        (frames - 1) as f64 / measured.as_secs_f64()
    } else {
        0.0
    };

    let stats = grabber.stats();
    info!(
        "Grabbed {} frames in {:.2?} ({:.1} fps, requested {}), {} errors, {} empty, avg grab {}us",
        frames,
        started.elapsed(),
        fps,
        settings.snaps_per_second,
        counter.errors.load(Ordering::SeqCst),
        stats.empty_grabs,
        stats.avg_grab_time_us
    );

    if frames == 0 {
        anyhow::bail!("no frames captured");
    }
    Ok(())
}
