//! Raw frame stream from the encoder

use std::net::SocketAddr;
use std::sync::Arc;

use loopback_channel::{ChannelListener, LoopbackReader, ReaderConfig, ReaderState};
use tracing::{debug, info};

use crate::handoff::{FrameConsumer, HandoffCloser, rendezvous};
use crate::{CaptureError, CaptureResult, FrameAssembler, Rect};

/// Loopback listener that turns the encoder's unframed RGB24 byte stream
/// into whole frames, handed over one at a time.
///
/// The reader thread blocks after each completed frame until
/// [`next_frame`](Self::next_frame) takes it, so the encoder is throttled
/// by the consumer instead of frames queueing up.
pub struct EncoderStream {
    reader: LoopbackReader,
    frames: FrameConsumer<Vec<u8>>,
    closer: Arc<HandoffCloser>,
    frame_size: Rect,
}

impl EncoderStream {
    /// Bind and start the reader for frames of `frame_size`
    pub fn open(config: ReaderConfig, frame_size: Rect) -> CaptureResult<Self> {
        let frame_len = frame_size.rgb24_len();
        if frame_len == 0 {
            return Err(CaptureError::InvalidConfig(format!(
                "empty frame size {}",
                frame_size
            )));
        }

        let (producer, frames, closer) = rendezvous::<Vec<u8>>();
        let closer = Arc::new(closer);
        let mut assembler = FrameAssembler::new(frame_len);

        let alive = closer.clone();
        let reader = LoopbackReader::bind(
            config,
            move |chunk: &[u8]| {
                if !assembler.push(chunk, |frame| producer.offer(frame)) {
                    debug!(
                        "Frame handoff closed after {} frames",
                        assembler.completed()
                    );
                }
            },
            move || !alive.is_closed(),
        )?;
        reader.start()?;
        info!(
            "Listening for {} frames on {}",
            frame_size,
            reader.address()
        );

        Ok(Self {
            reader,
            frames,
            closer,
            frame_size,
        })
    }

    /// Where the encoder must connect
    pub fn address(&self) -> SocketAddr {
        self.reader.address()
    }

    pub fn frame_size(&self) -> Rect {
        self.frame_size
    }

    pub fn reader_state(&self) -> ReaderState {
        self.reader.state()
    }

    pub fn add_listener(&self, listener: Arc<dyn ChannelListener>) {
        self.reader.add_listener(listener);
    }

    /// Block until the next complete frame. None once the stream is closed
    /// or the encoder has disconnected.
    pub fn next_frame(&self) -> Option<Vec<u8>> {
        self.frames.take()
    }

    pub fn is_closed(&self) -> bool {
        self.closer.is_closed()
    }

    /// Wake any blocked [`next_frame`](Self::next_frame) and stop the reader.
    /// Idempotent.
    pub fn close(&self) {
        self.closer.close();
        self.reader.dispose();
    }
}

impl Drop for EncoderStream {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for EncoderStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncoderStream")
            .field("address", &self.reader.address())
            .field("frame_size", &self.frame_size)
            .field("state", &self.reader.state())
            .finish()
    }
}
