//! Reassembles an unframed byte stream into fixed-size frames

/// Accumulates arbitrarily sized chunks into frames of `frame_len` bytes.
///
/// Owned by the thread reading the stream; completed frames leave it only
/// as copies passed to the `emit` callback of [`push`](Self::push).
#[derive(Debug)]
pub struct FrameAssembler {
    buffer: Vec<u8>,
    cursor: usize,
    completed: u64,
}

impl FrameAssembler {
    pub fn new(frame_len: usize) -> Self {
        Self {
            buffer: vec![0; frame_len],
            cursor: 0,
            completed: 0,
        }
    }

    pub fn frame_len(&self) -> usize {
        self.buffer.len()
    }

    /// Bytes of the current partial frame
    pub fn pending(&self) -> usize {
        self.cursor
    }

    /// Frames completed so far
    pub fn completed(&self) -> u64 {
        self.completed
    }

    /// Append a chunk. Every frame boundary crossed hands a copy of the
    /// finished frame to `emit`; bytes past the boundary start the next frame.
    ///
    /// Returns false as soon as `emit` does, discarding the rest of the chunk.
    pub fn push(&mut self, mut chunk: &[u8], mut emit: impl FnMut(Vec<u8>) -> bool) -> bool {
        let frame_len = self.buffer.len();
        if frame_len == 0 {
            return true;
        }

        while !chunk.is_empty() {
            let take = chunk.len().min(frame_len - self.cursor);
            self.buffer[self.cursor..self.cursor + take].copy_from_slice(&chunk[..take]);
            self.cursor += take;
            chunk = &chunk[take..];

            if self.cursor == frame_len {
                self.cursor = 0;
                self.completed += 1;
                if !emit(self.buffer.clone()) {
                    return false;
                }
            }
        }
        true
    }
}
