//! Single-connection loopback TCP reader

use std::io::{self, ErrorKind, Read};
use std::net::{Ipv4Addr, Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use crossbeam_channel::bounded;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::{
    ChannelError, ChannelInfo, ChannelListener, ChannelResult, DEFAULT_BUFFER_SIZE, ListenerSet,
};

/// Receives every non-empty read. The slice borrows the reader's scratch
/// buffer, which is overwritten by the next read.
pub type DataConsumer = Box<dyn FnMut(&[u8]) + Send>;

/// External liveness check; the read loop stops once it reports false
pub type LivenessCheck = Box<dyn Fn() -> bool + Send + Sync>;

/// Reader configuration
#[derive(Debug, Clone)]
pub struct ReaderConfig {
    /// Name used for logging and the I/O thread
    pub name: String,
    /// Gap without data after which listeners get a timeout notification
    pub data_flow_timeout: Duration,
    /// Size of the reused scratch read buffer
    pub buffer_size: usize,
    /// How often the I/O thread re-checks closure, liveness and the stall window
    pub poll_interval: Duration,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            name: "loopback-reader".to_string(),
            data_flow_timeout: Duration::from_secs(2),
            buffer_size: DEFAULT_BUFFER_SIZE,
            poll_interval: Duration::from_millis(50),
        }
    }
}

/// Reader lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReaderState {
    /// Socket bound, I/O thread not started
    Created = 0,
    /// I/O thread running, waiting for the producer to connect
    Listening = 1,
    /// Producer connected, streaming
    Connected = 2,
    /// Loop ended normally (end of stream, liveness lost or disposal)
    Closed = 3,
    /// Loop ended on an I/O error
    Failed = 4,
}

impl ReaderState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Created,
            1 => Self::Listening,
            2 => Self::Connected,
            3 => Self::Closed,
            _ => Self::Failed,
        }
    }
}

struct Shared {
    info: ChannelInfo,
    config: ReaderConfig,
    closed: AtomicBool,
    state: AtomicU8,
    listener: Mutex<Option<TcpListener>>,
    connection: Mutex<Option<TcpStream>>,
    listeners: ListenerSet,
    liveness: LivenessCheck,
    io_thread: OnceLock<ThreadId>,
}

impl Shared {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn should_run(&self) -> bool {
        !self.is_closed() && (self.liveness)()
    }

    fn set_state(&self, state: ReaderState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    fn on_io_thread(&self) -> bool {
        self.io_thread.get() == Some(&thread::current().id())
    }
}

/// Localhost TCP reader accepting exactly one producer connection
pub struct LoopbackReader {
    shared: Arc<Shared>,
    consumer: Mutex<Option<DataConsumer>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl LoopbackReader {
    /// Bind an ephemeral localhost port. The address is valid immediately,
    /// connections are accepted once [`start`](Self::start) returns.
    pub fn bind<C, L>(config: ReaderConfig, consumer: C, liveness: L) -> ChannelResult<Self>
    where
        C: FnMut(&[u8]) + Send + 'static,
        L: Fn() -> bool + Send + Sync + 'static,
    {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).map_err(ChannelError::Bind)?;
        listener.set_nonblocking(true).map_err(ChannelError::Bind)?;
        let address = listener.local_addr().map_err(ChannelError::Bind)?;

        let info = ChannelInfo {
            name: config.name.clone(),
            address,
        };
        debug!("Bound loopback reader {}", info);

        Ok(Self {
            shared: Arc::new(Shared {
                info,
                config,
                closed: AtomicBool::new(false),
                state: AtomicU8::new(ReaderState::Created as u8),
                listener: Mutex::new(Some(listener)),
                connection: Mutex::new(None),
                listeners: ListenerSet::new(),
                liveness: Box::new(liveness),
                io_thread: OnceLock::new(),
            }),
            consumer: Mutex::new(Some(Box::new(consumer))),
            thread: Mutex::new(None),
        })
    }

    /// Listening address to hand to the producer
    pub fn address(&self) -> SocketAddr {
        self.shared.info.address
    }

    pub fn info(&self) -> &ChannelInfo {
        &self.shared.info
    }

    pub fn state(&self) -> ReaderState {
        ReaderState::from_u8(self.shared.state.load(Ordering::SeqCst))
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.is_closed()
    }

    pub fn add_listener(&self, listener: Arc<dyn ChannelListener>) {
        self.shared.listeners.add(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn ChannelListener>) -> bool {
        self.shared.listeners.remove(listener)
    }

    /// Spawn the I/O thread and block until it is running
    pub fn start(&self) -> ChannelResult<()> {
        if self.shared.is_closed() {
            return Err(ChannelError::Disposed);
        }
        let consumer = self
            .consumer
            .lock()
            .take()
            .ok_or(ChannelError::AlreadyStarted)?;

        info!("Starting loopback reader {}", self.shared.info);

        let (ready_tx, ready_rx) = bounded::<()>(1);
        let shared = self.shared.clone();
        let handle = thread::Builder::new()
            .name(format!(
                "{}-{}",
                self.shared.config.name,
                self.shared.info.address.port()
            ))
            .spawn(move || {
                let _ = shared.io_thread.set(thread::current().id());
                shared.set_state(ReaderState::Listening);
                let _ = ready_tx.send(());
                run(shared, consumer);
            })
            .map_err(ChannelError::Spawn)?;

        *self.thread.lock() = Some(handle);

        ready_rx.recv().map_err(|_| ChannelError::NotReady)
    }

    /// Stop the reader and wait for the I/O thread to finish. Idempotent;
    /// every caller returns only once the I/O thread has been joined.
    pub fn dispose(&self) {
        if !self.shared.closed.swap(true, Ordering::SeqCst) {
            info!("Disposing loopback reader {}", self.shared.info);

            if self.shared.listener.lock().take().is_some() {
                debug!("Closed listening socket of {}", self.shared.info);
            }

            if let Some(stream) = self.shared.connection.lock().take() {
                if let Err(e) = stream.shutdown(Shutdown::Read) {
                    debug!("Shutdown of {} input failed: {}", self.shared.info, e);
                }
                drop(stream);
            }
        }

        if self.shared.on_io_thread() {
            // The loop observes `closed` once the callback returns
            debug!("Dispose called from I/O thread of {}", self.shared.info);
            return;
        }

        // Held across the join so concurrent callers wait for it too
        let mut thread = self.thread.lock();
        match thread.take() {
            Some(handle) => {
                if handle.join().is_err() {
                    error!("I/O thread of {} panicked", self.shared.info);
                }
            }
            None => {
                // Never started
                let _ = self.shared.state.compare_exchange(
                    ReaderState::Created as u8,
                    ReaderState::Closed as u8,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                );
            }
        }
    }
}

impl Drop for LoopbackReader {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for LoopbackReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackReader")
            .field("info", &self.shared.info)
            .field("state", &self.state())
            .finish()
    }
}

fn run(shared: Arc<Shared>, mut consumer: DataConsumer) {
    info!("Reader {} waiting for connection", shared.info);

    let outcome = match accept(&shared) {
        Ok(Some(stream)) => read_loop(&shared, stream, &mut consumer),
        Ok(None) => Ok(()),
        Err(e) => Err(e),
    };

    let final_state = match outcome {
        Ok(()) => ReaderState::Closed,
        Err(e) if shared.is_closed() => {
            debug!("Ignoring I/O error of disposed reader {}: {}", shared.info, e);
            ReaderState::Closed
        }
        Err(e) => {
            error!("Reader {} I/O error: {}", shared.info, e);
            ReaderState::Failed
        }
    };

    shared.listener.lock().take();
    if let Some(stream) = shared.connection.lock().take() {
        let _ = stream.shutdown(Shutdown::Both);
    }
    shared.set_state(final_state);

    info!("Reader {} completed ({:?})", shared.info, final_state);
    shared.listeners.notify_completed(&shared.info);
}

fn accept(shared: &Shared) -> io::Result<Option<TcpStream>> {
    let poll = shared.config.poll_interval.max(Duration::from_millis(1));

    loop {
        if !shared.should_run() {
            return Ok(None);
        }

        let result = match shared.listener.lock().as_ref() {
            Some(listener) => listener.accept(),
            None => return Ok(None),
        };

        match result {
            Ok((stream, peer)) => {
                info!("Reader {} accepted connection from {}", shared.info, peer);
                // Exactly one producer per reader
                shared.listener.lock().take();

                stream.set_nonblocking(false)?;
                stream.set_read_timeout(Some(poll))?;
                *shared.connection.lock() = Some(stream.try_clone()?);

                if shared.is_closed() {
                    return Ok(None);
                }
                shared.set_state(ReaderState::Connected);
                return Ok(Some(stream));
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(poll),
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
}

fn read_loop(shared: &Shared, mut stream: TcpStream, consumer: &mut DataConsumer) -> io::Result<()> {
    let timeout = shared.config.data_flow_timeout;
    let mut buffer = vec![0u8; shared.config.buffer_size.max(1)];
    let mut last_data = Instant::now();

    while shared.should_run() {
        match stream.read(&mut buffer) {
            Ok(0) => {
                debug!("Reader {} reached end of stream", shared.info);
                break;
            }
            Ok(read) => {
                if shared.is_closed() {
                    break;
                }
                consumer(&buffer[..read]);
                last_data = Instant::now();
            }
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                if !timeout.is_zero() && last_data.elapsed() >= timeout {
                    warn!("Reader {} received no data for {:?}", shared.info, timeout);
                    shared.listeners.notify_data_flow_timeout(&shared.info, timeout);
                    last_data = Instant::now();
                }
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::atomic::AtomicUsize;

    fn quick_config() -> ReaderConfig {
        ReaderConfig {
            name: "test-reader".to_string(),
            data_flow_timeout: Duration::from_secs(5),
            buffer_size: 16,
            poll_interval: Duration::from_millis(10),
        }
    }

    #[test]
    fn test_bind_is_localhost_ephemeral() {
        let reader = LoopbackReader::bind(quick_config(), |_| {}, || true).unwrap();
        assert!(reader.address().ip().is_loopback());
        assert_ne!(reader.address().port(), 0);
        assert_eq!(reader.state(), ReaderState::Created);
    }

    #[test]
    fn test_start_twice_fails() {
        let reader = LoopbackReader::bind(quick_config(), |_| {}, || true).unwrap();
        reader.start().unwrap();
        assert_eq!(reader.state(), ReaderState::Listening);
        assert!(matches!(reader.start(), Err(ChannelError::AlreadyStarted)));
        reader.dispose();
    }

    #[test]
    fn test_start_after_dispose_fails() {
        let reader = LoopbackReader::bind(quick_config(), |_| {}, || true).unwrap();
        reader.dispose();
        assert!(matches!(reader.start(), Err(ChannelError::Disposed)));
        assert_eq!(reader.state(), ReaderState::Closed);
    }

    #[test]
    fn test_reads_are_delivered_in_order() {
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        let reader = LoopbackReader::bind(
            quick_config(),
            move |data: &[u8]| sink.lock().extend_from_slice(data),
            || true,
        )
        .unwrap();
        reader.start().unwrap();

        let payload: Vec<u8> = (0..200u8).collect();
        let mut client = TcpStream::connect(reader.address()).unwrap();
        client.write_all(&payload).unwrap();
        drop(client);

        let deadline = Instant::now() + Duration::from_secs(5);
        while reader.state() != ReaderState::Closed && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }

        assert_eq!(reader.state(), ReaderState::Closed);
        assert_eq!(*received.lock(), payload);
    }

    #[test]
    fn test_liveness_stops_loop() {
        let alive = Arc::new(AtomicBool::new(true));
        let flag = alive.clone();
        let reads = Arc::new(AtomicUsize::new(0));
        let counter = reads.clone();
        let reader = LoopbackReader::bind(
            quick_config(),
            move |_: &[u8]| {
                counter.fetch_add(1, Ordering::SeqCst);
            },
            move || flag.load(Ordering::SeqCst),
        )
        .unwrap();
        reader.start().unwrap();

        let _client = TcpStream::connect(reader.address()).unwrap();
        alive.store(false, Ordering::SeqCst);

        let deadline = Instant::now() + Duration::from_secs(5);
        while reader.state() != ReaderState::Closed && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(reader.state(), ReaderState::Closed);
        assert_eq!(reads.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_dispose_while_waiting_for_connection() {
        let reader = LoopbackReader::bind(quick_config(), |_| {}, || true).unwrap();
        reader.start().unwrap();
        let address = reader.address();

        reader.dispose();

        assert!(reader.is_disposed());
        assert_eq!(reader.state(), ReaderState::Closed);
        assert!(TcpStream::connect(address).is_err());
    }
}
