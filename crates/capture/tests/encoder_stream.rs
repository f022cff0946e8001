//! Encoder stream behavior against a real loopback producer

use std::io::Write;
use std::net::TcpStream;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use loopback_channel::{ChannelInfo, ChannelListener, ReaderConfig};
use screencast_capture::{CaptureError, EncoderStream, Rect};

const FRAME_SIZE: Rect = Rect {
    x: 0,
    y: 0,
    width: 4,
    height: 2,
};
const FRAME_LEN: usize = 4 * 2 * 3;

fn config(timeout: Duration) -> ReaderConfig {
    ReaderConfig {
        name: "encoder-stream-test".to_string(),
        data_flow_timeout: timeout,
        buffer_size: 7,
        poll_interval: Duration::from_millis(10),
    }
}

fn frame(tag: u8) -> Vec<u8> {
    (0..FRAME_LEN as u8).map(|i| i.wrapping_mul(tag)).collect()
}

#[test]
fn test_frames_reassembled_across_odd_writes() {
    let stream = EncoderStream::open(config(Duration::from_secs(5)), FRAME_SIZE).unwrap();
    let address = stream.address();

    let expected: Vec<Vec<u8>> = (1..=4).map(frame).collect();
    let payload: Vec<u8> = expected.concat();

    let producer = thread::spawn(move || {
        let mut socket = TcpStream::connect(address).unwrap();
        for chunk in payload.chunks(5) {
            socket.write_all(chunk).unwrap();
            socket.flush().unwrap();
        }
    });

    let received: Vec<Vec<u8>> = (0..4).filter_map(|_| stream.next_frame()).collect();
    producer.join().unwrap();

    assert_eq!(received, expected);
    stream.close();
}

#[test]
fn test_end_of_stream_ends_frames() {
    let stream = EncoderStream::open(config(Duration::from_secs(5)), FRAME_SIZE).unwrap();
    let address = stream.address();

    thread::spawn(move || {
        let mut socket = TcpStream::connect(address).unwrap();
        socket.write_all(&frame(3)).unwrap();
        // Half a frame, then disconnect
        socket.write_all(&frame(5)[..FRAME_LEN / 2]).unwrap();
    });

    assert_eq!(stream.next_frame(), Some(frame(3)));
    assert_eq!(stream.next_frame(), None);
}

#[test]
fn test_close_unblocks_pending_frame() {
    let stream = Arc::new(EncoderStream::open(config(Duration::from_secs(5)), FRAME_SIZE).unwrap());
    let _socket = TcpStream::connect(stream.address()).unwrap();

    let waiter = {
        let stream = stream.clone();
        thread::spawn(move || stream.next_frame())
    };

    thread::sleep(Duration::from_millis(100));
    let started = Instant::now();
    stream.close();

    assert_eq!(waiter.join().unwrap(), None);
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(stream.is_closed());
}

#[test]
fn test_close_releases_blocked_producer() {
    let stream = EncoderStream::open(config(Duration::from_secs(5)), FRAME_SIZE).unwrap();
    let mut socket = TcpStream::connect(stream.address()).unwrap();

    // Nobody takes these, so the reader thread parks on the handoff
    socket.write_all(&[frame(1), frame(2), frame(3)].concat()).unwrap();
    thread::sleep(Duration::from_millis(100));

    let started = Instant::now();
    stream.close();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(stream.next_frame(), None);
}

#[derive(Default)]
struct StallCounter {
    stalls: AtomicU32,
}

impl ChannelListener for StallCounter {
    fn on_data_flow_timeout(&self, _source: &ChannelInfo, _timeout: Duration) {
        self.stalls.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_stall_reported_then_frames_resume() {
    let stream = EncoderStream::open(config(Duration::from_millis(100)), FRAME_SIZE).unwrap();
    let counter = Arc::new(StallCounter::default());
    stream.add_listener(counter.clone());
    let address = stream.address();

    let producer = thread::spawn(move || {
        let mut socket = TcpStream::connect(address).unwrap();
        socket.write_all(&frame(7)[..10]).unwrap();
        thread::sleep(Duration::from_millis(400));
        socket.write_all(&frame(7)[10..]).unwrap();
    });

    assert_eq!(stream.next_frame(), Some(frame(7)));
    producer.join().unwrap();
    assert!(counter.stalls.load(Ordering::SeqCst) >= 1);
}

#[test]
fn test_empty_frame_size_rejected() {
    let result = EncoderStream::open(config(Duration::from_secs(1)), Rect::new(0, 0, 0, 10));
    assert!(matches!(result, Err(CaptureError::InvalidConfig(_))));
}
