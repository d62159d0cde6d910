//! Test doubles shared by the integration tests: an in-memory serial link and
//! simulated boards answering on it.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use flashcom::channels::Endpoint;
use flashcom::protocol::{self, Frame, FrameType, HEADER_LEN, HOST_ID};
use flashcom::{FirmwareImage, Link, Settings, SettingsBuilder};

/// How long a read waits for data before timing out, like a serial port
/// opened with a read timeout.
const READ_TIMEOUT: Duration = Duration::from_millis(50);

// -----------------------------------------------------------------------------
// In-memory link
// -----------------------------------------------------------------------------

#[derive(Default)]
struct Pipe {
    bytes: Mutex<VecDeque<u8>>,
    ready: Condvar,
}

/// One end of a full-duplex in-memory byte link.
pub struct MemoryLink {
    incoming: Arc<Pipe>,
    outgoing: Arc<Pipe>,
}

/// Two connected ends: what is written on one is read on the other.
pub fn memory_link() -> (MemoryLink, MemoryLink) {
    let a = Arc::new(Pipe::default());
    let b = Arc::new(Pipe::default());
    (
        MemoryLink {
            incoming: Arc::clone(&a),
            outgoing: Arc::clone(&b),
        },
        MemoryLink {
            incoming: b,
            outgoing: a,
        },
    )
}

impl Read for MemoryLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let bytes = self.incoming.bytes.lock().unwrap();
        let (mut bytes, _) = self
            .incoming
            .ready
            .wait_timeout_while(bytes, READ_TIMEOUT, |bytes| bytes.is_empty())
            .unwrap();
        if bytes.is_empty() {
            return Err(io::ErrorKind::TimedOut.into());
        }
        let n = usize::min(buf.len(), bytes.len());
        for (slot, byte) in buf.iter_mut().zip(bytes.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for MemoryLink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.outgoing.bytes.lock().unwrap().extend(buf.iter());
        self.outgoing.ready.notify_all();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Link for MemoryLink {
    fn bytes_available(&mut self) -> io::Result<usize> {
        Ok(self.incoming.bytes.lock().unwrap().len())
    }
}

/// A link that works for a while, then fails like an unplugged adapter.
pub struct FailingLink {
    inner: MemoryLink,
    polls_left: usize,
}

impl FailingLink {
    pub fn new(inner: MemoryLink, polls_left: usize) -> Self {
        FailingLink { inner, polls_left }
    }
}

impl Read for FailingLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl Write for FailingLink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl Link for FailingLink {
    fn bytes_available(&mut self) -> io::Result<usize> {
        if self.polls_left == 0 {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged"));
        }
        self.polls_left -= 1;
        self.inner.bytes_available()
    }
}

// -----------------------------------------------------------------------------
// Simulated boards
// -----------------------------------------------------------------------------

/// Decides how a board answers a frame; `None` means no answer at all.
pub type Responder = Box<dyn FnMut(&Frame) -> Option<FrameType> + Send>;

pub fn always_ack() -> Responder {
    Box::new(|_| Some(FrameType::Ack))
}

pub fn never_answer() -> Responder {
    Box::new(|_| None)
}

/// Refuse the update request.
pub fn reject_request() -> Responder {
    Box::new(|frame| match frame.frame_type() {
        FrameType::ProgramUpdateRequest => Some(FrameType::Nack),
        _ => Some(FrameType::Ack),
    })
}

/// Refuse the data frame number `chunk` (0-based) `times` times in a row,
/// acknowledge everything else.
pub fn nack_chunk(chunk: usize, times: u32) -> Responder {
    let mut data_frames = 0;
    let mut refused = 0;
    Box::new(move |frame| {
        if frame.frame_type() != FrameType::ProgramData {
            return Some(FrameType::Ack);
        }
        let index = data_frames - refused as usize;
        data_frames += 1;
        if index == chunk && refused < times {
            refused += 1;
            Some(FrameType::Nack)
        } else {
            Some(FrameType::Ack)
        }
    })
}

/// Answer a board's frames from the router's side of its queue pair, until
/// the session closes its queues. Returns every frame received.
pub fn board_on_queues(
    board_id: u8,
    queues: Endpoint<Frame>,
    mut responder: Responder,
) -> JoinHandle<Vec<Frame>> {
    thread::spawn(move || {
        let mut received = Vec::new();
        while let Ok(frame) = queues.rx.recv() {
            let reply = responder(&frame);
            received.push(frame);
            if let Some(reply) = reply {
                if queues.tx.send(Frame::empty(reply, board_id, HOST_ID)).is_err() {
                    break;
                }
            }
        }
        received
    })
}

/// Boards sharing the far end of a [`MemoryLink`]. Every frame seen on the
/// link is recorded in arrival order.
pub struct SimulatedBus {
    stop: Arc<AtomicBool>,
    seen_count: Arc<AtomicUsize>,
    handle: JoinHandle<Vec<Frame>>,
}

impl SimulatedBus {
    pub fn start(mut link: MemoryLink, boards: Vec<(u8, Responder)>) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let seen_count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen_count);
        let handle = thread::spawn(move || {
            let mut boards = boards;
            let mut seen = Vec::new();
            loop {
                // Only stop once the link went quiet, so no frame is missed.
                let frame = match read_frame(&mut link) {
                    Some(frame) => frame,
                    None if stop_flag.load(Ordering::SeqCst) => break,
                    None => continue,
                };
                let reply = boards
                    .iter_mut()
                    .find(|(board_id, _)| *board_id == frame.dest_id())
                    .and_then(|(board_id, responder)| {
                        responder(&frame).map(|reply| Frame::empty(reply, *board_id, HOST_ID))
                    });
                seen.push(frame);
                counter.fetch_add(1, Ordering::SeqCst);
                if let Some(reply) = reply {
                    link.write_all(&reply.encode()).unwrap();
                }
            }
            seen
        });
        SimulatedBus {
            stop,
            seen_count,
            handle,
        }
    }

    /// Number of frames seen on the link so far.
    pub fn frames_seen(&self) -> usize {
        self.seen_count.load(Ordering::SeqCst)
    }

    /// Stop the boards and return the frames they saw.
    pub fn stop(self) -> Vec<Frame> {
        self.stop.store(true, Ordering::SeqCst);
        self.handle.join().unwrap()
    }
}

fn read_frame(link: &mut MemoryLink) -> Option<Frame> {
    let mut header = [0u8; HEADER_LEN];
    link.read_exact(&mut header).ok()?;
    let remaining = protocol::decode_length(&header).expect("host sent a bad header");
    let mut raw = header.to_vec();
    raw.resize(HEADER_LEN + remaining, 0);
    link.read_exact(&mut raw[HEADER_LEN..]).unwrap();
    Some(protocol::decode(&raw).expect("host sent a bad frame"))
}

// -----------------------------------------------------------------------------
// Fixtures
// -----------------------------------------------------------------------------

pub fn test_settings() -> SettingsBuilder {
    SettingsBuilder::new()
        .chunk_size(64)
        .response_timeout(Duration::from_secs(2))
        .show_progress(false)
}

pub fn test_image(size: usize, settings: &Settings) -> FirmwareImage {
    let bytes = (0..size).map(|i| (i * 7 % 256) as u8).collect();
    FirmwareImage::from_bytes(bytes, settings.chunk_size, &settings.hmac_key).unwrap()
}

/// The data frames of `frames`, in order.
pub fn data_frames(frames: &[Frame]) -> Vec<&Frame> {
    frames
        .iter()
        .filter(|frame| frame.frame_type() == FrameType::ProgramData)
        .collect()
}
