//! The transport bridge: sole owner of the physical serial link.
//!
//! The bridge cuts the incoming byte stream into raw frames using only the
//! length announced in each frame header, and writes outgoing raw frames to
//! the link one at a time. It never looks at what the frames mean.
//!
//! Reliability is not its job: a frame that cannot be queued, or that is cut
//! short by a read timeout, is dropped and the update sessions recover through
//! their own timeouts. Any other link error stops the bridge and cancels every
//! unit depending on it.

use std::io::{self, Read, Write};
use std::time::Duration;

use crossbeam_channel::{RecvTimeoutError, SendTimeoutError};
use hexplay::HexViewBuilder;
use log::{debug, error, info, log_enabled, trace, warn, Level::Trace};

use crate::channels::{CancelFlag, CancelGroup, Endpoint, RawFrame};
use crate::protocol::{self, HEADER_LEN};

/// How long the bridge tries to hand a received frame to the router.
const INBOUND_PUT_TIMEOUT: Duration = Duration::from_millis(100);

/// How long the bridge waits for an outgoing frame before polling the link
/// again.
const OUTBOUND_POLL: Duration = Duration::from_millis(2);

/// A byte link the bridge can serve, typically a serial port.
pub trait Link: Read + Write + Send {
    /// Number of received bytes that can be read without blocking.
    fn bytes_available(&mut self) -> io::Result<usize>;
}

pub struct TransportBridge<L: Link> {
    link: L,
    /// `tx` carries received frames to the router, `rx` the frames to write.
    queues: Endpoint<RawFrame>,
    cancel: CancelFlag,
    /// Cancelled when the link fails.
    dependents: CancelGroup,
}

impl<L: Link> TransportBridge<L> {
    pub fn new(
        link: L,
        queues: Endpoint<RawFrame>,
        cancel: CancelFlag,
        dependents: CancelGroup,
    ) -> Self {
        TransportBridge {
            link,
            queues,
            cancel,
            dependents,
        }
    }

    /// Serve the link until cancelled or until it fails. The link is closed
    /// when this returns.
    pub fn run(mut self) -> io::Result<()> {
        info!("=> Bridge");
        let result = self.serve();
        if let Err(ref e) = result {
            error!("serial link failure: {}", e);
            self.dependents.cancel_all();
        }
        info!("<= Bridge");
        result
    }

    fn serve(&mut self) -> io::Result<()> {
        while !self.cancel.is_cancelled() {
            if !self.queues.tx.is_full() && self.link.bytes_available()? >= HEADER_LEN {
                self.receive_frame()?;
            }

            match self.queues.rx.recv_timeout(OUTBOUND_POLL) {
                Ok(raw) => self.transmit_frame(&raw)?,
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    debug!("outbound queue closed, stopping the bridge");
                    break;
                }
            }
        }
        Ok(())
    }

    fn receive_frame(&mut self) -> io::Result<()> {
        let mut header = [0u8; HEADER_LEN];
        if !read_or_drop(&mut self.link, &mut header)? {
            return Ok(());
        }

        let remaining = match protocol::decode_length(&header) {
            Some(remaining) => remaining,
            None => {
                warn!("discarding invalid frame header {:02x?}", header);
                return Ok(());
            }
        };

        let mut raw = vec![0u8; HEADER_LEN + remaining];
        raw[..HEADER_LEN].copy_from_slice(&header);
        if !read_or_drop(&mut self.link, &mut raw[HEADER_LEN..])? {
            return Ok(());
        }
        dump("<-", &raw);

        match self.queues.tx.send_timeout(raw, INBOUND_PUT_TIMEOUT) {
            Ok(()) => {}
            Err(SendTimeoutError::Timeout(_)) => warn!("inbound queue full, frame dropped"),
            Err(SendTimeoutError::Disconnected(_)) => debug!("router gone, frame dropped"),
        }
        Ok(())
    }

    fn transmit_frame(&mut self, raw: &[u8]) -> io::Result<()> {
        dump("->", raw);
        self.link.write_all(raw)?;
        self.link.flush()
    }
}

/// Fill `buf` from the link. Returns `Ok(false)` when the link went quiet
/// before the buffer was complete, in which case the partial data is lost.
fn read_or_drop<L: Link>(link: &mut L, buf: &mut [u8]) -> io::Result<bool> {
    match link.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if is_transient(&e) => {
            warn!("partial frame dropped: {}", e);
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

fn dump(direction: &str, raw: &[u8]) {
    trace!("{} {} bytes", direction, raw.len());
    if log_enabled!(Trace) {
        let view = HexViewBuilder::new(raw)
            .address_offset(0)
            .row_width(16)
            .finish();
        trace!("\n{}", view);
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
