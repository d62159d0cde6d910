//! The router: multiplexes the single bridge among the board sessions and the
//! CLI channel.
//!
//! Inbound, every raw frame coming from the bridge is decoded and handed to
//! exactly one place:
//!
//! ```text
//!                      .-------------.
//!   bridge ---raw----->|   decode    |--- error ------------> diagnostics
//!                      '-------------'
//!                             |
//!          .------------------+-------------------.
//!          |                  |                   |
//!       CliData        dest == host         dest != host
//!          |                  |                   |
//!          v                  v                   v
//!      CLI sink     source is a board?       diagnostics
//!                      yes /     \ no
//!                         v       v
//!              board session     diagnostics
//! ```
//!
//! Boards answer the host with their own id as source, so frames addressed to
//! the host are routed by their source id.
//!
//! Outbound, every board queue and the CLI queue is visited once per pass, in
//! rotating order, and at most one frame is moved from each to the bridge.
//! Nothing here ever blocks on a single queue.

use std::time::Duration;

use crossbeam_channel::{Receiver, Select, Sender, TryRecvError, TrySendError};
use log::{debug, info, trace, warn};

use crate::channels::{CancelFlag, Endpoint, RawFrame};
use crate::protocol::{self, DecodeError, Frame, FrameType, HOST_ID};

/// Longest time the router sleeps when no queue has anything for it.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Traffic the router could not deliver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// Bytes that are not a valid frame.
    Undecodable { raw: RawFrame, error: DecodeError },
    /// A frame for the host from a board that is not being updated.
    UnknownSource(Frame),
    /// A frame addressed to some other node than the host.
    NotForHost(Frame),
    /// A routable frame whose destination queue is full or closed.
    Undelivered(Frame),
}

struct Route {
    board_id: u8,
    queues: Endpoint<Frame>,
    open: bool,
}

pub struct Router {
    /// `tx` feeds the bridge outbound queue, `rx` drains its inbound queue.
    bridge: Endpoint<RawFrame>,
    bridge_open: bool,
    boards: Vec<Route>,
    cli: Option<Route>,
    diagnostics: Sender<Diagnostic>,
    cancel: CancelFlag,
    next_board: usize,
}

impl Router {
    pub fn new(bridge: Endpoint<RawFrame>, diagnostics: Sender<Diagnostic>, cancel: CancelFlag) -> Self {
        Router {
            bridge,
            bridge_open: true,
            boards: Vec::new(),
            cli: None,
            diagnostics,
            cancel,
            next_board: 0,
        }
    }

    /// Route the traffic of `board_id` through `queues`.
    pub fn with_board(mut self, board_id: u8, queues: Endpoint<Frame>) -> Self {
        self.boards.push(Route {
            board_id,
            queues,
            open: true,
        });
        self
    }

    /// Route `CliData` frames through `queues`.
    pub fn with_cli(mut self, queues: Endpoint<Frame>) -> Self {
        self.cli = Some(Route {
            board_id: HOST_ID,
            queues,
            open: true,
        });
        self
    }

    pub fn run(mut self) {
        info!("=> Router ({} boards)", self.boards.len());
        while !self.cancel.is_cancelled() {
            self.wait_for_traffic();
            self.route_inbound();
            self.drain_outbound();
        }
        info!("<= Router");
    }

    /// Sleep until one of the queues has something to move, or for at most
    /// [`POLL_INTERVAL`]. Closed queues are left out, they would always be
    /// ready.
    fn wait_for_traffic(&self) {
        let mut select = Select::new();
        if self.bridge_open {
            select.recv(&self.bridge.rx);
        }
        if !self.bridge.tx.is_full() {
            for route in self.boards.iter().chain(self.cli.iter()) {
                if route.open {
                    select.recv(&route.queues.rx);
                }
            }
        }
        let _ = select.ready_timeout(POLL_INTERVAL);
    }

    fn route_inbound(&mut self) {
        if !self.bridge_open {
            return;
        }
        match self.bridge.rx.try_recv() {
            Ok(raw) => self.dispatch(raw),
            Err(TryRecvError::Empty) => {}
            Err(TryRecvError::Disconnected) => {
                warn!("bridge inbound queue closed");
                self.bridge_open = false;
            }
        }
    }

    fn dispatch(&mut self, raw: RawFrame) {
        let frame = match protocol::decode(&raw) {
            Ok(frame) => frame,
            Err(error) => {
                warn!("discarding undecodable frame: {}", error);
                self.report(Diagnostic::Undecodable { raw, error });
                return;
            }
        };
        trace!("routing {:?}", frame);

        if frame.frame_type() == FrameType::CliData {
            let delivered = match &self.cli {
                Some(cli) => deliver(cli, frame),
                None => Err(frame),
            };
            if let Err(frame) = delivered {
                self.report(Diagnostic::Undelivered(frame));
            }
            return;
        }

        if frame.dest_id() != HOST_ID {
            warn!(
                "frame from {} to {} is not for the host",
                frame.source_id(),
                frame.dest_id()
            );
            self.report(Diagnostic::NotForHost(frame));
            return;
        }

        let route = self
            .boards
            .iter()
            .find(|route| route.board_id == frame.source_id());
        match route {
            Some(route) => {
                if let Err(frame) = deliver(route, frame) {
                    self.report(Diagnostic::Undelivered(frame));
                }
            }
            None => {
                warn!("got data from unsupported board {}", frame.source_id());
                self.report(Diagnostic::UnknownSource(frame));
            }
        }
    }

    /// Move at most one frame from every board queue, then from the CLI
    /// queue, to the bridge. The board visited first changes on every pass.
    fn drain_outbound(&mut self) {
        let count = self.boards.len();
        for step in 0..count {
            if self.bridge.tx.is_full() {
                trace!("bridge outbound queue full");
                return;
            }
            let route = &mut self.boards[(self.next_board + step) % count];
            forward(route, &self.bridge.tx);
        }
        if count > 0 {
            self.next_board = (self.next_board + 1) % count;
        }

        if let Some(cli) = self.cli.as_mut() {
            if !self.bridge.tx.is_full() {
                forward(cli, &self.bridge.tx);
            }
        }
    }

    fn report(&self, diagnostic: Diagnostic) {
        // Nobody may be listening; diagnostics are best effort.
        let _ = self.diagnostics.try_send(diagnostic);
    }
}

/// Push `frame` to the route's inbound queue without waiting. The frame is
/// handed back when it cannot be queued.
fn deliver(route: &Route, frame: Frame) -> Result<(), Frame> {
    match route.queues.tx.try_send(frame) {
        Ok(()) => Ok(()),
        Err(TrySendError::Full(frame)) => {
            warn!("queue of {} full, frame dropped", route.board_id);
            Err(frame)
        }
        Err(TrySendError::Disconnected(frame)) => {
            debug!("queue of {} closed, frame dropped", route.board_id);
            Err(frame)
        }
    }
}

fn forward(route: &mut Route, bridge: &Sender<RawFrame>) {
    if !route.open {
        return;
    }
    match route.queues.rx.try_recv() {
        Ok(frame) => {
            trace!("forwarding {:?}", frame);
            if bridge.try_send(frame.encode()).is_err() {
                warn!("bridge outbound queue unavailable, frame dropped");
            }
        }
        Err(TryRecvError::Empty) => {}
        Err(TryRecvError::Disconnected) => {
            debug!("outbound queue of {} closed", route.board_id);
            route.open = false;
        }
    }
}

/// Helper for callers that want to watch the diagnostics of a router.
pub fn diagnostics_channel(capacity: usize) -> (Sender<Diagnostic>, Receiver<Diagnostic>) {
    crossbeam_channel::bounded(capacity)
}

// =============================================================================
// Unit Tests
// =============================================================================
