//! Update session state machine.
//!
//! A session pushes the firmware image to one board using a stop-and-wait
//! protocol: at most one frame is waiting for the board's answer at any time.
//!
//! The following state diagram summarizes the different states and
//! transitions a session goes through:
//!
//! ```text
//!                  START
//!                    |
//!                    v
//!             .------------.   Nack / timeout
//!             | Requesting |--------------------.
//!             '------------'                    |
//!                    | Ack                      |
//!                    v                          |
//!             .------------.   no more data     |
//!     .------>| Preparing  |----------------.   |
//!     |       '------------'                |   |
//!     |              | chunk ready          |   |
//!     |              v                      v   v
//!     |  Ack  .------------.  timeout /  .---------.
//!     '-------|  Sending   |------------>|  Done   |
//!             '------------'  retries    '---------'
//!               |        ^    exhausted       |
//!               '--------'                    v
//!                  Nack                      END
//! ```
//!
//! Cancellation is checked on entry to every state and while waiting for the
//! board; it ends the session through the `Done` state like any failure.

use std::time::{Duration, Instant};

use indicatif::ProgressBar;

use super::context::{FailureReason, SessionContext};
use super::events::*;
use super::states::*;
use crate::channels::{CancelFlag, Endpoint};
use crate::firmware::FirmwareImage;
use crate::protocol::Frame;
use crate::settings::Settings;

// =============================================================================
// Public Interface
// =============================================================================

/// What a finished session reports back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateOutcome {
    pub board_id: u8,
    pub result: Result<(), FailureReason>,
    pub elapsed: Duration,
    pub bytes_sent: usize,
    pub chunks_sent: u32,
    pub retransmissions: u32,
}

impl UpdateOutcome {
    pub fn success(&self) -> bool {
        self.result.is_ok()
    }

    /// Outcome of a session that never got to report, e.g. because its thread
    /// panicked.
    pub(crate) fn aborted(board_id: u8) -> Self {
        UpdateOutcome {
            board_id,
            result: Err(FailureReason::Aborted),
            elapsed: Duration::default(),
            bytes_sent: 0,
            chunks_sent: 0,
            retransmissions: 0,
        }
    }
}

/// The update of one board. Build it with `new()`, then consume it with
/// `run()`, typically on its own thread.
pub struct UpdateSession {
    ctx: SessionContext,
    sm: SessionStates,
}

impl UpdateSession {
    /// A session updating `board_id` with `image`. The session talks to the
    /// board only through `queues` and stops early when `cancel` is set.
    pub fn new(
        board_id: u8,
        image: &FirmwareImage,
        settings: &Settings,
        queues: Endpoint<Frame>,
        cancel: CancelFlag,
    ) -> Self {
        UpdateSession {
            ctx: SessionContext::new(board_id, image, settings, queues, cancel),
            // The session naturally starts in the `Requesting` state.
            sm: SessionStates::Requesting(RequestingState {}),
        }
    }

    /// Report the transfer progress on `progress`, which should be sized to
    /// the image.
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.ctx.progress = progress;
        self
    }

    pub fn board_id(&self) -> u8 {
        self.ctx.board_id
    }

    /// The session event loop runs until the `Done` state is reached and its
    /// `should_exit` flag is set. The board's queues are released when this
    /// returns.
    pub fn run(mut self) -> UpdateOutcome {
        self.ctx.started = Instant::now();
        loop {
            self.sm = self.sm.step(&mut self.ctx);
            if let SessionStates::Done(state) = &self.sm {
                if state.should_exit {
                    return UpdateOutcome {
                        board_id: self.ctx.board_id,
                        result: state.result,
                        elapsed: self.ctx.started.elapsed(),
                        bytes_sent: self.ctx.stats.bytes_sent,
                        chunks_sent: self.ctx.stats.chunks_sent,
                        retransmissions: self.ctx.stats.retransmissions,
                    };
                }
            }
        }
    }
}

// =============================================================================
// Private stuff
// =============================================================================

/// Wraps the states of the session into a simple enum, which can also be used
/// for pattern matching during state transitions.
#[derive(Debug)]
enum SessionStates {
    Requesting(RequestingState),
    Preparing(PreparingState),
    Sending(SendingState),
    Done(DoneState),
}
impl SessionStates {
    /// The unit of work in the session event loop. It runs the current state,
    /// then turns the event it fired into the next state using the `From`
    /// implementations below. A cancelled session skips straight to `Done`.
    fn step(&mut self, ctx: &mut SessionContext) -> Self {
        if ctx.cancel.is_cancelled() && !matches!(self, SessionStates::Done(_)) {
            return SessionStates::Done(
                DoneEvent {
                    result: Err(FailureReason::Cancelled),
                }
                .into(),
            );
        }

        match self {
            SessionStates::Requesting(state) => {
                let event = state.run(ctx);
                match event {
                    Event::PrepareChunk(ev) => SessionStates::Preparing(ev.into()),
                    Event::Done(ev) => SessionStates::Done(ev.into()),
                    _ => unreachable!("illegal event {:#?} at current state {:#?}", event, state),
                }
            }
            SessionStates::Preparing(state) => {
                let event = state.run(ctx);
                match event {
                    Event::ChunkReady(ev) => SessionStates::Sending(ev.into()),
                    Event::Done(ev) => SessionStates::Done(ev.into()),
                    _ => unreachable!("illegal event {:#?} at current state {:#?}", event, state),
                }
            }
            SessionStates::Sending(state) => {
                let event = state.run(ctx);
                match event {
                    Event::PrepareChunk(ev) => SessionStates::Preparing(ev.into()),
                    Event::Retransmit(ev) => SessionStates::Sending(ev.into()),
                    Event::Done(ev) => SessionStates::Done(ev.into()),
                    _ => unreachable!("illegal event {:#?} at current state {:#?}", event, state),
                }
            }
            SessionStates::Done(state) => {
                let event = state.run(ctx);
                match event {
                    Event::Exit(ev) => SessionStates::Done(ev.into()),
                    _ => unreachable!("illegal event {:#?} at current state {:#?}", event, state),
                }
            }
        }
    }
}

// -----------------------------------------------------------------------------
// State from Event transitions
// -----------------------------------------------------------------------------

impl From<PrepareChunkEvent> for PreparingState {
    fn from(_event: PrepareChunkEvent) -> PreparingState {
        PreparingState {}
    }
}

impl From<ChunkReadyEvent> for SendingState {
    fn from(event: ChunkReadyEvent) -> SendingState {
        // A freshly prepared chunk starts with a clean retry counter.
        SendingState {
            packet: Some(event.packet),
            retry_count: 0,
        }
    }
}

impl From<RetransmitEvent> for SendingState {
    fn from(event: RetransmitEvent) -> SendingState {
        SendingState {
            packet: Some(event.packet),
            retry_count: event.retry_count,
        }
    }
}

impl From<DoneEvent> for DoneState {
    fn from(event: DoneEvent) -> DoneState {
        DoneState {
            result: event.result,
            should_exit: false,
        }
    }
}
impl From<ExitEvent> for DoneState {
    fn from(event: ExitEvent) -> DoneState {
        DoneState {
            result: event.result,
            should_exit: true,
        }
    }
}
