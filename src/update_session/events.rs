//! Events for the update session state machine.
//!
//! This modules is private and restricted to the
//! [`update_session`](crate::update_session) scope. The public interface of
//! the state machine is provided by [`update_session`](crate::update_session).
//!
//! ```ignore
//! use super::events::*;
//! ```
//!
//! Refer to the [`state_machine`](super::state_machine) module for an overview
//! of states, events and transitions.

use super::context::FailureReason;
use crate::protocol::Frame;

// =============================================================================
// Crate-Public Interface
// =============================================================================

// PrepareChunkEvent ===========================================================

/// Event fired to trigger a transition to the `Preparing` state.
///
/// This event can happen under one of the following circumstances:
///
///  1. While at the `Requesting` state, when the board accepted the update
///     request.
///  2. While at the `Sending` state, when the board acknowledged the chunk
///     that was just sent.
#[derive(Debug)]
pub(crate) struct PrepareChunkEvent {}

// ChunkReadyEvent =============================================================

/// Event fired from the `Preparing` state when the next chunk of the image has
/// been packed into a frame. It triggers a transition to the `Sending` state
/// with a fresh retry counter.
#[derive(Debug)]
pub(crate) struct ChunkReadyEvent {
    /// The `ProgramData` frame carrying the chunk. Moved to the next state.
    pub packet: Frame,
}

// RetransmitEvent =============================================================

/// Event fired from the `Sending` state when the board refused the chunk. The
/// same, unmodified frame is sent again from a new `Sending` state.
#[derive(Debug)]
pub(crate) struct RetransmitEvent {
    pub packet: Frame,
    /// Number of refusals received so far for this chunk.
    pub retry_count: u32,
}

// DoneEvent ===================================================================

/// Event fired when the session completes and is about to terminate. It
/// triggers a transition to the `Done` state.
///
/// This event can happen at any state due to the normal end of the transfer,
/// a cancellation, or a failure of the board or the link.
#[derive(Debug)]
pub(crate) struct DoneEvent {
    pub result: Result<(), FailureReason>,
}

// ExitEvent ===================================================================

/// The last event of a session. It makes the event loop terminate and hand
/// the outcome back to the caller.
#[derive(Debug)]
pub(crate) struct ExitEvent {
    pub result: Result<(), FailureReason>,
}

// Events enum =================================================================

/// Events that can be triggered within the update session state machine.
///
/// Each possible value holds an `event`, which in turn may hold additional data
/// for the state transition. Such data is passed by the origin state for
/// potential use by the target state.
#[derive(Debug)]
pub(crate) enum Event {
    PrepareChunk(PrepareChunkEvent),
    ChunkReady(ChunkReadyEvent),
    Retransmit(RetransmitEvent),
    Done(DoneEvent),
    Exit(ExitEvent),
}

impl Event {
    /// Shorthand for ending the session with `result`.
    pub(crate) fn done(result: Result<(), FailureReason>) -> Self {
        Event::Done(DoneEvent { result })
    }
}
