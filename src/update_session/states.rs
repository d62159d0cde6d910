//! States for the update session state machine.
//!
//! This modules is private and restricted to the
//! [`update_session`](crate::update_session) scope. The public interface of
//! the state machine is provided by [`update_session`](crate::update_session).
//!
//! ```ignore
//! use super::states::*;
//! ```
//!
//! Refer to the [`state_machine`](super::state_machine) module for an overview
//! of states, events and transitions.

use console::style;
use log::{debug, info, warn};

use super::context::{FailureReason, Response, SessionContext};
use super::events::*;
use crate::protocol::{Frame, FrameType, UpdateRequest, HOST_ID};

// =============================================================================
// Crate-Public Interface
// =============================================================================

/// Trait adding the ability for a state to be `run` after a transition into it.
pub(crate) trait Runnable {
    /// A state implements this method so it can be `run` after the state
    /// machine transitions into it.
    ///
    /// During this call, the state can do any work that needs to be done and
    /// when finished, requests a transition to a `new state` by returning the
    /// appropriate `event`. The `event` is consumed to create the `new state`
    /// using the corresponding [`From`] trait implementation.
    fn run(&mut self, ctx: &mut SessionContext) -> Event;
}

// Requesting State ============================================================

/// The initial state of a session: announce the update to the board.
///
/// The request carries the protocol version, the number of data frames that
/// will follow and the digest of the whole image. A request is sent once and
/// never retried:
///
///  * **[`PrepareChunkEvent`] => [`PreparingState`]** when the board answers
///    with `Ack`,
///  * **[`DoneEvent`] => [`DoneState`]** when the board answers with `Nack`
///    (the update is rejected), does not answer in time, or the session is
///    cancelled.
#[derive(Debug)]
pub(crate) struct RequestingState {}
impl Runnable for RequestingState {
    fn run(&mut self, ctx: &mut SessionContext) -> Event {
        info!("[{}] => Requesting", ctx.board_id);
        let request = UpdateRequest::new(ctx.image.chunk_count(), *ctx.image.digest());
        let frame = Frame::new(
            FrameType::ProgramUpdateRequest,
            HOST_ID,
            ctx.board_id,
            request.to_bytes().to_vec(),
        );

        match ctx.exchange(frame) {
            Ok(Response::Ack) => Event::PrepareChunk(PrepareChunkEvent {}),
            Ok(Response::Nack) => {
                warn!("[{}] board responded with NACK, update aborted", ctx.board_id);
                Event::done(Err(FailureReason::Rejected))
            }
            Err(reason) => Event::done(Err(reason)),
        }
    }
}

// Preparing State =============================================================

/// A `state` where the chunk at the session's cursor is packed into a
/// `ProgramData` frame, without sending it yet.
///
///  * **[`ChunkReadyEvent`] => [`SendingState`]** when there is still data to
///    send,
///  * **[`DoneEvent`] => [`DoneState`]** with success once the whole image
///    was acknowledged.
#[derive(Debug)]
pub(crate) struct PreparingState {}
impl Runnable for PreparingState {
    fn run(&mut self, ctx: &mut SessionContext) -> Event {
        debug!("[{}] => Preparing (offset {})", ctx.board_id, ctx.cursor.offset());
        match ctx.cursor.current() {
            Some(chunk) => Event::ChunkReady(ChunkReadyEvent {
                packet: Frame::new(FrameType::ProgramData, HOST_ID, ctx.board_id, chunk.to_vec()),
            }),
            None => Event::done(Ok(())),
        }
    }
}

// Sending State ===============================================================

/// A `state` where the prepared chunk is sent and the board's verdict awaited.
/// Only one chunk is ever in flight per board.
///
///  * **[`PrepareChunkEvent`] => [`PreparingState`]** on `Ack`, after moving
///    the cursor past the chunk,
///  * **[`RetransmitEvent`] => [`SendingState`]** on `Nack`, to send the very
///    same frame again,
///  * **[`DoneEvent`] => [`DoneState`]** when the chunk was already sent the
///    maximum number of times, on timeout, or on cancellation.
#[derive(Debug)]
pub(crate) struct SendingState {
    /// The frame to send. Consumed and moved upon a retransmission.
    pub packet: Option<Frame>,
    /// Number of `Nack`s already received for this chunk.
    pub retry_count: u32,
}
impl Runnable for SendingState {
    fn run(&mut self, ctx: &mut SessionContext) -> Event {
        debug!("[{}] => Sending (retry {})", ctx.board_id, self.retry_count);

        if self.retry_count >= ctx.max_retransfers {
            warn!(
                "[{}] chunk at offset {} refused {} times",
                ctx.board_id,
                ctx.cursor.offset(),
                self.retry_count
            );
            return Event::done(Err(FailureReason::RetriesExhausted(self.retry_count)));
        }

        if let Some(packet) = self.packet.take() {
            let response = if self.retry_count > 0 {
                ctx.retransmit(packet.clone())
            } else {
                ctx.exchange(packet.clone())
            };
            return match response {
                Ok(Response::Ack) => {
                    let len = packet.payload().len();
                    ctx.cursor.advance();
                    ctx.stats.bytes_sent += len;
                    ctx.stats.chunks_sent += 1;
                    ctx.progress.inc(len as u64);
                    Event::PrepareChunk(PrepareChunkEvent {})
                }
                Ok(Response::Nack) => {
                    debug!("[{}] chunk refused, sending it again", ctx.board_id);
                    Event::Retransmit(RetransmitEvent {
                        packet,
                        retry_count: self.retry_count + 1,
                    })
                }
                Err(reason) => Event::done(Err(reason)),
            };
        }

        // We should never reach here!
        unreachable!()
    }
}

// Done State ==================================================================

/// Reached when the session completes (normally or abnormally).
///
/// This state goes into a 2-phase execution. During the initial phase, it
/// reports the outcome of the update. It then triggers the [`ExitEvent`] to
/// make the session event loop terminate.
#[derive(Debug, Clone, Copy)]
pub(crate) struct DoneState {
    pub result: Result<(), FailureReason>,
    /// When `true` instructs the session event loop to exit.
    pub should_exit: bool,
}
impl Runnable for DoneState {
    fn run(&mut self, ctx: &mut SessionContext) -> Event {
        info!("[{}] => Done ({:?})", ctx.board_id, self.result);
        let took = ctx.started.elapsed().as_millis();
        let line = match self.result {
            Ok(()) => {
                ctx.progress.finish_with_message("done");
                format!("[FC] ✅ Update finished for board {} (took {} ms)", ctx.board_id, took)
            }
            Err(reason) => {
                ctx.progress.abandon_with_message(format!("{}", style("failed").red()));
                format!(
                    "{}",
                    style(format!(
                        "[FC] 💥 Update failed for board {}: {} (took {} ms)",
                        ctx.board_id, reason, took
                    ))
                    .red()
                )
            }
        };
        if ctx.progress.is_hidden() {
            println!("{}", line);
        } else {
            ctx.progress.println(line);
        }
        Event::Exit(ExitEvent {
            result: self.result,
        })
    }
}
