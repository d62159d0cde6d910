//! Data shared by all the states of an update session, and the two blocking
//! operations every state relies on: sending one frame and waiting for the
//! board's answer.
//!
//! Both operations are built from short bounded queue waits, so that the
//! session's cancellation flag is observed promptly even while the overall
//! response deadline is long.

use std::time::{Duration, Instant};

use crossbeam_channel::{RecvTimeoutError, SendTimeoutError, TryRecvError};
use indicatif::ProgressBar;
use log::{debug, trace, warn};
use thiserror::Error;

use crate::channels::{CancelFlag, Endpoint};
use crate::firmware::{ChunkCursor, FirmwareImage};
use crate::protocol::{Frame, FrameType};
use crate::settings::Settings;

/// Granularity at which a waiting session checks its cancellation flag.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

// =============================================================================
// Crate-Public Interface
// =============================================================================

/// Why an update session ended without updating its board.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    #[error("board rejected the update request")]
    Rejected,
    #[error("board did not respond in time")]
    Timeout,
    #[error("chunk not accepted after {0} transmissions")]
    RetriesExhausted(u32),
    #[error("board reported a fatal error")]
    BoardFault,
    #[error("update cancelled")]
    Cancelled,
    #[error("connection to the router lost")]
    Disconnected,
    #[error("update session crashed")]
    Aborted,
}

/// What came back from the board for the last frame sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Response {
    Ack,
    Nack,
}

#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct SessionStats {
    pub bytes_sent: usize,
    pub chunks_sent: u32,
    pub retransmissions: u32,
}

/// Everything a session state may use or update, moved along from one state
/// to the next.
pub(crate) struct SessionContext {
    pub board_id: u8,
    pub image: FirmwareImage,
    pub cursor: ChunkCursor,
    pub response_timeout: Duration,
    pub max_retransfers: u32,
    /// `tx` carries frames to the board, `rx` the board's responses.
    pub queues: Endpoint<Frame>,
    pub cancel: CancelFlag,
    pub progress: ProgressBar,
    pub started: Instant,
    pub stats: SessionStats,
}

impl SessionContext {
    pub fn new(
        board_id: u8,
        image: &FirmwareImage,
        settings: &Settings,
        queues: Endpoint<Frame>,
        cancel: CancelFlag,
    ) -> Self {
        SessionContext {
            board_id,
            image: image.clone(),
            cursor: image.chunks(),
            response_timeout: settings.response_timeout,
            max_retransfers: settings.max_retransfers,
            queues,
            cancel,
            progress: ProgressBar::hidden(),
            started: Instant::now(),
            stats: SessionStats::default(),
        }
    }

    /// Send `frame` towards the board, then wait for its answer.
    ///
    /// Responses left over from earlier exchanges are discarded first, so the
    /// answer is always the board's reaction to this frame.
    pub fn exchange(&mut self, frame: Frame) -> Result<Response, FailureReason> {
        self.send_and_wait(frame, false)
    }

    /// Like [`exchange`](Self::exchange), for a frame the board refused
    /// before. Only a retransmission that actually left is counted.
    pub fn retransmit(&mut self, frame: Frame) -> Result<Response, FailureReason> {
        self.send_and_wait(frame, true)
    }

    fn send_and_wait(&mut self, frame: Frame, again: bool) -> Result<Response, FailureReason> {
        let deadline = Instant::now() + self.response_timeout;
        self.discard_stale_responses();
        self.transmit(frame, deadline)?;
        if again {
            self.stats.retransmissions += 1;
        }
        self.wait_for_response(deadline)
    }

    fn discard_stale_responses(&mut self) {
        loop {
            match self.queues.rx.try_recv() {
                Ok(frame) if frame.frame_type() == FrameType::FatalError => {
                    warn!("[{}] board reported a fatal error between exchanges", self.board_id)
                }
                Ok(frame) => debug!("[{}] discarding stale {:?}", self.board_id, frame),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
    }

    fn transmit(&mut self, frame: Frame, deadline: Instant) -> Result<(), FailureReason> {
        trace!("[{}] sending {:?}", self.board_id, frame);
        let mut pending = frame;
        loop {
            let wait = self.next_wait(deadline)?;
            match self.queues.tx.send_timeout(pending, wait) {
                Ok(()) => return Ok(()),
                Err(SendTimeoutError::Timeout(frame)) => pending = frame,
                Err(SendTimeoutError::Disconnected(_)) => return Err(self.lost_router()),
            }
        }
    }

    fn wait_for_response(&mut self, deadline: Instant) -> Result<Response, FailureReason> {
        loop {
            let wait = self.next_wait(deadline)?;
            match self.queues.rx.recv_timeout(wait) {
                Ok(frame) => match frame.frame_type() {
                    FrameType::Ack => return Ok(Response::Ack),
                    FrameType::Nack => return Ok(Response::Nack),
                    FrameType::FatalError => return Err(FailureReason::BoardFault),
                    _ => debug!("[{}] ignoring unexpected {:?}", self.board_id, frame),
                },
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return Err(self.lost_router()),
            }
        }
    }

    /// The queues closing under a cancelled session is part of its shutdown,
    /// not a lost connection.
    fn lost_router(&self) -> FailureReason {
        if self.cancel.is_cancelled() {
            FailureReason::Cancelled
        } else {
            FailureReason::Disconnected
        }
    }

    /// Length of the next bounded wait before `deadline`, or why waiting must
    /// stop.
    fn next_wait(&self, deadline: Instant) -> Result<Duration, FailureReason> {
        if self.cancel.is_cancelled() {
            return Err(FailureReason::Cancelled);
        }
        let now = Instant::now();
        if now >= deadline {
            return Err(FailureReason::Timeout);
        }
        Ok(Duration::min(deadline - now, POLL_INTERVAL))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    use crate::channels::queue_pair;
    use crate::protocol::HOST_ID;
    use crate::settings::SettingsBuilder;

    const BOARD: u8 = 3;

    fn context(queues: Endpoint<Frame>, cancel: CancelFlag) -> SessionContext {
        let settings = SettingsBuilder::new()
            .chunk_size(4)
            .response_timeout(Duration::from_secs(2))
            .finalize();
        let image = FirmwareImage::from_bytes(vec![0; 10], 4, b"k").unwrap();
        SessionContext::new(BOARD, &image, &settings, queues, cancel)
    }

    fn id_request() -> Frame {
        Frame::empty(FrameType::IdRequest, HOST_ID, BOARD)
    }

    #[test]
    fn stale_fatal_error_is_not_taken_as_the_answer() {
        let (session, board) = queue_pair(4);
        board
            .tx
            .send(Frame::empty(FrameType::FatalError, BOARD, HOST_ID))
            .unwrap();
        let mut ctx = context(session, CancelFlag::new());
        let responder = thread::spawn(move || {
            let frame = board.rx.recv().unwrap();
            board
                .tx
                .send(Frame::empty(FrameType::Ack, BOARD, HOST_ID))
                .unwrap();
            (frame, board)
        });

        assert_eq!(ctx.exchange(id_request()), Ok(Response::Ack));
        assert_eq!(responder.join().unwrap().0, id_request());
    }

    #[test]
    fn closed_queues_fail_a_running_session() {
        let (session, board) = queue_pair::<Frame>(4);
        drop(board);
        let mut ctx = context(session, CancelFlag::new());
        assert_eq!(ctx.exchange(id_request()), Err(FailureReason::Disconnected));
    }

    #[test]
    fn closed_queues_of_a_cancelled_session_mean_cancelled() {
        let (session, _board) = queue_pair::<Frame>(4);
        let cancel = CancelFlag::new();
        let ctx = context(session, cancel.clone());
        assert_eq!(ctx.lost_router(), FailureReason::Disconnected);
        cancel.cancel();
        assert_eq!(ctx.lost_router(), FailureReason::Cancelled);
    }

    #[test]
    fn only_retransmissions_that_left_are_counted() {
        let (session, board) = queue_pair(1);
        let cancel = CancelFlag::new();
        let mut ctx = context(session, cancel.clone());
        // The board never takes the first frame off the queue, so the second
        // one cannot leave.
        let refusing_board = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            board
                .tx
                .send(Frame::empty(FrameType::Nack, BOARD, HOST_ID))
                .unwrap();
            thread::sleep(Duration::from_millis(200));
            cancel.cancel();
            board
        });

        assert_eq!(ctx.exchange(id_request()), Ok(Response::Nack));
        assert_eq!(ctx.retransmit(id_request()), Err(FailureReason::Cancelled));
        assert_eq!(ctx.stats.retransmissions, 0);
        refusing_board.join().unwrap();
    }
}
