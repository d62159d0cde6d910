//! Behaviour of a single update session against a simulated board.

mod common;

use std::thread;
use std::time::{Duration, Instant};

use flashcom::channels::{queue_pair, CancelFlag};
use flashcom::protocol::{Frame, FrameType, UpdateRequest, HOST_ID};
use flashcom::update_session::{FailureReason, UpdateOutcome, UpdateSession};
use flashcom::{FirmwareImage, Settings};

use common::*;

const BOARD: u8 = 5;

fn run_session(
    settings: &Settings,
    image: &FirmwareImage,
    responder: Responder,
) -> (UpdateOutcome, Vec<Frame>) {
    let (session_side, board_side) = queue_pair(8);
    let board = board_on_queues(BOARD, board_side, responder);
    let outcome = UpdateSession::new(BOARD, image, settings, session_side, CancelFlag::new()).run();
    (outcome, board.join().unwrap())
}

#[test]
fn request_announces_the_image() {
    let settings = test_settings().finalize();
    let image = test_image(200, &settings);
    let (outcome, frames) = run_session(&settings, &image, always_ack());

    assert!(outcome.success());
    let request = &frames[0];
    assert_eq!(request.frame_type(), FrameType::ProgramUpdateRequest);
    assert_eq!(request.source_id(), HOST_ID);
    assert_eq!(request.dest_id(), BOARD);
    let parsed = UpdateRequest::from_bytes(request.payload()).unwrap();
    assert_eq!(parsed.version, 1);
    assert_eq!(parsed.chunk_count, 4);
    assert_eq!(&parsed.digest, image.digest());
}

#[test]
fn acked_session_sends_every_chunk_once() {
    let settings = test_settings().finalize();
    let image = test_image(1000, &settings);
    let (outcome, frames) = run_session(&settings, &image, always_ack());

    assert_eq!(outcome.result, Ok(()));
    let data = data_frames(&frames);
    assert_eq!(data.len(), image.chunk_count() as usize);
    assert_eq!(outcome.chunks_sent, image.chunk_count());
    assert_eq!(outcome.retransmissions, 0);
    assert_eq!(outcome.bytes_sent, 1000);

    let mut cursor = image.chunks();
    for frame in data {
        assert_eq!(frame.payload(), cursor.current().unwrap());
        cursor.advance();
    }
    assert!(cursor.current().is_none());
}

#[test]
fn refused_chunk_is_sent_again_unchanged() {
    let settings = test_settings().max_retransfers(5).finalize();
    let image = test_image(300, &settings);
    let (outcome, frames) = run_session(&settings, &image, nack_chunk(2, 3));

    assert!(outcome.success());
    assert_eq!(outcome.retransmissions, 3);
    let data = data_frames(&frames);
    assert_eq!(data.len(), image.chunk_count() as usize + 3);
    // Chunk 2 goes out 4 times in a row, byte for byte the same.
    for attempt in &data[3..6] {
        assert_eq!(*attempt, data[2]);
    }
    assert_ne!(data[6], data[2]);
}

#[test]
fn too_many_refusals_abandon_the_board() {
    let settings = test_settings().max_retransfers(3).finalize();
    let image = test_image(300, &settings);
    let (outcome, frames) = run_session(&settings, &image, nack_chunk(1, 100));

    assert_eq!(outcome.result, Err(FailureReason::RetriesExhausted(3)));
    let data = data_frames(&frames);
    // Chunk 0 once, then chunk 1 exactly max_retransfers times.
    assert_eq!(data.len(), 1 + 3);
    assert!(data[1..].iter().all(|frame| *frame == data[1]));
}

#[test]
fn rejected_request_sends_no_data() {
    let settings = test_settings().finalize();
    let image = test_image(300, &settings);
    let (outcome, frames) = run_session(&settings, &image, reject_request());

    assert_eq!(outcome.result, Err(FailureReason::Rejected));
    assert_eq!(frames.len(), 1);
}

#[test]
fn silent_board_times_out() {
    let settings = test_settings()
        .response_timeout(Duration::from_millis(200))
        .finalize();
    let image = test_image(300, &settings);
    let started = Instant::now();
    let (outcome, frames) = run_session(&settings, &image, never_answer());

    assert_eq!(outcome.result, Err(FailureReason::Timeout));
    // The request is not sent again.
    assert_eq!(frames.len(), 1);
    assert!(started.elapsed() >= Duration::from_millis(200));
}

#[test]
fn timeout_during_transfer_is_not_retried() {
    let settings = test_settings()
        .response_timeout(Duration::from_millis(200))
        .finalize();
    let image = test_image(300, &settings);
    let mut answered = 0;
    let responder: Responder = Box::new(move |_| {
        answered += 1;
        if answered <= 2 {
            Some(FrameType::Ack)
        } else {
            None
        }
    });
    let (outcome, frames) = run_session(&settings, &image, responder);

    assert_eq!(outcome.result, Err(FailureReason::Timeout));
    assert_eq!(data_frames(&frames).len(), 2);
    assert_eq!(outcome.chunks_sent, 1);
}

#[test]
fn fatal_error_from_the_board_ends_the_session() {
    let settings = test_settings().finalize();
    let image = test_image(300, &settings);
    let responder: Responder = Box::new(|frame| match frame.frame_type() {
        FrameType::ProgramData => Some(FrameType::FatalError),
        _ => Some(FrameType::Ack),
    });
    let (outcome, _) = run_session(&settings, &image, responder);

    assert_eq!(outcome.result, Err(FailureReason::BoardFault));
}

#[test]
fn unrelated_frames_do_not_count_as_answers() {
    let settings = test_settings().finalize();
    let image = test_image(100, &settings);
    let (session_side, board_side) = queue_pair(8);

    let board = thread::spawn(move || {
        let mut received = 0;
        while let Ok(_frame) = board_side.rx.recv() {
            received += 1;
            let noise = Frame::new(FrameType::CliData, BOARD, HOST_ID, b"boot\n".to_vec());
            let ack = Frame::empty(FrameType::Ack, BOARD, HOST_ID);
            if board_side.tx.send(noise).is_err() || board_side.tx.send(ack).is_err() {
                break;
            }
        }
        received
    });
    let outcome = UpdateSession::new(BOARD, &image, &settings, session_side, CancelFlag::new()).run();

    assert!(outcome.success());
    assert_eq!(outcome.retransmissions, 0);
    assert_eq!(board.join().unwrap(), 1 + image.chunk_count() as usize);
}

#[test]
fn cancellation_stops_a_waiting_session() {
    let settings = test_settings()
        .response_timeout(Duration::from_secs(30))
        .finalize();
    let image = test_image(300, &settings);
    let (session_side, board_side) = queue_pair(8);
    let board = board_on_queues(BOARD, board_side, never_answer());

    let cancel = CancelFlag::new();
    let session = UpdateSession::new(BOARD, &image, &settings, session_side, cancel.clone());
    let handle = thread::spawn(move || session.run());

    thread::sleep(Duration::from_millis(100));
    let cancelled_at = Instant::now();
    cancel.cancel();
    let outcome = handle.join().unwrap();

    assert_eq!(outcome.result, Err(FailureReason::Cancelled));
    assert!(cancelled_at.elapsed() < Duration::from_secs(1));
    assert_eq!(board.join().unwrap().len(), 1);
}

#[test]
fn queues_closing_after_cancellation_mean_cancelled() {
    let settings = test_settings()
        .response_timeout(Duration::from_secs(30))
        .finalize();
    let image = test_image(300, &settings);
    let (session_side, board_side) = queue_pair(8);
    let cancel = CancelFlag::new();

    // Cancel, then close the queues right away, the way a shutdown does.
    let board_cancel = cancel.clone();
    let board = thread::spawn(move || {
        let request = board_side.rx.recv().unwrap();
        board_cancel.cancel();
        drop(board_side);
        request
    });
    let outcome = UpdateSession::new(BOARD, &image, &settings, session_side, cancel).run();

    assert_eq!(outcome.result, Err(FailureReason::Cancelled));
    assert_eq!(
        board.join().unwrap().frame_type(),
        FrameType::ProgramUpdateRequest
    );
}

#[test]
fn cancelled_session_sends_nothing() {
    let settings = test_settings().finalize();
    let image = test_image(300, &settings);
    let (session_side, board_side) = queue_pair(8);
    let board = board_on_queues(BOARD, board_side, always_ack());

    let cancel = CancelFlag::new();
    cancel.cancel();
    let outcome = UpdateSession::new(BOARD, &image, &settings, session_side, cancel).run();

    assert_eq!(outcome.result, Err(FailureReason::Cancelled));
    assert!(board.join().unwrap().is_empty());
}

#[test]
fn lost_router_fails_the_session() {
    let settings = test_settings().finalize();
    let image = test_image(300, &settings);
    let (session_side, board_side) = queue_pair::<Frame>(8);
    drop(board_side);

    let outcome = UpdateSession::new(BOARD, &image, &settings, session_side, CancelFlag::new()).run();
    assert_eq!(outcome.result, Err(FailureReason::Disconnected));
}
