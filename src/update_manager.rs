//! Runs one update session per target board, all at once or one after the
//! other.

use std::thread;
use std::time::{Duration, Instant};

use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use log::{error, info};

use crate::channels::{CancelFlag, Endpoint};
use crate::firmware::FirmwareImage;
use crate::protocol::Frame;
use crate::settings::Settings;
use crate::update_session::{UpdateOutcome, UpdateSession};

// =============================================================================
// Public Interface
// =============================================================================

/// A board to update: its id, the session side of its queue pair and the
/// flag that cancels only this board.
#[derive(Debug)]
pub struct BoardTarget {
    pub board_id: u8,
    pub endpoint: Endpoint<Frame>,
    pub cancel: CancelFlag,
}

pub struct UpdateManager {
    settings: Settings,
    image: FirmwareImage,
}

impl UpdateManager {
    pub fn new(settings: &Settings, image: &FirmwareImage) -> Self {
        UpdateManager {
            settings: settings.clone(),
            image: image.clone(),
        }
    }

    /// Update every target and return once all of their sessions have ended.
    /// The outcomes are listed in the order of `targets`.
    pub fn run(self, targets: Vec<BoardTarget>) -> Summary {
        let started = Instant::now();
        info!(
            "updating {} board(s) {}",
            targets.len(),
            if self.settings.parallel {
                "in parallel"
            } else {
                "one at a time"
            }
        );

        let outcomes = if self.settings.parallel {
            self.run_parallel(targets)
        } else {
            self.run_sequential(targets)
        };

        Summary {
            outcomes,
            elapsed: started.elapsed(),
        }
    }

    /// All sessions run together; their bars are drawn in one block.
    fn run_parallel(&self, targets: Vec<BoardTarget>) -> Vec<UpdateOutcome> {
        let multi = MultiProgress::new();

        let mut handles = Vec::with_capacity(targets.len());
        for target in targets {
            let board_id = target.board_id;
            let progress = if self.settings.show_progress {
                multi.add(self.progress_bar(board_id))
            } else {
                ProgressBar::hidden()
            };
            let handle = self.spawn_session(target, progress);
            handles.push((board_id, handle));
        }

        if self.settings.show_progress && !handles.is_empty() {
            // Returns once every bar is finished or abandoned.
            if let Err(e) = multi.join() {
                error!("failed to draw progress: {}", e);
            }
        }

        handles
            .into_iter()
            .map(|(board_id, handle)| collect(board_id, handle))
            .collect()
    }

    /// A session only starts once the previous one has ended, so no two
    /// sessions ever share the link.
    fn run_sequential(&self, targets: Vec<BoardTarget>) -> Vec<UpdateOutcome> {
        let mut outcomes = Vec::with_capacity(targets.len());
        for target in targets {
            let board_id = target.board_id;
            let progress = if self.settings.show_progress {
                self.progress_bar(board_id)
            } else {
                ProgressBar::hidden()
            };
            let handle = self.spawn_session(target, progress);
            outcomes.push(collect(board_id, handle));
        }
        outcomes
    }

    fn spawn_session(
        &self,
        target: BoardTarget,
        progress: ProgressBar,
    ) -> Option<thread::JoinHandle<UpdateOutcome>> {
        let session = UpdateSession::new(
            target.board_id,
            &self.image,
            &self.settings,
            target.endpoint,
            target.cancel,
        )
        .with_progress(progress.clone());

        let spawned = thread::Builder::new()
            .name(format!("session-{}", target.board_id))
            .spawn(move || session.run());
        match spawned {
            Ok(handle) => Some(handle),
            Err(e) => {
                error!("[{}] failed to start the session: {}", target.board_id, e);
                progress.abandon();
                None
            }
        }
    }

    fn progress_bar(&self, board_id: u8) -> ProgressBar {
        let bar = ProgressBar::new(self.image.size() as u64);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("[FC] {prefix} [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}")
                .progress_chars("=>-"),
        );
        bar.set_prefix(format!("board {:>3}", board_id));
        bar
    }
}

/// The outcomes of all the sessions of one run.
#[derive(Debug, Clone)]
pub struct Summary {
    pub outcomes: Vec<UpdateOutcome>,
    pub elapsed: Duration,
}

impl Summary {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.success()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    /// `true` only when every board was updated. An empty run did not update
    /// anything and is not a success.
    pub fn all_succeeded(&self) -> bool {
        !self.outcomes.is_empty() && self.failed() == 0
    }

    /// Print the per-board results followed by the totals.
    pub fn print(&self) {
        for outcome in &self.outcomes {
            match &outcome.result {
                Ok(()) => println!(
                    "[FC]   board {:>3}: {} ({} bytes, {} retransmissions, {} ms)",
                    outcome.board_id,
                    style("updated").green(),
                    outcome.bytes_sent,
                    outcome.retransmissions,
                    outcome.elapsed.as_millis()
                ),
                Err(reason) => println!(
                    "[FC]   board {:>3}: {} ({}, {} ms)",
                    outcome.board_id,
                    style("failed").red(),
                    reason,
                    outcome.elapsed.as_millis()
                ),
            }
        }

        let totals = format!(
            "[FC] {} of {} board(s) updated in {:.1} s",
            self.succeeded(),
            self.outcomes.len(),
            self.elapsed.as_secs_f32()
        );
        if self.all_succeeded() {
            println!("{}", style(totals).green().bold());
        } else {
            println!("{}", style(totals).red().bold());
        }
    }
}

// =============================================================================
// Private stuff
// =============================================================================

/// Wait for a session thread. A session that could not start or that panicked
/// still gets an outcome, so one board never hides the others.
fn collect(board_id: u8, handle: Option<thread::JoinHandle<UpdateOutcome>>) -> UpdateOutcome {
    match handle.map(thread::JoinHandle::join) {
        Some(Ok(outcome)) => outcome,
        Some(Err(_)) => {
            error!("[{}] update session panicked", board_id);
            UpdateOutcome::aborted(board_id)
        }
        None => UpdateOutcome::aborted(board_id),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::queue_pair;
    use crate::protocol::{FrameType, HOST_ID};
    use crate::settings::SettingsBuilder;
    use crate::update_session::FailureReason;

    /// A board that acknowledges everything, seen from the router's side of
    /// its queue pair. Returns the number of frames it received.
    fn acking_board(board_id: u8, queues: Endpoint<Frame>) -> thread::JoinHandle<usize> {
        thread::spawn(move || {
            let mut received = 0;
            while let Ok(frame) = queues.rx.recv() {
                assert_eq!(frame.dest_id(), board_id);
                received += 1;
                let ack = Frame::empty(FrameType::Ack, board_id, HOST_ID);
                if queues.tx.send(ack).is_err() {
                    break;
                }
            }
            received
        })
    }

    fn settings(parallel: bool) -> Settings {
        SettingsBuilder::new()
            .chunk_size(4)
            .parallel(parallel)
            .show_progress(false)
            .response_timeout(Duration::from_secs(2))
            .finalize()
    }

    fn run_with_acking_boards(parallel: bool, ids: &[u8]) -> (Summary, Vec<usize>) {
        let image = FirmwareImage::from_bytes(vec![7; 10], 4, b"key").unwrap();
        let mut targets = Vec::new();
        let mut boards = Vec::new();
        for &board_id in ids {
            let (session_side, board_side) = queue_pair(8);
            boards.push(acking_board(board_id, board_side));
            targets.push(BoardTarget {
                board_id,
                endpoint: session_side,
                cancel: CancelFlag::new(),
            });
        }
        let summary = UpdateManager::new(&settings(parallel), &image).run(targets);
        let received = boards.into_iter().map(|b| b.join().unwrap()).collect();
        (summary, received)
    }

    #[test]
    fn sequential_run_reports_in_input_order() {
        let (summary, received) = run_with_acking_boards(false, &[4, 2, 9]);

        let ids: Vec<u8> = summary.outcomes.iter().map(|o| o.board_id).collect();
        assert_eq!(ids, vec![4, 2, 9]);
        assert!(summary.all_succeeded());
        // One request and three chunks per board.
        assert_eq!(received, vec![4, 4, 4]);
    }

    #[test]
    fn parallel_run_updates_every_board() {
        let (summary, received) = run_with_acking_boards(true, &[1, 2, 3, 4]);

        assert_eq!(summary.succeeded(), 4);
        assert!(summary.outcomes.iter().all(|o| o.bytes_sent == 10));
        assert_eq!(received, vec![4; 4]);
    }

    #[test]
    fn cancelled_board_does_not_fail_the_others() {
        let image = FirmwareImage::from_bytes(vec![1; 8], 4, b"key").unwrap();
        let (first, first_board) = queue_pair(8);
        let (second, second_board) = queue_pair(8);
        let first_acks = acking_board(1, first_board);
        let second_acks = acking_board(2, second_board);

        let cancelled = CancelFlag::new();
        cancelled.cancel();
        let targets = vec![
            BoardTarget {
                board_id: 1,
                endpoint: first,
                cancel: cancelled,
            },
            BoardTarget {
                board_id: 2,
                endpoint: second,
                cancel: CancelFlag::new(),
            },
        ];
        let summary = UpdateManager::new(&settings(true), &image).run(targets);

        assert_eq!(summary.outcomes[0].result, Err(FailureReason::Cancelled));
        assert!(summary.outcomes[1].success());
        assert_eq!(summary.failed(), 1);
        assert!(!summary.all_succeeded());
        assert_eq!(first_acks.join().unwrap(), 0);
        assert_eq!(second_acks.join().unwrap(), 3);
    }

    #[test]
    fn empty_run_is_not_a_success() {
        let image = FirmwareImage::from_bytes(vec![1], 4, b"key").unwrap();
        let summary = UpdateManager::new(&settings(false), &image).run(Vec::new());
        assert_eq!(summary.failed(), 0);
        assert!(!summary.all_succeeded());
    }
}
