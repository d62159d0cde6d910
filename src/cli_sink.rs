//! Interactive channel to the boards' command line interfaces.
//!
//! Lines typed by the operator are sent as `CliData` frames to one board, and
//! whatever the boards print, plus the traffic the router could not deliver,
//! is shown on the terminal. Nothing here may slow down the updates: frames
//! are queued without waiting and dropped when the queue is full.

use std::io::{self, BufRead};
use std::thread;
use std::time::Duration;

use console::style;
use crossbeam_channel::{bounded, Receiver, Select, TryRecvError, TrySendError};
use log::{debug, info, warn};

use crate::channels::{CancelFlag, Endpoint};
use crate::protocol::{Frame, FrameType, HOST_ID, MAX_PAYLOAD_LEN};
use crate::router::Diagnostic;

/// Typing this line ends the CLI session.
pub const END_SENTINEL: &str = "end";

const POLL_INTERVAL: Duration = Duration::from_millis(50);

pub struct CliSink {
    target: Option<u8>,
    lines: Option<Receiver<String>>,
    /// `tx` carries frames to the router, `rx` the `CliData` frames it routed
    /// here.
    queues: Endpoint<Frame>,
    inbound_open: bool,
    diagnostics: Option<Receiver<Diagnostic>>,
    cancel: CancelFlag,
}

impl CliSink {
    /// A sink sending the `lines` to board `target`. Without a target the
    /// lines are discarded.
    pub fn new(
        target: Option<u8>,
        lines: Receiver<String>,
        queues: Endpoint<Frame>,
        cancel: CancelFlag,
    ) -> Self {
        CliSink {
            target,
            lines: Some(lines),
            queues,
            inbound_open: true,
            diagnostics: None,
            cancel,
        }
    }

    /// Also print what the router reports on `diagnostics`.
    pub fn with_diagnostics(mut self, diagnostics: Receiver<Diagnostic>) -> Self {
        self.diagnostics = Some(diagnostics);
        self
    }

    /// Serve the terminal until the end sentinel is typed, the input is
    /// exhausted or the sink is cancelled. Ending the session sets the sink's
    /// own cancellation flag.
    pub fn run(mut self) {
        info!("=> CLI (target {:?})", self.target);
        while !self.cancel.is_cancelled() {
            self.wait_for_traffic();
            self.handle_line();
            self.print_inbound();
            self.print_diagnostics();
        }
        info!("<= CLI");
    }

    fn wait_for_traffic(&self) {
        let mut select = Select::new();
        if let Some(lines) = &self.lines {
            select.recv(lines);
        }
        if self.inbound_open {
            select.recv(&self.queues.rx);
        }
        if let Some(diagnostics) = &self.diagnostics {
            select.recv(diagnostics);
        }
        let _ = select.ready_timeout(POLL_INTERVAL);
    }

    fn handle_line(&mut self) {
        let line = match self.lines.as_ref().map(Receiver::try_recv) {
            Some(Ok(line)) => line,
            Some(Err(TryRecvError::Empty)) | None => return,
            Some(Err(TryRecvError::Disconnected)) => {
                info!("end of CLI input");
                self.lines = None;
                self.cancel.cancel();
                return;
            }
        };

        let line = line.trim_end_matches(|c: char| c == '\r' || c == '\n');
        if line.trim() == END_SENTINEL {
            info!("CLI session ended by the operator");
            self.cancel.cancel();
            return;
        }

        let target = match self.target {
            Some(target) => target,
            None => {
                warn!("no CLI board configured, line discarded");
                return;
            }
        };

        let mut payload = Vec::with_capacity(line.len() + 1);
        payload.extend_from_slice(line.as_bytes());
        payload.push(b'\n');
        if payload.len() > MAX_PAYLOAD_LEN {
            warn!("CLI line of {} bytes truncated", payload.len());
            payload.truncate(MAX_PAYLOAD_LEN);
        }

        let frame = Frame::new(FrameType::CliData, HOST_ID, target, payload);
        match self.queues.tx.try_send(frame) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => warn!("CLI queue full, line dropped"),
            Err(TrySendError::Disconnected(_)) => debug!("router gone, line dropped"),
        }
    }

    fn print_inbound(&mut self) {
        if !self.inbound_open {
            return;
        }
        match self.queues.rx.try_recv() {
            Ok(frame) => println!(
                "{} {}",
                style(format!(
                    "[FC] CLI ({} -> {})",
                    frame.source_id(),
                    frame.dest_id()
                ))
                .cyan(),
                String::from_utf8_lossy(frame.payload()).trim_end()
            ),
            Err(TryRecvError::Empty) => {}
            Err(TryRecvError::Disconnected) => self.inbound_open = false,
        }
    }

    fn print_diagnostics(&mut self) {
        let received = match &self.diagnostics {
            Some(diagnostics) => diagnostics.try_recv(),
            None => return,
        };
        match received {
            Ok(diagnostic) => println!("{}", style(describe(&diagnostic)).yellow()),
            Err(TryRecvError::Empty) => {}
            Err(TryRecvError::Disconnected) => self.diagnostics = None,
        }
    }
}

/// Read stdin line by line on a detached thread. The thread ends with the
/// input, or once the returned receiver is dropped and another line arrives.
pub fn stdin_lines(capacity: usize) -> Receiver<String> {
    let (tx, rx) = bounded(capacity);
    let spawned = thread::Builder::new()
        .name("stdin".into())
        .spawn(move || {
            let stdin = io::stdin();
            for line in stdin.lock().lines() {
                match line {
                    Ok(line) => {
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("failed to read from stdin: {}", e);
                        break;
                    }
                }
            }
        });
    if let Err(e) = spawned {
        // The sender is gone with the closure; the sink sees the end of input.
        warn!("failed to start the stdin reader: {}", e);
    }
    rx
}

fn describe(diagnostic: &Diagnostic) -> String {
    match diagnostic {
        Diagnostic::Undecodable { raw, error } => {
            format!("[FC] ⚠ undecodable frame ({}): {:02x?}", error, raw)
        }
        Diagnostic::UnknownSource(frame) => {
            format!("[FC] ⚠ data from unsupported board {}: {:?}", frame.source_id(), frame)
        }
        Diagnostic::NotForHost(frame) => {
            format!("[FC] ⚠ frame for {} seen on the link: {:?}", frame.dest_id(), frame)
        }
        Diagnostic::Undelivered(frame) => format!("[FC] ⚠ frame not delivered: {:?}", frame),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::queue_pair;

    const WAIT: Duration = Duration::from_secs(2);

    struct Harness {
        lines: crossbeam_channel::Sender<String>,
        router: Endpoint<Frame>,
        cancel: CancelFlag,
        sink: thread::JoinHandle<()>,
    }

    fn start(target: Option<u8>) -> Harness {
        let (lines_tx, lines_rx) = bounded(8);
        let (sink_side, router_side) = queue_pair(8);
        let cancel = CancelFlag::new();
        let sink = CliSink::new(target, lines_rx, sink_side, cancel.clone());
        Harness {
            lines: lines_tx,
            router: router_side,
            cancel,
            sink: thread::spawn(move || sink.run()),
        }
    }

    #[test]
    fn lines_are_sent_to_the_cli_board() {
        let harness = start(Some(7));
        harness.lines.send("led on\r".into()).unwrap();

        let frame = harness.router.rx.recv_timeout(WAIT).unwrap();
        assert_eq!(frame.frame_type(), FrameType::CliData);
        assert_eq!(frame.source_id(), HOST_ID);
        assert_eq!(frame.dest_id(), 7);
        assert_eq!(frame.payload(), b"led on\n");

        harness.cancel.cancel();
        harness.sink.join().unwrap();
    }

    #[test]
    fn end_sentinel_stops_the_sink() {
        let harness = start(Some(7));
        harness.lines.send(END_SENTINEL.into()).unwrap();

        harness.sink.join().unwrap();
        assert!(harness.cancel.is_cancelled());
        assert!(harness.router.rx.try_recv().is_err());
    }

    #[test]
    fn closed_input_stops_the_sink() {
        let harness = start(Some(7));
        drop(harness.lines);

        harness.sink.join().unwrap();
        assert!(harness.cancel.is_cancelled());
    }

    #[test]
    fn lines_without_target_are_discarded() {
        let harness = start(None);
        harness.lines.send("status".into()).unwrap();
        harness.lines.send(END_SENTINEL.into()).unwrap();

        harness.sink.join().unwrap();
        assert!(harness.router.rx.try_recv().is_err());
    }

    #[test]
    fn long_lines_are_truncated() {
        let harness = start(Some(1));
        harness.lines.send("x".repeat(MAX_PAYLOAD_LEN + 10)).unwrap();

        let frame = harness.router.rx.recv_timeout(WAIT).unwrap();
        assert_eq!(frame.payload().len(), MAX_PAYLOAD_LEN);

        harness.cancel.cancel();
        harness.sink.join().unwrap();
    }

    #[test]
    fn full_queue_never_blocks_the_sink() {
        let harness = start(Some(1));
        for n in 0..20 {
            harness.lines.send(format!("line {}", n)).unwrap();
        }
        harness.lines.send(END_SENTINEL.into()).unwrap();

        harness.sink.join().unwrap();
        assert_eq!(harness.router.rx.try_iter().count(), 8);
    }
}
