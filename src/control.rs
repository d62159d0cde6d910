//! Wires the bridge, the router, the update sessions and the optional CLI
//! sink together, and takes them down again in order.
//!
//! ```text
//!                                  .---------.   board queues   .----------.
//!  link <==> bridge <== raw ==>    |         |<================>| sessions |
//!                                  | router  |                  '----------'
//!                                  |         |<================> CLI sink
//!                                  '---------'   CLI queues
//! ```
//!
//! Every unit runs on its own thread with its own cancellation flag. The flags
//! of the sessions and of the CLI sink are gathered in one [`CancelGroup`],
//! which is what an interrupt handler should cancel, and which the bridge
//! cancels when the link fails. Once the updates are over (and the CLI session
//! is ended, when there is one) the units are stopped producers first: CLI,
//! then router, then bridge, each one joined before the next is cancelled.

use std::thread::{self, JoinHandle};

use crossbeam_channel::Receiver;
use log::{error, info};

use crate::bridge::{Link, TransportBridge};
use crate::channels::{queue_pair, CancelFlag, CancelGroup, RawFrame};
use crate::cli_sink::{CliSink, END_SENTINEL};
use crate::error::Result;
use crate::firmware::FirmwareImage;
use crate::router::{diagnostics_channel, Router};
use crate::settings::Settings;
use crate::update_manager::{BoardTarget, Summary, UpdateManager};

pub struct Controller {
    settings: Settings,
    image: FirmwareImage,
    boards: Vec<(u8, CancelFlag)>,
    bridge_cancel: CancelFlag,
    router_cancel: CancelFlag,
    cli_cancel: CancelFlag,
    group: CancelGroup,
}

impl Controller {
    /// A controller updating `boards`, in that order when updating one board
    /// at a time.
    pub fn new(settings: &Settings, image: FirmwareImage, boards: Vec<u8>) -> Self {
        let mut group = CancelGroup::new();
        let boards: Vec<(u8, CancelFlag)> = boards
            .into_iter()
            .map(|board_id| (board_id, CancelFlag::new()))
            .collect();
        for (_, flag) in &boards {
            group.add(flag);
        }

        // The router and the bridge stay out of the group: they keep serving
        // until the sessions and the CLI have wound down, then `shutdown`
        // stops them in order.
        let bridge_cancel = CancelFlag::new();
        let router_cancel = CancelFlag::new();
        let cli_cancel = CancelFlag::new();
        group.add(&cli_cancel);

        Controller {
            settings: settings.clone(),
            image,
            boards,
            bridge_cancel,
            router_cancel,
            cli_cancel,
            group,
        }
    }

    /// Cancelling the returned group ends every session and the CLI sink; the
    /// controller then takes the router and the bridge down itself.
    pub fn interrupt_handle(&self) -> CancelGroup {
        self.group.clone()
    }

    /// Update all the boards over `link`. When `cli_lines` is given, a CLI
    /// session runs alongside the updates and the controller only returns once
    /// it has ended as well.
    pub fn run<L: Link + 'static>(
        self,
        link: L,
        cli_lines: Option<Receiver<String>>,
    ) -> Result<Summary> {
        let capacity = self.settings.queue_capacity;
        let (bridge_side, router_bridge_side) = queue_pair::<RawFrame>(capacity);
        let (diagnostics_tx, diagnostics_rx) = diagnostics_channel(capacity);

        let mut router = Router::new(
            router_bridge_side,
            diagnostics_tx,
            self.router_cancel.clone(),
        );
        let mut targets = Vec::with_capacity(self.boards.len());
        for (board_id, cancel) in &self.boards {
            let (session_side, router_side) = queue_pair(capacity);
            router = router.with_board(*board_id, router_side);
            targets.push(BoardTarget {
                board_id: *board_id,
                endpoint: session_side,
                cancel: cancel.clone(),
            });
        }

        let sink = match cli_lines {
            Some(lines) => {
                let (cli_side, router_side) = queue_pair(capacity);
                router = router.with_cli(router_side);
                Some(
                    CliSink::new(
                        self.settings.cli_board,
                        lines,
                        cli_side,
                        self.cli_cancel.clone(),
                    )
                    .with_diagnostics(diagnostics_rx),
                )
            }
            None => {
                // Nobody watches the diagnostics, the router logs them anyway.
                drop(diagnostics_rx);
                None
            }
        };

        let bridge = TransportBridge::new(
            link,
            bridge_side,
            self.bridge_cancel.clone(),
            self.group.clone(),
        );
        let bridge_thread = self.spawn("bridge", move || {
            // Failures are logged and cancel the group from within.
            let _ = bridge.run();
        })?;
        let router_thread = match self.spawn("router", move || router.run()) {
            Ok(handle) => handle,
            Err(e) => {
                self.bridge_cancel.cancel();
                join("bridge", bridge_thread);
                return Err(e);
            }
        };
        let cli_thread = match sink {
            Some(sink) => match self.spawn("cli", move || sink.run()) {
                Ok(handle) => Some(handle),
                Err(e) => {
                    self.shutdown(None, router_thread, bridge_thread);
                    return Err(e);
                }
            },
            None => None,
        };

        let summary = UpdateManager::new(&self.settings, &self.image).run(targets);

        if cli_thread.is_some() && !self.cli_cancel.is_cancelled() {
            println!(
                "[FC] updates are over, type `{}` to leave the CLI",
                END_SENTINEL
            );
        }
        self.shutdown(cli_thread, router_thread, bridge_thread);
        Ok(summary)
    }

    fn shutdown(
        &self,
        cli: Option<JoinHandle<()>>,
        router: JoinHandle<()>,
        bridge: JoinHandle<()>,
    ) {
        info!("shutting down");
        if let Some(cli) = cli {
            // The CLI session ends on its own, or on interrupt.
            join("cli", cli);
        }
        self.cli_cancel.cancel();

        self.router_cancel.cancel();
        join("router", router);

        self.bridge_cancel.cancel();
        join("bridge", bridge);
    }

    fn spawn<F>(&self, name: &str, f: F) -> Result<JoinHandle<()>>
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = thread::Builder::new().name(name.into()).spawn(f)?;
        Ok(handle)
    }
}

fn join(name: &str, handle: JoinHandle<()>) {
    if handle.join().is_err() {
        error!("the {} thread panicked", name);
    }
}
