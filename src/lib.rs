//! Flashcom pushes a firmware image to one or many boards sharing a single
//! serial link. Each board answers every frame it receives with an `Ack` or a
//! `Nack`, so the update of a board is a simple stop-and-wait exchange: an
//! update request carrying the image size and its HMAC-SHA256 digest, then the
//! image itself, one chunk per frame.
//!
//! Several boards can be updated at the same time over the same link. The
//! crate is organized as a handful of units, each running on its own thread
//! and talking to the others only through bounded queues:
//!
//! * the [transport bridge](bridge) owns the serial link and cuts the byte
//!   stream into frames,
//! * the [router](router) hands each incoming frame to the session of the
//!   board that sent it and merges the sessions' outgoing frames,
//! * one [update session](update_session) per board drives the transfer,
//! * the [update manager](update_manager) runs the sessions all at once or
//!   one after the other,
//! * an optional [CLI sink](cli_sink) lets the operator talk to a board's
//!   command line while the updates go on.
//!
//! The [`Controller`] wires all of them together over any [`Link`].
//!
//! Every unit owns a one-way cancellation flag, checked at its loop
//! boundaries and between bounded queue waits. An interrupt cancels them all
//! and the units are then stopped and joined in dependency order.
//!
//! The update session is implemented as a state machine, in terms of
//! **states** and **transitions** between them:
//!
//! * It can only be in one state at any time.
//! * Each state can have its own associated data if needed, and all states
//!   share a session context.
//! * Transitions between states are triggered via typed **events** and only
//!   explicitly defined transitions are permitted, as many errors as possible
//!   being detected at **compile-time**.
//! * Transitioning from one state to another consumes the original state.
//!   Data is carried from one state to the next by the transition event.
//!
//! Transitions leverage `rust`'s `From` and `Into` pattern: the `From` trait
//! converts `event` types into `state` types following the semantics of the
//! state machine, and any transition for which it is not implemented is
//! rejected by the compiler.

pub mod bridge;
pub mod channels;
pub mod cli_sink;
pub mod control;
mod error;
pub mod firmware;
pub mod protocol;
pub mod router;
mod settings;
pub mod update_manager;
pub mod update_session;
pub mod utils;

pub use bridge::{Link, TransportBridge};
pub use control::Controller;
pub use error::{Error, Result};
pub use firmware::FirmwareImage;
pub use settings::{Settings, SettingsBuilder};
pub use update_manager::Summary;
pub use update_session::{FailureReason, UpdateOutcome};
