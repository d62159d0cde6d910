//! Helper functions for the command line front end: board list loading and
//! serial port handling.

mod boards;
mod keyboard;
mod ports;

pub use boards::{load_board_ids, parse_board_ids};
pub(crate) use keyboard::*;
pub use ports::{open_and_setup_port, resolve_port, select_port, wait_for_port, WaitOutcome};
