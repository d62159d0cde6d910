//! Per-board firmware update session.
//!
//! **Example** - Updating one board whose queues are served by a router:
//! ```ignore
//! use flashcom::{channels::*, update_session::UpdateSession};
//!
//! let (session_side, router_side) = queue_pair(100);
//! let session = UpdateSession::new(3, &image, &settings, session_side, CancelFlag::new());
//! let outcome = session.run();
//! println!("board {} updated: {}", outcome.board_id, outcome.success());
//! ```

mod context;
mod events;
mod state_machine;
mod states;

pub use context::FailureReason;
pub use state_machine::{UpdateOutcome, UpdateSession};
