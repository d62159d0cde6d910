//! Errors reported by `flashcom` before and around the update sessions.
//!
//! Failures of an individual board update are not errors in this sense: they
//! are reported per board as a
//! [`FailureReason`](crate::update_session::FailureReason) and never abort the
//! other sessions.

use std::io;

use thiserror::Error;

/// Every fallible setup or transport operation in `flashcom` funnels into this
/// type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("firmware image `{0}` is empty")]
    EmptyFirmware(String),

    #[error("firmware image of {size} bytes needs more than {max} chunks")]
    FirmwareTooLarge { size: usize, max: u64 },

    #[error("no valid board id found in `{0}`")]
    NoBoards(String),

    #[error("no serial port was selected")]
    PortSelection,
}

pub type Result<T> = std::result::Result<T, Error>;
