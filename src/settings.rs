//! Settings related to the serial link and to the firmware update protocol.
//!
//! Use the [builder](https://doc.rust-lang.org/1.0.0/style/ownership/builders.html)
//! pattern to set the configurable values.

use std::time::Duration;

pub use serialport::{DataBits, FlowControl, Parity, StopBits};

use crate::error::{Error, Result};
use crate::protocol::MAX_PAYLOAD_LEN;

/// Pre-shared key used for the firmware image HMAC when none is configured.
pub const DEFAULT_HMAC_KEY: &[u8] = b"secret_key";

// =============================================================================
// Public Interface
// =============================================================================

/// Groups all settings used by `flashcom` and acts as a
/// [builder](https://doc.rust-lang.org/1.0.0/style/ownership/builders.html)
/// for the settings.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Settings {
    /// The port name, usually the device path. When not set, the port is
    /// selected interactively out of the connected serial devices.
    pub path: Option<String>,
    /// The baud rate in symbols-per-second.
    pub baud_rate: u32,
    /// Number of bits used to represent a character sent on the line.
    pub data_bits: DataBits,
    /// The type of signalling to use for controlling data transfer.
    pub flow_control: FlowControl,
    /// The type of parity to use for error checking.
    pub parity: Parity,
    /// Number of bits to use to signal the end of a character.
    pub stop_bits: StopBits,

    /// Maximum number of firmware bytes carried by one `ProgramData` frame.
    pub chunk_size: usize,
    /// How long a session waits for the board to answer one frame.
    pub response_timeout: Duration,
    /// Number of transmissions of a data chunk before the board is abandoned.
    pub max_retransfers: u32,
    /// Update all boards at the same time instead of one after the other.
    pub parallel: bool,
    /// Capacity of every frame queue between the components.
    pub queue_capacity: usize,
    /// Pre-shared key of the firmware image HMAC.
    pub hmac_key: Vec<u8>,
    /// Board receiving the lines typed in the interactive CLI channel.
    pub cli_board: Option<u8>,
    /// Draw per-board progress bars.
    pub show_progress: bool,

    /// Restrict creation of `Settings` instances unless through the
    /// `SettingsBuilder`.
    #[doc(hidden)]
    _private_use_builder: (),
}

impl Settings {
    /// Check the values that cannot be enforced by their types alone.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 || self.chunk_size > MAX_PAYLOAD_LEN {
            return Err(Error::Config(format!(
                "chunk size must be between 1 and {} bytes, got {}",
                MAX_PAYLOAD_LEN, self.chunk_size
            )));
        }
        if self.max_retransfers == 0 {
            return Err(Error::Config(
                "at least one transmission per chunk is required".into(),
            ));
        }
        if self.response_timeout == Duration::from_secs(0) {
            return Err(Error::Config("response timeout cannot be zero".into()));
        }
        if self.queue_capacity == 0 {
            return Err(Error::Config("queue capacity cannot be zero".into()));
        }
        if self.cli_board == Some(crate::protocol::HOST_ID) {
            return Err(Error::Config("board id 0 is reserved for the host".into()));
        }
        Ok(())
    }
}

/// The builder for the `Settings` values.
///
/// All values are optional and have default values that will be used if not
/// explicitly set.
///
/// **Example**
///
/// ```
/// use flashcom::SettingsBuilder;
///
/// let settings = SettingsBuilder::new()
///     .path("/dev/ttyUSB0")
///     .parallel(true)
///     .finalize();
/// assert!(settings.parallel);
/// ```
pub struct SettingsBuilder {
    settings: Settings,
}

impl Default for SettingsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SettingsBuilder {
    /// Start building the settings using default values and no path for the
    /// port.
    pub fn new() -> Self {
        SettingsBuilder {
            settings: Settings {
                path: None,
                baud_rate: 115_200,
                data_bits: DataBits::Eight,
                flow_control: FlowControl::None,
                parity: Parity::None,
                stop_bits: StopBits::One,
                chunk_size: 2 * 1024,
                response_timeout: Duration::from_secs(5),
                max_retransfers: 5,
                parallel: false,
                queue_capacity: 100,
                hmac_key: DEFAULT_HMAC_KEY.to_vec(),
                cli_board: None,
                show_progress: true,
                _private_use_builder: (),
            },
        }
    }

    /// Set the path to the serial port
    pub fn path<'a>(mut self, path: impl Into<std::borrow::Cow<'a, str>>) -> Self {
        self.settings.path = Some(path.into().as_ref().to_owned());
        self
    }

    /// Set the baud rate in symbols-per-second
    pub fn baud_rate(mut self, baud_rate: u32) -> Self {
        self.settings.baud_rate = baud_rate;
        self
    }

    /// Set the number of bits used to represent a character sent on the line
    pub fn data_bits(mut self, data_bits: DataBits) -> Self {
        self.settings.data_bits = data_bits;
        self
    }

    /// Set the type of signalling to use for controlling data transfer
    pub fn flow_control(mut self, flow_control: FlowControl) -> Self {
        self.settings.flow_control = flow_control;
        self
    }

    /// Set the type of parity to use for error checking
    pub fn parity(mut self, parity: Parity) -> Self {
        self.settings.parity = parity;
        self
    }

    /// Set the number of bits to use to signal the end of a character
    pub fn stop_bits(mut self, stop_bits: StopBits) -> Self {
        self.settings.stop_bits = stop_bits;
        self
    }

    /// Set the maximum number of firmware bytes per data frame
    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.settings.chunk_size = chunk_size;
        self
    }

    /// Set how long to wait for a board response
    pub fn response_timeout(mut self, response_timeout: Duration) -> Self {
        self.settings.response_timeout = response_timeout;
        self
    }

    /// Set the number of transmissions allowed per data chunk
    pub fn max_retransfers(mut self, max_retransfers: u32) -> Self {
        self.settings.max_retransfers = max_retransfers;
        self
    }

    /// Update the boards concurrently (`true`) or one at a time (`false`)
    pub fn parallel(mut self, parallel: bool) -> Self {
        self.settings.parallel = parallel;
        self
    }

    /// Set the capacity of the frame queues
    pub fn queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.settings.queue_capacity = queue_capacity;
        self
    }

    /// Set the pre-shared key of the image HMAC
    pub fn hmac_key(mut self, key: impl AsRef<[u8]>) -> Self {
        self.settings.hmac_key = key.as_ref().to_vec();
        self
    }

    /// Set the board receiving the interactive CLI lines
    pub fn cli_board(mut self, board_id: u8) -> Self {
        self.settings.cli_board = Some(board_id);
        self
    }

    /// Enable or disable the progress bars
    pub fn show_progress(mut self, show_progress: bool) -> Self {
        self.settings.show_progress = show_progress;
        self
    }

    pub fn finalize(self) -> Settings {
        self.settings
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[test]
fn all_default() {
    let settings = SettingsBuilder::new().finalize();
    assert_eq!(
        settings,
        Settings {
            path: None,
            baud_rate: 115_200,
            data_bits: DataBits::Eight,
            flow_control: FlowControl::None,
            parity: Parity::None,
            stop_bits: StopBits::One,
            chunk_size: 2048,
            response_timeout: Duration::from_secs(5),
            max_retransfers: 5,
            parallel: false,
            queue_capacity: 100,
            hmac_key: b"secret_key".to_vec(),
            cli_board: None,
            show_progress: true,
            _private_use_builder: (),
        }
    );
    assert!(settings.validate().is_ok());
}

#[test]
fn path() {
    let settings = SettingsBuilder::new().path("/dev/ttyUSB0").finalize();
    assert_eq!(settings.path.unwrap(), "/dev/ttyUSB0");
}

#[test]
fn baud_rate() {
    let baud_rate = 230_400;
    let settings = SettingsBuilder::new().baud_rate(baud_rate).finalize();
    assert_eq!(settings.baud_rate, baud_rate);
}

#[test]
fn serial_line_format() {
    let settings = SettingsBuilder::new()
        .data_bits(DataBits::Seven)
        .parity(Parity::Even)
        .stop_bits(StopBits::Two)
        .flow_control(FlowControl::Hardware)
        .finalize();
    assert_eq!(settings.data_bits, DataBits::Seven);
    assert_eq!(settings.parity, Parity::Even);
    assert_eq!(settings.stop_bits, StopBits::Two);
    assert_eq!(settings.flow_control, FlowControl::Hardware);
}

#[test]
fn protocol_knobs() {
    let settings = SettingsBuilder::new()
        .chunk_size(512)
        .response_timeout(Duration::from_millis(250))
        .max_retransfers(3)
        .parallel(true)
        .cli_board(7)
        .hmac_key("other")
        .finalize();
    assert_eq!(settings.chunk_size, 512);
    assert_eq!(settings.response_timeout, Duration::from_millis(250));
    assert_eq!(settings.max_retransfers, 3);
    assert!(settings.parallel);
    assert_eq!(settings.cli_board, Some(7));
    assert_eq!(settings.hmac_key, b"other");
}

#[test]
fn chunk_size_out_of_range_is_rejected() {
    let zero = SettingsBuilder::new().chunk_size(0).finalize();
    assert!(matches!(zero.validate(), Err(Error::Config(_))));

    let huge = SettingsBuilder::new()
        .chunk_size(MAX_PAYLOAD_LEN + 1)
        .finalize();
    assert!(matches!(huge.validate(), Err(Error::Config(_))));
}

#[test]
fn host_id_cannot_be_the_cli_board() {
    let settings = SettingsBuilder::new().cli_board(0).finalize();
    assert!(matches!(settings.validate(), Err(Error::Config(_))));
}
