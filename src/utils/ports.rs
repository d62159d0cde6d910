//! Serial port device manipulation.

use std::{io, thread, time::Duration};

use console::{style, Term};
use crossbeam_channel::{bounded, RecvTimeoutError};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use serialport::{available_ports, SerialPort, SerialPortType};

use crate::bridge::Link;
use crate::channels::CancelFlag;
use crate::error::{Error, Result};
use crate::utils::{poll_key, Key};
use crate::Settings;

/// Read timeout of an opened port. A frame cut short by this timeout is
/// dropped by the bridge.
const READ_TIMEOUT: Duration = Duration::from_millis(100);

//==============================================================================
// Public Interface
//==============================================================================

/// How waiting for a given port ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Ready,
    /// The user hit `Esc` to pick another port.
    Escaped,
    /// The user hit `Ctrl+C`, or the wait was cancelled.
    Interrupted,
}

/// Find the port to use: the one in `settings` once it shows up, otherwise
/// the one the user selects. Hitting `Esc` while waiting for the configured
/// port switches to the interactive selection.
pub fn resolve_port(settings: &Settings, cancel: &CancelFlag) -> Result<String> {
    if let Some(path) = &settings.path {
        match wait_for_port(path, cancel) {
            WaitOutcome::Ready => return Ok(path.clone()),
            WaitOutcome::Interrupted => return Err(Error::PortSelection),
            WaitOutcome::Escaped => {}
        }
    }

    // The user may cancel the selection to request for another refresh of
    // connected devices, probably waiting for a specific device to be
    // connected. We'll keep doing that until a device is selected.
    loop {
        if cancel.is_cancelled() {
            return Err(Error::PortSelection);
        }
        if let Some(path) = select_port(cancel)? {
            return Ok(path);
        }
    }
}

/// Present the list of connected devices to the user to interactively select
/// one, waiting for devices to show up if there are none. Returns `None` when
/// the user cancelled the selection.
pub fn select_port(cancel: &CancelFlag) -> Result<Option<String>> {
    let mut found_ports;
    let mut attempt: usize = 1;
    let waiting_period: usize = 1;

    let pb = spinner();

    // Avoid cursor flicker during the waiting
    Term::stdout().hide_cursor()?;
    // Enumerate connected USB serial devices until we have some.
    loop {
        found_ports = enumerate_usb_serial_ports();
        let num_ports = found_ports.len();
        if num_ports > 0 {
            pb.finish_with_message("Select a port to be used:");
            break;
        }
        if cancel.is_cancelled() {
            pb.abandon_with_message("❌ Port selection interrupted");
            Term::stdout().show_cursor()?;
            return Err(Error::PortSelection);
        }

        let waited = attempt * waiting_period;
        pb.set_message(format!(
            "[{:03}s {}] ⌛ Waiting for USB serial controller to be connected...",
            style(waited).dim(),
            num_ports
        ));
        attempt += 1;

        thread::sleep(Duration::from_secs(waiting_period as u64));
    }
    Term::stdout().show_cursor()?;

    // A confirmed port is returned for use; otherwise the caller refreshes the
    // list of available ports. This allows to plug the other side of the
    // serial link without restarting `flashcom`.
    let selection = select_port_interactive(&found_ports)?;
    match &selection {
        Some(path) => {
            pb.finish_with_message(format!("👍 Serial port {} is ready", style(path).green()));
        }
        None => {
            pb.finish_with_message("❌ Selection canceled -> refreshing...");
        }
    }
    Ok(selection)
}

/// Check for a device with the given path in the system. If not immediately
/// found, enter into a waiting loop, checking every period of time whether the
/// device has been created or not. While waiting, the user can interactively
/// give up on the device by pressing the `ESC` key.
pub fn wait_for_port(path: &str, cancel: &CancelFlag) -> WaitOutcome {
    let pb = spinner();

    let mut attempt: usize = 1;
    let waiting_period = 2;

    pb.set_message(format!(
        "[{:03}s] ⏳ Waiting for {} to be ready (ESC to cancel)...",
        style(0).dim(),
        style(path).cyan()
    ));

    // The main thread polls the device while a second thread listens to the
    // keyboard. The keyboard thread reports the first relevant key on
    // `key_rx` and stops when `done_rx` gets a value or is closed.
    let (key_tx, key_rx) = bounded(1);
    let (done_tx, done_rx) = bounded::<()>(1);

    let keyboard_thread = thread::spawn(move || loop {
        if !matches!(done_rx.try_recv(), Err(crossbeam_channel::TryRecvError::Empty)) {
            break;
        }
        match poll_key(Duration::from_millis(500)) {
            Ok(Key::Other) => {}
            Ok(key) => {
                let _ = key_tx.send(key);
                break;
            }
            Err(e) => {
                debug!("keyboard polling failed: {}", e);
                break;
            }
        }
    });

    let outcome = loop {
        if cancel.is_cancelled() {
            pb.abandon_with_message("❌ Waiting interrupted");
            break WaitOutcome::Interrupted;
        }

        let found_ports = enumerate_usb_serial_ports();
        if check_requested_port(&found_ports, path) {
            pb.finish_with_message(format!("👍 Serial port {} is ready", style(path).green()));
            break WaitOutcome::Ready;
        }

        // Update the progress message and wait for some time (receiving until
        // timeout from the keyboard channel) before enumerating serial
        // devices again.
        let waited = attempt * waiting_period;
        pb.set_message(format!(
            "[{:03}s] ⏳ Waiting for {} to be ready (ESC to cancel)...",
            style(waited).dim(),
            style(path).cyan()
        ));

        match key_rx.recv_timeout(Duration::from_secs(waiting_period as u64)) {
            Ok(Key::Interrupt) => {
                pb.abandon_with_message("🛑 Interrupted");
                break WaitOutcome::Interrupted;
            }
            Ok(_) => {
                pb.finish_with_message(format!(
                    "❌ Waiting on port {} canceled after {} seconds",
                    style(path).cyan(),
                    style(waited).dim()
                ));
                break WaitOutcome::Escaped;
            }
            Err(RecvTimeoutError::Timeout) => {}
            // The keyboard is gone; keep waiting for the port alone.
            Err(RecvTimeoutError::Disconnected) => {
                thread::sleep(Duration::from_secs(waiting_period as u64))
            }
        }

        attempt += 1;
    };

    drop(done_tx);
    if keyboard_thread.join().is_err() {
        warn!("keyboard thread panicked");
    }
    outcome
}

/// Open the port at `path` with the serial parameters from `settings`,
/// retrying for a few seconds while the device settles.
pub fn open_and_setup_port(settings: &Settings, path: &str) -> Result<Box<dyn SerialPort>> {
    use retry::{delay, retry_with_index};

    let result = retry_with_index(
        delay::Fixed::from_millis(1000).take(4),
        |index| -> std::result::Result<Box<dyn SerialPort>, serialport::Error> {
            debug!("Trying to connect {}", index);
            serialport::new(path, settings.baud_rate)
                .data_bits(settings.data_bits)
                .stop_bits(settings.stop_bits)
                .parity(settings.parity)
                .flow_control(settings.flow_control)
                .timeout(READ_TIMEOUT)
                .open()
        },
    );

    let mut port = match result {
        Ok(port) => port,
        Err(retry::Error::Operation {
            error,
            total_delay,
            tries,
        }) => {
            info!(
                "Failed to open the port after {:?} and {} tries: {}",
                total_delay, tries, error,
            );
            return Err(error.into());
        }
        Err(retry::Error::Internal(msg)) => {
            info!("Internal retry error while opening port: {}", msg);
            return Err(Error::Serial(serialport::Error::new(
                serialport::ErrorKind::Unknown,
                "internal error while retrying to open the port",
            )));
        }
    };

    // `serialport` does not always apply the builder values on `open`.
    port.set_baud_rate(settings.baud_rate)?;
    port.set_data_bits(settings.data_bits)?;
    port.set_stop_bits(settings.stop_bits)?;
    port.set_parity(settings.parity)?;
    port.set_flow_control(settings.flow_control)?;

    info!("Connected to {} at {} baud", path, port.baud_rate()?);
    debug!("data_bits    : {:#?}", port.data_bits()?);
    debug!("stop_bits    : {:#?}", port.stop_bits()?);
    debug!("parity       : {:#?}", port.parity()?);
    debug!("flow control : {:#?}", port.flow_control()?);

    let baud_rate = port.baud_rate()?;
    if baud_rate != settings.baud_rate {
        return Err(Error::Config(format!(
            "baud rate {} is not supported by {} (got {})",
            settings.baud_rate, path, baud_rate
        )));
    }

    Ok(port)
}

impl Link for Box<dyn SerialPort> {
    fn bytes_available(&mut self) -> io::Result<usize> {
        Ok(self.bytes_to_read()? as usize)
    }
}

//==============================================================================
// Private stuff
//==============================================================================

fn spinner() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.enable_steady_tick(120);
    pb.set_style(
        ProgressStyle::default_spinner()
            // For more spinners check out the cli-spinners project:
            // https://github.com/sindresorhus/cli-spinners/blob/master/spinners.json
            .tick_strings(&["⠋", "⠙", "⠚", "⠞", "⠖", "⠦", "⠴", "⠲", "⠳", "⠓"])
            .template("[FC] {spinner:.blue} {msg}"),
    );
    pb
}

fn check_requested_port(ports: &[String], path: &str) -> bool {
    ports.iter().any(|detected| detected.starts_with(path))
}

/// Enumerates serial devices on the system, with the USB ones described by
/// their manufacturer and product.
fn enumerate_usb_serial_ports() -> Vec<String> {
    let ports = match available_ports() {
        Ok(ports) => ports,
        Err(ref e) => {
            info!("error: {}", e);
            return Vec::new();
        }
    };
    ports
        .into_iter()
        .map(|p| match p.port_type {
            SerialPortType::UsbPort(info) => format!(
                "{}: ({} / {})",
                p.port_name,
                info.manufacturer.as_ref().map_or("", String::as_str),
                info.product.as_ref().map_or("", String::as_str)
            ),
            // Other devices, such as virtual ports for testing, are listed
            // by name only.
            _ => p.port_name,
        })
        .collect()
}

fn select_port_interactive(ports: &[String]) -> Result<Option<String>> {
    use dialoguer::{theme::ColorfulTheme, Select};

    let term = Term::buffered_stderr();
    let theme = ColorfulTheme::default();

    let mut select = Select::with_theme(&theme);
    for item in ports {
        select.item(item);
    }

    let selection = select.default(0).interact_on_opt(&term)?;
    Ok(selection
        .and_then(|x| ports.get(x))
        .and_then(|port| port.split(':').next())
        .map(String::from))
}

// =============================================================================
// Unit Tests
// =============================================================================

#[test]
fn requested_port_matches_described_names() {
    let ports = vec![
        "/dev/ttyUSB0: (FTDI / FT232R)".to_string(),
        "/dev/ttyS1".to_string(),
    ];
    assert!(check_requested_port(&ports, "/dev/ttyUSB0"));
    assert!(check_requested_port(&ports, "/dev/ttyS1"));
    assert!(!check_requested_port(&ports, "/dev/ttyACM0"));
}
