//! Flashcom command line interface.

use std::fmt::Display;
use std::process;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{
    crate_authors, crate_description, crate_name, crate_version, App, AppSettings::*, Arg,
    ArgMatches,
};
use console::style;
use log::{debug, trace, LevelFilter};
use serialport::{DataBits, FlowControl, Parity, StopBits};
use simplelog::*;

use flashcom::channels::CancelFlag;
use flashcom::cli_sink::stdin_lines;
use flashcom::utils::{load_board_ids, open_and_setup_port, resolve_port};
use flashcom::{self as fc, Controller, FirmwareImage};

/// Exit code when the configuration or the environment prevents any update.
const EXIT_SETUP_ERROR: i32 = 2;
/// Exit code when at least one board was not updated.
const EXIT_UPDATE_FAILED: i32 = 1;

fn main() {
    println!("[FC] flashcom v{}", crate_version!());

    let matches = App::new(crate_name!())
        .version(format!("v{}", crate_version!()).as_str())
        .author(crate_authors!())
        .about(crate_description!())
        .long_about(
            "\n\
            Flashcom pushes a firmware image to a set of boards sharing one \
            serial link. Every board gets an update request with the number \
            of chunks in the image and the HMAC-SHA256 digest of the whole \
            image, then the image itself, one chunk at a time. A chunk is \
            sent again when the board refuses it, up to the configured number \
            of transmissions.\n\
            \n\
            Boards are updated one after the other unless `--parallel` is \
            given. With `--cli`, lines typed on stdin are sent to the board \
            selected with `--cli-board` and what the boards print is shown, \
            until `end` is typed.\n\
            \n\
            Ctrl+C cancels all the updates and shuts down gracefully; a second \
            Ctrl+C exits immediately.\
        ",
        )
        .max_term_width(80)
        .setting(ColoredHelp)
        .setting(NextLineHelp)
        .arg(
            Arg::with_name("BOARDS_FILE")
                .help("file listing the ids of the boards to update")
                .long_help(
                    "file listing the ids of the boards to update, one per \
                     line; blank lines and lines starting with `#` are \
                     ignored, id 0 is reserved for the host.",
                )
                .required(true)
                .index(1),
        )
        .arg(
            Arg::with_name("FIRMWARE")
                .help("path to the firmware image to be pushed")
                .required(true)
                .index(2),
        )
        .arg(
            Arg::with_name("DEVICE_TTY")
                .help("the USB tty device to use")
                .long_help(
                    "the USB tty device to use; when not set, or when \
                     waiting for it is cancelled with ESC, the device is \
                     selected interactively.",
                )
                .short("-t")
                .long("--tty")
                .takes_value(true)
                .require_equals(true),
        )
        .arg(
            Arg::with_name("BAUD_RATE")
                .help("serial port baud rate")
                .short("-b")
                .long("--baud-rate")
                .takes_value(true)
                .default_value("115200")
                .require_equals(true),
        )
        .arg(
            Arg::with_name("DATA_BITS")
                .help("number of bits per character")
                .short("-d")
                .long("--data-bits")
                .takes_value(true)
                .possible_values(&["5", "6", "7", "8"])
                .default_value("8")
                .require_equals(true),
        )
        .arg(
            Arg::with_name("STOP_BITS")
                .help("number of stop bits per byte")
                .short("-s")
                .long("--stop-bits")
                .takes_value(true)
                .possible_values(&["1", "2"])
                .default_value("1")
                .require_equals(true),
        )
        .arg(
            Arg::with_name("PARITY")
                .help("parity checking protocol")
                .short("-p")
                .long("--parity")
                .takes_value(true)
                .possible_values(&["none", "odd", "even"])
                .default_value("none")
                .require_equals(true),
        )
        .arg(
            Arg::with_name("FLOW_CONTROL")
                .help("flow control mode")
                .short("-f")
                .long("--flow-control")
                .takes_value(true)
                .possible_values(&["none", "soft", "hard"])
                .default_value("none")
                .require_equals(true),
        )
        .arg(
            Arg::with_name("CHUNK_SIZE")
                .help("maximum number of firmware bytes per frame")
                .long("--chunk-size")
                .takes_value(true)
                .default_value("2048")
                .require_equals(true),
        )
        .arg(
            Arg::with_name("TIMEOUT")
                .help("seconds to wait for a board to answer a frame")
                .long("--timeout")
                .takes_value(true)
                .default_value("5")
                .require_equals(true),
        )
        .arg(
            Arg::with_name("RETRIES")
                .help("transmissions of a chunk before giving up on a board")
                .long("--retries")
                .takes_value(true)
                .default_value("5")
                .require_equals(true),
        )
        .arg(
            Arg::with_name("PARALLEL")
                .help("update all the boards at the same time")
                .long("--parallel"),
        )
        .arg(
            Arg::with_name("CLI")
                .help("open an interactive channel to the boards")
                .long("--cli"),
        )
        .arg(
            Arg::with_name("CLI_BOARD")
                .help("board receiving the lines typed in the interactive channel")
                .long("--cli-board")
                .takes_value(true)
                .require_equals(true)
                .requires("CLI"),
        )
        .arg(
            Arg::with_name("NO_PROGRESS")
                .help("do not draw progress bars")
                .long("--no-progress"),
        )
        .arg(Arg::with_name("v").short("v").multiple(true).help(
            "Sets the logging level of verbosity, repeat several times for \
                higher verbosity",
        ))
        .get_matches();

    // Vary the output based on how many times the user used the "verbose" flag
    // (i.e. 'flashcom -v -v -v' or 'flashcom -vvv' vs 'flashcom -v'
    let log_level = match matches.occurrences_of("v") {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    if let Err(e) = TermLogger::init(
        log_level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    ) {
        eprintln!("failed to set up logging: {}", e);
    }

    trace!("{:#?}", matches);

    // Arguments with default values ===========================================

    // It's safe to call unwrap on all command line arguments with default
    // values, because the value with either be what the user input at runtime
    // or the default value

    let baud_rate: u32 = numeric(&matches, "BAUD_RATE", "baud-rate");
    let chunk_size: usize = numeric(&matches, "CHUNK_SIZE", "chunk-size");
    let timeout: u64 = numeric(&matches, "TIMEOUT", "timeout");
    let retries: u32 = numeric(&matches, "RETRIES", "retries");

    let data_bits = match matches.value_of("DATA_BITS").unwrap() {
        "5" => DataBits::Five,
        "6" => DataBits::Six,
        "7" => DataBits::Seven,
        "8" => DataBits::Eight,
        _ => unreachable!(),
    };

    let stop_bits = match matches.value_of("STOP_BITS").unwrap() {
        "1" => StopBits::One,
        "2" => StopBits::Two,
        _ => unreachable!(),
    };

    let parity = match matches.value_of("PARITY").unwrap() {
        "none" => Parity::None,
        "even" => Parity::Even,
        "odd" => Parity::Odd,
        _ => unreachable!(),
    };

    let flow_control = match matches.value_of("FLOW_CONTROL").unwrap() {
        "none" => FlowControl::None,
        "soft" => FlowControl::Software,
        "hard" => FlowControl::Hardware,
        _ => unreachable!(),
    };

    // END - Arguments with default values =====================================

    let mut builder = fc::SettingsBuilder::default()
        .baud_rate(baud_rate)
        .data_bits(data_bits)
        .stop_bits(stop_bits)
        .parity(parity)
        .flow_control(flow_control)
        .chunk_size(chunk_size)
        .response_timeout(Duration::from_secs(timeout))
        .max_retransfers(retries)
        .parallel(matches.is_present("PARALLEL"))
        .show_progress(!matches.is_present("NO_PROGRESS"));

    // START - Arguments with NO default values ================================

    if let Some(path) = matches.value_of("DEVICE_TTY") {
        builder = builder.path(path);
    }

    if matches.is_present("CLI_BOARD") {
        builder = builder.cli_board(numeric(&matches, "CLI_BOARD", "cli-board"));
    }

    // END - Arguments =========================================================

    let settings = builder.finalize();
    if let Err(e) = settings.validate() {
        fail(e);
    }
    debug!("{:#?}", settings);

    // Both positionals are required, clap already exited without them.
    let boards_file = matches.value_of("BOARDS_FILE").unwrap();
    let firmware_path = matches.value_of("FIRMWARE").unwrap();

    let boards = load_board_ids(boards_file).unwrap_or_else(|e| fail(e));
    let image = FirmwareImage::load(firmware_path, settings.chunk_size, &settings.hmac_key)
        .unwrap_or_else(|e| fail(e));
    println!(
        "[FC] {} ({} bytes, {} chunks) for board(s) {:?}",
        style(firmware_path).cyan(),
        image.size(),
        image.chunk_count(),
        boards
    );

    let controller = Controller::new(&settings, image, boards);

    // The first Ctrl+C cancels everything and lets the updates wind down; a
    // second one exits right away.
    let port_selection = CancelFlag::new();
    let mut interrupt = controller.interrupt_handle();
    interrupt.add(&port_selection);
    let interrupted = Arc::new(AtomicBool::new(false));
    ctrlc::set_handler(move || {
        if interrupted.swap(true, Ordering::SeqCst) {
            println!("🛑 received Ctrl+C again, exiting!");
            process::exit(130);
        }
        println!("🛑 received Ctrl+C, cancelling the updates...");
        interrupt.cancel_all();
    })
    .expect("Failed to install my Ctrl-C handler!");

    let path = resolve_port(&settings, &port_selection).unwrap_or_else(|e| fail(e));
    let port = open_and_setup_port(&settings, &path).unwrap_or_else(|e| fail(e));

    let cli_lines = if matches.is_present("CLI") {
        Some(stdin_lines(settings.queue_capacity))
    } else {
        None
    };

    // Run the updates =========================================================

    let summary = controller.run(port, cli_lines).unwrap_or_else(|e| fail(e));
    summary.print();

    let exit_code = if summary.all_succeeded() {
        0
    } else {
        EXIT_UPDATE_FAILED
    };
    debug!("exit code: {}", exit_code);
    process::exit(exit_code);
}

/// Parse the value of `name`, exiting with a message naming `option` when it
/// is not a number.
fn numeric<T: FromStr>(matches: &ArgMatches, name: &str, option: &str) -> T {
    let value = matches.value_of(name).unwrap_or_default();
    value.parse().unwrap_or_else(|_| {
        println!(
            "{}: `{}` needs to be a numeric value",
            style("error").red(),
            style(option).cyan()
        );
        println!(
            "   {} `{}` is not a valid value",
            style("-->").cyan(),
            style(value).on_red()
        );
        process::exit(EXIT_SETUP_ERROR);
    })
}

fn fail(error: impl Display) -> ! {
    println!("{}: {}", style("error").red(), error);
    process::exit(EXIT_SETUP_ERROR);
}
