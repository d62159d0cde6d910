use std::io::stdout;
use std::time::Duration;

use crossterm::{
    cursor::{Hide, MoveToColumn, Show},
    event::{poll, read, Event, KeyCode, KeyEvent, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode},
    Result,
};

/// A key press the port helpers care about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Key {
    Escape,
    /// Ctrl+C, which raw mode turns into a plain key event.
    Interrupt,
    /// Any other key, or nothing within the polling period.
    Other,
}

/// Wait up to `period` for a key press, with the terminal in raw mode.
pub(crate) fn poll_key(period: Duration) -> Result<Key> {
    enable_raw_mode()?;
    execute!(stdout(), Hide)?;
    let result = poll(period);
    execute!(stdout(), MoveToColumn(0), Show)?;
    disable_raw_mode()?;

    if !result? {
        // Timeout expired with no event
        return Ok(Key::Other);
    }

    // It's guaranteed that read() wont block if `poll` returns `Ok(true)`
    let event = read()?;
    if event == Event::Key(KeyCode::Esc.into()) {
        Ok(Key::Escape)
    } else if event
        == Event::Key(KeyEvent {
            modifiers: KeyModifiers::CONTROL,
            code: KeyCode::Char('c'),
        })
    {
        Ok(Key::Interrupt)
    } else {
        Ok(Key::Other)
    }
}
