//! Loading the list of boards to update.
//!
//! The list is a text file with one board id per line. Blank lines and lines
//! starting with `#` are skipped. Lines that are not a valid board id are
//! reported and left out, so are repeated ids.

use std::fs;
use std::path::Path;

use log::{info, warn};

use crate::error::{Error, Result};
use crate::protocol::HOST_ID;

/// Board ids found in `text`, in order of first appearance.
pub fn parse_board_ids(text: &str) -> Vec<u8> {
    let mut boards: Vec<u8> = Vec::new();
    for (index, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let number = index + 1;

        let board_id = match line.parse::<u8>() {
            Ok(board_id) => board_id,
            Err(e) => {
                warn!("line {}: `{}` is not a board id ({})", number, line, e);
                continue;
            }
        };
        if board_id == HOST_ID {
            warn!("line {}: board id {} is reserved for the host", number, HOST_ID);
            continue;
        }
        if boards.contains(&board_id) {
            warn!("line {}: board {} listed more than once", number, board_id);
            continue;
        }

        info!("added board {}", board_id);
        boards.push(board_id);
    }
    boards
}

/// Read the board ids from the file at `path`. A file without any valid id is
/// an error.
pub fn load_board_ids(path: impl AsRef<Path>) -> Result<Vec<u8>> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)?;
    let boards = parse_board_ids(&text);
    if boards.is_empty() {
        return Err(Error::NoBoards(path.display().to_string()));
    }
    Ok(boards)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[test]
fn one_id_per_line() {
    assert_eq!(parse_board_ids("1\n2\n 17 \n255"), vec![1, 2, 17, 255]);
}

#[test]
fn host_id_is_rejected() {
    assert_eq!(parse_board_ids("0\n3\n0"), vec![3]);
}

#[test]
fn junk_blanks_and_comments_are_skipped() {
    let text = "# boards on the left rack\n\n4\nfour\n256\n-1\n\r\n5 # not a comment\n6\r\n";
    assert_eq!(parse_board_ids(text), vec![4, 6]);
}

#[test]
fn duplicates_keep_the_first_position() {
    assert_eq!(parse_board_ids("9\n3\n9\n3\n1"), vec![9, 3, 1]);
}

#[test]
fn load_from_file() {
    use std::io::Write;

    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "12\n0\n34").unwrap();
    assert_eq!(load_board_ids(file.path()).unwrap(), vec![12, 34]);
}

#[test]
fn file_without_valid_ids_is_an_error() {
    use std::io::Write;

    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "0\n# nothing here").unwrap();
    assert!(matches!(load_board_ids(file.path()), Err(Error::NoBoards(_))));
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("boards.txt");
    assert!(matches!(load_board_ids(&missing), Err(Error::Io(_))));
}
