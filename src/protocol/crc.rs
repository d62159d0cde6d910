//! CRC-8 used as the frame trailer (polynomial `0x31`, initial value `0xFF`,
//! no reflection, no final xor), the same checksum the board firmware
//! computes.

const POLYNOMIAL: u8 = 0x31;
const INITIAL: u8 = 0xFF;

static TABLE: [u8; 256] = build_table();

const fn build_table() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut index = 0;
    while index < 256 {
        let mut crc = index as u8;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ POLYNOMIAL
            } else {
                crc << 1
            };
            bit += 1;
        }
        table[index] = crc;
        index += 1;
    }
    table
}

pub(crate) fn crc8(data: &[u8]) -> u8 {
    data.iter()
        .fold(INITIAL, |crc, byte| TABLE[(crc ^ byte) as usize])
}

// =============================================================================
// Unit Tests
// =============================================================================

#[test]
fn table_matches_board_firmware() {
    assert_eq!(&TABLE[..8], &[0x00, 0x31, 0x62, 0x53, 0xc4, 0xf5, 0xa6, 0x97]);
    assert_eq!(TABLE[16], 0x43);
    assert_eq!(&TABLE[252..], &[0xff, 0xce, 0x9d, 0xac]);
}

#[test]
fn check_value() {
    assert_eq!(crc8(b"123456789"), 0xF7);
}

#[test]
fn empty_input_yields_initial_value() {
    assert_eq!(crc8(&[]), 0xFF);
}

#[test]
fn single_byte_flip_changes_checksum() {
    let frame = [0x00, 0x03, 0x01, 0x00, 0x00];
    let mut corrupted = frame;
    corrupted[1] ^= 0x10;
    assert_ne!(crc8(&frame), crc8(&corrupted));
}
