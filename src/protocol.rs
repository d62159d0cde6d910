//! `flashcom` wire protocol: frames exchanged with the boards over the shared
//! serial link.
//!
//! Every frame has the same layout:
//!
//! ```text
//! .-----------.---------.------.-----------------.-----------.-------.
//! | source id | dest id | type | payload length  |  payload  | crc-8 |
//! |    u8     |   u8    |  u8  |     u16 BE      |  N bytes  |  u8   |
//! '-----------'---------'------'-----------------'-----------'-------'
//! ```
//!
//! The host uses the id **`0`**; boards use ids `1..=255`. The first five
//! bytes form the header from which the length of the rest of the frame is
//! known.
//!
//! **Example** - Encoding and decoding a frame:
//! ```
//! use flashcom::protocol::{self, Frame, FrameType, HOST_ID};
//!
//! let frame = Frame::new(FrameType::CliData, HOST_ID, 3, b"help\n".to_vec());
//! let raw = frame.encode();
//! assert_eq!(protocol::decode_length(&raw[..protocol::HEADER_LEN]), Some(6));
//! assert_eq!(protocol::decode(&raw).unwrap(), frame);
//! ```

mod crc;
mod frame;
mod request;

pub use frame::{
    decode, decode_length, DecodeError, Frame, FrameType, HEADER_LEN, HOST_ID, MAX_PAYLOAD_LEN,
    TRAILER_LEN,
};
pub use request::{UpdateRequest, PROTOCOL_VERSION, UPDATE_REQUEST_LEN};
