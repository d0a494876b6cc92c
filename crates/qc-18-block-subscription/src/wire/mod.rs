//! Frame Codec: outbound length-prefixed frames, inbound command decoding.

pub mod command;
pub mod frame;

pub use command::{
    Command, CommandDecoder, RawCommand, CMD_SUBSCRIBE_ACCEPTED, CMD_SUBSCRIBE_IRREVERSIBLE,
};
pub use frame::{decode_frame, encode_frame, LENGTH_PREFIX_SIZE};
