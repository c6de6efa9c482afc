//! Wire protocol: framing, typed message bodies, command ids.

pub mod command;
pub mod frame;
pub mod tagstruct;

pub use command::Command;
pub use frame::{CONTROL_CHANNEL, FRAME_HEADER_LEN, FrameDecoder, FrameError, FrameHeader, encode_frame};
pub use tagstruct::{TagstructError, TagstructReader, TagstructWriter};
