pub mod codec;
pub mod frame;
pub mod message;
pub mod transport;

pub use codec::{Decoder, DecodeError, Encoder};
pub use frame::RawFrame;
pub use message::{ClientMessage, ReferenceEntry, ServerMessage};
pub use transport::{connect, split, FrameReader, FrameWriter};
