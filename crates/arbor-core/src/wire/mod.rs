//! Byte-level protocol: MessagePack codec and the multipart envelope.

pub mod codec;
pub mod envelope;

pub use codec::CodecError;
pub use envelope::{Envelope, EnvelopeError, TimeoutPolicy};
