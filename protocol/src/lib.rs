//! # Wire Protocol
//!
//! Binary codec and typed packets shared by the server, the probe client and
//! the integration tests.
//!
//! ## Layout on the wire
//!
//! All values are little-endian. Booleans take exactly one byte. Strings come
//! in three flavours: ASCII with a 1 or 2 byte length prefix, UTF-32 with a
//! 1 byte prefix counting characters, and fixed-width zero padded fields.
//!
//! TCP frames carry a 2 byte length prefix that does not count itself; RCON
//! uses a 4 byte prefix. UDP datagrams carry no prefix. The first payload
//! byte of every game message is an [`opcodes::ACServerProtocol`] value.
//!
//! ## Modules
//!
//! - [`codec`]: bounds-checked [`PacketReader`] and backpatching [`PacketWriter`]
//! - [`framing`]: length prefixes and the async [`FrameReader`]
//! - [`opcodes`]: opcode enumerations for every sub-protocol
//! - [`packets`]: game packets and per-direction message enums
//! - [`rcon`]: remote console packets
//! - [`plugin`]: UDP telemetry plugin events and requests
//! - [`types`]: vectors and bit flags shared by the packets

pub mod codec;
pub mod error;
pub mod framing;
pub mod opcodes;
pub mod packets;
pub mod plugin;
pub mod rcon;
pub mod types;

pub use codec::{PacketReader, PacketWriter, StringPrefix, WirePrimitive};
pub use error::{CodecError, Result};
pub use framing::{decode_frame, FrameReader, LengthPrefix};
pub use packets::{IncomingPacket, OutgoingPacket};
pub use types::{CarStatusFlags, CspFeatures, Vector3};

/// Protocol version a client must report in its handshake.
pub const PROTOCOL_VERSION: u16 = 202;

/// Largest TCP game frame payload the server accepts.
pub const MAX_TCP_FRAME: usize = 4096;

/// Largest UDP datagram read from the socket.
pub const MAX_DATAGRAM: usize = 1500;
