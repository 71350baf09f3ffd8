use crate::codec::{PacketReader, PacketWriter};
use crate::error::{CodecError, Result};
use crate::opcodes::{ACServerProtocol, KickReason};

use super::{IncomingPacket, OutgoingPacket};

pub const MD5_DIGEST_LEN: usize = 16;

/// MD5 digests of the client's content files, in the server's configured order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChecksumPacket {
    pub digests: Vec<[u8; MD5_DIGEST_LEN]>,
}

impl IncomingPacket for ChecksumPacket {
    fn from_reader(reader: &mut PacketReader<'_>) -> Result<Self> {
        let count = reader.read::<u8>()?;
        let mut digests = Vec::with_capacity(count as usize);
        for _ in 0..count {
            digests.push(reader.read_array::<u8, MD5_DIGEST_LEN>()?);
        }
        Ok(ChecksumPacket { digests })
    }
}

impl OutgoingPacket for ChecksumPacket {
    fn to_writer(&self, writer: &mut PacketWriter) {
        writer.write(ACServerProtocol::Checksum.repr());
        writer.write(self.digests.len().min(u8::MAX as usize) as u8);
        for digest in self.digests.iter().take(u8::MAX as usize) {
            writer.write_array(digest);
        }
    }
}

/// Tells peers that a driver finished loading into a slot.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CarConnected {
    pub session_id: u8,
    pub name: String,
    pub nation: String,
}

impl OutgoingPacket for CarConnected {
    fn to_writer(&self, writer: &mut PacketWriter) {
        writer.write(ACServerProtocol::CarConnected.repr());
        writer.write(self.session_id);
        writer.write_utf32_string(&self.name);
        writer.write_utf32_string(&self.nation);
    }
}

impl IncomingPacket for CarConnected {
    fn from_reader(reader: &mut PacketReader<'_>) -> Result<Self> {
        Ok(CarConnected {
            session_id: reader.read()?,
            name: reader.read_utf32_string()?,
            nation: reader.read_utf32_string()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CarDisconnected {
    pub session_id: u8,
}

impl OutgoingPacket for CarDisconnected {
    fn to_writer(&self, writer: &mut PacketWriter) {
        writer.write(ACServerProtocol::CarDisconnected.repr());
        writer.write(self.session_id);
    }
}

impl IncomingPacket for CarDisconnected {
    fn from_reader(reader: &mut PacketReader<'_>) -> Result<Self> {
        Ok(CarDisconnected {
            session_id: reader.read()?,
        })
    }
}

/// Broadcast before a car is removed by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KickCar {
    pub session_id: u8,
    pub reason: KickReason,
}

impl OutgoingPacket for KickCar {
    fn to_writer(&self, writer: &mut PacketWriter) {
        writer.write(ACServerProtocol::KickCar.repr());
        writer.write(self.session_id);
        writer.write(self.reason.repr());
    }
}

impl IncomingPacket for KickCar {
    fn from_reader(reader: &mut PacketReader<'_>) -> Result<Self> {
        let session_id = reader.read()?;
        let raw = reader.read::<u8>()?;
        let reason = KickReason::from_repr(raw)
            .ok_or_else(|| CodecError::invalid("kick_reason", format!("unknown value {}", raw)))?;
        Ok(KickCar { session_id, reason })
    }
}
