use crate::codec::{PacketReader, PacketWriter};
use crate::error::Result;
use crate::opcodes::{ACServerProtocol, CSPClientMessageType, CSPMessageTypeTcp};

use super::{IncomingPacket, OutgoingPacket};

/// Opaque CSP client message relayed between clients.
///
/// `session_id` is the target when sent by a client (255 for everyone) and
/// the origin when relayed by the server.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CspClientMessage {
    pub session_id: u8,
    pub message_type: u16,
    /// Present only for [`CSPClientMessageType::LuaMessage`].
    pub lua_type: Option<u32>,
    pub data: Vec<u8>,
}

impl CspClientMessage {
    pub fn is_lua(&self) -> bool {
        self.message_type == CSPClientMessageType::LuaMessage.repr()
    }
}

impl IncomingPacket for CspClientMessage {
    fn from_reader(reader: &mut PacketReader<'_>) -> Result<Self> {
        let session_id = reader.read()?;
        let message_type = reader.read::<u16>()?;
        let lua_type = if message_type == CSPClientMessageType::LuaMessage.repr() {
            Some(reader.read::<u32>()?)
        } else {
            None
        };
        Ok(CspClientMessage {
            session_id,
            message_type,
            lua_type,
            data: reader.read_remaining().to_vec(),
        })
    }
}

impl OutgoingPacket for CspClientMessage {
    fn to_writer(&self, writer: &mut PacketWriter) {
        writer.write(ACServerProtocol::Extended.repr());
        writer.write(CSPMessageTypeTcp::ClientMessage.repr());
        writer.write(self.session_id);
        writer.write(self.message_type);
        if let Some(lua_type) = self.lua_type {
            writer.write(lua_type);
        }
        writer.write_bytes(&self.data);
    }
}

/// Hides or shows a car on a CSP client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CspCarVisibilityUpdate {
    pub session_id: u8,
    pub visible: bool,
}

impl OutgoingPacket for CspCarVisibilityUpdate {
    fn to_writer(&self, writer: &mut PacketWriter) {
        writer.write(ACServerProtocol::Extended.repr());
        writer.write(CSPMessageTypeTcp::CarVisibilityUpdate.repr());
        writer.write(self.session_id);
        writer.write(self.visible);
    }
}

impl IncomingPacket for CspCarVisibilityUpdate {
    fn from_reader(reader: &mut PacketReader<'_>) -> Result<Self> {
        Ok(CspCarVisibilityUpdate {
            session_id: reader.read()?,
            visible: reader.read()?,
        })
    }
}
