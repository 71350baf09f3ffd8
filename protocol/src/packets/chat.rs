use crate::codec::{PacketReader, PacketWriter};
use crate::error::Result;
use crate::opcodes::ACServerProtocol;

use super::{IncomingPacket, OutgoingPacket};

/// Session id used for messages that originate from the server itself.
pub const SERVER_SESSION_ID: u8 = 255;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChatMessage {
    pub session_id: u8,
    pub message: String,
}

impl ChatMessage {
    pub fn from_server(message: impl Into<String>) -> Self {
        ChatMessage {
            session_id: SERVER_SESSION_ID,
            message: message.into(),
        }
    }
}

impl OutgoingPacket for ChatMessage {
    fn to_writer(&self, writer: &mut PacketWriter) {
        writer.write(ACServerProtocol::Chat.repr());
        writer.write(self.session_id);
        writer.write_utf32_string(&self.message);
    }
}

impl IncomingPacket for ChatMessage {
    fn from_reader(reader: &mut PacketReader<'_>) -> Result<Self> {
        Ok(ChatMessage {
            session_id: reader.read()?,
            message: reader.read_utf32_string()?,
        })
    }
}
