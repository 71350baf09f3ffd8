use crate::codec::{PacketReader, PacketWriter};
use crate::error::Result;
use crate::opcodes::ACServerProtocol;

use super::{IncomingPacket, OutgoingPacket};

/// Associates the sender's UDP endpoint with a session. Echoed on success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CarConnect {
    pub session_id: u8,
}

impl OutgoingPacket for CarConnect {
    fn to_writer(&self, writer: &mut PacketWriter) {
        writer.write(ACServerProtocol::CarConnect.repr());
        writer.write(self.session_id);
    }
}

impl IncomingPacket for CarConnect {
    fn from_reader(reader: &mut PacketReader<'_>) -> Result<Self> {
        Ok(CarConnect {
            session_id: reader.read()?,
        })
    }
}

/// Periodic keepalive carrying the server clock and the last measured ping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PingRequest {
    pub server_time: u32,
    pub last_ping: u16,
}

impl OutgoingPacket for PingRequest {
    fn to_writer(&self, writer: &mut PacketWriter) {
        writer.write(ACServerProtocol::Ping.repr());
        writer.write(self.server_time);
        writer.write(self.last_ping);
    }
}

impl IncomingPacket for PingRequest {
    fn from_reader(reader: &mut PacketReader<'_>) -> Result<Self> {
        Ok(PingRequest {
            server_time: reader.read()?,
            last_ping: reader.read()?,
        })
    }
}

/// Client reply echoing the server clock plus its own clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PongResponse {
    pub server_time: u32,
    pub client_time: u32,
}

impl OutgoingPacket for PongResponse {
    fn to_writer(&self, writer: &mut PacketWriter) {
        writer.write(ACServerProtocol::Pong.repr());
        writer.write(self.server_time);
        writer.write(self.client_time);
    }
}

impl IncomingPacket for PongResponse {
    fn from_reader(reader: &mut PacketReader<'_>) -> Result<Self> {
        Ok(PongResponse {
            server_time: reader.read()?,
            client_time: reader.read()?,
        })
    }
}
