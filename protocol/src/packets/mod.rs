//! Typed game packets and the per-direction message enums.
//!
//! Outgoing packets write their own opcode. Incoming packets are decoded
//! after the dispatcher has consumed the opcode byte.

mod car;
mod chat;
mod csp;
mod handshake;
mod lap;
mod position;
mod udp;

pub use car::{CarConnected, CarDisconnected, ChecksumPacket, KickCar, MD5_DIGEST_LEN};
pub use chat::{ChatMessage, SERVER_SESSION_ID};
pub use csp::{CspCarVisibilityUpdate, CspClientMessage};
pub use handshake::{CarListEntry, HandshakeRejection, HandshakeRequest, HandshakeResponse};
pub use lap::{LapCompletedIncoming, LapCompletedOutgoing, LeaderboardEntry};
pub use position::{
    BatchedPositionUpdate, PositionUpdateIn, PositionUpdateOut, MAX_UPDATES_PER_BATCH,
};
pub use udp::{CarConnect, PingRequest, PongResponse};

use bytes::Bytes;

use crate::codec::{PacketReader, PacketWriter};
use crate::error::{CodecError, Result};
use crate::framing::LengthPrefix;
use crate::opcodes::{ACServerProtocol, CSPMessageTypeTcp};

pub trait OutgoingPacket {
    fn to_writer(&self, writer: &mut PacketWriter);

    /// Serializes into a 2-byte length-prefixed TCP frame.
    fn to_frame(&self) -> Result<Bytes> {
        let mut writer = PacketWriter::framed(LengthPrefix::U16);
        self.to_writer(&mut writer);
        writer.finish()
    }

    /// Serializes into a bare UDP datagram.
    fn to_datagram(&self) -> Result<Bytes> {
        let mut writer = PacketWriter::new();
        self.to_writer(&mut writer);
        writer.finish()
    }
}

pub trait IncomingPacket: Sized {
    fn from_reader(reader: &mut PacketReader<'_>) -> Result<Self>;
}

fn read_opcode(reader: &mut PacketReader<'_>) -> Result<ACServerProtocol> {
    if reader.is_empty() {
        return Err(CodecError::Empty);
    }
    let raw = reader.read::<u8>()?;
    ACServerProtocol::from_repr(raw).ok_or(CodecError::UnknownOpcode(raw))
}

/// TCP packets a client may send.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientTcpMessage {
    Handshake(HandshakeRequest),
    Checksum(ChecksumPacket),
    Chat(ChatMessage),
    LapCompleted(LapCompletedIncoming),
    CleanExitDrive,
    CspClientMessage(CspClientMessage),
    /// A known opcode the server relays nothing for.
    Ignored(ACServerProtocol),
}

impl ClientTcpMessage {
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut reader = PacketReader::new(payload);
        let opcode = read_opcode(&mut reader)?;

        let message = match opcode {
            ACServerProtocol::RequestNewConnection => {
                Self::Handshake(HandshakeRequest::from_reader(&mut reader)?)
            }
            ACServerProtocol::Checksum => Self::Checksum(ChecksumPacket::from_reader(&mut reader)?),
            ACServerProtocol::Chat => Self::Chat(ChatMessage::from_reader(&mut reader)?),
            ACServerProtocol::LapCompleted => {
                Self::LapCompleted(LapCompletedIncoming::from_reader(&mut reader)?)
            }
            ACServerProtocol::CleanExitDrive => Self::CleanExitDrive,
            ACServerProtocol::Extended => {
                let raw = reader.read::<u8>()?;
                match CSPMessageTypeTcp::from_repr(raw) {
                    Some(CSPMessageTypeTcp::ClientMessage) => {
                        Self::CspClientMessage(CspClientMessage::from_reader(&mut reader)?)
                    }
                    Some(_) => Self::Ignored(opcode),
                    None => return Err(CodecError::UnknownOpcode(raw)),
                }
            }
            other => Self::Ignored(other),
        };

        Ok(message)
    }
}

/// UDP datagrams a client may send.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientUdpMessage {
    CarConnect(CarConnect),
    PositionUpdate(PositionUpdateIn),
    Pong(PongResponse),
}

impl ClientUdpMessage {
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut reader = PacketReader::new(payload);
        match read_opcode(&mut reader)? {
            ACServerProtocol::CarConnect => Ok(Self::CarConnect(CarConnect::from_reader(&mut reader)?)),
            ACServerProtocol::PositionUpdate => Ok(Self::PositionUpdate(
                PositionUpdateIn::from_reader(&mut reader)?,
            )),
            ACServerProtocol::Pong => Ok(Self::Pong(PongResponse::from_reader(&mut reader)?)),
            other => Err(CodecError::UnexpectedOpcode(other.repr())),
        }
    }
}

/// TCP packets the server sends, decoded on the client side.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerTcpMessage {
    HandshakeResponse(HandshakeResponse),
    Rejected(HandshakeRejection),
    CarConnected(CarConnected),
    CarDisconnected(CarDisconnected),
    Chat(ChatMessage),
    LapCompleted(LapCompletedOutgoing),
    KickCar(KickCar),
    CspClientMessage(CspClientMessage),
    CspCarVisibility(CspCarVisibilityUpdate),
}

impl ServerTcpMessage {
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut reader = PacketReader::new(payload);
        let opcode = read_opcode(&mut reader)?;

        let message = match opcode {
            ACServerProtocol::NewCarConnection => {
                Self::HandshakeResponse(HandshakeResponse::from_reader(&mut reader)?)
            }
            ACServerProtocol::WrongPassword
            | ACServerProtocol::NoSlotsAvailable
            | ACServerProtocol::BlacklistedOnServer
            | ACServerProtocol::UnsupportedProtocol
            | ACServerProtocol::AuthFailed => {
                Self::Rejected(HandshakeRejection::from_opcode(opcode, &mut reader)?)
            }
            ACServerProtocol::CarConnected => {
                Self::CarConnected(CarConnected::from_reader(&mut reader)?)
            }
            ACServerProtocol::CarDisconnected => {
                Self::CarDisconnected(CarDisconnected::from_reader(&mut reader)?)
            }
            ACServerProtocol::Chat => Self::Chat(ChatMessage::from_reader(&mut reader)?),
            ACServerProtocol::LapCompleted => {
                Self::LapCompleted(LapCompletedOutgoing::from_reader(&mut reader)?)
            }
            ACServerProtocol::KickCar => Self::KickCar(KickCar::from_reader(&mut reader)?),
            ACServerProtocol::Extended => {
                let raw = reader.read::<u8>()?;
                match CSPMessageTypeTcp::from_repr(raw) {
                    Some(CSPMessageTypeTcp::ClientMessage) => {
                        Self::CspClientMessage(CspClientMessage::from_reader(&mut reader)?)
                    }
                    Some(CSPMessageTypeTcp::CarVisibilityUpdate) => {
                        Self::CspCarVisibility(CspCarVisibilityUpdate::from_reader(&mut reader)?)
                    }
                    _ => return Err(CodecError::UnknownOpcode(raw)),
                }
            }
            other => return Err(CodecError::UnexpectedOpcode(other.repr())),
        };

        Ok(message)
    }
}

/// UDP datagrams the server sends, decoded on the client side.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerUdpMessage {
    CarConnect(CarConnect),
    Ping(PingRequest),
    Positions(BatchedPositionUpdate),
}

impl ServerUdpMessage {
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut reader = PacketReader::new(payload);
        match read_opcode(&mut reader)? {
            ACServerProtocol::CarConnect => Ok(Self::CarConnect(CarConnect::from_reader(&mut reader)?)),
            ACServerProtocol::Ping => Ok(Self::Ping(PingRequest::from_reader(&mut reader)?)),
            ACServerProtocol::MegaPacket => Ok(Self::Positions(
                BatchedPositionUpdate::from_reader(&mut reader)?,
            )),
            other => Err(CodecError::UnexpectedOpcode(other.repr())),
        }
    }
}
