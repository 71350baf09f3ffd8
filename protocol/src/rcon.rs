//! Remote console packets: `[request_id:i32][type:i32][body\0][\0]` inside
//! a 4-byte length-prefixed frame.

use bytes::Bytes;

use crate::codec::{PacketReader, PacketWriter};
use crate::error::{CodecError, Result};
use crate::framing::LengthPrefix;
use crate::opcodes::{RconRequestType, RconResponseType};

/// Request id returned in an auth response when the password was wrong.
pub const RCON_AUTH_FAILED_ID: i32 = -1;

/// Largest RCON frame the server accepts.
pub const MAX_RCON_FRAME: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RconPacket {
    pub request_id: i32,
    pub kind: i32,
    pub body: String,
}

impl RconPacket {
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut reader = PacketReader::new(payload);
        let request_id = reader.read::<i32>()?;
        let kind = reader.read::<i32>()?;
        let rest = reader.read_remaining();
        let end = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| CodecError::invalid("body", "missing terminator"))?;

        Ok(RconPacket {
            request_id,
            kind,
            body: String::from_utf8_lossy(&rest[..end]).into_owned(),
        })
    }

    pub fn to_frame(&self) -> Result<Bytes> {
        let mut writer = PacketWriter::framed(LengthPrefix::U32);
        writer.write(self.request_id);
        writer.write(self.kind);
        writer.write_bytes(self.body.as_bytes());
        writer.write(0u8);
        writer.write(0u8);
        writer.finish()
    }

    pub fn auth_response(request_id: i32, success: bool) -> Self {
        RconPacket {
            request_id: if success { request_id } else { RCON_AUTH_FAILED_ID },
            kind: RconResponseType::AuthResponse.repr(),
            body: String::new(),
        }
    }

    pub fn response_value(request_id: i32, body: impl Into<String>) -> Self {
        RconPacket {
            request_id,
            kind: RconResponseType::ResponseValue.repr(),
            body: body.into(),
        }
    }

    pub fn request_type(&self) -> Option<RconRequestType> {
        RconRequestType::from_repr(self.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing::decode_frame;

    #[test]
    fn test_rcon_frame_layout() {
        let packet = RconPacket {
            request_id: 7,
            kind: RconRequestType::Auth.repr(),
            body: "pw".to_string(),
        };
        let frame = packet.to_frame().unwrap();
        assert_eq!(frame.len(), 4 + 4 + 4 + 2 + 2);
        assert_eq!(&frame[..4], &[12, 0, 0, 0]);

        let (payload, consumed) = decode_frame(&frame, LengthPrefix::U32, MAX_RCON_FRAME)
            .unwrap()
            .unwrap();
        assert_eq!(consumed, frame.len());
        let decoded = RconPacket::decode(payload).unwrap();
        assert_eq!(decoded, packet);
        assert_eq!(decoded.request_type(), Some(RconRequestType::Auth));
    }

    #[test]
    fn test_auth_failure_uses_minus_one() {
        let response = RconPacket::auth_response(5, false);
        assert_eq!(response.request_id, RCON_AUTH_FAILED_ID);
        assert_eq!(response.kind, 2);
        assert_eq!(RconPacket::auth_response(5, true).request_id, 5);
    }

    #[test]
    fn test_missing_terminator() {
        let mut writer = PacketWriter::new();
        writer.write(1i32);
        writer.write(2i32);
        writer.write_bytes(b"abc");
        let bytes = writer.finish().unwrap();
        assert!(RconPacket::decode(&bytes).is_err());
    }
}
