use crate::codec::{PacketReader, PacketWriter, StringPrefix};
use crate::error::{CodecError, Result};
use crate::opcodes::{ACServerProtocol, SessionType};

use super::{IncomingPacket, OutgoingPacket};

/// First packet of every TCP session.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HandshakeRequest {
    pub client_version: u16,
    pub guid: u64,
    pub name: String,
    pub team: String,
    pub nation: String,
    pub requested_car: String,
    pub password: String,
    /// Comma separated CSP feature list.
    pub features: Option<String>,
    pub session_ticket: Option<Vec<u8>>,
}

impl IncomingPacket for HandshakeRequest {
    fn from_reader(reader: &mut PacketReader<'_>) -> Result<Self> {
        let client_version = reader.read::<u16>()?;
        let guid_text = reader.read_ascii_string()?;
        let guid = guid_text
            .parse::<u64>()
            .map_err(|e| CodecError::invalid("guid", format!("{:?}: {}", guid_text, e)))?;

        let mut request = HandshakeRequest {
            client_version,
            guid,
            name: reader.read_utf32_string()?,
            team: reader.read_ascii_string()?,
            nation: reader.read_ascii_string()?,
            requested_car: reader.read_ascii_string()?,
            password: reader.read_ascii_string()?,
            features: None,
            session_ticket: None,
        };

        if reader.remaining() >= 2 {
            request.features = Some(reader.read_ascii_string_with(StringPrefix::Short)?);
            if reader.remaining() >= 2 {
                let len = reader.read::<u16>()? as usize;
                request.session_ticket = Some(reader.read_bytes(len)?.to_vec());
            }
        }

        Ok(request)
    }
}

impl OutgoingPacket for HandshakeRequest {
    fn to_writer(&self, writer: &mut PacketWriter) {
        writer.write(ACServerProtocol::RequestNewConnection.repr());
        writer.write(self.client_version);
        writer.write_ascii_string(&self.guid.to_string());
        writer.write_utf32_string(&self.name);
        writer.write_ascii_string(&self.team);
        writer.write_ascii_string(&self.nation);
        writer.write_ascii_string(&self.requested_car);
        writer.write_ascii_string(&self.password);

        if self.features.is_some() || self.session_ticket.is_some() {
            writer.write_ascii_string_with(
                self.features.as_deref().unwrap_or_default(),
                StringPrefix::Short,
            );
            if let Some(ticket) = &self.session_ticket {
                writer.write(ticket.len() as u16);
                writer.write_bytes(ticket);
            }
        }
    }
}

/// One occupied or free slot in the car list appended to the handshake response.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CarListEntry {
    pub session_id: u8,
    pub model: String,
    pub skin: String,
    pub driver_name: String,
    pub connected: bool,
}

/// Successful handshake: session parameters and the assigned session id.
#[derive(Debug, Clone, PartialEq)]
pub struct HandshakeResponse {
    pub server_name: String,
    pub udp_port: u16,
    pub refresh_rate_hz: u8,
    pub track: String,
    pub track_config: String,
    pub car_model: String,
    pub car_skin: String,
    pub sun_angle: f32,
    pub allowed_tyres_out: i16,
    pub tyre_blankets_allowed: bool,
    pub tyre_consumption_rate: u8,
    pub fuel_consumption_rate: u8,
    pub damage_multiplier: u8,
    pub abs_allowed: u8,
    pub traction_control_allowed: u8,
    pub stability_control_allowed: bool,
    pub auto_clutch_allowed: bool,
    pub ballast_kg: f32,
    pub restrictor: f32,
    pub session_id: u8,
    pub session_type: SessionType,
    pub session_time_minutes: u16,
    pub session_laps: u16,
    pub server_time: u32,
    pub checksum_count: u8,
    pub cars: Vec<CarListEntry>,
}

impl OutgoingPacket for HandshakeResponse {
    fn to_writer(&self, writer: &mut PacketWriter) {
        writer.write(ACServerProtocol::NewCarConnection.repr());
        writer.write_utf32_string(&self.server_name);
        writer.write(self.udp_port);
        writer.write(self.refresh_rate_hz);
        writer.write_ascii_string(&self.track);
        writer.write_ascii_string(&self.track_config);
        writer.write_ascii_string(&self.car_model);
        writer.write_ascii_string(&self.car_skin);
        writer.write(self.sun_angle);
        writer.write(self.allowed_tyres_out);
        writer.write(self.tyre_blankets_allowed);
        writer.write(self.tyre_consumption_rate);
        writer.write(self.fuel_consumption_rate);
        writer.write(self.damage_multiplier);
        writer.write(self.abs_allowed);
        writer.write(self.traction_control_allowed);
        writer.write(self.stability_control_allowed);
        writer.write(self.auto_clutch_allowed);
        writer.write(self.ballast_kg);
        writer.write(self.restrictor);
        writer.write(self.session_id);
        writer.write(self.session_type.repr());
        writer.write(self.session_time_minutes);
        writer.write(self.session_laps);
        writer.write(self.server_time);
        writer.write(self.checksum_count);

        writer.write(self.cars.len().min(u8::MAX as usize) as u8);
        for car in self.cars.iter().take(u8::MAX as usize) {
            writer.write(car.session_id);
            writer.write_ascii_string(&car.model);
            writer.write_ascii_string(&car.skin);
            writer.write_utf32_string(&car.driver_name);
            writer.write(car.connected);
        }
    }
}

impl IncomingPacket for HandshakeResponse {
    fn from_reader(reader: &mut PacketReader<'_>) -> Result<Self> {
        let server_name = reader.read_utf32_string()?;
        let udp_port = reader.read()?;
        let refresh_rate_hz = reader.read()?;
        let track = reader.read_ascii_string()?;
        let track_config = reader.read_ascii_string()?;
        let car_model = reader.read_ascii_string()?;
        let car_skin = reader.read_ascii_string()?;
        let sun_angle = reader.read()?;
        let allowed_tyres_out = reader.read()?;
        let tyre_blankets_allowed = reader.read()?;
        let tyre_consumption_rate = reader.read()?;
        let fuel_consumption_rate = reader.read()?;
        let damage_multiplier = reader.read()?;
        let abs_allowed = reader.read()?;
        let traction_control_allowed = reader.read()?;
        let stability_control_allowed = reader.read()?;
        let auto_clutch_allowed = reader.read()?;
        let ballast_kg = reader.read()?;
        let restrictor = reader.read()?;
        let session_id = reader.read()?;
        let raw_session_type = reader.read::<u8>()?;
        let session_type = SessionType::from_repr(raw_session_type).ok_or_else(|| {
            CodecError::invalid("session_type", format!("unknown value {}", raw_session_type))
        })?;
        let session_time_minutes = reader.read()?;
        let session_laps = reader.read()?;
        let server_time = reader.read()?;
        let checksum_count = reader.read()?;

        let count = reader.read::<u8>()?;
        let mut cars = Vec::with_capacity(count as usize);
        for _ in 0..count {
            cars.push(CarListEntry {
                session_id: reader.read()?,
                model: reader.read_ascii_string()?,
                skin: reader.read_ascii_string()?,
                driver_name: reader.read_utf32_string()?,
                connected: reader.read()?,
            });
        }

        Ok(HandshakeResponse {
            server_name,
            udp_port,
            refresh_rate_hz,
            track,
            track_config,
            car_model,
            car_skin,
            sun_angle,
            allowed_tyres_out,
            tyre_blankets_allowed,
            tyre_consumption_rate,
            fuel_consumption_rate,
            damage_multiplier,
            abs_allowed,
            traction_control_allowed,
            stability_control_allowed,
            auto_clutch_allowed,
            ballast_kg,
            restrictor,
            session_id,
            session_type,
            session_time_minutes,
            session_laps,
            server_time,
            checksum_count,
            cars,
        })
    }
}

/// Every way a handshake can be refused. The socket is closed after sending.
#[derive(Debug, Clone, PartialEq)]
pub enum HandshakeRejection {
    WrongPassword,
    NoSlotsAvailable,
    Blacklisted,
    UnsupportedProtocol { required_version: u16 },
    AuthFailed { reason: String },
}

impl HandshakeRejection {
    pub fn opcode(&self) -> ACServerProtocol {
        match self {
            HandshakeRejection::WrongPassword => ACServerProtocol::WrongPassword,
            HandshakeRejection::NoSlotsAvailable => ACServerProtocol::NoSlotsAvailable,
            HandshakeRejection::Blacklisted => ACServerProtocol::BlacklistedOnServer,
            HandshakeRejection::UnsupportedProtocol { .. } => ACServerProtocol::UnsupportedProtocol,
            HandshakeRejection::AuthFailed { .. } => ACServerProtocol::AuthFailed,
        }
    }

    pub(super) fn from_opcode(opcode: ACServerProtocol, reader: &mut PacketReader<'_>) -> Result<Self> {
        match opcode {
            ACServerProtocol::WrongPassword => Ok(Self::WrongPassword),
            ACServerProtocol::NoSlotsAvailable => Ok(Self::NoSlotsAvailable),
            ACServerProtocol::BlacklistedOnServer => Ok(Self::Blacklisted),
            ACServerProtocol::UnsupportedProtocol => Ok(Self::UnsupportedProtocol {
                required_version: reader.read()?,
            }),
            ACServerProtocol::AuthFailed => Ok(Self::AuthFailed {
                reason: reader.read_utf32_string()?,
            }),
            other => Err(CodecError::UnexpectedOpcode(other.repr())),
        }
    }
}

impl OutgoingPacket for HandshakeRejection {
    fn to_writer(&self, writer: &mut PacketWriter) {
        writer.write(self.opcode().repr());
        match self {
            HandshakeRejection::UnsupportedProtocol { required_version } => {
                writer.write(*required_version)
            }
            HandshakeRejection::AuthFailed { reason } => writer.write_utf32_string(reason),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packets::{ClientTcpMessage, ServerTcpMessage};

    fn request() -> HandshakeRequest {
        HandshakeRequest {
            client_version: 202,
            guid: 76561198000000123,
            name: "Räikkönen".to_string(),
            team: "Team".to_string(),
            nation: "FIN".to_string(),
            requested_car: "car_a".to_string(),
            password: "secret".to_string(),
            features: None,
            session_ticket: None,
        }
    }

    #[test]
    fn test_handshake_request_roundtrip_minimal() {
        let request = request();
        let bytes = request.to_datagram().unwrap();
        match ClientTcpMessage::decode(&bytes).unwrap() {
            ClientTcpMessage::Handshake(decoded) => assert_eq!(decoded, request),
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn test_handshake_request_with_features_and_ticket() {
        let mut request = request();
        request.features = Some("SPECTATING_AWARE,CLIENT_MESSAGES".to_string());
        request.session_ticket = Some(vec![1, 2, 3, 4, 5]);

        let bytes = request.to_datagram().unwrap();
        match ClientTcpMessage::decode(&bytes).unwrap() {
            ClientTcpMessage::Handshake(decoded) => assert_eq!(decoded, request),
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn test_handshake_request_bad_guid() {
        let mut writer = PacketWriter::new();
        writer.write(ACServerProtocol::RequestNewConnection.repr());
        writer.write(202u16);
        writer.write_ascii_string("not-a-number");
        let bytes = writer.finish().unwrap();

        assert!(matches!(
            ClientTcpMessage::decode(&bytes),
            Err(CodecError::InvalidField { field: "guid", .. })
        ));
    }

    #[test]
    fn test_handshake_request_truncated() {
        let bytes = request().to_datagram().unwrap();
        let cut = &bytes[..bytes.len() - 3];
        assert!(matches!(
            ClientTcpMessage::decode(cut),
            Err(CodecError::Truncated { .. })
        ));
    }

    #[test]
    fn test_handshake_response_roundtrip() {
        let response = HandshakeResponse {
            server_name: "Traffic Server".to_string(),
            udp_port: 9600,
            refresh_rate_hz: 20,
            track: "shutoko".to_string(),
            track_config: "".to_string(),
            car_model: "car_a".to_string(),
            car_skin: "red".to_string(),
            sun_angle: 16.0,
            allowed_tyres_out: 2,
            tyre_blankets_allowed: true,
            tyre_consumption_rate: 100,
            fuel_consumption_rate: 100,
            damage_multiplier: 0,
            abs_allowed: 1,
            traction_control_allowed: 1,
            stability_control_allowed: false,
            auto_clutch_allowed: true,
            ballast_kg: 0.0,
            restrictor: 0.0,
            session_id: 4,
            session_type: SessionType::Practice,
            session_time_minutes: 60,
            session_laps: 0,
            server_time: 123_456,
            checksum_count: 2,
            cars: vec![CarListEntry {
                session_id: 0,
                model: "car_a".to_string(),
                skin: "blue".to_string(),
                driver_name: "Driver".to_string(),
                connected: true,
            }],
        };

        let bytes = response.to_datagram().unwrap();
        match ServerTcpMessage::decode(&bytes).unwrap() {
            ServerTcpMessage::HandshakeResponse(decoded) => assert_eq!(decoded, response),
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn test_rejections_roundtrip() {
        let rejections = vec![
            HandshakeRejection::WrongPassword,
            HandshakeRejection::NoSlotsAvailable,
            HandshakeRejection::Blacklisted,
            HandshakeRejection::UnsupportedProtocol {
                required_version: 202,
            },
            HandshakeRejection::AuthFailed {
                reason: "You are not whitelisted on this server".to_string(),
            },
        ];

        for rejection in rejections {
            let bytes = rejection.to_datagram().unwrap();
            assert_eq!(bytes[0], rejection.opcode().repr());
            match ServerTcpMessage::decode(&bytes).unwrap() {
                ServerTcpMessage::Rejected(decoded) => assert_eq!(decoded, rejection),
                other => panic!("unexpected message {:?}", other),
            }
        }
    }
}
