//! UDP telemetry plugin protocol.
//!
//! Events flow from the server to an external plugin endpoint without
//! acknowledgement. The plugin may send back a small set of requests.

use crate::codec::{PacketReader, PacketWriter};
use crate::error::{CodecError, Result};
use crate::opcodes::UdpPluginProtocol;
use crate::packets::OutgoingPacket;
use crate::types::Vector3;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PluginSessionInfo {
    pub protocol_version: u8,
    pub session_index: u8,
    pub current_session_index: u8,
    pub session_count: u8,
    pub server_name: String,
    pub track: String,
    pub track_config: String,
    pub name: String,
    pub session_type: u8,
    pub time_minutes: u16,
    pub laps: u16,
    pub wait_time_seconds: u16,
    pub ambient_temp: u8,
    pub road_temp: u8,
    pub weather_graphics: String,
    pub elapsed_ms: i32,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PluginConnection {
    pub driver_name: String,
    pub driver_guid: String,
    pub car_id: u8,
    pub car_model: String,
    pub car_skin: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PluginLapEntry {
    pub car_id: u8,
    pub time: u32,
    pub laps: u16,
    pub completed: bool,
}

/// Server to plugin notifications.
#[derive(Debug, Clone, PartialEq)]
pub enum PluginEvent {
    Version(u8),
    NewSession(PluginSessionInfo),
    SessionInfo(PluginSessionInfo),
    EndSession {
        report_path: String,
    },
    NewConnection(PluginConnection),
    ConnectionClosed(PluginConnection),
    ClientLoaded {
        car_id: u8,
    },
    CarUpdate {
        car_id: u8,
        position: Vector3,
        velocity: Vector3,
        gear: u8,
        engine_rpm: u16,
        normalized_position: f32,
    },
    CarInfo {
        car_id: u8,
        is_connected: bool,
        car_model: String,
        car_skin: String,
        driver_name: String,
        driver_team: String,
        driver_guid: String,
    },
    Chat {
        car_id: u8,
        message: String,
    },
    LapCompleted {
        car_id: u8,
        lap_time: u32,
        cuts: u8,
        leaderboard: Vec<PluginLapEntry>,
        grip_level: f32,
    },
    Error(String),
}

impl PluginEvent {
    pub fn opcode(&self) -> UdpPluginProtocol {
        match self {
            PluginEvent::Version(_) => UdpPluginProtocol::Version,
            PluginEvent::NewSession(_) => UdpPluginProtocol::NewSession,
            PluginEvent::SessionInfo(_) => UdpPluginProtocol::SessionInfo,
            PluginEvent::EndSession { .. } => UdpPluginProtocol::EndSession,
            PluginEvent::NewConnection(_) => UdpPluginProtocol::NewConnection,
            PluginEvent::ConnectionClosed(_) => UdpPluginProtocol::ConnectionClosed,
            PluginEvent::ClientLoaded { .. } => UdpPluginProtocol::ClientLoaded,
            PluginEvent::CarUpdate { .. } => UdpPluginProtocol::CarUpdate,
            PluginEvent::CarInfo { .. } => UdpPluginProtocol::CarInfo,
            PluginEvent::Chat { .. } => UdpPluginProtocol::Chat,
            PluginEvent::LapCompleted { .. } => UdpPluginProtocol::LapCompleted,
            PluginEvent::Error(_) => UdpPluginProtocol::Error,
        }
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut reader = PacketReader::new(payload);
        let raw = reader.read::<u8>()?;
        let opcode = UdpPluginProtocol::from_repr(raw).ok_or(CodecError::UnknownOpcode(raw))?;

        let event = match opcode {
            UdpPluginProtocol::Version => PluginEvent::Version(reader.read()?),
            UdpPluginProtocol::NewSession => PluginEvent::NewSession(read_session(&mut reader)?),
            UdpPluginProtocol::SessionInfo => PluginEvent::SessionInfo(read_session(&mut reader)?),
            UdpPluginProtocol::EndSession => PluginEvent::EndSession {
                report_path: reader.read_utf32_string()?,
            },
            UdpPluginProtocol::NewConnection => {
                PluginEvent::NewConnection(read_connection(&mut reader)?)
            }
            UdpPluginProtocol::ConnectionClosed => {
                PluginEvent::ConnectionClosed(read_connection(&mut reader)?)
            }
            UdpPluginProtocol::ClientLoaded => PluginEvent::ClientLoaded {
                car_id: reader.read()?,
            },
            UdpPluginProtocol::CarUpdate => PluginEvent::CarUpdate {
                car_id: reader.read()?,
                position: reader.read()?,
                velocity: reader.read()?,
                gear: reader.read()?,
                engine_rpm: reader.read()?,
                normalized_position: reader.read()?,
            },
            UdpPluginProtocol::CarInfo => PluginEvent::CarInfo {
                car_id: reader.read()?,
                is_connected: reader.read()?,
                car_model: reader.read_utf32_string()?,
                car_skin: reader.read_utf32_string()?,
                driver_name: reader.read_utf32_string()?,
                driver_team: reader.read_utf32_string()?,
                driver_guid: reader.read_utf32_string()?,
            },
            UdpPluginProtocol::Chat => PluginEvent::Chat {
                car_id: reader.read()?,
                message: reader.read_utf32_string()?,
            },
            UdpPluginProtocol::LapCompleted => {
                let car_id = reader.read()?;
                let lap_time = reader.read()?;
                let cuts = reader.read()?;
                let count = reader.read::<u8>()?;
                let mut leaderboard = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    leaderboard.push(PluginLapEntry {
                        car_id: reader.read()?,
                        time: reader.read()?,
                        laps: reader.read()?,
                        completed: reader.read()?,
                    });
                }
                PluginEvent::LapCompleted {
                    car_id,
                    lap_time,
                    cuts,
                    leaderboard,
                    grip_level: reader.read()?,
                }
            }
            UdpPluginProtocol::Error => PluginEvent::Error(reader.read_utf32_string()?),
            other => return Err(CodecError::UnexpectedOpcode(other.repr())),
        };

        Ok(event)
    }
}

fn write_session(writer: &mut PacketWriter, info: &PluginSessionInfo) {
    writer.write(info.protocol_version);
    writer.write(info.session_index);
    writer.write(info.current_session_index);
    writer.write(info.session_count);
    writer.write_utf32_string(&info.server_name);
    writer.write_ascii_string(&info.track);
    writer.write_ascii_string(&info.track_config);
    writer.write_ascii_string(&info.name);
    writer.write(info.session_type);
    writer.write(info.time_minutes);
    writer.write(info.laps);
    writer.write(info.wait_time_seconds);
    writer.write(info.ambient_temp);
    writer.write(info.road_temp);
    writer.write_ascii_string(&info.weather_graphics);
    writer.write(info.elapsed_ms);
}

fn read_session(reader: &mut PacketReader<'_>) -> Result<PluginSessionInfo> {
    Ok(PluginSessionInfo {
        protocol_version: reader.read()?,
        session_index: reader.read()?,
        current_session_index: reader.read()?,
        session_count: reader.read()?,
        server_name: reader.read_utf32_string()?,
        track: reader.read_ascii_string()?,
        track_config: reader.read_ascii_string()?,
        name: reader.read_ascii_string()?,
        session_type: reader.read()?,
        time_minutes: reader.read()?,
        laps: reader.read()?,
        wait_time_seconds: reader.read()?,
        ambient_temp: reader.read()?,
        road_temp: reader.read()?,
        weather_graphics: reader.read_ascii_string()?,
        elapsed_ms: reader.read()?,
    })
}

fn write_connection(writer: &mut PacketWriter, connection: &PluginConnection) {
    writer.write_utf32_string(&connection.driver_name);
    writer.write_utf32_string(&connection.driver_guid);
    writer.write(connection.car_id);
    writer.write_ascii_string(&connection.car_model);
    writer.write_ascii_string(&connection.car_skin);
}

fn read_connection(reader: &mut PacketReader<'_>) -> Result<PluginConnection> {
    Ok(PluginConnection {
        driver_name: reader.read_utf32_string()?,
        driver_guid: reader.read_utf32_string()?,
        car_id: reader.read()?,
        car_model: reader.read_ascii_string()?,
        car_skin: reader.read_ascii_string()?,
    })
}

impl OutgoingPacket for PluginEvent {
    fn to_writer(&self, writer: &mut PacketWriter) {
        writer.write(self.opcode().repr());
        match self {
            PluginEvent::Version(version) => writer.write(*version),
            PluginEvent::NewSession(info) | PluginEvent::SessionInfo(info) => {
                write_session(writer, info)
            }
            PluginEvent::EndSession { report_path } => writer.write_utf32_string(report_path),
            PluginEvent::NewConnection(connection) | PluginEvent::ConnectionClosed(connection) => {
                write_connection(writer, connection)
            }
            PluginEvent::ClientLoaded { car_id } => writer.write(*car_id),
            PluginEvent::CarUpdate {
                car_id,
                position,
                velocity,
                gear,
                engine_rpm,
                normalized_position,
            } => {
                writer.write(*car_id);
                writer.write(*position);
                writer.write(*velocity);
                writer.write(*gear);
                writer.write(*engine_rpm);
                writer.write(*normalized_position);
            }
            PluginEvent::CarInfo {
                car_id,
                is_connected,
                car_model,
                car_skin,
                driver_name,
                driver_team,
                driver_guid,
            } => {
                writer.write(*car_id);
                writer.write(*is_connected);
                writer.write_utf32_string(car_model);
                writer.write_utf32_string(car_skin);
                writer.write_utf32_string(driver_name);
                writer.write_utf32_string(driver_team);
                writer.write_utf32_string(driver_guid);
            }
            PluginEvent::Chat { car_id, message } => {
                writer.write(*car_id);
                writer.write_utf32_string(message);
            }
            PluginEvent::LapCompleted {
                car_id,
                lap_time,
                cuts,
                leaderboard,
                grip_level,
            } => {
                writer.write(*car_id);
                writer.write(*lap_time);
                writer.write(*cuts);
                writer.write(leaderboard.len().min(u8::MAX as usize) as u8);
                for entry in leaderboard.iter().take(u8::MAX as usize) {
                    writer.write(entry.car_id);
                    writer.write(entry.time);
                    writer.write(entry.laps);
                    writer.write(entry.completed);
                }
                writer.write(*grip_level);
            }
            PluginEvent::Error(message) => writer.write_utf32_string(message),
        }
    }
}

/// Plugin to server control requests.
#[derive(Debug, Clone, PartialEq)]
pub enum PluginRequest {
    RealtimePosInterval { interval_ms: u16 },
    GetCarInfo { car_id: u8 },
    SendChat { car_id: u8, message: String },
    BroadcastChat { message: String },
    /// `-1` asks for the current session.
    GetSessionInfo { session_index: i16 },
    SetSessionInfo {
        session_index: u8,
        name: String,
        session_type: u8,
        laps: u32,
        time_seconds: u32,
        wait_time_seconds: u32,
    },
    KickUser { car_id: u8 },
    NextSession,
    RestartSession,
    AdminCommand { command: String },
}

impl PluginRequest {
    pub fn opcode(&self) -> UdpPluginProtocol {
        match self {
            PluginRequest::RealtimePosInterval { .. } => UdpPluginProtocol::RealtimePosInterval,
            PluginRequest::GetCarInfo { .. } => UdpPluginProtocol::GetCarInfo,
            PluginRequest::SendChat { .. } => UdpPluginProtocol::SendChat,
            PluginRequest::BroadcastChat { .. } => UdpPluginProtocol::BroadcastChat,
            PluginRequest::GetSessionInfo { .. } => UdpPluginProtocol::GetSessionInfo,
            PluginRequest::SetSessionInfo { .. } => UdpPluginProtocol::SetSessionInfo,
            PluginRequest::KickUser { .. } => UdpPluginProtocol::KickUser,
            PluginRequest::NextSession => UdpPluginProtocol::NextSession,
            PluginRequest::RestartSession => UdpPluginProtocol::RestartSession,
            PluginRequest::AdminCommand { .. } => UdpPluginProtocol::AdminCommand,
        }
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut reader = PacketReader::new(payload);
        let raw = reader.read::<u8>()?;
        let opcode = UdpPluginProtocol::from_repr(raw).ok_or(CodecError::UnknownOpcode(raw))?;

        let request = match opcode {
            UdpPluginProtocol::RealtimePosInterval => PluginRequest::RealtimePosInterval {
                interval_ms: reader.read()?,
            },
            UdpPluginProtocol::GetCarInfo => PluginRequest::GetCarInfo {
                car_id: reader.read()?,
            },
            UdpPluginProtocol::SendChat => PluginRequest::SendChat {
                car_id: reader.read()?,
                message: reader.read_utf32_string()?,
            },
            UdpPluginProtocol::BroadcastChat => PluginRequest::BroadcastChat {
                message: reader.read_utf32_string()?,
            },
            UdpPluginProtocol::GetSessionInfo => PluginRequest::GetSessionInfo {
                session_index: reader.read()?,
            },
            UdpPluginProtocol::SetSessionInfo => PluginRequest::SetSessionInfo {
                session_index: reader.read()?,
                name: reader.read_utf32_string()?,
                session_type: reader.read()?,
                laps: reader.read()?,
                time_seconds: reader.read()?,
                wait_time_seconds: reader.read()?,
            },
            UdpPluginProtocol::KickUser => PluginRequest::KickUser {
                car_id: reader.read()?,
            },
            UdpPluginProtocol::NextSession => PluginRequest::NextSession,
            UdpPluginProtocol::RestartSession => PluginRequest::RestartSession,
            UdpPluginProtocol::AdminCommand => PluginRequest::AdminCommand {
                command: reader.read_utf32_string()?,
            },
            other => return Err(CodecError::UnexpectedOpcode(other.repr())),
        };

        Ok(request)
    }
}

impl OutgoingPacket for PluginRequest {
    fn to_writer(&self, writer: &mut PacketWriter) {
        writer.write(self.opcode().repr());
        match self {
            PluginRequest::RealtimePosInterval { interval_ms } => writer.write(*interval_ms),
            PluginRequest::GetCarInfo { car_id } | PluginRequest::KickUser { car_id } => {
                writer.write(*car_id)
            }
            PluginRequest::SendChat { car_id, message } => {
                writer.write(*car_id);
                writer.write_utf32_string(message);
            }
            PluginRequest::BroadcastChat { message } => writer.write_utf32_string(message),
            PluginRequest::GetSessionInfo { session_index } => writer.write(*session_index),
            PluginRequest::SetSessionInfo {
                session_index,
                name,
                session_type,
                laps,
                time_seconds,
                wait_time_seconds,
            } => {
                writer.write(*session_index);
                writer.write_utf32_string(name);
                writer.write(*session_type);
                writer.write(*laps);
                writer.write(*time_seconds);
                writer.write(*wait_time_seconds);
            }
            PluginRequest::NextSession | PluginRequest::RestartSession => {}
            PluginRequest::AdminCommand { command } => writer.write_utf32_string(command),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_connection_layout() {
        let event = PluginEvent::NewConnection(PluginConnection {
            driver_name: "Ann".to_string(),
            driver_guid: "123".to_string(),
            car_id: 4,
            car_model: "car_a".to_string(),
            car_skin: "red".to_string(),
        });
        let bytes = event.to_datagram().unwrap();
        assert_eq!(bytes[0], 51);
        assert_eq!(bytes[1], 3);
        assert_eq!(PluginEvent::decode(&bytes).unwrap(), event);
    }

    #[test]
    fn test_car_update_roundtrip() {
        let event = PluginEvent::CarUpdate {
            car_id: 1,
            position: Vector3::new(1.0, 2.0, 3.0),
            velocity: Vector3::new(-1.0, 0.0, 10.0),
            gear: 3,
            engine_rpm: 4200,
            normalized_position: 0.25,
        };
        let bytes = event.to_datagram().unwrap();
        assert_eq!(bytes.len(), 1 + 1 + 24 + 1 + 2 + 4);
        assert_eq!(PluginEvent::decode(&bytes).unwrap(), event);
    }

    #[test]
    fn test_session_info_roundtrip() {
        let event = PluginEvent::SessionInfo(PluginSessionInfo {
            protocol_version: 4,
            session_count: 1,
            server_name: "srv".to_string(),
            track: "track".to_string(),
            name: "Practice".to_string(),
            session_type: 1,
            time_minutes: 60,
            elapsed_ms: 1234,
            ..Default::default()
        });
        let bytes = event.to_datagram().unwrap();
        assert_eq!(PluginEvent::decode(&bytes).unwrap(), event);
    }

    #[test]
    fn test_requests_roundtrip() {
        let requests = vec![
            PluginRequest::RealtimePosInterval { interval_ms: 100 },
            PluginRequest::GetCarInfo { car_id: 2 },
            PluginRequest::SendChat {
                car_id: 2,
                message: "hi".to_string(),
            },
            PluginRequest::BroadcastChat {
                message: "all".to_string(),
            },
            PluginRequest::GetSessionInfo { session_index: -1 },
            PluginRequest::SetSessionInfo {
                session_index: 0,
                name: "Race".to_string(),
                session_type: 3,
                laps: 5,
                time_seconds: 0,
                wait_time_seconds: 60,
            },
            PluginRequest::KickUser { car_id: 9 },
            PluginRequest::NextSession,
            PluginRequest::RestartSession,
            PluginRequest::AdminCommand {
                command: "/say hello".to_string(),
            },
        ];

        for request in requests {
            let bytes = request.to_datagram().unwrap();
            assert_eq!(PluginRequest::decode(&bytes).unwrap(), request);
        }
    }

    #[test]
    fn test_event_opcode_is_not_a_request() {
        let bytes = PluginEvent::Version(4).to_datagram().unwrap();
        assert!(matches!(
            PluginRequest::decode(&bytes),
            Err(CodecError::UnexpectedOpcode(56))
        ));
    }
}
