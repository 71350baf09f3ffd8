use crate::codec::{PacketReader, PacketWriter};
use crate::error::{CodecError, Result};
use crate::opcodes::ACServerProtocol;
use crate::types::{CarStatusFlags, Vector3};

use super::{IncomingPacket, OutgoingPacket};

/// Per-datagram cap on relayed car updates, keeping batches under a typical MTU.
pub const MAX_UPDATES_PER_BATCH: usize = 20;

/// Car state reported by a client over UDP.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PositionUpdateIn {
    pub pak_sequence_id: u8,
    pub timestamp: u32,
    pub position: Vector3,
    pub rotation: Vector3,
    pub velocity: Vector3,
    pub tyre_angular_speed: [u8; 4],
    pub steer_angle: u8,
    pub wheel_angle: u8,
    pub engine_rpm: u16,
    pub gear: u8,
    pub status_flags: CarStatusFlags,
    pub performance_delta: i16,
    pub gas: u8,
    pub normalized_position: f32,
}

impl IncomingPacket for PositionUpdateIn {
    fn from_reader(reader: &mut PacketReader<'_>) -> Result<Self> {
        Ok(PositionUpdateIn {
            pak_sequence_id: reader.read()?,
            timestamp: reader.read()?,
            position: reader.read()?,
            rotation: reader.read()?,
            velocity: reader.read()?,
            tyre_angular_speed: reader.read_array()?,
            steer_angle: reader.read()?,
            wheel_angle: reader.read()?,
            engine_rpm: reader.read()?,
            gear: reader.read()?,
            status_flags: CarStatusFlags(reader.read()?),
            performance_delta: reader.read()?,
            gas: reader.read()?,
            normalized_position: reader.read()?,
        })
    }
}

impl OutgoingPacket for PositionUpdateIn {
    fn to_writer(&self, writer: &mut PacketWriter) {
        writer.write(ACServerProtocol::PositionUpdate.repr());
        writer.write(self.pak_sequence_id);
        writer.write(self.timestamp);
        writer.write(self.position);
        writer.write(self.rotation);
        writer.write(self.velocity);
        writer.write_array(&self.tyre_angular_speed);
        writer.write(self.steer_angle);
        writer.write(self.wheel_angle);
        writer.write(self.engine_rpm);
        writer.write(self.gear);
        writer.write(self.status_flags.0);
        writer.write(self.performance_delta);
        writer.write(self.gas);
        writer.write(self.normalized_position);
    }
}

/// One car's state as relayed to other clients.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PositionUpdateOut {
    pub session_id: u8,
    pub pak_sequence_id: u8,
    pub timestamp: u32,
    pub ping: u16,
    pub position: Vector3,
    pub rotation: Vector3,
    pub velocity: Vector3,
    pub tyre_angular_speed: [u8; 4],
    pub steer_angle: u8,
    pub wheel_angle: u8,
    pub engine_rpm: u16,
    pub gear: u8,
    pub status_flags: CarStatusFlags,
    pub performance_delta: i16,
    pub gas: u8,
}

impl PositionUpdateOut {
    pub const WIRE_SIZE: usize = 60;

    fn write_body(&self, writer: &mut PacketWriter) {
        writer.write(self.session_id);
        writer.write(self.pak_sequence_id);
        writer.write(self.timestamp);
        writer.write(self.ping);
        writer.write(self.position);
        writer.write(self.rotation);
        writer.write(self.velocity);
        writer.write_array(&self.tyre_angular_speed);
        writer.write(self.steer_angle);
        writer.write(self.wheel_angle);
        writer.write(self.engine_rpm);
        writer.write(self.gear);
        writer.write(self.status_flags.0);
        writer.write(self.performance_delta);
        writer.write(self.gas);
    }

    fn read_body(reader: &mut PacketReader<'_>) -> Result<Self> {
        Ok(PositionUpdateOut {
            session_id: reader.read()?,
            pak_sequence_id: reader.read()?,
            timestamp: reader.read()?,
            ping: reader.read()?,
            position: reader.read()?,
            rotation: reader.read()?,
            velocity: reader.read()?,
            tyre_angular_speed: reader.read_array()?,
            steer_angle: reader.read()?,
            wheel_angle: reader.read()?,
            engine_rpm: reader.read()?,
            gear: reader.read()?,
            status_flags: CarStatusFlags(reader.read()?),
            performance_delta: reader.read()?,
            gas: reader.read()?,
        })
    }
}

/// Several car updates for one destination packed into a single datagram.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BatchedPositionUpdate {
    pub server_time: u32,
    pub last_ping: u16,
    pub updates: Vec<PositionUpdateOut>,
}

impl OutgoingPacket for BatchedPositionUpdate {
    fn to_writer(&self, writer: &mut PacketWriter) {
        let count = self.updates.len().min(MAX_UPDATES_PER_BATCH);
        writer.write(ACServerProtocol::MegaPacket.repr());
        writer.write(self.server_time);
        writer.write(self.last_ping);
        writer.write(count as u8);
        for update in &self.updates[..count] {
            update.write_body(writer);
        }
    }
}

impl IncomingPacket for BatchedPositionUpdate {
    fn from_reader(reader: &mut PacketReader<'_>) -> Result<Self> {
        let server_time = reader.read()?;
        let last_ping = reader.read()?;
        let count = reader.read::<u8>()? as usize;
        if count > MAX_UPDATES_PER_BATCH {
            return Err(CodecError::invalid(
                "update_count",
                format!("{} exceeds {}", count, MAX_UPDATES_PER_BATCH),
            ));
        }

        let mut updates = Vec::with_capacity(count);
        for _ in 0..count {
            updates.push(PositionUpdateOut::read_body(reader)?);
        }
        Ok(BatchedPositionUpdate {
            server_time,
            last_ping,
            updates,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packets::{ClientUdpMessage, ServerUdpMessage};

    fn sample_in() -> PositionUpdateIn {
        PositionUpdateIn {
            pak_sequence_id: 200,
            timestamp: 123_456,
            position: Vector3::new(100.0, 2.5, -340.25),
            rotation: Vector3::new(1.57, 0.0, 0.01),
            velocity: Vector3::new(30.0, 0.0, -1.0),
            tyre_angular_speed: [100, 101, 102, 103],
            steer_angle: 127,
            wheel_angle: 128,
            engine_rpm: 6500,
            gear: 4,
            status_flags: CarStatusFlags(CarStatusFlags::LIGHTS_ON),
            performance_delta: -12,
            gas: 255,
            normalized_position: 0.5,
        }
    }

    #[test]
    fn test_position_update_in_layout() {
        let packet = sample_in();
        let bytes = packet.to_datagram().unwrap();
        // opcode + seq + ts + 3 vectors + wheels + steer/wheel + rpm + gear + flags + delta + gas + spline
        assert_eq!(bytes.len(), 1 + 1 + 4 + 36 + 4 + 2 + 2 + 1 + 4 + 2 + 1 + 4);
        assert_eq!(
            ClientUdpMessage::decode(&bytes).unwrap(),
            ClientUdpMessage::PositionUpdate(packet)
        );
    }

    #[test]
    fn test_nan_survives_decoding() {
        let mut packet = sample_in();
        packet.velocity.x = f32::NAN;
        let bytes = packet.to_datagram().unwrap();
        match ClientUdpMessage::decode(&bytes).unwrap() {
            ClientUdpMessage::PositionUpdate(decoded) => assert!(decoded.velocity.x.is_nan()),
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn test_batched_update_roundtrip() {
        let update = PositionUpdateOut {
            session_id: 3,
            pak_sequence_id: 17,
            timestamp: 99,
            ping: 40,
            position: Vector3::new(1.0, 2.0, 3.0),
            gear: 2,
            ..Default::default()
        };
        let packet = BatchedPositionUpdate {
            server_time: 5555,
            last_ping: 20,
            updates: vec![update, PositionUpdateOut { session_id: 4, ..update }],
        };
        let bytes = packet.to_datagram().unwrap();
        assert_eq!(bytes.len(), 1 + 4 + 2 + 1 + 2 * PositionUpdateOut::WIRE_SIZE);
        assert_eq!(
            ServerUdpMessage::decode(&bytes).unwrap(),
            ServerUdpMessage::Positions(packet)
        );
    }

    #[test]
    fn test_batch_is_capped() {
        let packet = BatchedPositionUpdate {
            server_time: 0,
            last_ping: 0,
            updates: vec![PositionUpdateOut::default(); MAX_UPDATES_PER_BATCH + 5],
        };
        let bytes = packet.to_datagram().unwrap();
        assert_eq!(bytes[7] as usize, MAX_UPDATES_PER_BATCH);
    }
}
