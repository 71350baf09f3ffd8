use crate::codec::{PacketReader, PacketWriter};
use crate::error::Result;
use crate::opcodes::ACServerProtocol;

use super::{IncomingPacket, OutgoingPacket};

/// Sent by a client when it crosses the line.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LapCompletedIncoming {
    pub timestamp: u32,
    pub lap_time: u32,
    pub splits: Vec<u32>,
    pub cuts: u8,
}

impl IncomingPacket for LapCompletedIncoming {
    fn from_reader(reader: &mut PacketReader<'_>) -> Result<Self> {
        let timestamp = reader.read()?;
        let lap_time = reader.read()?;
        let split_count = reader.read::<u8>()?;
        let mut splits = Vec::<u32>::with_capacity(split_count as usize);
        for _ in 0..split_count {
            splits.push(reader.read()?);
        }
        let cuts = reader.read()?;
        Ok(LapCompletedIncoming {
            timestamp,
            lap_time,
            splits,
            cuts,
        })
    }
}

impl OutgoingPacket for LapCompletedIncoming {
    fn to_writer(&self, writer: &mut PacketWriter) {
        writer.write(ACServerProtocol::LapCompleted.repr());
        writer.write(self.timestamp);
        writer.write(self.lap_time);
        writer.write(self.splits.len().min(u8::MAX as usize) as u8);
        writer.write_array(&self.splits[..self.splits.len().min(u8::MAX as usize)]);
        writer.write(self.cuts);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LeaderboardEntry {
    pub session_id: u8,
    pub best_lap: u32,
    pub laps: u16,
    pub has_finished: bool,
}

/// Broadcast to everyone after a lap, with the current leaderboard.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LapCompletedOutgoing {
    pub session_id: u8,
    pub lap_time: u32,
    pub cuts: u8,
    pub leaderboard: Vec<LeaderboardEntry>,
    pub track_grip: f32,
}

impl OutgoingPacket for LapCompletedOutgoing {
    fn to_writer(&self, writer: &mut PacketWriter) {
        writer.write(ACServerProtocol::LapCompleted.repr());
        writer.write(self.session_id);
        writer.write(self.lap_time);
        writer.write(self.cuts);
        writer.write(self.leaderboard.len().min(u8::MAX as usize) as u8);
        for entry in self.leaderboard.iter().take(u8::MAX as usize) {
            writer.write(entry.session_id);
            writer.write(entry.best_lap);
            writer.write(entry.laps);
            writer.write(entry.has_finished);
        }
        writer.write(self.track_grip);
    }
}

impl IncomingPacket for LapCompletedOutgoing {
    fn from_reader(reader: &mut PacketReader<'_>) -> Result<Self> {
        let session_id = reader.read()?;
        let lap_time = reader.read()?;
        let cuts = reader.read()?;
        let count = reader.read::<u8>()?;
        let mut leaderboard = Vec::with_capacity(count as usize);
        for _ in 0..count {
            leaderboard.push(LeaderboardEntry {
                session_id: reader.read()?,
                best_lap: reader.read()?,
                laps: reader.read()?,
                has_finished: reader.read()?,
            });
        }
        Ok(LapCompletedOutgoing {
            session_id,
            lap_time,
            cuts,
            leaderboard,
            track_grip: reader.read()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packets::{ClientTcpMessage, ServerTcpMessage};

    #[test]
    fn test_incoming_lap_roundtrip() {
        let packet = LapCompletedIncoming {
            timestamp: 5000,
            lap_time: 92_345,
            splits: vec![30_000, 31_000, 31_345],
            cuts: 1,
        };
        let bytes = packet.to_datagram().unwrap();
        assert_eq!(bytes.len(), 1 + 4 + 4 + 1 + 12 + 1);
        assert_eq!(
            ClientTcpMessage::decode(&bytes).unwrap(),
            ClientTcpMessage::LapCompleted(packet)
        );
    }

    #[test]
    fn test_outgoing_lap_roundtrip() {
        let packet = LapCompletedOutgoing {
            session_id: 2,
            lap_time: 92_345,
            cuts: 0,
            leaderboard: vec![
                LeaderboardEntry {
                    session_id: 2,
                    best_lap: 92_345,
                    laps: 3,
                    has_finished: false,
                },
                LeaderboardEntry {
                    session_id: 0,
                    best_lap: 95_000,
                    laps: 2,
                    has_finished: false,
                },
            ],
            track_grip: 0.98,
        };
        let bytes = packet.to_datagram().unwrap();
        assert_eq!(
            ServerTcpMessage::decode(&bytes).unwrap(),
            ServerTcpMessage::LapCompleted(packet)
        );
    }
}
