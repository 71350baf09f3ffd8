//! Session rotation and lap bookkeeping.

use std::collections::HashMap;
use std::time::Instant;

use log::info;
use parking_lot::Mutex;
use protocol::packets::{LapCompletedIncoming, LapCompletedOutgoing, LeaderboardEntry};
use protocol::opcodes::UDP_PLUGIN_PROTOCOL_VERSION;
use protocol::plugin::{PluginLapEntry, PluginSessionInfo};

use crate::config::{ServerConfig, SessionConfig, SessionKind};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LapRecord {
    pub laps: u16,
    /// Best clean lap in milliseconds, 0 when none.
    pub best_lap: u32,
    pub last_lap: u32,
    pub total_time: u64,
    pub has_finished: bool,
}

struct SessionState {
    sessions: Vec<SessionConfig>,
    index: usize,
    started: Instant,
    laps: HashMap<u8, LapRecord>,
}

pub struct SessionManager {
    state: Mutex<SessionState>,
    track_grip: f32,
}

impl SessionManager {
    pub fn new(sessions: Vec<SessionConfig>) -> Self {
        let sessions = if sessions.is_empty() {
            vec![SessionConfig::default()]
        } else {
            sessions
        };
        Self {
            state: Mutex::new(SessionState {
                sessions,
                index: 0,
                started: Instant::now(),
                laps: HashMap::new(),
            }),
            track_grip: 1.0,
        }
    }

    pub fn current(&self) -> (usize, SessionConfig) {
        let state = self.state.lock();
        (state.index, state.sessions[state.index].clone())
    }

    pub fn session_count(&self) -> usize {
        self.state.lock().sessions.len()
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.state.lock().started.elapsed().as_millis() as u64
    }

    pub fn track_grip(&self) -> f32 {
        self.track_grip
    }

    pub fn lap_record(&self, session_id: u8) -> Option<LapRecord> {
        self.state.lock().laps.get(&session_id).copied()
    }

    /// Clears a slot's laps when a new driver takes it.
    pub fn reset_car(&self, session_id: u8) {
        self.state.lock().laps.remove(&session_id);
    }

    /// Books a completed lap and returns the packet announcing it.
    /// Laps with cuts count towards the total but never as best lap.
    pub fn record_lap(&self, session_id: u8, lap: &LapCompletedIncoming) -> LapCompletedOutgoing {
        let leaderboard = {
            let mut state = self.state.lock();
            let session = state.sessions[state.index].clone();
            let record = state.laps.entry(session_id).or_default();

            record.laps = record.laps.saturating_add(1);
            record.last_lap = lap.lap_time;
            record.total_time += u64::from(lap.lap_time);
            if lap.cuts == 0 && (record.best_lap == 0 || lap.lap_time < record.best_lap) {
                record.best_lap = lap.lap_time;
            }
            if session.kind == SessionKind::Race && session.laps > 0 && record.laps >= session.laps {
                record.has_finished = true;
            }
            Self::leaderboard_of(&session, &state.laps)
        };

        LapCompletedOutgoing {
            session_id,
            lap_time: lap.lap_time,
            cuts: lap.cuts,
            leaderboard,
            track_grip: self.track_grip,
        }
    }

    pub fn leaderboard(&self) -> Vec<LeaderboardEntry> {
        let state = self.state.lock();
        Self::leaderboard_of(&state.sessions[state.index], &state.laps)
    }

    /// Races rank by laps then total time; other sessions by best lap,
    /// drivers without a clean lap last.
    fn leaderboard_of(session: &SessionConfig, laps: &HashMap<u8, LapRecord>) -> Vec<LeaderboardEntry> {
        let mut rows: Vec<(u8, LapRecord)> = laps.iter().map(|(id, record)| (*id, *record)).collect();
        if session.kind == SessionKind::Race {
            rows.sort_by(|a, b| {
                b.1.laps
                    .cmp(&a.1.laps)
                    .then(a.1.total_time.cmp(&b.1.total_time))
                    .then(a.0.cmp(&b.0))
            });
        } else {
            rows.sort_by_key(|(id, record)| {
                (record.best_lap == 0, record.best_lap, *id)
            });
        }
        rows.into_iter()
            .map(|(session_id, record)| LeaderboardEntry {
                session_id,
                best_lap: record.best_lap,
                laps: record.laps,
                has_finished: record.has_finished,
            })
            .collect()
    }

    /// Moves to the next configured session, wrapping around.
    pub fn next_session(&self) -> usize {
        let mut state = self.state.lock();
        state.index = (state.index + 1) % state.sessions.len();
        state.started = Instant::now();
        state.laps.clear();
        info!("Session {} ({}) started", state.index, state.sessions[state.index].name);
        state.index
    }

    pub fn restart_session(&self) {
        let mut state = self.state.lock();
        state.started = Instant::now();
        state.laps.clear();
        info!("Session {} restarted", state.index);
    }

    /// Replaces one session's settings. Returns false for a bad index.
    pub fn set_session(&self, index: usize, session: SessionConfig) -> bool {
        let mut state = self.state.lock();
        match state.sessions.get_mut(index) {
            Some(slot) => {
                *slot = session;
                true
            }
            None => false,
        }
    }

    /// Session info as reported to the UDP plugin. `None` selects the
    /// current session.
    pub fn plugin_info(&self, config: &ServerConfig, index: Option<usize>) -> Option<PluginSessionInfo> {
        let state = self.state.lock();
        let index = index.unwrap_or(state.index);
        let session = state.sessions.get(index)?;
        Some(PluginSessionInfo {
            protocol_version: UDP_PLUGIN_PROTOCOL_VERSION,
            session_index: index as u8,
            current_session_index: state.index as u8,
            session_count: state.sessions.len() as u8,
            server_name: config.name.clone(),
            track: config.track.clone(),
            track_config: config.track_config.clone(),
            name: session.name.clone(),
            session_type: session.kind.wire().repr(),
            time_minutes: session.time_minutes,
            laps: session.laps,
            wait_time_seconds: session.wait_time_seconds,
            ambient_temp: 26,
            road_temp: 32,
            weather_graphics: "3_clear".to_string(),
            elapsed_ms: state.started.elapsed().as_millis().min(i32::MAX as u128) as i32,
        })
    }

    pub fn plugin_leaderboard(&self) -> Vec<PluginLapEntry> {
        self.leaderboard()
            .into_iter()
            .map(|entry| PluginLapEntry {
                car_id: entry.session_id,
                time: entry.best_lap,
                laps: entry.laps,
                completed: entry.has_finished,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lap(time: u32, cuts: u8) -> LapCompletedIncoming {
        LapCompletedIncoming {
            timestamp: 0,
            lap_time: time,
            splits: vec![time / 2, time - time / 2],
            cuts,
        }
    }

    fn race(laps: u16) -> SessionConfig {
        SessionConfig {
            name: "Race".into(),
            kind: SessionKind::Race,
            laps,
            ..Default::default()
        }
    }

    #[test]
    fn test_best_lap_ignores_cuts() {
        let sessions = SessionManager::new(vec![SessionConfig::default()]);
        sessions.record_lap(0, &lap(90_000, 0));
        sessions.record_lap(0, &lap(80_000, 2));
        sessions.record_lap(0, &lap(85_000, 0));

        let record = sessions.lap_record(0).unwrap();
        assert_eq!(record.laps, 3);
        assert_eq!(record.best_lap, 85_000);
        assert_eq!(record.last_lap, 85_000);
    }

    #[test]
    fn test_practice_leaderboard_by_best_lap() {
        let sessions = SessionManager::new(vec![SessionConfig::default()]);
        sessions.record_lap(2, &lap(91_000, 0));
        sessions.record_lap(1, &lap(89_000, 0));
        let packet = sessions.record_lap(3, &lap(70_000, 1));

        let order: Vec<u8> = packet.leaderboard.iter().map(|e| e.session_id).collect();
        assert_eq!(order, vec![1, 2, 3]);
        assert_eq!(packet.session_id, 3);
        assert_eq!(packet.cuts, 1);
    }

    #[test]
    fn test_race_leaderboard_and_finish() {
        let sessions = SessionManager::new(vec![race(2)]);
        sessions.record_lap(0, &lap(100_000, 0));
        sessions.record_lap(1, &lap(90_000, 0));
        sessions.record_lap(1, &lap(90_000, 0));

        let board = sessions.leaderboard();
        assert_eq!(board[0].session_id, 1);
        assert!(board[0].has_finished);
        assert_eq!(board[1].session_id, 0);
        assert!(!board[1].has_finished);
    }

    #[test]
    fn test_next_session_wraps_and_clears() {
        let sessions = SessionManager::new(vec![SessionConfig::default(), race(5)]);
        sessions.record_lap(0, &lap(1, 0));
        assert_eq!(sessions.next_session(), 1);
        assert!(sessions.leaderboard().is_empty());
        assert_eq!(sessions.current().1.kind, SessionKind::Race);
        assert_eq!(sessions.next_session(), 0);
    }

    #[test]
    fn test_set_session_and_plugin_info() {
        let config = ServerConfig::default();
        let sessions = SessionManager::new(vec![SessionConfig::default(), race(5)]);
        assert!(sessions.set_session(1, race(12)));
        assert!(!sessions.set_session(9, race(1)));

        let info = sessions.plugin_info(&config, Some(1)).unwrap();
        assert_eq!(info.laps, 12);
        assert_eq!(info.session_index, 1);
        assert_eq!(info.current_session_index, 0);
        assert_eq!(info.session_count, 2);
        assert_eq!(info.session_type, 3);
        assert!(sessions.plugin_info(&config, Some(5)).is_none());
    }

    #[test]
    fn test_reset_car() {
        let sessions = SessionManager::new(vec![]);
        sessions.record_lap(4, &lap(1000, 0));
        sessions.reset_car(4);
        assert!(sessions.lap_record(4).is_none());
        assert_eq!(sessions.session_count(), 1);
    }
}
