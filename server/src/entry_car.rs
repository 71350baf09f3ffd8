//! Car slots from the entry list and their latest dynamic state.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use protocol::packets::{CarListEntry, PositionUpdateIn, PositionUpdateOut};
use protocol::{CarStatusFlags, Vector3};
use serde::Deserialize;

use crate::config::{EntryConfig, ValidationConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AiMode {
    /// Human drivers only.
    #[default]
    None,
    /// AI drives the slot while no human occupies it.
    Auto,
    /// Reserved for AI; humans can never take it.
    Fixed,
}

/// Snapshot of one car as last reported by its client or synthesized by AI.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CarStatus {
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

impl CarStatus {
    pub fn apply(&mut self, update: &PositionUpdateIn) {
        self.pak_sequence_id = update.pak_sequence_id;
        self.timestamp = update.timestamp;
        self.position = update.position;
        self.rotation = update.rotation;
        self.velocity = update.velocity;
        self.tyre_angular_speed = update.tyre_angular_speed;
        self.steer_angle = update.steer_angle;
        self.wheel_angle = update.wheel_angle;
        self.engine_rpm = update.engine_rpm;
        self.gear = update.gear;
        self.status_flags = update.status_flags;
        self.performance_delta = update.performance_delta;
        self.gas = update.gas;
        self.normalized_position = update.normalized_position;
    }

    pub fn to_update(&self, session_id: u8, ping: u16) -> PositionUpdateOut {
        PositionUpdateOut {
            session_id,
            pak_sequence_id: self.pak_sequence_id,
            timestamp: self.timestamp,
            ping,
            position: self.position,
            rotation: self.rotation,
            velocity: self.velocity,
            tyre_angular_speed: self.tyre_angular_speed,
            steer_angle: self.steer_angle,
            wheel_angle: self.wheel_angle,
            engine_rpm: self.engine_rpm,
            gear: self.gear,
            status_flags: self.status_flags,
            performance_delta: self.performance_delta,
            gas: self.gas,
        }
    }
}

/// Wrapping comparison of 8-bit sequence ids: `candidate` is newer when it
/// lies less than half the sequence space ahead of `current`.
pub fn is_newer_sequence(candidate: u8, current: u8) -> bool {
    (candidate.wrapping_sub(current) as i8) > 0
}

/// Rejects updates that would corrupt other clients' simulations.
pub fn validate_update(update: &PositionUpdateIn, bounds: &ValidationConfig) -> bool {
    update.position.is_finite()
        && update.rotation.is_finite()
        && update.velocity.is_finite()
        && update.normalized_position.is_finite()
        && update.position.within(bounds.max_position)
        && update.velocity.within(bounds.max_velocity)
}

#[derive(Debug, Default)]
struct SlotState {
    status: CarStatus,
    has_status: bool,
}

pub struct EntryCar {
    pub session_id: u8,
    pub model: String,
    pub skin: String,
    pub ballast_kg: f32,
    pub restrictor: f32,
    pub ai_mode: AiMode,
    pub guids: Vec<u64>,
    state: RwLock<SlotState>,
    updated: AtomicBool,
    ai_controlled: AtomicBool,
}

impl EntryCar {
    pub fn new(session_id: u8, config: &EntryConfig) -> Self {
        Self {
            session_id,
            model: config.model.clone(),
            skin: config.skin.clone(),
            ballast_kg: config.ballast_kg,
            restrictor: config.restrictor,
            ai_mode: config.ai,
            guids: config.guids.clone(),
            state: RwLock::new(SlotState::default()),
            updated: AtomicBool::new(false),
            ai_controlled: AtomicBool::new(config.ai != AiMode::None),
        }
    }

    pub fn from_config(entries: &[EntryConfig]) -> Vec<EntryCar> {
        entries
            .iter()
            .enumerate()
            .map(|(index, entry)| EntryCar::new(index as u8, entry))
            .collect()
    }

    pub fn allows_guid(&self, guid: u64) -> bool {
        self.guids.is_empty() || self.guids.contains(&guid)
    }

    /// Whether a human with `guid` asking for `model` may be placed here.
    pub fn accepts(&self, model: &str, guid: u64) -> bool {
        self.ai_mode != AiMode::Fixed && self.model == model && self.allows_guid(guid)
    }

    pub fn status(&self) -> CarStatus {
        self.state.read().status
    }

    /// Stores a validated update unless it is older than the stored one.
    /// Returns `false` for out-of-order duplicates.
    pub fn apply_update(&self, update: &PositionUpdateIn) -> bool {
        let mut state = self.state.write();
        if state.has_status && !is_newer_sequence(update.pak_sequence_id, state.status.pak_sequence_id) {
            return false;
        }
        state.status.apply(update);
        state.has_status = true;
        self.updated.store(true, Ordering::Release);
        true
    }

    /// Clears and returns the pending-update flag.
    pub fn take_update(&self) -> bool {
        self.updated.swap(false, Ordering::AcqRel)
    }

    pub fn is_ai_controlled(&self) -> bool {
        self.ai_controlled.load(Ordering::Acquire)
    }

    /// Hands the slot to a human driver.
    pub fn occupy(&self) {
        self.ai_controlled.store(false, Ordering::Release);
    }

    /// Releases the slot; Auto slots return to AI immediately.
    pub fn release(&self) {
        *self.state.write() = SlotState::default();
        self.updated.store(false, Ordering::Release);
        self.ai_controlled
            .store(self.ai_mode != AiMode::None, Ordering::Release);
    }

    pub fn list_entry(&self, driver_name: Option<&str>) -> CarListEntry {
        CarListEntry {
            session_id: self.session_id,
            model: self.model.clone(),
            skin: self.skin.clone(),
            driver_name: driver_name.unwrap_or_default().to_string(),
            connected: driver_name.is_some(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn car(ai: AiMode, guids: Vec<u64>) -> EntryCar {
        EntryCar::new(
            0,
            &EntryConfig {
                model: "car_a".to_string(),
                ai,
                guids,
                ..Default::default()
            },
        )
    }

    fn update(sequence: u8) -> PositionUpdateIn {
        PositionUpdateIn {
            pak_sequence_id: sequence,
            position: Vector3::new(1.0, 2.0, 3.0),
            velocity: Vector3::new(10.0, 0.0, 0.0),
            ..Default::default()
        }
    }

    #[test]
    fn test_sequence_wraps() {
        assert!(is_newer_sequence(1, 0));
        assert!(is_newer_sequence(0, 255));
        assert!(is_newer_sequence(10, 250));
        assert!(!is_newer_sequence(5, 5));
        assert!(!is_newer_sequence(4, 5));
        assert!(!is_newer_sequence(250, 10));
    }

    #[test]
    fn test_validation_rejects_nan_and_out_of_range() {
        let bounds = ValidationConfig::default();
        assert!(validate_update(&update(0), &bounds));

        let mut nan = update(0);
        nan.velocity.x = f32::NAN;
        assert!(!validate_update(&nan, &bounds));

        let mut far = update(0);
        far.position.z = 100_001.0;
        assert!(!validate_update(&far, &bounds));

        let mut fast = update(0);
        fast.velocity.y = -501.0;
        assert!(!validate_update(&fast, &bounds));

        let mut inf = update(0);
        inf.rotation.y = f32::INFINITY;
        assert!(!validate_update(&inf, &bounds));
    }

    #[test]
    fn test_apply_update_discards_stale() {
        let car = car(AiMode::None, vec![]);
        assert!(car.apply_update(&update(10)));
        assert!(car.take_update());
        assert!(!car.take_update());

        assert!(!car.apply_update(&update(9)));
        assert!(!car.apply_update(&update(10)));
        assert!(!car.take_update());
        assert!(car.apply_update(&update(11)));
        assert_eq!(car.status().pak_sequence_id, 11);
    }

    #[test]
    fn test_ai_control_follows_occupancy() {
        let auto = car(AiMode::Auto, vec![]);
        assert!(auto.is_ai_controlled());
        auto.occupy();
        assert!(!auto.is_ai_controlled());
        auto.release();
        assert!(auto.is_ai_controlled());

        let human = car(AiMode::None, vec![]);
        assert!(!human.is_ai_controlled());
        human.release();
        assert!(!human.is_ai_controlled());
    }

    #[test]
    fn test_accepts() {
        assert!(car(AiMode::None, vec![]).accepts("car_a", 1));
        assert!(!car(AiMode::None, vec![]).accepts("car_b", 1));
        assert!(!car(AiMode::Fixed, vec![]).accepts("car_a", 1));
        assert!(car(AiMode::Auto, vec![1]).accepts("car_a", 1));
        assert!(!car(AiMode::Auto, vec![1]).accepts("car_a", 2));
    }

    #[test]
    fn test_release_clears_status() {
        let car = car(AiMode::None, vec![]);
        car.apply_update(&update(3));
        car.release();
        assert_eq!(car.status(), CarStatus::default());
        // After release any sequence id is accepted again.
        assert!(car.apply_update(&update(0)));
    }
}
