//! AI traffic: spawns states near players, drives them and picks which
//! state each client sees for an AI slot.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;
use protocol::Vector3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::junction::JunctionEvaluator;
use super::slowest::SlowestAiStates;
use super::spline::AiSpline;
use super::state::{lateral_acceleration, AiState, DrivingLimits};
use crate::config::AiConfig;
use crate::entry_car::{AiMode, CarStatus, EntryCar};

struct AiSlot {
    session_id: u8,
    states: Mutex<Vec<AiState>>,
    /// Last sequence id sent to each destination session. The state a
    /// destination sees can change between ticks, the sequence must not.
    sequence_ids: Mutex<[u8; 256]>,
}

pub struct AiTraffic {
    spline: Arc<AiSpline>,
    slowest: SlowestAiStates,
    config: AiConfig,
    limits: DrivingLimits,
    slots: Vec<AiSlot>,
    rng: Mutex<StdRng>,
    next_state_id: AtomicU64,
}

impl AiTraffic {
    pub fn new(spline: Arc<AiSpline>, config: &AiConfig, cars: &[EntryCar]) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let slots = cars
            .iter()
            .filter(|car| car.ai_mode != AiMode::None)
            .map(|car| AiSlot {
                session_id: car.session_id,
                states: Mutex::new(Vec::new()),
                sequence_ids: Mutex::new([0; 256]),
            })
            .collect();

        Self {
            slowest: SlowestAiStates::new(spline.num_points()),
            spline,
            config: config.clone(),
            limits: DrivingLimits {
                max_speed: config.max_speed(),
                acceleration: config.acceleration,
                deceleration: config.deceleration,
                lateral_acceleration: lateral_acceleration(config.corner_lateral_g),
            },
            slots,
            rng: Mutex::new(rng),
            next_state_id: AtomicU64::new(1),
        }
    }

    pub fn spline(&self) -> &AiSpline {
        &self.spline
    }

    pub fn slowest(&self) -> &SlowestAiStates {
        &self.slowest
    }

    pub fn state_count(&self) -> usize {
        self.slots.iter().map(|slot| slot.states.lock().len()).sum()
    }

    /// Advances every state by `dt`, despawns states that left every
    /// player's range, then spawns at most one new state per slot.
    pub fn update(&self, cars: &[EntryCar], players: &[Vector3], dt: f32, timestamp: u32) {
        let mut rng = self.rng.lock();
        let despawn_sq = self.config.despawn_distance * self.config.despawn_distance;
        let near_player = |position: Vector3| {
            players
                .iter()
                .any(|player| player.distance_squared(position) <= despawn_sq)
        };

        let mut positions = Vec::new();
        for slot in &self.slots {
            let controlled = cars
                .get(slot.session_id as usize)
                .map_or(false, EntryCar::is_ai_controlled);
            let mut states = slot.states.lock();

            if !controlled {
                for state in states.drain(..) {
                    state.despawn(&self.slowest);
                    debug!("Despawned AI state {} from occupied slot {}", state.id, slot.session_id);
                }
                continue;
            }

            for state in states.iter_mut() {
                state.update(&self.spline, &self.slowest, &self.limits, dt, timestamp, &mut *rng);
            }
            states.retain(|state| {
                let keep = !state.is_finished() && near_player(state.position());
                if !keep {
                    state.despawn(&self.slowest);
                    debug!("Despawned AI state {} of slot {}", state.id, slot.session_id);
                }
                keep
            });
            positions.extend(states.iter().map(AiState::position));
        }

        if players.is_empty() {
            return;
        }
        for slot in &self.slots {
            let controlled = cars
                .get(slot.session_id as usize)
                .map_or(false, EntryCar::is_ai_controlled);
            let mut states = slot.states.lock();
            if !controlled || states.len() >= self.config.states_per_slot {
                continue;
            }
            if let Some(state) = self.try_spawn(slot.session_id, players, &positions, &mut *rng) {
                debug!(
                    "Spawned AI state {} for slot {} at point {}",
                    state.id,
                    slot.session_id,
                    state.current_point()
                );
                positions.push(state.position());
                states.push(state);
            }
        }
    }

    fn try_spawn<R: Rng + ?Sized>(
        &self,
        session_id: u8,
        players: &[Vector3],
        occupied: &[Vector3],
        rng: &mut R,
    ) -> Option<AiState> {
        let anchor = players[rng.gen_range(0..players.len())];
        let (start, _) = self.spline.world_to_spline(anchor);
        if start < 0 {
            return None;
        }

        let (min, max) = (self.config.min_spawn_distance, self.config.max_spawn_distance);
        let distance = if max > min { rng.gen_range(min..max) } else { min };
        let (ahead, _) = JunctionEvaluator::new().advance(&self.spline, start, distance, rng)?;
        let point_id = self.spline.random_lane(ahead, rng);
        let point = self.spline.point(point_id)?;

        let min_player_sq = min * min;
        if players
            .iter()
            .any(|player| player.distance_squared(point.position) < min_player_sq)
        {
            return None;
        }
        let min_state_sq = self.config.min_state_distance * self.config.min_state_distance;
        if occupied
            .iter()
            .any(|other| other.distance_squared(point.position) < min_state_sq)
        {
            return None;
        }

        let speed = self.limits.corner_speed(point.radius);
        let id = self.next_state_id.fetch_add(1, Ordering::Relaxed);
        AiState::spawn(id, session_id, &self.spline, &self.slowest, point_id, speed, rng)
    }

    /// Status of the slot's state closest to `position`, the one a client
    /// there is sent for this slot.
    pub fn closest_status(&self, session_id: u8, position: Vector3) -> Option<CarStatus> {
        let slot = self.slots.iter().find(|slot| slot.session_id == session_id)?;
        let states = slot.states.lock();
        states
            .iter()
            .min_by(|a, b| {
                a.position()
                    .distance_squared(position)
                    .total_cmp(&b.position().distance_squared(position))
            })
            .map(AiState::status)
    }

    /// Status relayed to `destination` for this slot: the closest state,
    /// stamped with the slot's next sequence id for that destination.
    pub fn relay_status(&self, session_id: u8, destination: u8, position: Vector3) -> Option<CarStatus> {
        let slot = self.slots.iter().find(|slot| slot.session_id == session_id)?;
        let mut status = self.closest_status(session_id, position)?;
        let mut sequence_ids = slot.sequence_ids.lock();
        let sequence = &mut sequence_ids[destination as usize];
        *sequence = sequence.wrapping_add(1);
        status.pak_sequence_id = *sequence;
        Some(status)
    }

    /// Removes every state, e.g. on session restart.
    pub fn clear(&self) {
        for slot in &self.slots {
            for state in slot.states.lock().drain(..) {
                state.despawn(&self.slowest);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::spline::straight_blob;
    use crate::config::EntryConfig;

    fn config() -> AiConfig {
        AiConfig {
            enabled: true,
            min_spawn_distance: 100.0,
            max_spawn_distance: 200.0,
            despawn_distance: 400.0,
            min_state_distance: 50.0,
            states_per_slot: 2,
            seed: Some(11),
            ..Default::default()
        }
    }

    fn cars() -> Vec<EntryCar> {
        let human = EntryConfig {
            model: "car_a".into(),
            ..Default::default()
        };
        let ai = EntryConfig {
            model: "traffic".into(),
            ai: AiMode::Auto,
            ..Default::default()
        };
        EntryCar::from_config(&[human, ai])
    }

    fn traffic(cars: &[EntryCar]) -> AiTraffic {
        let spline = AiSpline::from_blob(&straight_blob(300, 10.0)).unwrap();
        AiTraffic::new(Arc::new(spline), &config(), cars)
    }

    #[test]
    fn test_spawns_ahead_of_player() {
        let cars = cars();
        let traffic = traffic(&cars);
        let player = Vector3::new(0.0, 0.0, 0.0);

        traffic.update(&cars, &[player], 0.05, 0);
        assert_eq!(traffic.state_count(), 1);

        let status = traffic.closest_status(1, player).unwrap();
        assert!(status.position.z >= 100.0 && status.position.z <= 210.0);
        assert!(traffic.closest_status(0, player).is_none());
    }

    #[test]
    fn test_overbooking_respects_limits() {
        let cars = cars();
        let traffic = traffic(&cars);
        let player = Vector3::new(0.0, 0.0, 0.0);

        for tick in 0..200 {
            traffic.update(&cars, &[player], 0.05, tick);
            assert!(traffic.state_count() <= 2);
        }
        assert!(traffic.state_count() >= 1);
    }

    #[test]
    fn test_closest_state_is_chosen() {
        let cars = cars();
        let traffic = traffic(&cars);
        for tick in 0..400 {
            traffic.update(&cars, &[Vector3::ZERO], 0.05, tick);
            if traffic.state_count() == 2 {
                break;
            }
        }
        let slot = &traffic.slots[0];
        let positions: Vec<Vector3> = slot.states.lock().iter().map(AiState::position).collect();
        for target in &positions {
            let status = traffic.closest_status(1, *target).unwrap();
            assert_eq!(status.position, *target);
        }
    }

    #[test]
    fn test_sequence_continues_when_closest_state_changes() {
        let cars = cars();
        let traffic = traffic(&cars);
        let slowest = traffic.slowest();
        let mut rng = StdRng::seed_from_u64(5);
        {
            let mut states = traffic.slots[0].states.lock();
            let old = AiState::spawn(1, 1, traffic.spline(), slowest, 18, 10.0, &mut rng).unwrap();
            let young = AiState::spawn(2, 1, traffic.spline(), slowest, 11, 10.0, &mut rng).unwrap();
            states.push(old);
            states.push(young);
        }

        let near_old = Vector3::new(0.0, 0.0, 181.0);
        let near_young = Vector3::new(0.0, 0.0, 110.0);
        let mut last = 0u8;
        for _ in 0..20 {
            let status = traffic.relay_status(1, 0, near_old).unwrap();
            assert_eq!(status.pak_sequence_id, last.wrapping_add(1));
            last = status.pak_sequence_id;
        }

        let status = traffic.relay_status(1, 0, near_young).unwrap();
        assert_eq!(status.position.z, 110.0);
        assert_eq!(status.pak_sequence_id, 21);

        // Each destination has its own sequence.
        assert_eq!(traffic.relay_status(1, 3, near_young).unwrap().pak_sequence_id, 1);
        assert!(traffic.relay_status(0, 0, near_old).is_none());
    }

    #[test]
    fn test_no_players_no_spawns() {
        let cars = cars();
        let traffic = traffic(&cars);
        traffic.update(&cars, &[], 0.05, 0);
        assert_eq!(traffic.state_count(), 0);
    }

    #[test]
    fn test_despawn_when_slot_taken_by_human() {
        let cars = cars();
        let traffic = traffic(&cars);
        traffic.update(&cars, &[Vector3::ZERO], 0.05, 0);
        assert_eq!(traffic.state_count(), 1);

        cars[1].occupy();
        traffic.update(&cars, &[Vector3::ZERO], 0.05, 1);
        assert_eq!(traffic.state_count(), 0);
        assert!(traffic.closest_status(1, Vector3::ZERO).is_none());
    }

    #[test]
    fn test_despawn_far_from_players() {
        let cars = cars();
        let traffic = traffic(&cars);
        traffic.update(&cars, &[Vector3::ZERO], 0.05, 0);
        let first = traffic.slots[0].states.lock()[0].id;

        // The only player is now far from the state; a replacement may spawn
        // near them, but the old state is gone.
        let far = Vector3::new(5000.0, 0.0, 0.0);
        traffic.update(&cars, &[far], 0.05, 1);
        let ids: Vec<u64> = traffic.slots[0].states.lock().iter().map(|s| s.id).collect();
        assert!(!ids.contains(&first));
        assert!(ids.len() <= 1);
    }

    #[test]
    fn test_clear_releases_slowest_entries() {
        let cars = cars();
        let traffic = traffic(&cars);
        traffic.update(&cars, &[Vector3::ZERO], 0.05, 0);
        let point = traffic.slots[0].states.lock()[0].current_point();
        assert!(traffic.slowest().get(point).is_some());

        traffic.clear();
        assert_eq!(traffic.state_count(), 0);
        assert!(traffic.slowest().get(point).is_none());
    }
}
