//! Per-point index of the slowest AI state occupying each spline point.

use parking_lot::{RwLock, RwLockUpgradableReadGuard};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlowestEntry {
    pub state_id: u64,
    pub speed: f32,
}

/// One lock per point: readers never block each other, and claiming or
/// vacating a point takes the upgradable read first so two states racing
/// for the same point serialize on that point only.
pub struct SlowestAiStates {
    points: Box<[RwLock<Option<SlowestEntry>>]>,
}

impl SlowestAiStates {
    pub fn new(num_points: usize) -> Self {
        Self {
            points: (0..num_points).map(|_| RwLock::new(None)).collect(),
        }
    }

    fn slot(&self, point_id: i32) -> Option<&RwLock<Option<SlowestEntry>>> {
        usize::try_from(point_id).ok().and_then(|i| self.points.get(i))
    }

    pub fn get(&self, point_id: i32) -> Option<SlowestEntry> {
        self.slot(point_id).and_then(|slot| *slot.read())
    }

    /// Registers `state_id` at `point_id` if the point is free, the state is
    /// slower than the current occupant, or it already is the occupant.
    /// Returns whether the entry was written.
    pub fn enter(&self, point_id: i32, state_id: u64, speed: f32) -> bool {
        let slot = match self.slot(point_id) {
            Some(slot) => slot,
            None => return false,
        };

        let guard = slot.upgradable_read();
        let claim = match *guard {
            None => true,
            Some(entry) => entry.state_id == state_id || speed < entry.speed,
        };
        if !claim {
            return false;
        }

        let mut guard = RwLockUpgradableReadGuard::upgrade(guard);
        *guard = Some(SlowestEntry { state_id, speed });
        true
    }

    /// Clears the point only if `state_id` is still the registered occupant.
    ///
    /// A slower state that claimed the point in the meantime keeps it even
    /// after it moves on, until it leaves or is overwritten itself.
    pub fn leave(&self, point_id: i32, state_id: u64) {
        let slot = match self.slot(point_id) {
            Some(slot) => slot,
            None => return,
        };

        let guard = slot.upgradable_read();
        if matches!(*guard, Some(entry) if entry.state_id == state_id) {
            let mut guard = RwLockUpgradableReadGuard::upgrade(guard);
            *guard = None;
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_enter_keeps_slowest() {
        let index = SlowestAiStates::new(4);
        assert!(index.enter(1, 10, 20.0));
        assert!(!index.enter(1, 11, 25.0));
        assert!(index.enter(1, 12, 15.0));
        assert_eq!(index.get(1), Some(SlowestEntry { state_id: 12, speed: 15.0 }));
    }

    #[test]
    fn test_occupant_may_speed_up() {
        let index = SlowestAiStates::new(2);
        index.enter(0, 1, 5.0);
        assert!(index.enter(0, 1, 30.0));
        assert_eq!(index.get(0).unwrap().speed, 30.0);
    }

    #[test]
    fn test_leave_only_removes_own_entry() {
        let index = SlowestAiStates::new(2);
        index.enter(0, 1, 10.0);
        index.enter(0, 2, 5.0);

        index.leave(0, 1);
        assert_eq!(index.get(0).unwrap().state_id, 2);

        index.leave(0, 2);
        assert_eq!(index.get(0), None);
    }

    #[test]
    fn test_out_of_range_points_are_ignored() {
        let index = SlowestAiStates::new(2);
        assert!(!index.enter(-1, 1, 1.0));
        assert!(!index.enter(2, 1, 1.0));
        index.leave(5, 1);
        assert_eq!(index.get(-1), None);
    }

    #[test]
    fn test_concurrent_enter_keeps_minimum() {
        for round in 0..20u64 {
            let index = Arc::new(SlowestAiStates::new(1));
            let mut rng = StdRng::seed_from_u64(round);
            let speeds: Vec<f32> = (0..32).map(|_| rng.gen_range(1.0..100.0)).collect();
            let expected = speeds.iter().copied().fold(f32::INFINITY, f32::min);

            let handles: Vec<_> = speeds
                .iter()
                .enumerate()
                .map(|(id, &speed)| {
                    let index = Arc::clone(&index);
                    thread::spawn(move || {
                        index.enter(0, id as u64, speed);
                    })
                })
                .collect();
            for handle in handles {
                handle.join().unwrap();
            }

            assert_eq!(index.get(0).unwrap().speed, expected);
        }
    }
}
