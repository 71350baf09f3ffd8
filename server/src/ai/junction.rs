//! Junction-aware traversal of the spline graph.

use std::collections::HashMap;

use rand::Rng;

use super::spline::{AiSpline, SplineJunction};

/// Remembers which branch was chosen at each junction so repeated lookahead
/// from the same AI state keeps returning the same path.
///
/// One evaluator per AI state. Randomness comes from the caller.
#[derive(Debug, Default, Clone)]
pub struct JunctionEvaluator {
    decisions: HashMap<i32, bool>,
}

impl JunctionEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decides once whether `junction` is taken; later calls return the
    /// remembered answer until [`forget`](Self::forget) is called.
    pub fn evaluate<R: Rng + ?Sized>(&mut self, junction: &SplineJunction, rng: &mut R) -> bool {
        *self
            .decisions
            .entry(junction.id)
            .or_insert_with(|| rng.gen::<f32>() < junction.probability)
    }

    /// Peeks at a decision without rolling.
    pub fn decision(&self, junction_id: i32) -> Option<bool> {
        self.decisions.get(&junction_id).copied()
    }

    pub fn forget(&mut self, junction_id: i32) {
        self.decisions.remove(&junction_id);
    }

    pub fn clear(&mut self) {
        self.decisions.clear();
    }

    /// Walks `count` points forward. Returns -1 if the lane ends first.
    pub fn next<R: Rng + ?Sized>(
        &mut self,
        spline: &AiSpline,
        point_id: i32,
        count: usize,
        rng: &mut R,
    ) -> i32 {
        self.walk_forward(spline, point_id, count, false, rng)
    }

    /// Like [`next`](Self::next) but always takes any junction on the way.
    /// Forced traversals are not remembered.
    pub fn next_forced<R: Rng + ?Sized>(
        &mut self,
        spline: &AiSpline,
        point_id: i32,
        count: usize,
        rng: &mut R,
    ) -> i32 {
        self.walk_forward(spline, point_id, count, true, rng)
    }

    fn walk_forward<R: Rng + ?Sized>(
        &mut self,
        spline: &AiSpline,
        point_id: i32,
        count: usize,
        force_junction: bool,
        rng: &mut R,
    ) -> i32 {
        let mut current = point_id;
        for _ in 0..count {
            let point = match spline.point(current) {
                Some(point) => point,
                None => return -1,
            };

            current = match spline.junction(point.junction_start_id) {
                Some(junction) if force_junction || self.evaluate(&junction, rng) => junction.end_id,
                _ => point.next_id,
            };
            if current < 0 {
                return -1;
            }
        }
        current
    }

    /// Walks `count` points backward, entering junctions from their end.
    pub fn previous<R: Rng + ?Sized>(
        &mut self,
        spline: &AiSpline,
        point_id: i32,
        count: usize,
        rng: &mut R,
    ) -> i32 {
        let mut current = point_id;
        for _ in 0..count {
            let point = match spline.point(current) {
                Some(point) => point,
                None => return -1,
            };

            current = match spline.junction(point.junction_end_id) {
                Some(junction) if self.evaluate(&junction, rng) => junction.start_id,
                _ => point.previous_id,
            };
            if current < 0 {
                return -1;
            }
        }
        current
    }

    /// Walks forward until at least `distance` meters have been covered.
    /// Returns the reached point and the distance actually travelled, or
    /// `None` if the lane ends first.
    pub fn advance<R: Rng + ?Sized>(
        &mut self,
        spline: &AiSpline,
        point_id: i32,
        distance: f32,
        rng: &mut R,
    ) -> Option<(i32, f32)> {
        let mut current = point_id;
        let mut travelled = 0.0;
        // Bounded so a zero-length loop cannot spin forever.
        for _ in 0..spline.num_points().max(1) {
            if travelled >= distance {
                return Some((current, travelled));
            }
            let point = spline.point(current)?;
            let next = self.next(spline, current, 1, rng);
            if next < 0 {
                return None;
            }
            travelled += point.length.max(0.0);
            current = next;
        }
        Some((current, travelled))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::spline::{straight_blob, SplineBlob, SplinePoint};
    use protocol::{CarStatusFlags, Vector3};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    /// Main lane 0..=9 along +z, a branch lane 10..=14 leaving at point 3.
    fn forked_spline(probability: f32) -> AiSpline {
        let mut blob: SplineBlob = straight_blob(10, 10.0);
        for i in 0..5 {
            let id = 10 + i;
            blob.points.push(SplinePoint {
                id,
                position: Vector3::new(10.0 + i as f32 * 10.0, 0.0, 40.0),
                length: 10.0,
                previous_id: if i > 0 { id - 1 } else { -1 },
                next_id: if i < 4 { id + 1 } else { -1 },
                ..Default::default()
            });
        }
        blob.junctions.push(SplineJunction {
            id: 0,
            start_id: 3,
            end_id: 10,
            probability,
            indicate_when_taken: CarStatusFlags(CarStatusFlags::INDICATE_RIGHT),
            indicate_when_not_taken: CarStatusFlags::NONE,
            indicate_distance_pre: 50.0,
            indicate_distance_post: 10.0,
        });
        blob.points[3].junction_start_id = 0;
        blob.points[10].junction_end_id = 0;
        blob.index_points();
        AiSpline::from_blob(&blob).unwrap()
    }

    #[test]
    fn test_next_without_junctions() {
        let spline = forked_spline(0.5);
        let mut rng = StdRng::seed_from_u64(0);
        let mut evaluator = JunctionEvaluator::new();
        assert_eq!(evaluator.next(&spline, 0, 2, &mut rng), 2);
        assert_eq!(evaluator.next(&spline, 0, 0, &mut rng), 0);
        assert_eq!(evaluator.next(&spline, 8, 5, &mut rng), -1);
        assert_eq!(evaluator.previous(&spline, 5, 5, &mut rng), 0);
        assert_eq!(evaluator.previous(&spline, 0, 1, &mut rng), -1);
    }

    #[test]
    fn test_certain_and_impossible_junctions() {
        let mut rng = StdRng::seed_from_u64(0);
        let always = forked_spline(1.0);
        let never = forked_spline(0.0);

        assert_eq!(JunctionEvaluator::new().next(&always, 2, 2, &mut rng), 10);
        assert_eq!(JunctionEvaluator::new().next(&never, 2, 2, &mut rng), 4);
        assert_eq!(JunctionEvaluator::new().next_forced(&never, 2, 2, &mut rng), 10);
    }

    #[test]
    fn test_decision_is_memoized_per_context() {
        let spline = forked_spline(0.5);
        let mut rng = StdRng::seed_from_u64(42);
        let mut evaluator = JunctionEvaluator::new();

        let first = evaluator.next(&spline, 3, 1, &mut rng);
        for _ in 0..50 {
            assert_eq!(evaluator.next(&spline, 3, 1, &mut rng), first);
            assert_eq!(evaluator.next(&spline, 0, 4, &mut rng), first);
        }
    }

    #[test]
    fn test_fresh_contexts_evaluate_independently() {
        let spline = forked_spline(0.5);
        let mut rng = StdRng::seed_from_u64(7);

        let outcomes: Vec<i32> = (0..64)
            .map(|_| JunctionEvaluator::new().next(&spline, 3, 1, &mut rng))
            .collect();
        assert!(outcomes.contains(&10));
        assert!(outcomes.contains(&4));
    }

    #[test]
    fn test_same_seed_reproduces_decisions() {
        let spline = forked_spline(0.5);
        let run = |seed| {
            let mut rng = StdRng::seed_from_u64(seed);
            (0..32)
                .map(|_| JunctionEvaluator::new().next(&spline, 3, 1, &mut rng))
                .collect::<Vec<_>>()
        };
        assert_eq!(run(99), run(99));
    }

    #[test]
    fn test_forget_allows_reroll() {
        let spline = forked_spline(1.0);
        let mut rng = StdRng::seed_from_u64(0);
        let mut evaluator = JunctionEvaluator::new();
        evaluator.next(&spline, 3, 1, &mut rng);
        assert_eq!(evaluator.decision(0), Some(true));
        evaluator.forget(0);
        assert_eq!(evaluator.decision(0), None);
    }

    #[test]
    fn test_previous_through_junction_end() {
        let spline = forked_spline(1.0);
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(JunctionEvaluator::new().previous(&spline, 11, 2, &mut rng), 3);
    }

    #[test]
    fn test_advance_by_distance() {
        let spline = forked_spline(0.0);
        let mut rng = StdRng::seed_from_u64(0);
        let mut evaluator = JunctionEvaluator::new();
        assert_eq!(evaluator.advance(&spline, 0, 25.0, &mut rng), Some((3, 30.0)));
        assert_eq!(evaluator.advance(&spline, 0, 0.0, &mut rng), Some((0, 0.0)));
        assert_eq!(evaluator.advance(&spline, 5, 500.0, &mut rng), None);
    }
}
