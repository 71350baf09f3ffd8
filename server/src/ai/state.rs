//! One simulated AI car moving along the spline.

use protocol::{CarStatusFlags, Vector3};
use rand::Rng;

use super::junction::JunctionEvaluator;
use super::slowest::SlowestAiStates;
use super::spline::AiSpline;
use crate::entry_car::CarStatus;

const GRAVITY: f32 = 9.81;
/// Points inspected ahead for slower traffic.
const LOOKAHEAD_POINTS: usize = 8;
const FOLLOW_DISTANCE: f32 = 10.0;
const WHEEL_RADIUS: f32 = 0.32;
const IDLE_RPM: f32 = 900.0;
const GEAR_SPEED: f32 = 8.0;

/// Driving parameters shared by every state of the traffic engine.
#[derive(Debug, Clone, Copy)]
pub struct DrivingLimits {
    pub max_speed: f32,
    pub acceleration: f32,
    pub deceleration: f32,
    pub lateral_acceleration: f32,
}

impl DrivingLimits {
    /// Fastest speed that keeps lateral acceleration within limits on a
    /// curve of the given radius.
    pub fn corner_speed(&self, radius: f32) -> f32 {
        if radius <= 0.0 || !radius.is_finite() {
            return self.max_speed;
        }
        (radius * self.lateral_acceleration).sqrt().min(self.max_speed)
    }
}

pub struct AiState {
    pub id: u64,
    pub session_id: u8,
    current_point: i32,
    next_point: i32,
    /// Meters travelled from `current_point` towards `next_point`.
    progress: f32,
    speed: f32,
    target_speed: f32,
    junctions: JunctionEvaluator,
    /// Indicator bits kept on after a junction and the metres left to show them.
    post_junction: Option<(u32, f32)>,
    status: CarStatus,
    finished: bool,
}

impl AiState {
    /// Places a new state on `point_id`. Fails when the point has no successor.
    pub fn spawn<R: Rng + ?Sized>(
        id: u64,
        session_id: u8,
        spline: &AiSpline,
        slowest: &SlowestAiStates,
        point_id: i32,
        initial_speed: f32,
        rng: &mut R,
    ) -> Option<Self> {
        let point = spline.point(point_id)?;
        let mut junctions = JunctionEvaluator::new();
        let next_point = junctions.next(spline, point_id, 1, rng);
        if next_point < 0 {
            return None;
        }

        let mut state = AiState {
            id,
            session_id,
            current_point: point_id,
            next_point,
            progress: 0.0,
            speed: initial_speed,
            target_speed: initial_speed,
            junctions,
            post_junction: None,
            status: CarStatus {
                position: point.position,
                status_flags: CarStatusFlags(CarStatusFlags::LIGHTS_ON | CarStatusFlags::HIGH_BEAMS_OFF),
                ..Default::default()
            },
            finished: false,
        };
        slowest.enter(point_id, id, initial_speed);
        state.refresh_status(spline, 0, rng);
        Some(state)
    }

    pub fn current_point(&self) -> i32 {
        self.current_point
    }

    pub fn speed(&self) -> f32 {
        self.speed
    }

    pub fn position(&self) -> Vector3 {
        self.status.position
    }

    pub fn status(&self) -> CarStatus {
        self.status
    }

    /// True once the state reached the end of an open lane.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Advances the state by `dt` seconds.
    pub fn update<R: Rng + ?Sized>(
        &mut self,
        spline: &AiSpline,
        slowest: &SlowestAiStates,
        limits: &DrivingLimits,
        dt: f32,
        timestamp: u32,
        rng: &mut R,
    ) {
        if self.finished {
            return;
        }

        self.target_speed = self.plan_speed(spline, slowest, limits, rng);
        if self.speed < self.target_speed {
            self.speed = (self.speed + limits.acceleration * dt).min(self.target_speed);
        } else {
            self.speed = (self.speed - limits.deceleration * dt).max(self.target_speed);
        }

        let travelled = self.speed * dt;
        if let Some((bits, remaining)) = self.post_junction {
            let remaining = remaining - travelled;
            self.post_junction = (remaining > 0.0).then_some((bits, remaining));
        }

        self.progress += travelled;
        // Zero length points are stepped over, bounded by the spline size so
        // a cycle of them cannot spin.
        for _ in 0..=spline.num_points() {
            let length = match spline.point(self.current_point) {
                Some(point) => point.length.max(0.0),
                None => {
                    self.finished = true;
                    break;
                }
            };
            if self.progress < length || (length == 0.0 && self.speed <= 0.0) {
                break;
            }
            self.progress -= length;
            if !self.move_to_next(spline, slowest, rng) {
                break;
            }
        }

        slowest.enter(self.current_point, self.id, self.speed);
        self.refresh_status(spline, timestamp, rng);
    }

    fn move_to_next<R: Rng + ?Sized>(
        &mut self,
        spline: &AiSpline,
        slowest: &SlowestAiStates,
        rng: &mut R,
    ) -> bool {
        if let Some(point) = spline.point(self.current_point) {
            if let Some(junction) = spline.junction(point.junction_start_id) {
                let bits = match self.junctions.decision(junction.id) {
                    Some(true) => junction.indicate_when_taken.0,
                    Some(false) => junction.indicate_when_not_taken.0,
                    None => 0,
                };
                self.post_junction = (bits != 0 && junction.indicate_distance_post > 0.0)
                    .then_some((bits, junction.indicate_distance_post));
                self.junctions.forget(junction.id);
            }
        }
        slowest.leave(self.current_point, self.id);

        let next = self.next_point;
        self.current_point = next;
        self.next_point = self.junctions.next(spline, next, 1, rng);
        if self.next_point < 0 {
            self.finished = true;
            self.progress = 0.0;
            return false;
        }
        true
    }

    /// Target speed from the curvature ahead and the slowest car in front.
    fn plan_speed<R: Rng + ?Sized>(
        &mut self,
        spline: &AiSpline,
        slowest: &SlowestAiStates,
        limits: &DrivingLimits,
        rng: &mut R,
    ) -> f32 {
        let mut target = limits.max_speed;
        let mut distance = -self.progress;
        let mut point_id = self.current_point;

        for step in 0..LOOKAHEAD_POINTS {
            let point = match spline.point(point_id) {
                Some(point) => point,
                None => break,
            };
            target = target.min(limits.corner_speed(point.radius));

            if step > 0 {
                if let Some(entry) = slowest.get(point_id) {
                    if entry.state_id != self.id && entry.speed < self.speed {
                        // Brake to match the car ahead before the gap closes.
                        let gap = (distance - FOLLOW_DISTANCE).max(0.0);
                        let reachable = (entry.speed * entry.speed
                            + 2.0 * limits.deceleration * gap)
                            .sqrt();
                        target = target.min(reachable);
                    }
                }
            }

            distance += point.length;
            point_id = self.junctions.next(spline, point_id, 1, rng);
            if point_id < 0 {
                target = target.min((2.0 * limits.deceleration * distance.max(0.0)).sqrt());
                break;
            }
        }
        target.max(0.0)
    }

    /// Indicator bits for the next junction within its signalling distance,
    /// else for the junction just passed.
    fn indicator<R: Rng + ?Sized>(&mut self, spline: &AiSpline, rng: &mut R) -> u32 {
        match self.upcoming_indicator(spline, rng) {
            0 => self.post_junction.map_or(0, |(bits, _)| bits),
            bits => bits,
        }
    }

    fn upcoming_indicator<R: Rng + ?Sized>(&mut self, spline: &AiSpline, rng: &mut R) -> u32 {
        let mut distance = -self.progress;
        let mut point_id = self.current_point;

        for _ in 0..spline.num_points().max(1) {
            let point = match spline.point(point_id) {
                Some(point) => point,
                None => return 0,
            };
            if let Some(junction) = spline.junction(point.junction_start_id) {
                if distance > junction.indicate_distance_pre {
                    return 0;
                }
                let taken = self.junctions.evaluate(&junction, rng);
                return if taken {
                    junction.indicate_when_taken.0
                } else {
                    junction.indicate_when_not_taken.0
                };
            }
            distance += point.length;
            if distance > 200.0 {
                return 0;
            }
            point_id = match spline.point(point.next_id) {
                Some(next) => next.id,
                None => return 0,
            };
        }
        0
    }

    fn refresh_status<R: Rng + ?Sized>(&mut self, spline: &AiSpline, timestamp: u32, rng: &mut R) {
        let (current, next) = match (spline.point(self.current_point), spline.point(self.next_point)) {
            (Some(current), Some(next)) => (current, next),
            (Some(current), None) => (current, current),
            _ => return,
        };

        let t = if current.length > 0.0 {
            (self.progress / current.length).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let forward = (next.position - current.position).normalize();
        let forward = if forward == Vector3::ZERO {
            spline.forward(self.current_point)
        } else {
            forward
        };

        let indicator = self.indicator(spline, rng);
        let mut flags = self.status.status_flags;
        flags.set(CarStatusFlags::INDICATE_LEFT | CarStatusFlags::INDICATE_RIGHT, false);
        flags.set(indicator, indicator != 0);

        let wheel_speed = (self.speed / WHEEL_RADIUS).clamp(0.0, 255.0) as u8;
        let gear = if self.speed < 0.1 {
            1
        } else {
            2u8.saturating_add((self.speed / GEAR_SPEED) as u8).min(7)
        };
        let gear_base = (gear.saturating_sub(2)) as f32 * GEAR_SPEED;
        let rpm = IDLE_RPM + (self.speed - gear_base).max(0.0) / GEAR_SPEED * 4000.0;

        self.status = CarStatus {
            pak_sequence_id: 0,
            timestamp,
            position: current.position.lerp(next.position, t),
            rotation: Vector3::new(
                forward.x.atan2(forward.z),
                forward.y.clamp(-1.0, 1.0).asin(),
                current.camber,
            ),
            velocity: forward * self.speed,
            tyre_angular_speed: [wheel_speed; 4],
            steer_angle: 127,
            wheel_angle: 127,
            engine_rpm: rpm.min(u16::MAX as f32) as u16,
            gear,
            status_flags: flags,
            performance_delta: 0,
            gas: if self.speed < self.target_speed { 255 } else { 0 },
            normalized_position: 0.0,
        };
    }

    /// Removes the state from the slowest-occupant index.
    pub fn despawn(&self, slowest: &SlowestAiStates) {
        slowest.leave(self.current_point, self.id);
    }
}

/// Lateral grip expressed in m/s² for a given g factor.
pub fn lateral_acceleration(g: f32) -> f32 {
    g * GRAVITY
}
