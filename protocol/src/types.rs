//! Plain value types shared by several packets.

use std::ops::{Add, AddAssign, Mul, Neg, Sub};

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vector3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vector3 {
    pub const ZERO: Vector3 = Vector3::new(0.0, 0.0, 0.0);
    pub const UP: Vector3 = Vector3::new(0.0, 1.0, 0.0);

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn dot(self, other: Vector3) -> f32 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub fn cross(self, other: Vector3) -> Vector3 {
        Vector3::new(
            self.y * other.z - self.z * other.y,
            self.z * other.x - self.x * other.z,
            self.x * other.y - self.y * other.x,
        )
    }

    pub fn length_squared(self) -> f32 {
        self.dot(self)
    }

    pub fn length(self) -> f32 {
        self.length_squared().sqrt()
    }

    pub fn distance_squared(self, other: Vector3) -> f32 {
        (self - other).length_squared()
    }

    pub fn distance(self, other: Vector3) -> f32 {
        self.distance_squared(other).sqrt()
    }

    pub fn normalize(self) -> Vector3 {
        let len = self.length();
        if len > f32::EPSILON {
            self * (1.0 / len)
        } else {
            Vector3::ZERO
        }
    }

    pub fn lerp(self, other: Vector3, t: f32) -> Vector3 {
        self + (other - self) * t
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    /// True when every component lies within `[-bound, bound]`.
    pub fn within(self, bound: f32) -> bool {
        self.x.abs() <= bound && self.y.abs() <= bound && self.z.abs() <= bound
    }

    pub fn axis(self, axis: usize) -> f32 {
        match axis {
            0 => self.x,
            1 => self.y,
            _ => self.z,
        }
    }
}

impl Add for Vector3 {
    type Output = Vector3;

    fn add(self, rhs: Vector3) -> Vector3 {
        Vector3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl AddAssign for Vector3 {
    fn add_assign(&mut self, rhs: Vector3) {
        *self = *self + rhs;
    }
}

impl Sub for Vector3 {
    type Output = Vector3;

    fn sub(self, rhs: Vector3) -> Vector3 {
        Vector3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f32> for Vector3 {
    type Output = Vector3;

    fn mul(self, rhs: f32) -> Vector3 {
        Vector3::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

impl Neg for Vector3 {
    type Output = Vector3;

    fn neg(self) -> Vector3 {
        Vector3::new(-self.x, -self.y, -self.z)
    }
}

/// Car status bitset carried in every position update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct CarStatusFlags(pub u32);

impl CarStatusFlags {
    pub const NONE: Self = Self(0);
    pub const LIGHTS_ON: u32 = 0x20;
    pub const HIGH_BEAMS_OFF: u32 = 0x40;
    pub const HORN: u32 = 0x200;
    pub const HAZARDS_ON: u32 = 0x2000;
    pub const INDICATE_LEFT: u32 = 0x4000;
    pub const INDICATE_RIGHT: u32 = 0x8000;

    pub fn contains(self, flag: u32) -> bool {
        self.0 & flag == flag
    }

    pub fn set(&mut self, flag: u32, on: bool) {
        if on {
            self.0 |= flag;
        } else {
            self.0 &= !flag;
        }
    }

    pub fn with(mut self, flag: u32) -> Self {
        self.set(flag, true);
        self
    }
}

/// Capabilities a Custom Shaders Patch client announces during the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct CspFeatures(u32);

impl CspFeatures {
    pub const SPECTATING_AWARE: u32 = 1 << 0;
    pub const LOWER_CLIENTS_SENDING_RATE: u32 = 1 << 1;
    pub const CLIENT_MESSAGES: u32 = 1 << 2;
    pub const CUSTOM_UPDATE: u32 = 1 << 3;
    pub const WEATHER_FX_V2: u32 = 1 << 4;
    pub const CAR_VISIBILITY: u32 = 1 << 5;

    /// Parses the comma separated feature list. Unknown names are ignored.
    pub fn parse(list: &str) -> Self {
        let bits = list
            .split(',')
            .map(str::trim)
            .filter_map(|name| match name {
                "SPECTATING_AWARE" => Some(Self::SPECTATING_AWARE),
                "LOWER_CLIENTS_SENDING_RATE" => Some(Self::LOWER_CLIENTS_SENDING_RATE),
                "CLIENT_MESSAGES" => Some(Self::CLIENT_MESSAGES),
                "CUSTOM_UPDATE" => Some(Self::CUSTOM_UPDATE),
                "WEATHERFX_V2" => Some(Self::WEATHER_FX_V2),
                "CAR_VISIBILITY" => Some(Self::CAR_VISIBILITY),
                _ => None,
            })
            .fold(0, |acc, bit| acc | bit);
        Self(bits)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, feature: u32) -> bool {
        self.0 & feature == feature
    }

    pub fn is_csp(self) -> bool {
        self.0 != 0
    }
}
