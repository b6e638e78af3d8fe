//! Synchronization records exchanged between the two peers of a match

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::ops::{Add, Mul, Sub};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Default)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Point reflection through the table centre: both horizontal axes are
    /// negated, height is kept. Applying it twice yields the original vector.
    pub fn mirrored(self) -> Self {
        Self {
            x: -self.x,
            y: self.y,
            z: -self.z,
        }
    }

    pub fn length(self) -> f32 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    pub fn horizontal_distance(self, other: Vec3) -> f32 {
        let dx = other.x - self.x;
        let dz = other.z - self.z;
        (dx * dx + dz * dz).sqrt()
    }
}

impl Add for Vec3 {
    type Output = Vec3;

    fn add(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Vec3 {
    type Output = Vec3;

    fn sub(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f32> for Vec3 {
    type Output = Vec3;

    fn mul(self, rhs: f32) -> Vec3 {
        Vec3::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

/// A record that can travel inside an envelope.
///
/// `TYPE_NAME` is the tag written into the envelope; it must be unique across
/// all records since receivers dispatch on it.
pub trait Record: Serialize + DeserializeOwned + Into<PeerMessage> {
    const TYPE_NAME: &'static str;
}

/// Paddle position, one per side. `id` is 1 for the master's handle and 0
/// for the non-master's.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct HandlePosition {
    pub id: i32,
    pub position: Vec3,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct PuckState {
    pub id: i32,
    pub position: Vec3,
    pub velocity: Vec3,
}

/// The puck with this id went into the sender's own goal.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct GoalEvent {
    pub id: i32,
}

/// A puck has been (re)thrown onto the table.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct ThrowInEvent {
    pub id: i32,
    pub position: Vec3,
    pub velocity: Vec3,
}

/// Countdown value broadcast by the master. `sent_at` is milliseconds since
/// the unix epoch, used by the receiver to compensate for latency.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct CountdownTick {
    pub remaining: i32,
    pub sent_at: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Default)]
pub struct TimeUp {}

/// Closed set of every record the peers exchange.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PeerMessage {
    HandlePosition(HandlePosition),
    PuckState(PuckState),
    Goal(GoalEvent),
    ThrowIn(ThrowInEvent),
    CountdownTick(CountdownTick),
    TimeUp(TimeUp),
}

impl PeerMessage {
    pub fn type_name(&self) -> &'static str {
        match self {
            PeerMessage::HandlePosition(_) => HandlePosition::TYPE_NAME,
            PeerMessage::PuckState(_) => PuckState::TYPE_NAME,
            PeerMessage::Goal(_) => GoalEvent::TYPE_NAME,
            PeerMessage::ThrowIn(_) => ThrowInEvent::TYPE_NAME,
            PeerMessage::CountdownTick(_) => CountdownTick::TYPE_NAME,
            PeerMessage::TimeUp(_) => TimeUp::TYPE_NAME,
        }
    }
}

macro_rules! impl_record {
    ($record:ident, $variant:ident, $name:literal) => {
        impl Record for $record {
            const TYPE_NAME: &'static str = $name;
        }

        impl From<$record> for PeerMessage {
            fn from(value: $record) -> Self {
                PeerMessage::$variant(value)
            }
        }
    };
}

impl_record!(HandlePosition, HandlePosition, "HandlePosition");
impl_record!(PuckState, PuckState, "PuckState");
impl_record!(GoalEvent, Goal, "GoalEvent");
impl_record!(ThrowInEvent, ThrowIn, "ThrowInEvent");
impl_record!(CountdownTick, CountdownTick, "CountdownTick");
impl_record!(TimeUp, TimeUp, "TimeUp");

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_mirror_negates_horizontal_axes() {
        let v = Vec3::new(1.0, 2.0, -3.0);
        assert_eq!(v.mirrored(), Vec3::new(-1.0, 2.0, 3.0));
    }

    #[test]
    fn test_mirror_is_an_involution() {
        let vectors = [
            Vec3::ZERO,
            Vec3::new(1.0, 0.0, -3.0),
            Vec3::new(-0.5, 7.25, 1e-7),
            Vec3::new(f32::MAX, f32::MIN, f32::MIN_POSITIVE),
        ];

        for v in vectors {
            assert_eq!(v.mirrored().mirrored(), v);
        }
    }

    #[test]
    fn test_vector_arithmetic() {
        let a = Vec3::new(1.0, 2.0, 3.0);
        let b = Vec3::new(0.5, -1.0, 2.0);

        assert_eq!(a + b, Vec3::new(1.5, 1.0, 5.0));
        assert_eq!(a - b, Vec3::new(0.5, 3.0, 1.0));
        assert_eq!(b * 2.0, Vec3::new(1.0, -2.0, 4.0));
        assert_approx_eq!(Vec3::new(3.0, 0.0, 4.0).length(), 5.0, 1e-6);
        assert_approx_eq!(
            Vec3::new(0.0, 9.0, 0.0).horizontal_distance(Vec3::new(3.0, -2.0, 4.0)),
            5.0,
            1e-6
        );
    }

    #[test]
    fn test_type_names_are_unique() {
        let names = [
            HandlePosition::TYPE_NAME,
            PuckState::TYPE_NAME,
            GoalEvent::TYPE_NAME,
            ThrowInEvent::TYPE_NAME,
            CountdownTick::TYPE_NAME,
            TimeUp::TYPE_NAME,
        ];

        for (i, a) in names.iter().enumerate() {
            for b in &names[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_message_reports_record_type_name() {
        let message: PeerMessage = GoalEvent { id: 4 }.into();
        assert_eq!(message.type_name(), "GoalEvent");
        assert_eq!(PeerMessage::TimeUp(TimeUp {}).type_name(), "TimeUp");
    }

    #[test]
    fn test_time_up_serializes_as_empty_object() {
        assert_eq!(serde_json::to_string(&TimeUp {}).unwrap(), "{}");
    }
}
