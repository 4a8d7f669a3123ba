use std::time::Instant;

use crate::{ShootDecision, TeamColor};

/// Aim mode byte from the micro-controller. Carried through the pipeline
/// uninterpreted; only the auto-aim mode drives this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AimMode(pub u8);

/// One stamped gimbal attitude message.
///
/// Angles are in degrees, as sent by the micro-controller, relative to the
/// power-on attitude. The stamp is monotonic host time assigned when the
/// frame was parsed off the wire.
#[derive(Debug, Clone, Copy)]
pub struct ImuSample {
    pub roll_deg: f64,
    pub pitch_deg: f64,
    pub yaw_deg: f64,
    pub stamp: Instant,
    pub ally_color: TeamColor,
    pub aim_mode: AimMode,
    pub shoot_decision: ShootDecision,
    pub remaining_hp: u8,
}

impl ImuSample {
    /// A zero-attitude sample, mostly useful in tests.
    pub fn zero(stamp: Instant) -> ImuSample {
        ImuSample {
            roll_deg: 0.0,
            pitch_deg: 0.0,
            yaw_deg: 0.0,
            stamp,
            ally_color: TeamColor::Red,
            aim_mode: AimMode::default(),
            shoot_decision: ShootDecision::ALL,
            remaining_hp: 0,
        }
    }
}
