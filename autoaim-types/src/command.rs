/// Aiming command sent back to the micro-controller.
///
/// Angles are absolute gimbal targets in degrees, in the convention of the
/// incoming IMU attitude. The five flags are packed one byte each on the
/// wire.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FireCommand {
    pub pitch_deg: f32,
    pub yaw_deg: f32,
    /// An engageable target was seen this frame.
    pub found: bool,
    /// The predicted pose is inside the armor-subtended cone; shoot.
    pub fire: bool,
    /// Nothing eligible seen recently; the gimbal may patrol.
    pub patrolling: bool,
    /// Outpost-only: the fitting phase has completed.
    pub done_fitting: bool,
    /// One-bit counter toggled on every emitted command so the receiver can
    /// detect stale frames.
    pub updated: u8,
}

impl FireCommand {
    /// A hold-still command carrying no target information.
    pub fn idle(updated: u8) -> FireCommand {
        FireCommand {
            pitch_deg: 0.0,
            yaw_deg: 0.0,
            found: false,
            fire: false,
            patrolling: false,
            done_fitting: false,
            updated,
        }
    }
}
