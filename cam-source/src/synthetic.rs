use std::time::{Duration, Instant};

use autoaim_config_data::CameraConfig;
use autoaim_types::PixelFormat;

use crate::{FrameSource, RawFrame, Result};

/// Frame source that synthesizes dark BGR frames at the configured rate.
///
/// Used for bring-up on machines without a camera attached and by the
/// pipeline integration tests.
pub struct SyntheticSource {
    width: u32,
    height: u32,
    period: Duration,
    next_due: Instant,
}

impl SyntheticSource {
    pub fn new(cfg: &CameraConfig) -> SyntheticSource {
        let rate = if cfg.frame_rate_enable && cfg.frame_rate > 0.0 {
            cfg.frame_rate
        } else {
            200.0
        };
        SyntheticSource {
            width: cfg.width,
            height: cfg.height,
            period: Duration::from_secs_f64(1.0 / rate),
            next_due: Instant::now(),
        }
    }
}

impl FrameSource for SyntheticSource {
    fn next_frame(&mut self) -> Result<RawFrame> {
        let now = Instant::now();
        if self.next_due > now {
            std::thread::sleep(self.next_due - now);
        }
        let stamp = Instant::now();
        self.next_due = stamp + self.period;
        Ok(RawFrame {
            width: self.width,
            height: self.height,
            format: PixelFormat::Bgr8,
            data: vec![0u8; (self.width * self.height * 3) as usize],
            stamp,
        })
    }

    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }
}
