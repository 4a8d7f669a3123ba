//! Pipeline core: capture+fuse, detect, transform, track+select+fire.
//!
//! The four stages run as long-lived threads connected by drop-oldest
//! rings ([`ringlib`]), so a slow downstream stage can never stall
//! detection; it only costs it stale frames. The [`Pipeline`] type owns
//! the workers and guarantees ordered teardown. The attitude/command link
//! is shared with the capture and fire stages and closed by the caller
//! after the pipeline has stopped.

use std::time::Instant;

use image::RgbImage;

use autoaim_types::{Detection2D, Detection3D, ImuSample};

mod fire_control;
mod pipeline;
mod policy;

pub use fire_control::{FireController, SelectedTarget};
pub use pipeline::Pipeline;
pub use policy::SelectionPolicy;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("io error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
    #[error("classifier error: {source}")]
    Classifier {
        #[from]
        source: armor_detector::Error,
    },
}

/// A frame with the IMU sample recorded at capture time. Created by S1 on
/// every camera callback, consumed exactly once by S2.
pub struct AnnotatedFrame {
    pub image: RgbImage,
    pub imu: ImuSample,
    pub capture_time: Instant,
}

/// All 2-D detections of one frame, moved between S2 and S3 as a unit.
pub struct FrameDetections {
    pub detections: Vec<Detection2D>,
    pub imu: ImuSample,
    pub capture_time: Instant,
}

/// All 3-D detections of one frame, handed to S4 as a unit so per-frame
/// selection is atomic.
pub struct FrameDetections3D {
    pub detections: Vec<Detection3D>,
    pub imu: ImuSample,
    pub capture_time: Instant,
}
