use serde::{Deserialize, Serialize};

/// Pixel layout of buffers delivered by the frame source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    /// 8-bit Bayer, RGGB phase.
    BayerRG8,
    /// 8-bit Bayer, GBRG phase.
    BayerGB8,
    /// 8-bit interleaved blue-green-red.
    #[serde(rename = "BGR8")]
    Bgr8,
}

impl PixelFormat {
    /// Bytes per pixel in the raw buffer.
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::BayerRG8 | PixelFormat::BayerGB8 => 1,
            PixelFormat::Bgr8 => 3,
        }
    }
}
