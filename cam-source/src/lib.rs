//! Frame source abstraction.
//!
//! The vendor camera SDK lives outside this repository; whatever backend is
//! used only has to implement [`FrameSource`]: deliver raw pixel buffers
//! with a monotonic capture stamp. Bayer demosaicing to RGB happens here so
//! the detector always sees interleaved RGB regardless of the wire format.

use std::time::Instant;

use image::RgbImage;

use autoaim_types::PixelFormat;

mod synthetic;
pub use synthetic::SyntheticSource;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// No frame arrived within the acquisition timeout (1 s).
    #[error("timeout waiting for frame")]
    Timeout,
    #[error("frame source disconnected: {0}")]
    Disconnected(String),
    #[error("bad frame: {0}")]
    BadFrame(String),
    #[error("io error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

/// One raw buffer as delivered by the acquisition backend. Ownership of the
/// pixel data passes to the pipeline on delivery.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: Vec<u8>,
    /// Monotonic time assigned at SDK buffer acquire.
    pub stamp: Instant,
}

impl RawFrame {
    /// Convert to interleaved RGB. Bayer formats are demosaiced with 2×2
    /// block replication, which is adequate for blob-scale detection work.
    pub fn to_rgb(&self) -> Result<RgbImage> {
        let (w, h) = (self.width as usize, self.height as usize);
        let expected = w * h * self.format.bytes_per_pixel();
        if self.data.len() != expected {
            return Err(Error::BadFrame(format!(
                "buffer is {} bytes, expected {} for {}x{} {:?}",
                self.data.len(),
                expected,
                self.width,
                self.height,
                self.format,
            )));
        }
        if matches!(self.format, PixelFormat::BayerRG8 | PixelFormat::BayerGB8)
            && (self.width < 2 || self.height < 2)
        {
            return Err(Error::BadFrame(format!(
                "{}x{} is too small to demosaic",
                self.width, self.height
            )));
        }
        match self.format {
            PixelFormat::Bgr8 => {
                let mut out = RgbImage::new(self.width, self.height);
                for (i, px) in out.pixels_mut().enumerate() {
                    let o = i * 3;
                    px.0 = [self.data[o + 2], self.data[o + 1], self.data[o]];
                }
                Ok(out)
            }
            PixelFormat::BayerRG8 => Ok(self.demosaic(BayerPhase::RGGB)),
            PixelFormat::BayerGB8 => Ok(self.demosaic(BayerPhase::GBRG)),
        }
    }

    fn demosaic(&self, phase: BayerPhase) -> RgbImage {
        let (w, h) = (self.width as usize, self.height as usize);
        let mut out = RgbImage::new(self.width, self.height);
        let at = |x: usize, y: usize| -> u16 { self.data[y * w + x] as u16 };
        // Walk 2x2 cells; odd trailing row/column reuses the last full cell.
        for cy in 0..h.div_ceil(2) {
            for cx in 0..w.div_ceil(2) {
                let x0 = (cx * 2).min(w.saturating_sub(2));
                let y0 = (cy * 2).min(h.saturating_sub(2));
                let (r, g, b) = match phase {
                    BayerPhase::RGGB => (
                        at(x0, y0),
                        (at(x0 + 1, y0) + at(x0, y0 + 1)) / 2,
                        at(x0 + 1, y0 + 1),
                    ),
                    BayerPhase::GBRG => (
                        at(x0, y0 + 1),
                        (at(x0, y0) + at(x0 + 1, y0 + 1)) / 2,
                        at(x0 + 1, y0),
                    ),
                };
                let rgb = image::Rgb([r as u8, g as u8, b as u8]);
                for dy in 0..2 {
                    for dx in 0..2 {
                        let (px, py) = (cx * 2 + dx, cy * 2 + dy);
                        if px < w && py < h {
                            out.put_pixel(px as u32, py as u32, rgb);
                        }
                    }
                }
            }
        }
        out
    }
}

#[derive(Clone, Copy)]
enum BayerPhase {
    RGGB,
    GBRG,
}

/// A source of raw frames. Implementations wrap a vendor SDK or, for tests
/// and bring-up, synthesize frames.
pub trait FrameSource: Send {
    /// Block until the next frame is available, at most about one second;
    /// return [`Error::Timeout`] otherwise.
    fn next_frame(&mut self) -> Result<RawFrame>;
    fn width(&self) -> u32;
    fn height(&self) -> u32;
}

#[cfg(test)]
mod tests {
    use super::*;
    use autoaim_types::PixelFormat;

    #[test]
    fn bgr_channel_swap() {
        let frame = RawFrame {
            width: 2,
            height: 1,
            format: PixelFormat::Bgr8,
            data: vec![10, 20, 30, 40, 50, 60],
            stamp: Instant::now(),
        };
        let rgb = frame.to_rgb().unwrap();
        assert_eq!(rgb.get_pixel(0, 0).0, [30, 20, 10]);
        assert_eq!(rgb.get_pixel(1, 0).0, [60, 50, 40]);
    }

    #[test]
    fn bayer_rggb_uniform_field() {
        // A uniform RGGB mosaic of a single color must demosaic to that
        // color everywhere.
        let (w, h) = (4usize, 4usize);
        let mut data = vec![0u8; w * h];
        for y in 0..h {
            for x in 0..w {
                data[y * w + x] = match (y % 2, x % 2) {
                    (0, 0) => 200,          // R
                    (1, 1) => 50,           // B
                    _ => 120,               // G
                };
            }
        }
        let frame = RawFrame {
            width: w as u32,
            height: h as u32,
            format: PixelFormat::BayerRG8,
            data,
            stamp: Instant::now(),
        };
        let rgb = frame.to_rgb().unwrap();
        for px in rgb.pixels() {
            assert_eq!(px.0, [200, 120, 50]);
        }
    }

    #[test]
    fn size_mismatch_is_rejected() {
        let frame = RawFrame {
            width: 4,
            height: 4,
            format: PixelFormat::BayerGB8,
            data: vec![0u8; 15],
            stamp: Instant::now(),
        };
        assert!(frame.to_rgb().is_err());
    }
}
