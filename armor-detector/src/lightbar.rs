//! Lightbar extraction.
//!
//! A lightbar is a bright, enemy-colored, elongated blob. Extraction
//! thresholds a brightness mask and a color-difference mask, ANDs and
//! dilates them, walks the external contours, and fits an ellipse to each
//! via point-set second moments (centroid plus a 2×2 central-moment eigen
//! decomposition).

use image::{GrayImage, RgbImage};
use imageproc::contours::find_contours;
use imageproc::distance_transform::Norm;
use imageproc::morphology::dilate;
use nalgebra::Point2;
use tracing::trace;

use autoaim_config_data::LightBarConfig;
use autoaim_types::{LightBarGeom, TeamColor};

/// A candidate lightbar: the fitted ellipse record plus the quantities the
/// acceptance gates and armor pairing need.
#[derive(Debug, Clone)]
pub(crate) struct LightBar {
    pub geom: LightBarGeom,
    pub contour_area: f64,
    pub solidity: f64,
}

impl LightBar {
    pub fn center(&self) -> Point2<f64> {
        self.geom.center
    }

    /// Corners of the oriented bounding rectangle implied by the ellipse
    /// axes, in no particular order.
    pub fn rect_corners(&self) -> [Point2<f64>; 4] {
        let angle = self.geom.angle_deg.to_radians();
        // The long axis runs near-vertical; angle is measured from image
        // vertical, so the axis direction is (sin, cos) with y down.
        let major = nalgebra::Vector2::new(angle.sin(), angle.cos());
        let minor = nalgebra::Vector2::new(major.y, -major.x);
        let half_long = self.geom.long_axis / 2.0;
        let half_short = self.geom.short_axis / 2.0;
        let c = self.geom.center;
        [
            c + major * half_long + minor * half_short,
            c + major * half_long - minor * half_short,
            c - major * half_long + minor * half_short,
            c - major * half_long - minor * half_short,
        ]
    }

    /// Axis-aligned bounds (min_x, min_y, max_x, max_y) of the rect corners.
    pub fn bounds(&self) -> (f64, f64, f64, f64) {
        let corners = self.rect_corners();
        let mut min_x = f64::INFINITY;
        let mut min_y = f64::INFINITY;
        let mut max_x = f64::NEG_INFINITY;
        let mut max_y = f64::NEG_INFINITY;
        for c in corners {
            min_x = min_x.min(c.x);
            min_y = min_y.min(c.y);
            max_x = max_x.max(c.x);
            max_y = max_y.max(c.y);
        }
        (min_x, min_y, max_x, max_y)
    }

    pub fn is_valid(&self, config: &LightBarConfig) -> bool {
        if self.geom.short_axis <= 0.0 {
            return false;
        }
        let aspect_ratio = self.geom.long_axis / self.geom.short_axis;
        if self.geom.ellipse_area < config.min_area || self.geom.ellipse_area > config.max_area {
            return false;
        }
        if self.solidity < config.min_solidity {
            return false;
        }
        if aspect_ratio < config.min_aspect_ratio || aspect_ratio > config.max_aspect_ratio {
            return false;
        }
        if self.geom.angle_deg.abs() > config.max_angle {
            return false;
        }
        true
    }
}

/// Brightness mask AND enemy-minus-ally color mask, dilated with the 3×3
/// cross kernel.
pub(crate) fn build_mask(
    rgb: &RgbImage,
    enemy: TeamColor,
    brightness_threshold: u8,
    color_threshold: u8,
) -> GrayImage {
    let mut mask = GrayImage::new(rgb.width(), rgb.height());
    for (x, y, px) in rgb.enumerate_pixels() {
        let [r, g, b] = px.0;
        let luma = (299 * r as u32 + 587 * g as u32 + 114 * b as u32) / 1000;
        if luma < brightness_threshold as u32 {
            continue;
        }
        let diff = match enemy {
            TeamColor::Red => r.saturating_sub(b),
            TeamColor::Blue => b.saturating_sub(r),
        };
        if diff >= color_threshold {
            mask.put_pixel(x, y, image::Luma([255u8]));
        }
    }
    dilate(&mask, Norm::L1, 1)
}

/// Ellipse parameters of a contour point set.
///
/// The eigenvalues of the 2×2 central-moment matrix give the variance of
/// the outline along its principal axes; for an ellipse outline the
/// semi-axis is √2 times the standard deviation along its axis.
fn fit_ellipse(points: &[Point2<f64>]) -> Option<LightBarGeom> {
    let n = points.len() as f64;
    if points.len() < 5 {
        return None;
    }
    let cx = points.iter().map(|p| p.x).sum::<f64>() / n;
    let cy = points.iter().map(|p| p.y).sum::<f64>() / n;
    let mut mu20 = 0.0;
    let mut mu02 = 0.0;
    let mut mu11 = 0.0;
    for p in points {
        let dx = p.x - cx;
        let dy = p.y - cy;
        mu20 += dx * dx;
        mu02 += dy * dy;
        mu11 += dx * dy;
    }
    mu20 /= n;
    mu02 /= n;
    mu11 /= n;

    let mean = (mu20 + mu02) / 2.0;
    let delta = (((mu20 - mu02) / 2.0).powi(2) + mu11 * mu11).sqrt();
    let lambda_major = mean + delta;
    let lambda_minor = (mean - delta).max(0.0);
    if lambda_major <= 0.0 {
        return None;
    }

    let long_axis = 2.0 * (2.0 * lambda_major).sqrt();
    let short_axis = 2.0 * (2.0 * lambda_minor).sqrt();

    // Major-axis direction; (ex, ey) in image coordinates with y down.
    let (ex, ey) = if mu11.abs() > f64::EPSILON {
        (lambda_major - mu02, mu11)
    } else if mu20 >= mu02 {
        (1.0, 0.0)
    } else {
        (0.0, 1.0)
    };
    // Tilt from image vertical, normalized to [-90, 90) with the long axis
    // always treated as vertical.
    let mut angle_deg = ex.atan2(ey).to_degrees();
    while angle_deg >= 90.0 {
        angle_deg -= 180.0;
    }
    while angle_deg < -90.0 {
        angle_deg += 180.0;
    }

    Some(LightBarGeom {
        center: Point2::new(cx, cy),
        long_axis,
        short_axis,
        angle_deg,
        ellipse_area: std::f64::consts::PI / 4.0 * long_axis * short_axis,
    })
}

/// Shoelace area of a closed contour.
fn contour_area(points: &[Point2<f64>]) -> f64 {
    let n = points.len();
    let mut acc = 0.0;
    for i in 0..n {
        let a = points[i];
        let b = points[(i + 1) % n];
        acc += a.x * b.y - b.x * a.y;
    }
    acc.abs() / 2.0
}

/// Extract accepted lightbars from a frame.
pub(crate) fn find_lightbars(
    rgb: &RgbImage,
    enemy: TeamColor,
    brightness_threshold: u8,
    color_threshold: u8,
    config: &LightBarConfig,
) -> Vec<LightBar> {
    let mask = build_mask(rgb, enemy, brightness_threshold, color_threshold);
    let contours = find_contours::<i32>(&mask);
    let mut bars = Vec::new();
    for contour in &contours {
        if contour.points.len() < 5 || contour.parent.is_some() {
            continue;
        }
        let points: Vec<Point2<f64>> = contour
            .points
            .iter()
            .map(|p| Point2::new(p.x as f64, p.y as f64))
            .collect();
        let Some(geom) = fit_ellipse(&points) else {
            continue;
        };
        let area = contour_area(&points);
        let bar = LightBar {
            solidity: if geom.ellipse_area > 0.0 {
                area / geom.ellipse_area
            } else {
                0.0
            },
            contour_area: area,
            geom,
        };
        if bar.is_valid(config) {
            trace!(
                "lightbar at ({:.1}, {:.1}), {:.1} x {:.1} px, {:.1} deg, contour {:.0} px2",
                bar.geom.center.x,
                bar.geom.center.y,
                bar.geom.long_axis,
                bar.geom.short_axis,
                bar.geom.angle_deg,
                bar.contour_area,
            );
            bars.push(bar);
        }
    }
    bars
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar_with(angle_deg: f64) -> LightBar {
        LightBar {
            geom: LightBarGeom {
                center: Point2::new(100.0, 100.0),
                long_axis: 40.0,
                short_axis: 8.0,
                angle_deg,
                ellipse_area: std::f64::consts::PI / 4.0 * 40.0 * 8.0,
            },
            contour_area: 220.0,
            solidity: 0.87,
        }
    }

    #[test]
    fn angle_gate_boundary() {
        let config = LightBarConfig::default();
        // |angle| = max_angle accepted, max_angle + epsilon rejected.
        assert!(bar_with(config.max_angle).is_valid(&config));
        assert!(bar_with(-config.max_angle).is_valid(&config));
        assert!(!bar_with(config.max_angle + 0.001).is_valid(&config));
    }

    #[test]
    fn area_and_aspect_gates() {
        let config = LightBarConfig::default();
        let mut tiny = bar_with(0.0);
        tiny.geom.ellipse_area = config.min_area - 1.0;
        assert!(!tiny.is_valid(&config));

        let mut squat = bar_with(0.0);
        squat.geom.long_axis = 10.0;
        squat.geom.short_axis = 9.0;
        assert!(!squat.is_valid(&config));

        let mut hollow = bar_with(0.0);
        hollow.solidity = config.min_solidity - 0.01;
        assert!(!hollow.is_valid(&config));
    }

    fn paint_bar(img: &mut RgbImage, x0: u32, y0: u32, w: u32, h: u32, color: [u8; 3]) {
        for y in y0..y0 + h {
            for x in x0..x0 + w {
                img.put_pixel(x, y, image::Rgb(color));
            }
        }
    }

    const BLUE_BAR: [u8; 3] = [180, 180, 255];
    const RED_BAR: [u8; 3] = [255, 180, 180];

    #[test]
    fn vertical_enemy_bar_is_found() {
        let mut img = RgbImage::new(320, 240);
        paint_bar(&mut img, 150, 80, 8, 60, BLUE_BAR);
        let bars = find_lightbars(&img, TeamColor::Blue, 160, 40, &LightBarConfig::default());
        assert_eq!(bars.len(), 1);
        let bar = &bars[0];
        assert!((bar.center().x - 154.0).abs() < 3.0);
        assert!((bar.center().y - 110.0).abs() < 3.0);
        assert!(bar.geom.angle_deg.abs() < 5.0);
        assert!(bar.geom.long_axis > bar.geom.short_axis * 2.0);
    }

    #[test]
    fn ally_colored_bar_is_filtered_out() {
        let mut img = RgbImage::new(320, 240);
        paint_bar(&mut img, 150, 80, 8, 60, RED_BAR);
        let bars = find_lightbars(&img, TeamColor::Blue, 160, 40, &LightBarConfig::default());
        assert!(bars.is_empty());
    }

    #[test]
    fn horizontal_bar_is_rejected_by_angle() {
        let mut img = RgbImage::new(320, 240);
        paint_bar(&mut img, 100, 100, 60, 8, BLUE_BAR);
        let bars = find_lightbars(&img, TeamColor::Blue, 160, 40, &LightBarConfig::default());
        assert!(bars.is_empty());
    }

    #[test]
    fn dim_bar_fails_brightness_mask() {
        let mut img = RgbImage::new(320, 240);
        paint_bar(&mut img, 150, 80, 8, 60, [0, 0, 120]);
        let bars = find_lightbars(&img, TeamColor::Blue, 160, 40, &LightBarConfig::default());
        assert!(bars.is_empty());
    }

    #[test]
    fn ellipse_fit_of_a_synthetic_ring() {
        // Points on an axis-aligned ellipse outline: the fit must recover
        // the axes and a near-vertical angle.
        let (a, b) = (30.0, 10.0); // semi-axes, long axis vertical
        let points: Vec<Point2<f64>> = (0..360)
            .map(|i| {
                let t = (i as f64).to_radians();
                Point2::new(50.0 + b * t.cos(), 80.0 + a * t.sin())
            })
            .collect();
        let geom = fit_ellipse(&points).unwrap();
        assert!((geom.center.x - 50.0).abs() < 1e-6);
        assert!((geom.center.y - 80.0).abs() < 1e-6);
        assert!((geom.long_axis - 2.0 * a).abs() < 0.5);
        assert!((geom.short_axis - 2.0 * b).abs() < 0.5);
        assert!(geom.angle_deg.abs() < 1e-6);
    }
}
