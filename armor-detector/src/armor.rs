//! Lightbar pairing.
//!
//! Every ordered pair of accepted lightbars (left of right by center x) is
//! a candidate armor plate. Candidates run a gauntlet of geometric gates;
//! survivors carry the four ordered vertices the pose solver needs.

use nalgebra::Point2;
use tracing::trace;

use autoaim_config_data::ArmorConfig;
use autoaim_types::ArmorSize;

use crate::lightbar::LightBar;

/// A paired armor candidate before digit classification.
#[derive(Debug, Clone)]
pub(crate) struct RawArmor {
    pub left: LightBar,
    pub right: LightBar,
    /// TL, TR, BR, BL in image coordinates.
    pub vertices: [Point2<f64>; 4],
    pub center: Point2<f64>,
    /// Tilt of the lightbar-center line from horizontal, degrees.
    pub roll_deg: f64,
    pub size: ArmorSize,
}

/// Midpoints of the top two and bottom two corners of a lightbar's
/// oriented rectangle.
fn top_bottom_midpoints(bar: &LightBar) -> (Point2<f64>, Point2<f64>) {
    let mut corners = bar.rect_corners();
    corners.sort_by(|a, b| a.y.total_cmp(&b.y));
    let top = nalgebra::center(&corners[0], &corners[1]);
    let bottom = nalgebra::center(&corners[2], &corners[3]);
    (top, bottom)
}

/// Order four midpoints as TL, TR, BR, BL: sort by x, then resolve each
/// side's pair by y.
fn order_vertices(mids: [Point2<f64>; 4]) -> [Point2<f64>; 4] {
    let mut sorted = mids;
    sorted.sort_by(|a, b| a.x.total_cmp(&b.x).then(a.y.total_cmp(&b.y)));
    let (l0, l1, r0, r1) = (sorted[0], sorted[1], sorted[2], sorted[3]);
    let (tl, bl) = if l0.y < l1.y { (l0, l1) } else { (l1, l0) };
    let (tr, br) = if r0.y < r1.y { (r0, r1) } else { (r1, r0) };
    [tl, tr, br, bl]
}

fn quad_area(vertices: &[Point2<f64>; 4]) -> f64 {
    let mut acc = 0.0;
    for i in 0..4 {
        let a = vertices[i];
        let b = vertices[(i + 1) % 4];
        acc += a.x * b.y - b.x * a.y;
    }
    acc.abs() / 2.0
}

/// Whether `p` lies inside the convex quadrilateral `quad` (TL,TR,BR,BL
/// winding).
fn inside_convex_quad(quad: &[Point2<f64>; 4], p: &Point2<f64>) -> bool {
    let mut sign = 0.0f64;
    for i in 0..4 {
        let a = quad[i];
        let b = quad[(i + 1) % 4];
        let cross = (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x);
        if cross.abs() < f64::EPSILON {
            continue;
        }
        if sign == 0.0 {
            sign = cross.signum();
        } else if cross.signum() != sign {
            return false;
        }
    }
    true
}

impl RawArmor {
    fn build(left: &LightBar, right: &LightBar) -> RawArmor {
        let (lt, lb) = top_bottom_midpoints(left);
        let (rt, rb) = top_bottom_midpoints(right);
        let vertices = order_vertices([lt, lb, rt, rb]);
        let center = Point2::new(
            vertices.iter().map(|v| v.x).sum::<f64>() / 4.0,
            vertices.iter().map(|v| v.y).sum::<f64>() / 4.0,
        );
        let dist = nalgebra::distance(&left.center(), &right.center());
        let roll_deg = ((left.center().y - right.center().y).abs() / dist)
            .asin()
            .to_degrees();
        RawArmor {
            left: left.clone(),
            right: right.clone(),
            vertices,
            center,
            roll_deg,
            size: ArmorSize::Small,
        }
    }

    /// Run the pairing gates; on success the size class is filled in.
    fn validate(&mut self, config: &ArmorConfig) -> bool {
        // Vertical overlap: one bar entirely above the other forbids pairing.
        let (_, l_top, _, l_bottom) = self.left.bounds();
        let (_, r_top, _, r_bottom) = self.right.bounds();
        if l_bottom < r_top || r_bottom < l_top {
            trace!("pair rejected: no vertical overlap");
            return false;
        }

        let area_ratio = self.left.geom.ellipse_area / self.right.geom.ellipse_area;
        if area_ratio > config.lightbar_area_ratio || area_ratio < 1.0 / config.lightbar_area_ratio
        {
            trace!("pair rejected: lightbar area ratio {area_ratio:.2}");
            return false;
        }

        let armor_area = quad_area(&self.vertices);
        if armor_area < config.min_area {
            trace!("pair rejected: armor area {armor_area:.0}");
            return false;
        }

        let bar_area_ratio =
            (self.left.geom.ellipse_area + self.right.geom.ellipse_area) / armor_area;
        if bar_area_ratio > config.max_light_bar_armor_area_ratio {
            trace!("pair rejected: lightbar/armor area ratio {bar_area_ratio:.2}");
            return false;
        }

        if self.roll_deg.abs() > config.max_roll_angle {
            trace!("pair rejected: roll {:.1} deg", self.roll_deg);
            return false;
        }

        let left_len = self.left.geom.long_axis;
        let right_len = self.right.geom.long_axis;
        let mean_length = (left_len + right_len) / 2.0;
        let height_diff_ratio = (left_len - right_len).abs() / left_len.max(right_len);
        if height_diff_ratio > config.max_height_diff_ratio {
            trace!("pair rejected: height diff ratio {height_diff_ratio:.2}");
            return false;
        }

        let y_diff_ratio =
            (self.left.center().y - self.right.center().y).abs() / mean_length;
        if y_diff_ratio > config.max_y_diff_ratio {
            trace!("pair rejected: y diff ratio {y_diff_ratio:.2}");
            return false;
        }

        let center_dist = nalgebra::distance(&self.left.center(), &self.right.center());
        let x_diff_ratio = center_dist / mean_length;
        if x_diff_ratio < config.min_x_diff_ratio {
            trace!("pair rejected: x diff ratio {x_diff_ratio:.2}");
            return false;
        }

        // Aspect ratio of the plate: lightbar spacing over lightbar length.
        let aspect_ratio = center_dist / mean_length;
        if aspect_ratio < config.min_aspect_ratio || aspect_ratio > config.max_aspect_ratio {
            trace!("pair rejected: aspect ratio {aspect_ratio:.2}");
            return false;
        }

        // Lightbar tilt agreement, folding the wrap-around near 180.
        let mut angle_diff = (self.left.geom.angle_deg - self.right.geom.angle_deg).abs();
        if angle_diff > 180.0 {
            angle_diff -= 180.0;
        } else if angle_diff > 170.0 {
            angle_diff = 180.0 - angle_diff;
        }
        if angle_diff > config.max_angle_diff {
            trace!("pair rejected: angle diff {angle_diff:.1} deg");
            return false;
        }

        self.size = if aspect_ratio > config.big_armor_ratio {
            ArmorSize::Large
        } else {
            ArmorSize::Small
        };
        true
    }
}

/// Pair accepted lightbars into armor candidates.
///
/// Bars are sorted by center x; every ordered pair is considered, except
/// pairs whose armor quad contains some other accepted bar's center (an
/// interfering lightbar forbids pairing).
pub(crate) fn pair_armors(bars: &[LightBar], config: &ArmorConfig) -> Vec<RawArmor> {
    let mut sorted: Vec<&LightBar> = bars.iter().collect();
    sorted.sort_by(|a, b| a.center().x.total_cmp(&b.center().x));

    let mut armors = Vec::new();
    for i in 0..sorted.len() {
        for j in (i + 1)..sorted.len() {
            let mut armor = RawArmor::build(sorted[i], sorted[j]);
            let interference = sorted.iter().enumerate().any(|(k, bar)| {
                k != i && k != j && inside_convex_quad(&armor.vertices, &bar.center())
            });
            if interference {
                trace!("pair rejected: interfering lightbar inside armor quad");
                continue;
            }
            if armor.validate(config) {
                armors.push(armor);
            }
        }
    }
    armors
}
