use std::collections::{BTreeMap, VecDeque};

use nalgebra::Isometry3;

/// The five coordinate frames of the turret.
///
/// `Armor` is attached to the observed plate; `Camera` is the optical frame
/// (x right, y down, z forward); `Imu` rotates with the gimbal; `Base` is
/// the IMU attitude at power-on; `Barrel` has its origin at the muzzle with
/// x forward, y left, z up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FrameId {
    Armor,
    Camera,
    Imu,
    Base,
    Barrel,
}

/// Directed graph of rigid transforms between frames.
///
/// Each registered edge also registers its inverse, so any connected pair
/// resolves. All transforms are SE(3); no scaling can enter the graph by
/// construction.
#[derive(Default)]
pub struct FrameGraph {
    edges: BTreeMap<FrameId, Vec<(FrameId, Isometry3<f64>)>>,
}

impl FrameGraph {
    pub fn new() -> FrameGraph {
        FrameGraph::default()
    }

    /// Register `to_from`, the transform taking coordinates in `from` to
    /// coordinates in `to`.
    pub fn register(&mut self, from: FrameId, to: FrameId, to_from: Isometry3<f64>) {
        self.edges.entry(from).or_default().push((to, to_from));
        self.edges
            .entry(to)
            .or_default()
            .push((from, to_from.inverse()));
    }

    /// Resolve the transform taking coordinates in `from` to coordinates in
    /// `to`, composing over the shortest edge path.
    pub fn resolve(&self, from: FrameId, to: FrameId) -> Option<Isometry3<f64>> {
        if from == to {
            return Some(Isometry3::identity());
        }
        let mut queue = VecDeque::new();
        let mut visited = vec![from];
        queue.push_back((from, Isometry3::identity()));
        while let Some((node, acc)) = queue.pop_front() {
            for (next, edge) in self.edges.get(&node).into_iter().flatten() {
                if visited.contains(next) {
                    continue;
                }
                // acc takes `from` to `node`; the edge lifts that to `next`.
                let next_acc = edge * acc;
                if *next == to {
                    return Some(next_acc);
                }
                visited.push(*next);
                queue.push_back((*next, next_acc));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{Point3, Translation3, UnitQuaternion, Vector3};

    fn some_isometry(seed: f64) -> Isometry3<f64> {
        Isometry3::from_parts(
            Translation3::new(seed, -seed * 0.5, seed * 2.0),
            UnitQuaternion::from_scaled_axis(Vector3::new(0.1 * seed, 0.2, -0.3 * seed)),
        )
    }

    #[test]
    fn inverse_round_trip_is_identity() {
        let h = some_isometry(1.7);
        let eye = h * h.inverse();
        let diff = eye.to_homogeneous() - Isometry3::identity().to_homogeneous();
        assert!(diff.norm() < 1e-9, "Frobenius norm {}", diff.norm());
    }

    #[test]
    fn bfs_resolution_matches_direct_composition() {
        let ac = some_isometry(0.3); // armor -> camera
        let ci = some_isometry(1.1); // camera -> imu
        let ib = some_isometry(2.2); // imu -> base
        let bb = some_isometry(0.9); // base -> barrel

        let mut graph = FrameGraph::new();
        graph.register(FrameId::Armor, FrameId::Camera, ac);
        graph.register(FrameId::Camera, FrameId::Imu, ci);
        graph.register(FrameId::Imu, FrameId::Base, ib);
        graph.register(FrameId::Base, FrameId::Barrel, bb);

        let chain = bb * ib * ci * ac;
        let resolved = graph.resolve(FrameId::Armor, FrameId::Barrel).unwrap();
        assert_relative_eq!(
            chain.to_homogeneous(),
            resolved.to_homogeneous(),
            epsilon = 1e-12
        );

        let p = Point3::new(0.1, 0.2, 3.0);
        assert_relative_eq!(chain * p, resolved * p, epsilon = 1e-12);
    }

    #[test]
    fn reverse_resolution_is_the_inverse() {
        let ac = some_isometry(0.5);
        let mut graph = FrameGraph::new();
        graph.register(FrameId::Armor, FrameId::Camera, ac);
        let fwd = graph.resolve(FrameId::Armor, FrameId::Camera).unwrap();
        let back = graph.resolve(FrameId::Camera, FrameId::Armor).unwrap();
        let eye = fwd * back;
        assert_relative_eq!(
            eye.to_homogeneous(),
            Isometry3::identity().to_homogeneous(),
            epsilon = 1e-9
        );
    }

    #[test]
    fn disconnected_frames_do_not_resolve() {
        let mut graph = FrameGraph::new();
        graph.register(FrameId::Armor, FrameId::Camera, some_isometry(0.2));
        assert!(graph.resolve(FrameId::Armor, FrameId::Barrel).is_none());
    }
}
