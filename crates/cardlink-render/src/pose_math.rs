//! Pose and field-of-view math shared by the render thread and the tracking task.

use glam::{Quat, Vec3};

use cardlink_vr::{Eye, Fov, HeadTracker, LensCalibration, Pose, ViewConfig, ViewInput};

/// Inverse of a unit quaternion (its conjugate).
pub fn inverse(q: Quat) -> Quat {
    Quat::from_xyzw(-q.x, -q.y, -q.z, q.w)
}

/// Rotate `v` by the unit quaternion `q`: `v + 2 * (w * (r x v) + r x (r x v))`.
pub fn rotate(q: Quat, v: Vec3) -> Vec3 {
    let r = Vec3::new(q.x, q.y, q.z);
    let rv = r.cross(v);
    let rrv = r.cross(rv);
    v + 2.0 * (q.w * rv + rrv)
}

/// Field of view for `eye`, remapped from the calibration's `[left, right, bottom, top]`
/// tangents so that every side is a non-negative angle away from the view axis.
pub fn field_of_view(calibration: &dyn LensCalibration, eye: Eye) -> Fov {
    let raw = calibration.field_of_view(eye);
    Fov {
        left: (-raw[0]).abs(),
        right: raw[1].abs(),
        up: raw[3].abs(),
        down: (-raw[2]).abs(),
    }
}

/// Derive both eyes' fov and horizontal head-to-eye offsets from a calibration.
pub fn view_config(calibration: &dyn LensCalibration) -> ViewConfig {
    let mut config = ViewConfig::default();
    for eye in Eye::BOTH {
        config.fov[eye.index()] = field_of_view(calibration, eye);
        // x translation of the column-major eye-from-head matrix
        config.eye_offsets[eye.index()] = calibration.eye_from_head_matrix(eye)[12];
    }
    config
}

/// Head pose predicted for `timestamp_ns`.
///
/// Only orientation is tracked. Position stays pinned at `floor_height` above the origin and
/// the tracker's raw translation is ignored.
pub fn predict_pose(tracker: &dyn HeadTracker, timestamp_ns: u64, floor_height: f32) -> Pose {
    let (raw_position, raw_orientation) = tracker.pose(timestamp_ns);
    let pose = Pose {
        position: Vec3::new(0.0, floor_height, 0.0),
        orientation: inverse(raw_orientation),
    };
    tracing::trace!(
        timestamp_ns,
        raw_position = ?raw_position,
        orientation = ?pose.orientation,
        "predicted head pose"
    );
    pose
}

/// Per-eye views for a head pose: each eye shares the head orientation and sits at the
/// head position minus its rotated head-to-eye offset.
pub fn eye_views(head: Pose, views: &ViewConfig) -> [ViewInput; 2] {
    Eye::BOTH.map(|eye| {
        let head_to_eye = Vec3::new(views.eye_offsets[eye.index()], 0.0, 0.0);
        ViewInput {
            orientation: head.orientation,
            position: head.position - rotate(head.orientation, head_to_eye),
            fov: views.fov[eye.index()],
            swapchain_index: 0,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cardlink_vr::DistortionMesh;

    const EPS: f32 = 1e-5;

    fn sample_quats() -> Vec<Quat> {
        vec![
            Quat::IDENTITY,
            Quat::from_rotation_y(std::f32::consts::FRAC_PI_2),
            Quat::from_rotation_x(-0.7),
            Quat::from_euler(glam::EulerRot::YXZ, 2.1, -0.4, 0.9),
            Quat::from_axis_angle(Vec3::new(1.0, 2.0, -3.0).normalize(), 3.0),
        ]
    }

    fn sample_vecs() -> Vec<Vec3> {
        vec![
            Vec3::ZERO,
            Vec3::X,
            Vec3::new(0.032, 0.0, 0.0),
            Vec3::new(-4.0, 2.5, 0.25),
        ]
    }

    #[test]
    fn test_inverse_undoes_rotation() {
        for q in sample_quats() {
            for v in sample_vecs() {
                let back = rotate(inverse(q), rotate(q, v));
                assert!((back - v).length() < EPS, "q={q:?} v={v:?} back={back:?}");
            }
        }
    }

    #[test]
    fn test_rotate_matches_glam() {
        for q in sample_quats() {
            for v in sample_vecs() {
                assert!((rotate(q, v) - q * v).length() < EPS);
            }
        }
    }

    #[test]
    fn test_inverse_is_conjugate() {
        let q = Quat::from_xyzw(0.1, 0.2, 0.3, 0.9).normalize();
        let inv = inverse(q);
        assert_eq!(inv.w, q.w);
        assert_eq!(inv.x, -q.x);
        assert!((q * inv).abs_diff_eq(Quat::IDENTITY, EPS));
    }

    struct RawFov {
        raw: [f32; 4],
        offset: f32,
    }

    impl LensCalibration for RawFov {
        fn field_of_view(&self, _eye: Eye) -> [f32; 4] {
            self.raw
        }

        fn eye_from_head_matrix(&self, eye: Eye) -> [f32; 16] {
            let mut m = [0.0; 16];
            m[0] = 1.0;
            m[5] = 1.0;
            m[10] = 1.0;
            m[15] = 1.0;
            m[12] = match eye {
                Eye::Left => self.offset,
                Eye::Right => -self.offset,
            };
            m
        }

        fn distortion_mesh(&self, _eye: Eye) -> DistortionMesh {
            DistortionMesh::default()
        }
    }

    #[test]
    fn test_fov_non_negative_for_either_sign_convention() {
        let signed = RawFov {
            raw: [-0.9, 1.1, -1.0, 1.2],
            offset: 0.03,
        };
        let unsigned = RawFov {
            raw: [0.9, 1.1, 1.0, 1.2],
            offset: 0.03,
        };
        for calibration in [&signed, &unsigned] {
            let fov = field_of_view(calibration, Eye::Left);
            assert!(fov.left >= 0.0 && fov.right >= 0.0 && fov.up >= 0.0 && fov.down >= 0.0);
            assert_eq!(fov.left, 0.9);
            assert_eq!(fov.right, 1.1);
            assert_eq!(fov.up, 1.2);
            assert_eq!(fov.down, 1.0);
        }
    }

    #[test]
    fn test_view_config_reads_matrix_translation() {
        let calibration = RawFov {
            raw: [-1.0, 1.0, -1.0, 1.0],
            offset: 0.032,
        };
        let cfg = view_config(&calibration);
        assert_eq!(cfg.eye_offsets, [0.032, -0.032]);
        assert!((cfg.ipd() - 0.064).abs() < EPS);
    }

    struct FixedTracker(Quat);

    impl HeadTracker for FixedTracker {
        fn resume(&self) {}
        fn pause(&self) {}
        fn pose(&self, _timestamp_ns: u64) -> ([f32; 3], Quat) {
            ([0.4, -0.2, 0.9], self.0)
        }
    }

    #[test]
    fn test_predicted_position_is_pinned_to_floor_height() {
        // Translation tracking is disabled: the raw tracker position must be ignored.
        let tracker = FixedTracker(Quat::from_rotation_y(0.5));
        let pose = predict_pose(&tracker, 1_000, 1.5);
        assert_eq!(pose.position, Vec3::new(0.0, 1.5, 0.0));
        assert!(pose
            .orientation
            .abs_diff_eq(inverse(Quat::from_rotation_y(0.5)), EPS));
    }

    #[test]
    fn test_eye_views_split_around_head() {
        let head = Pose {
            position: Vec3::new(0.0, 1.5, 0.0),
            orientation: Quat::IDENTITY,
        };
        let views = ViewConfig {
            fov: [Fov::default(); 2],
            eye_offsets: [0.032, -0.032],
        };
        let [left, right] = eye_views(head, &views);
        assert!((left.position - Vec3::new(-0.032, 1.5, 0.0)).length() < EPS);
        assert!((right.position - Vec3::new(0.032, 1.5, 0.0)).length() < EPS);

        let turned = Pose {
            orientation: Quat::from_rotation_y(std::f32::consts::PI),
            ..head
        };
        let [left, _] = eye_views(turned, &views);
        assert!((left.position - Vec3::new(0.032, 1.5, 0.0)).length() < 1e-4);
    }
}
