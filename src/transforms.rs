//! Coordinate transforms for 6-DOF poses
//!
//! Poses are `[x, y, z, roll, pitch, yaw]` with an optional seventh gripper
//! component. Angles are radians and rotations follow the ZYX convention,
//! `R = Rz(yaw) · Ry(pitch) · Rx(roll)`.
//!
//! Every function here is pure and deterministic.

use crate::error::{RecorderError, Result};
use crate::types::{Action, PoseState, GRIPPER_INDEX};
use nalgebra::{Matrix3, Matrix4, Vector3};
use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

/// Below this `sqrt(R00² + R10²)` the rotation is treated as gimbal-locked
const SINGULARITY_EPS: f64 = 1e-6;

/// Build a 3×3 rotation matrix from roll, pitch and yaw
pub fn euler_to_matrix(roll: f64, pitch: f64, yaw: f64) -> Matrix3<f64> {
    let (sr, cr) = roll.sin_cos();
    let (sp, cp) = pitch.sin_cos();
    let (sy, cy) = yaw.sin_cos();

    #[rustfmt::skip]
    let rx = Matrix3::new(
        1.0, 0.0, 0.0,
        0.0, cr,  -sr,
        0.0, sr,  cr,
    );
    #[rustfmt::skip]
    let ry = Matrix3::new(
        cp,  0.0, sp,
        0.0, 1.0, 0.0,
        -sp, 0.0, cp,
    );
    #[rustfmt::skip]
    let rz = Matrix3::new(
        cy,  -sy, 0.0,
        sy,  cy,  0.0,
        0.0, 0.0, 1.0,
    );

    rz * ry * rx
}

/// Recover `(roll, pitch, yaw)` from a rotation matrix
///
/// Near gimbal lock yaw is pinned to zero and roll is solved from the
/// remaining column.
pub fn matrix_to_euler(r: &Matrix3<f64>) -> (f64, f64, f64) {
    let sy = (r[(0, 0)].powi(2) + r[(1, 0)].powi(2)).sqrt();

    if sy >= SINGULARITY_EPS {
        let roll = r[(2, 1)].atan2(r[(2, 2)]);
        let pitch = (-r[(2, 0)]).atan2(sy);
        let yaw = r[(1, 0)].atan2(r[(0, 0)]);
        (roll, pitch, yaw)
    } else {
        let roll = (-r[(1, 2)]).atan2(r[(1, 1)]);
        let pitch = (-r[(2, 0)]).atan2(sy);
        (roll, pitch, 0.0)
    }
}

fn check_len(pose: &[f64], what: &str) -> Result<()> {
    if pose.len() < 6 {
        return Err(RecorderError::Shape(format!(
            "{} needs at least 6 components, got {}",
            what,
            pose.len()
        )));
    }
    Ok(())
}

/// Pack `[x, y, z, roll, pitch, yaw]` into a homogeneous transform
///
/// Only the first six components are used.
pub fn pose_to_matrix(pose: &[f64]) -> Result<Matrix4<f64>> {
    check_len(pose, "pose")?;
    let r = euler_to_matrix(pose[3], pose[4], pose[5]);

    let mut t = Matrix4::identity();
    t.fixed_view_mut::<3, 3>(0, 0).copy_from(&r);
    t.fixed_view_mut::<3, 1>(0, 3)
        .copy_from(&Vector3::new(pose[0], pose[1], pose[2]));
    Ok(t)
}

/// Unpack a homogeneous transform into `[x, y, z, roll, pitch, yaw]`
pub fn matrix_to_pose(t: &Matrix4<f64>) -> [f64; 6] {
    let r: Matrix3<f64> = t.fixed_view::<3, 3>(0, 0).into_owned();
    let (roll, pitch, yaw) = matrix_to_euler(&r);
    [t[(0, 3)], t[(1, 3)], t[(2, 3)], roll, pitch, yaw]
}

/// Closed-form inverse of a rigid-body transform, `[Rᵀ, −Rᵀt; 0, 1]`
pub fn inverse_transform(t: &Matrix4<f64>) -> Matrix4<f64> {
    let r_t = t.fixed_view::<3, 3>(0, 0).transpose();
    let trans: Vector3<f64> = t.fixed_view::<3, 1>(0, 3).into_owned();

    let mut inv = Matrix4::identity();
    inv.fixed_view_mut::<3, 3>(0, 0).copy_from(&r_t);
    inv.fixed_view_mut::<3, 1>(0, 3).copy_from(&(-(r_t * trans)));
    inv
}

/// Express `pose` in the frame of `reference` (both 6-vectors in world frame)
pub fn transform_pose(pose: &[f64], reference: &[f64]) -> Result<[f64; 6]> {
    let t_world_pose = pose_to_matrix(pose)?;
    let t_world_ref = pose_to_matrix(reference)?;
    Ok(matrix_to_pose(&(inverse_transform(&t_world_ref) * t_world_pose)))
}

/// Relative pose of `pose` with respect to `reference`
///
/// Returns six components, or seven when `pose` carries a gripper and
/// `preserve_gripper` is set. The gripper is copied from `pose` unchanged.
pub fn relative_pose(pose: &[f64], reference: &[f64], preserve_gripper: bool) -> Result<Vec<f64>> {
    let delta = transform_pose(pose, reference)?;
    let mut out = delta.to_vec();
    if preserve_gripper && pose.len() > GRIPPER_INDEX {
        out.push(pose[GRIPPER_INDEX]);
    }
    Ok(out)
}

/// Action for a full pose state relative to a reference state
pub fn relative_action(pose: &PoseState, reference: &PoseState) -> Action {
    let t_pose = pose_matrix(pose);
    let t_ref = pose_matrix(reference);
    let delta = matrix_to_pose(&(inverse_transform(&t_ref) * t_pose));
    [
        delta[0],
        delta[1],
        delta[2],
        delta[3],
        delta[4],
        delta[5],
        pose[GRIPPER_INDEX],
    ]
}

/// Apply a relative 6-vector `delta` on top of `reference`, `T_ref · T_delta`
///
/// This is the inverse of [`relative_action`] for the first six components.
pub fn compose_pose(reference: &[f64], delta: &[f64]) -> Result<[f64; 6]> {
    let t_ref = pose_to_matrix(reference)?;
    let t_delta = pose_to_matrix(delta)?;
    Ok(matrix_to_pose(&(t_ref * t_delta)))
}

fn pose_matrix(pose: &PoseState) -> Matrix4<f64> {
    let r = euler_to_matrix(pose[3], pose[4], pose[5]);
    let mut t = Matrix4::identity();
    t.fixed_view_mut::<3, 3>(0, 0).copy_from(&r);
    t[(0, 3)] = pose[0];
    t[(1, 3)] = pose[1];
    t[(2, 3)] = pose[2];
    t
}

fn rotate_about_z(pose: &PoseState, rz: Matrix3<f64>) -> PoseState {
    let position = rz * Vector3::new(pose[0], pose[1], pose[2]);
    let r = rz * euler_to_matrix(pose[3], pose[4], pose[5]);
    let (roll, pitch, yaw) = matrix_to_euler(&r);
    [
        position.x,
        position.y,
        position.z,
        roll,
        pitch,
        yaw,
        pose[GRIPPER_INDEX],
    ]
}

/// Rotate a pose 90° clockwise about +z: `(x, y) → (y, −x)`
pub fn rotate_frame_z_90_cw(pose: &PoseState) -> PoseState {
    #[rustfmt::skip]
    let rz = Matrix3::new(
        0.0,  1.0, 0.0,
        -1.0, 0.0, 0.0,
        0.0,  0.0, 1.0,
    );
    rotate_about_z(pose, rz)
}

/// Rotate a pose 90° counter-clockwise about +z: `(x, y) → (−y, x)`
pub fn rotate_frame_z_90_ccw(pose: &PoseState) -> PoseState {
    #[rustfmt::skip]
    let rz = Matrix3::new(
        0.0, -1.0, 0.0,
        1.0, 0.0,  0.0,
        0.0, 0.0,  1.0,
    );
    rotate_about_z(pose, rz)
}

/// Rotation matrix from a `(w, x, y, z)` quaternion, normalizing first
pub fn quaternion_to_matrix(qw: f64, qx: f64, qy: f64, qz: f64) -> Matrix3<f64> {
    let norm = (qw * qw + qx * qx + qy * qy + qz * qz).sqrt();
    if norm == 0.0 {
        return Matrix3::identity();
    }
    let (w, x, y, z) = (qw / norm, qx / norm, qy / norm, qz / norm);

    #[rustfmt::skip]
    let r = Matrix3::new(
        1.0 - 2.0 * (y * y + z * z), 2.0 * (x * y - w * z),       2.0 * (x * z + w * y),
        2.0 * (x * y + w * z),       1.0 - 2.0 * (x * x + z * z), 2.0 * (y * z - w * x),
        2.0 * (x * z - w * y),       2.0 * (y * z + w * x),       1.0 - 2.0 * (x * x + y * y),
    );
    r
}

/// `(w, x, y, z)` quaternion from a rotation matrix
pub fn matrix_to_quaternion(r: &Matrix3<f64>) -> (f64, f64, f64, f64) {
    let trace = r.trace();
    if trace > 0.0 {
        let s = 0.5 / (trace + 1.0).sqrt();
        (
            0.25 / s,
            (r[(2, 1)] - r[(1, 2)]) * s,
            (r[(0, 2)] - r[(2, 0)]) * s,
            (r[(1, 0)] - r[(0, 1)]) * s,
        )
    } else if r[(0, 0)] > r[(1, 1)] && r[(0, 0)] > r[(2, 2)] {
        let s = 2.0 * (1.0 + r[(0, 0)] - r[(1, 1)] - r[(2, 2)]).sqrt();
        (
            (r[(2, 1)] - r[(1, 2)]) / s,
            0.25 * s,
            (r[(0, 1)] + r[(1, 0)]) / s,
            (r[(0, 2)] + r[(2, 0)]) / s,
        )
    } else if r[(1, 1)] > r[(2, 2)] {
        let s = 2.0 * (1.0 + r[(1, 1)] - r[(0, 0)] - r[(2, 2)]).sqrt();
        (
            (r[(0, 2)] - r[(2, 0)]) / s,
            (r[(0, 1)] + r[(1, 0)]) / s,
            0.25 * s,
            (r[(1, 2)] + r[(2, 1)]) / s,
        )
    } else {
        let s = 2.0 * (1.0 + r[(2, 2)] - r[(0, 0)] - r[(1, 1)]).sqrt();
        (
            (r[(1, 0)] - r[(0, 1)]) / s,
            (r[(0, 2)] + r[(2, 0)]) / s,
            (r[(1, 2)] + r[(2, 1)]) / s,
            0.25 * s,
        )
    }
}

/// Relative poses for every row of an `N × 6` or `N × 7` array
///
/// The output has the same shape as the input; a seventh column is carried
/// through unchanged.
pub fn batch_relative_poses(poses: ArrayView2<'_, f64>, reference: &[f64]) -> Result<Array2<f64>> {
    let mut out = Array2::zeros(poses.raw_dim());
    for (row_in, mut row_out) in poses.outer_iter().zip(out.outer_iter_mut()) {
        let row = row_in.to_vec();
        let rel = relative_pose(&row, reference, true)?;
        for (dst, src) in row_out.iter_mut().zip(rel) {
            *dst = src;
        }
    }
    Ok(out)
}

/// Fixed frame rotation applied to derived actions
///
/// Aligns the pose tracker's frame with the force sensor's frame. The
/// direction is a static property of the rig.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameAlignment {
    /// Leave actions in the tracker frame
    #[default]
    None,
    /// Rotate 90° clockwise about z
    Clockwise,
    /// Rotate 90° counter-clockwise about z
    CounterClockwise,
}

impl FrameAlignment {
    /// Apply the rotation to a 7-vector
    pub fn apply(&self, pose: &PoseState) -> PoseState {
        match self {
            FrameAlignment::None => *pose,
            FrameAlignment::Clockwise => rotate_frame_z_90_cw(pose),
            FrameAlignment::CounterClockwise => rotate_frame_z_90_ccw(pose),
        }
    }
}

impl std::str::FromStr for FrameAlignment {
    type Err = RecorderError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "none" => Ok(FrameAlignment::None),
            "clockwise" | "cw" => Ok(FrameAlignment::Clockwise),
            "counter_clockwise" | "ccw" => Ok(FrameAlignment::CounterClockwise),
            other => Err(RecorderError::Config(format!(
                "Unknown frame alignment '{}'",
                other
            ))),
        }
    }
}

impl std::fmt::Display for FrameAlignment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameAlignment::None => write!(f, "none"),
            FrameAlignment::Clockwise => write!(f, "clockwise"),
            FrameAlignment::CounterClockwise => write!(f, "counter_clockwise"),
        }
    }
}
