// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! contains useful type definitions and conversion functions.
use std::sync::{Mutex, MutexGuard, PoisonError};

use nalgebra::{Isometry3, Translation3, UnitQuaternion, Vector3, Vector6};

/// Joint positions in \[deg\] or joint velocities in \[deg/s\], one entry per actuated joint.
pub type JointVector = Vec<f64>;
/// Cartesian pose: translation in \[m\] followed by a rotation vector (axis scaled by angle) in \[rad\].
pub type Pose = [f64; 6];
/// Cartesian velocity: linear velocity in \[m/s\] followed by angular velocity in \[rad/s\].
pub type Twist = [f64; 6];
/// Cartesian wrench: force in \[N\] followed by torque in \[Nm\].
pub type Wrench = [f64; 6];

/// converts a 6-element pose into an Isometry
pub fn pose_to_isometry(pose: &Pose) -> Isometry3<f64> {
    Isometry3::from_parts(
        Translation3::new(pose[0], pose[1], pose[2]),
        UnitQuaternion::from_scaled_axis(Vector3::new(pose[3], pose[4], pose[5])),
    )
}

/// converts an Isometry into a 6-element pose
pub fn isometry_to_pose(isometry: &Isometry3<f64>) -> Pose {
    let translation = isometry.translation.vector;
    let rotation = isometry.rotation.scaled_axis();
    [
        translation.x,
        translation.y,
        translation.z,
        rotation.x,
        rotation.y,
        rotation.z,
    ]
}

/// Applies `delta`, expressed in the frame of `pose`, to `pose`.
///
/// Used for tool (TCP) frame commands, where an increment is relative to the current end effector.
pub fn compose_pose(pose: &Pose, delta: &Pose) -> Pose {
    isometry_to_pose(&(pose_to_isometry(pose) * pose_to_isometry(delta)))
}

/// Computes the base frame displacement which brings `x` to `xd`.
///
/// The first three entries are the translational difference, the last three the rotation vector
/// of `R_d * R^T`.
pub fn pose_difference(xd: &Pose, x: &Pose) -> Twist {
    let target = pose_to_isometry(xd);
    let current = pose_to_isometry(x);
    let translation = target.translation.vector - current.translation.vector;
    let rotation = (target.rotation * current.rotation.inverse()).scaled_axis();
    [
        translation.x,
        translation.y,
        translation.z,
        rotation.x,
        rotation.y,
        rotation.z,
    ]
}

/// Rotates a twist (or wrench) expressed in the tool frame of `pose` into the base frame.
pub fn tool_to_base_frame(pose: &Pose, value: &Twist) -> Twist {
    let rotation = pose_to_isometry(pose).rotation;
    let linear = rotation * Vector3::new(value[0], value[1], value[2]);
    let angular = rotation * Vector3::new(value[3], value[4], value[5]);
    [
        linear.x, linear.y, linear.z, angular.x, angular.y, angular.z,
    ]
}

/// adds two 6-element vectors scaled as `a + factor * b`
pub fn add_scaled(a: &[f64; 6], b: &[f64; 6], factor: f64) -> [f64; 6] {
    (Vector6::from_row_slice(a) + Vector6::from_row_slice(b) * factor).into()
}

/// Locks `mutex`, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
