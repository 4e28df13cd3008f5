// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Synchronized joint velocities for joint space moves.
use log::{debug, warn};

use crate::exception::{create_invalid_configuration, CartesianResult};

/// Computes joint velocities such that all joints reach `qd` at the same time.
///
/// The slowest joint (largest `|qd - q| / q_ref_speeds`) determines the motion time, every other
/// joint is slowed down to arrive together with it. Joints at index `num_solver_joints` and above
/// do not take part in kinematics and are commanded to rest.
///
/// # Arguments
/// * `q` - Current joint positions in \[deg\].
/// * `qd` - Target joint positions in \[deg\].
/// * `q_ref_speeds` - Per-joint reference speeds in \[deg/s\], must be positive.
/// * `num_solver_joints` - number of joints taking part in kinematics.
/// * `qdot` - Output joint velocities in \[deg/s\]. Left untouched on error.
/// # Errors
/// * InvalidConfiguration if a reference speed of a solver joint is zero or negative.
/// # Return
/// The time in \[s\] the motion takes.
pub fn compute_isochronous_speeds(
    q: &[f64],
    qd: &[f64],
    q_ref_speeds: &[f64],
    num_solver_joints: usize,
    qdot: &mut [f64],
) -> CartesianResult<f64> {
    let mut max_time: f64 = 0.;

    for joint in 0..num_solver_joints {
        if q_ref_speeds[joint] <= 0. {
            warn!(
                "Zero or negative velocities sent at joint {}, not moving: {}.",
                joint, q_ref_speeds[joint]
            );
            return Err(create_invalid_configuration(format!(
                "reference speed of joint {} must be positive, got {}",
                joint, q_ref_speeds[joint]
            )));
        }
        let distance = (qd[joint] - q[joint]).abs();
        debug!("Distance (joint {}): {}", joint, distance);
        let target_time = distance / q_ref_speeds[joint];
        if target_time > max_time {
            max_time = target_time;
            debug!("Candidate: {}", max_time);
        }
    }

    for (joint, value) in qdot.iter_mut().enumerate() {
        if joint >= num_solver_joints || max_time == 0. {
            *value = 0.;
            debug!("qdot[{}] = 0.0 (forced)", joint);
        } else {
            *value = (qd[joint] - q[joint]).abs() / max_time;
            debug!("qdot[{}] = {}", joint, value);
        }
    }

    Ok(max_time)
}
