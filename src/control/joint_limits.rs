// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains the joint safety checks which gate every joint space command.
use log::warn;

use crate::exception::{
    create_invalid_configuration, CartesianException, CartesianResult, LimitKind,
};

/// Safety margin in \[deg\]. A joint is reported as out of limits this far before the hard limit.
pub static LIMIT_EPS: f64 = 1e-5;

/// Position and velocity limits of the actuated joints.
///
/// Only the first `num_solver_joints` joints take part in kinematics and are checked.
#[derive(Debug, Clone)]
pub struct JointLimits {
    q_min: Vec<f64>,
    q_max: Vec<f64>,
    qdot_min: Vec<f64>,
    qdot_max: Vec<f64>,
    num_solver_joints: usize,
}

fn sign(value: f64) -> i8 {
    if value > 0. {
        1
    } else if value < 0. {
        -1
    } else {
        0
    }
}

impl JointLimits {
    /// Creates a new set of limits.
    ///
    /// # Errors
    /// * InvalidConfiguration if the vectors differ in length, are shorter than
    /// `num_solver_joints`, a lower bound is not below its upper bound, or a position range is
    /// so narrow that both safety margins overlap.
    pub fn new(
        q_min: Vec<f64>,
        q_max: Vec<f64>,
        qdot_min: Vec<f64>,
        qdot_max: Vec<f64>,
        num_solver_joints: usize,
    ) -> CartesianResult<Self> {
        let len = q_min.len();
        if q_max.len() != len || qdot_min.len() != len || qdot_max.len() != len {
            return Err(create_invalid_configuration(
                "joint limit vectors must have the same length",
            ));
        }
        if num_solver_joints > len {
            return Err(create_invalid_configuration(format!(
                "{} solver joints but only {} joint limits",
                num_solver_joints, len
            )));
        }
        for joint in 0..len {
            if !(q_max[joint] - q_min[joint] > 2. * LIMIT_EPS) {
                return Err(create_invalid_configuration(format!(
                    "joint {}: position range [{}, {}] is empty or narrower than the safety margin",
                    joint, q_min[joint], q_max[joint]
                )));
            }
            if !(qdot_min[joint] <= qdot_max[joint]) {
                return Err(create_invalid_configuration(format!(
                    "joint {}: velocity range [{}, {}] is empty",
                    joint, qdot_min[joint], qdot_max[joint]
                )));
            }
        }
        Ok(JointLimits {
            q_min,
            q_max,
            qdot_min,
            qdot_max,
            num_solver_joints,
        })
    }

    pub fn num_solver_joints(&self) -> usize {
        self.num_solver_joints
    }

    pub fn num_joints(&self) -> usize {
        self.q_min.len()
    }

    fn position_violation(&self, joint: usize, value: f64) -> CartesianException {
        CartesianException::LimitViolation {
            joint,
            value,
            min: self.q_min[joint],
            max: self.q_max[joint],
            kind: LimitKind::Position,
        }
    }

    /// NaN counts as out of limits.
    fn near_limits(&self, joint: usize, value: f64) -> bool {
        !(value >= self.q_min[joint] + LIMIT_EPS && value <= self.q_max[joint] - LIMIT_EPS)
    }

    /// Checks that every solver joint of `q` lies inside its limits shrunk by [`LIMIT_EPS`].
    pub fn check_joint_limits(&self, q: &[f64]) -> CartesianResult<()> {
        for joint in 0..self.num_solver_joints {
            let value = q[joint];
            if self.near_limits(joint, value) {
                warn!(
                    "Joint near or out of limits: q[{}] = {} not in [{},{}] (deg).",
                    joint, value, self.q_min[joint], self.q_max[joint]
                );
                return Err(self.position_violation(joint, value));
            }
        }
        Ok(())
    }

    /// Like [`check_joint_limits`](`Self::check_joint_limits`), but a joint which is near or past
    /// a limit may still move if `qdot` takes it back towards the middle of its range.
    pub fn check_joint_limits_with_velocity(
        &self,
        q: &[f64],
        qdot: &[f64],
    ) -> CartesianResult<()> {
        for joint in 0..self.num_solver_joints {
            let value = q[joint];
            if value.is_nan() || qdot[joint].is_nan() {
                warn!(
                    "Invalid joint state: q[{}] = {}, qdot[{}] = {}.",
                    joint, value, joint, qdot[joint]
                );
                return Err(self.position_violation(joint, value));
            }
            if self.near_limits(joint, value) {
                warn!(
                    "Joint near or out of limits: q[{}] = {} not in [{},{}] (deg).",
                    joint, value, self.q_min[joint], self.q_max[joint]
                );
                let mid_range = (self.q_max[joint] + self.q_min[joint]) / 2.;
                if sign(value - mid_range) == sign(qdot[joint]) {
                    return Err(self.position_violation(joint, value));
                }
            }
        }
        Ok(())
    }

    /// Checks that every solver joint velocity lies inside `[qdot_min, qdot_max]`.
    pub fn check_joint_velocities(&self, qdot: &[f64]) -> CartesianResult<()> {
        for joint in 0..self.num_solver_joints {
            let value = qdot[joint];
            if !(value >= self.qdot_min[joint] && value <= self.qdot_max[joint]) {
                warn!(
                    "Maximum angular velocity hit: qdot[{}] = {} not in [{},{}] (deg/s).",
                    joint, value, self.qdot_min[joint], self.qdot_max[joint]
                );
                return Err(CartesianException::LimitViolation {
                    joint,
                    value,
                    min: self.qdot_min[joint],
                    max: self.qdot_max[joint],
                    kind: LimitKind::Velocity,
                });
            }
        }
        Ok(())
    }
}
