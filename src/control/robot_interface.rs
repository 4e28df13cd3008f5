// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains the interfaces of the collaborators the controller drives: the joint actuators, the
//! kinematics solver and an optional end effector actuator.
use crate::control::control_types::{ActuatorCommand, ControlMode};
use crate::exception::CartesianResult;
use crate::utils::{JointVector, Pose, Twist, Wrench};

#[cfg(test)]
use mockall::automock;

/// Per-joint access to the arm's actuators and encoders.
///
/// All calls are batched over the joints. Implementations synchronize internally, the
/// controller and the periodic loops call into them from several threads.
#[cfg_attr(test, automock)]
pub trait JointInterface: Send + Sync {
    /// number of actuated joints
    fn num_joints(&self) -> usize;
    fn get_control_modes(&self) -> CartesianResult<Vec<ControlMode>>;
    /// Sets `modes[i]` on joint `joints[i]`, other joints are not touched.
    fn set_control_modes(&self, joints: &[usize], modes: &[ControlMode]) -> CartesianResult<()>;
    /// joint positions in \[deg\]
    fn get_positions(&self) -> CartesianResult<JointVector>;
    /// joint velocities in \[deg/s\]
    fn get_velocities(&self) -> CartesianResult<JointVector>;
    /// reference speeds in \[deg/s\] used by [`position_move`](`Self::position_move`)
    fn set_ref_speeds(&self, speeds: &[f64]) -> CartesianResult<()>;
    /// starts an interpolated move towards `targets` (position mode)
    fn position_move(&self, targets: &[f64]) -> CartesianResult<()>;
    /// whether the last [`position_move`](`Self::position_move`) has finished
    fn check_motion_done(&self) -> CartesianResult<bool>;
    /// applies positions without interpolation (position direct mode)
    fn set_positions(&self, positions: &[f64]) -> CartesianResult<()>;
    /// velocity mode command in \[deg/s\]
    fn set_velocities(&self, velocities: &[f64]) -> CartesianResult<()>;
    /// torque mode command in \[Nm\]
    fn set_ref_torques(&self, torques: &[f64]) -> CartesianResult<()>;
    /// halts all joints
    fn stop(&self) -> CartesianResult<()>;
}

/// Kinematics and dynamics of the arm. Works on the first [`num_joints`](`Self::num_joints`)
/// joints only, poses and twists are expressed in the base frame.
#[cfg_attr(test, automock)]
pub trait Solver: Send + Sync {
    /// number of joints taking part in kinematics
    fn num_joints(&self) -> usize;
    /// forward kinematics
    fn fwd_kin(&self, q: &[f64]) -> CartesianResult<Pose>;
    /// Inverse kinematics seeded with `q_guess`.
    ///
    /// # Errors
    /// * SolverFailure if `xd` is not reachable.
    fn inv_kin(&self, xd: &Pose, q_guess: &[f64]) -> CartesianResult<JointVector>;
    /// joint velocities realizing the Cartesian velocity `xdot` at `q`
    fn diff_inv_kin(&self, q: &[f64], xdot: &Twist) -> CartesianResult<JointVector>;
    /// joint torques compensating gravity at `q` and exerting `wrench` at the end effector
    fn inv_dyn(&self, q: &[f64], wrench: &Wrench) -> CartesianResult<JointVector>;
}

/// An end effector actuator such as a gripper.
#[cfg_attr(test, automock)]
pub trait ToolActuator: Send + Sync {
    fn actuate(&self, command: ActuatorCommand) -> CartesianResult<()>;
}
