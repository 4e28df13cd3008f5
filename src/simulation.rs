// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! A simulated arm for tests and demos.
//!
//! [`SimulatedRobot`] integrates the commanded motion when [`step`](`SimulatedRobot::step`) is
//! called and refuses commands which do not match the control mode of a joint, like a real joint
//! interface does. [`IdentitySolver`] maps the first six joints one to one onto the six pose
//! components.
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::trace;

use crate::control::control_loop::PeriodicTask;
use crate::control::control_types::ControlMode;
use crate::control::robot_interface::{JointInterface, Solver};
use crate::exception::{CartesianException, CartesianResult};
use crate::utils::{lock, JointVector, Pose, Twist, Wrench};

#[derive(Debug)]
struct SimulatedJoints {
    modes: Vec<ControlMode>,
    positions: Vec<f64>,
    velocities: Vec<f64>,
    ref_speeds: Vec<f64>,
    targets: Option<Vec<f64>>,
    torques: Vec<f64>,
    mode_writes: usize,
}

fn joint_exception(message: String) -> CartesianException {
    CartesianException::JointInterfaceException { message }
}

impl SimulatedJoints {
    fn check_length(&self, values: &[f64]) -> CartesianResult<()> {
        if values.len() != self.positions.len() {
            return Err(joint_exception(format!(
                "expected {} values, got {}",
                self.positions.len(),
                values.len()
            )));
        }
        Ok(())
    }

    fn require_mode(&self, mode: ControlMode) -> CartesianResult<()> {
        match self.modes.iter().position(|m| *m != mode) {
            Some(joint) => Err(joint_exception(format!(
                "joint {} is in {:?} mode, command needs {:?}",
                joint, self.modes[joint], mode
            ))),
            None => Ok(()),
        }
    }
}

/// Simulated joint interface. Starts at rest in [`ControlMode::Position`].
#[derive(Debug)]
pub struct SimulatedRobot {
    joints: Mutex<SimulatedJoints>,
}

impl SimulatedRobot {
    pub fn new(num_joints: usize) -> Self {
        SimulatedRobot::with_positions(vec![0.; num_joints])
    }

    pub fn with_positions(positions: Vec<f64>) -> Self {
        let num_joints = positions.len();
        SimulatedRobot {
            joints: Mutex::new(SimulatedJoints {
                modes: vec![ControlMode::Position; num_joints],
                positions,
                velocities: vec![0.; num_joints],
                ref_speeds: vec![0.; num_joints],
                targets: None,
                torques: vec![0.; num_joints],
                mode_writes: 0,
            }),
        }
    }

    /// Advances the simulation by `dt` seconds.
    pub fn step(&self, dt: f64) {
        let mut joints = lock(&self.joints);
        let joints = &mut *joints;
        for joint in 0..joints.positions.len() {
            match joints.modes[joint] {
                ControlMode::Position => {
                    if let Some(targets) = &joints.targets {
                        let remaining = targets[joint] - joints.positions[joint];
                        let max_step = joints.ref_speeds[joint] * dt;
                        joints.positions[joint] += remaining.clamp(-max_step, max_step);
                    }
                }
                ControlMode::Velocity => {
                    joints.positions[joint] += joints.velocities[joint] * dt;
                }
                ControlMode::PositionDirect | ControlMode::Torque => {}
            }
        }
        trace!("simulated positions {:?}", joints.positions);
    }

    /// Number of joints whose control mode has been changed so far.
    pub fn mode_writes(&self) -> usize {
        lock(&self.joints).mode_writes
    }

    /// Last commanded joint velocities.
    pub fn commanded_velocities(&self) -> Vec<f64> {
        lock(&self.joints).velocities.clone()
    }

    /// Last commanded joint torques.
    pub fn commanded_torques(&self) -> Vec<f64> {
        lock(&self.joints).torques.clone()
    }

    /// Target of the running position move, if any.
    pub fn position_targets(&self) -> Option<Vec<f64>> {
        lock(&self.joints).targets.clone()
    }
}

impl JointInterface for SimulatedRobot {
    fn num_joints(&self) -> usize {
        lock(&self.joints).positions.len()
    }

    fn get_control_modes(&self) -> CartesianResult<Vec<ControlMode>> {
        Ok(lock(&self.joints).modes.clone())
    }

    fn set_control_modes(&self, joints: &[usize], modes: &[ControlMode]) -> CartesianResult<()> {
        let mut state = lock(&self.joints);
        if joints.len() != modes.len() {
            return Err(joint_exception(
                "joint indices and modes differ in length".to_string(),
            ));
        }
        if let Some(joint) = joints.iter().find(|j| **j >= state.modes.len()) {
            return Err(joint_exception(format!("no joint {}", joint)));
        }
        for (joint, mode) in joints.iter().zip(modes.iter()) {
            // switching modes halts the joint
            state.modes[*joint] = *mode;
            state.velocities[*joint] = 0.;
            state.torques[*joint] = 0.;
            state.mode_writes += 1;
        }
        if state.modes.iter().any(|m| *m != ControlMode::Position) {
            state.targets = None;
        }
        Ok(())
    }

    fn get_positions(&self) -> CartesianResult<JointVector> {
        Ok(lock(&self.joints).positions.clone())
    }

    fn get_velocities(&self) -> CartesianResult<JointVector> {
        let state = lock(&self.joints);
        Ok(state
            .modes
            .iter()
            .zip(state.velocities.iter())
            .map(|(mode, velocity)| match mode {
                ControlMode::Velocity => *velocity,
                _ => 0.,
            })
            .collect())
    }

    fn set_ref_speeds(&self, speeds: &[f64]) -> CartesianResult<()> {
        let mut state = lock(&self.joints);
        state.check_length(speeds)?;
        state.ref_speeds = speeds.to_vec();
        Ok(())
    }

    fn position_move(&self, targets: &[f64]) -> CartesianResult<()> {
        let mut state = lock(&self.joints);
        state.check_length(targets)?;
        state.require_mode(ControlMode::Position)?;
        state.targets = Some(targets.to_vec());
        Ok(())
    }

    fn check_motion_done(&self) -> CartesianResult<bool> {
        let state = lock(&self.joints);
        Ok(match &state.targets {
            Some(targets) => targets
                .iter()
                .zip(state.positions.iter())
                .all(|(target, position)| (target - position).abs() < 1e-9),
            None => true,
        })
    }

    fn set_positions(&self, positions: &[f64]) -> CartesianResult<()> {
        let mut state = lock(&self.joints);
        state.check_length(positions)?;
        state.require_mode(ControlMode::PositionDirect)?;
        state.positions = positions.to_vec();
        Ok(())
    }

    fn set_velocities(&self, velocities: &[f64]) -> CartesianResult<()> {
        let mut state = lock(&self.joints);
        state.check_length(velocities)?;
        state.require_mode(ControlMode::Velocity)?;
        state.velocities = velocities.to_vec();
        Ok(())
    }

    fn set_ref_torques(&self, torques: &[f64]) -> CartesianResult<()> {
        let mut state = lock(&self.joints);
        state.check_length(torques)?;
        state.require_mode(ControlMode::Torque)?;
        state.torques = torques.to_vec();
        Ok(())
    }

    fn stop(&self) -> CartesianResult<()> {
        let mut state = lock(&self.joints);
        let num_joints = state.positions.len();
        state.velocities = vec![0.; num_joints];
        state.torques = vec![0.; num_joints];
        state.targets = None;
        Ok(())
    }
}

/// Advances a [`SimulatedRobot`] in real time when run by a
/// [`PeriodicThread`](`crate::PeriodicThread`).
pub struct SimulationClock {
    robot: Arc<SimulatedRobot>,
    period: Duration,
}

impl SimulationClock {
    pub fn new(robot: Arc<SimulatedRobot>, period: Duration) -> Self {
        SimulationClock { robot, period }
    }
}

impl PeriodicTask for SimulationClock {
    fn period(&self) -> Duration {
        self.period
    }

    fn tick(&self) {
        self.robot.step(self.period.as_secs_f64());
    }
}

/// Kinematics of an arm whose six joints are the six pose components.
///
/// Without gravity the inverse dynamics reduce to the commanded wrench.
#[derive(Debug, Default, Copy, Clone)]
pub struct IdentitySolver;

impl IdentitySolver {
    pub fn new() -> Self {
        IdentitySolver
    }
}

const IDENTITY_JOINTS: usize = 6;

fn solver_exception(message: String) -> CartesianException {
    CartesianException::SolverFailure { message }
}

fn check_joints(q: &[f64]) -> CartesianResult<()> {
    if q.len() < IDENTITY_JOINTS {
        return Err(solver_exception(format!(
            "expected {} joints, got {}",
            IDENTITY_JOINTS,
            q.len()
        )));
    }
    Ok(())
}

impl Solver for IdentitySolver {
    fn num_joints(&self) -> usize {
        IDENTITY_JOINTS
    }

    fn fwd_kin(&self, q: &[f64]) -> CartesianResult<Pose> {
        check_joints(q)?;
        let mut pose = [0.; 6];
        pose.copy_from_slice(&q[..IDENTITY_JOINTS]);
        Ok(pose)
    }

    fn inv_kin(&self, xd: &Pose, _q_guess: &[f64]) -> CartesianResult<JointVector> {
        if xd.iter().any(|x| !x.is_finite()) {
            return Err(solver_exception(format!("pose {:?} is not reachable", xd)));
        }
        Ok(xd.to_vec())
    }

    fn diff_inv_kin(&self, q: &[f64], xdot: &Twist) -> CartesianResult<JointVector> {
        check_joints(q)?;
        Ok(xdot.to_vec())
    }

    fn inv_dyn(&self, q: &[f64], wrench: &Wrench) -> CartesianResult<JointVector> {
        check_joints(q)?;
        Ok(wrench.to_vec())
    }
}
