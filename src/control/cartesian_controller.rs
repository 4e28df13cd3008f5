// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains the [`CartesianController`], the state machine behind [`CartesianControl`].
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::sleep;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use num_traits::FromPrimitive;

use crate::config::ControllerParams;
use crate::control::cartesian_control::CartesianControl;
use crate::control::control_loop::{period_from_ms, PeriodicTask};
use crate::control::control_types::{
    ActuatorCommand, ControlMode, ControlState, ControllerParameter, ReferenceFrame,
    StreamingCommand,
};
use crate::control::isochronous::compute_isochronous_speeds;
use crate::control::joint_limits::JointLimits;
use crate::control::robot_interface::{JointInterface, Solver, ToolActuator};
use crate::control::trajectory::{LinearTrajectory, PathShape, TrajectoryBuilder, VelocityProfile};
use crate::exception::{
    create_command_rejected, create_invalid_configuration, CartesianException, CartesianResult,
};
use crate::utils::{
    add_scaled, compose_pose, lock, pose_difference, tool_to_base_frame, JointVector, Pose, Twist,
    Wrench,
};

/// What the periodic tick keeps commanding in the current state.
#[derive(Debug)]
enum ActiveMotion {
    None,
    Linear {
        trajectory: LinearTrajectory,
        start: Instant,
    },
    Velocity(Twist),
    Wrench(Wrench),
}

#[derive(Debug)]
struct ControlStatus {
    current_state: ControlState,
    streaming_command: StreamingCommand,
    motion: ActiveMotion,
}

impl ControlStatus {
    /// The only way to write the state. Discards the streaming command preset.
    fn transition(&mut self, state: ControlState, motion: ActiveMotion) {
        if self.current_state != state {
            info!("Control state {} -> {}", self.current_state, state);
        }
        self.current_state = state;
        self.streaming_command = StreamingCommand::NotSet;
        self.motion = motion;
    }
}

/// The periods are known to fit a [`Duration`].
#[derive(Debug, Copy, Clone)]
struct Tunables {
    gain: f64,
    trajectory_duration: f64,
    cmc_period_ms: f64,
    wait_period_ms: f64,
    frame: ReferenceFrame,
}

fn positive(key: ControllerParameter, value: f64) -> CartesianResult<f64> {
    if value.is_finite() && value > 0. {
        Ok(value)
    } else {
        Err(create_invalid_configuration(format!(
            "{:?} must be positive, got {}",
            key, value
        )))
    }
}

fn period(key: ControllerParameter, value: f64) -> CartesianResult<f64> {
    period_from_ms(value).map_err(|_| {
        create_invalid_configuration(format!(
            "{:?} must be a positive number of milliseconds, got {}",
            key, value
        ))
    })?;
    Ok(value)
}

fn parameter_code<T: FromPrimitive>(key: ControllerParameter, value: f64) -> CartesianResult<T> {
    if value.fract() == 0. {
        if let Some(code) = T::from_f64(value) {
            return Ok(code);
        }
    }
    Err(create_invalid_configuration(format!(
        "{} is not a valid {:?} code",
        value, key
    )))
}

fn solver_failure(message: String) -> CartesianException {
    CartesianException::SolverFailure { message }
}

/// Converts Cartesian goals into joint commands for a [`JointInterface`].
///
/// The controller owns the [`ControlState`] and the [`StreamingCommand`] preset behind a single
/// mutex and serializes every operation of [`CartesianControl`] on it. Motions which need
/// continuous commanding (MOVL, MOVV, GCMP, FORC) are driven by [`PeriodicTask::tick`], which is
/// meant to be run by a [`PeriodicThread`](`crate::PeriodicThread`) every
/// [`CmcPeriod`](`ControllerParameter::CmcPeriod`) milliseconds.
///
/// Only the first [`Solver::num_joints`] joints take part in kinematics, any further joint is kept
/// at rest.
pub struct CartesianController {
    robot: Arc<dyn JointInterface>,
    solver: Arc<dyn Solver>,
    actuator: Option<Arc<dyn ToolActuator>>,
    limits: JointLimits,
    q_ref_speeds: Vec<f64>,
    num_robot_joints: usize,
    num_solver_joints: usize,
    status: Mutex<ControlStatus>,
    tunables: Mutex<Tunables>,
}

impl CartesianController {
    /// Creates a controller in [`ControlState::NotControlling`].
    ///
    /// # Errors
    /// * InvalidConfiguration if the limits or reference speeds do not match the number of robot
    /// joints, the solver has more joints than the robot, or a tunable is not positive.
    pub fn new(
        robot: Arc<dyn JointInterface>,
        solver: Arc<dyn Solver>,
        params: &ControllerParams,
    ) -> CartesianResult<Self> {
        let num_robot_joints = robot.num_joints();
        let num_solver_joints = solver.num_joints();
        if num_solver_joints > num_robot_joints {
            return Err(create_invalid_configuration(format!(
                "solver has {} joints but the robot only {}",
                num_solver_joints, num_robot_joints
            )));
        }
        let limits = JointLimits::new(
            params.q_min.clone(),
            params.q_max.clone(),
            params.qdot_min.clone(),
            params.qdot_max.clone(),
            num_solver_joints,
        )?;
        if limits.num_joints() != num_robot_joints {
            return Err(create_invalid_configuration(format!(
                "{} joint limits for {} robot joints",
                limits.num_joints(),
                num_robot_joints
            )));
        }
        if params.q_ref_speeds.len() != num_robot_joints {
            return Err(create_invalid_configuration(format!(
                "{} reference speeds for {} robot joints",
                params.q_ref_speeds.len(),
                num_robot_joints
            )));
        }
        let tunables = Tunables {
            gain: positive(ControllerParameter::Gain, params.gain)?,
            trajectory_duration: positive(
                ControllerParameter::TrajectoryDuration,
                params.trajectory_duration,
            )?,
            cmc_period_ms: period(ControllerParameter::CmcPeriod, params.cmc_period_ms)?,
            wait_period_ms: period(ControllerParameter::WaitPeriod, params.wait_period_ms)?,
            frame: if params.use_tcp_frame {
                ReferenceFrame::TcpFrame
            } else {
                ReferenceFrame::BaseFrame
            },
        };
        debug!(
            "Cartesian controller for {} joints ({} in kinematics)",
            num_robot_joints, num_solver_joints
        );
        Ok(CartesianController {
            robot,
            solver,
            actuator: None,
            limits,
            q_ref_speeds: params.q_ref_speeds.clone(),
            num_robot_joints,
            num_solver_joints,
            status: Mutex::new(ControlStatus {
                current_state: ControlState::NotControlling,
                streaming_command: StreamingCommand::NotSet,
                motion: ActiveMotion::None,
            }),
            tunables: Mutex::new(tunables),
        })
    }

    /// Attaches the end effector actuator used by [`act`](`CartesianControl::act`).
    pub fn with_actuator(mut self, actuator: Arc<dyn ToolActuator>) -> Self {
        self.actuator = Some(actuator);
        self
    }

    pub fn get_current_state(&self) -> ControlState {
        self.status().current_state
    }

    /// The preset streaming command, [`StreamingCommand::NotSet`] after any state change.
    pub fn streaming_command(&self) -> StreamingCommand {
        self.status().streaming_command
    }

    /// Whether every joint is in `mode`. A failing read counts as a mismatch.
    pub fn check_control_modes(&self, mode: ControlMode) -> bool {
        match self.robot.get_control_modes() {
            Ok(modes) => modes.len() == self.num_robot_joints && modes.iter().all(|m| *m == mode),
            Err(error) => {
                warn!("getControlModes failed: {}", error);
                false
            }
        }
    }

    /// Switches every joint which is not in `mode` yet with a single batched call.
    ///
    /// # Errors
    /// * JointInterfaceException if the modes cannot be read.
    /// * ModeMismatch if the joints cannot be switched.
    pub fn set_control_modes(&self, mode: ControlMode) -> CartesianResult<()> {
        let modes = self.robot.get_control_modes().map_err(|error| {
            warn!("getControlModes failed: {}", error);
            error
        })?;
        let joints: Vec<usize> = modes
            .iter()
            .enumerate()
            .filter(|(_, current)| **current != mode)
            .map(|(joint, _)| joint)
            .collect();
        if joints.is_empty() {
            return Ok(());
        }
        debug!("Switching joints {:?} to {:?} mode", joints, mode);
        self.robot
            .set_control_modes(&joints, &vec![mode; joints.len()])
            .map_err(|error| {
                warn!("setControlModes failed ({:?}): {}", mode, error);
                CartesianException::ModeMismatch {
                    message: format!(
                        "cannot switch joints {:?} to {:?} mode: {}",
                        joints, mode, error
                    ),
                }
            })
    }

    /// Returns to [`ControlState::NotControlling`], switches the joints to the control mode
    /// `command` needs and presets it.
    ///
    /// # Errors
    /// * InvalidConfiguration for [`StreamingCommand::NotSet`].
    /// * ModeMismatch if the joints cannot be switched. Nothing is preset in this case.
    pub fn preset_streaming_command(&self, command: StreamingCommand) -> CartesianResult<()> {
        let mut status = self.status();
        let previous = status.current_state;
        status.transition(ControlState::NotControlling, ActiveMotion::None);
        if previous != ControlState::NotControlling {
            self.robot.stop()?;
        }
        let mode = match command {
            StreamingCommand::Twist | StreamingCommand::Pose => ControlMode::Velocity,
            StreamingCommand::Movi => ControlMode::PositionDirect,
            StreamingCommand::NotSet => {
                error!("Unrecognized or unsupported streaming command {:?}", command);
                return Err(create_invalid_configuration(
                    "unrecognized or unsupported streaming command",
                ));
            }
        };
        self.set_control_modes(mode)?;
        status.streaming_command = command;
        debug!("Preset streaming command {:?}", command);
        Ok(())
    }

    fn status(&self) -> MutexGuard<'_, ControlStatus> {
        lock(&self.status)
    }

    fn tunables(&self) -> Tunables {
        *lock(&self.tunables)
    }

    fn read_positions(&self) -> CartesianResult<JointVector> {
        let q = self.robot.get_positions()?;
        if q.len() != self.num_robot_joints {
            return Err(CartesianException::JointInterfaceException {
                message: format!(
                    "expected {} joint positions, got {}",
                    self.num_robot_joints,
                    q.len()
                ),
            });
        }
        Ok(q)
    }

    fn current_pose(&self, q: &[f64]) -> CartesianResult<Pose> {
        self.solver.fwd_kin(&q[..self.num_solver_joints])
    }

    /// Joint positions reaching `xd`; joints outside of kinematics stay where they are.
    fn solve_target(&self, xd: &Pose, q: &[f64]) -> CartesianResult<JointVector> {
        let mut qd = self
            .solver
            .inv_kin(xd, &q[..self.num_solver_joints])
            .map_err(|error| {
                warn!("invKin failed: {}", error);
                error
            })?;
        if qd.len() < self.num_solver_joints {
            return Err(solver_failure(format!(
                "inverse kinematics returned {} joints, expected {}",
                qd.len(),
                self.num_solver_joints
            )));
        }
        qd.truncate(self.num_solver_joints);
        qd.extend_from_slice(&q[self.num_solver_joints..]);
        Ok(qd)
    }

    /// Joint velocities realizing `xdot` which pass the safety checks.
    fn joint_velocities(&self, q: &[f64], xdot: &Twist) -> CartesianResult<JointVector> {
        let mut qdot = self
            .solver
            .diff_inv_kin(&q[..self.num_solver_joints], xdot)?;
        if qdot.len() < self.num_solver_joints {
            return Err(solver_failure(format!(
                "differential inverse kinematics returned {} joints, expected {}",
                qdot.len(),
                self.num_solver_joints
            )));
        }
        qdot.truncate(self.num_solver_joints);
        qdot.resize(self.num_robot_joints, 0.);
        self.limits.check_joint_limits_with_velocity(q, &qdot)?;
        self.limits.check_joint_velocities(&qdot)?;
        Ok(qdot)
    }

    fn joint_torques(&self, q: &[f64], wrench: &Wrench) -> CartesianResult<JointVector> {
        let mut torques = self
            .solver
            .inv_dyn(&q[..self.num_solver_joints], wrench)?;
        if torques.len() < self.num_solver_joints {
            return Err(solver_failure(format!(
                "inverse dynamics returned {} joints, expected {}",
                torques.len(),
                self.num_solver_joints
            )));
        }
        torques.truncate(self.num_solver_joints);
        torques.resize(self.num_robot_joints, 0.);
        Ok(torques)
    }

    fn move_joints(&self, status: &mut ControlStatus, q: &[f64], xd: &Pose) -> CartesianResult<()> {
        let qd = self.solve_target(xd, q)?;
        self.limits.check_joint_limits(&qd)?;
        let mut qdot = vec![0.; self.num_robot_joints];
        compute_isochronous_speeds(q, &qd, &self.q_ref_speeds, self.num_solver_joints, &mut qdot)?;
        self.set_control_modes(ControlMode::Position)?;
        self.robot.set_ref_speeds(&qdot)?;
        self.robot.position_move(&qd)?;
        status.transition(ControlState::Movj, ActiveMotion::None);
        Ok(())
    }

    fn exert(&self, state: ControlState, wrench: &Wrench) -> CartesianResult<()> {
        let mut status = self.status();
        let q = self.read_positions()?;
        let torques = self.joint_torques(&q, wrench)?;
        self.set_control_modes(ControlMode::Torque)?;
        self.robot.set_ref_torques(&torques)?;
        status.transition(state, ActiveMotion::Wrench(*wrench));
        Ok(())
    }

    /// Checks the preconditions of the velocity based streaming commands.
    fn require_streaming(
        &self,
        status: &ControlStatus,
        command: StreamingCommand,
    ) -> CartesianResult<()> {
        if status.current_state != ControlState::NotControlling
            || status.streaming_command != command
        {
            return Err(CartesianException::CommandRejected {
                message: format!(
                    "{:?} requires the {:?} streaming command to be preset while not controlling \
                     (state {}, preset {:?})",
                    command, command, status.current_state, status.streaming_command
                ),
            });
        }
        if !self.check_control_modes(ControlMode::Velocity) {
            return Err(CartesianException::ModeMismatch {
                message: format!("{:?} requires all joints in velocity mode", command),
            });
        }
        Ok(())
    }

    /// Commands the velocities for `xdot`, or halts the joints if they fail the safety checks.
    fn stream_velocities(&self, q: &[f64], xdot: &Twist) -> CartesianResult<()> {
        match self.joint_velocities(q, xdot) {
            Ok(qdot) => self.robot.set_velocities(&qdot),
            Err(error) => {
                self.robot
                    .set_velocities(&vec![0.; self.num_robot_joints])?;
                Err(error)
            }
        }
    }

    fn end_motion(&self, status: &mut ControlStatus) -> CartesianResult<()> {
        status.transition(ControlState::NotControlling, ActiveMotion::None);
        self.robot.stop()
    }

    /// Commands the next velocities of a linear move. `false` once the trajectory is over.
    fn follow_linear(&self, motion: &ActiveMotion) -> CartesianResult<bool> {
        let (trajectory, start) = match motion {
            ActiveMotion::Linear { trajectory, start } => (trajectory, start),
            _ => return Err(create_command_rejected("no linear trajectory to follow")),
        };
        let elapsed = start.elapsed().as_secs_f64();
        if trajectory.duration().map_or(false, |duration| elapsed > duration) {
            return Ok(false);
        }
        let x_ref = trajectory.get_position(elapsed)?;
        let xdot_ref = trajectory.get_velocity(elapsed)?;
        let q = self.read_positions()?;
        let x = self.current_pose(&q)?;
        let command = add_scaled(
            &xdot_ref,
            &pose_difference(&x_ref, &x),
            self.tunables().gain,
        );
        let qdot = self.joint_velocities(&q, &command)?;
        self.robot.set_velocities(&qdot)?;
        Ok(true)
    }

    fn follow_velocity(&self, motion: &ActiveMotion) -> CartesianResult<()> {
        let xdot = match motion {
            ActiveMotion::Velocity(xdot) => xdot,
            _ => return Err(create_command_rejected("no Cartesian velocity to follow")),
        };
        let q = self.read_positions()?;
        let qdot = self.joint_velocities(&q, xdot)?;
        self.robot.set_velocities(&qdot)
    }

    fn follow_wrench(&self, motion: &ActiveMotion) -> CartesianResult<()> {
        let wrench = match motion {
            ActiveMotion::Wrench(wrench) => wrench,
            _ => return Err(create_command_rejected("no wrench to exert")),
        };
        let q = self.read_positions()?;
        let torques = self.joint_torques(&q, wrench)?;
        self.robot.set_ref_torques(&torques)
    }

    fn step(&self) -> CartesianResult<()> {
        let mut status = self.status();
        match status.current_state {
            ControlState::NotControlling | ControlState::Movi => Ok(()),
            ControlState::Movj => {
                if self.robot.check_motion_done()? {
                    debug!("Joint space move done");
                    status.transition(ControlState::NotControlling, ActiveMotion::None);
                }
                Ok(())
            }
            ControlState::Movl => match self.follow_linear(&status.motion) {
                Ok(true) => Ok(()),
                Ok(false) => {
                    info!("Linear move done");
                    self.end_motion(&mut status)
                }
                Err(error) => {
                    self.end_motion(&mut status)?;
                    Err(error)
                }
            },
            ControlState::Movv => match self.follow_velocity(&status.motion) {
                Ok(()) => Ok(()),
                Err(error) => {
                    self.end_motion(&mut status)?;
                    Err(error)
                }
            },
            ControlState::Gcmp | ControlState::Forc => match self.follow_wrench(&status.motion) {
                Ok(()) => Ok(()),
                Err(error) => {
                    self.end_motion(&mut status)?;
                    Err(error)
                }
            },
        }
    }
}

impl CartesianControl for CartesianController {
    fn stat(&self) -> CartesianResult<(ControlState, Pose)> {
        let state = self.get_current_state();
        let q = self.read_positions()?;
        Ok((state, self.current_pose(&q)?))
    }

    fn inv(&self, xd: &Pose) -> CartesianResult<JointVector> {
        let q = self.read_positions()?;
        self.solve_target(xd, &q)
    }

    fn movj(&self, xd: &Pose) -> CartesianResult<()> {
        let mut status = self.status();
        let q = self.read_positions()?;
        self.move_joints(&mut status, &q, xd)
    }

    fn relj(&self, xd: &Pose) -> CartesianResult<()> {
        let mut status = self.status();
        let q = self.read_positions()?;
        let target = compose_pose(&self.current_pose(&q)?, xd);
        self.move_joints(&mut status, &q, &target)
    }

    fn movl(&self, xd: &Pose) -> CartesianResult<()> {
        let mut status = self.status();
        let q = self.read_positions()?;
        let x = self.current_pose(&q)?;
        let qd = self.solve_target(xd, &q)?;
        self.limits.check_joint_limits(&qd)?;
        let trajectory = TrajectoryBuilder::new()
            .add_waypoint(x, None)
            .add_waypoint(*xd, None)
            .configure_path(PathShape::Line)
            .configure_velocity_profile(VelocityProfile::Trapezoidal)
            .configure_duration(self.tunables().trajectory_duration)
            .create()
            .map_err(|error| {
                error!("Failed to build the linear trajectory: {}", error);
                error
            })?;
        self.set_control_modes(ControlMode::Velocity)?;
        status.transition(
            ControlState::Movl,
            ActiveMotion::Linear {
                trajectory,
                start: Instant::now(),
            },
        );
        Ok(())
    }

    fn movv(&self, xdotd: &Twist) -> CartesianResult<()> {
        let mut status = self.status();
        let q = self.read_positions()?;
        let qdot = self.joint_velocities(&q, xdotd)?;
        self.set_control_modes(ControlMode::Velocity)?;
        self.robot.set_velocities(&qdot)?;
        status.transition(ControlState::Movv, ActiveMotion::Velocity(*xdotd));
        Ok(())
    }

    fn gcmp(&self) -> CartesianResult<()> {
        self.exert(ControlState::Gcmp, &[0.; 6])
    }

    fn forc(&self, td: &Wrench) -> CartesianResult<()> {
        self.exert(ControlState::Forc, td)
    }

    fn stop_control(&self) -> CartesianResult<()> {
        let mut status = self.status();
        self.end_motion(&mut status)
    }

    fn wait(&self, timeout: Duration) -> CartesianResult<()> {
        let start = Instant::now();
        loop {
            if self.get_current_state() == ControlState::NotControlling {
                return Ok(());
            }
            let elapsed = start.elapsed();
            if elapsed >= timeout {
                return Err(CartesianException::Timeout {
                    message: format!(
                        "still in state {} after {:?}",
                        self.get_current_state(),
                        timeout
                    ),
                });
            }
            let period = Duration::from_secs_f64(self.tunables().wait_period_ms / 1000.);
            sleep(period.min(timeout - elapsed));
        }
    }

    fn act(&self, command: ActuatorCommand) -> CartesianResult<()> {
        if command == ActuatorCommand::None {
            return Ok(());
        }
        match &self.actuator {
            Some(actuator) => actuator.actuate(command),
            None => Err(create_invalid_configuration("no end effector actuator attached")),
        }
    }

    fn movi(&self, x: &Pose) -> CartesianResult<()> {
        let mut status = self.status();
        let entering = match (status.current_state, status.streaming_command) {
            (ControlState::NotControlling, StreamingCommand::Movi) => true,
            (ControlState::Movi, _) => false,
            _ => {
                return Err(create_command_rejected(
                    "movi requires the Movi streaming command to be preset",
                ));
            }
        };
        if entering && !self.check_control_modes(ControlMode::PositionDirect) {
            return Err(CartesianException::ModeMismatch {
                message: "movi requires all joints in position direct mode".to_string(),
            });
        }
        let q = self.read_positions()?;
        let target = match self.tunables().frame {
            ReferenceFrame::BaseFrame => *x,
            ReferenceFrame::TcpFrame => compose_pose(&self.current_pose(&q)?, x),
        };
        let qd = self.solve_target(&target, &q)?;
        self.limits.check_joint_limits(&qd)?;
        self.robot.set_positions(&qd)?;
        if entering {
            status.transition(ControlState::Movi, ActiveMotion::None);
        }
        Ok(())
    }

    fn twist(&self, xdot: &Twist) -> CartesianResult<()> {
        let status = self.status();
        self.require_streaming(&status, StreamingCommand::Twist)?;
        let q = self.read_positions()?;
        let xdot = match self.tunables().frame {
            ReferenceFrame::BaseFrame => *xdot,
            ReferenceFrame::TcpFrame => tool_to_base_frame(&self.current_pose(&q)?, xdot),
        };
        self.stream_velocities(&q, &xdot)
    }

    fn pose(&self, x: &Pose, interval: f64) -> CartesianResult<()> {
        if !(interval.is_finite() && interval > 0.) {
            return Err(create_invalid_configuration(format!(
                "pose interval must be positive, got {}",
                interval
            )));
        }
        let status = self.status();
        self.require_streaming(&status, StreamingCommand::Pose)?;
        let q = self.read_positions()?;
        let current = self.current_pose(&q)?;
        let target = match self.tunables().frame {
            ReferenceFrame::BaseFrame => *x,
            ReferenceFrame::TcpFrame => compose_pose(&current, x),
        };
        let xdot = add_scaled(&[0.; 6], &pose_difference(&target, &current), 1. / interval);
        self.stream_velocities(&q, &xdot)
    }

    fn set_parameter(&self, key: ControllerParameter, value: f64) -> CartesianResult<()> {
        match key {
            ControllerParameter::StreamingCommand => {
                self.preset_streaming_command(parameter_code(key, value)?)
            }
            ControllerParameter::Frame => {
                let frame: ReferenceFrame = parameter_code(key, value)?;
                let status = self.status();
                if status.current_state != ControlState::NotControlling {
                    return Err(create_command_rejected(
                        "the reference frame can only be changed while not controlling",
                    ));
                }
                lock(&self.tunables).frame = frame;
                Ok(())
            }
            ControllerParameter::Gain => {
                lock(&self.tunables).gain = positive(key, value)?;
                Ok(())
            }
            ControllerParameter::TrajectoryDuration => {
                lock(&self.tunables).trajectory_duration = positive(key, value)?;
                Ok(())
            }
            ControllerParameter::CmcPeriod => {
                lock(&self.tunables).cmc_period_ms = period(key, value)?;
                Ok(())
            }
            ControllerParameter::WaitPeriod => {
                lock(&self.tunables).wait_period_ms = period(key, value)?;
                Ok(())
            }
        }
    }

    fn get_parameters(&self) -> CartesianResult<BTreeMap<ControllerParameter, f64>> {
        let command = self.streaming_command();
        let tunables = self.tunables();
        let mut params = BTreeMap::new();
        params.insert(
            ControllerParameter::StreamingCommand,
            f64::from(command as u8),
        );
        params.insert(ControllerParameter::Frame, f64::from(tunables.frame as u8));
        params.insert(ControllerParameter::Gain, tunables.gain);
        params.insert(
            ControllerParameter::TrajectoryDuration,
            tunables.trajectory_duration,
        );
        params.insert(ControllerParameter::CmcPeriod, tunables.cmc_period_ms);
        params.insert(ControllerParameter::WaitPeriod, tunables.wait_period_ms);
        Ok(params)
    }
}

impl PeriodicTask for CartesianController {
    fn period(&self) -> Duration {
        Duration::from_secs_f64(self.tunables().cmc_period_ms / 1000.)
    }

    fn tick(&self) {
        if let Err(error) = self.step() {
            warn!("Controller tick failed: {}", error);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread::{sleep, spawn};
    use std::time::Duration;

    use crate::config::ControllerParams;
    use crate::control::cartesian_control::CartesianControl;
    use crate::control::cartesian_controller::CartesianController;
    use crate::control::control_loop::{PeriodicTask, PeriodicThread};
    use crate::control::control_types::{
        ActuatorCommand, ControlMode, ControlState, ControllerParameter, RealtimeConfig,
        StreamingCommand,
    };
    use crate::control::robot_interface::{
        JointInterface, MockJointInterface, MockSolver, MockToolActuator,
    };
    use crate::exception::{CartesianException, LimitKind};
    use crate::simulation::{IdentitySolver, SimulatedRobot, SimulationClock};

    fn params(num_joints: usize) -> ControllerParams {
        ControllerParams {
            q_min: vec![-100.; num_joints],
            q_max: vec![100.; num_joints],
            qdot_min: vec![-50.; num_joints],
            qdot_max: vec![50.; num_joints],
            q_ref_speeds: vec![10.; num_joints],
            gain: 0.05,
            trajectory_duration: 10.,
            cmc_period_ms: 50.,
            wait_period_ms: 30.,
            use_tcp_frame: false,
        }
    }

    /// seven robot joints, the last one outside of kinematics
    fn simulated() -> (Arc<SimulatedRobot>, CartesianController) {
        let robot = Arc::new(SimulatedRobot::new(7));
        let controller =
            CartesianController::new(robot.clone(), Arc::new(IdentitySolver::new()), &params(7))
                .unwrap();
        (robot, controller)
    }

    fn mocked(robot: MockJointInterface, solver: MockSolver) -> CartesianController {
        CartesianController::new(Arc::new(robot), Arc::new(solver), &params(3)).unwrap()
    }

    fn mock_robot() -> MockJointInterface {
        let mut robot = MockJointInterface::new();
        robot.expect_num_joints().return_const(3usize);
        robot
    }

    fn mock_solver() -> MockSolver {
        let mut solver = MockSolver::new();
        solver.expect_num_joints().return_const(3usize);
        solver
    }

    fn slice_compare(a: &[f64], b: &[f64], thresh: f64) {
        assert_eq!(a.len(), b.len());
        for i in 0..a.len() {
            assert!(
                (a[i] - b[i]).abs() < thresh,
                "index {}: {} != {}",
                i,
                a[i],
                b[i]
            );
        }
    }

    fn is_rejected<T>(result: Result<T, CartesianException>) -> bool {
        matches!(result, Err(CartesianException::CommandRejected { .. }))
    }

    #[test]
    fn set_control_modes_is_idempotent() {
        let mut robot = mock_robot();
        robot
            .expect_get_control_modes()
            .returning(|| Ok(vec![ControlMode::Velocity; 3]));
        robot.expect_set_control_modes().times(0);
        let controller = mocked(robot, mock_solver());
        controller.set_control_modes(ControlMode::Velocity).unwrap();
        assert!(controller.check_control_modes(ControlMode::Velocity));
    }

    #[test]
    fn only_mismatched_joints_are_switched() {
        let mut robot = mock_robot();
        robot.expect_get_control_modes().returning(|| {
            Ok(vec![
                ControlMode::Velocity,
                ControlMode::Position,
                ControlMode::Velocity,
            ])
        });
        robot
            .expect_set_control_modes()
            .withf(|joints, modes| {
                joints.to_vec() == vec![1] && modes.to_vec() == vec![ControlMode::Velocity]
            })
            .times(1)
            .returning(|_, _| Ok(()));
        let controller = mocked(robot, mock_solver());
        assert!(!controller.check_control_modes(ControlMode::Velocity));
        controller.set_control_modes(ControlMode::Velocity).unwrap();
    }

    #[test]
    fn failed_mode_switch_is_a_mode_mismatch() {
        let mut robot = mock_robot();
        robot
            .expect_get_control_modes()
            .returning(|| Ok(vec![ControlMode::Position; 3]));
        robot.expect_set_control_modes().returning(|_, _| {
            Err(CartesianException::JointInterfaceException {
                message: "bus error".to_string(),
            })
        });
        let controller = mocked(robot, mock_solver());
        match controller.set_control_modes(ControlMode::Velocity) {
            Err(CartesianException::ModeMismatch { .. }) => {}
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn unreadable_modes_fail_closed() {
        let mut robot = mock_robot();
        robot.expect_get_control_modes().returning(|| {
            Err(CartesianException::JointInterfaceException {
                message: "timeout".to_string(),
            })
        });
        let controller = mocked(robot, mock_solver());
        assert!(!controller.check_control_modes(ControlMode::Position));
        assert!(controller.set_control_modes(ControlMode::Position).is_err());
    }

    #[test]
    fn solver_failure_issues_no_motion() {
        let mut robot = mock_robot();
        robot.expect_get_positions().returning(|| Ok(vec![0.; 3]));
        let mut solver = mock_solver();
        solver.expect_inv_kin().returning(|_, _| {
            Err(CartesianException::SolverFailure {
                message: "unreachable".to_string(),
            })
        });
        // no expectations on modes or motion: any such call fails the test
        let controller = mocked(robot, solver);
        match controller.movj(&[1., 1., 1., 0., 0., 0.]) {
            Err(CartesianException::SolverFailure { .. }) => {}
            other => panic!("unexpected result {:?}", other),
        }
        assert_eq!(controller.get_current_state(), ControlState::NotControlling);
    }

    #[test]
    fn movj_reaches_target() {
        let (robot, controller) = simulated();
        controller.movj(&[0.5, 0.2, 0., 0., 0., 0.]).unwrap();
        assert_eq!(controller.get_current_state(), ControlState::Movj);
        assert_eq!(
            robot.position_targets(),
            Some(vec![0.5, 0.2, 0., 0., 0., 0., 0.])
        );
        controller.tick();
        assert_eq!(controller.get_current_state(), ControlState::Movj);
        robot.step(1.);
        controller.tick();
        assert_eq!(controller.get_current_state(), ControlState::NotControlling);
        let (state, x) = controller.stat().unwrap();
        assert_eq!(state, ControlState::NotControlling);
        slice_compare(&x, &[0.5, 0.2, 0., 0., 0., 0.], 1e-12);
    }

    #[test]
    fn movj_outside_limits_is_refused() {
        let (robot, controller) = simulated();
        match controller.movj(&[150., 0., 0., 0., 0., 0.]) {
            Err(CartesianException::LimitViolation { joint, kind, .. }) => {
                assert_eq!(joint, 0);
                assert_eq!(kind, LimitKind::Position);
            }
            other => panic!("unexpected result {:?}", other),
        }
        assert_eq!(controller.get_current_state(), ControlState::NotControlling);
        assert_eq!(robot.position_targets(), None);
        assert_eq!(robot.mode_writes(), 0);
    }

    #[test]
    fn relj_is_relative_to_the_tool() {
        let robot = Arc::new(SimulatedRobot::with_positions(vec![
            0.1, 0., 0., 0., 0., 0., 3.,
        ]));
        let controller =
            CartesianController::new(robot.clone(), Arc::new(IdentitySolver::new()), &params(7))
                .unwrap();
        controller.relj(&[0., 0.1, 0., 0., 0., 0.]).unwrap();
        let targets = robot.position_targets().unwrap();
        slice_compare(&targets, &[0.1, 0.1, 0., 0., 0., 0., 3.], 1e-12);
        slice_compare(
            &controller.inv(&[0.2, 0., 0., 0., 0., 0.]).unwrap(),
            &[0.2, 0., 0., 0., 0., 0., 3.],
            1e-12,
        );
    }

    #[test]
    fn preset_then_movj_clears_the_streaming_command() {
        let (robot, controller) = simulated();
        controller
            .set_parameter(ControllerParameter::StreamingCommand, 1.)
            .unwrap();
        assert_eq!(controller.streaming_command(), StreamingCommand::Twist);
        assert!(controller.check_control_modes(ControlMode::Velocity));
        assert_eq!(robot.mode_writes(), 7);
        controller.movj(&[0.1, 0., 0., 0., 0., 0.]).unwrap();
        assert_eq!(controller.streaming_command(), StreamingCommand::NotSet);
        assert_eq!(controller.get_current_state(), ControlState::Movj);
    }

    #[test]
    fn streaming_is_rejected_after_stop_control() {
        let (robot, controller) = simulated();
        controller
            .preset_streaming_command(StreamingCommand::Twist)
            .unwrap();
        controller.twist(&[0.1, 0., 0., 0., 0., 0.]).unwrap();
        slice_compare(
            &robot.commanded_velocities(),
            &[0.1, 0., 0., 0., 0., 0., 0.],
            1e-12,
        );
        controller.stop_control().unwrap();
        assert_eq!(controller.get_current_state(), ControlState::NotControlling);
        assert_eq!(robot.commanded_velocities(), vec![0.; 7]);
        assert!(is_rejected(controller.twist(&[0.1, 0., 0., 0., 0., 0.])));
        assert!(is_rejected(controller.movi(&[0.1, 0., 0., 0., 0., 0.])));
        controller.tick();
        assert_eq!(robot.commanded_velocities(), vec![0.; 7]);
    }

    #[test]
    fn streaming_needs_the_matching_preset() {
        let (_, controller) = simulated();
        assert!(is_rejected(controller.twist(&[0.1, 0., 0., 0., 0., 0.])));
        controller
            .preset_streaming_command(StreamingCommand::Pose)
            .unwrap();
        assert!(is_rejected(controller.twist(&[0.1, 0., 0., 0., 0., 0.])));
        assert!(is_rejected(controller.movi(&[0.1, 0., 0., 0., 0., 0.])));
        assert!(controller
            .set_parameter(ControllerParameter::StreamingCommand, 0.)
            .is_err());
        assert!(controller
            .set_parameter(ControllerParameter::StreamingCommand, 1.5)
            .is_err());
    }

    #[test]
    fn failed_twist_checks_halt_the_joints() {
        let (robot, controller) = simulated();
        controller
            .preset_streaming_command(StreamingCommand::Twist)
            .unwrap();
        controller.twist(&[0.1, 0.2, 0., 0., 0., 0.]).unwrap();
        match controller.twist(&[60., 0., 0., 0., 0., 0.]) {
            Err(CartesianException::LimitViolation { kind, .. }) => {
                assert_eq!(kind, LimitKind::Velocity)
            }
            other => panic!("unexpected result {:?}", other),
        }
        assert_eq!(robot.commanded_velocities(), vec![0.; 7]);
        // the preset survives a refused command
        assert_eq!(controller.streaming_command(), StreamingCommand::Twist);
    }

    #[test]
    fn streaming_pose_is_reached_within_the_interval() {
        let (robot, controller) = simulated();
        controller
            .preset_streaming_command(StreamingCommand::Pose)
            .unwrap();
        controller.pose(&[0.1, 0., -0.2, 0., 0., 0.], 2.).unwrap();
        slice_compare(
            &robot.commanded_velocities(),
            &[0.05, 0., -0.1, 0., 0., 0., 0.],
            1e-12,
        );
        assert!(controller.pose(&[0.1, 0., 0., 0., 0., 0.], 0.).is_err());
    }

    #[test]
    fn movi_in_the_tool_frame() {
        let (robot, controller) = simulated();
        controller
            .set_parameter(ControllerParameter::Frame, 1.)
            .unwrap();
        controller
            .set_parameter(ControllerParameter::StreamingCommand, 3.)
            .unwrap();
        assert!(controller.check_control_modes(ControlMode::PositionDirect));
        controller.movi(&[0., 0., 0.01, 0., 0., 0.]).unwrap();
        assert_eq!(controller.get_current_state(), ControlState::Movi);
        assert_eq!(controller.streaming_command(), StreamingCommand::NotSet);
        controller.movi(&[0., 0., 0.01, 0., 0., 0.]).unwrap();
        slice_compare(
            &robot.get_positions().unwrap(),
            &[0., 0., 0.02, 0., 0., 0., 0.],
            1e-12,
        );
        controller.stop_control().unwrap();
        assert!(is_rejected(controller.movi(&[0., 0., 0.01, 0., 0., 0.])));
    }

    #[test]
    fn movl_follows_the_trajectory_until_its_end() {
        let (robot, controller) = simulated();
        controller
            .set_parameter(ControllerParameter::TrajectoryDuration, 0.2)
            .unwrap();
        controller.movl(&[0.1, 0., 0., 0., 0., 0.]).unwrap();
        assert_eq!(controller.get_current_state(), ControlState::Movl);
        assert!(controller.check_control_modes(ControlMode::Velocity));
        controller.tick();
        assert_eq!(controller.get_current_state(), ControlState::Movl);
        sleep(Duration::from_millis(250));
        controller.tick();
        assert_eq!(controller.get_current_state(), ControlState::NotControlling);
        assert_eq!(robot.commanded_velocities(), vec![0.; 7]);
    }

    #[test]
    fn movv_is_recomputed_every_tick() {
        let (robot, controller) = simulated();
        controller.movv(&[0., 0.1, 0., 0., 0., 0.]).unwrap();
        assert_eq!(controller.get_current_state(), ControlState::Movv);
        robot.step(0.5);
        controller.tick();
        slice_compare(
            &robot.commanded_velocities(),
            &[0., 0.1, 0., 0., 0., 0., 0.],
            1e-12,
        );
        assert_eq!(controller.get_current_state(), ControlState::Movv);
        assert!(controller.movv(&[0., 51., 0., 0., 0., 0.]).is_err());
        assert_eq!(controller.get_current_state(), ControlState::Movv);
    }

    #[test]
    fn gravity_compensation_and_force() {
        let (robot, controller) = simulated();
        controller.forc(&[1., 2., 3., 0., 0., 0.]).unwrap();
        assert_eq!(controller.get_current_state(), ControlState::Forc);
        assert_eq!(
            robot.commanded_torques(),
            vec![1., 2., 3., 0., 0., 0., 0.]
        );
        controller.gcmp().unwrap();
        assert_eq!(controller.get_current_state(), ControlState::Gcmp);
        controller.tick();
        assert_eq!(robot.commanded_torques(), vec![0.; 7]);
    }

    #[test]
    fn parameters() {
        let (_, controller) = simulated();
        let params = controller.get_parameters().unwrap();
        assert_eq!(params[&ControllerParameter::StreamingCommand], 0.);
        assert_eq!(params[&ControllerParameter::Frame], 0.);
        assert_eq!(params[&ControllerParameter::Gain], 0.05);
        assert_eq!(params[&ControllerParameter::TrajectoryDuration], 10.);
        assert_eq!(params[&ControllerParameter::CmcPeriod], 50.);
        assert_eq!(params[&ControllerParameter::WaitPeriod], 30.);
        assert_eq!(controller.period(), Duration::from_millis(50));

        assert!(controller
            .set_parameter(ControllerParameter::Gain, -1.)
            .is_err());
        assert!(controller
            .set_parameter(ControllerParameter::CmcPeriod, f64::NAN)
            .is_err());
        assert!(controller
            .set_parameter(ControllerParameter::Frame, 2.)
            .is_err());
        controller
            .set_parameter(ControllerParameter::Gain, 0.1)
            .unwrap();
        controller
            .set_parameter(ControllerParameter::StreamingCommand, 2.)
            .unwrap();
        let params = controller.get_parameters().unwrap();
        assert_eq!(params[&ControllerParameter::Gain], 0.1);
        assert_eq!(params[&ControllerParameter::StreamingCommand], 2.);

        controller.movj(&[0.1, 0., 0., 0., 0., 0.]).unwrap();
        assert!(is_rejected(
            controller.set_parameter(ControllerParameter::Frame, 1.)
        ));
    }

    #[test]
    fn wait_for_the_move() {
        let (robot, controller) = simulated();
        controller.wait(Duration::from_millis(10)).unwrap();
        controller.movj(&[0.1, 0., 0., 0., 0., 0.]).unwrap();
        match controller.wait(Duration::from_millis(40)) {
            Err(CartesianException::Timeout { .. }) => {}
            other => panic!("unexpected result {:?}", other),
        }
        robot.step(1.);
        controller.tick();
        controller.wait(Duration::from_millis(40)).unwrap();
    }

    #[test]
    fn actuator_commands() {
        let (_, controller) = simulated();
        match controller.act(ActuatorCommand::OpenGripper) {
            Err(CartesianException::InvalidConfiguration { .. }) => {}
            other => panic!("unexpected result {:?}", other),
        }
        let mut actuator = MockToolActuator::new();
        actuator
            .expect_actuate()
            .withf(|command| *command == ActuatorCommand::CloseGripper)
            .times(1)
            .returning(|_| Ok(()));
        let (_, controller) = simulated();
        let controller = controller.with_actuator(Arc::new(actuator));
        controller.act(ActuatorCommand::None).unwrap();
        controller.act(ActuatorCommand::CloseGripper).unwrap();
    }

    #[test]
    fn invalid_construction() {
        let robot = Arc::new(SimulatedRobot::new(7));
        assert!(CartesianController::new(
            robot.clone(),
            Arc::new(IdentitySolver::new()),
            &params(6)
        )
        .is_err());
        let mut bad_speeds = params(7);
        bad_speeds.q_ref_speeds.pop();
        assert!(
            CartesianController::new(robot.clone(), Arc::new(IdentitySolver::new()), &bad_speeds)
                .is_err()
        );
        let mut bad_gain = params(7);
        bad_gain.gain = 0.;
        assert!(
            CartesianController::new(robot.clone(), Arc::new(IdentitySolver::new()), &bad_gain)
                .is_err()
        );
        let small_robot = Arc::new(SimulatedRobot::new(3));
        assert!(CartesianController::new(
            small_robot,
            Arc::new(IdentitySolver::new()),
            &params(3)
        )
        .is_err());
    }

    #[test]
    fn oversized_periods_are_rejected() {
        let (_, controller) = simulated();
        match controller.set_parameter(ControllerParameter::CmcPeriod, 1e30) {
            Err(CartesianException::InvalidConfiguration { .. }) => {}
            other => panic!("unexpected result {:?}", other),
        }
        assert_eq!(controller.period(), Duration::from_millis(50));
        match controller.set_parameter(ControllerParameter::WaitPeriod, 1e30) {
            Err(CartesianException::InvalidConfiguration { .. }) => {}
            other => panic!("unexpected result {:?}", other),
        }
        controller.movj(&[0.1, 0., 0., 0., 0., 0.]).unwrap();
        match controller.wait(Duration::from_millis(10)) {
            Err(CartesianException::Timeout { .. }) => {}
            other => panic!("unexpected result {:?}", other),
        }
        let current = controller.get_parameters().unwrap();
        assert_eq!(current[&ControllerParameter::WaitPeriod], 30.);

        let mut slow = params(7);
        slow.cmc_period_ms = 1e30;
        assert!(CartesianController::new(
            Arc::new(SimulatedRobot::new(7)),
            Arc::new(IdentitySolver::new()),
            &slow
        )
        .is_err());
    }

    #[test]
    fn nan_velocities_are_never_commanded() {
        let (robot, controller) = simulated();
        match controller.movv(&[f64::NAN, 0., 0., 0., 0., 0.]) {
            Err(CartesianException::LimitViolation { joint, .. }) => assert_eq!(joint, 0),
            other => panic!("unexpected result {:?}", other),
        }
        assert_eq!(controller.get_current_state(), ControlState::NotControlling);
        assert_eq!(robot.commanded_velocities(), vec![0.; 7]);

        controller
            .preset_streaming_command(StreamingCommand::Twist)
            .unwrap();
        controller.twist(&[0.01, 0., 0., 0., 0., 0.]).unwrap();
        assert!(controller
            .twist(&[0., f64::NAN, 0., 0., 0., 0.])
            .is_err());
        assert_eq!(robot.commanded_velocities(), vec![0.; 7]);
    }

    #[test]
    fn failed_wrench_tick_ends_the_motion() {
        let robot = Arc::new(SimulatedRobot::new(3));
        let mut solver = mock_solver();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        solver.expect_inv_dyn().returning(move |_, _| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(vec![1., 2., 3.])
            } else {
                Err(CartesianException::SolverFailure {
                    message: "singular".to_string(),
                })
            }
        });
        let controller =
            CartesianController::new(robot.clone(), Arc::new(solver), &params(3)).unwrap();
        controller.gcmp().unwrap();
        assert_eq!(controller.get_current_state(), ControlState::Gcmp);
        assert_eq!(robot.commanded_torques(), vec![1., 2., 3.]);

        controller.tick();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(controller.get_current_state(), ControlState::NotControlling);
        assert_eq!(robot.commanded_torques(), vec![0.; 3]);
    }

    #[test]
    fn stop_wins_over_concurrent_callers_and_ticks() {
        let robot = Arc::new(SimulatedRobot::new(7));
        let controller = Arc::new(
            CartesianController::new(robot.clone(), Arc::new(IdentitySolver::new()), &params(7))
                .unwrap(),
        );
        controller
            .set_parameter(ControllerParameter::CmcPeriod, 1.)
            .unwrap();
        let clock = SimulationClock::new(robot.clone(), Duration::from_millis(1));
        let _simulation =
            PeriodicThread::start("simulation", Arc::new(clock), RealtimeConfig::Ignore).unwrap();
        let mut cmc =
            PeriodicThread::start("cmc", controller.clone(), RealtimeConfig::Ignore).unwrap();

        let streaming = {
            let controller = controller.clone();
            spawn(move || {
                for _ in 0..300 {
                    let _ = controller.preset_streaming_command(StreamingCommand::Twist);
                    let _ = controller.twist(&[0.01, 0., 0., 0., 0., 0.]);
                    let _ = controller.movl(&[0.1, 0., 0., 0., 0., 0.]);
                }
            })
        };
        let stopping = {
            let controller = controller.clone();
            spawn(move || {
                for _ in 0..300 {
                    let _ = controller.movv(&[0., 0.01, 0., 0., 0., 0.]);
                    let _ = controller.stop_control();
                }
            })
        };
        streaming.join().unwrap();
        stopping.join().unwrap();

        controller.stop_control().unwrap();
        assert_eq!(controller.get_current_state(), ControlState::NotControlling);
        assert_eq!(controller.streaming_command(), StreamingCommand::NotSet);
        sleep(Duration::from_millis(20));
        assert!(cmc.is_running());
        assert_eq!(controller.get_current_state(), ControlState::NotControlling);
        assert_eq!(robot.commanded_velocities(), vec![0.; 7]);
        cmc.stop();
    }
}
