// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! # cartesian-control
//! cartesian-control converts Cartesian goals of a robot arm (poses, twists and wrenches) into
//! joint commands while keeping every joint inside its position and velocity limits.
//!
//! **ALWAYS HAVE THE USER STOP BUTTON AT
//! HAND WHILE CONTROLLING THE ROBOT!**
//!
//! ## Design
//! The arm itself is reached through two interfaces which have to be implemented for the
//! hardware: [`JointInterface`] (per-joint control modes, encoders and commands) and [`Solver`]
//! (kinematics and dynamics). The [`simulation`] module contains implementations for tests and
//! demos.
//!
//! The library is divided into two main modules:
//! * [control](`crate::control`) - the [`CartesianController`] state machine, joint limits,
//! trajectories and the periodic threads.
//! * [device](`crate::device`) - streaming input devices and the loop which forwards their
//! commands.
//!
//! All motion goes through [`CartesianControl`]. The controller owns a single
//! [`ControlState`]; synchronous moves (`movj`, `movl`, `movv`, `gcmp`, `forc`) switch it, the
//! streaming commands (`movi`, `twist`, `pose`) have to be preset with
//! [`set_parameter`](`CartesianControl::set_parameter`) first. [`stop_control`](`CartesianControl::stop_control`)
//! ends any motion and discards the preset.
//!
//! # Example:
//!```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use cartesian::simulation::{IdentitySolver, SimulatedRobot, SimulationClock};
//! use cartesian::{
//!     load_params, CartesianControl, CartesianController, CartesianResult, ControllerParams,
//!     PeriodicThread, RealtimeConfig,
//! };
//! fn main() -> CartesianResult<()> {
//!     let params: ControllerParams = load_params("controller.toml")?;
//!     let robot = Arc::new(SimulatedRobot::new(6));
//!     let clock = SimulationClock::new(robot.clone(), Duration::from_millis(10));
//!     let _simulation = PeriodicThread::start("simulation", Arc::new(clock), RealtimeConfig::Ignore)?;
//!     let controller = Arc::new(CartesianController::new(
//!         robot,
//!         Arc::new(IdentitySolver::new()),
//!         &params,
//!     )?);
//!     let _cmc = PeriodicThread::start("cmc", controller.clone(), RealtimeConfig::Ignore)?;
//!     controller.movl(&[0.1, 0., 0., 0., 0., 0.])?;
//!     controller.wait(Duration::from_secs(20))
//! }
//! ```
//!
//! The main function returns a CartesianResult<()> which means that it returns either Ok(())
//! or an Error of type CartesianException.
//!
//! Failed commands never move the arm: limits are checked and the control modes are switched
//! before anything is sent to the joints.
//!
//! The periodic tasks ([`CartesianController`], [`LinearTrajectoryThread`] and
//! [`StreamingDeviceController`]) are run by a [`PeriodicThread`] each. A failed tick is logged
//! through the [`log`](https://docs.rs/log) facade and the next period is tried again.

pub mod config;
pub mod control;
pub mod device;
pub mod exception;
pub mod simulation;
pub mod utils;

pub use config::{
    load_params, parse_params, ControllerParams, StreamingParams, TrajectoryThreadParams,
    WiimoteParams,
};
pub use control::cartesian_control::CartesianControl;
pub use control::cartesian_controller::CartesianController;
pub use control::control_loop::{PeriodicTask, PeriodicThread};
pub use control::control_types::*;
pub use control::joint_limits::{JointLimits, LIMIT_EPS};
pub use control::linear_trajectory_thread::LinearTrajectoryThread;
pub use control::robot_interface::{JointInterface, Solver, ToolActuator};
pub use control::trajectory::{LinearTrajectory, PathShape, TrajectoryBuilder, VelocityProfile};
pub use device::streaming_controller::StreamingDeviceController;
pub use device::streaming_device::{AlertLevel, ProximitySensors, StreamingDevice};
pub use exception::{CartesianException, CartesianResult};
pub use utils::*;
