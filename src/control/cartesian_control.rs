// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains the public Cartesian control surface.
use std::collections::BTreeMap;
use std::time::Duration;

use crate::control::control_types::{ActuatorCommand, ControlState, ControllerParameter};
use crate::exception::CartesianResult;
use crate::utils::{JointVector, Pose, Twist, Wrench};

#[cfg(test)]
use mockall::automock;

/// Cartesian control operations.
///
/// Implemented by [`CartesianController`](`crate::CartesianController`). The periodic loops and
/// the streaming devices only talk to the arm through this trait, so every call is synchronized
/// by the controller.
///
/// The synchronous operations (`movj`, `movl`, `movv`, `gcmp`, `forc`) change the control state
/// on success. The streaming operations (`movi`, `twist`, `pose`) are meant to be called
/// periodically and require the matching [`StreamingCommand`](`crate::StreamingCommand`) to be
/// preset with [`set_parameter`](`Self::set_parameter`).
#[cfg_attr(test, automock)]
pub trait CartesianControl: Send + Sync {
    /// Current control state and end effector pose.
    fn stat(&self) -> CartesianResult<(ControlState, Pose)>;

    /// Joint positions reaching `xd`, seeded with the current joints.
    fn inv(&self, xd: &Pose) -> CartesianResult<JointVector>;

    /// Moves in joint space to `xd`, all joints arriving at the same time.
    fn movj(&self, xd: &Pose) -> CartesianResult<()>;

    /// Like [`movj`](`Self::movj`) with `xd` relative to the current end effector frame.
    fn relj(&self, xd: &Pose) -> CartesianResult<()>;

    /// Moves on a straight line to `xd`.
    fn movl(&self, xd: &Pose) -> CartesianResult<()>;

    /// Moves with constant Cartesian velocity until stopped.
    fn movv(&self, xdotd: &Twist) -> CartesianResult<()>;

    /// Gravity compensation.
    fn gcmp(&self) -> CartesianResult<()>;

    /// Exerts the wrench `td` at the end effector.
    fn forc(&self, td: &Wrench) -> CartesianResult<()>;

    /// Stops any motion and returns to [`ControlState::NotControlling`].
    fn stop_control(&self) -> CartesianResult<()>;

    /// Blocks until the controller returns to [`ControlState::NotControlling`].
    ///
    /// # Errors
    /// * Timeout if this does not happen within `timeout`.
    fn wait(&self, timeout: Duration) -> CartesianResult<()>;

    /// Forwards a discrete command to the end effector actuator.
    fn act(&self, command: ActuatorCommand) -> CartesianResult<()>;

    /// Streaming pose command; absolute in the base frame, an increment in the tool frame.
    fn movi(&self, x: &Pose) -> CartesianResult<()>;

    /// Streaming velocity command.
    fn twist(&self, xdot: &Twist) -> CartesianResult<()>;

    /// Streaming pose command reached through velocity control within `interval` seconds.
    fn pose(&self, x: &Pose, interval: f64) -> CartesianResult<()>;

    fn set_parameter(&self, key: ControllerParameter, value: f64) -> CartesianResult<()>;

    fn get_parameters(&self) -> CartesianResult<BTreeMap<ControllerParameter, f64>>;
}
