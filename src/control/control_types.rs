// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains the vocabulary shared by the controller, the periodic loops and the devices.
use std::fmt::{Display, Formatter, Result};

use num_derive::{FromPrimitive, ToPrimitive};
use serde_repr::{Deserialize_repr, Serialize_repr};

/// Control state of the [`CartesianController`](`crate::CartesianController`).
///
/// Only one state can be active at a time. Every change of state discards a preset
/// [`StreamingCommand`].
#[derive(
    Serialize_repr, Deserialize_repr, Debug, PartialEq, Eq, Copy, Clone, FromPrimitive, ToPrimitive,
)]
#[repr(u8)]
pub enum ControlState {
    /// No motion is generated by the controller.
    NotControlling = 0,
    /// Joint space move towards a Cartesian target.
    Movj = 1,
    /// Linear Cartesian move towards a target.
    Movl = 2,
    /// Constant Cartesian velocity.
    Movv = 3,
    /// Gravity compensation.
    Gcmp = 4,
    /// Force control.
    Forc = 5,
    /// Incremental pose streaming.
    Movi = 6,
}

impl Display for ControlState {
    fn fmt(&self, f: &mut Formatter) -> Result {
        let name = match self {
            ControlState::NotControlling => "NOT_CONTROLLING",
            ControlState::Movj => "MOVJ",
            ControlState::Movl => "MOVL",
            ControlState::Movv => "MOVV",
            ControlState::Gcmp => "GCMP",
            ControlState::Forc => "FORC",
            ControlState::Movi => "MOVI",
        };
        write!(f, "{}", name)
    }
}

/// Streaming command selected with [`ControllerParameter::StreamingCommand`].
#[derive(
    Serialize_repr, Deserialize_repr, Debug, PartialEq, Eq, Copy, Clone, FromPrimitive, ToPrimitive,
)]
#[repr(u8)]
pub enum StreamingCommand {
    NotSet = 0,
    Twist = 1,
    Pose = 2,
    Movi = 3,
}

/// Actuation mode of a single joint.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum ControlMode {
    /// trajectory-generating position control with reference speeds
    Position,
    Velocity,
    /// positions are applied directly without interpolation
    PositionDirect,
    Torque,
}

/// Frame in which Cartesian streaming commands are expressed.
#[derive(
    Serialize_repr, Deserialize_repr, Debug, PartialEq, Eq, Copy, Clone, FromPrimitive, ToPrimitive,
)]
#[repr(u8)]
pub enum ReferenceFrame {
    BaseFrame = 0,
    /// end effector (tool center point) frame
    TcpFrame = 1,
}

/// Keys accepted by [`set_parameter`](`crate::CartesianControl::set_parameter`).
#[derive(
    Serialize_repr,
    Deserialize_repr,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Copy,
    Clone,
    FromPrimitive,
    ToPrimitive,
)]
#[repr(u8)]
pub enum ControllerParameter {
    /// value is a [`StreamingCommand`] code
    StreamingCommand = 0,
    /// value is a [`ReferenceFrame`] code
    Frame = 1,
    /// proportional gain of the linear move
    Gain = 2,
    /// duration of a linear move in \[s\]
    TrajectoryDuration = 3,
    /// period of the controller loop in \[ms\]
    CmcPeriod = 4,
    /// polling period of [`wait`](`crate::CartesianControl::wait`) in \[ms\]
    WaitPeriod = 5,
}

/// Discrete command for an end effector actuator such as a gripper.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum ActuatorCommand {
    None,
    CloseGripper,
    OpenGripper,
    StopGripper,
}

/// Used to decide whether to enforce realtime mode for a periodic thread.
/// see [`PeriodicThread`](`crate::PeriodicThread`)
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum RealtimeConfig {
    Enforce,
    Ignore,
}
