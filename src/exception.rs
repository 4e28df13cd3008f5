// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains exception and Result definitions
use std::fmt::{Display, Formatter};
use thiserror::Error;

/// Distinguishes position limits from velocity limits in a
/// [`LimitViolation`](`CartesianException::LimitViolation`).
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum LimitKind {
    /// joint position in \[deg\]
    Position,
    /// joint velocity in \[deg/s\]
    Velocity,
}

impl Display for LimitKind {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            LimitKind::Position => write!(f, "position"),
            LimitKind::Velocity => write!(f, "velocity"),
        }
    }
}

/// Represents all kind of errors which can occur while commanding the arm.
#[derive(Error, Debug)]
pub enum CartesianException {
    /// A joint position or velocity is outside of its safety margin. The command was refused.
    #[error("joint {joint} {kind} out of limits: {value} not in [{min}, {max}]")]
    LimitViolation {
        /// index of the offending joint
        joint: usize,
        /// offending value
        value: f64,
        /// lower bound
        min: f64,
        /// upper bound
        max: f64,
        /// position or velocity
        kind: LimitKind,
    },

    /// The actuators are not in the control mode required by the operation and could not be
    /// switched.
    #[error("{message}")]
    ModeMismatch { message: String },

    /// The kinematics solver could not produce a solution.
    #[error("{message}")]
    SolverFailure { message: String },

    /// One of the steps building a trajectory failed. No trajectory is available afterwards.
    #[error("{message}")]
    TrajectoryBuildFailure { message: String },

    /// A streaming device or sensor could not deliver or transform data.
    #[error("{message}")]
    DeviceAcquisitionFailure { message: String },

    /// A configuration value is not acceptable.
    #[error("{message}")]
    InvalidConfiguration { message: String },

    /// The command is not allowed in the current control state.
    #[error("{message}")]
    CommandRejected { message: String },

    /// Reading from or writing to the joint interface failed.
    #[error("{message}")]
    JointInterfaceException { message: String },

    /// A blocking wait expired.
    #[error("{message}")]
    Timeout { message: String },

    /// RealTimeException is returned if the real-time priority cannot be set
    #[error("{message}")]
    RealTimeException { message: String },

    /// A parameter file could not be read or parsed.
    #[error("{message}")]
    ConfigException { message: String },
}

/// creates a CommandRejected exception from a static string slice
pub(crate) fn create_command_rejected(message: &'static str) -> CartesianException {
    CartesianException::CommandRejected {
        message: message.to_string(),
    }
}

/// creates an InvalidConfiguration exception
pub(crate) fn create_invalid_configuration<S: Into<String>>(message: S) -> CartesianException {
    CartesianException::InvalidConfiguration {
        message: message.into(),
    }
}

/// Result type which can have CartesianException as Error
pub type CartesianResult<T> = Result<T, CartesianException>;
