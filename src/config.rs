// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Parameter structures and their loading from TOML files.
//!
//! All parameters are read once at startup. Units are degrees, degrees per second, seconds and
//! milliseconds as noted on each field.
use std::fs::read_to_string;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::exception::{CartesianException, CartesianResult};

/// Parameters of the [`CartesianController`](`crate::CartesianController`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerParams {
    /// Lower joint position limits in \[deg\], one per actuated joint.
    pub q_min: Vec<f64>,
    /// Upper joint position limits in \[deg\].
    pub q_max: Vec<f64>,
    /// Lower joint velocity limits in \[deg/s\].
    pub qdot_min: Vec<f64>,
    /// Upper joint velocity limits in \[deg/s\].
    pub qdot_max: Vec<f64>,
    /// Reference speeds of joint space moves in \[deg/s\].
    pub q_ref_speeds: Vec<f64>,
    /// Proportional gain of the linear move.
    #[serde(default = "default_gain")]
    pub gain: f64,
    /// Duration of a linear move in \[s\].
    #[serde(default = "default_trajectory_duration")]
    pub trajectory_duration: f64,
    /// Period of the controller loop in \[ms\].
    #[serde(default = "default_cmc_period_ms")]
    pub cmc_period_ms: f64,
    /// Polling period of `wait` in \[ms\].
    #[serde(default = "default_wait_period_ms")]
    pub wait_period_ms: f64,
    /// Express streaming commands in the tool frame instead of the base frame.
    #[serde(default)]
    pub use_tcp_frame: bool,
}

/// Parameters of the [`LinearTrajectoryThread`](`crate::LinearTrajectoryThread`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrajectoryThreadParams {
    /// \[ms\]
    #[serde(default = "default_trajectory_period_ms")]
    pub period_ms: f64,
    /// Integrate a constant tool frame increment instead of following a trajectory.
    #[serde(default)]
    pub use_tcp_frame: bool,
}

/// Parameters of the [`StreamingDeviceController`](`crate::StreamingDeviceController`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamingParams {
    /// \[ms\]
    #[serde(default = "default_streaming_period_ms")]
    pub period_ms: f64,
    /// Device data is divided by this factor.
    #[serde(default = "default_scaling")]
    pub scaling: f64,
    /// Ignore the low alert level of the proximity sensors.
    #[serde(default)]
    pub disable_sensors_low_level: bool,
    /// Preset the streaming command of the device instead of negotiating per call.
    #[serde(default = "default_true")]
    pub use_streaming_preset: bool,
}

/// Parameters of the [`WiimoteSensorDevice`](`crate::device::wiimote::WiimoteSensorDevice`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WiimoteParams {
    /// Forward/backward increment along the tool axis in \[m\] per command.
    #[serde(default = "default_step")]
    pub step: f64,
    /// Send incremental poses instead of twists.
    #[serde(default)]
    pub use_movi: bool,
}

fn default_gain() -> f64 {
    0.05
}

fn default_trajectory_duration() -> f64 {
    10.0
}

fn default_cmc_period_ms() -> f64 {
    50.0
}

fn default_wait_period_ms() -> f64 {
    30.0
}

fn default_trajectory_period_ms() -> f64 {
    50.0
}

fn default_streaming_period_ms() -> f64 {
    20.0
}

fn default_scaling() -> f64 {
    10.0
}

fn default_step() -> f64 {
    0.01
}

fn default_true() -> bool {
    true
}

impl Default for TrajectoryThreadParams {
    fn default() -> Self {
        TrajectoryThreadParams {
            period_ms: default_trajectory_period_ms(),
            use_tcp_frame: false,
        }
    }
}

impl Default for StreamingParams {
    fn default() -> Self {
        StreamingParams {
            period_ms: default_streaming_period_ms(),
            scaling: default_scaling(),
            disable_sensors_low_level: false,
            use_streaming_preset: true,
        }
    }
}

impl Default for WiimoteParams {
    fn default() -> Self {
        WiimoteParams {
            step: default_step(),
            use_movi: false,
        }
    }
}

/// Parses parameters from a TOML string.
pub fn parse_params<P: DeserializeOwned>(params: &str) -> CartesianResult<P> {
    toml::from_str(params).map_err(|e| CartesianException::ConfigException {
        message: format!("Cannot read the parameters: {}", e),
    })
}

/// Loads parameters from a TOML file.
pub fn load_params<P: DeserializeOwned, T: AsRef<Path>>(path: T) -> CartesianResult<P> {
    let params = read_to_string(path.as_ref()).map_err(|e| CartesianException::ConfigException {
        message: format!(
            "Cannot load the parameter file {}: {}",
            path.as_ref().display(),
            e
        ),
    })?;
    parse_params(params.as_str())
}
