// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains a streaming device driven by a Wii remote.
//!
//! The remote delivers five analog values: pitch, roll, button A, button B and a yaw toggle.
//! Holding A moves the tool forward along its z axis, B moves it backward and both together only
//! rotate it. Pitch and roll (or yaw while the toggle is active) rotate the tool.
use log::{debug, warn};

use crate::config::WiimoteParams;
use crate::control::cartesian_control::CartesianControl;
use crate::control::control_types::{ControllerParameter, ReferenceFrame, StreamingCommand};
use crate::device::streaming_device::StreamingDevice;
use crate::exception::{create_invalid_configuration, CartesianException, CartesianResult};

#[cfg(test)]
use mockall::automock;

/// Source of analog samples.
#[cfg_attr(test, automock)]
pub trait AnalogSensor: Send {
    fn read(&mut self) -> CartesianResult<Vec<f64>>;
}

const SAMPLE_SIZE: usize = 5;

#[derive(Debug, Copy, Clone, PartialEq)]
enum WiimoteMode {
    None,
    Forward,
    Backward,
    Rotate,
}

fn acquisition_failure(message: String) -> CartesianException {
    CartesianException::DeviceAcquisitionFailure { message }
}

/// Streams tool frame commands from a Wii remote.
pub struct WiimoteSensorDevice {
    sensor: Box<dyn AnalogSensor>,
    buffer: [f64; SAMPLE_SIZE],
    rotation: [f64; 3],
    mode: WiimoteMode,
    using_movi: bool,
    step: f64,
}

impl WiimoteSensorDevice {
    pub fn new(sensor: Box<dyn AnalogSensor>, params: &WiimoteParams) -> Self {
        WiimoteSensorDevice {
            sensor,
            buffer: [0.; SAMPLE_SIZE],
            rotation: [0.; 3],
            mode: WiimoteMode::None,
            using_movi: params.use_movi,
            step: params.step,
        }
    }

    fn movement(&self) -> Option<[f64; 6]> {
        let translation = match self.mode {
            WiimoteMode::Forward => self.step,
            WiimoteMode::Backward => -self.step,
            WiimoteMode::Rotate => 0.,
            WiimoteMode::None => return None,
        };
        Some([
            0.,
            0.,
            translation,
            self.rotation[0],
            self.rotation[1],
            self.rotation[2],
        ])
    }
}

impl StreamingDevice for WiimoteSensorDevice {
    fn initialize(
        &mut self,
        control: &dyn CartesianControl,
        using_streaming_preset: bool,
    ) -> CartesianResult<()> {
        if self.using_movi && self.step <= 0. {
            warn!("Invalid step: {}.", self.step);
            return Err(create_invalid_configuration(format!(
                "wiimote step must be positive, got {}",
                self.step
            )));
        }
        if using_streaming_preset {
            let command = if self.using_movi {
                StreamingCommand::Movi
            } else {
                StreamingCommand::Twist
            };
            control
                .set_parameter(
                    ControllerParameter::StreamingCommand,
                    f64::from(command as u8),
                )
                .map_err(|error| {
                    warn!("Unable to preset streaming command: {}", error);
                    error
                })?;
        }
        control
            .set_parameter(
                ControllerParameter::Frame,
                f64::from(ReferenceFrame::TcpFrame as u8),
            )
            .map_err(|error| {
                warn!("Unable to set TCP reference frame: {}", error);
                error
            })
    }

    fn acquire_data(&mut self) -> CartesianResult<()> {
        let data = self
            .sensor
            .read()
            .map_err(|error| acquisition_failure(format!("cannot read the wiimote: {}", error)))?;
        debug!("wiimote {:?}", data);
        if data.len() != SAMPLE_SIZE {
            warn!("Invalid data size: {}.", data.len());
            return Err(acquisition_failure(format!(
                "expected {} wiimote values, got {}",
                SAMPLE_SIZE,
                data.len()
            )));
        }
        self.buffer.copy_from_slice(&data);
        Ok(())
    }

    fn transform_data(&mut self, scaling: f64) -> CartesianResult<()> {
        if !(scaling.is_finite() && scaling > 0.) {
            return Err(create_invalid_configuration(format!(
                "scaling must be positive, got {}",
                scaling
            )));
        }
        let button_a = self.buffer[2] == 1.;
        let button_b = self.buffer[3] == 1.;
        let yaw_active = self.buffer[4] == 1.;

        self.mode = match (button_a, button_b) {
            (true, true) => WiimoteMode::Rotate,
            (true, false) => WiimoteMode::Forward,
            (false, true) => WiimoteMode::Backward,
            (false, false) => WiimoteMode::None,
        };
        if self.mode == WiimoteMode::None {
            return Ok(());
        }

        let pitch = self.buffer[0] / scaling;
        let roll = -self.buffer[1] / scaling;
        self.rotation = if yaw_active {
            [0., roll, pitch]
        } else {
            [pitch, roll, 0.]
        };
        Ok(())
    }

    fn has_valid_movement_data(&self) -> bool {
        self.mode != WiimoteMode::None
    }

    fn send_movement_command(&self, control: &dyn CartesianControl) -> CartesianResult<()> {
        match self.movement() {
            Some(command) if self.using_movi => control.movi(&command),
            Some(command) => control.twist(&command),
            None => Ok(()),
        }
    }

    /// Sends a zero twist, or a zero tool frame increment when streaming incremental poses.
    fn stop_motion(&self, control: &dyn CartesianControl) -> CartesianResult<()> {
        if self.using_movi {
            control.movi(&[0.; 6])
        } else {
            control.twist(&[0.; 6])
        }
    }
}
