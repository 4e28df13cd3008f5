// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains the interfaces of input devices which stream motion commands.
use crate::control::cartesian_control::CartesianControl;
use crate::control::control_types::ActuatorCommand;
use crate::exception::CartesianResult;

#[cfg(test)]
use mockall::automock;

/// An input device which is polled periodically by the
/// [`StreamingDeviceController`](`crate::StreamingDeviceController`).
///
/// A poll acquires raw data, transforms it into a motion intent and, if there is one, sends the
/// matching streaming command to the controller.
pub trait StreamingDevice: Send {
    /// Prepares the controller for the commands of this device.
    ///
    /// # Arguments
    /// * `using_streaming_preset` - whether to preset the streaming command this device sends.
    fn initialize(
        &mut self,
        control: &dyn CartesianControl,
        using_streaming_preset: bool,
    ) -> CartesianResult<()>;

    /// Reads a sample from the device.
    ///
    /// # Errors
    /// * DeviceAcquisitionFailure if no valid sample could be read.
    fn acquire_data(&mut self) -> CartesianResult<()>;

    /// Turns the last sample into a motion intent. Raw values are divided by `scaling`.
    fn transform_data(&mut self, scaling: f64) -> CartesianResult<()>;

    /// Discrete actuator command requested by the last sample.
    fn actuator_state(&self) -> ActuatorCommand {
        ActuatorCommand::None
    }

    fn has_valid_movement_data(&self) -> bool;

    fn send_movement_command(&self, control: &dyn CartesianControl) -> CartesianResult<()>;

    /// Halts the motion generated by this device.
    fn stop_motion(&self, control: &dyn CartesianControl) -> CartesianResult<()>;
}

/// Alert level reported by proximity sensors.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AlertLevel {
    /// no obstacle
    Zero,
    /// obstacle nearby, slow down
    Low,
    /// obstacle close, stop
    High,
}

/// Proximity sensors which watch for obstacles around the arm.
#[cfg_attr(test, automock)]
pub trait ProximitySensors: Send + Sync {
    fn get_alert_level(&self) -> AlertLevel;
}
