// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains the periodic task which forwards the commands of a [`StreamingDevice`].
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{error, warn};

use crate::config::StreamingParams;
use crate::control::cartesian_control::CartesianControl;
use crate::control::control_loop::{period_from_ms, PeriodicTask};
use crate::control::control_types::ActuatorCommand;
use crate::device::streaming_device::{AlertLevel, ProximitySensors, StreamingDevice};
use crate::exception::{create_invalid_configuration, CartesianResult};
use crate::utils::lock;

/// Device data is scaled down by this additional factor while an obstacle is nearby.
pub static SCALING_FACTOR_ON_ALERT: f64 = 2.0;

/// Scaling applied to device data at the given alert level.
///
/// # Arguments
/// * `scaling` - base scaling.
/// * `alert_level` - current alert level of the proximity sensors.
/// * `disable_low_level` - ignore [`AlertLevel::Low`].
pub fn effective_scaling(scaling: f64, alert_level: AlertLevel, disable_low_level: bool) -> f64 {
    if !disable_low_level && alert_level == AlertLevel::Low {
        scaling * SCALING_FACTOR_ON_ALERT
    } else {
        scaling
    }
}

/// Polls a [`StreamingDevice`] and forwards its motion intent to the controller.
///
/// Motion is slowed down while the optional proximity sensors report [`AlertLevel::Low`] and
/// halted while they report [`AlertLevel::High`].
///
/// Halting goes through [`StreamingDevice::stop_motion`] and not through
/// [`stop_control`](`CartesianControl::stop_control`), so the streaming command preset stays armed
/// and the device can resume once the alert is gone. A device streaming incremental poses halts
/// by sending a zero increment, which keeps the controller in
/// [`ControlState::Movi`](`crate::ControlState::Movi`) holding the current pose. Use
/// [`interrupt`](`Self::interrupt`) to end the streaming motion for good.
pub struct StreamingDeviceController {
    period: Duration,
    scaling: f64,
    disable_sensors_low_level: bool,
    control: Arc<dyn CartesianControl>,
    device: Mutex<Box<dyn StreamingDevice>>,
    sensors: Option<Arc<dyn ProximitySensors>>,
    is_stopped: AtomicBool,
}

impl StreamingDeviceController {
    /// Initializes `device` against `control`.
    ///
    /// # Errors
    /// * InvalidConfiguration if the period or the scaling is not positive.
    /// * The error of the device if it cannot be initialized.
    pub fn new(
        params: &StreamingParams,
        control: Arc<dyn CartesianControl>,
        mut device: Box<dyn StreamingDevice>,
        sensors: Option<Arc<dyn ProximitySensors>>,
    ) -> CartesianResult<Self> {
        let period = period_from_ms(params.period_ms).map_err(|error| {
            error!("Invalid streaming period: {}", error);
            error
        })?;
        if !(params.scaling.is_finite() && params.scaling > 0.) {
            return Err(create_invalid_configuration(format!(
                "scaling must be positive, got {}",
                params.scaling
            )));
        }
        device
            .initialize(control.as_ref(), params.use_streaming_preset)
            .map_err(|error| {
                error!("Device initialization failed: {}", error);
                error
            })?;
        Ok(StreamingDeviceController {
            period,
            scaling: params.scaling,
            disable_sensors_low_level: params.disable_sensors_low_level,
            control,
            device: Mutex::new(device),
            sensors,
            is_stopped: AtomicBool::new(true),
        })
    }

    /// Whether the last stop has not been followed by a movement command yet.
    pub fn is_stopped(&self) -> bool {
        self.is_stopped.load(Ordering::SeqCst)
    }

    /// Stops the controller. Meant to be called when the loop shuts down.
    pub fn interrupt(&self) -> CartesianResult<()> {
        self.control.stop_control()
    }

    /// Polls the device once and forwards the result.
    ///
    /// # Errors
    /// * The error of the device if data cannot be acquired or transformed. Nothing is sent in
    /// this case.
    /// * The error of the controller if the movement or stop command is refused.
    pub fn update(&self) -> CartesianResult<()> {
        let mut device = lock(&self.device);
        device.acquire_data().map_err(|error| {
            error!("Failed to acquire data from streaming device: {}", error);
            error
        })?;

        let alert_level = self
            .sensors
            .as_ref()
            .map_or(AlertLevel::Zero, |sensors| sensors.get_alert_level());
        let scaling = effective_scaling(self.scaling, alert_level, self.disable_sensors_low_level);
        if scaling != self.scaling {
            warn!("Obstacle detected.");
        }

        device.transform_data(scaling).map_err(|error| {
            error!(
                "Failed to transform acquired data from streaming device: {}",
                error
            );
            error
        })?;

        let actuator_state = device.actuator_state();
        if actuator_state != ActuatorCommand::None {
            if let Err(error) = self.control.act(actuator_state) {
                warn!("act {:?} failed: {}", actuator_state, error);
            }
        }

        if !device.has_valid_movement_data() || alert_level == AlertLevel::High {
            if !self.is_stopped() {
                device.stop_motion(self.control.as_ref())?;
                self.is_stopped.store(true, Ordering::SeqCst);
            }
            return Ok(());
        }

        self.is_stopped.store(false, Ordering::SeqCst);
        device.send_movement_command(self.control.as_ref())
    }
}

impl PeriodicTask for StreamingDeviceController {
    fn period(&self) -> Duration {
        self.period
    }

    fn tick(&self) {
        if let Err(error) = self.update() {
            warn!("Streaming tick failed: {}", error);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::sync::{Arc, Mutex};

    use crate::config::{ControllerParams, StreamingParams, WiimoteParams};
    use crate::control::cartesian_control::{CartesianControl, MockCartesianControl};
    use crate::control::cartesian_controller::CartesianController;
    use crate::control::control_loop::PeriodicTask;
    use crate::control::control_types::{ActuatorCommand, ControlMode, ControlState};
    use crate::control::robot_interface::JointInterface;
    use crate::device::streaming_controller::{
        effective_scaling, StreamingDeviceController, SCALING_FACTOR_ON_ALERT,
    };
    use crate::device::streaming_device::{
        AlertLevel, MockProximitySensors, ProximitySensors, StreamingDevice,
    };
    use crate::device::wiimote::{MockAnalogSensor, WiimoteSensorDevice};
    use crate::exception::{CartesianException, CartesianResult};
    use crate::simulation::{IdentitySolver, SimulatedRobot};

    #[derive(Debug, Default)]
    struct DeviceLog {
        fail_acquire: bool,
        valid: bool,
        actuator: Option<ActuatorCommand>,
        scalings: Vec<f64>,
        commands: usize,
        stops: usize,
    }

    struct FakeDevice {
        log: Arc<Mutex<DeviceLog>>,
    }

    impl StreamingDevice for FakeDevice {
        fn initialize(
            &mut self,
            _control: &dyn CartesianControl,
            _using_streaming_preset: bool,
        ) -> CartesianResult<()> {
            Ok(())
        }

        fn acquire_data(&mut self) -> CartesianResult<()> {
            if self.log.lock().unwrap().fail_acquire {
                return Err(CartesianException::DeviceAcquisitionFailure {
                    message: "no data".to_string(),
                });
            }
            Ok(())
        }

        fn transform_data(&mut self, scaling: f64) -> CartesianResult<()> {
            self.log.lock().unwrap().scalings.push(scaling);
            Ok(())
        }

        fn actuator_state(&self) -> ActuatorCommand {
            self.log
                .lock()
                .unwrap()
                .actuator
                .unwrap_or(ActuatorCommand::None)
        }

        fn has_valid_movement_data(&self) -> bool {
            self.log.lock().unwrap().valid
        }

        fn send_movement_command(&self, _control: &dyn CartesianControl) -> CartesianResult<()> {
            self.log.lock().unwrap().commands += 1;
            Ok(())
        }

        fn stop_motion(&self, _control: &dyn CartesianControl) -> CartesianResult<()> {
            self.log.lock().unwrap().stops += 1;
            Ok(())
        }
    }

    fn params(scaling: f64, disable_sensors_low_level: bool) -> StreamingParams {
        StreamingParams {
            period_ms: 20.,
            scaling,
            disable_sensors_low_level,
            use_streaming_preset: true,
        }
    }

    fn controller_with(
        params: &StreamingParams,
        control: MockCartesianControl,
        alert_level: Option<AlertLevel>,
    ) -> (Arc<Mutex<DeviceLog>>, StreamingDeviceController) {
        let log = Arc::new(Mutex::new(DeviceLog::default()));
        let device = Box::new(FakeDevice { log: log.clone() });
        let sensors = alert_level.map(|level| {
            let mut sensors = MockProximitySensors::new();
            sensors.expect_get_alert_level().return_const(level);
            Arc::new(sensors) as Arc<dyn ProximitySensors>
        });
        let controller =
            StreamingDeviceController::new(params, Arc::new(control), device, sensors).unwrap();
        (log, controller)
    }

    #[test]
    fn scaling_on_alert() {
        assert_eq!(effective_scaling(1., AlertLevel::Low, false), 2.);
        assert_eq!(effective_scaling(1., AlertLevel::Low, true), 1.);
        assert_eq!(effective_scaling(10., AlertLevel::Zero, false), 10.);
        assert_eq!(effective_scaling(10., AlertLevel::High, false), 10.);
        assert_eq!(SCALING_FACTOR_ON_ALERT, 2.);
    }

    #[test]
    fn low_alert_slows_the_device_down() {
        let (log, controller) = controller_with(
            &params(1., false),
            MockCartesianControl::new(),
            Some(AlertLevel::Low),
        );
        log.lock().unwrap().valid = true;
        controller.update().unwrap();
        assert_eq!(log.lock().unwrap().scalings, vec![2.]);
        assert_eq!(log.lock().unwrap().commands, 1);

        let (log, controller) = controller_with(
            &params(1., true),
            MockCartesianControl::new(),
            Some(AlertLevel::Low),
        );
        controller.update().unwrap();
        assert_eq!(log.lock().unwrap().scalings, vec![1.]);

        let (log, controller) =
            controller_with(&params(1., false), MockCartesianControl::new(), None);
        controller.update().unwrap();
        assert_eq!(log.lock().unwrap().scalings, vec![1.]);
    }

    #[test]
    fn failed_acquisition_skips_the_tick() {
        let (log, controller) =
            controller_with(&params(10., false), MockCartesianControl::new(), None);
        {
            let mut log = log.lock().unwrap();
            log.fail_acquire = true;
            log.valid = true;
        }
        assert!(controller.update().is_err());
        controller.tick();
        let log = log.lock().unwrap();
        assert!(log.scalings.is_empty());
        assert_eq!(log.commands, 0);
        assert_eq!(log.stops, 0);
    }

    #[test]
    fn stop_is_only_issued_once() {
        let (log, controller) =
            controller_with(&params(10., false), MockCartesianControl::new(), None);
        // already stopped at start
        controller.update().unwrap();
        assert_eq!(log.lock().unwrap().stops, 0);
        assert!(controller.is_stopped());

        log.lock().unwrap().valid = true;
        controller.update().unwrap();
        assert!(!controller.is_stopped());
        assert_eq!(log.lock().unwrap().commands, 1);

        log.lock().unwrap().valid = false;
        controller.update().unwrap();
        controller.update().unwrap();
        controller.update().unwrap();
        assert!(controller.is_stopped());
        assert_eq!(log.lock().unwrap().stops, 1);
        assert_eq!(log.lock().unwrap().commands, 1);
    }

    #[test]
    fn high_alert_stops_a_valid_motion() {
        let (log, controller) = controller_with(
            &params(10., false),
            MockCartesianControl::new(),
            Some(AlertLevel::High),
        );
        controller.is_stopped.store(false, Ordering::SeqCst);
        log.lock().unwrap().valid = true;
        controller.update().unwrap();
        let log = log.lock().unwrap();
        assert_eq!(log.commands, 0);
        assert_eq!(log.stops, 1);
        assert_eq!(log.scalings, vec![10.]);
    }

    #[test]
    fn actuator_commands_are_forwarded() {
        let mut control = MockCartesianControl::new();
        control
            .expect_act()
            .withf(|command| *command == ActuatorCommand::OpenGripper)
            .times(1)
            .returning(|_| Ok(()));
        let (log, controller) = controller_with(&params(10., false), control, None);
        log.lock().unwrap().actuator = Some(ActuatorCommand::OpenGripper);
        controller.update().unwrap();
    }

    #[test]
    fn interrupt_stops_the_controller() {
        let mut control = MockCartesianControl::new();
        control.expect_stop_control().times(1).returning(|| Ok(()));
        let (_, controller) = controller_with(&params(10., false), control, None);
        controller.interrupt().unwrap();
    }

    #[test]
    fn invalid_parameters() {
        let log = Arc::new(Mutex::new(DeviceLog::default()));
        let result = StreamingDeviceController::new(
            &params(0., false),
            Arc::new(MockCartesianControl::new()),
            Box::new(FakeDevice { log }),
            None,
        );
        assert!(result.is_err());

        let mut too_long = params(10., false);
        too_long.period_ms = 1e30;
        let result = StreamingDeviceController::new(
            &too_long,
            Arc::new(MockCartesianControl::new()),
            Box::new(FakeDevice {
                log: Arc::new(Mutex::new(DeviceLog::default())),
            }),
            None,
        );
        assert!(matches!(
            result,
            Err(CartesianException::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn wiimote_twists_the_simulated_arm() {
        let robot = Arc::new(SimulatedRobot::new(6));
        let controller_params = ControllerParams {
            q_min: vec![-10.; 6],
            q_max: vec![10.; 6],
            qdot_min: vec![-1.; 6],
            qdot_max: vec![1.; 6],
            q_ref_speeds: vec![1.; 6],
            gain: 0.05,
            trajectory_duration: 10.,
            cmc_period_ms: 50.,
            wait_period_ms: 30.,
            use_tcp_frame: false,
        };
        let control = Arc::new(
            CartesianController::new(
                robot.clone(),
                Arc::new(IdentitySolver::new()),
                &controller_params,
            )
            .unwrap(),
        );
        let samples = Arc::new(Mutex::new(vec![0., 0., 1., 0., 0.]));
        let mut sensor = MockAnalogSensor::new();
        let source = samples.clone();
        sensor
            .expect_read()
            .returning(move || Ok(source.lock().unwrap().clone()));
        let device = WiimoteSensorDevice::new(Box::new(sensor), &WiimoteParams::default());
        let streaming = StreamingDeviceController::new(
            &StreamingParams::default(),
            control.clone(),
            Box::new(device),
            None,
        )
        .unwrap();
        assert!(control.check_control_modes(ControlMode::Velocity));

        streaming.update().unwrap();
        assert_eq!(
            robot.commanded_velocities(),
            vec![0., 0., 0.01, 0., 0., 0.]
        );
        *samples.lock().unwrap() = vec![0., 0., 0., 0., 0.];
        streaming.update().unwrap();
        assert_eq!(robot.commanded_velocities(), vec![0.; 6]);
        assert_eq!(control.get_current_state(), ControlState::NotControlling);

        streaming.interrupt().unwrap();
        *samples.lock().unwrap() = vec![0., 0., 1., 0., 0.];
        assert!(streaming.update().is_err());
        assert_eq!(robot.commanded_velocities(), vec![0.; 6]);
    }

    #[test]
    fn high_alert_holds_an_incremental_motion() {
        let robot = Arc::new(SimulatedRobot::new(6));
        let controller_params = ControllerParams {
            q_min: vec![-10.; 6],
            q_max: vec![10.; 6],
            qdot_min: vec![-1.; 6],
            qdot_max: vec![1.; 6],
            q_ref_speeds: vec![1.; 6],
            gain: 0.05,
            trajectory_duration: 10.,
            cmc_period_ms: 50.,
            wait_period_ms: 30.,
            use_tcp_frame: false,
        };
        let control = Arc::new(
            CartesianController::new(
                robot.clone(),
                Arc::new(IdentitySolver::new()),
                &controller_params,
            )
            .unwrap(),
        );
        let mut sensor = MockAnalogSensor::new();
        sensor
            .expect_read()
            .returning(|| Ok(vec![0., 0., 1., 0., 0.]));
        let device = WiimoteSensorDevice::new(
            Box::new(sensor),
            &WiimoteParams {
                step: 0.01,
                use_movi: true,
            },
        );
        let alert = Arc::new(Mutex::new(AlertLevel::Zero));
        let level = alert.clone();
        let mut sensors = MockProximitySensors::new();
        sensors
            .expect_get_alert_level()
            .returning(move || *level.lock().unwrap());
        let streaming = StreamingDeviceController::new(
            &StreamingParams::default(),
            control.clone(),
            Box::new(device),
            Some(Arc::new(sensors) as Arc<dyn ProximitySensors>),
        )
        .unwrap();

        streaming.update().unwrap();
        assert_eq!(control.get_current_state(), ControlState::Movi);
        let moved = robot.get_positions().unwrap();
        assert!((moved[2] - 0.01).abs() < 1e-12);

        *alert.lock().unwrap() = AlertLevel::High;
        streaming.update().unwrap();
        streaming.update().unwrap();
        assert!(streaming.is_stopped());
        assert_eq!(control.get_current_state(), ControlState::Movi);
        let held = robot.get_positions().unwrap();
        for (a, b) in held.iter().zip(moved.iter()) {
            assert!((a - b).abs() < 1e-12);
        }

        *alert.lock().unwrap() = AlertLevel::Zero;
        streaming.update().unwrap();
        assert!((robot.get_positions().unwrap()[2] - 0.02).abs() < 1e-12);

        streaming.interrupt().unwrap();
        assert_eq!(control.get_current_state(), ControlState::NotControlling);
    }
}
