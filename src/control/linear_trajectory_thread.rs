// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains the periodic task which streams a linear trajectory as incremental pose commands.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::{debug, error, warn};

use crate::config::TrajectoryThreadParams;
use crate::control::cartesian_control::CartesianControl;
use crate::control::control_loop::{period_from_ms, PeriodicTask};
use crate::control::control_types::{ControllerParameter, StreamingCommand};
use crate::control::trajectory::{LinearTrajectory, PathShape, TrajectoryBuilder, VelocityProfile};
use crate::exception::CartesianResult;
use crate::utils::{add_scaled, lock, Pose, Twist};

#[derive(Debug, Default)]
struct FollowerState {
    /// constant tool frame increment sent every tick
    delta_x: Option<Pose>,
    trajectory: Option<(LinearTrajectory, Instant)>,
}

/// Moves the end effector with a constant Cartesian velocity by sending
/// [`movi`](`CartesianControl::movi`) commands every period.
///
/// In the base frame a trajectory starting at the current pose is sampled every tick. In the
/// tool frame a constant increment of `velocity * period` is sent instead, the controller must be
/// configured with [`ReferenceFrame::TcpFrame`](`crate::ReferenceFrame::TcpFrame`) for this.
pub struct LinearTrajectoryThread {
    period: Duration,
    control: Arc<dyn CartesianControl>,
    using_streaming_preset: AtomicBool,
    using_tcp_frame: bool,
    state: Mutex<FollowerState>,
}

impl LinearTrajectoryThread {
    /// # Errors
    /// * InvalidConfiguration if the period is not positive or too large.
    pub fn new(
        params: &TrajectoryThreadParams,
        control: Arc<dyn CartesianControl>,
    ) -> CartesianResult<Self> {
        let period = period_from_ms(params.period_ms).map_err(|error| {
            warn!("Invalid trajectory thread period: {}", error);
            error
        })?;
        Ok(LinearTrajectoryThread {
            period,
            control,
            using_streaming_preset: AtomicBool::new(false),
            using_tcp_frame: params.use_tcp_frame,
            state: Mutex::new(FollowerState::default()),
        })
    }

    /// Asks the controller whether it supports streaming command presets.
    pub fn check_streaming_config(&self) -> CartesianResult<()> {
        let params = self.control.get_parameters().map_err(|error| {
            warn!("getParameters failed: {}", error);
            error
        })?;
        let supported = params.contains_key(&ControllerParameter::StreamingCommand);
        self.using_streaming_preset.store(supported, Ordering::SeqCst);
        Ok(())
    }

    /// Starts following `velocity` from the current pose.
    ///
    /// The previous trajectory is discarded even if building the new one fails.
    ///
    /// # Errors
    /// * The error of the controller if the streaming command cannot be preset or the current pose
    /// cannot be read.
    /// * TrajectoryBuildFailure if the trajectory cannot be built.
    pub fn configure(&self, velocity: &Twist) -> CartesianResult<()> {
        if self.using_streaming_preset.load(Ordering::SeqCst) {
            self.control
                .set_parameter(
                    ControllerParameter::StreamingCommand,
                    f64::from(StreamingCommand::Movi as u8),
                )
                .map_err(|error| {
                    warn!("Unable to preset streaming command: {}", error);
                    error
                })?;
        }

        if self.using_tcp_frame {
            let delta_x = add_scaled(&[0.; 6], velocity, self.period.as_secs_f64());
            lock(&self.state).delta_x = Some(delta_x);
            return Ok(());
        }

        let (_, x) = self.control.stat().map_err(|error| {
            error!("stat failed: {}", error);
            error
        })?;

        let mut state = lock(&self.state);
        state.trajectory = None;
        let trajectory = TrajectoryBuilder::new()
            .add_waypoint(x, Some(*velocity))
            .configure_path(PathShape::Line)
            .configure_velocity_profile(VelocityProfile::Rectangular)
            .create()
            .map_err(|error| {
                error!("Unable to create trajectory: {}", error);
                error
            })?;
        state.trajectory = Some((trajectory, Instant::now()));
        Ok(())
    }

    fn next_command(&self) -> Option<Pose> {
        let state = lock(&self.state);
        if self.using_tcp_frame {
            return state.delta_x;
        }
        state
            .trajectory
            .as_ref()
            .and_then(|(trajectory, start)| {
                trajectory
                    .get_position(start.elapsed().as_secs_f64())
                    .ok()
            })
    }
}

impl PeriodicTask for LinearTrajectoryThread {
    fn period(&self) -> Duration {
        self.period
    }

    fn tick(&self) {
        if let Some(x) = self.next_command() {
            if let Err(error) = self.control.movi(&x) {
                debug!("movi refused: {}", error);
            }
        }
    }
}
