// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains the builder and the sampling of single-segment linear Cartesian trajectories.
use nalgebra::{Isometry3, Translation3, UnitQuaternion, Vector3, Vector6};

use crate::exception::{create_invalid_configuration, CartesianException, CartesianResult};
use crate::utils::{isometry_to_pose, pose_difference, pose_to_isometry, Pose, Twist};

/// Geometric shape of the path between the waypoints.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum PathShape {
    Line,
}

/// Velocity profile along the path.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum VelocityProfile {
    /// constant speed
    Rectangular,
    /// accelerate, cruise and decelerate in three phases of equal length
    Trapezoidal,
}

fn build_failure<S: Into<String>>(message: S) -> CartesianException {
    CartesianException::TrajectoryBuildFailure {
        message: message.into(),
    }
}

/// Collects the description of a trajectory. [`create`](`Self::create`) turns it into a
/// [`LinearTrajectory`] or fails without producing anything.
///
/// A trajectory is described either by one waypoint with a velocity (open-ended unless a
/// duration is configured) or by two waypoints and a duration.
#[derive(Debug, Clone)]
pub struct TrajectoryBuilder {
    waypoints: Vec<(Pose, Option<Twist>)>,
    path: Option<PathShape>,
    profile: VelocityProfile,
    duration: Option<f64>,
}

impl Default for TrajectoryBuilder {
    fn default() -> Self {
        TrajectoryBuilder::new()
    }
}

impl TrajectoryBuilder {
    pub fn new() -> Self {
        TrajectoryBuilder {
            waypoints: Vec::new(),
            path: None,
            profile: VelocityProfile::Rectangular,
            duration: None,
        }
    }

    /// Adds a waypoint, optionally with the Cartesian velocity to leave it with.
    pub fn add_waypoint(mut self, pose: Pose, velocity: Option<Twist>) -> Self {
        self.waypoints.push((pose, velocity));
        self
    }

    pub fn configure_path(mut self, path: PathShape) -> Self {
        self.path = Some(path);
        self
    }

    /// Selects the velocity profile, [`VelocityProfile::Rectangular`] if never called.
    pub fn configure_velocity_profile(mut self, profile: VelocityProfile) -> Self {
        self.profile = profile;
        self
    }

    /// Sets the duration of the trajectory in \[s\].
    pub fn configure_duration(mut self, duration: f64) -> Self {
        self.duration = Some(duration);
        self
    }

    /// Finalizes the construction.
    ///
    /// # Errors
    /// * TrajectoryBuildFailure if no path was configured, the number of waypoints is not one or
    /// two, a single waypoint has no velocity, two waypoints have no duration, the duration is not
    /// positive, a trapezoidal profile has no end, or a value is not finite.
    pub fn create(self) -> CartesianResult<LinearTrajectory> {
        if self.path.is_none() {
            return Err(build_failure("no path shape configured"));
        }
        if let Some(duration) = self.duration {
            if !(duration.is_finite() && duration > 0.) {
                return Err(build_failure(format!(
                    "duration must be positive, got {}",
                    duration
                )));
            }
        }
        for (pose, velocity) in self.waypoints.iter() {
            let finite = pose.iter().all(|x| x.is_finite())
                && velocity.map_or(true, |v| v.iter().all(|x| x.is_finite()));
            if !finite {
                return Err(build_failure("waypoint contains non-finite values"));
            }
        }
        let (start, displacement, duration) = match self.waypoints.as_slice() {
            [(start, Some(velocity))] => {
                let velocity = Vector6::from_row_slice(velocity);
                match self.duration {
                    Some(duration) => (*start, velocity * duration, Some(duration)),
                    None => (*start, velocity, None),
                }
            }
            [(_, None)] => {
                return Err(build_failure("a single waypoint requires a velocity"));
            }
            [(start, _), (end, _)] => match self.duration {
                Some(duration) => (
                    *start,
                    Vector6::from_row_slice(&pose_difference(end, start)),
                    Some(duration),
                ),
                None => {
                    return Err(build_failure("two waypoints require a duration"));
                }
            },
            _ => {
                return Err(build_failure(format!(
                    "expected one or two waypoints, got {}",
                    self.waypoints.len()
                )));
            }
        };
        let timing = match (duration, self.profile) {
            (None, VelocityProfile::Rectangular) => Timing::OpenEnded,
            (None, VelocityProfile::Trapezoidal) => {
                return Err(build_failure(
                    "a trapezoidal profile requires a duration or a second waypoint",
                ));
            }
            (Some(duration), profile) => Timing::Finite { duration, profile },
        };
        Ok(LinearTrajectory {
            start: pose_to_isometry(&start),
            displacement,
            timing,
        })
    }
}

#[derive(Debug, Copy, Clone)]
enum Timing {
    /// the displacement is a velocity applied forever
    OpenEnded,
    /// the displacement is covered in `duration`
    Finite {
        duration: f64,
        profile: VelocityProfile,
    },
}

/// A straight line in Cartesian space, sampled by elapsed time since its start.
#[derive(Debug, Clone)]
pub struct LinearTrajectory {
    start: Isometry3<f64>,
    displacement: Vector6<f64>,
    timing: Timing,
}

impl LinearTrajectory {
    /// Duration in \[s\], `None` for open-ended trajectories.
    pub fn duration(&self) -> Option<f64> {
        match self.timing {
            Timing::OpenEnded => None,
            Timing::Finite { duration, .. } => Some(duration),
        }
    }

    /// Returns the path parameter and its time derivative at `t`.
    fn progress(&self, t: f64) -> CartesianResult<(f64, f64)> {
        if !(t.is_finite() && t >= 0.) {
            return Err(create_invalid_configuration(format!(
                "cannot sample trajectory at t = {}",
                t
            )));
        }
        Ok(match self.timing {
            Timing::OpenEnded => (t, 1.),
            Timing::Finite { duration, .. } if t >= duration => (1., 0.),
            Timing::Finite {
                duration,
                profile: VelocityProfile::Rectangular,
            } => (t / duration, 1. / duration),
            Timing::Finite {
                duration,
                profile: VelocityProfile::Trapezoidal,
            } => {
                let t_acc = duration / 3.;
                let v_max = 1.5 / duration;
                let acc = v_max / t_acc;
                if t < t_acc {
                    (0.5 * acc * t * t, acc * t)
                } else if t < 2. * t_acc {
                    (0.5 * acc * t_acc * t_acc + v_max * (t - t_acc), v_max)
                } else {
                    let remaining = duration - t;
                    (1. - 0.5 * acc * remaining * remaining, acc * remaining)
                }
            }
        })
    }

    /// Cartesian pose `elapsed` seconds after the start.
    ///
    /// # Errors
    /// * InvalidConfiguration if `elapsed` is negative or not finite.
    pub fn get_position(&self, elapsed: f64) -> CartesianResult<Pose> {
        let (s, _) = self.progress(elapsed)?;
        let delta = self.displacement * s;
        let translation =
            self.start.translation.vector + Vector3::new(delta[0], delta[1], delta[2]);
        let rotation =
            UnitQuaternion::from_scaled_axis(Vector3::new(delta[3], delta[4], delta[5]))
                * self.start.rotation;
        Ok(isometry_to_pose(&Isometry3::from_parts(
            Translation3::from(translation),
            rotation,
        )))
    }

    /// Cartesian velocity `elapsed` seconds after the start.
    ///
    /// # Errors
    /// * InvalidConfiguration if `elapsed` is negative or not finite.
    pub fn get_velocity(&self, elapsed: f64) -> CartesianResult<Twist> {
        let (_, ds) = self.progress(elapsed)?;
        Ok((self.displacement * ds).into())
    }
}
