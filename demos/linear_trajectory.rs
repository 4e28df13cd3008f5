// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

use std::path::PathBuf;
use std::sync::Arc;
use std::thread::sleep;
use std::time::Duration;

use clap::Parser;

use cartesian::simulation::{IdentitySolver, SimulatedRobot, SimulationClock};
use cartesian::{
    load_params, CartesianControl, CartesianController, CartesianResult, ControllerParams,
    LinearTrajectoryThread, PeriodicThread, RealtimeConfig, TrajectoryThreadParams,
};

/// An example showing how to stream a constant Cartesian velocity with a
/// LinearTrajectoryThread. Runs against a simulated six joint arm.
#[derive(Parser, Debug)]
#[clap(author, version, name = "linear_trajectory")]
struct CommandLineArguments {
    /// TOML file with the controller parameters
    #[clap(short, long)]
    pub config: Option<PathBuf>,
    /// Velocity along x in [m/s]
    #[clap(long, default_value_t = 0.02)]
    pub vx: f64,
    /// Velocity along y in [m/s]
    #[clap(long, default_value_t = 0.)]
    pub vy: f64,
    /// Velocity along z in [m/s]
    #[clap(long, default_value_t = 0.)]
    pub vz: f64,
    /// How long to move in [s]
    #[clap(short, long, default_value_t = 2.)]
    pub duration: f64,
    /// Send constant increments in the tool frame
    #[clap(short, long, action)]
    pub tcp: bool,
}

fn default_params() -> ControllerParams {
    ControllerParams {
        q_min: vec![-180.; 6],
        q_max: vec![180.; 6],
        qdot_min: vec![-30.; 6],
        qdot_max: vec![30.; 6],
        q_ref_speeds: vec![10.; 6],
        gain: 0.05,
        trajectory_duration: 10.,
        cmc_period_ms: 50.,
        wait_period_ms: 30.,
        use_tcp_frame: false,
    }
}

fn main() -> CartesianResult<()> {
    env_logger::init();
    let args = CommandLineArguments::parse();
    let mut params = match &args.config {
        Some(path) => load_params(path)?,
        None => default_params(),
    };
    params.use_tcp_frame = args.tcp;

    let robot = Arc::new(SimulatedRobot::new(6));
    let clock = SimulationClock::new(robot.clone(), Duration::from_millis(10));
    let _simulation =
        PeriodicThread::start("simulation", Arc::new(clock), RealtimeConfig::Ignore)?;
    let controller = Arc::new(CartesianController::new(
        robot,
        Arc::new(IdentitySolver::new()),
        &params,
    )?);
    let mut cmc = PeriodicThread::start("cmc", controller.clone(), RealtimeConfig::Ignore)?;

    let follower = Arc::new(LinearTrajectoryThread::new(
        &TrajectoryThreadParams {
            period_ms: 50.,
            use_tcp_frame: args.tcp,
        },
        controller.clone(),
    )?);
    follower.check_streaming_config()?;
    follower.configure(&[args.vx, args.vy, args.vz, 0., 0., 0.])?;
    let mut streaming =
        PeriodicThread::start("linear_trajectory", follower, RealtimeConfig::Ignore)?;

    sleep(Duration::from_secs_f64(args.duration.max(0.)));
    streaming.stop();
    controller.stop_control()?;
    cmc.stop();

    let (state, x) = controller.stat()?;
    println!("Finished in state {} at {:?}", state, x);
    Ok(())
}
