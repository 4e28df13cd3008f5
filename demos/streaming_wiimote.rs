// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

use std::path::PathBuf;
use std::sync::Arc;
use std::thread::sleep;
use std::time::Duration;

use clap::Parser;

use cartesian::device::wiimote::{AnalogSensor, WiimoteSensorDevice};
use cartesian::simulation::{IdentitySolver, SimulatedRobot, SimulationClock};
use cartesian::{
    load_params, CartesianControl, CartesianController, CartesianResult, ControllerParams,
    PeriodicThread, RealtimeConfig, StreamingDeviceController, StreamingParams, WiimoteParams,
};

/// An example showing how to drive the arm with a streaming device. A scripted Wii remote
/// presses A, then A and B while tilting, then releases all buttons.
#[derive(Parser, Debug)]
#[clap(author, version, name = "streaming_wiimote")]
struct CommandLineArguments {
    /// TOML file with the controller parameters
    #[clap(short, long)]
    pub config: Option<PathBuf>,
    /// Send incremental poses instead of twists
    #[clap(short, long, action)]
    pub movi: bool,
    /// Number of polls per phase of the script
    #[clap(short, long, default_value_t = 50)]
    pub polls: usize,
}

struct ScriptedRemote {
    polls_per_phase: usize,
    count: usize,
}

impl AnalogSensor for ScriptedRemote {
    fn read(&mut self) -> CartesianResult<Vec<f64>> {
        let phase = self.count / self.polls_per_phase.max(1);
        self.count += 1;
        Ok(match phase {
            0 => vec![0., 0., 1., 0., 0.],
            1 => vec![0.5, -0.5, 1., 1., 0.],
            _ => vec![0.; 5],
        })
    }
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
        use_tcp_frame: true,
    }
}

fn main() -> CartesianResult<()> {
    env_logger::init();
    let args = CommandLineArguments::parse();
    let params = match &args.config {
        Some(path) => load_params(path)?,
        None => default_params(),
    };

    let robot = Arc::new(SimulatedRobot::new(6));
    let clock = SimulationClock::new(robot.clone(), Duration::from_millis(10));
    let _simulation =
        PeriodicThread::start("simulation", Arc::new(clock), RealtimeConfig::Ignore)?;
    let controller = Arc::new(CartesianController::new(
        robot,
        Arc::new(IdentitySolver::new()),
        &params,
    )?);

    let remote = ScriptedRemote {
        polls_per_phase: args.polls,
        count: 0,
    };
    let wiimote = WiimoteSensorDevice::new(
        Box::new(remote),
        &WiimoteParams {
            use_movi: args.movi,
            ..WiimoteParams::default()
        },
    );
    let streaming_params = StreamingParams::default();
    let period = Duration::from_secs_f64(streaming_params.period_ms / 1000.);
    let device_controller = Arc::new(StreamingDeviceController::new(
        &streaming_params,
        controller.clone(),
        Box::new(wiimote),
        None,
    )?);
    let mut streaming = PeriodicThread::start(
        "streaming",
        device_controller.clone(),
        RealtimeConfig::Ignore,
    )?;

    sleep(period * (3 * args.polls.max(1)) as u32);
    streaming.stop();
    device_controller.interrupt()?;

    let (state, x) = controller.stat()?;
    println!("Finished in state {} at {:?}", state, x);
    Ok(())
}
