// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains the timer driven thread which ticks the periodic tasks.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, sleep, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, error};

use crate::control::control_tools::prepare_thread;
use crate::control::control_types::RealtimeConfig;
use crate::exception::{create_invalid_configuration, CartesianException, CartesianResult};

/// A task which is ticked with a fixed period by a [`PeriodicThread`].
///
/// A tick must not block for longer than the period and must never fail the thread: errors are
/// handled (usually logged) inside the tick and the next period is tried again.
pub trait PeriodicTask: Send + Sync {
    /// Time between the start of two consecutive ticks. Read again before every tick.
    fn period(&self) -> Duration;
    fn tick(&self);
}

/// Runs a [`PeriodicTask`] on its own thread until stopped or dropped.
pub struct PeriodicThread {
    name: String,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

/// Converts a period in \[ms\] into a [`Duration`].
///
/// # Errors
/// * InvalidConfiguration if `period_ms` is not positive or too large for a [`Duration`].
pub fn period_from_ms(period_ms: f64) -> CartesianResult<Duration> {
    match Duration::try_from_secs_f64(period_ms / 1000.) {
        Ok(period) if period > Duration::ZERO => Ok(period),
        _ => Err(create_invalid_configuration(format!(
            "period must be a positive number of milliseconds, got {}",
            period_ms
        ))),
    }
}

fn thread_exception(message: String) -> CartesianException {
    CartesianException::RealTimeException { message }
}

impl PeriodicThread {
    /// Spawns the thread and returns once it is running.
    ///
    /// # Arguments
    /// * `name` - Name of the thread, shown in logs and debuggers.
    /// * `task` - The task to tick.
    /// * `realtime_config` - With [`RealtimeConfig::Enforce`] the thread runs with realtime
    /// priority or does not start at all.
    /// # Errors
    /// * RealTimeException if the thread cannot be spawned or its realtime priority cannot be set.
    pub fn start(
        name: &str,
        task: Arc<dyn PeriodicTask>,
        realtime_config: RealtimeConfig,
    ) -> CartesianResult<PeriodicThread> {
        let running = Arc::new(AtomicBool::new(true));
        let (sender, receiver) = mpsc::channel();
        let thread_running = running.clone();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let prepared = prepare_thread(realtime_config == RealtimeConfig::Enforce);
                let ready = prepared.is_ok();
                if sender.send(prepared).is_err() || !ready {
                    return;
                }
                run_periodically(task.as_ref(), thread_running.as_ref());
            })
            .map_err(|e| thread_exception(format!("cannot spawn thread {}: {}", name, e)))?;
        match receiver.recv() {
            Ok(Ok(())) => {
                debug!("Started periodic thread {}", name);
                Ok(PeriodicThread {
                    name: name.to_string(),
                    running,
                    handle: Some(handle),
                })
            }
            Ok(Err(error)) => {
                let _ = handle.join();
                Err(error)
            }
            Err(_) => {
                let _ = handle.join();
                Err(thread_exception(format!(
                    "thread {} terminated during start-up",
                    name
                )))
            }
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some() && self.running.load(Ordering::SeqCst)
    }

    /// Stops ticking and joins the thread. A tick in progress is finished first.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Periodic thread {} panicked", self.name);
            } else {
                debug!("Stopped periodic thread {}", self.name);
            }
        }
    }
}

impl Drop for PeriodicThread {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_periodically(task: &dyn PeriodicTask, running: &AtomicBool) {
    let mut next_tick = Instant::now();
    while running.load(Ordering::SeqCst) {
        task.tick();
        next_tick += task.period();
        let now = Instant::now();
        if next_tick > now {
            sleep(next_tick - now);
        } else {
            // overrun, restart the schedule instead of catching up
            next_tick = now;
        }
    }
}
