// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Helpers for running periodic threads with realtime scheduling.
use std::io;
use std::path::Path;

use crate::exception::{CartesianException, CartesianResult};

/// Determines whether the current OS kernel is a realtime kernel.
///
/// On Linux, this checks for the existence of `/sys/kernel/realtime`.
pub fn has_realtime_kernel() -> bool {
    Path::new("/sys/kernel/realtime").exists()
}

fn realtime_exception(message: &str) -> CartesianException {
    CartesianException::RealTimeException {
        message: format!("cartesian-control: {}", message),
    }
}

fn os_failure(action: &str, error: io::Error) -> CartesianException {
    realtime_exception(&format!("{} failed: {}", action, error))
}

/// SCHED_FIFO priority for the control threads, one below the maximum so the kernel's own
/// realtime threads keep precedence.
fn control_priority() -> CartesianResult<libc::c_int> {
    let max_priority = unsafe { libc::sched_get_priority_max(libc::SCHED_FIFO) };
    if max_priority == -1 {
        return Err(os_failure(
            "querying the SCHED_FIFO priority range",
            io::Error::last_os_error(),
        ));
    }
    Ok(max_priority - 1)
}

/// Sets the calling thread to one below the highest SCHED_FIFO priority and locks the process
/// memory.
///
/// # Errors
/// * RealTimeException naming the failed system call and the OS error.
///
/// If the method returns an Error please check your /etc/security/limits.conf file
/// There should be a line like this:
/// ```text
///robot            -       rtprio          99
/// ```
pub fn set_current_thread_to_highest_scheduler_priority() -> CartesianResult<()> {
    let param = libc::sched_param {
        sched_priority: control_priority()?,
    };
    // pthread functions return the error code instead of setting errno
    let code =
        unsafe { libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_FIFO, &param) };
    if code != 0 {
        return Err(os_failure(
            &format!("switching to SCHED_FIFO priority {}", param.sched_priority),
            io::Error::from_raw_os_error(code),
        ));
    }
    if unsafe { libc::mlockall(libc::MCL_CURRENT | libc::MCL_FUTURE) } != 0 {
        return Err(os_failure("locking the process memory", io::Error::last_os_error()));
    }
    Ok(())
}

/// Prepares the calling thread according to `enforce`.
///
/// Fails if realtime scheduling is enforced but the kernel has no realtime capabilities.
pub fn prepare_thread(enforce: bool) -> CartesianResult<()> {
    if !enforce {
        return Ok(());
    }
    if !has_realtime_kernel() {
        return Err(realtime_exception(
            "Running kernel does not have realtime capabilities.",
        ));
    }
    set_current_thread_to_highest_scheduler_priority()
}
