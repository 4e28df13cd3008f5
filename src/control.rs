// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains the Cartesian controller and everything it needs to command the joints.

pub mod cartesian_control;
pub mod cartesian_controller;
pub mod control_loop;
pub mod control_tools;
pub mod control_types;
pub mod isochronous;
pub mod joint_limits;
pub mod linear_trajectory_thread;
pub mod robot_interface;
pub mod trajectory;
