// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains the streaming input devices and the loop which polls them.

pub mod streaming_controller;
pub mod streaming_device;
pub mod wiimote;
