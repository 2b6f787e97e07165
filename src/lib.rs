/*
 * This file is part of SensorHub.
 *
 * Copyright (C) 2025 SensorHub contributors
 *
 * SensorHub is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * SensorHub is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with SensorHub. If not, see <https://www.gnu.org/licenses/>.
 */

//! SensorHub - IIO sensor dependency graph and dataflow engine
//!
//! Umbrella crate over the workspace: the engine lives in `sh-core`, the
//! wire types in `sh-protocol` and the error type in `sh-error`.

pub use sh_core as core;
pub use sh_error as error;
pub use sh_protocol as protocol;

pub use sh_core::{
    load_config, GraphBuilder, HubClient, HubConfig, SensorGraph, SensorHub, SensorNode,
};
pub use sh_error::{Result, SensorHubError};
pub use sh_protocol::{SensorEvent, SensorInfo, SensorType};
