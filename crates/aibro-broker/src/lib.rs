// SPDX-FileCopyrightText: 2026 Aibro Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! WebSocket connection and room registry.
//!
//! All room membership and broadcast fan-out happen inside one registry
//! task consuming a command channel, so no membership state is ever
//! touched from two tasks at once. Socket read loops only parse frames
//! and forward commands; AI and speech work run in spawned tasks and
//! report back through the same channel.

pub mod events;
pub mod history;
pub mod origin;
pub mod registry;
pub mod server;

pub use registry::{Command, Registry, Services};
pub use server::{start_server, BrokerConfig};
