// SPDX-FileCopyrightText: 2026 Aibro Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Handshake-time origin and peer-address screening.

use std::net::IpAddr;

/// Whether a WebSocket upgrade may proceed.
///
/// Allowed when any of: dev mode is on, no `Origin` header was sent, the
/// origin host is localhost, the peer address is loopback or private, or
/// the origin appears verbatim in the allow-list.
pub fn upgrade_allowed(
    origin: Option<&str>,
    peer: IpAddr,
    allow_list: &[String],
    dev_mode: bool,
) -> bool {
    if dev_mode {
        return true;
    }
    let Some(origin) = origin.map(str::trim).filter(|o| !o.is_empty()) else {
        // Non-browser clients send no Origin header.
        return true;
    };
    if is_localhost_origin(origin) || is_private(peer) {
        return true;
    }
    allow_list.iter().any(|allowed| allowed == origin)
}

fn is_localhost_origin(origin: &str) -> bool {
    let host = origin
        .split_once("://")
        .map_or(origin, |(_, rest)| rest)
        .split(['/', ':'])
        .next()
        .unwrap_or("");
    matches!(host, "localhost" | "127.0.0.1" | "[::1]" | "::1")
}

fn is_private(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_loopback() || v4.is_private() || v4.is_link_local(),
        IpAddr::V6(v6) => v6.is_loopback() || (v6.segments()[0] & 0xfe00) == 0xfc00,
    }
}
