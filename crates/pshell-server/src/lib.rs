// Copyright © 2026 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Embedded command-line shell server with UDP, Unix, TCP, and local transports.
// Author: Lukas Bower
#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! PSHELL server runtime.
//!
//! A host program embeds a [`Server`] to expose operator-visible commands
//! (diagnostics, tuning, introspection) over one of four transports:
//! datagram-over-IP (UDP), datagram-over-filesystem (Unix), stream-over-IP
//! (TCP, driven by a plain telnet client), or the host's own terminal. The
//! host registers named commands with callbacks; a remote thin client or a
//! terminal user invokes them and receives the formatted output the
//! callback produced through its [`Context`].
//!
//! ```no_run
//! use pshell_server::{Server, ServerType};
//!
//! let mut server = Server::new("traceServer", ServerType::Udp, "anyhost", 9001);
//! server
//!     .register_command(
//!         |ctx| {
//!             let detail = ctx.args().first().cloned();
//!             ctx.println(format!("trace status: {detail:?}"));
//!         },
//!         "trace",
//!         "show trace status",
//!         "[detail]",
//!         0,
//!         1,
//!         true,
//!     )
//!     .unwrap();
//! server.run().unwrap();
//! ```
//!
//! One live session at a time is intentional: the dispatch pipeline is a
//! strictly serial receive, dispatch, reply cycle, and the stream transport
//! closes its listener while a session is active.

pub mod command;
pub mod config;
pub mod context;
mod editor;
pub mod server;
mod transport;

pub use command::{CommandFn, RegisterError};
pub use config::{ServerType, ANYBCAST, ANYHOST, LOCALHOST};
pub use context::{is_prefix_match, parse_option, Context};
pub use server::{Server, ServerError, ServerHandle};

/// Library version reported to `query-version` clients.
pub const SERVER_VERSION: &str = "1";
