/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 *
 * Copyright 2023 Robert D. French
 */
//! A userspace, [Doors][1]-style synchronous local RPC primitive.
//!
//! Doors are a high-speed, RPC-style interprocess communication facility
//! originally found in [illumos][2], built around a blocking call that hands
//! the caller's timeslice directly to the server thread. This crate
//! reimplements the same client/server contract over an ordinary local
//! datagram socket, for hosts that have no doors support in the kernel.
//!
//! ## Example
//! ```no_run
//! // In the Server --------------------------------------- //
//! use doors::server::Door;
//! use doors::server::Request;
//! use doors::server::Response;
//!
//! #[doors::server_procedure]
//! fn double(x: Request) -> Response<Vec<u8>> {
//!     let n = x.data.first().copied().unwrap_or(0);
//!     Response::new(vec![n.wrapping_mul(2)])
//! }
//!
//! let door = Door::create(double).unwrap();
//! door.force_attach("/tmp/double.door").unwrap();
//!
//! // In the Client --------------------------------------- //
//! use doors::client::Client;
//!
//! let client = Client::open("/tmp/double.door").unwrap();
//! let response = client.call(&[111]).unwrap();
//! assert_eq!(response[0], 222);
//! ```
//!
//! [1]: https://illumos.org/man/3C/door_create
//! [2]: https://illumos.org
pub use door_macros::server_procedure;

pub mod attrs;
pub mod client;
pub mod error;
mod accept;
mod dispatch;
mod fork;
mod id;
mod runtime;
pub mod server;
mod sock;
mod state;
mod table;
mod wire;
mod worker;

pub use attrs::Attributes;
pub use client::Client;
pub use error::Error;
pub use id::DoorId;
pub use server::{detach, Door, DoorInfo, Param, Request, Response};
pub use state::ServerProcedure;
