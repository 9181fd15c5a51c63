// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! pipegraph-engine: the single-threaded event loop, inter-thread queue and
//! cross-thread pipe transfer mechanisms that drive a `pipegraph-core` pipe
//! graph.
//!
//! ## Modules
//!
//! - [`upump`]: the event loop (component G) — fd-read/write, timer, idler
//!   and signal pumps on a `tokio` current-thread runtime plus `LocalSet`.
//! - [`uqueue`]: the bounded inter-thread queue (component K) with three
//!   selectable backends behind a readiness-flag contract.
//! - [`xfer`]: cross-thread pipe transfer (component L), relocating a pipe
//!   onto its own OS thread while the application keeps a local-side handle.

pub mod upump;
pub mod uqueue;
pub mod xfer;

pub use upump::{Pump, PumpManager, PumpState};
pub use uqueue::{EventFlag, QueuePolicy, Uqueue};
pub use xfer::{RemotePipeHandlers, XferManager, XferMsg, XferReply};
