// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Reference-counted buffers, attribute dictionaries, and the pipe/manager
//! traits used to build a directed graph of processing elements.
//!
//! ## Core Modules
//!
//! - [`refcount`]: reference-counting primitive with a release callback
//! - [`arena_list`]: arena-indexed intrusive doubly-linked list
//! - [`umem`]: bucketed memory pool backing ubuf/udict storage
//! - [`udict`]: packed, copy-on-write attribute dictionary
//! - [`ubuf`]: block/picture/sound payload buffers with map/unmap
//! - [`uref`]: the reference-counted token that flows between pipes
//! - [`uprobe`]: the stacked event-handler chain
//! - [`upipe`]: pipe objects, managers, and control commands
//! - [`subpipe`] / [`binpipe`]: parent-owned children and facade pipes
//! - [`request`]: upstream resource request plumbing
//! - [`error`]: the crate-wide error taxonomy
//!
//! ## Quick Start
//!
//! ```ignore
//! use pipegraph_core::upipe::{PipeBehavior, PipeCtx, ControlCommand, ControlReply};
//! use pipegraph_core::uref::Uref;
//! use pipegraph_core::error::UbaseErr;
//!
//! struct Passthrough;
//!
//! impl PipeBehavior for Passthrough {
//!     fn input(&mut self, _ctx: &PipeCtx, _uref: Uref) {}
//!     fn control(&mut self, _ctx: &PipeCtx, _cmd: ControlCommand) -> Result<ControlReply, UbaseErr> {
//!         Ok(ControlReply::None)
//!     }
//! }
//! ```

pub mod arena_list;
pub mod binpipe;
pub mod error;
pub mod refcount;
pub mod request;
pub mod subpipe;
pub mod ubuf;
pub mod udict;
pub mod umem;
pub mod upipe;
pub mod uprobe;
pub mod uref;

pub use arena_list::{ArenaList, ListIdx};
pub use binpipe::BinPipe;
pub use error::{PipeError, UbaseErr};
pub use refcount::{RefCounted, RefWeak};
pub use request::{Request, RequestRegistry};
pub use subpipe::{ParentHandle, SubPipeList};
pub use ubuf::{BlockBuf, MapGuard, PictureBuf, Plane, SampleFormat, SoundBuf, Ubuf};
pub use udict::{AttrKey, AttrType, AttrValue, Shorthand, Udict};
pub use umem::{MemPool, PooledPage, PoolStats};
pub use upipe::{ControlCommand, ControlReply, PipeBehavior, PipeCtx, PipeLifecycle, PipeManager, PipeRef, Signature};
pub use uprobe::{
    Event, LogLevel, LogLevelFilterProbe, ManagerProviderProbe, Outcome, PipeId, PrefixProbe, Probe,
    SourceSelectorProbe, StdioLogProbe, TransferProbe,
};
pub use uref::{match_def, ClockFields, Uref, UrefFlags, UrefMgr};
