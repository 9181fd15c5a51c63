// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Event loop abstraction (component G, `upump`).
//!
//! [`PumpManager`] is single-threaded: every pump it creates, and every
//! callback those pumps fire, runs on the one OS thread that drives it
//! (§4.G, §5 — cross-thread invocation of a pump manager is undefined
//! behaviour). We get that guarantee from the executor rather than from
//! documented discipline by building on a current-thread `tokio` runtime
//! plus a `LocalSet`: pipe state behind `Rc<RefCell<_>>` (as in
//! `pipegraph-core`) simply cannot cross threads, because `Rc` is `!Send`.
//!
//! Required pump kinds: fd-read, fd-write, timer (one-shot or periodic),
//! idler, signal. Each has lifecycle allocated → started (armed) → fires →
//! stopped → freed; a pump holds a strong reference to its owner for the
//! duration of each callback so the owner cannot be dropped mid-dispatch.

use std::cell::Cell;
use std::future::Future;
use std::os::unix::io::RawFd;
use std::rc::Rc;
use std::time::Duration;

use pipegraph_core::error::UbaseErr;
use tokio::io::unix::AsyncFd;
use tokio::task::LocalSet;

/// §4.G's pump lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpState {
    Allocated,
    Started,
    Stopped,
}

/// A handle to one registered pump. Dropping the last handle stops and
/// frees the underlying task; `stop()` is the explicit, synchronous way to
/// cancel pending work ahead of a drop (§5: "a pump may be stopped and
/// freed by its owner to cancel pending work; in-flight callbacks run to
/// completion").
pub struct Pump {
    state: Rc<Cell<PumpState>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl Pump {
    #[must_use]
    pub fn state(&self) -> PumpState {
        self.state.get()
    }

    /// Arms the pump. A pump does nothing (and holds no resources beyond
    /// its own task) until started; its task checks this flag every time
    /// it wakes.
    pub fn start(&self) {
        self.state.set(PumpState::Started);
    }

    /// Disarms the pump; the in-flight callback invocation, if any, still
    /// runs to completion, but no further firings occur afterward.
    pub fn stop(&self) {
        self.state.set(PumpState::Stopped);
    }
}

impl Drop for Pump {
    fn drop(&mut self) {
        self.stop();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Owns the single-threaded executor every pump registered against it runs
/// on. Construct one per OS thread that will host pipes; `run` blocks that
/// thread pumping the loop until every pump has been dropped or the
/// supplied future completes (the `pipegraph-engine::xfer` remote loop uses
/// the latter — it runs until a `Shutdown` transfer message resolves a
/// future it is awaiting).
pub struct PumpManager {
    local: LocalSet,
}

impl Default for PumpManager {
    fn default() -> Self {
        Self::new()
    }
}

impl PumpManager {
    #[must_use]
    pub fn new() -> Self {
        Self { local: LocalSet::new() }
    }

    /// Registers a pump that fires `callback` once the loop is otherwise
    /// idle, per iteration, while started.
    pub fn add_idler<F>(&self, mut callback: F) -> Pump
    where
        F: FnMut() + 'static,
    {
        let state = Rc::new(Cell::new(PumpState::Allocated));
        let task_state = Rc::clone(&state);
        let task = self.local.spawn_local(async move {
            loop {
                if task_state.get() == PumpState::Stopped {
                    return;
                }
                if task_state.get() == PumpState::Started {
                    callback();
                }
                tokio::task::yield_now().await;
            }
        });
        Pump { state, task: Some(task) }
    }

    /// Registers a one-shot or periodic timer pump. `interval` re-arms the
    /// timer after each firing; its absence means one-shot.
    pub fn add_timer<F>(&self, after: Duration, interval: Option<Duration>, mut callback: F) -> Pump
    where
        F: FnMut() + 'static,
    {
        let state = Rc::new(Cell::new(PumpState::Allocated));
        let task_state = Rc::clone(&state);
        let task = self.local.spawn_local(async move {
            tokio::time::sleep(after).await;
            loop {
                if task_state.get() == PumpState::Stopped {
                    return;
                }
                if task_state.get() == PumpState::Started {
                    callback();
                }
                match interval {
                    Some(period) => tokio::time::sleep(period).await,
                    None => return,
                }
            }
        });
        Pump { state, task: Some(task) }
    }

    /// Registers a pump that fires whenever `fd` becomes readable.
    pub fn add_fd_read<F>(&self, fd: RawFd, mut callback: F) -> Result<Pump, UbaseErr>
    where
        F: FnMut() + 'static,
    {
        let async_fd = AsyncFd::new(RawFdSource(fd)).map_err(|_| UbaseErr::Upump)?;
        let state = Rc::new(Cell::new(PumpState::Allocated));
        let task_state = Rc::clone(&state);
        let task = self.local.spawn_local(async move {
            loop {
                let Ok(mut guard) = async_fd.readable().await else { return };
                if task_state.get() == PumpState::Stopped {
                    return;
                }
                if task_state.get() == PumpState::Started {
                    callback();
                }
                guard.clear_ready();
            }
        });
        Ok(Pump { state, task: Some(task) })
    }

    /// Registers a pump that fires whenever `fd` becomes writable.
    pub fn add_fd_write<F>(&self, fd: RawFd, mut callback: F) -> Result<Pump, UbaseErr>
    where
        F: FnMut() + 'static,
    {
        let async_fd = AsyncFd::new(RawFdSource(fd)).map_err(|_| UbaseErr::Upump)?;
        let state = Rc::new(Cell::new(PumpState::Allocated));
        let task_state = Rc::clone(&state);
        let task = self.local.spawn_local(async move {
            loop {
                let Ok(mut guard) = async_fd.writable().await else { return };
                if task_state.get() == PumpState::Stopped {
                    return;
                }
                if task_state.get() == PumpState::Started {
                    callback();
                }
                guard.clear_ready();
            }
        });
        Ok(Pump { state, task: Some(task) })
    }

    /// Registers a pump that fires on delivery of `signal` (e.g. SIGINT).
    /// Requires the `tokio` "signal" feature, enabled on this crate.
    pub fn add_signal<F>(&self, signal: tokio::signal::unix::SignalKind, mut callback: F) -> Result<Pump, UbaseErr>
    where
        F: FnMut() + 'static,
    {
        let mut stream = tokio::signal::unix::signal(signal).map_err(|_| UbaseErr::Upump)?;
        let state = Rc::new(Cell::new(PumpState::Allocated));
        let task_state = Rc::clone(&state);
        let task = self.local.spawn_local(async move {
            loop {
                if stream.recv().await.is_none() {
                    return;
                }
                if task_state.get() == PumpState::Stopped {
                    return;
                }
                if task_state.get() == PumpState::Started {
                    callback();
                }
            }
        });
        Ok(Pump { state, task: Some(task) })
    }

    /// Runs every registered pump on this thread until `until` resolves.
    /// Blocks the calling thread — this is meant to be the main body of
    /// whatever OS thread owns this manager.
    pub fn run_until<F: Future>(self, until: F) -> F::Output {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .enable_io()
            .build()
            .expect("current-thread tokio runtime");
        rt.block_on(self.local.run_until(until))
    }
}

struct RawFdSource(RawFd);

impl std::os::unix::io::AsRawFd for RawFdSource {
    fn as_raw_fd(&self) -> RawFd {
        self.0
    }
}
