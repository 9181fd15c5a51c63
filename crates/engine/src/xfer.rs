// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Cross-thread pipe transfer (component L, `xfer`).
//!
//! A pipe that performs blocking syscalls must not run on the application
//! thread (§4.L). [`XferManager`] relocates such a pipe's input/control onto
//! a dedicated OS thread's own [`crate::upump::PumpManager`], while the
//! application keeps talking to an ordinary local-side handle. Two
//! [`crate::uqueue::Uqueue`]s carry messages in each direction, each
//! drained by a task parked on that direction's `event_pop`/`event_push`
//! flag rather than polled — the same readiness contract §4.K specifies for
//! any event-loop integration of a `uqueue`.

use std::rc::Rc;
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex as PlMutex;
use pipegraph_core::uprobe::{throw, Event, Outcome, PipeId, Probe, TransferProbe};

use crate::upump::PumpManager;
use crate::uqueue::{QueuePolicy, Uqueue};

const XFER_QUEUE_CAPACITY: usize = 64;

/// Local→remote message kinds (§4.L).
#[derive(Debug, Clone)]
pub enum XferMsg {
    AttachUpumpMgr,
    SetUri(String),
    SetOutput(PipeId),
    Release,
    Detach,
}

/// Remote→local message kinds: re-wrapped events (including the terminal
/// `Dead`, which drives the local facade's own refcount drop).
#[derive(Debug, Clone)]
pub enum XferReply {
    Event(PipeId, Event),
    Dead(PipeId),
}

/// The remote-side operations a transferred pipe must support. Implemented
/// by whatever concrete pipe is being relocated; built on the remote
/// thread, inside the closure passed to [`XferManager::spawn`], so it never
/// has to be `Send` itself — only the factory closure that builds it does.
pub trait RemotePipeHandlers {
    fn attach_upump_mgr(&mut self);
    fn set_uri(&mut self, uri: String);
    fn set_output(&mut self, output: PipeId);
    /// Releases one reference; returns `true` once the internal refcount
    /// has reached zero and the pipe is ready to report `Dead` (§4.I: DEAD
    /// may trail the external release while the pipe finishes flushing).
    fn release(&mut self) -> bool;
    /// Attaches `probe` to the head of this pipe's own probe chain (§4.L's
    /// "probe interception"): from this point on, every event the remote
    /// pipe throws should be handed to `probe` so it becomes a
    /// reverse-direction [`XferReply::Event`] message instead of being lost
    /// on a thread the application never observes.
    fn attach_transfer_probe(&mut self, probe: Rc<dyn Probe>);
}

/// Drives the remote side of a transfer: applies queued [`XferMsg`]s to
/// `pipe` in FIFO order, holding `freeze` for the duration of each drained
/// batch so the application can pause processing via
/// [`XferManager::freeze`] to introspect the remote pipe's sub-pipe tree.
async fn remote_loop(
    pipe_id: PipeId,
    mut pipe: Box<dyn RemotePipeHandlers>,
    to_remote: Arc<Uqueue<XferMsg>>,
    from_remote: Arc<Uqueue<XferReply>>,
    freeze: Arc<PlMutex<()>>,
) {
    loop {
        to_remote.event_pop().notified().await;
        let _guard = freeze.lock();
        while let Some(msg) = to_remote.pop() {
            match msg {
                XferMsg::AttachUpumpMgr => pipe.attach_upump_mgr(),
                XferMsg::SetUri(uri) => pipe.set_uri(uri),
                XferMsg::SetOutput(output) => pipe.set_output(output),
                XferMsg::Release => {
                    if pipe.release() {
                        let _ = from_remote.push(XferReply::Dead(pipe_id));
                        return;
                    }
                },
                XferMsg::Detach => return,
            }
        }
    }
}

/// Owns the two `uqueue`s connecting an application-thread facade to a pipe
/// relocated onto its own OS thread, plus the introspection freeze lock.
pub struct XferManager {
    to_remote: Arc<Uqueue<XferMsg>>,
    from_remote: Arc<Uqueue<XferReply>>,
    freeze: Arc<PlMutex<()>>,
    remote_thread: Option<thread::JoinHandle<()>>,
}

impl XferManager {
    /// Spawns the remote OS thread, builds its own single-threaded
    /// [`PumpManager`], and runs `build_remote` to construct the remote
    /// pipe on that thread before entering [`remote_loop`].
    pub fn spawn<B>(pipe_id: PipeId, build_remote: B) -> Self
    where
        B: FnOnce() -> Box<dyn RemotePipeHandlers> + Send + 'static,
    {
        let to_remote = Arc::new(Uqueue::new(XFER_QUEUE_CAPACITY, QueuePolicy::Lockfree));
        let from_remote = Arc::new(Uqueue::new(XFER_QUEUE_CAPACITY, QueuePolicy::Lockfree));
        let freeze = Arc::new(PlMutex::new(()));

        let to_remote_t = Arc::clone(&to_remote);
        let from_remote_t = Arc::clone(&from_remote);
        let freeze_t = Arc::clone(&freeze);
        let remote_thread = thread::Builder::new()
            .name(format!("xfer-remote-{}", pipe_id.0))
            .spawn(move || {
                let mgr = PumpManager::new();
                let mut pipe = build_remote();
                let forward_queue = Arc::clone(&from_remote_t);
                pipe.attach_transfer_probe(Rc::new(TransferProbe {
                    forward: Box::new(move |id, event| {
                        let _ = forward_queue.push(XferReply::Event(id, event));
                    }),
                }));
                mgr.run_until(remote_loop(pipe_id, pipe, to_remote_t, from_remote_t, freeze_t));
            })
            .expect("spawn remote transfer thread");

        Self { to_remote, from_remote, freeze, remote_thread: Some(remote_thread) }
    }

    /// Enqueues a local→remote message. FIFO per testable property #6.
    pub fn send(&self, msg: XferMsg) -> Result<(), XferMsg> {
        self.to_remote.push(msg)
    }

    /// Drains one reverse-direction message, if any are queued.
    pub fn try_recv(&self) -> Option<XferReply> {
        self.from_remote.pop()
    }

    /// Re-throws every queued `Event` reply on `local_probe` as if the
    /// facade pipe itself had thrown it (§4.L's "probe interception"),
    /// preserving FIFO order. Meant to be driven from the local event
    /// loop, e.g. by an idler pump wired up alongside `event_pop`.
    /// `Dead` replies are left in place for [`Self::try_recv`], which owns
    /// the refcount-drop side of the lifecycle.
    pub fn drain_events(&self, local_probe: &dyn Probe, local_pipe: PipeId) {
        loop {
            match self.from_remote.pop() {
                Some(XferReply::Event(_, event)) => {
                    throw(local_probe, local_pipe, &event);
                },
                Some(dead @ XferReply::Dead(_)) => {
                    // Not ours to consume: put it back for `try_recv`.
                    let _ = self.from_remote.push(dead);
                    return;
                },
                None => return,
            }
        }
    }

    /// Acquires the freeze lock: while held, the remote loop cannot start
    /// processing a new batch of messages (it blocks trying to acquire the
    /// same lock), so the application can safely walk the remote pipe's
    /// sub-pipe tree or issue introspection-only control commands.
    pub fn freeze(&self) -> parking_lot::MutexGuard<'_, ()> {
        self.freeze.lock()
    }

    /// Blocks until the remote thread has exited (after `Dead` or
    /// `Detach`). Idempotent.
    pub fn join(&mut self) {
        if let Some(handle) = self.remote_thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for XferManager {
    fn drop(&mut self) {
        let _ = self.send(XferMsg::Detach);
        self.join();
    }
}
