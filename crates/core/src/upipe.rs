//! Pipe object and manager (component I, `upipe`).
//!
//! A manager is a signature plus an allocator; a pipe instance is a
//! polymorphic [`PipeBehavior`] wrapped in lifecycle bookkeeping. Because a
//! pipe is bound to exactly one event loop for its lifetime (§5) and is
//! never thread-safe for direct calls, pipe state lives behind
//! `Rc<RefCell<_>>` rather than `Arc<Mutex<_>>` — `Rc` being `!Send` turns
//! "not thread-safe for direct calls" into a compile-time property instead
//! of a documented convention (see DESIGN.md for this Open-Question
//! resolution).

use crate::error::UbaseErr;
use crate::uprobe::{throw, Event, Outcome, PipeId, Probe};
use crate::uref::Uref;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// A manager's 32-bit fourcc signature, used both to identify the concrete
/// pipe kind and to namespace private control commands/events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Signature(pub u32);

impl Signature {
    #[must_use]
    pub const fn from_fourcc(bytes: [u8; 4]) -> Self {
        Self(u32::from_be_bytes(bytes))
    }
}

/// §3's pipe lifecycle state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeLifecycle {
    /// Post-alloc, before any control: only `SetFlowDef` and request
    /// registration are guaranteed to work.
    Allocated,
    /// A flow definition has been set; input may begin.
    Configured,
    /// Input is flowing; control commands continue to be accepted.
    Active,
    /// Last external reference released.
    Dead,
}

/// Standard control commands (§4.I), plus a private, manager-signed band
/// for pipe-specific commands.
#[derive(Debug, Clone)]
pub enum ControlCommand {
    AttachUpumpMgr,
    AttachUclock,
    GetFlowDef,
    SetFlowDef(Uref),
    GetOutput,
    SetOutput(PipeId),
    GetOutputSize,
    SetOutputSize(u32),
    RegisterRequest(u64),
    UnregisterRequest(u64),
    GetUri,
    SetUri(String),
    GetOption(String),
    SetOption(String, String),
    GetSubMgr,
    IterateSub,
    SubGetSuper,
    BinGetFirstInner,
    BinGetLastInner,
    /// Pipe-specific command, keyed by the issuing manager's signature so
    /// an unrecognised signature reliably falls through to `Unhandled`.
    Private { signature: Signature, code: u32, arg: u64 },
}

#[derive(Debug, Clone)]
pub enum ControlReply {
    None,
    FlowDef(Uref),
    Output(PipeId),
    OutputSize(u32),
    Uri(String),
    Option(String),
    SubMgr(Signature),
    SubList(Vec<PipeId>),
    PipeRef(PipeId),
    Custom(u64),
}

/// Per-pipe bookkeeping handed to [`PipeBehavior`] methods: identity,
/// lifecycle, and the probe chain to throw events up.
pub struct PipeCtx {
    pub id: PipeId,
    pub signature: Signature,
    lifecycle: Cell<PipeLifecycle>,
    probe: Option<Rc<dyn Probe>>,
}

impl PipeCtx {
    #[must_use]
    pub fn new(id: PipeId, signature: Signature, probe: Option<Rc<dyn Probe>>) -> Self {
        Self { id, signature, lifecycle: Cell::new(PipeLifecycle::Allocated), probe }
    }

    #[must_use]
    pub fn lifecycle(&self) -> PipeLifecycle {
        self.lifecycle.get()
    }

    pub fn set_lifecycle(&self, state: PipeLifecycle) {
        self.lifecycle.set(state);
    }

    /// Throws `event` up this pipe's probe chain. A pipe must never throw
    /// after `Dead` (§4.I); callers enforce that, this just no-ops if there
    /// is no chain attached.
    pub fn throw(&self, event: Event) -> Outcome {
        match &self.probe {
            Some(head) => throw(head.as_ref(), self.id, &event),
            None => Outcome::Unhandled,
        }
    }
}

/// The behaviour a concrete pipe kind implements: the `input`/`control`
/// half of the manager's four hooks (`alloc`/`free` are modeled by
/// ordinary construction/`Drop`).
pub trait PipeBehavior {
    /// A uref handed to `input` is transferred; the implementation owns it
    /// from here (ownership discipline, §3's invariants).
    fn input(&mut self, ctx: &PipeCtx, uref: Uref);

    fn control(&mut self, ctx: &PipeCtx, cmd: ControlCommand) -> Result<ControlReply, UbaseErr>;
}

/// A live pipe instance: identity/lifecycle bookkeeping plus the
/// polymorphic behaviour, both behind `Rc<RefCell<_>>` per the
/// single-threaded-ownership design note above.
#[derive(Clone)]
pub struct PipeRef {
    ctx: Rc<PipeCtx>,
    behavior: Rc<RefCell<dyn PipeBehavior>>,
}

impl PipeRef {
    #[must_use]
    pub fn new(id: PipeId, signature: Signature, probe: Option<Rc<dyn Probe>>, behavior: Rc<RefCell<dyn PipeBehavior>>) -> Self {
        Self { ctx: Rc::new(PipeCtx::new(id, signature, probe)), behavior }
    }

    #[must_use]
    pub fn id(&self) -> PipeId {
        self.ctx.id
    }

    #[must_use]
    pub fn lifecycle(&self) -> PipeLifecycle {
        self.ctx.lifecycle()
    }

    /// Dispatches a uref to this pipe's `input` hook. `INVALID` if the
    /// pipe is `Dead` or hasn't been `Configured` yet.
    pub fn call_input(&self, uref: Uref) -> Result<(), UbaseErr> {
        match self.ctx.lifecycle() {
            PipeLifecycle::Allocated | PipeLifecycle::Dead => Err(UbaseErr::Invalid),
            PipeLifecycle::Configured | PipeLifecycle::Active => {
                self.ctx.set_lifecycle(PipeLifecycle::Active);
                self.behavior.borrow_mut().input(&self.ctx, uref);
                Ok(())
            },
        }
    }

    /// Dispatches a control command. `SetFlowDef` is the one command
    /// guaranteed to work straight out of `Allocated` (§3); everything
    /// else requires `Configured` or later.
    pub fn call_control(&self, cmd: ControlCommand) -> Result<ControlReply, UbaseErr> {
        if self.ctx.lifecycle() == PipeLifecycle::Dead {
            return Err(UbaseErr::Invalid);
        }
        if self.ctx.lifecycle() == PipeLifecycle::Allocated && !matches!(cmd, ControlCommand::SetFlowDef(_)) {
            return Err(UbaseErr::Invalid);
        }
        let reply = self.behavior.borrow_mut().control(&self.ctx, cmd.clone())?;
        if matches!(cmd, ControlCommand::SetFlowDef(_)) && self.ctx.lifecycle() == PipeLifecycle::Allocated {
            self.ctx.set_lifecycle(PipeLifecycle::Configured);
        }
        Ok(reply)
    }

    /// Releases the last external reference: throws `Dead` and transitions
    /// the lifecycle. The manager's `free` hook corresponds to this
    /// `PipeRef`'s `Rc`/`RefCell` simply dropping once every clone is gone.
    pub fn release(&self) {
        if self.ctx.lifecycle() != PipeLifecycle::Dead {
            self.ctx.set_lifecycle(PipeLifecycle::Dead);
            self.ctx.throw(Event::Dead);
        }
    }

    /// Throws `event` on this pipe's own probe chain from outside its
    /// `input`/`control` hooks — needed wherever one pipe holds another's
    /// `PipeRef` and must raise an event on its behalf (e.g. a bin's
    /// sub-pipe manager throwing `SinkEnd` on a sibling it has superseded).
    pub fn throw(&self, event: Event) -> Outcome {
        self.ctx.throw(event)
    }
}

/// A factory + v-table for pipes of one concrete kind (§4.I).
pub trait PipeManager {
    fn signature(&self) -> Signature;

    /// Allocates a void pipe (no flow-def argument required up front).
    fn alloc_void(&self, id: PipeId, probe: Option<Rc<dyn Probe>>) -> Result<PipeRef, UbaseErr>;

    /// Allocates a pipe that requires an initial flow-def uref.
    fn alloc_flow(&self, id: PipeId, probe: Option<Rc<dyn Probe>>, flow_def: Uref) -> Result<PipeRef, UbaseErr> {
        let pipe = self.alloc_void(id, probe)?;
        pipe.call_control(ControlCommand::SetFlowDef(flow_def))?;
        Ok(pipe)
    }
}
