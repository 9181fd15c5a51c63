//! Bin-pipes (component J, second half): a facade whose implementation is
//! itself a chain of inner pipes.
//!
//! `SetFlowDef` and `input` are forwarded to the first inner; `SetOutput`
//! and output-requests are forwarded to the last inner. The cross-blend
//! pipe in `pipegraph-modules` is the worked bin/sub-pipe example, grounded
//! on `examples/original_source/lib/upipe-modules/upipe_cross_blend.c`.

use crate::error::UbaseErr;
use crate::upipe::{ControlCommand, ControlReply, PipeRef};
use crate::uref::Uref;

/// A facade pipe composed of a first and last inner pipe. Request
/// registration lists are kept on each inner pipe itself (via its own
/// `RequestRegistry`, `crate::request`) so the bin can rebuild its internal
/// chain while preserving upstream/downstream request state.
pub struct BinPipe {
    first_inner: PipeRef,
    last_inner: PipeRef,
}

impl BinPipe {
    #[must_use]
    pub fn new(first_inner: PipeRef, last_inner: PipeRef) -> Self {
        Self { first_inner, last_inner }
    }

    #[must_use]
    pub fn first_inner(&self) -> &PipeRef {
        &self.first_inner
    }

    #[must_use]
    pub fn last_inner(&self) -> &PipeRef {
        &self.last_inner
    }

    /// Forwards input to the first inner pipe, as the facade's own input
    /// entry point.
    pub fn input(&self, uref: Uref) -> Result<(), UbaseErr> {
        self.first_inner.call_input(uref)
    }

    /// Dispatches a control command: `SetFlowDef` goes to the first inner,
    /// `SetOutput`/`GetOutput`/`GetOutputSize`/`SetOutputSize` to the last,
    /// and `BinGetFirstInner`/`BinGetLastInner` are answered directly
    /// without delegating.
    pub fn control(&self, cmd: ControlCommand) -> Result<ControlReply, UbaseErr> {
        match cmd {
            ControlCommand::SetFlowDef(_) => self.first_inner.call_control(cmd),
            ControlCommand::SetOutput(_)
            | ControlCommand::GetOutput
            | ControlCommand::GetOutputSize
            | ControlCommand::SetOutputSize(_) => self.last_inner.call_control(cmd),
            ControlCommand::BinGetFirstInner => Ok(ControlReply::PipeRef(self.first_inner.id())),
            ControlCommand::BinGetLastInner => Ok(ControlReply::PipeRef(self.last_inner.id())),
            other => self.last_inner.call_control(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upipe::{PipeBehavior, PipeCtx, Signature};
    use crate::uprobe::PipeId;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct Recorder {
        flow_defs: Vec<()>,
        inputs: Vec<()>,
    }

    impl PipeBehavior for Recorder {
        fn input(&mut self, _ctx: &PipeCtx, _uref: Uref) {
            self.inputs.push(());
        }

        fn control(&mut self, _ctx: &PipeCtx, cmd: ControlCommand) -> Result<ControlReply, UbaseErr> {
            match cmd {
                ControlCommand::SetFlowDef(_) => {
                    self.flow_defs.push(());
                    Ok(ControlReply::None)
                },
                ControlCommand::SetOutput(_) => Ok(ControlReply::None),
                _ => Err(UbaseErr::Unhandled),
            }
        }
    }

    #[test]
    fn set_flow_def_and_input_go_to_first_inner() {
        let first = PipeRef::new(PipeId(1), Signature(0), None, Rc::new(RefCell::new(Recorder { flow_defs: vec![], inputs: vec![] })));
        let last = PipeRef::new(PipeId(2), Signature(0), None, Rc::new(RefCell::new(Recorder { flow_defs: vec![], inputs: vec![] })));
        let bin = BinPipe::new(first.clone(), last.clone());

        bin.control(ControlCommand::SetFlowDef(Uref::new())).expect("set flow def");
        bin.input(Uref::new()).expect("input");

        assert_eq!(first.lifecycle(), crate::upipe::PipeLifecycle::Active);
        assert_eq!(last.lifecycle(), crate::upipe::PipeLifecycle::Allocated);
    }

    #[test]
    fn set_output_goes_to_last_inner() {
        let first = PipeRef::new(PipeId(3), Signature(0), None, Rc::new(RefCell::new(Recorder { flow_defs: vec![], inputs: vec![] })));
        let last = PipeRef::new(PipeId(4), Signature(0), None, Rc::new(RefCell::new(Recorder { flow_defs: vec![], inputs: vec![] })));
        // Configure `last` first so `SetOutput` is accepted (non-SetFlowDef
        // commands require Configured-or-later, per upipe's lifecycle gate).
        last.call_control(ControlCommand::SetFlowDef(Uref::new())).expect("configure last");
        let bin = BinPipe::new(first, last);

        bin.control(ControlCommand::SetOutput(PipeId(99))).expect("set output");
    }

    #[test]
    fn bin_get_first_last_inner_answered_directly() {
        let first = PipeRef::new(PipeId(5), Signature(0), None, Rc::new(RefCell::new(Recorder { flow_defs: vec![], inputs: vec![] })));
        let last = PipeRef::new(PipeId(6), Signature(0), None, Rc::new(RefCell::new(Recorder { flow_defs: vec![], inputs: vec![] })));
        let bin = BinPipe::new(first, last);

        match bin.control(ControlCommand::BinGetFirstInner).expect("first") {
            ControlReply::PipeRef(id) => assert_eq!(id, PipeId(5)),
            _ => panic!("expected PipeRef reply"),
        }
        match bin.control(ControlCommand::BinGetLastInner).expect("last") {
            ControlReply::PipeRef(id) => assert_eq!(id, PipeId(6)),
            _ => panic!("expected PipeRef reply"),
        }
    }
}
