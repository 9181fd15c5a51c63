//! Probe chain (component H, `uprobe`).
//!
//! A [`Probe`] is an `(event, pipe) -> Outcome` handler. Chains are built by
//! wrapping: each decorator probe holds an optional `next` and, when it
//! does not itself handle an event, forwards to it. `throw` walks the
//! chain head-to-tail; the first handler returning anything other than
//! [`Outcome::Unhandled`] terminates traversal (testable property #4).

use crate::error::UbaseErr;
use std::rc::Rc;
use std::sync::Mutex;
use tracing::Level;

/// Identifies the pipe a probe event originated from. An id, not a
/// pointer/reference, so it survives cross-thread transfer (§4.L) and the
/// probe-at-dead re-emit path, per the REDESIGN FLAGS guidance on breaking
/// cyclic references with id indirection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipeId(pub u32);

/// Standard probe events (§3), plus a `Log` kind used to mirror probe-level
/// logging into `tracing`, and a `Private` escape hatch for manager-signed,
/// pipe-specific event numbers ≥ `UPROBE_LOCAL`.
#[derive(Debug, Clone)]
pub enum Event {
    Ready,
    Dead,
    SyncAcquired,
    SyncLost,
    ClockRef { cr: u64 },
    ClockTs { pts: Option<u64>, dts: Option<u64> },
    ClockUtc { utc: u64 },
    NewFlowDef,
    SourceEnd,
    SinkEnd,
    NeedOutput,
    NeedUpumpMgr,
    NeedUrefMgr,
    NeedUbufMgr,
    NeedUclock,
    NewRap,
    SplitUpdate { flow_id: u64 },
    Frozen,
    Thaw,
    Fatal(UbaseErr),
    Log { level: LogLevel, message: String },
    /// Manager-signed private event: `signature` disambiguates which
    /// manager defined `code`.
    Private { signature: u32, code: u32, arg: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Verbose,
    Debug,
    Notice,
    Warning,
    Error,
}

impl LogLevel {
    #[must_use]
    pub fn to_tracing(self) -> Level {
        match self {
            LogLevel::Verbose => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Notice => Level::INFO,
            LogLevel::Warning => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

/// The result of handling one event: either this probe (or one further
/// down the chain) handled it, or it was unhandled and should keep
/// bubbling up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Handled,
    Unhandled,
}

/// A stacked event handler. Compose by wrapping: a decorator probe owns
/// `next: Option<Rc<dyn Probe>>` and calls `next.throw(...)` when it
/// chooses not to terminate dispatch.
pub trait Probe {
    fn handle(&self, pipe: PipeId, event: &Event) -> Outcome;
}

/// Walks `head` and every probe reachable through its `next` chain,
/// stopping at the first `Handled` result.
pub fn throw(head: &dyn Probe, pipe: PipeId, event: &Event) -> Outcome {
    head.handle(pipe, event)
}

/// Renders `Log` events to `tracing` at the matching level (§3's ambient
/// logging note); forwards every other event unhandled to `next`.
pub struct StdioLogProbe {
    pub next: Option<Rc<dyn Probe>>,
}

impl Probe for StdioLogProbe {
    fn handle(&self, pipe: PipeId, event: &Event) -> Outcome {
        if let Event::Log { level, message } = event {
            match level.to_tracing() {
                Level::TRACE => tracing::trace!(pipe = pipe.0, "{message}"),
                Level::DEBUG => tracing::debug!(pipe = pipe.0, "{message}"),
                Level::INFO => tracing::info!(pipe = pipe.0, "{message}"),
                Level::WARN => tracing::warn!(pipe = pipe.0, "{message}"),
                Level::ERROR => tracing::error!(pipe = pipe.0, "{message}"),
            }
            return Outcome::Handled;
        }
        match &self.next {
            Some(next) => next.handle(pipe, event),
            None => Outcome::Unhandled,
        }
    }
}

/// Drops `Log` events below `min_level`; forwards everything else (and any
/// log that passes the filter) to `next`.
pub struct LogLevelFilterProbe {
    pub min_level: LogLevel,
    pub next: Option<Rc<dyn Probe>>,
}

fn level_rank(level: LogLevel) -> u8 {
    match level {
        LogLevel::Verbose => 0,
        LogLevel::Debug => 1,
        LogLevel::Notice => 2,
        LogLevel::Warning => 3,
        LogLevel::Error => 4,
    }
}

impl Probe for LogLevelFilterProbe {
    fn handle(&self, pipe: PipeId, event: &Event) -> Outcome {
        if let Event::Log { level, .. } = event {
            if level_rank(*level) < level_rank(self.min_level) {
                return Outcome::Handled;
            }
        }
        match &self.next {
            Some(next) => next.handle(pipe, event),
            None => Outcome::Unhandled,
        }
    }
}

/// Rewrites `Log` events to prepend a stable label before forwarding.
pub struct PrefixProbe {
    pub prefix: String,
    pub next: Option<Rc<dyn Probe>>,
}

impl Probe for PrefixProbe {
    fn handle(&self, pipe: PipeId, event: &Event) -> Outcome {
        let rewritten;
        let event = if let Event::Log { level, message } = event {
            rewritten = Event::Log { level: *level, message: format!("[{}] {message}", self.prefix) };
            &rewritten
        } else {
            event
        };
        match &self.next {
            Some(next) => next.handle(pipe, event),
            None => Outcome::Unhandled,
        }
    }
}

/// A manager a pipe might request via `NEED_*_MGR`. Handed out as an
/// opaque, cheaply-cloneable token — the concrete manager type lives above
/// this crate's abstraction boundary in callers that know what they asked
/// for.
pub trait ProvidedManager {
    fn kind(&self) -> &'static str;
}

/// Answers `NEED_{UREF,UBUF,UCLOCK,UPUMP}_MGR` by handing a pre-built
/// manager to the pipe; anything else falls through to `next`.
pub struct ManagerProviderProbe {
    pub provide: Box<dyn Fn(&Event) -> bool>,
    pub next: Option<Rc<dyn Probe>>,
}

impl Probe for ManagerProviderProbe {
    fn handle(&self, pipe: PipeId, event: &Event) -> Outcome {
        let is_mgr_request = matches!(
            event,
            Event::NeedUpumpMgr | Event::NeedUrefMgr | Event::NeedUbufMgr | Event::NeedUclock
        );
        if is_mgr_request && (self.provide)(event) {
            return Outcome::Handled;
        }
        match &self.next {
            Some(next) => next.handle(pipe, event),
            None => Outcome::Unhandled,
        }
    }
}

/// Collects `SplitUpdate` events and re-emits `NewFlowDef` only for flows
/// matched by `filter` over `flow.id`; everything else forwards to `next`.
pub struct SourceSelectorProbe {
    pub filter: Box<dyn Fn(u64) -> bool>,
    pub matched: Mutex<Vec<u64>>,
    pub next: Option<Rc<dyn Probe>>,
}

impl Probe for SourceSelectorProbe {
    #[allow(clippy::unwrap_used)]
    fn handle(&self, pipe: PipeId, event: &Event) -> Outcome {
        if let Event::SplitUpdate { flow_id } = event {
            if (self.filter)(*flow_id) {
                self.matched.lock().unwrap().push(*flow_id);
                return Outcome::Handled;
            }
        }
        match &self.next {
            Some(next) => next.handle(pipe, event),
            None => Outcome::Unhandled,
        }
    }
}

/// Re-wraps every event into a message for the opposite side of a
/// transfer (§4.L); the concrete transport is supplied by the caller
/// (`pipegraph-engine`'s cross-thread queue) as a plain closure so this
/// crate stays independent of any particular event-loop or queue type.
pub struct TransferProbe {
    pub forward: Box<dyn Fn(PipeId, Event) + Send + Sync>,
}

impl Probe for TransferProbe {
    fn handle(&self, pipe: PipeId, event: &Event) -> Outcome {
        (self.forward)(pipe, event.clone());
        Outcome::Handled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    struct RecordingProbe {
        log: Rc<RefCell<Vec<&'static str>>>,
        result: Outcome,
        name: &'static str,
    }

    impl Probe for RecordingProbe {
        fn handle(&self, _pipe: PipeId, _event: &Event) -> Outcome {
            self.log.borrow_mut().push(self.name);
            self.result
        }
    }

    #[test]
    fn probe_ordering_terminates_on_first_handled() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let tail = Rc::new(RecordingProbe { log: Rc::clone(&log), result: Outcome::Unhandled, name: "tail" });
        let middle_log = Rc::clone(&log);
        struct Middle {
            log: Rc<RefCell<Vec<&'static str>>>,
            next: Rc<dyn Probe>,
        }
        impl Probe for Middle {
            fn handle(&self, pipe: PipeId, event: &Event) -> Outcome {
                self.log.borrow_mut().push("middle");
                self.next.handle(pipe, event)
            }
        }
        let middle = Rc::new(Middle { log: middle_log, next: tail });
        let head = RecordingProbe { log: Rc::clone(&log), result: Outcome::Handled, name: "head" };

        // head handles immediately; middle/tail never run because head
        // itself returns Handled without delegating.
        let outcome = throw(&head, PipeId(1), &Event::Ready);
        assert_eq!(outcome, Outcome::Handled);
        assert_eq!(*log.borrow(), vec!["head"]);

        log.borrow_mut().clear();
        let outcome = throw(middle.as_ref(), PipeId(1), &Event::Ready);
        assert_eq!(outcome, Outcome::Unhandled);
        assert_eq!(*log.borrow(), vec!["middle", "tail"]);
    }

    #[test]
    fn prefix_probe_rewrites_log_messages() {
        struct Capture(RefCell<Option<String>>);
        impl Probe for Capture {
            fn handle(&self, _pipe: PipeId, event: &Event) -> Outcome {
                if let Event::Log { message, .. } = event {
                    *self.0.borrow_mut() = Some(message.clone());
                }
                Outcome::Handled
            }
        }
        let capture = Rc::new(Capture(RefCell::new(None)));
        let prefix = PrefixProbe { prefix: "demux".to_string(), next: Some(capture.clone()) };
        throw(&prefix, PipeId(0), &Event::Log { level: LogLevel::Notice, message: "hello".to_string() });
        assert_eq!(capture.0.borrow().as_deref(), Some("[demux] hello"));
    }

    #[test]
    fn manager_provider_answers_need_events() {
        let probe = ManagerProviderProbe { provide: Box::new(|_| true), next: None };
        assert_eq!(throw(&probe, PipeId(0), &Event::NeedUrefMgr), Outcome::Handled);
        assert_eq!(throw(&probe, PipeId(0), &Event::Ready), Outcome::Unhandled);
    }
}
