//! Reference unit (component F, `uref`) — the token that flows through
//! pipes.
//!
//! Bundles an optional [`Ubuf`] payload with an optional [`Udict`]
//! attribute set, plus a handful of extremely hot fields embedded directly
//! (no udict lookup on the hot path): clock timestamps and a small flag
//! word.

use crate::ubuf::Ubuf;
use crate::udict::{AttrType, AttrValue, Udict};

bitflags::bitflags! {
    /// A handful of extremely hot flags, kept off the udict entirely.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct UrefFlags: u32 {
        const BLOCK_START = 1 << 0;
        const BLOCK_END   = 1 << 1;
        const KEY_FRAME   = 1 << 2;
        const DISCONTINUITY = 1 << 3;
    }
}

/// Directly-embedded clock fields (§3): program-clock-reference,
/// system/program/original presentation timestamp, decoding timestamp,
/// duration, drift rate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClockFields {
    pub pts_orig: Option<u64>,
    pub dts_orig: Option<u64>,
    pub pts_sys: Option<u64>,
    pub dts_sys: Option<u64>,
    pub cr: Option<u64>,
    pub duration: Option<u64>,
    pub rate: Option<u64>,
}

/// The reference-counted token flowing between pipes.
#[derive(Clone)]
pub struct Uref {
    pub ubuf: Option<Ubuf>,
    pub udict: Option<Udict>,
    pub flags: UrefFlags,
    pub clock: ClockFields,
}

impl Default for Uref {
    fn default() -> Self {
        Self::new()
    }
}

impl Uref {
    #[must_use]
    pub fn new() -> Self {
        Self { ubuf: None, udict: None, flags: UrefFlags::empty(), clock: ClockFields::default() }
    }

    #[must_use]
    pub fn with_ubuf(ubuf: Ubuf) -> Self {
        Self { ubuf: Some(ubuf), ..Self::new() }
    }

    /// Detaches the owned ubuf, transferring ownership to the caller.
    pub fn detach_ubuf(&mut self) -> Option<Ubuf> {
        self.ubuf.take()
    }

    /// Duplicates metadata (udict + clock fields + flags) and shares the
    /// ubuf, copy-on-write at first write — exactly the uref-level `dup`
    /// contract in §3.
    #[must_use]
    pub fn dup(&self) -> Self {
        Self {
            ubuf: self.ubuf.as_ref().map(Ubuf::dup),
            udict: self.udict.clone(),
            flags: self.flags,
            clock: self.clock,
        }
    }

    fn udict_or_insert(&mut self) -> &mut Udict {
        self.udict.get_or_insert_with(Udict::new)
    }

    /// Sets `flow.def` (§3's hierarchical MIME-like classification string).
    pub fn set_flow_def(&mut self, def: impl Into<String>) {
        self.udict_or_insert().set("flow.def", AttrValue::Str(def.into()));
    }

    #[must_use]
    pub fn flow_def(&self) -> Option<&str> {
        match self.udict.as_ref()?.get("flow.def", AttrType::Str) {
            Some(AttrValue::Str(s)) => Some(s.as_str()),
            _ => None,
        }
    }
}

/// `match_def(u, P)` — true iff the uref's `flow.def` begins with string
/// `P` (testable property #7). The trailing `.` terminator on published
/// prefixes is significant: `match_def` is a plain prefix test, so callers
/// are responsible for including it when they want a whole-level match.
#[must_use]
pub fn match_def(uref: &Uref, prefix: &str) -> bool {
    uref.flow_def().is_some_and(|def| def.starts_with(prefix))
}

/// Thin factory for [`Uref`]/[`Udict`] allocation. No pooling is needed —
/// allocation here is `Box`/`Arc`-backed and cheap — kept only so the
/// manager-provider probe pattern (§4.H) has something concrete to hand
/// out in response to `NEED_UREF_MGR`.
#[derive(Debug, Clone, Default)]
pub struct UrefMgr;

impl UrefMgr {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    #[must_use]
    pub fn alloc(&self) -> Uref {
        Uref::new()
    }

    #[must_use]
    pub fn alloc_with_ubuf(&self, ubuf: Ubuf) -> Uref {
        Uref::with_ubuf(ubuf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn match_def_is_a_prefix_test() {
        let mut u = Uref::new();
        u.set_flow_def("block.mpegts.");
        assert!(match_def(&u, "block."));
        assert!(match_def(&u, "block.mpegts."));
        assert!(!match_def(&u, "block.mpegtspsi."));
        assert!(!match_def(&u, "pic."));
    }

    #[test]
    fn dup_shares_ubuf_shares_udict_until_written() {
        let mut u = Uref::new();
        u.set_flow_def("block.");
        u.clock.pts_orig = Some(42);
        let d = u.dup();
        assert_eq!(d.flow_def(), Some("block."));
        assert_eq!(d.clock.pts_orig, Some(42));
    }

    #[test]
    fn detach_transfers_ownership() {
        use crate::ubuf::BlockBuf;
        let mut u = Uref::with_ubuf(Ubuf::Block(BlockBuf::from_bytes(&[1, 2, 3])));
        let ubuf = u.detach_ubuf();
        assert!(ubuf.is_some());
        assert!(u.ubuf.is_none());
    }
}
