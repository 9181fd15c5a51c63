//! Sub-pipes (component J, first half): a parent-owned child list.
//!
//! Children share the parent's refcount domain conceptually (they live as
//! long as the parent keeps them in its list) and find their parent
//! through an id, not a pointer — per the REDESIGN FLAGS note that id
//! indirection survives cross-thread transfer where a weak pointer would
//! not.

use crate::arena_list::{ArenaList, ListIdx};
use crate::upipe::PipeRef;
use crate::uprobe::PipeId;

/// A child's back-reference to its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParentHandle(pub PipeId);

/// The parent-owned list of children, keyed by [`ListIdx`] so a specific
/// child can be removed in O(1) once its slot is known.
#[derive(Default)]
pub struct SubPipeList {
    children: ArenaList<PipeRef>,
}

impl SubPipeList {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, child: PipeRef) -> ListIdx {
        self.children.add(child)
    }

    pub fn remove(&mut self, idx: ListIdx) -> PipeRef {
        self.children.remove(idx)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.children.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Iterates children for broadcast operations (e.g. releasing every
    /// demux output when the parent dies).
    pub fn iter(&self) -> impl Iterator<Item = &PipeRef> {
        self.children.iter()
    }

    pub fn find_by_id(&self, id: PipeId) -> Option<&PipeRef> {
        self.children.iter().find(|p| p.id() == id)
    }
}
