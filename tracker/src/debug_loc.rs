//! Debug locations as the optimizer sees them
//!
//! An instruction's location names the function whose body it sits in and
//! the line location inside that body. When that function was inlined, the
//! location also records where: `inlined_at` is the call site in the caller,
//! itself possibly inlined further out.

use parser::{FunctionId, LineLocation};
use smallvec::SmallVec;

/// (call site in the caller, function) pairs, outermost function first. The
/// outermost entry's call site is always zero.
pub type ContextStack = SmallVec<[(LineLocation, FunctionId); 10]>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugLoc {
    pub scope: FunctionId,
    pub location: LineLocation,
    pub inlined_at: Option<Box<DebugLoc>>,
}

impl DebugLoc {
    pub fn new(scope: impl Into<FunctionId>, location: LineLocation) -> Self {
        Self {
            scope: scope.into(),
            location,
            inlined_at: None,
        }
    }

    /// Location of this body inlined into a caller at `call_site`
    pub fn inlined_at(mut self, call_site: DebugLoc) -> Self {
        self.inlined_at = Some(Box::new(call_site));
        self
    }

    /// The function the code was originally written in before any inlining
    pub fn outermost_scope(&self) -> &FunctionId {
        let mut current = self;
        while let Some(outer) = current.inlined_at.as_deref() {
            current = outer;
        }
        &current.scope
    }

    /// Trie path of the function this location belongs to.
    pub fn context_stack(&self) -> ContextStack {
        let mut stack = ContextStack::new();
        let mut inner = self;
        let mut outer = self.inlined_at.as_deref();
        while let Some(call_site) = outer {
            stack.push((call_site.location, inner.scope.clone()));
            inner = call_site;
            outer = call_site.inlined_at.as_deref();
        }
        stack.push((LineLocation::zero(), inner.scope.clone()));
        stack.reverse();
        stack
    }
}

/// A call the optimizer is deciding about
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallInstruction {
    pub debug_loc: Option<DebugLoc>,
}

impl CallInstruction {
    pub fn new(debug_loc: DebugLoc) -> Self {
        Self {
            debug_loc: Some(debug_loc),
        }
    }

    /// A call without location info; no context can be resolved for it
    pub fn without_location() -> Self {
        Self { debug_loc: None }
    }
}
