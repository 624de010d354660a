//! The chain of unwind targets.
//!
//! Every region pushes a target. Only targets opened by `PushUnwind` carry a
//! handler; the others are popped while an error propagates, and their state
//! is discarded with the boundary block that encloses them.

use crate::render::BlockId;
use crate::tag::Tag;
use crate::update::{ListId, RegionKind};
use crate::{Error, Func};

/// The machine state to return to when an error is caught.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Depths {
    pub ra: isize,
    pub fp: isize,
    pub sp: usize,
    pub scopes: usize,
    pub cursors: usize,
    pub blocks: usize,
    pub updating: usize,
    pub lists: usize,
    pub calls: usize,
    /// Tracking frames, including the one opened for the target.
    pub frames: usize,
}

/// The error handler of a boundary and the means to retry it.
#[derive(Debug, Clone)]
pub(crate) struct Handler {
    pub func: Func,
    pub retry: Tag,
    pub retry_fn: Func,
}

#[derive(Debug)]
pub(crate) struct Target {
    pub kind: RegionKind,
    pub catch_pc: isize,
    pub depths: Depths,
    pub handler: Option<Handler>,
    /// The updatable tag of the region.
    pub tag: Tag,
    pub block: BlockId,
    pub children: ListId,
    pub error: Option<Error>,
}

#[derive(Debug, Default)]
pub(crate) struct UnwindTargets {
    targets: Vec<Target>,
}

impl UnwindTargets {
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn last(&self) -> Option<&Target> {
        self.targets.last()
    }

    pub fn child(&mut self, target: Target) {
        self.targets.push(target);
    }

    /// Records the error on the nearest target with a handler, dropping the
    /// targets above it, and returns it.
    pub fn catch(&mut self, error: Error) -> Option<&Target> {
        while self.targets.last()?.handler.is_none() {
            self.targets.pop();
        }
        let target = self.targets.last_mut()?;
        target.error = Some(error);
        Some(target)
    }

    pub fn finally(&mut self) -> Option<Target> {
        self.targets.pop()
    }

    /// Whether no target in the chain has a handler.
    pub fn unhandled(&self) -> bool {
        self.targets.iter().all(|t| t.handler.is_none())
    }
}
