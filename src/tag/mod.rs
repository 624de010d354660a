//! Revisions, tags and dependency tracking.
//!
//! Every piece of reactive state owns a [`Tag`]. A tag reports the highest
//! [`Revision`] at which the state behind it last changed. Computations
//! record the tags they read by running inside a tracking frame, the frame
//! combines them into one tag, and a later comparison against the revision
//! at which the computation ran tells whether it is stale.
//!
//! All of this state lives in a [`Runtime`], which is created per render root
//! and shared between the VM, references, cells and host code.
//!
//! Tags are slots in an arena. A tag is valid for as long as the state that
//! owns it: dropping a [`Cache`] or a [`Cell`] releases its tag, and released
//! slots are reused once no tracking frame is active. A stale handle to a
//! reused slot can only report a change that did not happen, never miss one.

mod cache;
mod cell;

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

pub use crate::tag::cache::Cache;
pub use crate::tag::cell::Cell;

/// A value of the revision clock.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Revision(u64);

impl Revision {
    /// The revision of state that never changes.
    pub const CONSTANT: Revision = Revision(0);

    /// The smallest real revision.
    pub const INITIAL: Revision = Revision(1);

    /// Returns the raw clock value.
    pub fn get(self) -> u64 {
        self.0
    }
}

/// A handle to a node in the tag graph of a [`Runtime`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tag(u32);

impl Tag {
    /// The tag of state that never changes.
    pub const CONSTANT: Tag = Tag(0);

    fn index(self) -> usize {
        self.0 as usize
    }
}

/// The revision clock, the tag graph and the tracking frame stack.
///
/// Cloning a runtime is cheap and yields a handle to the same state.
#[derive(Clone)]
pub struct Runtime(Rc<Inner>);

struct Inner {
    now: std::cell::Cell<u64>,
    nodes: RefCell<Vec<Node>>,
    /// Released slots that can be allocated again.
    free: RefCell<Vec<u32>>,
    /// Released while a frame was active, a frame may still list them.
    pending: RefCell<Vec<u32>>,
    /// `None` marks a frame in which consumption is suspended.
    frames: RefCell<Vec<Option<Vec<Tag>>>>,
}

struct Node {
    kind: Kind,
    revision: Revision,
    memo: Memo,
}

enum Kind {
    Constant,
    Dirtyable,
    Updatable {
        subtag: Tag,
        buffer: Revision,
        /// A combinator rewritten in place by `update_with`.
        owned: Option<Tag>,
    },
    Combinator(Rc<[Tag]>),
    /// Released, reports the revision it had when it was released.
    Free,
}

#[derive(Default, Clone, Copy)]
struct Memo {
    last_checked: Revision,
    last_value: Revision,
    computing: bool,
}

enum Deps {
    Updatable {
        own: Revision,
        subtag: Tag,
        buffer: Revision,
    },
    Combinator(Rc<[Tag]>),
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    /// Creates a runtime with the clock at [`Revision::INITIAL`].
    pub fn new() -> Self {
        let constant = Node {
            kind: Kind::Constant,
            revision: Revision::CONSTANT,
            memo: Memo::default(),
        };
        Self(Rc::new(Inner {
            now: std::cell::Cell::new(Revision::INITIAL.0),
            nodes: RefCell::new(vec![constant]),
            free: RefCell::new(Vec::new()),
            pending: RefCell::new(Vec::new()),
            frames: RefCell::new(Vec::new()),
        }))
    }

    /// Returns the current revision.
    pub fn now(&self) -> Revision {
        Revision(self.0.now.get())
    }

    /// Advances the clock by one and returns the new revision.
    pub fn bump(&self) -> Revision {
        let next = self.0.now.get() + 1;
        self.0.now.set(next);
        Revision(next)
    }

    /// Allocates a tag that is changed explicitly with [`dirty`][Self::dirty].
    pub fn dirtyable(&self) -> Tag {
        self.alloc(Kind::Dirtyable)
    }

    /// Allocates a tag whose dependency can be swapped with
    /// [`update`][Self::update].
    pub fn updatable(&self) -> Tag {
        self.alloc(Kind::Updatable {
            subtag: Tag::CONSTANT,
            buffer: Revision::CONSTANT,
            owned: None,
        })
    }

    fn alloc(&self, kind: Kind) -> Tag {
        let node = Node {
            kind,
            revision: self.now(),
            memo: Memo::default(),
        };
        let mut nodes = self.0.nodes.borrow_mut();
        match self.0.free.borrow_mut().pop() {
            Some(i) => {
                nodes[i as usize] = node;
                Tag(i)
            }
            None => {
                nodes.push(node);
                Tag(nodes.len() as u32 - 1)
            }
        }
    }

    /// Releases the tag so its slot can be reused. An updatable tag releases
    /// the combinator it owns along with it.
    pub(crate) fn release(&self, tag: Tag) {
        if tag == Tag::CONSTANT {
            return;
        }
        let revision = self.value(tag);
        let owned = {
            let Ok(mut nodes) = self.0.nodes.try_borrow_mut() else {
                return;
            };
            let node = &mut nodes[tag.index()];
            let owned = match node.kind {
                Kind::Free => return,
                Kind::Updatable { owned, .. } => owned,
                _ => None,
            };
            node.kind = Kind::Free;
            node.revision = revision;
            node.memo = Memo::default();
            owned
        };
        if self.0.frames.borrow().is_empty() {
            self.0.free.borrow_mut().push(tag.0);
        } else {
            self.0.pending.borrow_mut().push(tag.0);
        }
        if let Some(owned) = owned {
            self.release(owned);
        }
    }

    /// Makes pending slots allocatable once every frame is gone.
    fn settle(&self) {
        if self.0.frames.borrow().is_empty() {
            let mut pending = self.0.pending.borrow_mut();
            self.0.free.borrow_mut().append(&mut pending);
        }
    }

    /// Returns the number of tags that have not been released.
    pub fn live_tags(&self) -> usize {
        self.0.nodes.borrow().len() - self.0.free.borrow().len() - self.0.pending.borrow().len()
    }

    /// Marks the tag as changed at a new revision.
    ///
    /// # Panics
    ///
    /// In debug builds, if the tag was consumed by a tracking frame that is
    /// still active.
    pub fn dirty(&self, tag: Tag) {
        #[cfg(debug_assertions)]
        {
            let frames = self.0.frames.borrow();
            if frames.iter().flatten().any(|f| f.contains(&tag)) {
                panic!("cannot dirty a tag that was consumed by an active tracking frame");
            }
        }
        let revision = self.bump();
        let mut nodes = self.0.nodes.borrow_mut();
        let node = &mut nodes[tag.index()];
        match node.kind {
            Kind::Dirtyable | Kind::Updatable { .. } => node.revision = revision,
            Kind::Constant | Kind::Combinator(_) => {
                debug_assert!(false, "only dirtyable and updatable tags can be dirtied")
            }
            Kind::Free => {}
        }
    }

    /// Points an updatable tag at a new subtag.
    ///
    /// The swap itself does not change the reported value, so computations
    /// that already consumed the tag stay valid until the new subtag
    /// changes.
    pub fn update(&self, tag: Tag, subtag: Tag) {
        let current = self.value(tag);
        let buffer = self.value(subtag);
        let mut nodes = self.0.nodes.borrow_mut();
        let node = &mut nodes[tag.index()];
        match &mut node.kind {
            Kind::Updatable {
                subtag: s,
                buffer: b,
                ..
            } => {
                *s = subtag;
                *b = buffer;
                node.revision = node.revision.max(current);
                node.memo.last_checked = Revision::CONSTANT;
            }
            _ => debug_assert!(false, "only updatable tags can be updated"),
        }
    }

    /// Combines tags into one whose value is the maximum of theirs.
    pub fn combine(&self, tags: &[Tag]) -> Tag {
        let tags = normalize(tags);
        match tags.as_slice() {
            [] => Tag::CONSTANT,
            [tag] => *tag,
            _ => self.alloc(Kind::Combinator(tags.into())),
        }
    }

    /// Points an updatable tag at the combination of the tags and returns
    /// the subtag it now follows.
    ///
    /// Unlike [`combine`][Self::combine] followed by
    /// [`update`][Self::update] this allocates at most one combinator over
    /// the lifetime of the updatable tag and rewrites it on later calls.
    pub(crate) fn update_with(&self, tag: Tag, tags: &[Tag]) -> Tag {
        let tags = normalize(tags);
        let subtag = match tags.as_slice() {
            [] => Tag::CONSTANT,
            [single] => *single,
            _ => {
                // The value before the rewrite, which the swap must not lose.
                let current = self.value(tag);
                let owned = match &self.0.nodes.borrow()[tag.index()].kind {
                    Kind::Updatable { owned, .. } => *owned,
                    _ => None,
                };
                let combinator = match owned {
                    Some(owned) => {
                        let mut nodes = self.0.nodes.borrow_mut();
                        let node = &mut nodes[owned.index()];
                        node.kind = Kind::Combinator(tags.into());
                        node.memo = Memo::default();
                        owned
                    }
                    None => {
                        let owned = self.alloc(Kind::Combinator(tags.into()));
                        if let Kind::Updatable { owned: o, .. } =
                            &mut self.0.nodes.borrow_mut()[tag.index()].kind
                        {
                            *o = Some(owned);
                        }
                        owned
                    }
                };
                let mut nodes = self.0.nodes.borrow_mut();
                let node = &mut nodes[tag.index()];
                node.revision = node.revision.max(current);
                drop(nodes);
                combinator
            }
        };
        self.update(tag, subtag);
        subtag
    }

    /// Returns the revision at which the tag last changed.
    pub fn value(&self, tag: Tag) -> Revision {
        let mut open = Vec::new();
        self.compute(tag, &mut open)
    }

    /// Whether the tag is unchanged since the snapshot revision.
    pub fn validate(&self, tag: Tag, snapshot: Revision) -> bool {
        self.value(tag) <= snapshot
    }

    // `open` holds the nodes that were found mid-computation during this
    // pass. Nothing caches its value while one of them is unfinished.
    fn compute(&self, tag: Tag, open: &mut Vec<Tag>) -> Revision {
        let now = self.now();
        let deps = {
            let mut nodes = self.0.nodes.borrow_mut();
            let node = &mut nodes[tag.index()];
            let deps = match &node.kind {
                Kind::Constant => return Revision::CONSTANT,
                Kind::Dirtyable => return node.revision,
                Kind::Free => return node.revision,
                Kind::Updatable { subtag, buffer, .. } => Deps::Updatable {
                    own: node.revision,
                    subtag: *subtag,
                    buffer: *buffer,
                },
                Kind::Combinator(children) => Deps::Combinator(children.clone()),
            };
            if node.memo.last_checked == now {
                return node.memo.last_value;
            }
            if node.memo.computing {
                if !open.contains(&tag) {
                    open.push(tag);
                }
                return node.memo.last_value;
            }
            node.memo.computing = true;
            deps
        };

        let value = match deps {
            Deps::Updatable {
                own,
                subtag,
                buffer,
            } => {
                let sub = self.compute(subtag, open);
                if sub == buffer {
                    own
                } else {
                    own.max(sub)
                }
            }
            Deps::Combinator(children) => children
                .iter()
                .map(|child| self.compute(*child, open))
                .max()
                .unwrap_or(Revision::CONSTANT),
        };

        let mut nodes = self.0.nodes.borrow_mut();
        let memo = &mut nodes[tag.index()].memo;
        memo.computing = false;
        let value = value.max(memo.last_value);
        memo.last_value = value;
        open.retain(|t| *t != tag);
        if open.is_empty() {
            memo.last_checked = now;
        }
        value
    }

    /// Pushes a tracking frame.
    pub fn begin_track(&self) {
        self.0.frames.borrow_mut().push(Some(Vec::new()));
    }

    /// Records the tag in the innermost frame, if any.
    pub fn consume(&self, tag: Tag) {
        if tag == Tag::CONSTANT {
            return;
        }
        if let Some(Some(frame)) = self.0.frames.borrow_mut().last_mut() {
            frame.push(tag);
        }
    }

    /// Pops the innermost frame and returns the combination of everything
    /// it consumed. The result is consumed by the enclosing frame.
    pub fn end_track(&self) -> Tag {
        let tag = self.pop_frame();
        self.consume(tag);
        tag
    }

    /// Pops the innermost frame without consuming the result.
    fn pop_frame(&self) -> Tag {
        let tags = self.take_frame();
        self.combine(&tags)
    }

    /// Pops the innermost frame and returns the tags it consumed.
    pub(crate) fn take_frame(&self) -> Vec<Tag> {
        let frame = self.0.frames.borrow_mut().pop();
        self.settle();
        match frame {
            Some(Some(tags)) => tags,
            Some(None) | None => {
                debug_assert!(false, "tracking frame stack is unbalanced");
                Vec::new()
            }
        }
    }

    /// Runs the function in a new frame and returns its result together with
    /// the combined tag of everything it read.
    pub fn track<F, R>(&self, f: F) -> (R, Tag)
    where
        F: FnOnce() -> R,
    {
        self.begin_track();
        let r = f();
        (r, self.end_track())
    }

    /// Runs the function without recording anything it reads.
    pub fn untrack<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        self.0.frames.borrow_mut().push(None);
        let r = f();
        self.0.frames.borrow_mut().pop();
        self.settle();
        r
    }

    /// Whether reads are currently being recorded.
    pub fn is_tracking(&self) -> bool {
        matches!(self.0.frames.borrow().last(), Some(Some(_)))
    }

    pub(crate) fn frame_depth(&self) -> usize {
        self.0.frames.borrow().len()
    }

    pub(crate) fn reset_frames(&self, depth: usize) {
        self.0.frames.borrow_mut().truncate(depth);
        self.settle();
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("now", &self.now())
            .field("tags", &self.live_tags())
            .field("frames", &self.frame_depth())
            .finish()
    }
}

fn normalize(tags: &[Tag]) -> Vec<Tag> {
    let mut tags: Vec<Tag> = tags
        .iter()
        .copied()
        .filter(|t| *t != Tag::CONSTANT)
        .collect();
    tags.sort_unstable();
    tags.dedup();
    tags
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_through_updatable_terminates() {
        let rt = Runtime::new();
        let a = rt.dirtyable();
        let u = rt.updatable();
        let c = rt.combine(&[a, u]);
        rt.update(u, c);
        assert_eq!(rt.value(u), Revision::INITIAL);

        rt.dirty(a);
        let now = rt.now();
        assert_eq!(rt.value(c), now);
        assert_eq!(rt.value(u), now);
    }

    #[test]
    fn cycle_participants_do_not_cache_early() {
        let rt = Runtime::new();
        let a = rt.dirtyable();
        let b = rt.dirtyable();
        let u = rt.updatable();
        let inner = rt.combine(&[a, u]);
        let outer = rt.combine(&[inner, b]);
        rt.update(u, outer);

        rt.dirty(b);
        let now = rt.now();
        // `u` reaches `outer` mid-computation, so `inner` must not cache the
        // stale value it saw.
        assert_eq!(rt.value(outer), now);
        assert_eq!(rt.value(inner), now);
    }

    #[test]
    fn update_with_reuses_its_combinator() {
        let rt = Runtime::new();
        let (a, b, c) = (rt.dirtyable(), rt.dirtyable(), rt.dirtyable());
        let u = rt.updatable();
        let first = rt.update_with(u, &[a, b]);
        let live = rt.live_tags();

        let second = rt.update_with(u, &[b, c]);
        assert_eq!(first, second);
        assert_eq!(rt.live_tags(), live);

        let snapshot = rt.value(u);
        rt.dirty(a);
        assert!(rt.validate(u, snapshot));
        rt.dirty(c);
        assert!(!rt.validate(u, snapshot));
    }

    #[test]
    fn update_with_keeps_the_value() {
        let rt = Runtime::new();
        let (a, b) = (rt.dirtyable(), rt.dirtyable());
        let u = rt.updatable();
        rt.update_with(u, &[a, b]);
        rt.dirty(a);
        let before = rt.value(u);
        let c = rt.dirtyable();
        let d = rt.dirtyable();
        rt.update_with(u, &[c, d]);
        assert!(rt.value(u) >= before);
    }

    #[test]
    fn released_slots_are_reused_outside_frames() {
        let rt = Runtime::new();
        let a = rt.dirtyable();
        let live = rt.live_tags();
        rt.release(a);
        assert_eq!(rt.live_tags(), live - 1);
        assert_eq!(rt.dirtyable(), a);

        rt.begin_track();
        rt.release(a);
        assert_ne!(rt.dirtyable(), a);
        rt.take_frame();
        assert_eq!(rt.dirtyable(), a);
    }

    #[test]
    fn released_tag_reports_its_last_revision() {
        let rt = Runtime::new();
        let a = rt.dirtyable();
        rt.dirty(a);
        let revision = rt.value(a);
        let c = rt.combine(&[a, rt.dirtyable()]);
        rt.release(a);
        rt.bump();
        assert_eq!(rt.value(a), revision);
        assert!(rt.value(c) >= revision);
    }

    #[test]
    fn releasing_an_updatable_releases_its_combinator() {
        let rt = Runtime::new();
        let (a, b) = (rt.dirtyable(), rt.dirtyable());
        let live = rt.live_tags();
        let u = rt.updatable();
        rt.update_with(u, &[a, b]);
        assert_eq!(rt.live_tags(), live + 2);
        rt.release(u);
        assert_eq!(rt.live_tags(), live);
    }
}
