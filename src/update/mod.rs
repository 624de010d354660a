//! Updating opcodes, recorded during the initial render and replayed on
//! rerender.
//!
//! Opcodes live in an arena and are threaded into lists through `prev` and
//! `next` indices. Opcodes that own a region (`Try`, `Boundary`, list blocks
//! and list items) own a child list of their own, so the lists form a tree
//! that mirrors the block tree.

mod list;
mod vm;

use std::any::Any;
use std::fmt;
use std::rc::Rc;

pub(crate) use crate::update::list::{item_keys, iterate};
pub(crate) use crate::update::vm::UpdatingVm;

use crate::dom::NodeId;
use crate::env::Manager;
use crate::render::{BlockId, ResumableState};
use crate::tag::{Cell, Revision, Runtime, Tag};
use crate::{Func, Reference};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct OpId(u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct ListId(u32);

#[cfg(test)]
impl ListId {
    pub fn dangling() -> Self {
        ListId(u32::MAX)
    }
}

/// What a resumed region does when it halts and how errors unwind out of
/// it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RegionKind {
    /// The whole template. Closed by the driver rather than by `Exit`.
    Root,
    /// A region opened by `Enter`.
    Try,
    /// One item of a list, opened by `Iterate`.
    Item,
    /// A keyed list opened by `EnterList`. Never resumed as a whole, new
    /// items are rendered one at a time.
    List,
    /// A recoverable region opened by `PushUnwind`.
    Boundary,
}

pub(crate) enum UpdatingOp {
    Text(TextOp),
    Attribute(AttributeOp),
    Assert(AssertOp),
    Try(TryOp),
    Boundary(BoundaryOp),
    ListBlock(ListBlockOp),
    ListItem(ListItemOp),
    UpdateModifier(ManagerOp),
    UpdateComponent(ManagerOp),
}

/// Rewrites a text node when its formatted value changes.
pub(crate) struct TextOp {
    pub node: NodeId,
    pub reference: Reference,
    pub last: String,
    pub tag: Tag,
    pub snapshot: Revision,
}

/// Sets or removes an attribute when its formatted value changes.
pub(crate) struct AttributeOp {
    pub element: NodeId,
    pub name: String,
    pub reference: Reference,
    pub last: Option<String>,
    pub tag: Tag,
    pub snapshot: Revision,
}

/// Requests a reset of the enclosing region when a branch condition flips.
pub(crate) struct AssertOp {
    pub reference: Reference,
    pub last: bool,
    pub tag: Tag,
    pub snapshot: Revision,
}

/// A region that can be cleared and rendered again from its start.
///
/// The tag is updatable and points at the combination of everything the
/// region read, so an untouched region is skipped with one comparison.
pub(crate) struct TryOp {
    pub kind: RegionKind,
    pub state: ResumableState,
    pub block: BlockId,
    pub children: ListId,
    pub tag: Tag,
    pub snapshot: Revision,
}

pub(crate) struct BoundaryOp {
    pub region: TryOp,
    pub handler: Func,
    pub retry: Tag,
    pub retry_fn: Func,
    /// The address of the matching `PopUnwind`.
    pub catch_pc: isize,
}

pub(crate) struct ListBlockOp {
    /// Resumes at the item body, used to render inserted items.
    pub state: ResumableState,
    pub block: BlockId,
    pub items: ListId,
    pub key: String,
    pub iterable: Reference,
    pub iterated: Revision,
    pub tag: Tag,
    pub snapshot: Revision,
}

pub(crate) struct ListItemOp {
    pub key: String,
    pub value: Cell,
    pub index: Cell,
    pub region: TryOp,
}

/// Schedules a manager `update` when the tag of a modifier or component
/// changes.
pub(crate) struct ManagerOp {
    pub manager: Rc<dyn Manager>,
    pub state: Rc<dyn Any>,
    pub tag: Tag,
    pub snapshot: Revision,
}

impl UpdatingOp {
    pub fn name(&self) -> &'static str {
        match self {
            UpdatingOp::Text(_) => "Text",
            UpdatingOp::Attribute(_) => "Attribute",
            UpdatingOp::Assert(_) => "Assert",
            UpdatingOp::Try(_) => "Try",
            UpdatingOp::Boundary(_) => "Boundary",
            UpdatingOp::ListBlock(_) => "ListBlock",
            UpdatingOp::ListItem(_) => "ListItem",
            UpdatingOp::UpdateModifier(_) => "UpdateModifier",
            UpdatingOp::UpdateComponent(_) => "UpdateComponent",
        }
    }

    pub fn tag(&self) -> Tag {
        match self {
            UpdatingOp::Text(op) => op.tag,
            UpdatingOp::Attribute(op) => op.tag,
            UpdatingOp::Assert(op) => op.tag,
            UpdatingOp::Try(op) => op.tag,
            UpdatingOp::Boundary(op) => op.region.tag,
            UpdatingOp::ListBlock(op) => op.tag,
            UpdatingOp::ListItem(op) => op.region.tag,
            UpdatingOp::UpdateModifier(op) | UpdatingOp::UpdateComponent(op) => op.tag,
        }
    }

    pub fn snapshot(&self) -> Revision {
        match self {
            UpdatingOp::Text(op) => op.snapshot,
            UpdatingOp::Attribute(op) => op.snapshot,
            UpdatingOp::Assert(op) => op.snapshot,
            UpdatingOp::Try(op) => op.snapshot,
            UpdatingOp::Boundary(op) => op.region.snapshot,
            UpdatingOp::ListBlock(op) => op.snapshot,
            UpdatingOp::ListItem(op) => op.region.snapshot,
            UpdatingOp::UpdateModifier(op) | UpdatingOp::UpdateComponent(op) => op.snapshot,
        }
    }

    pub fn set_snapshot(&mut self, snapshot: Revision) {
        match self {
            UpdatingOp::Text(op) => op.snapshot = snapshot,
            UpdatingOp::Attribute(op) => op.snapshot = snapshot,
            UpdatingOp::Assert(op) => op.snapshot = snapshot,
            UpdatingOp::Try(op) => op.snapshot = snapshot,
            UpdatingOp::Boundary(op) => op.region.snapshot = snapshot,
            UpdatingOp::ListBlock(op) => op.snapshot = snapshot,
            UpdatingOp::ListItem(op) => op.region.snapshot = snapshot,
            UpdatingOp::UpdateModifier(op) | UpdatingOp::UpdateComponent(op) => {
                op.snapshot = snapshot
            }
        }
    }

    /// The region tags allocated for this opcode. Other tags belong to the
    /// references and managers the opcode holds.
    fn owned_tag(&self) -> Option<Tag> {
        match self {
            UpdatingOp::Try(op) => Some(op.tag),
            UpdatingOp::Boundary(op) => Some(op.region.tag),
            UpdatingOp::ListBlock(op) => Some(op.tag),
            UpdatingOp::ListItem(op) => Some(op.region.tag),
            _ => None,
        }
    }

    /// The child list owned by this opcode, if any.
    fn owned_list(&self) -> Option<ListId> {
        match self {
            UpdatingOp::Try(op) => Some(op.children),
            UpdatingOp::Boundary(op) => Some(op.region.children),
            UpdatingOp::ListBlock(op) => Some(op.items),
            UpdatingOp::ListItem(op) => Some(op.region.children),
            _ => None,
        }
    }
}

impl fmt::Debug for UpdatingOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(self.name())
            .field("tag", &self.tag())
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

struct Slot {
    op: Option<UpdatingOp>,
    list: ListId,
    prev: Option<OpId>,
    next: Option<OpId>,
}

#[derive(Debug, Default, Clone, Copy)]
struct Ends {
    head: Option<OpId>,
    tail: Option<OpId>,
}

/// The arena of updating opcodes and the lists threading them.
pub(crate) struct Updates {
    rt: Runtime,
    slots: Vec<Option<Slot>>,
    free: Vec<u32>,
    lists: Vec<Option<Ends>>,
    free_lists: Vec<u32>,
}

impl Updates {
    pub fn new(rt: &Runtime) -> Self {
        Self {
            rt: rt.clone(),
            slots: Vec::new(),
            free: Vec::new(),
            lists: Vec::new(),
            free_lists: Vec::new(),
        }
    }

    /// The number of live opcodes.
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn new_list(&mut self) -> ListId {
        match self.free_lists.pop() {
            Some(i) => {
                self.lists[i as usize] = Some(Ends::default());
                ListId(i)
            }
            None => {
                self.lists.push(Some(Ends::default()));
                ListId(self.lists.len() as u32 - 1)
            }
        }
    }

    /// Appends an opcode to the end of the list.
    pub fn append(&mut self, list: ListId, op: UpdatingOp) -> OpId {
        let slot = Slot {
            op: Some(op),
            list,
            prev: None,
            next: None,
        };
        let id = match self.free.pop() {
            Some(i) => {
                self.slots[i as usize] = Some(slot);
                OpId(i)
            }
            None => {
                self.slots.push(Some(slot));
                OpId(self.slots.len() as u32 - 1)
            }
        };
        self.link_at_end(list, id);
        id
    }

    pub fn head(&self, list: ListId) -> Option<OpId> {
        self.ends(list).head
    }

    pub fn next(&self, id: OpId) -> Option<OpId> {
        self.slot(id).next
    }

    /// Returns the opcodes of the list in order.
    pub fn ids(&self, list: ListId) -> Vec<OpId> {
        let mut ids = Vec::new();
        let mut cursor = self.head(list);
        while let Some(id) = cursor {
            ids.push(id);
            cursor = self.next(id);
        }
        ids
    }

    pub fn get(&self, id: OpId) -> Option<&UpdatingOp> {
        self.slot(id).op.as_ref()
    }

    /// Takes the opcode out of its slot while it is being evaluated. The
    /// slot keeps its position in the list.
    pub fn take(&mut self, id: OpId) -> Option<UpdatingOp> {
        self.slot_mut(id).op.take()
    }

    pub fn put(&mut self, id: OpId, op: UpdatingOp) {
        self.slot_mut(id).op = Some(op);
    }

    /// Moves the opcode to the end of its list.
    pub fn move_to_end(&mut self, id: OpId) {
        let list = self.slot(id).list;
        self.unlink(id);
        self.link_at_end(list, id);
    }

    /// Unlinks and frees the opcode together with the lists and tags it
    /// owns.
    pub fn remove(&mut self, id: OpId) {
        self.unlink(id);
        if let Some(slot) = self.slots[id.0 as usize].take() {
            self.free.push(id.0);
            if let Some(list) = slot.op.as_ref().and_then(UpdatingOp::owned_list) {
                self.clear_list(list);
                self.lists[list.0 as usize] = None;
                self.free_lists.push(list.0);
            }
            if let Some(tag) = slot.op.as_ref().and_then(UpdatingOp::owned_tag) {
                self.rt.release(tag);
            }
        }
    }

    /// Removes every opcode of the list, keeping the list itself.
    pub fn clear_list(&mut self, list: ListId) {
        while let Some(id) = self.head(list) {
            self.remove(id);
        }
    }

    fn link_at_end(&mut self, list: ListId, id: OpId) {
        let tail = self.ends(list).tail;
        {
            let slot = self.slot_mut(id);
            slot.list = list;
            slot.prev = tail;
            slot.next = None;
        }
        match tail {
            Some(tail) => self.slot_mut(tail).next = Some(id),
            None => self.ends_mut(list).head = Some(id),
        }
        self.ends_mut(list).tail = Some(id);
    }

    fn unlink(&mut self, id: OpId) {
        let (list, prev, next) = {
            let slot = self.slot(id);
            (slot.list, slot.prev, slot.next)
        };
        match prev {
            Some(prev) => self.slot_mut(prev).next = next,
            None => self.ends_mut(list).head = next,
        }
        match next {
            Some(next) => self.slot_mut(next).prev = prev,
            None => self.ends_mut(list).tail = prev,
        }
        let slot = self.slot_mut(id);
        slot.prev = None;
        slot.next = None;
    }

    fn ends(&self, list: ListId) -> Ends {
        self.lists
            .get(list.0 as usize)
            .copied()
            .flatten()
            .unwrap_or_default()
    }

    fn ends_mut(&mut self, list: ListId) -> &mut Ends {
        match self.lists.get_mut(list.0 as usize).and_then(Option::as_mut) {
            Some(ends) => ends,
            None => panic!("updating list {} was already freed", list.0),
        }
    }

    fn slot(&self, id: OpId) -> &Slot {
        match self.slots.get(id.0 as usize).and_then(Option::as_ref) {
            Some(slot) => slot,
            None => panic!("updating opcode {} was already freed", id.0),
        }
    }

    fn slot_mut(&mut self, id: OpId) -> &mut Slot {
        match self.slots.get_mut(id.0 as usize).and_then(Option::as_mut) {
            Some(slot) => slot,
            None => panic!("updating opcode {} was already freed", id.0),
        }
    }
}

impl Drop for Updates {
    fn drop(&mut self) {
        let ops = self.slots.iter().flatten().filter_map(|slot| slot.op.as_ref());
        for tag in ops.filter_map(UpdatingOp::owned_tag) {
            self.rt.release(tag);
        }
    }
}

impl fmt::Debug for Updates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Updates").field("ops", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tag::Runtime;

    fn assert_op(rt: &Runtime) -> UpdatingOp {
        UpdatingOp::Assert(AssertOp {
            reference: Reference::constant(true),
            last: true,
            tag: rt.dirtyable(),
            snapshot: rt.now(),
        })
    }

    #[test]
    fn append_remove_and_reorder() {
        let rt = Runtime::new();
        let mut updates = Updates::new(&rt);
        let list = updates.new_list();
        let a = updates.append(list, assert_op(&rt));
        let b = updates.append(list, assert_op(&rt));
        let c = updates.append(list, assert_op(&rt));

        updates.move_to_end(a);
        assert_eq!(updates.ids(list), [b, c, a]);
        updates.remove(c);
        assert_eq!(updates.ids(list), [b, a]);
        let d = updates.append(list, assert_op(&rt));
        assert_eq!(d, c);
        assert_eq!(updates.ids(list), [b, a, d]);
    }

    #[test]
    fn take_keeps_position() {
        let rt = Runtime::new();
        let mut updates = Updates::new(&rt);
        let list = updates.new_list();
        let a = updates.append(list, assert_op(&rt));
        let b = updates.append(list, assert_op(&rt));
        let op = updates.take(a).unwrap();
        assert!(updates.get(a).is_none());
        assert_eq!(updates.next(a), Some(b));
        updates.put(a, op);
        assert_eq!(updates.get(a).map(UpdatingOp::name), Some("Assert"));
    }

    #[test]
    fn clear_list_is_recursive() {
        let rt = Runtime::new();
        let mut updates = Updates::new(&rt);
        let outer = updates.new_list();
        let inner = updates.new_list();
        updates.append(inner, assert_op(&rt));
        updates.append(inner, assert_op(&rt));
        updates.append(
            outer,
            UpdatingOp::ListBlock(ListBlockOp {
                state: ResumableState {
                    pc: 0,
                    scope: Default::default(),
                    stack: Vec::new(),
                },
                block: crate::render::BlockId::dangling(),
                items: inner,
                key: String::from("@index"),
                iterable: Reference::constant(()),
                iterated: rt.now(),
                tag: rt.updatable(),
                snapshot: rt.now(),
            }),
        );
        assert_eq!(updates.len(), 3);
        let live = rt.live_tags();
        updates.clear_list(outer);
        assert_eq!(updates.len(), 0);
        assert!(updates.head(outer).is_none());
        // Only the list block's region tag is owned by the arena.
        assert_eq!(rt.live_tags(), live - 1);
    }
}
