//! Keyed list reconciliation.

use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use tracing::trace;

use crate::env::Env;
use crate::program::Program;
use crate::render::{BlockId, Cursor, Vm};
use crate::update::{ListBlockOp, OpId, UpdatingOp};
use crate::{Error, Result, Value};

/// Returns the items of an iterable value. `None` iterates as an empty list.
pub(crate) fn iterate(value: &Value) -> Result<Vec<Value>> {
    match value.resolve() {
        Value::List(items) => Ok(items),
        Value::None => Ok(Vec::new()),
        value => Err(Error::render(format!(
            "expected iterable, but expression evaluated to {}",
            value.human()
        ))),
    }
}

/// Computes the key of every item.
///
/// `@index` keys by position, `@identity` by the item itself and any other
/// key by the identity of that property of the item. Repeated keys get a
/// `#n` suffix so that every item keeps a distinct key.
pub(crate) fn item_keys(items: &[Value], key: &str) -> Result<Vec<String>> {
    let mut seen: BTreeMap<String, usize> = BTreeMap::new();
    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let base = match key {
                "@index" => i.to_string(),
                "@identity" => item.identity(),
                key => item.get(key)?.resolve().identity(),
            };
            let count = seen.entry(base.clone()).or_insert(0);
            *count += 1;
            Ok(match *count {
                1 => base,
                n => format!("{base}#{}", n - 1),
            })
        })
        .collect()
}

/// Brings the items of a list in line with the current value of its
/// iterable.
///
/// Items whose key disappeared are destroyed, retained items are moved into
/// place and get their value and index cells updated, and new items are
/// rendered before their successor. Afterwards the child blocks and the
/// item opcodes follow the new order.
pub(crate) fn reconcile(env: &mut Env, program: &Rc<Program>, op: &ListBlockOp) -> Result<()> {
    let values = iterate(&op.iterable.value()?)?;
    let keys = item_keys(&values, &op.key)?;

    let mut old = BTreeMap::new();
    for id in env.updates.ids(op.items) {
        if let Some(UpdatingOp::ListItem(item)) = env.updates.get(id) {
            old.insert(item.key.clone(), id);
        }
    }

    let doc = env.document.clone();
    let retained: BTreeSet<&str> = keys.iter().map(String::as_str).collect();
    let mut removed = 0;
    old.retain(|key, id| {
        if retained.contains(key.as_str()) {
            return true;
        }
        if let Some(block) = item_block(env, *id) {
            env.tree.remove(&mut *doc.borrow_mut(), block);
        }
        env.updates.remove(*id);
        removed += 1;
        false
    });

    let parent = env.tree.parent(op.block);
    let mut anchor = env.tree.last_node(op.block);
    let mut order = Vec::with_capacity(keys.len());
    let mut inserted = 0;
    for (i, (key, value)) in keys.iter().zip(values).enumerate().rev() {
        let id = match old.get(key) {
            Some(&id) => {
                if let Some(UpdatingOp::ListItem(item)) = env.updates.get(id) {
                    if item.value.peek() != value {
                        item.value.set(value);
                    }
                    if item.index.peek() != Value::from(i) {
                        item.index.set(i);
                    }
                }
                let block = item_block(env, id)
                    .ok_or_else(|| Error::program("list item without a region"))?;
                let in_place = env
                    .tree
                    .last_node(block)
                    .map(|last| doc.borrow().next_sibling(last) == anchor)
                    .unwrap_or(true);
                if !in_place {
                    env.tree.move_before(&mut *doc.borrow_mut(), block, anchor);
                }
                id
            }
            None => {
                let cursor = Cursor::before(parent, anchor);
                let mut vm = Vm::item(env, program.clone(), op, cursor);
                let id = vm.enter_item(env, key.clone(), value, i)?;
                vm.execute(env)?;
                inserted += 1;
                id
            }
        };
        let block = item_block(env, id).ok_or_else(|| Error::program("list item without a region"))?;
        anchor = env.tree.first_node(block).or(anchor);
        order.push((id, block));
    }
    order.reverse();

    env.tree
        .set_children(op.block, order.iter().map(|(_, block)| *block).collect());
    for (id, _) in &order {
        env.updates.move_to_end(*id);
    }
    trace!(items = order.len(), removed, inserted, "reconciled list");
    Ok(())
}

fn item_block(env: &Env, id: OpId) -> Option<BlockId> {
    match env.updates.get(id)? {
        UpdatingOp::ListItem(item) => Some(item.region.block),
        _ => None,
    }
}
