mod helpers;

use tessera::program::{Handle, Op, Operand::Imm, Program};
use tessera::tag::Cell;
use tessera::{value, ErrorKind, Value};

use crate::helpers::Page;

/// `<ul>{{#each this.items key=KEY as |item i|}}<li>{{i}}:{{item}}</li>{{/each}}</ul>`
fn list_program(key: &str, property: Option<&str>) -> (Program, Handle) {
    let mut program = Program::new();
    let mut asm = program.assembler().unwrap();
    let iter = asm.label();
    let body = asm.label();
    let done = asm.label();
    asm.root_scope(&["item", "i"])
        .open_element("ul")
        .op(Op::FlushElement, &[])
        .op(Op::PushFrame, &[])
        .jump(Op::ReturnTo, iter)
        .op(Op::GetSelf, &[])
        .get_property("items")
        .enter_list(key, body)
        .bind(iter)
        .jump(Op::Iterate, done)
        .bind(body)
        .op(Op::ChildScope, &[])
        .op(Op::SetVariable, &[Imm(2)])
        .op(Op::SetVariable, &[Imm(1)])
        .open_element("li")
        .op(Op::FlushElement, &[])
        .op(Op::GetVariable, &[Imm(2)])
        .op(Op::AppendText, &[])
        .text(":")
        .op(Op::GetVariable, &[Imm(1)]);
    if let Some(property) = property {
        asm.get_property(property);
    }
    asm.op(Op::AppendText, &[])
        .op(Op::CloseElement, &[])
        .op(Op::PopScope, &[])
        .op(Op::Exit, &[])
        .op(Op::Return, &[])
        .bind(done)
        .op(Op::ExitList, &[])
        .op(Op::PopFrame, &[])
        .op(Op::CloseElement, &[])
        .op(Op::Return, &[]);
    let main = asm.finish().unwrap();
    (program, main)
}

fn record(id: i64, name: &str) -> Value {
    value! { id: id, name: name }
}

#[test]
fn list_render() {
    let page = Page::new();
    let (program, main) = list_program("@index", None);
    page.render(page.env(), program, main, value! { items: ["a", "b", "c"] })
        .unwrap();
    assert_eq!(
        page.html(),
        "<ul><li>0:a</li><li>1:b</li><li>2:c</li><!----></ul>"
    );
}

#[test]
fn list_render_empty() {
    let page = Page::new();
    let (program, main) = list_program("@index", None);
    page.render(page.env(), program, main, value! { items: None })
        .unwrap();
    assert_eq!(page.html(), "<ul><!----></ul>");
}

#[test]
fn list_render_not_iterable() {
    let page = Page::new();
    let (program, main) = list_program("@index", None);
    let err = page
        .render(page.env(), program, main, value! { items: 3 })
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Render);
    assert_eq!(
        err.message(),
        "expected iterable, but expression evaluated to integer"
    );
}

#[test]
fn list_reorder_insert_remove() {
    let page = Page::new();
    let env = page.env();
    let items = Cell::new(env.runtime(), vec!["a", "b", "c"]);
    let (program, main) = list_program("@identity", None);
    let mut result = page
        .render(env, program, main, value! { items: items.clone() })
        .unwrap();

    let li = |i: usize| page.doc.borrow().child_nodes(page.doc.borrow().child_nodes(page.root)[0])[i];
    let (a, c) = (li(0), li(2));

    items.set(vec!["c", "a", "d"]);
    result.rerender().unwrap();
    assert_eq!(
        page.html(),
        "<ul><li>0:c</li><li>1:a</li><li>2:d</li><!----></ul>"
    );
    // Retained items keep their nodes.
    assert_eq!(li(0), c);
    assert_eq!(li(1), a);
}

#[test]
fn list_keyed_by_property() {
    let page = Page::new();
    let env = page.env();
    let items = Cell::new(
        env.runtime(),
        vec![record(1, "one"), record(2, "two"), record(3, "three")],
    );
    let (program, main) = list_program("id", Some("name"));
    let mut result = page
        .render(env, program, main, value! { items: items.clone() })
        .unwrap();
    assert_eq!(
        page.html(),
        "<ul><li>0:one</li><li>1:two</li><li>2:three</li><!----></ul>"
    );

    // Same keys with a changed value update the item in place.
    items.set(vec![record(3, "THREE"), record(1, "one")]);
    result.rerender().unwrap();
    assert_eq!(
        page.html(),
        "<ul><li>0:THREE</li><li>1:one</li><!----></ul>"
    );
}

#[test]
fn list_clear_and_refill() {
    let page = Page::new();
    let env = page.env();
    let items = Cell::new(env.runtime(), vec!["a", "b"]);
    let (program, main) = list_program("@index", None);
    let mut result = page
        .render(env, program, main, value! { items: items.clone() })
        .unwrap();

    items.set(());
    result.rerender().unwrap();
    assert_eq!(page.html(), "<ul><!----></ul>");

    items.set(vec!["x"]);
    result.rerender().unwrap();
    assert_eq!(page.html(), "<ul><li>0:x</li><!----></ul>");
}

#[test]
fn list_duplicate_keys() {
    let page = Page::new();
    let env = page.env();
    let items = Cell::new(env.runtime(), vec!["a", "a"]);
    let (program, main) = list_program("@identity", None);
    let mut result = page
        .render(env, program, main, value! { items: items.clone() })
        .unwrap();
    assert_eq!(page.html(), "<ul><li>0:a</li><li>1:a</li><!----></ul>");

    items.set(vec!["a", "b", "a"]);
    result.rerender().unwrap();
    assert_eq!(
        page.html(),
        "<ul><li>0:a</li><li>1:b</li><li>2:a</li><!----></ul>"
    );
}

#[test]
fn list_unchanged_is_skipped() {
    let page = Page::new();
    let env = page.env();
    let items = Cell::new(env.runtime(), vec!["a", "b"]);
    let (program, main) = list_program("@index", None);
    let mut result = page
        .render(env, program, main, value! { items: items.clone() })
        .unwrap();

    let stats = result.rerender().unwrap();
    assert_eq!(stats.evaluated, 0);
    assert_eq!(page.html(), "<ul><li>0:a</li><li>1:b</li><!----></ul>");
}

#[test]
fn list_rerender_does_not_grow_the_tag_arena() {
    let page = Page::new();
    let env = page.env();
    let rt = env.runtime().clone();
    let same = || vec![record(1, "one"), record(2, "two")];
    let items = Cell::new(&rt, same());
    let (program, main) = list_program("id", Some("name"));
    let mut result = page
        .render(env, program, main, value! { items: items.clone() })
        .unwrap();

    items.set(same());
    result.rerender().unwrap();
    let live = rt.live_tags();
    for _ in 0..100 {
        items.set(same());
        result.rerender().unwrap();
    }
    assert_eq!(rt.live_tags(), live);
    assert_eq!(
        page.html(),
        "<ul><li>0:one</li><li>1:two</li><!----></ul>"
    );
}

#[test]
fn list_removed_items_release_their_tags() {
    let page = Page::new();
    let env = page.env();
    let rt = env.runtime().clone();
    let items = Cell::new(&rt, vec!["a"]);
    let (program, main) = list_program("@identity", None);
    let mut result = page
        .render(env, program, main, value! { items: items.clone() })
        .unwrap();
    let live = rt.live_tags();

    for _ in 0..20 {
        items.set(vec!["a", "b", "c"]);
        result.rerender().unwrap();
        items.set(vec!["a"]);
        result.rerender().unwrap();
    }
    assert_eq!(rt.live_tags(), live);
}
