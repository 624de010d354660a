mod helpers;

use tessera::program::{Op, Program};
use tessera::tag::Runtime;
use tessera::{Env, ErrorKind};

use crate::helpers::Page;

#[test]
fn env_transaction() {
    let page = Page::new();
    let mut env = page.env();
    assert!(!env.in_transaction());
    env.begin().unwrap();
    assert!(env.in_transaction());
    env.commit().unwrap();
    assert!(!env.in_transaction());
}

#[test]
fn env_commit_without_begin() {
    let page = Page::new();
    let mut env = page.env();
    let err = env.commit().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transaction);
    assert_eq!(err.to_string(), "no transaction is open");
}

#[test]
#[cfg_attr(debug_assertions, should_panic(expected = "transaction is already open"))]
fn env_nested_begin() {
    let page = Page::new();
    let mut env = page.env();
    env.begin().unwrap();
    let err = env.begin().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transaction);
}

#[test]
fn env_shared_runtime() {
    let page = Page::new();
    let rt = Runtime::new();
    let env = Env::builder(page.doc.clone()).runtime(&rt).build();
    let before = rt.now();
    let cell = tessera::tag::Cell::new(env.runtime(), 1);
    cell.set(2);
    assert!(rt.now() > before);
}

#[test]
fn env_rerender_reuses_environment() {
    let page = Page::new();
    let mut program = Program::new();
    let mut asm = program.assembler().unwrap();
    asm.root_scope(&[]).text("hi").op(Op::Return, &[]);
    let main = asm.finish().unwrap();

    let mut result = page.render(page.env(), program, main, ()).unwrap();
    assert!(!result.env().in_transaction());
    result.rerender().unwrap();
    assert!(!result.env().in_transaction());

    // A transaction opened by the host blocks a rerender.
    result.env_mut().begin().unwrap();
    if !cfg!(debug_assertions) {
        let err = result.rerender().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transaction);
    }
    result.env_mut().commit().unwrap();
    assert_eq!(page.html(), "hi");
}
