mod helpers;

use std::cell::{Cell as StdCell, RefCell};
use std::rc::Rc;

use tessera::program::{Handle, Op, Program};
use tessera::tag::Cell;
use tessera::{value, Env, Error, ErrorKind, Func, Object, Value};

use crate::helpers::Page;

/// Records every call of an error handler.
#[derive(Clone, Default)]
struct Handler {
    calls: Rc<RefCell<Vec<String>>>,
    retry: Rc<RefCell<Option<Func>>>,
}

impl Handler {
    fn accept(&self) -> Func {
        let this = self.clone();
        Func::new("handler", move |args| {
            this.record(args);
            Ok(Value::None)
        })
    }

    /// Accepts the error and asks for the region to be rendered again.
    fn accept_and_retry(&self) -> Func {
        let this = self.clone();
        Func::new("handler", move |args| {
            this.record(args);
            if let [_, Value::Func(retry)] = args {
                retry.call(&[])?;
            }
            Ok(Value::None)
        })
    }

    fn reject(&self, msg: &'static str) -> Func {
        let this = self.clone();
        Func::new("handler", move |args| {
            this.record(args);
            Err(Error::render(msg))
        })
    }

    fn record(&self, args: &[Value]) {
        if let [Value::String(msg), Value::Func(retry)] = args {
            self.calls.borrow_mut().push(msg.clone());
            *self.retry.borrow_mut() = Some(retry.clone());
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    fn retry(&self) {
        let retry = self.retry.borrow().clone().unwrap();
        retry.call(&[]).unwrap();
    }
}

/// An object whose getters fail while the flag is set.
#[derive(Debug)]
struct Flaky {
    fail: Rc<StdCell<bool>>,
}

impl Object for Flaky {
    fn get(&self, key: &str) -> tessera::Result<Value> {
        if self.fail.get() {
            Err(Error::render(format!("cannot read `{key}`")))
        } else {
            Ok(Value::from("fine"))
        }
    }
}

/// `outer{{#try this.h}}inner{{this.inner.boom}}{{/try}}outer2`
fn try_program() -> (Program, Handle) {
    let mut program = Program::new();
    let mut asm = program.assembler().unwrap();
    let catch = asm.label();
    let end = asm.label();
    asm.root_scope(&[])
        .text("outer")
        .op(Op::PushFrame, &[])
        .jump(Op::ReturnTo, end)
        .op(Op::GetSelf, &[])
        .get_property("h")
        .jump(Op::PushUnwind, catch)
        .text("inner")
        .op(Op::GetSelf, &[])
        .get_property("inner")
        .get_property("boom")
        .op(Op::AppendText, &[])
        .bind(catch)
        .op(Op::PopUnwind, &[])
        .op(Op::Return, &[])
        .bind(end)
        .op(Op::PopFrame, &[])
        .text("outer2")
        .op(Op::Return, &[]);
    let main = asm.finish().unwrap();
    (program, main)
}

#[test]
fn unwind_initial_render() {
    let page = Page::new();
    let handler = Handler::default();
    let fail = Rc::new(StdCell::new(true));
    let inner: Rc<dyn Object> = Rc::new(Flaky { fail: fail.clone() });

    let (program, main) = try_program();
    let this = value! { h: handler.accept(), inner: Value::Object(inner) };
    page.render(page.env(), program, main, this).unwrap();

    assert_eq!(page.html(), "outer<!---->outer2");
    assert_eq!(handler.calls(), ["cannot read `boom`"]);
}

#[test]
fn unwind_retry() {
    let page = Page::new();
    let handler = Handler::default();
    let fail = Rc::new(StdCell::new(true));
    let inner: Rc<dyn Object> = Rc::new(Flaky { fail: fail.clone() });

    let (program, main) = try_program();
    let this = value! { h: handler.accept(), inner: Value::Object(inner) };
    let mut result = page.render(page.env(), program, main, this).unwrap();

    // Nothing inside the boundary is tracked until it is retried.
    fail.set(false);
    result.rerender().unwrap();
    assert_eq!(page.html(), "outer<!---->outer2");

    handler.retry();
    result.rerender().unwrap();
    assert_eq!(page.html(), "outerinnerfineouter2");
    assert_eq!(handler.calls().len(), 1);
}

#[test]
fn unwind_retry_fails_again() {
    let page = Page::new();
    let handler = Handler::default();
    let fail = Rc::new(StdCell::new(true));
    let inner: Rc<dyn Object> = Rc::new(Flaky { fail: fail.clone() });

    let (program, main) = try_program();
    let this = value! { h: handler.accept(), inner: Value::Object(inner) };
    let mut result = page.render(page.env(), program, main, this).unwrap();

    handler.retry();
    result.rerender().unwrap();
    assert_eq!(page.html(), "outer<!---->outer2");
    assert_eq!(handler.calls().len(), 2);
}

#[test]
fn unwind_handler_error_propagates() {
    let page = Page::new();
    let handler = Handler::default();
    let inner: Rc<dyn Object> = Rc::new(Flaky {
        fail: Rc::new(StdCell::new(true)),
    });

    let (program, main) = try_program();
    let this = value! { h: handler.reject("gave up"), inner: Value::Object(inner) };
    let err = page.render(page.env(), program, main, this).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Render);
    assert_eq!(err.message(), "gave up");
    assert_eq!(handler.calls(), ["cannot read `boom`"]);
}

#[test]
fn unwind_not_a_handler() {
    let page = Page::new();
    let (program, main) = try_program();
    let err = page
        .render(page.env(), program, main, value! { h: 1 })
        .unwrap_err();
    assert_eq!(
        err.message(),
        "expected an error handler, but expression evaluated to integer"
    );
}

#[test]
fn unwind_nested_boundaries() {
    let page = Page::new();
    let outer = Handler::default();
    let inner = Handler::default();

    let mut program = Program::new();
    let mut asm = program.assembler().unwrap();
    let (catch1, end1) = (asm.label(), asm.label());
    let (catch2, end2) = (asm.label(), asm.label());
    asm.root_scope(&[])
        .op(Op::PushFrame, &[])
        .jump(Op::ReturnTo, end1)
        .op(Op::GetSelf, &[])
        .get_property("outer")
        .jump(Op::PushUnwind, catch1)
        .text("a")
        .op(Op::PushFrame, &[])
        .jump(Op::ReturnTo, end2)
        .op(Op::GetSelf, &[])
        .get_property("inner")
        .jump(Op::PushUnwind, catch2)
        .op(Op::GetSelf, &[])
        .get_property("bad")
        .get_property("x")
        .op(Op::AppendText, &[])
        .bind(catch2)
        .op(Op::PopUnwind, &[])
        .op(Op::Return, &[])
        .bind(end2)
        .op(Op::PopFrame, &[])
        .text("b")
        .bind(catch1)
        .op(Op::PopUnwind, &[])
        .op(Op::Return, &[])
        .bind(end1)
        .op(Op::PopFrame, &[])
        .text("after")
        .op(Op::Return, &[]);
    let main = asm.finish().unwrap();

    let this = value! {
        outer: outer.accept(),
        inner: inner.reject("inner gave up"),
        bad: 1,
    };
    page.render(page.env(), program, main, this).unwrap();

    assert_eq!(page.html(), "<!---->after");
    assert_eq!(inner.calls(), ["cannot index into integer"]);
    assert_eq!(outer.calls(), ["inner gave up"]);
}

/// `{{#try this.h}}{{check this.val}}{{/try}}` where `check` rejects
/// negative numbers.
fn check_program(env: &mut Env) -> (Program, Handle) {
    env.add_helper("check", |args: &[Value]| match args[0] {
        Value::Integer(n) if n < 0 => Err(Error::render("negative")),
        ref v => Ok(v.clone()),
    });

    let mut program = Program::new();
    let mut asm = program.assembler().unwrap();
    let (catch, end) = (asm.label(), asm.label());
    asm.root_scope(&[])
        .op(Op::PushFrame, &[])
        .jump(Op::ReturnTo, end)
        .op(Op::GetSelf, &[])
        .get_property("h")
        .jump(Op::PushUnwind, catch)
        .op(Op::GetSelf, &[])
        .get_property("val")
        .helper("check", 1)
        .op(Op::AppendText, &[])
        .bind(catch)
        .op(Op::PopUnwind, &[])
        .op(Op::Return, &[])
        .bind(end)
        .op(Op::PopFrame, &[])
        .op(Op::Return, &[]);
    let main = asm.finish().unwrap();
    (program, main)
}

#[test]
fn unwind_on_rerender() {
    let page = Page::new();
    let handler = Handler::default();
    let mut env = page.env();
    let val = Cell::new(env.runtime(), 1);
    let (program, main) = check_program(&mut env);

    let this = value! { h: handler.accept(), val: val.clone() };
    let mut result = page.render(env, program, main, this).unwrap();
    assert_eq!(page.html(), "1");

    val.set(-1);
    result.rerender().unwrap();
    assert_eq!(page.html(), "<!---->");
    assert_eq!(handler.calls(), ["negative"]);

    val.set(2);
    result.rerender().unwrap();
    assert_eq!(page.html(), "<!---->");

    handler.retry();
    result.rerender().unwrap();
    assert_eq!(page.html(), "2");
    assert_eq!(handler.calls().len(), 1);
}

#[test]
fn unwind_retry_from_handler_on_rerender() {
    let page = Page::new();
    let handler = Handler::default();
    let mut env = page.env();
    let val = Cell::new(env.runtime(), 1);
    let (program, main) = check_program(&mut env);

    let this = value! { h: handler.accept_and_retry(), val: val.clone() };
    let mut result = page.render(env, program, main, this).unwrap();

    val.set(-1);
    result.rerender().unwrap();
    assert_eq!(page.html(), "<!---->");
    assert_eq!(handler.calls(), ["negative"]);

    val.set(5);
    let stats = result.rerender().unwrap();
    assert!(stats.evaluated > 0);
    assert_eq!(page.html(), "5");
    assert_eq!(handler.calls().len(), 1);
}

#[test]
fn unwind_retry_from_handler_on_initial_render() {
    let page = Page::new();
    let handler = Handler::default();
    let fail = Rc::new(StdCell::new(true));
    let inner: Rc<dyn Object> = Rc::new(Flaky { fail: fail.clone() });

    let (program, main) = try_program();
    let this = value! { h: handler.accept_and_retry(), inner: Value::Object(inner) };
    let mut result = page.render(page.env(), program, main, this).unwrap();
    assert_eq!(page.html(), "outer<!---->outer2");

    fail.set(false);
    result.rerender().unwrap();
    assert_eq!(page.html(), "outerinnerfineouter2");
    assert_eq!(handler.calls().len(), 1);
}
