pub mod context;

use std::cell::RefCell;
use std::rc::Rc;

use tessera::dom::{NodeId, SimpleDocument};
use tessera::program::{Handle, Op, Operand::Imm, Program};
use tessera::tag::Cell;
use tessera::{render_main, value, Cursor, Env, RenderResult, Value};

/// A page listing users, rendered into an in-memory document.
pub struct Page {
    pub doc: Rc<RefCell<SimpleDocument>>,
    pub root: NodeId,
    pub users: Cell,
    pub result: RenderResult,
}

/// ```text
/// <ul>
///   {{#each this.users key="id" as |user|}}
///     <li class={{if user.is_disabled "disabled"}}>{{user.name}} ({{user.age}})</li>
///   {{/each}}
/// </ul>
/// ```
pub fn program() -> (Program, Handle) {
    let mut program = Program::new();
    let mut asm = program.assembler().unwrap();
    let iter = asm.label();
    let body = asm.label();
    let done = asm.label();
    asm.root_scope(&["user"])
        .open_element("ul")
        .op(Op::FlushElement, &[])
        .op(Op::PushFrame, &[])
        .jump(Op::ReturnTo, iter)
        .op(Op::GetSelf, &[])
        .get_property("users")
        .enter_list("id", body)
        .bind(iter)
        .jump(Op::Iterate, done)
        .bind(body)
        .op(Op::ChildScope, &[])
        .op(Op::Pop, &[Imm(1)])
        .op(Op::SetVariable, &[Imm(1)])
        .open_element("li")
        .op(Op::GetVariable, &[Imm(1)])
        .get_property("is_disabled")
        .dynamic_attr("data-disabled")
        .op(Op::FlushElement, &[])
        .op(Op::GetVariable, &[Imm(1)])
        .get_property("name")
        .op(Op::AppendText, &[])
        .text(" (")
        .op(Op::GetVariable, &[Imm(1)])
        .get_property("age")
        .op(Op::AppendText, &[])
        .text(")")
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

/// Performs the initial render of the user list.
pub fn render(program: Rc<Program>, main: Handle, users: Vec<Value>) -> Page {
    let doc = Rc::new(RefCell::new(SimpleDocument::new()));
    let root = doc.borrow_mut().create_root();
    let env = Env::new(doc.clone());
    let users = Cell::new(env.runtime(), users);
    let this = value! { users: users.clone() };
    let result = render_main(env, program, main, this, Cursor::new(root))
        .unwrap()
        .sync()
        .unwrap();
    Page {
        doc,
        root,
        users,
        result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rerender_matches_fresh_render() {
        let (program, main) = program();
        let program = Rc::new(program);
        let users = context::users(50);
        let shuffled = context::shuffle(&users);

        let mut page = render(program.clone(), main, users);
        page.users.set(shuffled.clone());
        page.result.rerender().unwrap();

        let fresh = render(program, main, shuffled);
        assert_eq!(
            page.doc.borrow().inner_html(page.root),
            fresh.doc.borrow().inner_html(fresh.root)
        );
    }
}
