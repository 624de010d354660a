#![no_main]

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use tessera::dom::SimpleDocument;
use tessera::program::Program;
use tessera::{render_main, Cursor, Env};

/// Jumps can loop forever, so every render is cut off after this many
/// opcodes.
const MAX_STEPS: usize = 10_000;

#[derive(Debug, Arbitrary)]
enum Value {
    None,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl From<Value> for tessera::Value {
    fn from(value: Value) -> Self {
        match value {
            Value::None => Self::None,
            Value::Bool(b) => Self::Bool(b),
            Value::Integer(n) => Self::Integer(n),
            Value::Float(n) => Self::Float(n),
            Value::String(s) => Self::String(s),
            Value::List(list) => list.into_iter().collect(),
            Value::Map(map) => map.into_iter().collect(),
        }
    }
}

fuzz_target!(|data: (Vec<String>, Vec<u32>, Value)| {
    let (strings, words, value) = data;

    let mut program = Program::new();
    let Ok(mut asm) = program.assembler() else {
        return;
    };
    for s in &strings {
        asm.string(s);
    }
    for word in words {
        asm.word(word);
    }
    let Ok(main) = asm.finish() else {
        return;
    };

    let doc = Rc::new(RefCell::new(SimpleDocument::new()));
    let root = doc.borrow_mut().create_root();
    let env = Env::builder(doc).max_frame_depth(64).build();
    let Ok(mut iter) = render_main(env, Rc::new(program), main, value, Cursor::new(root)) else {
        return;
    };
    for _ in 0..MAX_STEPS {
        match iter.step() {
            Ok(false) => continue,
            Ok(true) => {
                if let Ok(mut result) = iter.sync() {
                    let _ = result.rerender();
                }
                return;
            }
            Err(_) => return,
        }
    }
});
