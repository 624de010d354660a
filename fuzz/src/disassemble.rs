#![no_main]

use libfuzzer_sys::fuzz_target;
use tessera::program::Program;

fuzz_target!(|words: Vec<u32>| {
    let mut program = Program::new();
    let Ok(mut asm) = program.assembler() else {
        return;
    };
    for word in words {
        asm.word(word);
    }
    if let Ok(handle) = asm.finish() {
        let _ = program.disassemble(handle);
    }
});
