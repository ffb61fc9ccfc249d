use std::fmt::Write;

use crate::bytecode::compile::PLACEHOLDER;
use crate::bytecode::ir::{CodeObject, Constant, Program};
use crate::bytecode::op::Opcode;

/// Print disassembly of a bytecode program
pub fn print_program(program: &Program) {
    println!("=== BYTECODE PROGRAM ===\n");
    print!("{}", disassemble(program));
    print_stats(program);
}

/// Renders the main code object, then every function code object of the
/// constant pool, one instruction per line:
/// `<address>\t<MNEMONIC> [operand...] (annotation)`.
pub fn disassemble(program: &Program) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "== main ==");
    disassemble_code(&mut out, &program.main, &program.constants);

    for (idx, code) in program.functions() {
        let _ = writeln!(
            out,
            "\n== function {}({}) [const {}] ==",
            code.name,
            code.params.join(", "),
            idx
        );
        disassemble_code(&mut out, code, &program.constants);
    }

    out
}

fn disassemble_code(out: &mut String, code: &CodeObject, constants: &[Constant]) {
    let words = &code.code;
    let mut addr = 0;

    while addr < words.len() {
        let Some(op) = Opcode::from_i32(words[addr]) else {
            let _ = writeln!(out, "{}\t<unknown opcode {}>", addr, words[addr]);
            return;
        };

        let end = addr + op.width();
        let Some(operands) = words.get(addr + 1..end) else {
            let _ = writeln!(out, "{}\t{} <truncated>", addr, op.mnemonic());
            return;
        };

        let mut line = format!("{}\t{}", addr, op.mnemonic());
        for operand in operands {
            let _ = write!(line, " {}", operand);
        }
        if let Some(note) = annotate(code, constants, addr, op, operands) {
            let _ = write!(line, " ({})", note);
        }
        let _ = writeln!(out, "{}", line);

        addr = end;
    }
}

fn annotate(
    code: &CodeObject,
    constants: &[Constant],
    addr: usize,
    op: Opcode,
    operands: &[i32],
) -> Option<String> {
    match op {
        Opcode::LoadConst => {
            let constant = usize::try_from(operands[0])
                .ok()
                .and_then(|idx| constants.get(idx));
            Some(match constant {
                Some(constant) => constant.to_string(),
                None => "?".to_string(),
            })
        }
        Opcode::LoadVar | Opcode::StoreVar => {
            Some(variable_name(code, addr, operands[0], operands[1]).unwrap_or("?").to_string())
        }
        Opcode::Jmp | Opcode::JmpTrue | Opcode::JmpFalse | Opcode::EnterScope
            if operands[0] == PLACEHOLDER =>
        {
            Some("unpatched".to_string())
        }
        _ => None,
    }
}

/// Name of the slot `(depth, index)` as seen from the instruction at `addr`.
fn variable_name(code: &CodeObject, addr: usize, depth: i32, index: i32) -> Option<&str> {
    let chain = code.scope_chain_at(addr);
    let depth = usize::try_from(depth).ok()?;
    let index = usize::try_from(index).ok()?;
    let scope = chain.len().checked_sub(depth + 1)?;
    chain[scope].get(index).map(String::as_str)
}

/// Addresses of jump instructions whose target is still the placeholder.
pub fn unpatched_jumps(code: &CodeObject) -> Vec<usize> {
    let mut found = Vec::new();
    let mut addr = 0;
    while let Some(op) = code.code.get(addr).and_then(|w| Opcode::from_i32(*w)) {
        if op.is_jump() && code.code.get(addr + 1) == Some(&PLACEHOLDER) {
            found.push(addr);
        }
        addr += op.width();
    }
    found
}

fn print_stats(program: &Program) {
    let functions: Vec<_> = program.functions().collect();
    let words: usize = program.main.code.len()
        + functions.iter().map(|(_, c)| c.code.len()).sum::<usize>();

    println!("\n=== STATS ===");
    println!("  code objects: {}", functions.len() + 1);
    println!("  code words:   {}", words);
    println!("  constants:    {}", program.constants.len());
    println!("  globals:      {}", program.globals.join(", "));
}
