use std::fmt::Write;

use super::{Program, info};

/// One line per instruction: hex offset, tab, space, mnemonic, then each operand byte.
///
/// ```text
/// 0	 iconst_0
/// 2	 proc 0x0 0x0 0x1 0x0
/// ```
///
/// An unknown opcode or a truncated operand list ends the listing with a
/// `?? 0x..` line instead of failing.
pub fn disassemble(program: &Program) -> String {
    let mut out = String::new();
    let code = &program.code;
    let mut ip = 0;
    while ip < code.len() {
        let op = code[ip];
        let Some(desc) = info(op) else {
            let _ = writeln!(out, "{:x}\t ?? 0x{:x}", ip, op);
            break;
        };
        let _ = write!(out, "{:x}\t {}", ip, desc.name);
        let operands = code.get(ip + 1..ip + 1 + desc.operands);
        for byte in operands.unwrap_or(&code[ip + 1..]) {
            let _ = write!(out, " 0x{:x}", byte);
        }
        out.push('\n');
        if operands.is_none() {
            let _ = writeln!(out, "{:x}\t ?? truncated", code.len());
            break;
        }
        ip += 1 + desc.operands;
    }
    out
}
