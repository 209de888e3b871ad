//! Instruction set and the program image shared by the generator and the machine.
//!
//! Opcodes are single bytes followed by fixed-size little-endian operands.
//! Code and data addresses are 16 bits wide.

use serde::Serialize;

pub mod disasm;

// ---- Opcodes ----

pub const OP_HALT: u8 = 0;

pub const OP_ICONST_0: u8 = 1;
pub const OP_ICONST_1: u8 = 2;
pub const OP_I8CONST: u8 = 3; // imm i8
pub const OP_I16CONST: u8 = 4; // imm i16
pub const OP_I32CONST: u8 = 5; // imm i32
pub const OP_ICONST: u8 = 6; // imm i64

pub const OP_I8CAST: u8 = 7;
pub const OP_I16CAST: u8 = 8;
pub const OP_I32CAST: u8 = 9;

pub const OP_INEG: u8 = 10;
pub const OP_IABS: u8 = 11;
pub const OP_INOT: u8 = 12;
pub const OP_IADD: u8 = 13;
pub const OP_ISUB: u8 = 14;
pub const OP_IMUL: u8 = 15;
pub const OP_IDIV: u8 = 16;
pub const OP_IMOD: u8 = 17;
pub const OP_IBAND: u8 = 18;
pub const OP_IBOR: u8 = 19;
pub const OP_IBXOR: u8 = 20;
pub const OP_IAND: u8 = 21;
pub const OP_IOR: u8 = 22;
pub const OP_IEQ: u8 = 23;
pub const OP_INQ: u8 = 24;
pub const OP_ILT: u8 = 25;
pub const OP_ILE: u8 = 26;
pub const OP_IGT: u8 = 27;
pub const OP_IGE: u8 = 28;
pub const OP_IPRINT: u8 = 29;

pub const OP_RCONST: u8 = 30; // imm f64
pub const OP_RCONST_0: u8 = 31;
pub const OP_RCONST_1: u8 = 32;
pub const OP_RCONST_PI: u8 = 33;

pub const OP_RNEG: u8 = 34;
pub const OP_RABS: u8 = 35;
pub const OP_RADD: u8 = 36;
pub const OP_RSUB: u8 = 37;
pub const OP_RMUL: u8 = 38;
pub const OP_RDIV: u8 = 39;
pub const OP_RMOD: u8 = 40;
pub const OP_RPOW: u8 = 41;
pub const OP_RSQRT: u8 = 42;
pub const OP_REXP: u8 = 43;
pub const OP_RSIN: u8 = 44;
pub const OP_RCOS: u8 = 45;
pub const OP_RTAN: u8 = 46;
pub const OP_RACOS: u8 = 47;
pub const OP_RATAN2: u8 = 48;
pub const OP_RLOG: u8 = 49;
pub const OP_RLOG10: u8 = 50;
pub const OP_RLOG2: u8 = 51;
pub const OP_RCEIL: u8 = 52;
pub const OP_RFLOOR: u8 = 53;
pub const OP_RROUND: u8 = 54;
pub const OP_REQ: u8 = 55;
pub const OP_RNQ: u8 = 56;
pub const OP_RLT: u8 = 57;
pub const OP_RLE: u8 = 58;
pub const OP_RGT: u8 = 59;
pub const OP_RGE: u8 = 60;
pub const OP_RPRINT: u8 = 61;

pub const OP_SCONST: u8 = 62; // data offset u16
pub const OP_SPRINT: u8 = 63;
pub const OP_SLEN: u8 = 64;

pub const OP_LOAD: u8 = 65; // type tag u8, slot u16, global u8
pub const OP_STORE: u8 = 66; // type tag u8, slot u16, global u8
pub const OP_DROP: u8 = 67;

pub const OP_PROC: u8 = 68; // args u16, locals u16
pub const OP_CALL: u8 = 69; // entry u16
pub const OP_RET: u8 = 70;

pub const OP_JMP: u8 = 71; // target u16
pub const OP_JEZ: u8 = 72; // target u16

/// Static description of one opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpInfo {
    pub code: u8,
    pub name: &'static str,
    /// Operand bytes following the opcode.
    pub operands: usize,
}

const fn op(code: u8, name: &'static str, operands: usize) -> OpInfo {
    OpInfo { code, name, operands }
}

/// Indexed by opcode value.
pub static OPCODES: [OpInfo; 73] = [
    op(OP_HALT, "halt", 0),
    op(OP_ICONST_0, "iconst_0", 0),
    op(OP_ICONST_1, "iconst_1", 0),
    op(OP_I8CONST, "i8const", 1),
    op(OP_I16CONST, "i16const", 2),
    op(OP_I32CONST, "i32const", 4),
    op(OP_ICONST, "iconst", 8),
    op(OP_I8CAST, "i8cast", 0),
    op(OP_I16CAST, "i16cast", 0),
    op(OP_I32CAST, "i32cast", 0),
    op(OP_INEG, "ineg", 0),
    op(OP_IABS, "iabs", 0),
    op(OP_INOT, "inot", 0),
    op(OP_IADD, "iadd", 0),
    op(OP_ISUB, "isub", 0),
    op(OP_IMUL, "imul", 0),
    op(OP_IDIV, "idiv", 0),
    op(OP_IMOD, "imod", 0),
    op(OP_IBAND, "iband", 0),
    op(OP_IBOR, "ibor", 0),
    op(OP_IBXOR, "ibxor", 0),
    op(OP_IAND, "iand", 0),
    op(OP_IOR, "ior", 0),
    op(OP_IEQ, "ieq", 0),
    op(OP_INQ, "inq", 0),
    op(OP_ILT, "ilt", 0),
    op(OP_ILE, "ile", 0),
    op(OP_IGT, "igt", 0),
    op(OP_IGE, "ige", 0),
    op(OP_IPRINT, "iprint", 0),
    op(OP_RCONST, "rconst", 8),
    op(OP_RCONST_0, "rconst_0", 0),
    op(OP_RCONST_1, "rconst_1", 0),
    op(OP_RCONST_PI, "rconst_pi", 0),
    op(OP_RNEG, "rneg", 0),
    op(OP_RABS, "rabs", 0),
    op(OP_RADD, "radd", 0),
    op(OP_RSUB, "rsub", 0),
    op(OP_RMUL, "rmul", 0),
    op(OP_RDIV, "rdiv", 0),
    op(OP_RMOD, "rmod", 0),
    op(OP_RPOW, "rpow", 0),
    op(OP_RSQRT, "rsqrt", 0),
    op(OP_REXP, "rexp", 0),
    op(OP_RSIN, "rsin", 0),
    op(OP_RCOS, "rcos", 0),
    op(OP_RTAN, "rtan", 0),
    op(OP_RACOS, "racos", 0),
    op(OP_RATAN2, "ratan2", 0),
    op(OP_RLOG, "rlog", 0),
    op(OP_RLOG10, "rlog10", 0),
    op(OP_RLOG2, "rlog2", 0),
    op(OP_RCEIL, "rceil", 0),
    op(OP_RFLOOR, "rfloor", 0),
    op(OP_RROUND, "rround", 0),
    op(OP_REQ, "req", 0),
    op(OP_RNQ, "rnq", 0),
    op(OP_RLT, "rlt", 0),
    op(OP_RLE, "rle", 0),
    op(OP_RGT, "rgt", 0),
    op(OP_RGE, "rge", 0),
    op(OP_RPRINT, "rprint", 0),
    op(OP_SCONST, "sconst", 2),
    op(OP_SPRINT, "sprint", 0),
    op(OP_SLEN, "slen", 0),
    op(OP_LOAD, "load", 4),
    op(OP_STORE, "store", 4),
    op(OP_DROP, "drop", 0),
    op(OP_PROC, "proc", 4),
    op(OP_CALL, "call", 2),
    op(OP_RET, "ret", 0),
    op(OP_JMP, "jmp", 2),
    op(OP_JEZ, "jez", 2),
];

pub fn info(code: u8) -> Option<&'static OpInfo> {
    OPCODES.get(code as usize)
}

/// Narrowing cast opcode for an integer width, `None` at 64 bits.
pub fn cast_for_width(bits: u32) -> Option<u8> {
    match bits {
        8 => Some(OP_I8CAST),
        16 => Some(OP_I16CAST),
        32 => Some(OP_I32CAST),
        _ => None,
    }
}

/// Keeps the low `bits` bits of `value` and sign-extends them back to 64 bits.
pub fn truncate(value: i64, bits: u32) -> i64 {
    if bits >= 64 {
        return value;
    }
    let mask = (1u64 << bits) - 1;
    let sign = 1u64 << (bits - 1);
    let low = value as u64 & mask;
    (low ^ sign).wrapping_sub(sign) as i64
}

// ---- Program image ----

/// Highest addressable byte plus one for both code and data.
pub const ADDRESS_SPACE: usize = u16::MAX as usize + 1;

/// Generated bytecode plus the NUL-terminated string pool it refers to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Program {
    pub code: Vec<u8>,
    pub data: Vec<u8>,
}

impl Program {
    pub fn new() -> Self {
        Program::default()
    }

    /// Offset the next emitted byte will occupy.
    pub fn addr(&self) -> usize {
        self.code.len()
    }

    pub fn emit(&mut self, byte: u8) {
        self.code.push(byte);
    }

    pub fn emit_u16(&mut self, v: u16) {
        self.code.extend_from_slice(&v.to_le_bytes());
    }

    pub fn emit_u32(&mut self, v: u32) {
        self.code.extend_from_slice(&v.to_le_bytes());
    }

    pub fn emit_u64(&mut self, v: u64) {
        self.code.extend_from_slice(&v.to_le_bytes());
    }

    /// Overwrites a previously emitted 16-bit operand. Returns `false` when `at` is out of range.
    pub fn patch_u16(&mut self, at: usize, v: u16) -> bool {
        match self.code.get_mut(at..at + 2) {
            Some(slot) => {
                slot.copy_from_slice(&v.to_le_bytes());
                true
            }
            None => false,
        }
    }

    pub fn read_u8(&self, at: usize) -> Option<u8> {
        self.code.get(at).copied()
    }

    pub fn read_u16(&self, at: usize) -> Option<u16> {
        let b = self.code.get(at..at + 2)?;
        Some(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn read_u32(&self, at: usize) -> Option<u32> {
        let b = self.code.get(at..at + 4)?;
        Some(u32::from_le_bytes(b.try_into().ok()?))
    }

    pub fn read_u64(&self, at: usize) -> Option<u64> {
        let b = self.code.get(at..at + 8)?;
        Some(u64::from_le_bytes(b.try_into().ok()?))
    }

    /// Appends `s` and its terminator to the data segment, returning its offset.
    /// `None` when the offset would not fit a 16-bit operand.
    pub fn intern(&mut self, s: &str) -> Option<u16> {
        let offset = u16::try_from(self.data.len()).ok()?;
        self.data.extend_from_slice(s.as_bytes());
        self.data.push(0);
        Some(offset)
    }

    /// The NUL-terminated string starting at `offset`.
    pub fn string_at(&self, offset: usize) -> Option<&str> {
        let tail = self.data.get(offset..)?;
        let len = tail.iter().position(|&b| b == 0)?;
        std::str::from_utf8(&tail[..len]).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_table_is_indexed_by_value() {
        for (i, info) in OPCODES.iter().enumerate() {
            assert_eq!(info.code as usize, i, "{} out of place", info.name);
        }
        assert_eq!(info(OP_JEZ).map(|i| i.name), Some("jez"));
        assert!(info(OP_JEZ + 1).is_none());
    }

    #[test]
    fn truncate_wraps_into_width() {
        assert_eq!(truncate(300, 8), 44);
        assert_eq!(truncate(128, 8), -128);
        assert_eq!(truncate(-200, 8), 56);
        assert_eq!(truncate(32768, 16), -32768);
        assert_eq!(truncate(100000, 16), -31072);
        assert_eq!(truncate(1 << 31, 32), i32::MIN as i64);
        assert_eq!(truncate(i64::MIN, 64), i64::MIN);
    }

    #[test]
    fn truncate_is_identity_when_value_fits() {
        for v in [-128i64, -1, 0, 1, 127] {
            assert_eq!(truncate(v, 8), v);
        }
    }

    #[test]
    fn operands_are_little_endian() {
        let mut p = Program::new();
        p.emit(OP_JMP);
        p.emit_u16(0x1234);
        assert_eq!(p.code, vec![OP_JMP, 0x34, 0x12]);
        assert_eq!(p.read_u16(1), Some(0x1234));
        assert!(p.patch_u16(1, 7));
        assert_eq!(p.read_u16(1), Some(7));
        assert!(!p.patch_u16(2, 7));
        assert_eq!(p.read_u16(2), None);
    }

    #[test]
    fn interned_strings_are_nul_terminated() {
        let mut p = Program::new();
        assert_eq!(p.intern("hi"), Some(0));
        assert_eq!(p.intern("世界"), Some(3));
        assert_eq!(p.data[2], 0);
        assert_eq!(p.string_at(0), Some("hi"));
        assert_eq!(p.string_at(3), Some("世界"));
        assert_eq!(p.string_at(99), None);
    }

    #[test]
    fn intern_refuses_offsets_past_address_space() {
        let mut p = Program::new();
        p.data = vec![b'x'; ADDRESS_SPACE];
        assert_eq!(p.intern("late"), None);
    }
}
