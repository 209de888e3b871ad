//! Stack machine that runs a [`Program`].
//!
//! One linear operand stack of 64-bit slots holds every value and every call
//! frame. A frame looks like
//!
//! ```text
//! bp -> [args][locals][return ip][caller bp][frame size]
//! ```
//!
//! and `ret` collapses it to the single return value. The global scope runs in
//! a frame of its own with `bp == 0`, so global slots are absolute indices.

use std::io::Write;

use tracing::{debug, trace};

use crate::ast::Type;
use crate::bytecode::*;

#[derive(Debug, thiserror::Error)]
pub enum VmError {
    #[error("unknown opcode {op:#04x} at {ip:#x}")]
    UnknownOpcode { op: u8, ip: usize },
    #[error("operands of the instruction at {ip:#x} run past the end of the code")]
    TruncatedInstruction { ip: usize },
    #[error("execution ran off the end of the code at {ip:#x} without halting")]
    RanOffEnd { ip: usize },
    #[error("division by zero at {ip:#x}")]
    DivisionByZero { ip: usize },
    #[error("stack overflow ({capacity} slots)")]
    StackOverflow { capacity: usize },
    #[error("stack underflow at {ip:#x}")]
    StackUnderflow { ip: usize },
    #[error("slot {slot} is outside the stack at {ip:#x}")]
    BadSlot { slot: usize, ip: usize },
    #[error("unknown type tag {tag} at {ip:#x}")]
    BadTypeTag { tag: u8, ip: usize },
    #[error("no string at data offset {offset:#x}")]
    BadString { offset: i64 },
    #[error("step limit of {limit} instructions reached")]
    StepLimit { limit: u64 },
    #[error("output error: {0}")]
    Io(#[from] std::io::Error),
}

impl VmError {
    pub fn code(&self) -> &'static str {
        match self {
            VmError::DivisionByZero { .. } => "MZ-R001",
            VmError::StackOverflow { .. } => "MZ-R002",
            VmError::StepLimit { .. } => "MZ-R003",
            VmError::Io(_) => "MZ-R004",
            VmError::UnknownOpcode { .. }
            | VmError::TruncatedInstruction { .. }
            | VmError::RanOffEnd { .. }
            | VmError::StackUnderflow { .. }
            | VmError::BadSlot { .. }
            | VmError::BadTypeTag { .. }
            | VmError::BadString { .. } => "MZ-R005",
        }
    }
}

pub type VmResult<T> = Result<T, VmError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmConfig {
    /// Operand stack capacity in slots.
    pub stack_size: usize,
    /// Abort after this many executed instructions.
    pub max_steps: Option<u64>,
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig { stack_size: 2048, max_steps: None }
    }
}

/// One stack slot. Integers, reals and string offsets share the same 64 bits;
/// the instruction decides how to read them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Slot(u64);

impl Slot {
    #[inline]
    fn int(v: i64) -> Self {
        Slot(v as u64)
    }

    #[inline]
    fn real(v: f64) -> Self {
        Slot(v.to_bits())
    }

    #[inline]
    fn bool(b: bool) -> Self {
        Slot(b as u64)
    }

    #[inline]
    fn as_int(self) -> i64 {
        self.0 as i64
    }

    #[inline]
    fn as_real(self) -> f64 {
        f64::from_bits(self.0)
    }
}

pub struct Vm<'p, W: Write> {
    program: &'p Program,
    config: VmConfig,
    stack: Vec<Slot>,
    ip: usize,
    sp: usize,
    bp: usize,
    halted: bool,
    steps: u64,
    out: W,
}

impl<'p, W: Write> Vm<'p, W> {
    pub fn new(program: &'p Program, out: W) -> Self {
        Vm::with_config(program, out, VmConfig::default())
    }

    pub fn with_config(program: &'p Program, out: W, config: VmConfig) -> Self {
        Vm {
            program,
            config,
            stack: vec![Slot::default(); config.stack_size],
            ip: 0,
            sp: 0,
            bp: 0,
            halted: false,
            steps: 0,
            out,
        }
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn into_output(self) -> W {
        self.out
    }

    /// Runs until `halt`.
    pub fn run(&mut self) -> VmResult<()> {
        while !self.halted {
            self.step()?;
        }
        self.out.flush()?;
        debug!(steps = self.steps, "halted");
        Ok(())
    }

    // ---- Stack ----

    #[inline]
    fn push(&mut self, v: Slot) -> VmResult<()> {
        let slot = self
            .stack
            .get_mut(self.sp)
            .ok_or(VmError::StackOverflow { capacity: self.config.stack_size })?;
        *slot = v;
        self.sp += 1;
        Ok(())
    }

    #[inline]
    fn pop(&mut self) -> VmResult<Slot> {
        self.sp = self
            .sp
            .checked_sub(1)
            .ok_or(VmError::StackUnderflow { ip: self.ip })?;
        Ok(self.stack[self.sp])
    }

    fn pop_int(&mut self) -> VmResult<i64> {
        Ok(self.pop()?.as_int())
    }

    fn pop_real(&mut self) -> VmResult<f64> {
        Ok(self.pop()?.as_real())
    }

    fn int_unary(&mut self, f: impl FnOnce(i64) -> i64) -> VmResult<()> {
        let a = self.pop_int()?;
        self.push(Slot::int(f(a)))
    }

    fn int_binary(&mut self, f: impl FnOnce(i64, i64) -> i64) -> VmResult<()> {
        let b = self.pop_int()?;
        let a = self.pop_int()?;
        self.push(Slot::int(f(a, b)))
    }

    fn int_compare(&mut self, f: impl FnOnce(i64, i64) -> bool) -> VmResult<()> {
        let b = self.pop_int()?;
        let a = self.pop_int()?;
        self.push(Slot::bool(f(a, b)))
    }

    fn int_divide(&mut self, at: usize, f: impl FnOnce(i64, i64) -> i64) -> VmResult<()> {
        let b = self.pop_int()?;
        let a = self.pop_int()?;
        if b == 0 {
            return Err(VmError::DivisionByZero { ip: at });
        }
        self.push(Slot::int(f(a, b)))
    }

    fn real_unary(&mut self, f: impl FnOnce(f64) -> f64) -> VmResult<()> {
        let a = self.pop_real()?;
        self.push(Slot::real(f(a)))
    }

    fn real_binary(&mut self, f: impl FnOnce(f64, f64) -> f64) -> VmResult<()> {
        let b = self.pop_real()?;
        let a = self.pop_real()?;
        self.push(Slot::real(f(a, b)))
    }

    fn real_compare(&mut self, f: impl FnOnce(f64, f64) -> bool) -> VmResult<()> {
        let b = self.pop_real()?;
        let a = self.pop_real()?;
        self.push(Slot::bool(f(a, b)))
    }

    // ---- Operands ----

    fn operand<T>(&mut self, at: usize, size: usize, read: impl FnOnce(&Program, usize) -> Option<T>) -> VmResult<T> {
        let v = read(self.program, self.ip).ok_or(VmError::TruncatedInstruction { ip: at })?;
        self.ip += size;
        Ok(v)
    }

    fn operand_u8(&mut self, at: usize) -> VmResult<u8> {
        self.operand(at, 1, Program::read_u8)
    }

    fn operand_u16(&mut self, at: usize) -> VmResult<u16> {
        self.operand(at, 2, Program::read_u16)
    }

    fn operand_u32(&mut self, at: usize) -> VmResult<u32> {
        self.operand(at, 4, Program::read_u32)
    }

    fn operand_u64(&mut self, at: usize) -> VmResult<u64> {
        self.operand(at, 8, Program::read_u64)
    }

    fn jump_target(&mut self, at: usize) -> VmResult<usize> {
        Ok(self.operand_u16(at)? as usize)
    }

    /// Decodes `type tag, slot, global` and returns the slot index and its integer width.
    fn slot_operands(&mut self, at: usize) -> VmResult<(usize, Option<u32>)> {
        let tag = self.operand_u8(at)?;
        let addr = self.operand_u16(at)? as usize;
        let global = self.operand_u8(at)? != 0;
        let ty = Type::from_tag(tag).ok_or(VmError::BadTypeTag { tag, ip: at })?;
        let index = if global { addr } else { self.bp + addr };
        if index >= self.sp {
            return Err(VmError::BadSlot { slot: index, ip: at });
        }
        Ok((index, ty.is_integer().then(|| ty.width())))
    }

    fn string(&self, offset: i64) -> VmResult<&'p str> {
        usize::try_from(offset)
            .ok()
            .and_then(|o| self.program.string_at(o))
            .ok_or(VmError::BadString { offset })
    }

    // ---- Dispatch ----

    /// Executes one instruction.
    pub fn step(&mut self) -> VmResult<()> {
        if let Some(limit) = self.config.max_steps {
            if self.steps >= limit {
                return Err(VmError::StepLimit { limit });
            }
        }
        let at = self.ip;
        let op = self.program.read_u8(at).ok_or(VmError::RanOffEnd { ip: at })?;
        self.ip += 1;
        self.steps += 1;
        trace!(ip = at, op = info(op).map_or("??", |i| i.name), sp = self.sp, bp = self.bp);

        match op {
            OP_HALT => self.halted = true,

            OP_ICONST_0 => self.push(Slot::int(0))?,
            OP_ICONST_1 => self.push(Slot::int(1))?,
            OP_I8CONST => {
                let v = self.operand_u8(at)? as i8;
                self.push(Slot::int(v as i64))?
            }
            OP_I16CONST => {
                let v = self.operand_u16(at)? as i16;
                self.push(Slot::int(v as i64))?
            }
            OP_I32CONST => {
                let v = self.operand_u32(at)? as i32;
                self.push(Slot::int(v as i64))?
            }
            OP_ICONST => {
                let v = self.operand_u64(at)? as i64;
                self.push(Slot::int(v))?
            }

            OP_I8CAST => self.int_unary(|a| truncate(a, 8))?,
            OP_I16CAST => self.int_unary(|a| truncate(a, 16))?,
            OP_I32CAST => self.int_unary(|a| truncate(a, 32))?,

            OP_INEG => self.int_unary(i64::wrapping_neg)?,
            OP_IABS => self.int_unary(i64::wrapping_abs)?,
            OP_INOT => self.int_unary(|a| (a == 0) as i64)?,
            OP_IADD => self.int_binary(i64::wrapping_add)?,
            OP_ISUB => self.int_binary(i64::wrapping_sub)?,
            OP_IMUL => self.int_binary(i64::wrapping_mul)?,
            OP_IDIV => self.int_divide(at, i64::wrapping_div)?,
            OP_IMOD => self.int_divide(at, i64::wrapping_rem)?,
            OP_IBAND => self.int_binary(|a, b| a & b)?,
            OP_IBOR => self.int_binary(|a, b| a | b)?,
            OP_IBXOR => self.int_binary(|a, b| a ^ b)?,
            OP_IAND => self.int_compare(|a, b| a != 0 && b != 0)?,
            OP_IOR => self.int_compare(|a, b| a != 0 || b != 0)?,
            OP_IEQ => self.int_compare(|a, b| a == b)?,
            OP_INQ => self.int_compare(|a, b| a != b)?,
            OP_ILT => self.int_compare(|a, b| a < b)?,
            OP_ILE => self.int_compare(|a, b| a <= b)?,
            OP_IGT => self.int_compare(|a, b| a > b)?,
            OP_IGE => self.int_compare(|a, b| a >= b)?,
            OP_IPRINT => {
                let v = self.pop_int()?;
                write!(self.out, "{v}")?;
            }

            OP_RCONST => {
                let bits = self.operand_u64(at)?;
                self.push(Slot(bits))?
            }
            OP_RCONST_0 => self.push(Slot::real(0.0))?,
            OP_RCONST_1 => self.push(Slot::real(1.0))?,
            OP_RCONST_PI => self.push(Slot::real(std::f64::consts::PI))?,

            OP_RNEG => self.real_unary(|a| -a)?,
            OP_RABS => self.real_unary(f64::abs)?,
            OP_RADD => self.real_binary(|a, b| a + b)?,
            OP_RSUB => self.real_binary(|a, b| a - b)?,
            OP_RMUL => self.real_binary(|a, b| a * b)?,
            OP_RDIV => self.real_binary(|a, b| a / b)?,
            OP_RMOD => self.real_binary(|a, b| a % b)?,
            OP_RPOW => self.real_binary(f64::powf)?,
            OP_RSQRT => self.real_unary(f64::sqrt)?,
            OP_REXP => self.real_unary(f64::exp)?,
            OP_RSIN => self.real_unary(f64::sin)?,
            OP_RCOS => self.real_unary(f64::cos)?,
            OP_RTAN => self.real_unary(f64::tan)?,
            OP_RACOS => self.real_unary(f64::acos)?,
            OP_RATAN2 => self.real_binary(f64::atan2)?,
            OP_RLOG => self.real_unary(f64::ln)?,
            OP_RLOG10 => self.real_unary(f64::log10)?,
            OP_RLOG2 => self.real_unary(f64::log2)?,
            OP_RCEIL => self.real_unary(f64::ceil)?,
            OP_RFLOOR => self.real_unary(f64::floor)?,
            OP_RROUND => self.real_unary(f64::round)?,
            OP_REQ => self.real_compare(|a, b| a == b)?,
            OP_RNQ => self.real_compare(|a, b| a != b)?,
            OP_RLT => self.real_compare(|a, b| a < b)?,
            OP_RLE => self.real_compare(|a, b| a <= b)?,
            OP_RGT => self.real_compare(|a, b| a > b)?,
            OP_RGE => self.real_compare(|a, b| a >= b)?,
            OP_RPRINT => {
                let v = self.pop_real()?;
                write!(self.out, "{v:.6}")?;
            }

            OP_SCONST => {
                let offset = self.operand_u16(at)?;
                self.push(Slot::int(offset as i64))?
            }
            OP_SPRINT => {
                let offset = self.pop_int()?;
                let s = self.string(offset)?;
                self.out.write_all(s.as_bytes())?;
            }
            OP_SLEN => {
                let offset = self.pop_int()?;
                let len = self.string(offset)?.chars().count();
                self.push(Slot::int(len as i64))?
            }

            OP_LOAD => {
                let (index, width) = self.slot_operands(at)?;
                let raw = self.stack[index];
                let v = match width {
                    Some(bits) => Slot::int(truncate(raw.as_int(), bits)),
                    None => raw,
                };
                self.push(v)?
            }
            OP_STORE => {
                let v = self.pop()?;
                let (index, width) = self.slot_operands(at)?;
                self.stack[index] = match width {
                    Some(bits) => Slot::int(truncate(v.as_int(), bits)),
                    None => v,
                };
            }
            OP_DROP => {
                self.pop()?;
            }

            OP_PROC => {
                let args = self.operand_u16(at)? as usize;
                let locals = self.operand_u16(at)? as usize;
                let saved_bp = self.pop()?;
                let ret_ip = self.pop()?;
                for _ in 0..locals {
                    self.push(Slot::default())?;
                }
                let size = args + locals;
                self.push(ret_ip)?;
                self.push(saved_bp)?;
                self.push(Slot::int(size as i64))?;
                self.bp = self
                    .sp
                    .checked_sub(size + 3)
                    .ok_or(VmError::StackUnderflow { ip: at })?;
            }
            OP_CALL => {
                let entry = self.jump_target(at)?;
                self.push(Slot::int(self.ip as i64))?;
                self.push(Slot::int(self.bp as i64))?;
                self.ip = entry;
            }
            OP_RET => {
                let value = self.pop()?;
                let size = self.pop_int()? as usize;
                let saved_bp = self.pop_int()? as usize;
                let ret_ip = self.pop_int()? as usize;
                self.sp = self
                    .sp
                    .checked_sub(size)
                    .ok_or(VmError::StackUnderflow { ip: at })?;
                self.bp = saved_bp;
                self.ip = ret_ip;
                self.push(value)?;
            }

            OP_JMP => self.ip = self.jump_target(at)?,
            OP_JEZ => {
                let target = self.jump_target(at)?;
                if self.pop_int()? == 0 {
                    self.ip = target;
                }
            }

            _ => return Err(VmError::UnknownOpcode { op, ip: at }),
        }
        Ok(())
    }
}

/// Runs `program` to completion, writing printed output to `out`.
pub fn run<W: Write>(program: &Program, out: W, config: VmConfig) -> VmResult<W> {
    let mut vm = Vm::with_config(program, out, config);
    vm.run()?;
    Ok(vm.into_output())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asm(f: impl FnOnce(&mut Program)) -> Program {
        let mut p = Program::new();
        f(&mut p);
        p
    }

    fn output(program: &Program) -> String {
        let out = run(program, Vec::new(), VmConfig::default()).unwrap();
        String::from_utf8(out).unwrap()
    }

    fn int_op(a: i64, b: i64, op: u8) -> String {
        output(&asm(|p| {
            p.emit(OP_ICONST);
            p.emit_u64(a as u64);
            p.emit(OP_ICONST);
            p.emit_u64(b as u64);
            p.emit(op);
            p.emit(OP_IPRINT);
            p.emit(OP_HALT);
        }))
    }

    #[test]
    fn halts_on_halt() {
        let p = asm(|p| p.emit(OP_HALT));
        let mut vm = Vm::new(&p, Vec::new());
        vm.run().unwrap();
        assert!(vm.is_halted());
        assert_eq!(vm.steps(), 1);
    }

    #[test]
    fn running_off_the_end_is_an_error() {
        let p = asm(|p| p.emit(OP_ICONST_0));
        let err = run(&p, Vec::new(), VmConfig::default()).unwrap_err();
        assert!(matches!(err, VmError::RanOffEnd { ip: 1 }));
    }

    #[test]
    fn unknown_opcode_is_fatal() {
        let p = Program { code: vec![0xee], data: vec![] };
        let err = run(&p, Vec::new(), VmConfig::default()).unwrap_err();
        assert!(matches!(err, VmError::UnknownOpcode { op: 0xee, ip: 0 }));
    }

    #[test]
    fn truncated_operand_is_fatal() {
        let p = Program { code: vec![OP_I16CONST, 1], data: vec![] };
        let err = run(&p, Vec::new(), VmConfig::default()).unwrap_err();
        assert!(matches!(err, VmError::TruncatedInstruction { ip: 0 }));
    }

    #[test]
    fn integer_division_truncates_toward_zero() {
        assert_eq!(int_op(-10, 3, OP_IDIV), "-3");
        assert_eq!(int_op(-10, 3, OP_IMOD), "-1");
        assert_eq!(int_op(10, -3, OP_IMOD), "1");
        assert_eq!(int_op(i64::MIN, -1, OP_IDIV), i64::MIN.to_string());
    }

    #[test]
    fn division_by_zero_is_reported() {
        let p = asm(|p| {
            p.emit(OP_ICONST_1);
            p.emit(OP_ICONST_0);
            p.emit(OP_IMOD);
            p.emit(OP_HALT);
        });
        let err = run(&p, Vec::new(), VmConfig::default()).unwrap_err();
        assert!(matches!(err, VmError::DivisionByZero { ip: 2 }));
    }

    #[test]
    fn bitwise_and_logical_ops() {
        assert_eq!(int_op(5, 3, OP_IBAND), "1");
        assert_eq!(int_op(5, 3, OP_IBOR), "7");
        assert_eq!(int_op(5, 3, OP_IBXOR), "6");
        assert_eq!(int_op(5, 3, OP_IAND), "1");
        assert_eq!(int_op(0, 3, OP_IAND), "0");
        assert_eq!(int_op(0, 0, OP_IOR), "0");
        assert_eq!(int_op(i64::MAX, 1, OP_IADD), i64::MIN.to_string());
    }

    #[test]
    fn narrow_constants_sign_extend() {
        let p = asm(|p| {
            p.emit(OP_I8CONST);
            p.emit(0x80);
            p.emit(OP_IPRINT);
            p.emit(OP_I16CONST);
            p.emit_u16(0xffff);
            p.emit(OP_IPRINT);
            p.emit(OP_HALT);
        });
        assert_eq!(output(&p), "-128-1");
    }

    #[test]
    fn real_print_uses_six_decimals() {
        let p = asm(|p| {
            p.emit(OP_RCONST_PI);
            p.emit(OP_RPRINT);
            p.emit(OP_RCONST);
            p.emit_u64(10.5f64.to_bits());
            p.emit(OP_RCONST);
            p.emit_u64(3.0f64.to_bits());
            p.emit(OP_RMOD);
            p.emit(OP_RPRINT);
            p.emit(OP_HALT);
        });
        assert_eq!(output(&p), "3.1415931.500000");
    }

    #[test]
    fn strings_print_and_measure_codepoints() {
        let mut p = Program::new();
        let off = p.intern("世界").unwrap();
        p.emit(OP_SCONST);
        p.emit_u16(off);
        p.emit(OP_SPRINT);
        p.emit(OP_SCONST);
        p.emit_u16(off);
        p.emit(OP_SLEN);
        p.emit(OP_IPRINT);
        p.emit(OP_HALT);
        assert_eq!(output(&p), "世界2");
    }

    #[test]
    fn store_truncates_and_load_sign_extends() {
        let p = asm(|p| {
            // global frame with one slot
            p.emit(OP_ICONST_0);
            p.emit(OP_ICONST_0);
            p.emit(OP_PROC);
            p.emit_u16(0);
            p.emit_u16(1);
            p.emit(OP_I16CONST);
            p.emit_u16(300);
            p.emit(OP_STORE);
            p.emit(Type::Int8.tag());
            p.emit_u16(0);
            p.emit(1);
            p.emit(OP_LOAD);
            p.emit(Type::Int8.tag());
            p.emit_u16(0);
            p.emit(1);
            p.emit(OP_IPRINT);
            p.emit(OP_HALT);
        });
        assert_eq!(output(&p), "44");
    }

    #[test]
    fn call_and_return_collapse_the_frame() {
        // f(a) = a + a, called with 21
        let p = asm(|p| {
            p.emit(OP_ICONST_0);
            p.emit(OP_ICONST_0);
            p.emit(OP_PROC);
            p.emit_u16(0);
            p.emit_u16(0);
            p.emit(OP_I8CONST); // 7
            p.emit(21);
            p.emit(OP_CALL); // 9
            p.emit_u16(14);
            p.emit(OP_IPRINT); // 12
            p.emit(OP_HALT); // 13
            p.emit(OP_PROC); // 14
            p.emit_u16(1);
            p.emit_u16(0);
            for _ in 0..2 {
                p.emit(OP_LOAD);
                p.emit(Type::Int64.tag());
                p.emit_u16(0);
                p.emit(0);
            }
            p.emit(OP_IADD);
            p.emit(OP_RET);
        });
        let mut vm = Vm::new(&p, Vec::new());
        vm.run().unwrap();
        assert_eq!(vm.sp, 3);
        assert_eq!(vm.bp, 0);
        assert_eq!(String::from_utf8(vm.into_output()).unwrap(), "42");
    }

    #[test]
    fn stack_overflow_detected() {
        let p = asm(|p| {
            p.emit(OP_ICONST_0);
            p.emit(OP_JMP);
            p.emit_u16(0);
        });
        let config = VmConfig { stack_size: 16, max_steps: None };
        let err = run(&p, Vec::new(), config).unwrap_err();
        assert!(matches!(err, VmError::StackOverflow { capacity: 16 }));
    }

    #[test]
    fn step_limit_stops_infinite_loops() {
        let p = asm(|p| {
            p.emit(OP_JMP);
            p.emit_u16(0);
        });
        let config = VmConfig { max_steps: Some(100), ..VmConfig::default() };
        let err = run(&p, Vec::new(), config).unwrap_err();
        assert!(matches!(err, VmError::StepLimit { limit: 100 }));
    }

    #[test]
    fn underflow_detected() {
        let p = asm(|p| p.emit(OP_DROP));
        let err = run(&p, Vec::new(), VmConfig::default()).unwrap_err();
        assert!(matches!(err, VmError::StackUnderflow { .. }));
    }
}
