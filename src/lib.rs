//! mirza: a small statically typed language compiled to a 64-bit stack machine.
//!
//! The pipeline is `lexer` → `parser` (which also fills the scope table) →
//! `codegen` → `vm`. Each phase stops at its first error.

pub mod ast;
pub mod builtin;
pub mod bytecode;
pub mod codegen;
pub mod diagnostic;
pub mod jump;
pub mod lexer;
pub mod parser;
pub mod scope;
pub mod vm;

use std::io::Write;

pub use bytecode::Program;
pub use vm::{VmConfig, VmError};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Lex(#[from] lexer::LexError),
    #[error(transparent)]
    Parse(#[from] parser::ParseError),
    #[error(transparent)]
    Gen(#[from] codegen::GenError),
    #[error(transparent)]
    Vm(#[from] vm::VmError),
}

impl Error {
    pub fn code(&self) -> &'static str {
        match self {
            Error::Lex(e) => e.code(),
            Error::Parse(e) => e.code,
            Error::Gen(e) => e.code(),
            Error::Vm(e) => e.code(),
        }
    }
}

/// Parses `source` without generating code.
pub fn parse(source: &str) -> Result<ast::Module, Error> {
    let tokens = lexer::lex(source)?;
    Ok(parser::parse(tokens)?)
}

/// Compiles `source` into a runnable program.
pub fn compile(source: &str) -> Result<Program, Error> {
    let module = parse(source)?;
    Ok(codegen::generate(module)?)
}

/// Runs a compiled program, writing everything it prints to `out`.
pub fn run<W: Write>(program: &Program, out: W, config: VmConfig) -> Result<W, Error> {
    Ok(vm::run(program, out, config)?)
}

pub fn compile_and_run<W: Write>(source: &str, out: W, config: VmConfig) -> Result<W, Error> {
    let program = compile(source)?;
    run(&program, out, config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(source: &str) -> String {
        let out = compile_and_run(source, Vec::new(), VmConfig::default()).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn pipeline_prints() {
        assert_eq!(output("print 2 + 3 * 4"), "14");
    }

    #[test]
    fn errors_carry_phase_codes() {
        assert_eq!(compile("print 'x'").unwrap_err().code(), "MZ-L004");
        assert_eq!(compile("print y").unwrap_err().code(), "MZ-P004");
        assert_eq!(compile("break").unwrap_err().code(), "MZ-G008");
        let err = compile_and_run("var z = 0\nprint 1 / z", Vec::new(), VmConfig::default())
            .unwrap_err();
        assert_eq!(err.code(), "MZ-R001");
    }

    #[test]
    fn step_limit_is_enforced() {
        let config = VmConfig { max_steps: Some(50), ..VmConfig::default() };
        let err = compile_and_run("for ; 1 ; { }", Vec::new(), config).unwrap_err();
        assert!(matches!(err, Error::Vm(VmError::StepLimit { limit: 50 })));
    }
}
