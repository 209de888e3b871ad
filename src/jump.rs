//! Forward and backward jump labels over a growing code buffer.
//!
//! A label collects the offsets of 16-bit placeholders that refer to it,
//! learns its target once, and rewrites every placeholder in one pass.

use crate::bytecode::{ADDRESS_SPACE, Program};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JumpError {
    #[error("jump label patched before its target was resolved")]
    Unresolved,
    #[error("jump label resolved twice")]
    AlreadyResolved,
    #[error("jump target {offset:#x} does not fit a 16-bit code address")]
    OutOfRange { offset: usize },
    #[error("jump placeholder at {at:#x} lies outside the code buffer")]
    BadReference { at: usize },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Jump {
    target: Option<u16>,
    refs: Vec<usize>,
}

impl Jump {
    pub fn new() -> Self {
        Jump::default()
    }

    /// Emits a zero placeholder operand at the current offset and remembers it.
    pub fn reference(&mut self, program: &mut Program) {
        self.refs.push(program.addr());
        program.emit_u16(0);
    }

    /// Pins the label to the current end of `program`.
    pub fn resolve(&mut self, program: &Program) -> Result<(), JumpError> {
        if self.target.is_some() {
            return Err(JumpError::AlreadyResolved);
        }
        let offset = program.addr();
        if offset >= ADDRESS_SPACE {
            return Err(JumpError::OutOfRange { offset });
        }
        self.target = Some(offset as u16);
        Ok(())
    }

    /// Writes the target into every recorded placeholder.
    pub fn patch(&self, program: &mut Program) -> Result<(), JumpError> {
        let target = self.target.ok_or(JumpError::Unresolved)?;
        for &at in &self.refs {
            if !program.patch_u16(at, target) {
                return Err(JumpError::BadReference { at });
            }
        }
        Ok(())
    }

    pub fn target(&self) -> Option<u16> {
        self.target
    }

    pub fn references(&self) -> &[usize] {
        &self.refs
    }
}
