//! Code buffer for building machine code.
//!
//! Labels are numbered positions in the macro-instruction stream. Branches
//! to labels are emitted as rel32 placeholders and patched once every label
//! has been defined.

use super::error::JitError;
use std::collections::HashMap;

/// A buffer for building machine code.
#[derive(Debug, Default)]
pub struct CodeBuffer {
    code: Vec<u8>,
    /// Label id -> byte offset
    labels: HashMap<usize, usize>,
    /// Pending rel32 references (offset of the placeholder, label id)
    forward_refs: Vec<(usize, usize)>,
}

impl CodeBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            code: Vec::with_capacity(capacity),
            ..Self::default()
        }
    }

    /// Get the current offset (for labels).
    pub fn offset(&self) -> usize {
        self.code.len()
    }

    pub fn emit_u8(&mut self, byte: u8) {
        self.code.push(byte);
    }

    /// Emit a 32-bit value (little-endian).
    pub fn emit_u32(&mut self, value: u32) {
        self.code.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a 64-bit value (little-endian).
    pub fn emit_u64(&mut self, value: u64) {
        self.code.extend_from_slice(&value.to_le_bytes());
    }

    /// Define a label at the current position.
    pub fn define_label(&mut self, label: usize) {
        self.labels.insert(label, self.code.len());
    }

    /// Emit a rel32 placeholder for a branch to `label`.
    pub fn emit_forward_ref(&mut self, label: usize) {
        let offset = self.code.len();
        self.forward_refs.push((offset, label));
        self.emit_u32(0);
    }

    /// Patch all forward references.
    pub fn patch_forward_refs(&mut self) -> Result<(), JitError> {
        for (offset, label) in self.forward_refs.drain(..) {
            let target = *self
                .labels
                .get(&label)
                .ok_or(JitError::UnlinkedJump { label })?;
            // Relative to the end of the placeholder
            let rel = (target as i64) - (offset as i64 + 4);
            let rel = i32::try_from(rel).map_err(|_| JitError::BranchOutOfRange { label })?;
            self.code[offset..offset + 4].copy_from_slice(&rel.to_le_bytes());
        }
        Ok(())
    }

    /// Patch references and return the finished bytes.
    pub fn finalize(mut self) -> Result<Vec<u8>, JitError> {
        self.patch_forward_refs()?;
        Ok(self.code)
    }
}
