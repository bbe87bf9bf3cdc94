//! Pending slow-case sites handed from the fast-path pass to the slow-path
//! pass.
//!
//! The fast pass appends one entry per branch into the slow path, in the
//! order the slow path will link them. The slow pass takes the whole group
//! for an instruction up front; any disagreement in offset, opcode, shape or
//! count aborts compilation.

use super::error::JitError;
use super::masm::{Jump, MacroAssembler};
use super::operands::Shape;
use crate::vm::Opcode;
use std::collections::VecDeque;

#[derive(Debug)]
pub enum Site {
    Jump(Jump),
    /// Placeholder for an instruction whose fast path already called the
    /// runtime.
    Dummy,
}

#[derive(Debug)]
pub struct SlowCaseEntry {
    pub bytecode_offset: u32,
    pub opcode: Opcode,
    pub shape: Shape,
    site: Site,
}

#[derive(Debug, Default)]
pub struct SlowCaseQueue {
    entries: VecDeque<SlowCaseEntry>,
}

impl SlowCaseQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytecode_offset: u32, opcode: Opcode, shape: Shape, site: Site) {
        self.entries.push_back(SlowCaseEntry {
            bytecode_offset,
            opcode,
            shape,
            site,
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of queued sites for an offset.
    pub fn count_for(&self, bytecode_offset: u32) -> usize {
        self.entries
            .iter()
            .filter(|e| e.bytecode_offset == bytecode_offset)
            .count()
    }

    fn mismatch(bytecode_offset: u32, opcode: Opcode, detail: String) -> JitError {
        JitError::SlowCaseMismatch {
            bytecode_offset,
            opcode,
            detail,
        }
    }

    /// Take the `expected` sites recorded for an instruction.
    pub fn take_group(
        &mut self,
        bytecode_offset: u32,
        opcode: Opcode,
        shape: Shape,
        expected: usize,
    ) -> Result<SlowCaseGroup, JitError> {
        let mut sites = VecDeque::with_capacity(expected);
        for taken in 0..expected {
            let entry = self.entries.pop_front().ok_or_else(|| {
                Self::mismatch(
                    bytecode_offset,
                    opcode,
                    format!("expected {} site(s), queue ran dry after {}", expected, taken),
                )
            })?;
            if entry.bytecode_offset != bytecode_offset {
                return Err(Self::mismatch(
                    bytecode_offset,
                    opcode,
                    format!(
                        "expected {} site(s), found only {} before bytecode {}",
                        expected, taken, entry.bytecode_offset
                    ),
                ));
            }
            if entry.opcode != opcode || entry.shape != shape {
                return Err(Self::mismatch(
                    bytecode_offset,
                    opcode,
                    format!(
                        "site recorded as {} {}, consumed as {} {}",
                        entry.opcode, entry.shape, opcode, shape
                    ),
                ));
            }
            sites.push_back(entry.site);
        }
        if let Some(next) = self.entries.front() {
            if next.bytecode_offset == bytecode_offset {
                return Err(Self::mismatch(
                    bytecode_offset,
                    opcode,
                    format!(
                        "{} site(s) recorded, {} consumed",
                        expected + self.count_for(bytecode_offset),
                        expected
                    ),
                ));
            }
        }
        Ok(SlowCaseGroup {
            bytecode_offset,
            opcode,
            sites,
        })
    }

    /// Check that every site was consumed.
    pub fn finish(self) -> Result<(), JitError> {
        match self.entries.front() {
            None => Ok(()),
            Some(first) => Err(JitError::SlowCasesLeftOver {
                remaining: self.entries.len(),
                first_offset: first.bytecode_offset,
            }),
        }
    }
}

/// The sites of one instruction, consumed in recording order.
#[derive(Debug)]
pub struct SlowCaseGroup {
    bytecode_offset: u32,
    opcode: Opcode,
    sites: VecDeque<Site>,
}

impl SlowCaseGroup {
    fn next(&mut self) -> Result<Site, JitError> {
        self.sites.pop_front().ok_or_else(|| {
            SlowCaseQueue::mismatch(
                self.bytecode_offset,
                self.opcode,
                "slow path consumed more sites than were recorded".to_string(),
            )
        })
    }

    /// Take the next site as a jump, to be linked later.
    pub fn take(&mut self) -> Result<Jump, JitError> {
        match self.next()? {
            Site::Jump(jump) => Ok(jump),
            Site::Dummy => Err(SlowCaseQueue::mismatch(
                self.bytecode_offset,
                self.opcode,
                "expected a jump site, found a placeholder".to_string(),
            )),
        }
    }

    /// Link the next site to the current position.
    pub fn link(&mut self, masm: &mut MacroAssembler) -> Result<(), JitError> {
        let jump = self.take()?;
        jump.link(masm);
        Ok(())
    }

    /// Consume a placeholder site.
    pub fn link_dummy(&mut self) -> Result<(), JitError> {
        match self.next()? {
            Site::Dummy => Ok(()),
            Site::Jump(_) => Err(SlowCaseQueue::mismatch(
                self.bytecode_offset,
                self.opcode,
                "expected a placeholder, found a jump site".to_string(),
            )),
        }
    }

    pub fn remaining(&self) -> usize {
        self.sites.len()
    }

    /// Check that the slow path consumed the whole group.
    pub fn finish(self) -> Result<(), JitError> {
        if self.sites.is_empty() {
            Ok(())
        } else {
            Err(SlowCaseQueue::mismatch(
                self.bytecode_offset,
                self.opcode,
                format!("{} site(s) left unconsumed", self.sites.len()),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jit::operands::ArithShape;
    use crate::vm::ArithOp;

    fn jump(masm: &mut MacroAssembler) -> Site {
        Site::Jump(masm.jump())
    }

    #[test]
    fn test_fifo_groups() {
        let mut masm = MacroAssembler::new();
        let mut queue = SlowCaseQueue::new();
        queue.push(0, Opcode::Inc, Shape::Inc, jump(&mut masm));
        queue.push(0, Opcode::Inc, Shape::Inc, jump(&mut masm));
        queue.push(1, Opcode::Negate, Shape::Negate, jump(&mut masm));
        queue.push(1, Opcode::Negate, Shape::Negate, jump(&mut masm));

        let mut group = queue.take_group(0, Opcode::Inc, Shape::Inc, 2).unwrap();
        group.link(&mut masm).unwrap();
        group.link(&mut masm).unwrap();
        group.finish().unwrap();
        let mut group = queue.take_group(1, Opcode::Negate, Shape::Negate, 2).unwrap();
        group.link(&mut masm).unwrap();
        group.link(&mut masm).unwrap();
        group.finish().unwrap();
        queue.finish().unwrap();
        masm.ret();
        masm.finalize().unwrap();
    }

    #[test]
    fn test_under_consumption_is_detected() {
        let mut masm = MacroAssembler::new();
        let mut queue = SlowCaseQueue::new();
        queue.push(0, Opcode::Inc, Shape::Inc, jump(&mut masm));
        queue.push(0, Opcode::Inc, Shape::Inc, jump(&mut masm));
        let err = queue.take_group(0, Opcode::Inc, Shape::Inc, 1).unwrap_err();
        assert!(matches!(err, JitError::SlowCaseMismatch { bytecode_offset: 0, .. }));
    }

    #[test]
    fn test_over_consumption_is_detected() {
        let mut masm = MacroAssembler::new();
        let mut queue = SlowCaseQueue::new();
        queue.push(0, Opcode::Inc, Shape::Inc, jump(&mut masm));
        queue.push(1, Opcode::Dec, Shape::Dec, jump(&mut masm));
        assert!(queue.take_group(0, Opcode::Inc, Shape::Inc, 2).is_err());
    }

    #[test]
    fn test_shape_disagreement_is_detected() {
        let mut masm = MacroAssembler::new();
        let mut queue = SlowCaseQueue::new();
        queue.push(0, Opcode::Inc, Shape::Inc, jump(&mut masm));
        assert!(queue.take_group(0, Opcode::Inc, Shape::Dec, 1).is_err());
    }

    #[test]
    fn test_group_must_be_drained() {
        let mut masm = MacroAssembler::new();
        let mut queue = SlowCaseQueue::new();
        queue.push(0, Opcode::Inc, Shape::Inc, jump(&mut masm));
        let group = queue.take_group(0, Opcode::Inc, Shape::Inc, 1).unwrap();
        assert_eq!(group.remaining(), 1);
        assert!(group.finish().is_err());
    }

    #[test]
    fn test_dummy_sites() {
        let shape = Shape::Arith(ArithOp::Add, ArithShape::Generic);
        let mut queue = SlowCaseQueue::new();
        queue.push(3, Opcode::Add, shape, Site::Dummy);
        queue.push(4, Opcode::Add, shape, Site::Dummy);
        let mut group = queue.take_group(3, Opcode::Add, shape, 1).unwrap();
        group.link_dummy().unwrap();
        group.finish().unwrap();
        let mut group = queue.take_group(4, Opcode::Add, shape, 1).unwrap();
        assert!(group.take().is_err());
    }

    #[test]
    fn test_leftovers_are_reported() {
        let mut masm = MacroAssembler::new();
        let mut queue = SlowCaseQueue::new();
        queue.push(4, Opcode::Dec, Shape::Dec, jump(&mut masm));
        assert_eq!(
            queue.finish(),
            Err(JitError::SlowCasesLeftOver {
                remaining: 1,
                first_offset: 4
            })
        );
    }
}
