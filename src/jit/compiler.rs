//! Two-pass baseline compiler for arithmetic and relational bytecode.
//!
//! Pass one walks the method in order and emits the optimistic fast path of
//! every instruction, queueing each branch into a slow path. Pass two walks
//! the method again and, for each instruction, links exactly the queued
//! branches into out-of-line code that retries in double arithmetic or calls
//! the runtime, then jumps back to the next instruction.

use super::error::JitError;
use super::masm::{Code, Gpr, Jump, Label, MacroAssembler, Operand64, RelationalCondition, ResultCondition};
use super::operands::{select_shape, ArithShape, OperandClassifier, Shape};
use super::slow_cases::{Site, SlowCaseQueue};
use crate::config::JitConfig;
use crate::vm::{CodeBlock, CounterKind, Opcode, ProfileTable, VirtualRegister, TAG_TYPE_NUMBER};

/// Slow-case summary of one instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct InstructionSites {
    pub bytecode_offset: u32,
    pub opcode: Opcode,
    pub shape: Shape,
    pub sites: usize,
}

/// The result of compiling one method.
#[derive(Debug)]
pub struct CompiledMethod {
    pub name: String,
    pub code: Code,
    /// Counters written by the generated code.
    pub profile: ProfileTable,
    /// Entry label of every instruction, followed by the method exit.
    pub bytecode_labels: Vec<Label>,
    pub sites: Vec<InstructionSites>,
}

impl CompiledMethod {
    /// Position in `code` where an instruction's fast path starts.
    pub fn bytecode_position(&self, bytecode_offset: u32) -> Option<usize> {
        let label = *self.bytecode_labels.get(bytecode_offset as usize)?;
        self.code.position(label)
    }

    pub fn slow_case_count(&self) -> usize {
        self.sites.iter().map(|s| s.sites).sum()
    }
}

/// Compile a method.
pub fn compile(block: &CodeBlock, config: &JitConfig) -> Result<CompiledMethod, JitError> {
    JitCompiler::new(block, config).compile()
}

/// Compiler state for one method.
pub struct JitCompiler<'a> {
    pub(super) block: &'a CodeBlock,
    pub(super) config: &'a JitConfig,
    pub(super) classifier: OperandClassifier<'a>,
    pub(super) masm: MacroAssembler,
    slow_cases: SlowCaseQueue,
    labels: Vec<Label>,
    pub(super) bytecode_offset: u32,
}

impl<'a> JitCompiler<'a> {
    pub fn new(block: &'a CodeBlock, config: &'a JitConfig) -> Self {
        let mut masm = MacroAssembler::new();
        let labels = (0..=block.instructions.len())
            .map(|_| masm.new_label())
            .collect();
        Self {
            block,
            config,
            classifier: OperandClassifier::new(block),
            masm,
            slow_cases: SlowCaseQueue::new(),
            labels,
            bytecode_offset: 0,
        }
    }

    pub fn compile(mut self) -> Result<CompiledMethod, JitError> {
        validate(self.block)?;
        let profile = ProfileTable::new(self.block.instructions.len());

        let sites = self.private_compile_main_pass()?;
        let exit = self.labels[self.block.instructions.len()];
        self.masm.bind(exit);
        self.masm.ret();

        let queued = self.slow_cases.len();
        self.private_compile_slow_cases()?;
        let slow_cases = std::mem::take(&mut self.slow_cases);
        slow_cases.finish()?;

        let code = self.masm.finalize()?;
        tracing::debug!(
            method = %self.block.name,
            instructions = self.block.instructions.len(),
            slow_cases = queued,
            insns = code.len(),
            "compiled method"
        );
        Ok(CompiledMethod {
            name: self.block.name.clone(),
            code,
            profile,
            bytecode_labels: self.labels,
            sites,
        })
    }

    fn private_compile_main_pass(&mut self) -> Result<Vec<InstructionSites>, JitError> {
        let block = self.block;
        let mut sites = Vec::with_capacity(block.instructions.len());
        for (offset, instruction) in block.instructions.iter().enumerate() {
            let offset = offset as u32;
            self.masm.bind(self.labels[offset as usize]);
            self.bytecode_offset = offset;
            let opcode = instruction.opcode();
            let shape = select_shape(&self.classifier, instruction, &self.config.capabilities);

            let before = self.slow_cases.len();
            self.emit_fast(instruction, shape)?;
            let recorded = self.slow_cases.len() - before;
            if recorded != shape.site_count() {
                return Err(JitError::SlowCaseMismatch {
                    bytecode_offset: offset,
                    opcode,
                    detail: format!(
                        "fast path recorded {} site(s), shape {} has {}",
                        recorded,
                        shape,
                        shape.site_count()
                    ),
                });
            }
            tracing::trace!(offset, %opcode, %shape, sites = recorded, "fast path");
            sites.push(InstructionSites {
                bytecode_offset: offset,
                opcode,
                shape,
                sites: recorded,
            });
        }
        Ok(sites)
    }

    fn private_compile_slow_cases(&mut self) -> Result<(), JitError> {
        let block = self.block;
        for (offset, instruction) in block.instructions.iter().enumerate() {
            let offset = offset as u32;
            self.bytecode_offset = offset;
            let opcode = instruction.opcode();
            let shape = select_shape(&self.classifier, instruction, &self.config.capabilities);
            let expected = shape.site_count();
            let mut group = self.slow_cases.take_group(offset, opcode, shape, expected)?;
            if expected == 0 {
                continue;
            }

            self.emit_slow(instruction, shape, &mut group)?;
            group.finish()?;

            match shape {
                // The fast path already called the runtime; nothing jumps here.
                Shape::Arith(_, ArithShape::Generic) => continue,
                // Relational slow paths count themselves before their jumps.
                Shape::Compare(_) => {}
                _ => self.emit_slow_case_counter(),
            }
            let back = self.masm.jump();
            self.emit_jump_slow_to_hot(back, offset + 1);
        }
        Ok(())
    }

    // ==================== Slow-case bookkeeping ====================

    /// Opcode and shape of the instruction being emitted.
    fn current(&self) -> (Opcode, Shape) {
        let instruction = &self.block.instructions[self.bytecode_offset as usize];
        let shape = select_shape(&self.classifier, instruction, &self.config.capabilities);
        (instruction.opcode(), shape)
    }

    /// Queue a branch into the current instruction's slow path.
    pub(super) fn add_slow_case(&mut self, jump: Jump) {
        let (opcode, shape) = self.current();
        self.slow_cases
            .push(self.bytecode_offset, opcode, shape, Site::Jump(jump));
    }

    /// Queue a placeholder for a fast path that already called the runtime.
    pub(super) fn add_dummy_slow_case(&mut self) {
        let (opcode, shape) = self.current();
        self.slow_cases
            .push(self.bytecode_offset, opcode, shape, Site::Dummy);
    }

    /// Count an entry into the current instruction's slow path.
    pub(super) fn emit_slow_case_counter(&mut self) {
        if self.config.emit_profiling {
            self.masm
                .increment_counter(CounterKind::SlowCase, self.bytecode_offset);
        }
    }

    /// Land a fast-path jump on the start of a bytecode instruction.
    pub(super) fn add_jump(&mut self, jump: Jump, target: u32) {
        jump.link_to(&mut self.masm, self.labels[target as usize]);
    }

    /// Land a slow-path jump back in hot code.
    pub(super) fn emit_jump_slow_to_hot(&mut self, jump: Jump, target: u32) {
        self.add_jump(jump, target);
    }

    pub(super) fn shape_mismatch(&self, opcode: Opcode, shape: Shape) -> JitError {
        JitError::SlowCaseMismatch {
            bytecode_offset: self.bytecode_offset,
            opcode,
            detail: format!("shape {} does not apply to {}", shape, opcode),
        }
    }

    // ==================== Virtual registers ====================

    /// Load an operand. Constants are materialized as immediates.
    pub(super) fn emit_get_virtual_register(&mut self, reg: VirtualRegister, dst: Gpr) {
        match self.classifier.constant_value(reg) {
            Some(value) => self.masm.move_imm64(dst, value.bits()),
            None => self.masm.load_slot(dst, reg.0),
        }
    }

    pub(super) fn emit_get_virtual_registers(
        &mut self,
        first: VirtualRegister,
        first_dst: Gpr,
        second: VirtualRegister,
        second_dst: Gpr,
    ) {
        self.emit_get_virtual_register(first, first_dst);
        self.emit_get_virtual_register(second, second_dst);
    }

    pub(super) fn emit_put_virtual_register(&mut self, reg: VirtualRegister, src: Gpr) {
        self.masm.store_slot(reg.0, src);
    }

    // ==================== Tag checks ====================

    pub(super) fn emit_jump_if_not_int(&mut self, reg: Gpr) -> Jump {
        self.masm
            .branch64(RelationalCondition::Below, reg, Operand64::TagTypeNumber)
    }

    pub(super) fn emit_jump_if_int(&mut self, reg: Gpr) -> Jump {
        self.masm
            .branch64(RelationalCondition::AboveOrEqual, reg, Operand64::TagTypeNumber)
    }

    pub(super) fn emit_jump_if_not_number(&mut self, reg: Gpr) -> Jump {
        self.masm
            .branch_test64(ResultCondition::Zero, reg, Operand64::TagTypeNumber)
    }

    pub(super) fn emit_jump_if_not_cell(&mut self, reg: Gpr) -> Jump {
        self.masm
            .branch_test64(ResultCondition::NonZero, reg, Operand64::TagMask)
    }

    pub(super) fn emit_jump_slow_case_if_not_int(&mut self, reg: Gpr) {
        let jump = self.emit_jump_if_not_int(reg);
        self.add_slow_case(jump);
    }

    pub(super) fn emit_jump_slow_case_if_not_number(&mut self, reg: Gpr) {
        let jump = self.emit_jump_if_not_number(reg);
        self.add_slow_case(jump);
    }

    /// Box the low 32 bits of `reg` as an int32. The upper half must be clear
    /// or already tagged.
    pub(super) fn emit_tag_int(&mut self, reg: Gpr) {
        self.masm.or64(reg, Operand64::TagTypeNumber);
    }

    /// Decode a boxed double in place.
    pub(super) fn emit_decode_double(&mut self, reg: Gpr) {
        self.masm.add64(reg, Operand64::TagTypeNumber);
    }

    /// Box raw double bits in place.
    pub(super) fn emit_encode_double(&mut self, reg: Gpr) {
        self.masm.sub64(reg, Operand64::TagTypeNumber);
    }

    pub(super) fn emit_move_tag_int_zero(&mut self, reg: Gpr) {
        self.masm.move_imm64(reg, TAG_TYPE_NUMBER);
    }
}

/// Reject methods whose operands the generated code could not address.
fn validate(block: &CodeBlock) -> Result<(), JitError> {
    let len = block.instructions.len() as u32;
    for (offset, instruction) in block.instructions.iter().enumerate() {
        let offset = offset as u32;
        for register in instruction.registers() {
            if register.is_constant() {
                if block.constant(register).is_none() {
                    return Err(JitError::UnknownConstant {
                        bytecode_offset: offset,
                        register,
                    });
                }
            } else if !register
                .slot_index()
                .is_some_and(|slot| slot < block.num_slots)
            {
                return Err(JitError::InvalidRegister {
                    bytecode_offset: offset,
                    register,
                });
            }
        }
        if let Some(dst) = instruction.destination() {
            if dst.is_constant() {
                return Err(JitError::InvalidRegister {
                    bytecode_offset: offset,
                    register: dst,
                });
            }
        }
        if let Some((_, _, target)) = instruction.jump_operands() {
            if target > len {
                return Err(JitError::InvalidJumpTarget {
                    bytecode_offset: offset,
                    target,
                });
            }
        }
    }
    Ok(())
}
