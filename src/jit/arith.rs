//! Fast paths of the arithmetic and relational opcodes.
//!
//! Every fast path assumes int32 operands and records one slow-case site per
//! guard, in the order the matching slow path in `arith_slow` consumes them.

use super::compiler::JitCompiler;
use super::error::JitError;
use super::masm::{
    DoubleOp, Fpr, Gpr, JumpList, Operand32, Operand64, RelationalCondition, ResultCondition,
    ShiftAmount,
};
use super::operands::{ArithShape, BitAndShape, CompareShape, DivOperand, ModShape, Shape, ShiftShape};
use crate::vm::heap::{CELL_KIND_OFFSET, STRING_DATA_OFFSET, STRING_KIND, STRING_LENGTH_OFFSET};
use crate::vm::{
    ArithOp, CounterKind, Instruction, Relation, RuntimeOp, ShiftKind, VirtualRegister,
};

impl JitCompiler<'_> {
    pub(super) fn emit_fast(&mut self, instruction: &Instruction, shape: Shape) -> Result<(), JitError> {
        let opcode = instruction.opcode();
        match (*instruction, shape) {
            (Instruction::Negate { dst, src }, Shape::Negate) => self.emit_negate(dst, src),
            (Instruction::Inc { srcdst }, Shape::Inc) => self.emit_inc_dec(srcdst, ArithOp::Add),
            (Instruction::Dec { srcdst }, Shape::Dec) => self.emit_inc_dec(srcdst, ArithOp::Sub),
            (Instruction::Unsigned { dst, src }, Shape::Unsigned) => self.emit_unsigned(dst, src),
            (
                Instruction::Lshift { dst, lhs, rhs }
                | Instruction::Rshift { dst, lhs, rhs }
                | Instruction::Urshift { dst, lhs, rhs },
                Shape::Shift(kind, shift),
            ) => self.emit_shift(kind, dst, lhs, rhs, shift),
            (Instruction::Bitand { dst, lhs, rhs }, Shape::BitAnd(bitand)) => {
                self.emit_bitand(dst, lhs, rhs, bitand)
            }
            (Instruction::Mod { dst, lhs, rhs }, Shape::Mod(ModShape::IntegerDivide)) => {
                self.emit_mod(dst, lhs, rhs)
            }
            (Instruction::Mod { dst, lhs, rhs }, Shape::Mod(ModShape::RuntimeCall)) => {
                self.emit_call_and_store(RuntimeOp::Mod, dst, lhs, Some(rhs));
            }
            (
                Instruction::Add { dst, lhs, rhs, .. }
                | Instruction::Sub { dst, lhs, rhs, .. }
                | Instruction::Mul { dst, lhs, rhs, .. },
                Shape::Arith(op, arith),
            ) => self.emit_arith(op, dst, lhs, rhs, arith),
            (Instruction::Div { dst, lhs, rhs, .. }, Shape::Div { lhs: a, rhs: b }) => {
                self.emit_div(dst, lhs, rhs, a, b)
            }
            (_, Shape::Compare(compare)) => {
                let (Some((relation, negated)), Some((lhs, rhs, target))) =
                    (opcode.relational(), instruction.jump_operands())
                else {
                    return Err(self.shape_mismatch(opcode, shape));
                };
                self.emit_compare_and_jump(relation, negated, lhs, rhs, target, compare);
            }
            _ => return Err(self.shape_mismatch(opcode, shape)),
        }
        Ok(())
    }

    // ==================== Relational jumps ====================

    fn emit_compare_and_jump(
        &mut self,
        relation: Relation,
        negated: bool,
        lhs: VirtualRegister,
        rhs: VirtualRegister,
        target: u32,
        shape: CompareShape,
    ) {
        let relation = if negated { relation.negate() } else { relation };
        let cond = RelationalCondition::from_relation(relation);
        match shape {
            CompareShape::CharLeft(ch) => {
                self.emit_get_virtual_register(rhs, Gpr::T0);
                self.emit_load_character_string(Gpr::T0);
                let jump = self.masm.branch32(cond.commute(), Gpr::T0, Operand32::Imm(ch as i32));
                self.add_jump(jump, target);
            }
            CompareShape::CharRight(ch) => {
                self.emit_get_virtual_register(lhs, Gpr::T0);
                self.emit_load_character_string(Gpr::T0);
                let jump = self.masm.branch32(cond, Gpr::T0, Operand32::Imm(ch as i32));
                self.add_jump(jump, target);
            }
            CompareShape::IntRight(n) => {
                self.emit_get_virtual_register(lhs, Gpr::T0);
                self.emit_jump_slow_case_if_not_int(Gpr::T0);
                let jump = self.masm.branch32(cond, Gpr::T0, Operand32::Imm(n));
                self.add_jump(jump, target);
            }
            CompareShape::IntLeft(n) => {
                self.emit_get_virtual_register(rhs, Gpr::T1);
                self.emit_jump_slow_case_if_not_int(Gpr::T1);
                let jump = self.masm.branch32(cond.commute(), Gpr::T1, Operand32::Imm(n));
                self.add_jump(jump, target);
            }
            CompareShape::Registers => {
                self.emit_get_virtual_registers(lhs, Gpr::T0, rhs, Gpr::T1);
                self.emit_jump_slow_case_if_not_int(Gpr::T0);
                self.emit_jump_slow_case_if_not_int(Gpr::T1);
                let jump = self.masm.branch32(cond, Gpr::T0, Operand32::Reg(Gpr::T1));
                self.add_jump(jump, target);
            }
        }
    }

    /// Replace the string cell in `reg` by its only code unit. Records four
    /// sites: not a cell, not a string, a rope, length other than one.
    fn emit_load_character_string(&mut self, reg: Gpr) {
        let not_cell = self.emit_jump_if_not_cell(reg);
        self.add_slow_case(not_cell);

        self.masm.load32(Gpr::T1, reg, CELL_KIND_OFFSET);
        let not_string = self
            .masm
            .branch32(RelationalCondition::NotEqual, Gpr::T1, Operand32::Imm(STRING_KIND as i32));
        self.add_slow_case(not_string);

        self.masm.load64(Gpr::T1, reg, STRING_DATA_OFFSET);
        let rope = self
            .masm
            .branch_test64(ResultCondition::Zero, Gpr::T1, Operand64::Reg(Gpr::T1));
        self.add_slow_case(rope);

        self.masm.load32(Gpr::T2, reg, STRING_LENGTH_OFFSET);
        let not_single = self
            .masm
            .branch32(RelationalCondition::NotEqual, Gpr::T2, Operand32::Imm(1));
        self.add_slow_case(not_single);

        self.masm.load16(reg, Gpr::T1, 0);
    }

    // ==================== Unary ====================

    fn emit_negate(&mut self, dst: VirtualRegister, src: VirtualRegister) {
        self.emit_get_virtual_register(src, Gpr::T0);

        let src_not_int = self.emit_jump_if_not_int(Gpr::T0);
        // 0 negates to -0 and INT_MIN overflows.
        let zero_or_min = self
            .masm
            .branch_test32(ResultCondition::Zero, Gpr::T0, Operand32::Imm(0x7fff_ffff));
        self.add_slow_case(zero_or_min);
        self.masm.neg32(Gpr::T0);
        self.emit_tag_int(Gpr::T0);
        let end = self.masm.jump();

        src_not_int.link(&mut self.masm);
        self.emit_jump_slow_case_if_not_number(Gpr::T0);
        self.masm.move_imm64(Gpr::T1, 0x8000_0000_0000_0000);
        self.masm.xor64(Gpr::T0, Operand64::Reg(Gpr::T1));

        end.link(&mut self.masm);
        self.emit_put_virtual_register(dst, Gpr::T0);
    }

    fn emit_inc_dec(&mut self, srcdst: VirtualRegister, op: ArithOp) {
        self.emit_get_virtual_register(srcdst, Gpr::T0);
        self.emit_jump_slow_case_if_not_int(Gpr::T0);
        let overflow = self.masm.branch_arith32(op, Gpr::T0, Operand32::Imm(1));
        self.add_slow_case(overflow);
        self.emit_tag_int(Gpr::T0);
        self.emit_put_virtual_register(srcdst, Gpr::T0);
    }

    fn emit_unsigned(&mut self, dst: VirtualRegister, src: VirtualRegister) {
        self.emit_get_virtual_register(src, Gpr::T0);
        self.emit_jump_slow_case_if_not_int(Gpr::T0);
        let negative = self
            .masm
            .branch32(RelationalCondition::LessThan, Gpr::T0, Operand32::Imm(0));
        self.add_slow_case(negative);
        self.emit_tag_int(Gpr::T0);
        self.emit_put_virtual_register(dst, Gpr::T0);
    }

    // ==================== Bitwise ====================

    fn emit_shift(
        &mut self,
        kind: ShiftKind,
        dst: VirtualRegister,
        lhs: VirtualRegister,
        rhs: VirtualRegister,
        shape: ShiftShape,
    ) {
        match shape {
            ShiftShape::ConstantAmount(amount) => {
                self.emit_get_virtual_register(lhs, Gpr::T0);
                self.emit_jump_slow_case_if_not_int(Gpr::T0);
                self.masm.shift32(kind, Gpr::T0, ShiftAmount::Imm(amount));
            }
            ShiftShape::Registers { fp_truncate } => {
                self.emit_get_virtual_registers(lhs, Gpr::T0, rhs, Gpr::T2);
                if fp_truncate {
                    let lhs_is_int = self.emit_jump_if_int(Gpr::T0);
                    self.emit_jump_slow_case_if_not_number(Gpr::T0);
                    self.emit_decode_double(Gpr::T0);
                    self.masm.move_gpr_to_fpr(Fpr::F0, Gpr::T0);
                    let out_of_range = self.masm.branch_truncate_double_to_int32(Fpr::F0, Gpr::T0);
                    self.add_slow_case(out_of_range);
                    lhs_is_int.link(&mut self.masm);
                } else {
                    self.emit_jump_slow_case_if_not_int(Gpr::T0);
                }
                self.emit_jump_slow_case_if_not_int(Gpr::T2);
                self.masm.shift32(kind, Gpr::T0, ShiftAmount::Count);
            }
        }
        self.emit_tag_int(Gpr::T0);
        self.emit_put_virtual_register(dst, Gpr::T0);
    }

    fn emit_bitand(
        &mut self,
        dst: VirtualRegister,
        lhs: VirtualRegister,
        rhs: VirtualRegister,
        shape: BitAndShape,
    ) {
        match shape {
            BitAndShape::IntLeft(n) | BitAndShape::IntRight(n) => {
                let operand = if matches!(shape, BitAndShape::IntLeft(_)) { rhs } else { lhs };
                self.emit_get_virtual_register(operand, Gpr::T0);
                self.emit_jump_slow_case_if_not_int(Gpr::T0);
                // A negative mask keeps the tag bits.
                self.masm.and64(Gpr::T0, Operand64::Imm32(n));
                if n >= 0 {
                    self.emit_tag_int(Gpr::T0);
                }
            }
            BitAndShape::Registers => {
                self.emit_get_virtual_registers(lhs, Gpr::T0, rhs, Gpr::T1);
                self.masm.and64(Gpr::T0, Operand64::Reg(Gpr::T1));
                self.emit_jump_slow_case_if_not_int(Gpr::T0);
            }
        }
        self.emit_put_virtual_register(dst, Gpr::T0);
    }

    // ==================== Remainder ====================

    fn emit_mod(&mut self, dst: VirtualRegister, lhs: VirtualRegister, rhs: VirtualRegister) {
        self.emit_get_virtual_registers(lhs, Gpr::T3, rhs, Gpr::T2);
        self.emit_jump_slow_case_if_not_int(Gpr::T3);
        self.emit_jump_slow_case_if_not_int(Gpr::T2);

        self.masm.move64(Gpr::T0, Gpr::T3);
        let zero_denominator = self
            .masm
            .branch_test32(ResultCondition::Zero, Gpr::T2, Operand32::Reg(Gpr::T2));
        self.add_slow_case(zero_denominator);
        let denominator_not_neg1 = self
            .masm
            .branch32(RelationalCondition::NotEqual, Gpr::T2, Operand32::Imm(-1));
        let min_numerator = self
            .masm
            .branch32(RelationalCondition::Equal, Gpr::T0, Operand32::Imm(i32::MIN));
        self.add_slow_case(min_numerator);
        denominator_not_neg1.link(&mut self.masm);

        self.masm.idiv32(Gpr::T2);
        // A zero remainder of a negative numerator is -0.
        let numerator_positive = self
            .masm
            .branch32(RelationalCondition::GreaterThanOrEqual, Gpr::T3, Operand32::Imm(0));
        let negative_zero = self
            .masm
            .branch_test32(ResultCondition::Zero, Gpr::T1, Operand32::Reg(Gpr::T1));
        self.add_slow_case(negative_zero);
        numerator_positive.link(&mut self.masm);

        self.masm.move64(Gpr::T0, Gpr::T1);
        self.emit_tag_int(Gpr::T0);
        self.emit_put_virtual_register(dst, Gpr::T0);
    }

    // ==================== Add, sub, mul ====================

    fn emit_arith(
        &mut self,
        op: ArithOp,
        dst: VirtualRegister,
        lhs: VirtualRegister,
        rhs: VirtualRegister,
        shape: ArithShape,
    ) {
        match shape {
            ArithShape::Generic => {
                self.add_dummy_slow_case();
                self.emit_call_and_store(runtime_op_for(op), dst, lhs, Some(rhs));
                return;
            }
            ArithShape::IntLeft(n) => {
                self.emit_get_virtual_register(rhs, Gpr::T0);
                self.emit_jump_slow_case_if_not_int(Gpr::T0);
                let overflow = match op {
                    ArithOp::Sub => {
                        self.masm.move_imm32(Gpr::T1, n);
                        self.masm.branch_arith32(op, Gpr::T1, Operand32::Reg(Gpr::T0))
                    }
                    ArithOp::Add | ArithOp::Mul => {
                        self.masm.move64(Gpr::T1, Gpr::T0);
                        self.masm.branch_arith32(op, Gpr::T1, Operand32::Imm(n))
                    }
                };
                self.add_slow_case(overflow);
                self.masm.move64(Gpr::T0, Gpr::T1);
            }
            ArithShape::IntRight(n) => {
                self.emit_get_virtual_register(lhs, Gpr::T0);
                self.emit_jump_slow_case_if_not_int(Gpr::T0);
                self.masm.move64(Gpr::T1, Gpr::T0);
                let overflow = self.masm.branch_arith32(op, Gpr::T1, Operand32::Imm(n));
                self.add_slow_case(overflow);
                self.masm.move64(Gpr::T0, Gpr::T1);
            }
            ArithShape::Registers => self.compile_binary_arith_op(op, lhs, rhs),
        }
        self.emit_tag_int(Gpr::T0);
        self.emit_put_virtual_register(dst, Gpr::T0);
    }

    fn compile_binary_arith_op(&mut self, op: ArithOp, lhs: VirtualRegister, rhs: VirtualRegister) {
        self.emit_get_virtual_registers(lhs, Gpr::T0, rhs, Gpr::T1);
        self.emit_jump_slow_case_if_not_int(Gpr::T0);
        self.emit_jump_slow_case_if_not_int(Gpr::T1);

        match op {
            ArithOp::Add | ArithOp::Sub => {
                let overflow = self.masm.branch_arith32(op, Gpr::T0, Operand32::Reg(Gpr::T1));
                self.add_slow_case(overflow);
            }
            ArithOp::Mul => {
                self.masm.move64(Gpr::T2, Gpr::T0);
                let overflow = self.masm.branch_arith32(op, Gpr::T2, Operand32::Reg(Gpr::T1));
                self.add_slow_case(overflow);

                // A zero product with a negative factor is -0 and leaves for
                // the slow path, counted when profiling.
                let mut done = JumpList::new();
                done.append(
                    self.masm
                        .branch_test32(ResultCondition::NonZero, Gpr::T2, Operand32::Reg(Gpr::T2)),
                );
                let negative_zero = self
                    .masm
                    .branch32(RelationalCondition::LessThan, Gpr::T0, Operand32::Imm(0));
                done.append(self.masm.branch32(
                    RelationalCondition::GreaterThanOrEqual,
                    Gpr::T1,
                    Operand32::Imm(0),
                ));
                negative_zero.link(&mut self.masm);
                if self.config.emit_profiling {
                    self.masm
                        .increment_counter(CounterKind::Special, self.bytecode_offset);
                }
                let special = self.masm.jump();
                self.add_slow_case(special);

                done.link(&mut self.masm);
                self.masm.move64(Gpr::T0, Gpr::T2);
            }
        }
    }

    // ==================== Division ====================

    /// Load a division operand into `fpr` as a double, using `reg` as the
    /// boxed staging register.
    fn emit_load_double_operand(&mut self, operand: VirtualRegister, how: DivOperand, reg: Gpr, fpr: Fpr) {
        match how {
            DivOperand::ConstantDouble(value) => {
                self.masm.move_imm64(reg, value.bits());
                self.emit_decode_double(reg);
                self.masm.move_gpr_to_fpr(fpr, reg);
            }
            DivOperand::ConstantInt(n) => {
                self.masm.move_imm32(reg, n);
                self.masm.convert_int32_to_double(fpr, reg);
            }
            DivOperand::Checked | DivOperand::Trusted => {
                self.emit_get_virtual_register(operand, reg);
                self.emit_jump_slow_case_if_not_number(reg);
                let not_int = self.emit_jump_if_not_int(reg);
                self.masm.convert_int32_to_double(fpr, reg);
                let loaded = self.masm.jump();
                not_int.link(&mut self.masm);
                self.emit_decode_double(reg);
                self.masm.move_gpr_to_fpr(fpr, reg);
                loaded.link(&mut self.masm);
            }
        }
    }

    fn emit_div(
        &mut self,
        dst: VirtualRegister,
        lhs: VirtualRegister,
        rhs: VirtualRegister,
        lhs_how: DivOperand,
        rhs_how: DivOperand,
    ) {
        self.emit_load_double_operand(lhs, lhs_how, Gpr::T0, Fpr::F0);
        self.emit_load_double_operand(rhs, rhs_how, Gpr::T1, Fpr::F1);
        self.masm.double_arith(DoubleOp::Div, Fpr::F0, Fpr::F1);

        // Exact non-zero int32 quotients stay ints.
        let not_integer = self
            .masm
            .branch_convert_double_to_int32(Fpr::F0, Gpr::T0, Fpr::F1);
        self.emit_tag_int(Gpr::T0);
        let is_integer = self.masm.jump();

        not_integer.link(&mut self.masm);
        self.masm.move_fpr_to_gpr(Gpr::T0, Fpr::F0);
        let double_zero = self
            .masm
            .branch_test64(ResultCondition::Zero, Gpr::T0, Operand64::Reg(Gpr::T0));
        self.masm
            .increment_counter(CounterKind::Special, self.bytecode_offset);
        self.emit_encode_double(Gpr::T0);
        let true_double = self.masm.jump();

        double_zero.link(&mut self.masm);
        self.emit_move_tag_int_zero(Gpr::T0);

        true_double.link(&mut self.masm);
        is_integer.link(&mut self.masm);
        self.emit_put_virtual_register(dst, Gpr::T0);
    }
}

pub(super) fn runtime_op_for(op: ArithOp) -> RuntimeOp {
    match op {
        ArithOp::Add => RuntimeOp::Add,
        ArithOp::Sub => RuntimeOp::Sub,
        ArithOp::Mul => RuntimeOp::Mul,
    }
}
