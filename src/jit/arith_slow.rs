//! Slow paths of the arithmetic and relational opcodes.
//!
//! Each emitter links the sites its fast path recorded, in recording order,
//! optionally retries in double arithmetic, and otherwise calls the runtime.
//! The caller plants the slow-case counter and the jump back to hot code,
//! except for relational jumps, which count each entry before leaving.

use super::arith::runtime_op_for;
use super::compiler::JitCompiler;
use super::error::JitError;
use super::masm::{DoubleCondition, DoubleOp, Fpr, Gpr, JumpList};
use super::operands::{ArithShape, CompareShape, DivOperand, ModShape, Shape};
use super::slow_cases::SlowCaseGroup;
use crate::vm::{ArithOp, Instruction, Relation, RuntimeOp, ShiftKind, VirtualRegister};

impl JitCompiler<'_> {
    pub(super) fn emit_slow(
        &mut self,
        instruction: &Instruction,
        shape: Shape,
        group: &mut SlowCaseGroup,
    ) -> Result<(), JitError> {
        let opcode = instruction.opcode();
        match (*instruction, shape) {
            (Instruction::Negate { dst, src }, Shape::Negate) => {
                self.link_sites(group, 2)?;
                self.emit_call_and_store(RuntimeOp::Negate, dst, src, None);
            }
            (Instruction::Inc { srcdst }, Shape::Inc) => {
                self.link_sites(group, 2)?;
                self.emit_call_and_store(RuntimeOp::Inc, srcdst, srcdst, None);
            }
            (Instruction::Dec { srcdst }, Shape::Dec) => {
                self.link_sites(group, 2)?;
                self.emit_call_and_store(RuntimeOp::Dec, srcdst, srcdst, None);
            }
            (Instruction::Unsigned { dst, src }, Shape::Unsigned) => {
                self.link_sites(group, 2)?;
                self.emit_call_and_store(RuntimeOp::Unsigned, dst, src, None);
            }
            (
                Instruction::Lshift { dst, lhs, rhs }
                | Instruction::Rshift { dst, lhs, rhs }
                | Instruction::Urshift { dst, lhs, rhs },
                Shape::Shift(kind, _),
            ) => {
                self.link_sites(group, shape.site_count())?;
                self.emit_call_and_store(shift_op(kind), dst, lhs, Some(rhs));
            }
            (Instruction::Bitand { dst, lhs, rhs }, Shape::BitAnd(_)) => {
                self.link_sites(group, 1)?;
                self.emit_call_and_store(RuntimeOp::BitAnd, dst, lhs, Some(rhs));
            }
            (Instruction::Mod { dst, lhs, rhs }, Shape::Mod(ModShape::IntegerDivide)) => {
                self.link_sites(group, 5)?;
                self.emit_call_and_store(RuntimeOp::Mod, dst, lhs, Some(rhs));
            }
            (Instruction::Mod { .. }, Shape::Mod(ModShape::RuntimeCall)) => {
                return Err(JitError::UnreachableForPlatform {
                    bytecode_offset: self.bytecode_offset,
                    opcode,
                });
            }
            (
                Instruction::Add { dst, lhs, rhs, .. }
                | Instruction::Sub { dst, lhs, rhs, .. }
                | Instruction::Mul { dst, lhs, rhs, .. },
                Shape::Arith(op, arith),
            ) => self.emit_slow_arith(op, dst, lhs, rhs, arith, group)?,
            (Instruction::Div { dst, lhs, rhs, .. }, Shape::Div { lhs: a, rhs: b }) => {
                // A trusted operand's site only fires when its hint was wrong.
                for how in [a, b] {
                    if matches!(how, DivOperand::Checked | DivOperand::Trusted) {
                        group.link(&mut self.masm)?;
                    }
                }
                self.emit_call_and_store(RuntimeOp::Div, dst, lhs, Some(rhs));
            }
            (_, Shape::Compare(compare)) => {
                let (Some((relation, negated)), Some((lhs, rhs, target))) =
                    (opcode.relational(), instruction.jump_operands())
                else {
                    return Err(self.shape_mismatch(opcode, shape));
                };
                self.emit_slow_compare_and_jump(relation, negated, lhs, rhs, target, compare, group)?;
            }
            _ => return Err(self.shape_mismatch(opcode, shape)),
        }
        Ok(())
    }

    fn link_sites(&mut self, group: &mut SlowCaseGroup, count: usize) -> Result<(), JitError> {
        for _ in 0..count {
            group.link(&mut self.masm)?;
        }
        Ok(())
    }

    // ==================== Relational jumps ====================

    #[allow(clippy::too_many_arguments)]
    fn emit_slow_compare_and_jump(
        &mut self,
        relation: Relation,
        negated: bool,
        lhs: VirtualRegister,
        rhs: VirtualRegister,
        target: u32,
        shape: CompareShape,
        group: &mut SlowCaseGroup,
    ) -> Result<(), JitError> {
        let fp = self.config.capabilities.floating_point;
        let cond = DoubleCondition::for_jump(relation, negated);
        let next = self.bytecode_offset + 1;

        match shape {
            CompareShape::CharLeft(_) | CompareShape::CharRight(_) => {
                self.link_sites(group, 4)?;
            }
            CompareShape::IntRight(n) => {
                group.link(&mut self.masm)?;
                if fp {
                    let fail = self.emit_jump_if_not_number(Gpr::T0);
                    self.emit_decode_double(Gpr::T0);
                    self.masm.move_gpr_to_fpr(Fpr::F0, Gpr::T0);
                    self.masm.move_imm32(Gpr::T1, n);
                    self.masm.convert_int32_to_double(Fpr::F1, Gpr::T1);
                    self.emit_slow_case_counter();
                    let taken = self.masm.branch_double(cond, Fpr::F0, Fpr::F1);
                    self.emit_jump_slow_to_hot(taken, target);
                    let not_taken = self.masm.jump();
                    self.emit_jump_slow_to_hot(not_taken, next);
                    fail.link(&mut self.masm);
                }
            }
            CompareShape::IntLeft(n) => {
                group.link(&mut self.masm)?;
                if fp {
                    let fail = self.emit_jump_if_not_number(Gpr::T1);
                    self.emit_decode_double(Gpr::T1);
                    self.masm.move_gpr_to_fpr(Fpr::F1, Gpr::T1);
                    self.masm.move_imm32(Gpr::T0, n);
                    self.masm.convert_int32_to_double(Fpr::F0, Gpr::T0);
                    self.emit_slow_case_counter();
                    let taken = self.masm.branch_double(cond, Fpr::F0, Fpr::F1);
                    self.emit_jump_slow_to_hot(taken, target);
                    let not_taken = self.masm.jump();
                    self.emit_jump_slow_to_hot(not_taken, next);
                    fail.link(&mut self.masm);
                }
            }
            CompareShape::Registers if fp => {
                let not_int1 = group.take()?;
                let not_int2 = group.take()?;
                let mut fail = JumpList::new();

                // lhs is not an int; rhs may be either.
                not_int1.link(&mut self.masm);
                fail.append(self.emit_jump_if_not_number(Gpr::T0));
                fail.append(self.emit_jump_if_not_number(Gpr::T1));
                self.emit_decode_double(Gpr::T0);
                self.masm.move_gpr_to_fpr(Fpr::F0, Gpr::T0);
                let rhs_is_double = self.emit_jump_if_not_int(Gpr::T1);
                self.masm.convert_int32_to_double(Fpr::F1, Gpr::T1);
                let rhs_was_integer = self.masm.jump();

                // lhs is an int, rhs is not.
                not_int2.link(&mut self.masm);
                fail.append(self.emit_jump_if_not_number(Gpr::T1));
                self.masm.convert_int32_to_double(Fpr::F0, Gpr::T0);

                rhs_is_double.link(&mut self.masm);
                self.emit_decode_double(Gpr::T1);
                self.masm.move_gpr_to_fpr(Fpr::F1, Gpr::T1);
                rhs_was_integer.link(&mut self.masm);

                self.emit_slow_case_counter();
                let taken = self.masm.branch_double(cond, Fpr::F0, Fpr::F1);
                self.emit_jump_slow_to_hot(taken, target);
                let not_taken = self.masm.jump();
                self.emit_jump_slow_to_hot(not_taken, next);
                fail.link(&mut self.masm);
            }
            CompareShape::Registers => {
                self.link_sites(group, 2)?;
            }
        }
        self.emit_slow_case_counter();
        self.emit_compare_call_and_jump(relation, negated, lhs, rhs, target);
        Ok(())
    }

    // ==================== Add, sub, mul ====================

    #[allow(clippy::too_many_arguments)]
    fn emit_slow_arith(
        &mut self,
        op: ArithOp,
        dst: VirtualRegister,
        lhs: VirtualRegister,
        rhs: VirtualRegister,
        shape: ArithShape,
        group: &mut SlowCaseGroup,
    ) -> Result<(), JitError> {
        let runtime_op = runtime_op_for(op);
        let fp = self.config.capabilities.floating_point;

        let (not_int_first, not_int_second) = match shape {
            ArithShape::Generic => {
                // The fast path already called the runtime.
                return group.link_dummy();
            }
            ArithShape::IntLeft(_) | ArithShape::IntRight(_) => {
                let not_int = group.take()?;
                group.link(&mut self.masm)?;
                (Some(not_int), None)
            }
            ArithShape::Registers => {
                let not_int1 = group.take()?;
                let not_int2 = group.take()?;
                group.link(&mut self.masm)?;
                if op == ArithOp::Mul {
                    group.link(&mut self.masm)?;
                }
                (Some(not_int1), Some(not_int2))
            }
        };

        let stub_call = self.masm.label();
        self.emit_call_and_store(runtime_op, dst, lhs, Some(rhs));
        if !fp {
            not_int_first.into_iter().chain(not_int_second).for_each(|jump| {
                jump.link_to(&mut self.masm, stub_call);
            });
            return Ok(());
        }
        let end = self.masm.jump();

        match shape {
            ArithShape::IntLeft(n) => {
                if let Some(not_int) = not_int_first {
                    not_int.link(&mut self.masm);
                }
                // The variable operand is in T0.
                let not_number = self.emit_jump_if_not_number(Gpr::T0);
                not_number.link_to(&mut self.masm, stub_call);
                self.emit_decode_double(Gpr::T0);
                self.masm.move_gpr_to_fpr(Fpr::F2, Gpr::T0);
                self.masm.move_imm32(Gpr::T1, n);
                self.masm.convert_int32_to_double(Fpr::F1, Gpr::T1);
            }
            ArithShape::IntRight(n) => {
                if let Some(not_int) = not_int_first {
                    not_int.link(&mut self.masm);
                }
                let not_number = self.emit_jump_if_not_number(Gpr::T0);
                not_number.link_to(&mut self.masm, stub_call);
                self.emit_decode_double(Gpr::T0);
                self.masm.move_gpr_to_fpr(Fpr::F1, Gpr::T0);
                self.masm.move_imm32(Gpr::T1, n);
                self.masm.convert_int32_to_double(Fpr::F2, Gpr::T1);
            }
            ArithShape::Registers => {
                // lhs is not an int; rhs may be either.
                if let Some(not_int1) = not_int_first {
                    not_int1.link(&mut self.masm);
                }
                let not_number = self.emit_jump_if_not_number(Gpr::T0);
                not_number.link_to(&mut self.masm, stub_call);
                let not_number = self.emit_jump_if_not_number(Gpr::T1);
                not_number.link_to(&mut self.masm, stub_call);
                self.emit_decode_double(Gpr::T0);
                self.masm.move_gpr_to_fpr(Fpr::F1, Gpr::T0);
                let op2_is_double = self.emit_jump_if_not_int(Gpr::T1);
                self.masm.convert_int32_to_double(Fpr::F2, Gpr::T1);
                let op2_was_integer = self.masm.jump();

                // lhs is an int, rhs is not.
                if let Some(not_int2) = not_int_second {
                    not_int2.link(&mut self.masm);
                }
                let not_number = self.emit_jump_if_not_number(Gpr::T1);
                not_number.link_to(&mut self.masm, stub_call);
                self.masm.convert_int32_to_double(Fpr::F1, Gpr::T0);

                op2_is_double.link(&mut self.masm);
                self.emit_decode_double(Gpr::T1);
                self.masm.move_gpr_to_fpr(Fpr::F2, Gpr::T1);
                op2_was_integer.link(&mut self.masm);
            }
            ArithShape::Generic => {}
        }

        self.masm.double_arith(DoubleOp::from(op), Fpr::F1, Fpr::F2);
        self.masm.move_fpr_to_gpr(Gpr::T0, Fpr::F1);
        self.emit_encode_double(Gpr::T0);
        self.emit_put_virtual_register(dst, Gpr::T0);

        end.link(&mut self.masm);
        Ok(())
    }
}

fn shift_op(kind: ShiftKind) -> RuntimeOp {
    match kind {
        ShiftKind::Left => RuntimeOp::LShift,
        ShiftKind::Right => RuntimeOp::RShift,
        ShiftKind::UnsignedRight => RuntimeOp::URShift,
    }
}
