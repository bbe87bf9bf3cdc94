//! Runtime calls from generated code.
//!
//! Arguments are reloaded from their virtual registers at every call site,
//! so a call is correct no matter which guard sent control there.

use super::compiler::JitCompiler;
use super::masm::{Gpr, Operand32, ResultCondition};
use crate::vm::{Relation, RuntimeOp, Value, VirtualRegister};

impl JitCompiler<'_> {
    /// Call `op(lhs, rhs)`; unary operations pass `undefined` as `rhs`. The
    /// result is left in `T0`.
    pub(super) fn emit_call_operation(
        &mut self,
        op: RuntimeOp,
        lhs: VirtualRegister,
        rhs: Option<VirtualRegister>,
    ) {
        self.emit_get_virtual_register(lhs, Gpr::T0);
        match rhs {
            Some(rhs) => self.emit_get_virtual_register(rhs, Gpr::T1),
            None => self.masm.move_imm64(Gpr::T1, Value::UNDEFINED.bits()),
        }
        self.masm
            .call_operation(op, [Gpr::T0, Gpr::T1], self.bytecode_offset);
    }

    pub(super) fn emit_call_and_store(
        &mut self,
        op: RuntimeOp,
        dst: VirtualRegister,
        lhs: VirtualRegister,
        rhs: Option<VirtualRegister>,
    ) {
        self.emit_call_operation(op, lhs, rhs);
        self.emit_put_virtual_register(dst, Gpr::T0);
    }

    /// Call a comparison operation and jump to `target` when its boolean
    /// result, inverted for negated jumps, is true.
    pub(super) fn emit_compare_call_and_jump(
        &mut self,
        relation: Relation,
        negated: bool,
        lhs: VirtualRegister,
        rhs: VirtualRegister,
        target: u32,
    ) {
        self.emit_call_operation(comparison_op(relation), lhs, Some(rhs));
        let cond = if negated {
            ResultCondition::Zero
        } else {
            ResultCondition::NonZero
        };
        let jump = self
            .masm
            .branch_test32(cond, Gpr::T0, Operand32::Reg(Gpr::T0));
        self.add_jump(jump, target);
    }
}

pub(super) fn comparison_op(relation: Relation) -> RuntimeOp {
    match relation {
        Relation::Less => RuntimeOp::CompareLess,
        Relation::LessEq => RuntimeOp::CompareLessEq,
        Relation::Greater => RuntimeOp::CompareGreater,
        Relation::GreaterEq => RuntimeOp::CompareGreaterEq,
    }
}
