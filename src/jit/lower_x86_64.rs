//! Lowering of a compiled method to x86-64 machine code.
//!
//! Register assignment:
//! - `T0`..`T3` are RAX, RDX, RCX, R8 (RDX/RAX pair with IDIV, CL counts
//!   shifts)
//! - `F0`..`F2` are XMM0..XMM2
//! - R13 holds the frame base, R14 `TagTypeNumber`, R15 `TagMask`
//! - R11 is scratch for counter addresses
//!
//! The generated function has the signature
//! `extern "sysv64" fn(frame: *mut u64)`; runtime entry points have the
//! signature `extern "sysv64" fn(lhs: u64, rhs: u64, bytecode_offset: u32) -> u64`.

use super::codebuf::CodeBuffer;
use super::compiler::CompiledMethod;
use super::error::JitError;
use super::masm::{
    Alu64, DoubleCondition, DoubleOp, Fpr, Gpr, Insn, Label, Operand32, Operand64,
    RelationalCondition, ResultCondition, ShiftAmount,
};
use super::x86_64::{AluOp, Cond, Reg, ShiftOp, Width, X86_64Assembler, Xmm};
use crate::vm::{ArithOp, OperationTable, RuntimeOp, ShiftKind, TAG_MASK, TAG_TYPE_NUMBER};

const FRAME_BASE: Reg = Reg::R13;
const TAG_TYPE_NUMBER_REG: Reg = Reg::R14;
const TAG_MASK_REG: Reg = Reg::R15;
const SCRATCH: Reg = Reg::R11;

/// Native code for one method.
#[derive(Debug, Clone)]
pub struct MachineCode {
    pub bytes: Vec<u8>,
    /// Byte offset of every bytecode instruction, followed by the exit.
    pub bytecode_offsets: Vec<usize>,
    /// Byte offset of each runtime call and the operation it calls.
    pub call_sites: Vec<(usize, RuntimeOp)>,
}

fn gpr(reg: Gpr) -> Reg {
    match reg {
        Gpr::T0 => Reg::Rax,
        Gpr::T1 => Reg::Rdx,
        Gpr::T2 => Reg::Rcx,
        Gpr::T3 => Reg::R8,
    }
}

fn fpr(reg: Fpr) -> Xmm {
    reg.index() as Xmm
}

fn relational_cond(cond: RelationalCondition) -> Cond {
    match cond {
        RelationalCondition::Equal => Cond::E,
        RelationalCondition::NotEqual => Cond::Ne,
        RelationalCondition::Above => Cond::A,
        RelationalCondition::AboveOrEqual => Cond::Ae,
        RelationalCondition::Below => Cond::B,
        RelationalCondition::BelowOrEqual => Cond::Be,
        RelationalCondition::GreaterThan => Cond::G,
        RelationalCondition::GreaterThanOrEqual => Cond::Ge,
        RelationalCondition::LessThan => Cond::L,
        RelationalCondition::LessThanOrEqual => Cond::Le,
    }
}

fn result_cond(cond: ResultCondition) -> Cond {
    match cond {
        ResultCondition::Zero => Cond::E,
        ResultCondition::NonZero => Cond::Ne,
        ResultCondition::Signed => Cond::S,
    }
}

/// UCOMISD operand order and jump for a double condition. `true` swaps
/// the operands.
fn double_cond(cond: DoubleCondition) -> (bool, Cond) {
    match cond {
        DoubleCondition::LessThan => (true, Cond::A),
        DoubleCondition::LessThanOrEqual => (true, Cond::Ae),
        DoubleCondition::GreaterThan => (false, Cond::A),
        DoubleCondition::GreaterThanOrEqual => (false, Cond::Ae),
        DoubleCondition::LessThanOrUnordered => (false, Cond::B),
        DoubleCondition::LessThanOrEqualOrUnordered => (false, Cond::Be),
        DoubleCondition::GreaterThanOrUnordered => (true, Cond::B),
        DoubleCondition::GreaterThanOrEqualOrUnordered => (true, Cond::Be),
    }
}

struct Lowering<'a> {
    method: &'a CompiledMethod,
    operations: &'a OperationTable,
    call_sites: Vec<(usize, RuntimeOp)>,
}

/// Lower a compiled method to x86-64.
pub fn lower(method: &CompiledMethod, operations: &OperationTable) -> Result<MachineCode, JitError> {
    let mut lowering = Lowering {
        method,
        operations,
        call_sites: Vec::new(),
    };
    let mut buf = CodeBuffer::with_capacity(method.code.len() * 8);
    let mut insn_offsets = Vec::with_capacity(method.code.len() + 1);
    {
        let mut asm = X86_64Assembler::new(&mut buf);
        lowering.emit_prologue(&mut asm);
        for (position, insn) in method.code.insns.iter().enumerate() {
            insn_offsets.push(asm.offset());
            asm.bind_label(position);
            lowering.lower_insn(&mut asm, insn)?;
        }
        insn_offsets.push(asm.offset());
        asm.bind_label(method.code.len());
    }
    let bytes = buf.finalize()?;

    let bytecode_offsets = method
        .bytecode_labels
        .iter()
        .map(|&label| {
            method
                .code
                .position(label)
                .map(|position| insn_offsets[position])
                .ok_or(JitError::UnlinkedJump { label: label.id() })
        })
        .collect::<Result<Vec<_>, _>>()?;

    tracing::debug!(
        method = %method.name,
        bytes = bytes.len(),
        calls = lowering.call_sites.len(),
        "lowered to x86-64"
    );
    Ok(MachineCode {
        bytes,
        bytecode_offsets,
        call_sites: lowering.call_sites,
    })
}

impl Lowering<'_> {
    fn target(&self, label: Label) -> Result<usize, JitError> {
        self.method
            .code
            .position(label)
            .ok_or(JitError::UnlinkedJump { label: label.id() })
    }

    fn emit_prologue(&self, asm: &mut X86_64Assembler<'_>) {
        asm.push(Reg::Rbp);
        asm.mov_rr(Reg::Rbp, Reg::Rsp);
        asm.push(FRAME_BASE);
        asm.push(TAG_TYPE_NUMBER_REG);
        asm.push(TAG_MASK_REG);
        // Keeps the stack 16-byte aligned at call sites.
        asm.push(Reg::Rbx);
        asm.mov_rr(FRAME_BASE, Reg::Rdi);
        asm.mov_ri64(TAG_TYPE_NUMBER_REG, TAG_TYPE_NUMBER);
        asm.mov_ri64(TAG_MASK_REG, TAG_MASK);
    }

    fn emit_epilogue(&self, asm: &mut X86_64Assembler<'_>) {
        asm.pop(Reg::Rbx);
        asm.pop(TAG_MASK_REG);
        asm.pop(TAG_TYPE_NUMBER_REG);
        asm.pop(FRAME_BASE);
        asm.pop(Reg::Rbp);
        asm.ret();
    }

    /// Emit `op dst, src` for a 64-bit operand.
    fn emit_alu64(&self, asm: &mut X86_64Assembler<'_>, op: AluOp, dst: Reg, src: Operand64) {
        match src {
            Operand64::Reg(src) => asm.alu_rr(op, Width::W64, dst, gpr(src)),
            Operand64::Imm32(imm) => asm.alu_ri(op, Width::W64, dst, imm),
            Operand64::TagTypeNumber => asm.alu_rr(op, Width::W64, dst, TAG_TYPE_NUMBER_REG),
            Operand64::TagMask => asm.alu_rr(op, Width::W64, dst, TAG_MASK_REG),
        }
    }

    fn emit_test64(&self, asm: &mut X86_64Assembler<'_>, reg: Reg, mask: Operand64) {
        match mask {
            Operand64::Reg(mask) => asm.test_rr(Width::W64, reg, gpr(mask)),
            Operand64::Imm32(imm) => asm.test_ri(Width::W64, reg, imm),
            Operand64::TagTypeNumber => asm.test_rr(Width::W64, reg, TAG_TYPE_NUMBER_REG),
            Operand64::TagMask => asm.test_rr(Width::W64, reg, TAG_MASK_REG),
        }
    }

    fn lower_insn(&mut self, asm: &mut X86_64Assembler<'_>, insn: &Insn) -> Result<(), JitError> {
        match *insn {
            Insn::Move64 { dst, src } => asm.mov_rr(gpr(dst), gpr(src)),
            Insn::MoveImm64 { dst, imm } => asm.mov_ri64(gpr(dst), imm),
            Insn::MoveImm32 { dst, imm } => asm.mov_r32_imm32(gpr(dst), imm),
            Insn::LoadSlot { dst, slot } => asm.mov_rm(gpr(dst), FRAME_BASE, slot * 8),
            Insn::StoreSlot { slot, src } => asm.mov_mr(FRAME_BASE, slot * 8, gpr(src)),
            Insn::Load64 { dst, base, offset } => asm.mov_rm(gpr(dst), gpr(base), offset),
            Insn::Load32 { dst, base, offset } => asm.mov_r32_m32(gpr(dst), gpr(base), offset),
            Insn::Load16 { dst, base, offset } => asm.movzx_r32_m16(gpr(dst), gpr(base), offset),
            Insn::Alu64 { op, dst, src } => {
                let op = match op {
                    Alu64::Add => AluOp::Add,
                    Alu64::Sub => AluOp::Sub,
                    Alu64::And => AluOp::And,
                    Alu64::Or => AluOp::Or,
                    Alu64::Xor => AluOp::Xor,
                };
                self.emit_alu64(asm, op, gpr(dst), src);
            }
            Insn::Neg32 { reg } => asm.neg32(gpr(reg)),
            Insn::ZeroExtend32 { reg } => asm.mov_r32_r32(gpr(reg), gpr(reg)),
            Insn::Shift32 { kind, reg, amount } => {
                let op = match kind {
                    ShiftKind::Left => ShiftOp::Shl,
                    ShiftKind::Right => ShiftOp::Sar,
                    ShiftKind::UnsignedRight => ShiftOp::Shr,
                };
                match amount {
                    ShiftAmount::Imm(n) => asm.shift32_ri(op, gpr(reg), n & 0x1f),
                    ShiftAmount::Count => asm.shift32_cl(op, gpr(reg)),
                }
            }
            Insn::Branch32 { cond, lhs, rhs, target } => {
                match rhs {
                    Operand32::Reg(rhs) => asm.alu_rr(AluOp::Cmp, Width::W32, gpr(lhs), gpr(rhs)),
                    Operand32::Imm(imm) => asm.alu_ri(AluOp::Cmp, Width::W32, gpr(lhs), imm),
                }
                asm.jcc_label(relational_cond(cond), self.target(target)?);
            }
            Insn::Branch64 { cond, lhs, rhs, target } => {
                self.emit_alu64(asm, AluOp::Cmp, gpr(lhs), rhs);
                asm.jcc_label(relational_cond(cond), self.target(target)?);
            }
            Insn::BranchTest32 { cond, reg, mask, target } => {
                match mask {
                    Operand32::Reg(mask) => asm.test_rr(Width::W32, gpr(reg), gpr(mask)),
                    Operand32::Imm(imm) => asm.test_ri(Width::W32, gpr(reg), imm),
                }
                asm.jcc_label(result_cond(cond), self.target(target)?);
            }
            Insn::BranchTest64 { cond, reg, mask, target } => {
                self.emit_test64(asm, gpr(reg), mask);
                asm.jcc_label(result_cond(cond), self.target(target)?);
            }
            Insn::BranchArith32 { op, dst, src, target } => {
                let dst = gpr(dst);
                match (op, src) {
                    (ArithOp::Add, Operand32::Reg(src)) => {
                        asm.alu_rr(AluOp::Add, Width::W32, dst, gpr(src))
                    }
                    (ArithOp::Add, Operand32::Imm(imm)) => asm.alu_ri(AluOp::Add, Width::W32, dst, imm),
                    (ArithOp::Sub, Operand32::Reg(src)) => {
                        asm.alu_rr(AluOp::Sub, Width::W32, dst, gpr(src))
                    }
                    (ArithOp::Sub, Operand32::Imm(imm)) => asm.alu_ri(AluOp::Sub, Width::W32, dst, imm),
                    (ArithOp::Mul, Operand32::Reg(src)) => asm.imul_rr32(dst, gpr(src)),
                    (ArithOp::Mul, Operand32::Imm(imm)) => asm.imul_rri32(dst, dst, imm),
                }
                asm.jcc_label(Cond::O, self.target(target)?);
            }
            Insn::Jump { target } => asm.jmp_label(self.target(target)?),
            Insn::IncrementCounter {
                kind,
                bytecode_offset,
            } => {
                let address = self
                    .method
                    .profile
                    .counter_address(kind, bytecode_offset)
                    .ok_or(JitError::CounterOutOfRange { bytecode_offset })?;
                // Saturating: skip the add once the counter reads u32::MAX.
                asm.mov_ri64(SCRATCH, address);
                asm.alu_m32_imm8(AluOp::Cmp, SCRATCH, 0, -1);
                asm.jcc_rel8(Cond::E, 4);
                asm.alu_m32_imm8(AluOp::Add, SCRATCH, 0, 1);
            }
            Insn::Idiv32 { divisor } => {
                asm.cdq();
                asm.idiv32(gpr(divisor));
            }
            Insn::MoveGprToFpr { dst, src } => asm.movq_xmm_r64(fpr(dst), gpr(src)),
            Insn::MoveFprToGpr { dst, src } => asm.movq_r64_xmm(gpr(dst), fpr(src)),
            Insn::ConvertInt32ToDouble { dst, src } => asm.cvtsi2sd_xmm_r32(fpr(dst), gpr(src)),
            Insn::DoubleArith { op, dst, src } => match op {
                DoubleOp::Add => asm.addsd(fpr(dst), fpr(src)),
                DoubleOp::Sub => asm.subsd(fpr(dst), fpr(src)),
                DoubleOp::Mul => asm.mulsd(fpr(dst), fpr(src)),
                DoubleOp::Div => asm.divsd(fpr(dst), fpr(src)),
            },
            Insn::BranchDouble { cond, lhs, rhs, target } => {
                let (swap, jcc) = double_cond(cond);
                if swap {
                    asm.ucomisd(fpr(rhs), fpr(lhs));
                } else {
                    asm.ucomisd(fpr(lhs), fpr(rhs));
                }
                asm.jcc_label(jcc, self.target(target)?);
            }
            Insn::BranchTruncateDoubleToInt32 { src, dst, target } => {
                asm.cvttsd2si_r32_xmm(gpr(dst), fpr(src));
                asm.alu_ri(AluOp::Cmp, Width::W32, gpr(dst), i32::MIN);
                asm.jcc_label(Cond::E, self.target(target)?);
            }
            Insn::BranchConvertDoubleToInt32 {
                src,
                dst,
                scratch,
                target,
            } => {
                let target = self.target(target)?;
                asm.cvttsd2si_r32_xmm(gpr(dst), fpr(src));
                asm.test_rr(Width::W32, gpr(dst), gpr(dst));
                asm.jcc_label(Cond::E, target);
                asm.cvtsi2sd_xmm_r32(fpr(scratch), gpr(dst));
                asm.ucomisd(fpr(scratch), fpr(src));
                asm.jcc_label(Cond::P, target);
                asm.jcc_label(Cond::Ne, target);
            }
            Insn::CallOperation {
                op,
                args,
                bytecode_offset,
            } => {
                asm.mov_rr(Reg::Rdi, gpr(args[0]));
                asm.mov_rr(Reg::Rsi, gpr(args[1]));
                asm.mov_r32_imm32(Reg::Rdx, bytecode_offset as i32);
                asm.mov_ri64(Reg::Rax, self.operations.address(op));
                self.call_sites.push((asm.offset(), op));
                asm.call_r(Reg::Rax);
            }
            Insn::Return => self.emit_epilogue(asm),
        }
        Ok(())
    }
}
