//! Executes a compiled macro-instruction stream.
//!
//! The simulator models the temporaries bit-exactly, including 32-bit
//! zero-extension, wrapping overflow and the x86 truncation sentinel, so
//! that fast and slow paths can be exercised on any host.

use super::compiler::CompiledMethod;
use super::masm::{Alu64, Fpr, Gpr, Insn, Operand32, Operand64, ShiftAmount};
use crate::vm::{ArithOp, RuntimeBridge, RuntimeOp, ShiftKind, Value, TAG_MASK, TAG_TYPE_NUMBER};

/// Value left in caller-saved temporaries after a runtime call.
const CLOBBERED: u64 = 0xDEAD_BEEF_DEAD_BEEF;

const DEFAULT_STEP_LIMIT: usize = 1_000_000;

#[derive(Debug, Clone, PartialEq)]
pub enum SimError {
    /// The instruction would trap on hardware.
    HardwareFault { position: usize, detail: String },
    BadAddress { position: usize, address: u64 },
    SlotOutOfRange { position: usize, slot: i32 },
    StepLimit { limit: usize },
    /// Control left the instruction stream without returning.
    FellOffEnd { position: usize },
}

impl std::fmt::Display for SimError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SimError::HardwareFault { position, detail } => {
                write!(f, "hardware fault at {}: {}", position, detail)
            }
            SimError::BadAddress { position, address } => {
                write!(f, "bad memory access at {}: {:#x}", position, address)
            }
            SimError::SlotOutOfRange { position, slot } => {
                write!(f, "slot r{} out of range at {}", slot, position)
            }
            SimError::StepLimit { limit } => write!(f, "step limit of {} exceeded", limit),
            SimError::FellOffEnd { position } => write!(f, "fell off the end at {}", position),
        }
    }
}

impl std::error::Error for SimError {}

/// A runtime call made by the generated code.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub op: RuntimeOp,
    pub lhs: Value,
    pub rhs: Value,
    pub bytecode_offset: u32,
    pub result: u64,
}

#[derive(Debug, Clone, Default)]
pub struct RunOutcome {
    pub steps: usize,
    pub calls: Vec<RecordedCall>,
}

pub struct Simulator<'a> {
    method: &'a CompiledMethod,
    step_limit: usize,
    regs: [u64; 4],
    fregs: [f64; 3],
}

impl<'a> Simulator<'a> {
    pub fn new(method: &'a CompiledMethod) -> Self {
        Self {
            method,
            step_limit: DEFAULT_STEP_LIMIT,
            regs: [0; 4],
            fregs: [0.0; 3],
        }
    }

    pub fn with_step_limit(mut self, limit: usize) -> Self {
        self.step_limit = limit;
        self
    }

    pub fn gpr(&self, reg: Gpr) -> u64 {
        self.regs[reg.index()]
    }

    pub fn fpr(&self, reg: Fpr) -> f64 {
        self.fregs[reg.index()]
    }

    fn operand64(&self, operand: Operand64) -> u64 {
        match operand {
            Operand64::Reg(reg) => self.gpr(reg),
            Operand64::Imm32(imm) => imm as i64 as u64,
            Operand64::TagTypeNumber => TAG_TYPE_NUMBER,
            Operand64::TagMask => TAG_MASK,
        }
    }

    fn operand32(&self, operand: Operand32) -> u32 {
        match operand {
            Operand32::Reg(reg) => self.gpr(reg) as u32,
            Operand32::Imm(imm) => imm as u32,
        }
    }

    fn set32(&mut self, reg: Gpr, value: u32) {
        self.regs[reg.index()] = value as u64;
    }

    /// Run the method over `frame` until it returns.
    pub fn run(
        &mut self,
        frame: &mut [Value],
        bridge: &mut dyn RuntimeBridge,
    ) -> Result<RunOutcome, SimError> {
        let method = self.method;
        let code = &method.code;
        let profile = &method.profile;
        let mut outcome = RunOutcome::default();
        let mut pc = 0usize;

        loop {
            if outcome.steps >= self.step_limit {
                return Err(SimError::StepLimit {
                    limit: self.step_limit,
                });
            }
            outcome.steps += 1;
            let Some(insn) = code.insns.get(pc) else {
                return Err(SimError::FellOffEnd { position: pc });
            };
            let position = pc;
            pc += 1;

            let mut taken = None;
            match *insn {
                Insn::Move64 { dst, src } => self.regs[dst.index()] = self.gpr(src),
                Insn::MoveImm64 { dst, imm } => self.regs[dst.index()] = imm,
                Insn::MoveImm32 { dst, imm } => self.set32(dst, imm as u32),
                Insn::LoadSlot { dst, slot } => {
                    let value = slot_ref(frame, slot, position)?;
                    self.regs[dst.index()] = value.bits();
                }
                Insn::StoreSlot { slot, src } => {
                    let bits = self.gpr(src);
                    *slot_mut(frame, slot, position)? = Value::from_bits(bits);
                }
                Insn::Load64 { dst, base, offset } => {
                    let address = self.gpr(base).wrapping_add(offset as i64 as u64);
                    let value = bridge
                        .heap()
                        .load64(address)
                        .ok_or(SimError::BadAddress { position, address })?;
                    self.regs[dst.index()] = value;
                }
                Insn::Load32 { dst, base, offset } => {
                    let address = self.gpr(base).wrapping_add(offset as i64 as u64);
                    let value = bridge
                        .heap()
                        .load32(address)
                        .ok_or(SimError::BadAddress { position, address })?;
                    self.set32(dst, value);
                }
                Insn::Load16 { dst, base, offset } => {
                    let address = self.gpr(base).wrapping_add(offset as i64 as u64);
                    let value = bridge
                        .heap()
                        .load16(address)
                        .ok_or(SimError::BadAddress { position, address })?;
                    self.set32(dst, value as u32);
                }
                Insn::Alu64 { op, dst, src } => {
                    let a = self.gpr(dst);
                    let b = self.operand64(src);
                    self.regs[dst.index()] = match op {
                        Alu64::Add => a.wrapping_add(b),
                        Alu64::Sub => a.wrapping_sub(b),
                        Alu64::And => a & b,
                        Alu64::Or => a | b,
                        Alu64::Xor => a ^ b,
                    };
                }
                Insn::Neg32 { reg } => {
                    let v = self.gpr(reg) as u32 as i32;
                    self.set32(reg, v.wrapping_neg() as u32);
                }
                Insn::ZeroExtend32 { reg } => {
                    let v = self.gpr(reg) as u32;
                    self.set32(reg, v);
                }
                Insn::Shift32 { kind, reg, amount } => {
                    let count = match amount {
                        ShiftAmount::Imm(n) => n as u32 & 0x1f,
                        ShiftAmount::Count => self.gpr(Gpr::T2) as u32 & 0x1f,
                    };
                    let v = self.gpr(reg) as u32;
                    let result = match kind {
                        ShiftKind::Left => v << count,
                        ShiftKind::Right => ((v as i32) >> count) as u32,
                        ShiftKind::UnsignedRight => v >> count,
                    };
                    self.set32(reg, result);
                }
                Insn::Branch32 { cond, lhs, rhs, target } => {
                    if cond.holds_u32(self.gpr(lhs) as u32, self.operand32(rhs)) {
                        taken = Some(target);
                    }
                }
                Insn::Branch64 { cond, lhs, rhs, target } => {
                    if cond.holds_u64(self.gpr(lhs), self.operand64(rhs)) {
                        taken = Some(target);
                    }
                }
                Insn::BranchTest32 { cond, reg, mask, target } => {
                    if cond.holds_u32(self.gpr(reg) as u32 & self.operand32(mask)) {
                        taken = Some(target);
                    }
                }
                Insn::BranchTest64 { cond, reg, mask, target } => {
                    if cond.holds_u64(self.gpr(reg) & self.operand64(mask)) {
                        taken = Some(target);
                    }
                }
                Insn::BranchArith32 { op, dst, src, target } => {
                    let a = self.gpr(dst) as u32 as i32;
                    let b = self.operand32(src) as i32;
                    let (result, overflow) = match op {
                        ArithOp::Add => a.overflowing_add(b),
                        ArithOp::Sub => a.overflowing_sub(b),
                        ArithOp::Mul => a.overflowing_mul(b),
                    };
                    self.set32(dst, result as u32);
                    if overflow {
                        taken = Some(target);
                    }
                }
                Insn::Jump { target } => taken = Some(target),
                Insn::IncrementCounter {
                    kind,
                    bytecode_offset,
                } => profile.increment(kind, bytecode_offset),
                Insn::Idiv32 { divisor } => {
                    let dividend = self.gpr(Gpr::T0) as u32 as i32;
                    let divisor = self.gpr(divisor) as u32 as i32;
                    let (Some(quotient), Some(remainder)) =
                        (dividend.checked_div(divisor), dividend.checked_rem(divisor))
                    else {
                        return Err(SimError::HardwareFault {
                            position,
                            detail: format!("idiv {} / {}", dividend, divisor),
                        });
                    };
                    self.set32(Gpr::T0, quotient as u32);
                    self.set32(Gpr::T1, remainder as u32);
                }
                Insn::MoveGprToFpr { dst, src } => {
                    self.fregs[dst.index()] = f64::from_bits(self.gpr(src));
                }
                Insn::MoveFprToGpr { dst, src } => {
                    self.regs[dst.index()] = self.fpr(src).to_bits();
                }
                Insn::ConvertInt32ToDouble { dst, src } => {
                    self.fregs[dst.index()] = self.gpr(src) as u32 as i32 as f64;
                }
                Insn::DoubleArith { op, dst, src } => {
                    self.fregs[dst.index()] = op.apply(self.fpr(dst), self.fpr(src));
                }
                Insn::BranchDouble { cond, lhs, rhs, target } => {
                    if cond.holds(self.fpr(lhs), self.fpr(rhs)) {
                        taken = Some(target);
                    }
                }
                Insn::BranchTruncateDoubleToInt32 { src, dst, target } => {
                    let result = truncate_to_int32(self.fpr(src));
                    self.set32(dst, result as u32);
                    if result == i32::MIN {
                        taken = Some(target);
                    }
                }
                Insn::BranchConvertDoubleToInt32 {
                    src,
                    dst,
                    scratch,
                    target,
                } => {
                    let d = self.fpr(src);
                    let result = truncate_to_int32(d);
                    self.set32(dst, result as u32);
                    self.fregs[scratch.index()] = result as f64;
                    if result == 0 || d.is_nan() || result as f64 != d {
                        taken = Some(target);
                    }
                }
                Insn::CallOperation {
                    op,
                    args,
                    bytecode_offset,
                } => {
                    let lhs = Value::from_bits(self.gpr(args[0]));
                    let rhs = Value::from_bits(self.gpr(args[1]));
                    let result = bridge.call(op, lhs, rhs, bytecode_offset);
                    outcome.calls.push(RecordedCall {
                        op,
                        lhs,
                        rhs,
                        bytecode_offset,
                        result,
                    });
                    self.regs = [result, CLOBBERED, CLOBBERED, CLOBBERED];
                    self.fregs = [f64::from_bits(CLOBBERED); 3];
                }
                Insn::Return => return Ok(outcome),
            }

            if let Some(label) = taken {
                pc = code
                    .position(label)
                    .ok_or(SimError::FellOffEnd { position })?;
            }
        }
    }
}

/// `cvttsd2si` on 32 bits: out-of-range and NaN inputs produce `i32::MIN`.
fn truncate_to_int32(d: f64) -> i32 {
    let t = d.trunc();
    if d.is_nan() || t > i32::MAX as f64 || t < i32::MIN as f64 {
        i32::MIN
    } else {
        t as i32
    }
}

fn slot_index(frame_len: usize, slot: i32, position: usize) -> Result<usize, SimError> {
    usize::try_from(slot)
        .ok()
        .filter(|&index| index < frame_len)
        .ok_or(SimError::SlotOutOfRange { position, slot })
}

fn slot_ref(frame: &[Value], slot: i32, position: usize) -> Result<Value, SimError> {
    let index = slot_index(frame.len(), slot, position)?;
    Ok(frame[index])
}

fn slot_mut(frame: &mut [Value], slot: i32, position: usize) -> Result<&mut Value, SimError> {
    let index = slot_index(frame.len(), slot, position)?;
    Ok(&mut frame[index])
}
