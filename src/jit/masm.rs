//! Macro assembler.
//!
//! Emitters describe machine code as a list of typed macro instructions
//! (`Insn`) over four temporaries and three double registers. Branches carry
//! a label that is resolved when the stream is finalized; the result can be
//! lowered to x86-64 or executed by the simulator.

use super::error::JitError;
use crate::vm::{ArithOp, CounterKind, Relation, RuntimeOp, ShiftKind};

/// General-purpose temporaries.
///
/// `T0` doubles as the return register of runtime calls and as the
/// dividend/quotient of `Idiv32`; `T1` receives the remainder; `T2` holds
/// register shift amounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gpr {
    T0,
    T1,
    T2,
    T3,
}

impl Gpr {
    pub const ALL: [Gpr; 4] = [Gpr::T0, Gpr::T1, Gpr::T2, Gpr::T3];

    pub fn index(self) -> usize {
        self as usize
    }
}

/// Double-precision temporaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fpr {
    F0,
    F1,
    F2,
}

impl Fpr {
    pub fn index(self) -> usize {
        self as usize
    }
}

/// 64-bit source operand. The tag constants live in pinned registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand64 {
    Reg(Gpr),
    /// Sign-extended to 64 bits.
    Imm32(i32),
    TagTypeNumber,
    TagMask,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand32 {
    Reg(Gpr),
    Imm(i32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShiftAmount {
    Imm(u8),
    /// Low five bits of `T2`.
    Count,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alu64 {
    Add,
    Sub,
    And,
    Or,
    Xor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoubleOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl From<ArithOp> for DoubleOp {
    fn from(op: ArithOp) -> Self {
        match op {
            ArithOp::Add => DoubleOp::Add,
            ArithOp::Sub => DoubleOp::Sub,
            ArithOp::Mul => DoubleOp::Mul,
        }
    }
}

impl DoubleOp {
    pub fn apply(self, a: f64, b: f64) -> f64 {
        match self {
            DoubleOp::Add => a + b,
            DoubleOp::Sub => a - b,
            DoubleOp::Mul => a * b,
            DoubleOp::Div => a / b,
        }
    }
}

/// Integer comparison conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationalCondition {
    Equal,
    NotEqual,
    Above,
    AboveOrEqual,
    Below,
    BelowOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
}

impl RelationalCondition {
    /// Signed condition for a relation.
    pub fn from_relation(relation: Relation) -> Self {
        match relation {
            Relation::Less => RelationalCondition::LessThan,
            Relation::LessEq => RelationalCondition::LessThanOrEqual,
            Relation::Greater => RelationalCondition::GreaterThan,
            Relation::GreaterEq => RelationalCondition::GreaterThanOrEqual,
        }
    }

    /// The condition with operands swapped.
    pub fn commute(self) -> Self {
        use RelationalCondition::*;
        match self {
            Equal => Equal,
            NotEqual => NotEqual,
            Above => Below,
            AboveOrEqual => BelowOrEqual,
            Below => Above,
            BelowOrEqual => AboveOrEqual,
            GreaterThan => LessThan,
            GreaterThanOrEqual => LessThanOrEqual,
            LessThan => GreaterThan,
            LessThanOrEqual => GreaterThanOrEqual,
        }
    }

    pub fn holds_u64(self, a: u64, b: u64) -> bool {
        use RelationalCondition::*;
        let (sa, sb) = (a as i64, b as i64);
        match self {
            Equal => a == b,
            NotEqual => a != b,
            Above => a > b,
            AboveOrEqual => a >= b,
            Below => a < b,
            BelowOrEqual => a <= b,
            GreaterThan => sa > sb,
            GreaterThanOrEqual => sa >= sb,
            LessThan => sa < sb,
            LessThanOrEqual => sa <= sb,
        }
    }

    pub fn holds_u32(self, a: u32, b: u32) -> bool {
        use RelationalCondition::*;
        let (sa, sb) = (a as i32, b as i32);
        match self {
            Equal => a == b,
            NotEqual => a != b,
            Above => a > b,
            AboveOrEqual => a >= b,
            Below => a < b,
            BelowOrEqual => a <= b,
            GreaterThan => sa > sb,
            GreaterThanOrEqual => sa >= sb,
            LessThan => sa < sb,
            LessThanOrEqual => sa <= sb,
        }
    }
}

/// Conditions on `reg & mask`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultCondition {
    Zero,
    NonZero,
    Signed,
}

impl ResultCondition {
    pub fn holds_u64(self, v: u64) -> bool {
        match self {
            ResultCondition::Zero => v == 0,
            ResultCondition::NonZero => v != 0,
            ResultCondition::Signed => (v as i64) < 0,
        }
    }

    pub fn holds_u32(self, v: u32) -> bool {
        match self {
            ResultCondition::Zero => v == 0,
            ResultCondition::NonZero => v != 0,
            ResultCondition::Signed => (v as i32) < 0,
        }
    }
}

/// Double comparison conditions. The plain forms are false when either
/// operand is NaN; the `OrUnordered` forms are true.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoubleCondition {
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    LessThanOrUnordered,
    LessThanOrEqualOrUnordered,
    GreaterThanOrUnordered,
    GreaterThanOrEqualOrUnordered,
}

impl DoubleCondition {
    /// Condition under which a relational jump is taken. Negated jumps are
    /// taken on the inverted relation or when the comparison is unordered.
    pub fn for_jump(relation: Relation, negated: bool) -> Self {
        use DoubleCondition::*;
        match (relation, negated) {
            (Relation::Less, false) => LessThan,
            (Relation::LessEq, false) => LessThanOrEqual,
            (Relation::Greater, false) => GreaterThan,
            (Relation::GreaterEq, false) => GreaterThanOrEqual,
            (Relation::Less, true) => GreaterThanOrEqualOrUnordered,
            (Relation::LessEq, true) => GreaterThanOrUnordered,
            (Relation::Greater, true) => LessThanOrEqualOrUnordered,
            (Relation::GreaterEq, true) => LessThanOrUnordered,
        }
    }

    pub fn holds(self, a: f64, b: f64) -> bool {
        use DoubleCondition::*;
        let unordered = a.is_nan() || b.is_nan();
        match self {
            LessThan => a < b,
            LessThanOrEqual => a <= b,
            GreaterThan => a > b,
            GreaterThanOrEqual => a >= b,
            LessThanOrUnordered => unordered || a < b,
            LessThanOrEqualOrUnordered => unordered || a <= b,
            GreaterThanOrUnordered => unordered || a > b,
            GreaterThanOrEqualOrUnordered => unordered || a >= b,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(usize);

impl Label {
    pub fn id(self) -> usize {
        self.0
    }
}

/// An emitted branch whose destination is still open.
///
/// Every jump must be linked exactly once, either to the current position
/// or to an existing label.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "a jump must be linked"]
pub struct Jump {
    label: Label,
}

impl Jump {
    /// Land the jump at the current position.
    pub fn link(self, masm: &mut MacroAssembler) {
        masm.bind(self.label);
    }

    /// Land the jump on `target`.
    pub fn link_to(self, masm: &mut MacroAssembler, target: Label) {
        masm.labels[self.label.0] = LabelState::Alias(target);
    }
}

#[derive(Debug, Default)]
#[must_use = "a jump list must be linked"]
pub struct JumpList {
    jumps: Vec<Jump>,
}

impl JumpList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, jump: Jump) {
        self.jumps.push(jump);
    }

    pub fn is_empty(&self) -> bool {
        self.jumps.is_empty()
    }

    pub fn link(self, masm: &mut MacroAssembler) {
        for jump in self.jumps {
            jump.link(masm);
        }
    }

    pub fn link_to(self, masm: &mut MacroAssembler, target: Label) {
        for jump in self.jumps {
            jump.link_to(masm, target);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LabelState {
    Unbound,
    Bound(usize),
    Alias(Label),
}

/// Macro instructions.
#[derive(Debug, Clone, PartialEq)]
pub enum Insn {
    Move64 { dst: Gpr, src: Gpr },
    MoveImm64 { dst: Gpr, imm: u64 },
    /// Zero-extends into the upper half.
    MoveImm32 { dst: Gpr, imm: i32 },
    LoadSlot { dst: Gpr, slot: i32 },
    StoreSlot { slot: i32, src: Gpr },
    Load64 { dst: Gpr, base: Gpr, offset: i32 },
    Load32 { dst: Gpr, base: Gpr, offset: i32 },
    Load16 { dst: Gpr, base: Gpr, offset: i32 },
    Alu64 { op: Alu64, dst: Gpr, src: Operand64 },
    Neg32 { reg: Gpr },
    ZeroExtend32 { reg: Gpr },
    Shift32 { kind: ShiftKind, reg: Gpr, amount: ShiftAmount },
    Branch32 { cond: RelationalCondition, lhs: Gpr, rhs: Operand32, target: Label },
    Branch64 { cond: RelationalCondition, lhs: Gpr, rhs: Operand64, target: Label },
    BranchTest32 { cond: ResultCondition, reg: Gpr, mask: Operand32, target: Label },
    BranchTest64 { cond: ResultCondition, reg: Gpr, mask: Operand64, target: Label },
    /// `dst = dst op src` on 32 bits; branches on signed overflow.
    BranchArith32 { op: ArithOp, dst: Gpr, src: Operand32, target: Label },
    Jump { target: Label },
    IncrementCounter { kind: CounterKind, bytecode_offset: u32 },
    /// `T0 = T0 / divisor`, `T1 = T0 % divisor` on 32 bits.
    Idiv32 { divisor: Gpr },
    MoveGprToFpr { dst: Fpr, src: Gpr },
    MoveFprToGpr { dst: Gpr, src: Fpr },
    ConvertInt32ToDouble { dst: Fpr, src: Gpr },
    DoubleArith { op: DoubleOp, dst: Fpr, src: Fpr },
    BranchDouble { cond: DoubleCondition, lhs: Fpr, rhs: Fpr, target: Label },
    /// Truncates `src` into `dst`; branches when the result does not fit.
    BranchTruncateDoubleToInt32 { src: Fpr, dst: Gpr, target: Label },
    /// Converts `src` into `dst`; branches unless the conversion is exact
    /// and non-zero.
    BranchConvertDoubleToInt32 { src: Fpr, dst: Gpr, scratch: Fpr, target: Label },
    /// Calls `op(args[0], args[1], bytecode_offset)`; the result lands in `T0`.
    CallOperation { op: RuntimeOp, args: [Gpr; 2], bytecode_offset: u32 },
    Return,
}

impl Insn {
    pub fn target(&self) -> Option<Label> {
        match *self {
            Insn::Branch32 { target, .. }
            | Insn::Branch64 { target, .. }
            | Insn::BranchTest32 { target, .. }
            | Insn::BranchTest64 { target, .. }
            | Insn::BranchArith32 { target, .. }
            | Insn::Jump { target }
            | Insn::BranchDouble { target, .. }
            | Insn::BranchTruncateDoubleToInt32 { target, .. }
            | Insn::BranchConvertDoubleToInt32 { target, .. } => Some(target),
            _ => None,
        }
    }
}

/// A finalized instruction stream with every referenced label resolved.
#[derive(Debug, Clone)]
pub struct Code {
    pub insns: Vec<Insn>,
    label_positions: Vec<Option<usize>>,
}

impl Code {
    /// Position a label resolves to. Positions index `insns`; the end of the
    /// stream is a valid position.
    pub fn position(&self, label: Label) -> Option<usize> {
        self.label_positions.get(label.0).copied().flatten()
    }

    pub fn len(&self) -> usize {
        self.insns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.insns.is_empty()
    }

    /// Number of runtime call sites.
    pub fn call_count(&self) -> usize {
        self.insns
            .iter()
            .filter(|i| matches!(i, Insn::CallOperation { .. }))
            .count()
    }
}

#[derive(Debug, Default)]
pub struct MacroAssembler {
    insns: Vec<Insn>,
    labels: Vec<LabelState>,
}

impl MacroAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(&self) -> usize {
        self.insns.len()
    }

    pub fn insns(&self) -> &[Insn] {
        &self.insns
    }

    /// A fresh, unbound label.
    pub fn new_label(&mut self) -> Label {
        self.labels.push(LabelState::Unbound);
        Label(self.labels.len() - 1)
    }

    /// A label bound at the current position.
    pub fn label(&mut self) -> Label {
        let label = self.new_label();
        self.bind(label);
        label
    }

    pub fn bind(&mut self, label: Label) {
        debug_assert_eq!(self.labels[label.0], LabelState::Unbound, "label bound twice");
        self.labels[label.0] = LabelState::Bound(self.insns.len());
    }

    fn emit(&mut self, insn: Insn) {
        self.insns.push(insn);
    }

    fn emit_branch(&mut self, make: impl FnOnce(Label) -> Insn) -> Jump {
        let label = self.new_label();
        self.emit(make(label));
        Jump { label }
    }

    // ==================== Data movement ====================

    pub fn move64(&mut self, dst: Gpr, src: Gpr) {
        if dst != src {
            self.emit(Insn::Move64 { dst, src });
        }
    }

    pub fn move_imm64(&mut self, dst: Gpr, imm: u64) {
        self.emit(Insn::MoveImm64 { dst, imm });
    }

    pub fn move_imm32(&mut self, dst: Gpr, imm: i32) {
        self.emit(Insn::MoveImm32 { dst, imm });
    }

    pub fn load_slot(&mut self, dst: Gpr, slot: i32) {
        self.emit(Insn::LoadSlot { dst, slot });
    }

    pub fn store_slot(&mut self, slot: i32, src: Gpr) {
        self.emit(Insn::StoreSlot { slot, src });
    }

    pub fn load64(&mut self, dst: Gpr, base: Gpr, offset: i32) {
        self.emit(Insn::Load64 { dst, base, offset });
    }

    pub fn load32(&mut self, dst: Gpr, base: Gpr, offset: i32) {
        self.emit(Insn::Load32 { dst, base, offset });
    }

    pub fn load16(&mut self, dst: Gpr, base: Gpr, offset: i32) {
        self.emit(Insn::Load16 { dst, base, offset });
    }

    // ==================== Integer arithmetic ====================

    pub fn add64(&mut self, dst: Gpr, src: Operand64) {
        self.emit(Insn::Alu64 { op: Alu64::Add, dst, src });
    }

    pub fn sub64(&mut self, dst: Gpr, src: Operand64) {
        self.emit(Insn::Alu64 { op: Alu64::Sub, dst, src });
    }

    pub fn and64(&mut self, dst: Gpr, src: Operand64) {
        self.emit(Insn::Alu64 { op: Alu64::And, dst, src });
    }

    pub fn or64(&mut self, dst: Gpr, src: Operand64) {
        self.emit(Insn::Alu64 { op: Alu64::Or, dst, src });
    }

    pub fn xor64(&mut self, dst: Gpr, src: Operand64) {
        self.emit(Insn::Alu64 { op: Alu64::Xor, dst, src });
    }

    pub fn neg32(&mut self, reg: Gpr) {
        self.emit(Insn::Neg32 { reg });
    }

    pub fn zero_extend32(&mut self, reg: Gpr) {
        self.emit(Insn::ZeroExtend32 { reg });
    }

    pub fn shift32(&mut self, kind: ShiftKind, reg: Gpr, amount: ShiftAmount) {
        self.emit(Insn::Shift32 { kind, reg, amount });
    }

    pub fn idiv32(&mut self, divisor: Gpr) {
        self.emit(Insn::Idiv32 { divisor });
    }

    // ==================== Branches ====================

    pub fn branch32(&mut self, cond: RelationalCondition, lhs: Gpr, rhs: Operand32) -> Jump {
        self.emit_branch(|target| Insn::Branch32 { cond, lhs, rhs, target })
    }

    pub fn branch64(&mut self, cond: RelationalCondition, lhs: Gpr, rhs: Operand64) -> Jump {
        self.emit_branch(|target| Insn::Branch64 { cond, lhs, rhs, target })
    }

    pub fn branch_test32(&mut self, cond: ResultCondition, reg: Gpr, mask: Operand32) -> Jump {
        self.emit_branch(|target| Insn::BranchTest32 { cond, reg, mask, target })
    }

    pub fn branch_test64(&mut self, cond: ResultCondition, reg: Gpr, mask: Operand64) -> Jump {
        self.emit_branch(|target| Insn::BranchTest64 { cond, reg, mask, target })
    }

    pub fn branch_arith32(&mut self, op: ArithOp, dst: Gpr, src: Operand32) -> Jump {
        self.emit_branch(|target| Insn::BranchArith32 { op, dst, src, target })
    }

    pub fn jump(&mut self) -> Jump {
        self.emit_branch(|target| Insn::Jump { target })
    }

    // ==================== Floating point ====================

    pub fn move_gpr_to_fpr(&mut self, dst: Fpr, src: Gpr) {
        self.emit(Insn::MoveGprToFpr { dst, src });
    }

    pub fn move_fpr_to_gpr(&mut self, dst: Gpr, src: Fpr) {
        self.emit(Insn::MoveFprToGpr { dst, src });
    }

    pub fn convert_int32_to_double(&mut self, dst: Fpr, src: Gpr) {
        self.emit(Insn::ConvertInt32ToDouble { dst, src });
    }

    pub fn double_arith(&mut self, op: DoubleOp, dst: Fpr, src: Fpr) {
        self.emit(Insn::DoubleArith { op, dst, src });
    }

    pub fn branch_double(&mut self, cond: DoubleCondition, lhs: Fpr, rhs: Fpr) -> Jump {
        self.emit_branch(|target| Insn::BranchDouble { cond, lhs, rhs, target })
    }

    pub fn branch_truncate_double_to_int32(&mut self, src: Fpr, dst: Gpr) -> Jump {
        self.emit_branch(|target| Insn::BranchTruncateDoubleToInt32 { src, dst, target })
    }

    pub fn branch_convert_double_to_int32(&mut self, src: Fpr, dst: Gpr, scratch: Fpr) -> Jump {
        self.emit_branch(|target| Insn::BranchConvertDoubleToInt32 {
            src,
            dst,
            scratch,
            target,
        })
    }

    // ==================== Calls and profiling ====================

    pub fn increment_counter(&mut self, kind: CounterKind, bytecode_offset: u32) {
        self.emit(Insn::IncrementCounter {
            kind,
            bytecode_offset,
        });
    }

    pub fn call_operation(&mut self, op: RuntimeOp, args: [Gpr; 2], bytecode_offset: u32) {
        self.emit(Insn::CallOperation {
            op,
            args,
            bytecode_offset,
        });
    }

    pub fn ret(&mut self) {
        self.emit(Insn::Return);
    }

    fn resolve(&self, label: Label) -> Option<usize> {
        let mut current = label;
        for _ in 0..=self.labels.len() {
            match self.labels[current.0] {
                LabelState::Bound(pos) => return Some(pos),
                LabelState::Alias(next) => current = next,
                LabelState::Unbound => return None,
            }
        }
        None
    }

    /// Resolve every label. Fails if any emitted branch has no destination.
    pub fn finalize(self) -> Result<Code, JitError> {
        let label_positions: Vec<Option<usize>> = (0..self.labels.len())
            .map(|id| self.resolve(Label(id)))
            .collect();
        for insn in &self.insns {
            if let Some(target) = insn.target() {
                if label_positions[target.0].is_none() {
                    return Err(JitError::UnlinkedJump { label: target.0 });
                }
            }
        }
        Ok(Code {
            insns: self.insns,
            label_positions,
        })
    }
}
