//! Static operand classification and per-instruction shape selection.
//!
//! The shape of an instruction decides which fast path is emitted and how
//! many slow-case sites it records. Both compilation passes call
//! [`select_shape`], so it must depend only on the instruction, the constant
//! table and the capability flags.

use crate::config::Capabilities;
use crate::vm::{
    ArithOp, CodeBlock, Constant, Instruction, OperandTypes, ShiftKind, Value, VirtualRegister,
};
use std::fmt;

/// Answers static questions about operands of one method.
#[derive(Debug, Clone, Copy)]
pub struct OperandClassifier<'a> {
    block: &'a CodeBlock,
}

impl<'a> OperandClassifier<'a> {
    pub fn new(block: &'a CodeBlock) -> Self {
        Self { block }
    }

    fn constant(&self, reg: VirtualRegister) -> Option<&'a Constant> {
        self.block.constant(reg)
    }

    pub fn is_constant(&self, reg: VirtualRegister) -> bool {
        self.constant(reg).is_some()
    }

    /// Encoded value of a constant operand.
    pub fn constant_value(&self, reg: VirtualRegister) -> Option<Value> {
        self.constant(reg).map(Constant::value)
    }

    pub fn constant_int(&self, reg: VirtualRegister) -> Option<i32> {
        self.constant_value(reg).and_then(Value::as_int32)
    }

    /// A constant number that is not an int32.
    pub fn constant_double(&self, reg: VirtualRegister) -> Option<Value> {
        self.constant_value(reg).filter(|v| v.is_double())
    }

    /// The only code unit of a one-character string constant.
    pub fn constant_char(&self, reg: VirtualRegister) -> Option<u16> {
        match self.constant(reg)? {
            Constant::String { text, .. } => {
                let mut units = text.encode_utf16();
                match (units.next(), units.next()) {
                    (Some(unit), None) => Some(unit),
                    _ => None,
                }
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareShape {
    /// Single-character string constant as the first operand.
    CharLeft(u16),
    CharRight(u16),
    IntRight(i32),
    IntLeft(i32),
    Registers,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithShape {
    /// A hint rules out numbers; the fast path is the runtime call.
    Generic,
    IntLeft(i32),
    IntRight(i32),
    Registers,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShiftShape {
    /// Constant amount, already masked to five bits.
    ConstantAmount(u8),
    Registers { fp_truncate: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitAndShape {
    IntLeft(i32),
    IntRight(i32),
    Registers,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModShape {
    IntegerDivide,
    RuntimeCall,
}

/// How one operand of a division becomes a double.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DivOperand {
    ConstantDouble(Value),
    ConstantInt(i32),
    /// Checked at run time; a non-number goes slow.
    Checked,
    /// Hinted as a number. Still checked, since hints are advisory; the
    /// site is expected never to fire.
    Trusted,
}

impl DivOperand {
    fn sites(self) -> usize {
        match self {
            DivOperand::Checked | DivOperand::Trusted => 1,
            DivOperand::ConstantDouble(_) | DivOperand::ConstantInt(_) => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Negate,
    Inc,
    Dec,
    Unsigned,
    Compare(CompareShape),
    Arith(ArithOp, ArithShape),
    Shift(ShiftKind, ShiftShape),
    BitAnd(BitAndShape),
    Mod(ModShape),
    Div { lhs: DivOperand, rhs: DivOperand },
}

impl Shape {
    /// Number of slow-case sites the fast path records.
    pub fn site_count(&self) -> usize {
        match *self {
            Shape::Negate | Shape::Inc | Shape::Dec | Shape::Unsigned => 2,
            Shape::Compare(CompareShape::CharLeft(_) | CompareShape::CharRight(_)) => 4,
            Shape::Compare(CompareShape::IntLeft(_) | CompareShape::IntRight(_)) => 1,
            Shape::Compare(CompareShape::Registers) => 2,
            Shape::Arith(_, ArithShape::Generic) => 1,
            Shape::Arith(_, ArithShape::IntLeft(_) | ArithShape::IntRight(_)) => 2,
            Shape::Arith(ArithOp::Mul, ArithShape::Registers) => 4,
            Shape::Arith(_, ArithShape::Registers) => 3,
            Shape::Shift(_, ShiftShape::ConstantAmount(_)) => 1,
            Shape::Shift(_, ShiftShape::Registers { fp_truncate: true }) => 3,
            Shape::Shift(_, ShiftShape::Registers { fp_truncate: false }) => 2,
            Shape::BitAnd(_) => 1,
            Shape::Mod(ModShape::IntegerDivide) => 5,
            Shape::Mod(ModShape::RuntimeCall) => 0,
            Shape::Div { lhs, rhs } => lhs.sites() + rhs.sites(),
        }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shape::Negate | Shape::Inc | Shape::Dec | Shape::Unsigned => write!(f, "int"),
            Shape::Compare(CompareShape::CharLeft(c)) => write!(f, "char-left({:#06x})", c),
            Shape::Compare(CompareShape::CharRight(c)) => write!(f, "char-right({:#06x})", c),
            Shape::Compare(CompareShape::IntLeft(n)) => write!(f, "int-left({})", n),
            Shape::Compare(CompareShape::IntRight(n)) => write!(f, "int-right({})", n),
            Shape::Compare(CompareShape::Registers) => write!(f, "registers"),
            Shape::Arith(_, ArithShape::Generic) => write!(f, "generic"),
            Shape::Arith(_, ArithShape::IntLeft(n)) => write!(f, "int-left({})", n),
            Shape::Arith(_, ArithShape::IntRight(n)) => write!(f, "int-right({})", n),
            Shape::Arith(_, ArithShape::Registers) => write!(f, "registers"),
            Shape::Shift(_, ShiftShape::ConstantAmount(n)) => write!(f, "constant-amount({})", n),
            Shape::Shift(_, ShiftShape::Registers { fp_truncate }) => {
                write!(f, "registers(fp_truncate={})", fp_truncate)
            }
            Shape::BitAnd(BitAndShape::IntLeft(n)) => write!(f, "int-left({})", n),
            Shape::BitAnd(BitAndShape::IntRight(n)) => write!(f, "int-right({})", n),
            Shape::BitAnd(BitAndShape::Registers) => write!(f, "registers"),
            Shape::Mod(ModShape::IntegerDivide) => write!(f, "integer-divide"),
            Shape::Mod(ModShape::RuntimeCall) => write!(f, "runtime-call"),
            Shape::Div { lhs, rhs } => write!(f, "div({:?}, {:?})", lhs, rhs),
        }
    }
}

pub fn compare_shape(c: &OperandClassifier<'_>, lhs: VirtualRegister, rhs: VirtualRegister) -> CompareShape {
    if let Some(ch) = c.constant_char(lhs) {
        CompareShape::CharLeft(ch)
    } else if let Some(ch) = c.constant_char(rhs) {
        CompareShape::CharRight(ch)
    } else if let Some(n) = c.constant_int(rhs) {
        CompareShape::IntRight(n)
    } else if let Some(n) = c.constant_int(lhs) {
        CompareShape::IntLeft(n)
    } else {
        CompareShape::Registers
    }
}

pub fn arith_shape(
    c: &OperandClassifier<'_>,
    op: ArithOp,
    lhs: VirtualRegister,
    rhs: VirtualRegister,
    types: OperandTypes,
) -> ArithShape {
    if op == ArithOp::Add && (!types.first.might_be_number() || !types.second.might_be_number()) {
        return ArithShape::Generic;
    }
    // Multiplying by zero or a negative constant can produce -0.
    let usable = |n: i32| op != ArithOp::Mul || n > 0;
    match (c.constant_int(lhs), c.constant_int(rhs)) {
        (Some(n), _) if usable(n) => ArithShape::IntLeft(n),
        (_, Some(n)) if usable(n) => ArithShape::IntRight(n),
        _ => ArithShape::Registers,
    }
}

pub fn shift_shape(c: &OperandClassifier<'_>, rhs: VirtualRegister, caps: &Capabilities) -> ShiftShape {
    match c.constant_int(rhs) {
        Some(n) => ShiftShape::ConstantAmount((n & 0x1f) as u8),
        None => ShiftShape::Registers {
            fp_truncate: caps.fp_truncate,
        },
    }
}

pub fn bitand_shape(c: &OperandClassifier<'_>, lhs: VirtualRegister, rhs: VirtualRegister) -> BitAndShape {
    if let Some(n) = c.constant_int(lhs) {
        BitAndShape::IntLeft(n)
    } else if let Some(n) = c.constant_int(rhs) {
        BitAndShape::IntRight(n)
    } else {
        BitAndShape::Registers
    }
}

pub fn mod_shape(caps: &Capabilities) -> ModShape {
    if caps.integer_divide {
        ModShape::IntegerDivide
    } else {
        ModShape::RuntimeCall
    }
}

fn div_operand(c: &OperandClassifier<'_>, reg: VirtualRegister, definitely_number: bool) -> DivOperand {
    if let Some(v) = c.constant_double(reg) {
        DivOperand::ConstantDouble(v)
    } else if let Some(n) = c.constant_int(reg) {
        DivOperand::ConstantInt(n)
    } else if definitely_number {
        DivOperand::Trusted
    } else {
        DivOperand::Checked
    }
}

pub fn div_shape(
    c: &OperandClassifier<'_>,
    lhs: VirtualRegister,
    rhs: VirtualRegister,
    types: OperandTypes,
) -> Shape {
    Shape::Div {
        lhs: div_operand(c, lhs, types.first.definitely_number()),
        rhs: div_operand(c, rhs, types.second.definitely_number()),
    }
}

/// The shape of an instruction.
pub fn select_shape(c: &OperandClassifier<'_>, instruction: &Instruction, caps: &Capabilities) -> Shape {
    match *instruction {
        Instruction::Negate { .. } => Shape::Negate,
        Instruction::Inc { .. } => Shape::Inc,
        Instruction::Dec { .. } => Shape::Dec,
        Instruction::Unsigned { .. } => Shape::Unsigned,
        Instruction::Lshift { rhs, .. } => Shape::Shift(ShiftKind::Left, shift_shape(c, rhs, caps)),
        Instruction::Rshift { rhs, .. } => Shape::Shift(ShiftKind::Right, shift_shape(c, rhs, caps)),
        Instruction::Urshift { rhs, .. } => {
            Shape::Shift(ShiftKind::UnsignedRight, shift_shape(c, rhs, caps))
        }
        Instruction::Bitand { lhs, rhs, .. } => Shape::BitAnd(bitand_shape(c, lhs, rhs)),
        Instruction::Mod { .. } => Shape::Mod(mod_shape(caps)),
        Instruction::Add { lhs, rhs, types, .. } => {
            Shape::Arith(ArithOp::Add, arith_shape(c, ArithOp::Add, lhs, rhs, types))
        }
        Instruction::Sub { lhs, rhs, types, .. } => {
            Shape::Arith(ArithOp::Sub, arith_shape(c, ArithOp::Sub, lhs, rhs, types))
        }
        Instruction::Mul { lhs, rhs, types, .. } => {
            Shape::Arith(ArithOp::Mul, arith_shape(c, ArithOp::Mul, lhs, rhs, types))
        }
        Instruction::Div { lhs, rhs, types, .. } => div_shape(c, lhs, rhs, types),
        Instruction::Jless { lhs, rhs, .. }
        | Instruction::Jlesseq { lhs, rhs, .. }
        | Instruction::Jgreater { lhs, rhs, .. }
        | Instruction::Jgreatereq { lhs, rhs, .. }
        | Instruction::Jnless { lhs, rhs, .. }
        | Instruction::Jnlesseq { lhs, rhs, .. }
        | Instruction::Jngreater { lhs, rhs, .. }
        | Instruction::Jngreatereq { lhs, rhs, .. } => Shape::Compare(compare_shape(c, lhs, rhs)),
    }
}
