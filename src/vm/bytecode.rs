//! Decoded bytecode for the arithmetic/relational opcode family.
//!
//! Instructions are addressed by their index in the method (the bytecode
//! offset). Jump targets are absolute offsets; a target equal to the method
//! length exits the method.

use super::heap::Heap;
use super::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Constant `k` lives at register `FIRST_CONSTANT_REGISTER - k`.
pub const FIRST_CONSTANT_REGISTER: i32 = -0x4000_0000;

/// Index into the per-invocation value array.
///
/// Non-negative indices are frame slots; indices at or below
/// [`FIRST_CONSTANT_REGISTER`] name constant table entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VirtualRegister(pub i32);

impl VirtualRegister {
    pub const fn slot(index: u32) -> Self {
        VirtualRegister(index as i32)
    }

    pub const fn constant(index: u32) -> Self {
        VirtualRegister(FIRST_CONSTANT_REGISTER - index as i32)
    }

    pub const fn is_constant(self) -> bool {
        self.0 <= FIRST_CONSTANT_REGISTER
    }

    pub fn constant_index(self) -> Option<usize> {
        if self.is_constant() {
            Some((FIRST_CONSTANT_REGISTER - self.0) as usize)
        } else {
            None
        }
    }

    pub fn slot_index(self) -> Option<usize> {
        if self.0 >= 0 { Some(self.0 as usize) } else { None }
    }

    /// Byte offset of the slot from the frame base.
    pub fn frame_offset(self) -> i32 {
        self.0 * 8
    }
}

impl fmt::Display for VirtualRegister {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.constant_index() {
            Some(k) => write!(f, "k{}", k),
            None => write!(f, "r{}", self.0),
        }
    }
}

impl FromStr for VirtualRegister {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse = |digits: &str| {
            digits
                .parse::<u32>()
                .map_err(|_| format!("invalid register '{}'", s))
        };
        if let Some(rest) = s.strip_prefix('r') {
            let index = parse(rest)?;
            if index > i32::MAX as u32 {
                return Err(format!("slot index out of range in '{}'", s));
            }
            Ok(VirtualRegister::slot(index))
        } else if let Some(rest) = s.strip_prefix('k') {
            let index = parse(rest)?;
            if index > 0x3FFF_FFFF {
                return Err(format!("constant index out of range in '{}'", s));
            }
            Ok(VirtualRegister::constant(index))
        } else {
            Err(format!("register '{}' must start with 'r' or 'k'", s))
        }
    }
}

impl TryFrom<String> for VirtualRegister {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<VirtualRegister> for String {
    fn from(reg: VirtualRegister) -> Self {
        reg.to_string()
    }
}

/// What an earlier stage believes about an operand. Advisory only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeHint {
    #[default]
    Unknown,
    MaybeNumber,
    Number,
    NonNumber,
}

impl TypeHint {
    pub fn might_be_number(self) -> bool {
        self != TypeHint::NonNumber
    }

    pub fn definitely_number(self) -> bool {
        self == TypeHint::Number
    }

    fn to_bits(self) -> u8 {
        match self {
            TypeHint::Unknown => 0,
            TypeHint::MaybeNumber => 1,
            TypeHint::Number => 2,
            TypeHint::NonNumber => 3,
        }
    }

    fn from_bits(bits: u8) -> Self {
        match bits & 0xF {
            1 => TypeHint::MaybeNumber,
            2 => TypeHint::Number,
            3 => TypeHint::NonNumber,
            _ => TypeHint::Unknown,
        }
    }
}

/// Type hints for both operands of a binary instruction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperandTypes {
    #[serde(default)]
    pub first: TypeHint,
    #[serde(default)]
    pub second: TypeHint,
}

impl OperandTypes {
    pub fn new(first: TypeHint, second: TypeHint) -> Self {
        Self { first, second }
    }

    /// Pack into a single operand field.
    pub fn to_bits(self) -> u8 {
        self.first.to_bits() | (self.second.to_bits() << 4)
    }

    pub fn from_bits(bits: u8) -> Self {
        Self {
            first: TypeHint::from_bits(bits),
            second: TypeHint::from_bits(bits >> 4),
        }
    }
}

/// Relational condition of a compare-and-jump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    Less,
    LessEq,
    Greater,
    GreaterEq,
}

impl Relation {
    /// The relation with its operands swapped (`a < b` is `b > a`).
    pub fn commute(self) -> Self {
        match self {
            Relation::Less => Relation::Greater,
            Relation::LessEq => Relation::GreaterEq,
            Relation::Greater => Relation::Less,
            Relation::GreaterEq => Relation::LessEq,
        }
    }

    /// Logical negation over integers (`!(a < b)` is `a >= b`).
    pub fn negate(self) -> Self {
        match self {
            Relation::Less => Relation::GreaterEq,
            Relation::LessEq => Relation::Greater,
            Relation::Greater => Relation::LessEq,
            Relation::GreaterEq => Relation::Less,
        }
    }

    pub fn holds<T: PartialOrd>(self, a: T, b: T) -> bool {
        match self {
            Relation::Less => a < b,
            Relation::LessEq => a <= b,
            Relation::Greater => a > b,
            Relation::GreaterEq => a >= b,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShiftKind {
    Left,
    Right,
    UnsignedRight,
}

/// Opcode identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Negate,
    Inc,
    Dec,
    Unsigned,
    Lshift,
    Rshift,
    Urshift,
    Bitand,
    Mod,
    Add,
    Sub,
    Mul,
    Div,
    Jless,
    Jlesseq,
    Jgreater,
    Jgreatereq,
    Jnless,
    Jnlesseq,
    Jngreater,
    Jngreatereq,
}

impl Opcode {
    pub fn name(self) -> &'static str {
        match self {
            Opcode::Negate => "negate",
            Opcode::Inc => "inc",
            Opcode::Dec => "dec",
            Opcode::Unsigned => "unsigned",
            Opcode::Lshift => "lshift",
            Opcode::Rshift => "rshift",
            Opcode::Urshift => "urshift",
            Opcode::Bitand => "bitand",
            Opcode::Mod => "mod",
            Opcode::Add => "add",
            Opcode::Sub => "sub",
            Opcode::Mul => "mul",
            Opcode::Div => "div",
            Opcode::Jless => "jless",
            Opcode::Jlesseq => "jlesseq",
            Opcode::Jgreater => "jgreater",
            Opcode::Jgreatereq => "jgreatereq",
            Opcode::Jnless => "jnless",
            Opcode::Jnlesseq => "jnlesseq",
            Opcode::Jngreater => "jngreater",
            Opcode::Jngreatereq => "jngreatereq",
        }
    }

    /// The relation tested by a relational jump and whether the jump is
    /// taken when the relation does *not* hold.
    pub fn relational(self) -> Option<(Relation, bool)> {
        match self {
            Opcode::Jless => Some((Relation::Less, false)),
            Opcode::Jlesseq => Some((Relation::LessEq, false)),
            Opcode::Jgreater => Some((Relation::Greater, false)),
            Opcode::Jgreatereq => Some((Relation::GreaterEq, false)),
            Opcode::Jnless => Some((Relation::Less, true)),
            Opcode::Jnlesseq => Some((Relation::LessEq, true)),
            Opcode::Jngreater => Some((Relation::Greater, true)),
            Opcode::Jngreatereq => Some((Relation::GreaterEq, true)),
            _ => None,
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A decoded instruction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Instruction {
    Negate { dst: VirtualRegister, src: VirtualRegister },
    Inc { srcdst: VirtualRegister },
    Dec { srcdst: VirtualRegister },
    Unsigned { dst: VirtualRegister, src: VirtualRegister },
    Lshift { dst: VirtualRegister, lhs: VirtualRegister, rhs: VirtualRegister },
    Rshift { dst: VirtualRegister, lhs: VirtualRegister, rhs: VirtualRegister },
    Urshift { dst: VirtualRegister, lhs: VirtualRegister, rhs: VirtualRegister },
    Bitand { dst: VirtualRegister, lhs: VirtualRegister, rhs: VirtualRegister },
    Mod { dst: VirtualRegister, lhs: VirtualRegister, rhs: VirtualRegister },
    Add {
        dst: VirtualRegister,
        lhs: VirtualRegister,
        rhs: VirtualRegister,
        #[serde(default)]
        types: OperandTypes,
    },
    Sub {
        dst: VirtualRegister,
        lhs: VirtualRegister,
        rhs: VirtualRegister,
        #[serde(default)]
        types: OperandTypes,
    },
    Mul {
        dst: VirtualRegister,
        lhs: VirtualRegister,
        rhs: VirtualRegister,
        #[serde(default)]
        types: OperandTypes,
    },
    Div {
        dst: VirtualRegister,
        lhs: VirtualRegister,
        rhs: VirtualRegister,
        #[serde(default)]
        types: OperandTypes,
    },
    Jless { lhs: VirtualRegister, rhs: VirtualRegister, target: u32 },
    Jlesseq { lhs: VirtualRegister, rhs: VirtualRegister, target: u32 },
    Jgreater { lhs: VirtualRegister, rhs: VirtualRegister, target: u32 },
    Jgreatereq { lhs: VirtualRegister, rhs: VirtualRegister, target: u32 },
    Jnless { lhs: VirtualRegister, rhs: VirtualRegister, target: u32 },
    Jnlesseq { lhs: VirtualRegister, rhs: VirtualRegister, target: u32 },
    Jngreater { lhs: VirtualRegister, rhs: VirtualRegister, target: u32 },
    Jngreatereq { lhs: VirtualRegister, rhs: VirtualRegister, target: u32 },
}

impl Instruction {
    pub fn opcode(&self) -> Opcode {
        match self {
            Instruction::Negate { .. } => Opcode::Negate,
            Instruction::Inc { .. } => Opcode::Inc,
            Instruction::Dec { .. } => Opcode::Dec,
            Instruction::Unsigned { .. } => Opcode::Unsigned,
            Instruction::Lshift { .. } => Opcode::Lshift,
            Instruction::Rshift { .. } => Opcode::Rshift,
            Instruction::Urshift { .. } => Opcode::Urshift,
            Instruction::Bitand { .. } => Opcode::Bitand,
            Instruction::Mod { .. } => Opcode::Mod,
            Instruction::Add { .. } => Opcode::Add,
            Instruction::Sub { .. } => Opcode::Sub,
            Instruction::Mul { .. } => Opcode::Mul,
            Instruction::Div { .. } => Opcode::Div,
            Instruction::Jless { .. } => Opcode::Jless,
            Instruction::Jlesseq { .. } => Opcode::Jlesseq,
            Instruction::Jgreater { .. } => Opcode::Jgreater,
            Instruction::Jgreatereq { .. } => Opcode::Jgreatereq,
            Instruction::Jnless { .. } => Opcode::Jnless,
            Instruction::Jnlesseq { .. } => Opcode::Jnlesseq,
            Instruction::Jngreater { .. } => Opcode::Jngreater,
            Instruction::Jngreatereq { .. } => Opcode::Jngreatereq,
        }
    }

    /// Every register the instruction reads or writes.
    pub fn registers(&self) -> Vec<VirtualRegister> {
        match *self {
            Instruction::Negate { dst, src } | Instruction::Unsigned { dst, src } => vec![dst, src],
            Instruction::Inc { srcdst } | Instruction::Dec { srcdst } => vec![srcdst],
            Instruction::Lshift { dst, lhs, rhs }
            | Instruction::Rshift { dst, lhs, rhs }
            | Instruction::Urshift { dst, lhs, rhs }
            | Instruction::Bitand { dst, lhs, rhs }
            | Instruction::Mod { dst, lhs, rhs }
            | Instruction::Add { dst, lhs, rhs, .. }
            | Instruction::Sub { dst, lhs, rhs, .. }
            | Instruction::Mul { dst, lhs, rhs, .. }
            | Instruction::Div { dst, lhs, rhs, .. } => vec![dst, lhs, rhs],
            Instruction::Jless { lhs, rhs, .. }
            | Instruction::Jlesseq { lhs, rhs, .. }
            | Instruction::Jgreater { lhs, rhs, .. }
            | Instruction::Jgreatereq { lhs, rhs, .. }
            | Instruction::Jnless { lhs, rhs, .. }
            | Instruction::Jnlesseq { lhs, rhs, .. }
            | Instruction::Jngreater { lhs, rhs, .. }
            | Instruction::Jngreatereq { lhs, rhs, .. } => vec![lhs, rhs],
        }
    }

    /// Registers the instruction writes.
    pub fn destination(&self) -> Option<VirtualRegister> {
        match *self {
            Instruction::Negate { dst, .. }
            | Instruction::Unsigned { dst, .. }
            | Instruction::Lshift { dst, .. }
            | Instruction::Rshift { dst, .. }
            | Instruction::Urshift { dst, .. }
            | Instruction::Bitand { dst, .. }
            | Instruction::Mod { dst, .. }
            | Instruction::Add { dst, .. }
            | Instruction::Sub { dst, .. }
            | Instruction::Mul { dst, .. }
            | Instruction::Div { dst, .. } => Some(dst),
            Instruction::Inc { srcdst } | Instruction::Dec { srcdst } => Some(srcdst),
            _ => None,
        }
    }

    /// `(lhs, rhs, target)` of a relational jump.
    pub fn jump_operands(&self) -> Option<(VirtualRegister, VirtualRegister, u32)> {
        match *self {
            Instruction::Jless { lhs, rhs, target }
            | Instruction::Jlesseq { lhs, rhs, target }
            | Instruction::Jgreater { lhs, rhs, target }
            | Instruction::Jgreatereq { lhs, rhs, target }
            | Instruction::Jnless { lhs, rhs, target }
            | Instruction::Jnlesseq { lhs, rhs, target }
            | Instruction::Jngreater { lhs, rhs, target }
            | Instruction::Jngreatereq { lhs, rhs, target } => Some((lhs, rhs, target)),
            _ => None,
        }
    }
}

/// A constant table entry.
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Int(i32),
    Double(f64),
    Bool(bool),
    Null,
    Undefined,
    /// A string already materialized as a cell by the runtime.
    String { cell: Value, text: String },
}

impl Constant {
    /// The encoded value the generated code loads for this constant.
    pub fn value(&self) -> Value {
        match self {
            Constant::Int(n) => Value::int32(*n),
            Constant::Double(d) => Value::double(*d),
            Constant::Bool(b) => Value::boolean(*b),
            Constant::Null => Value::NULL,
            Constant::Undefined => Value::UNDEFINED,
            Constant::String { cell, .. } => *cell,
        }
    }
}

/// A method: its instructions, constant table and frame size.
#[derive(Debug, Clone, Default)]
pub struct CodeBlock {
    pub name: String,
    pub instructions: Vec<Instruction>,
    pub constants: Vec<Constant>,
    pub num_slots: usize,
}

impl CodeBlock {
    pub fn new(name: &str, num_slots: usize) -> Self {
        Self {
            name: name.to_string(),
            instructions: Vec::new(),
            constants: Vec::new(),
            num_slots,
        }
    }

    /// Append a constant and return the register naming it.
    pub fn add_constant(&mut self, constant: Constant) -> VirtualRegister {
        self.constants.push(constant);
        VirtualRegister::constant((self.constants.len() - 1) as u32)
    }

    pub fn push(&mut self, instruction: Instruction) -> u32 {
        self.instructions.push(instruction);
        (self.instructions.len() - 1) as u32
    }

    pub fn constant(&self, reg: VirtualRegister) -> Option<&Constant> {
        reg.constant_index().and_then(|k| self.constants.get(k))
    }
}

/// Constant as written in a method listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstantSpec {
    Int(i32),
    Double(f64),
    Bool(bool),
    Null,
    Undefined,
    String(String),
}

impl ConstantSpec {
    /// Materialize the constant, allocating strings in `heap`.
    pub fn materialize(&self, heap: &mut Heap) -> Constant {
        match self {
            ConstantSpec::Int(n) => Constant::Int(*n),
            ConstantSpec::Double(d) => Constant::Double(*d),
            ConstantSpec::Bool(b) => Constant::Bool(*b),
            ConstantSpec::Null => Constant::Null,
            ConstantSpec::Undefined => Constant::Undefined,
            ConstantSpec::String(text) => Constant::String {
                cell: heap.alloc_string(text),
                text: text.clone(),
            },
        }
    }
}

/// Initial value of a frame slot for `run`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotInput {
    pub slot: VirtualRegister,
    pub value: ConstantSpec,
}

/// A method listing (TOML).
///
/// ```toml
/// name = "sum"
/// slots = 3
/// constants = [{ int = 1 }]
///
/// [[instructions]]
/// op = "add"
/// dst = "r2"
/// lhs = "r0"
/// rhs = "k0"
///
/// [[inputs]]
/// slot = "r0"
/// value = { int = 41 }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MethodListing {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default)]
    pub slots: usize,
    #[serde(default)]
    pub constants: Vec<ConstantSpec>,
    #[serde(default)]
    pub instructions: Vec<Instruction>,
    #[serde(default)]
    pub inputs: Vec<SlotInput>,
}

fn default_name() -> String {
    "main".to_string()
}

impl MethodListing {
    pub fn from_toml_str(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| format!("failed to parse method listing: {}", e))
    }

    /// Build the code block, materializing string constants in `heap`.
    pub fn to_code_block(&self, heap: &mut Heap) -> CodeBlock {
        CodeBlock {
            name: self.name.clone(),
            instructions: self.instructions.clone(),
            constants: self.constants.iter().map(|c| c.materialize(heap)).collect(),
            num_slots: self.slots,
        }
    }
}
