pub mod bytecode;
pub mod heap;
pub mod profile;
pub mod runtime;
mod value;

pub use bytecode::{
    ArithOp, CodeBlock, Constant, ConstantSpec, Instruction, MethodListing, Opcode, OperandTypes,
    Relation, ShiftKind, SlotInput, TypeHint, VirtualRegister,
};
pub use heap::Heap;
pub use profile::{CounterKind, ProfileTable};
pub use runtime::{GenericRuntime, OperationTable, RuntimeBridge, RuntimeOp};
pub use value::*;
