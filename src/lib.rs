//! arithjit - a baseline JIT for arithmetic and relational bytecode
//!
//! This library provides the code generator, the bytecode and value model
//! it compiles, and a reference runtime for the generic operations.

pub mod config;
pub mod jit;
pub mod vm;

// Re-export commonly used types
pub use config::{Capabilities, JitConfig};
pub use jit::{CompiledMethod, JitError, compile};
pub use vm::{CodeBlock, Instruction, Value};
