//! Baseline JIT for arithmetic and relational bytecode.
//!
//! - Operand classification picks a fast-path shape per instruction
//! - The main pass emits fast paths and queues slow-case sites
//! - The slow pass consumes the queue and emits slow paths
//! - Lowering to x86-64 (feature `x86_64`) and a simulator for the
//!   portable instruction stream
//!
//! The x86-64 backend is enabled by default.
//! Use `cargo build --no-default-features` to build the portable core only.

mod arith;
mod arith_slow;
mod call;
#[cfg(feature = "x86_64")]
mod codebuf;
pub mod compiler;
pub mod error;
#[cfg(feature = "x86_64")]
pub mod lower_x86_64;
pub mod masm;
pub mod operands;
pub mod sim;
pub mod slow_cases;
#[cfg(feature = "x86_64")]
mod x86_64;

pub use compiler::{CompiledMethod, InstructionSites, compile};
pub use error::JitError;
pub use operands::Shape;
pub use sim::{RecordedCall, RunOutcome, SimError, Simulator};
