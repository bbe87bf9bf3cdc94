//! Errors raised while compiling a method.

use crate::vm::{Opcode, VirtualRegister};

/// Compilation failures. All are fatal for the method being compiled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JitError {
    /// The slow-path pass disagreed with the fast-path pass about the sites
    /// of an instruction.
    SlowCaseMismatch {
        bytecode_offset: u32,
        opcode: Opcode,
        detail: String,
    },
    /// Sites were still queued after the slow-path pass finished.
    SlowCasesLeftOver { remaining: usize, first_offset: u32 },
    /// A slow path that can never be reached with the current capabilities.
    UnreachableForPlatform { bytecode_offset: u32, opcode: Opcode },
    /// A jump was emitted but never linked.
    UnlinkedJump { label: usize },
    /// A branch displacement does not fit in 32 bits.
    BranchOutOfRange { label: usize },
    /// No profiling counter exists for an offset.
    CounterOutOfRange { bytecode_offset: u32 },
    InvalidJumpTarget { bytecode_offset: u32, target: u32 },
    UnknownConstant { bytecode_offset: u32, register: VirtualRegister },
    InvalidRegister { bytecode_offset: u32, register: VirtualRegister },
}

impl std::fmt::Display for JitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JitError::SlowCaseMismatch {
                bytecode_offset,
                opcode,
                detail,
            } => write!(
                f,
                "slow case mismatch at bytecode {} ({}): {}",
                bytecode_offset, opcode, detail
            ),
            JitError::SlowCasesLeftOver {
                remaining,
                first_offset,
            } => write!(
                f,
                "{} slow case(s) left over, first at bytecode {}",
                remaining, first_offset
            ),
            JitError::UnreachableForPlatform {
                bytecode_offset,
                opcode,
            } => write!(
                f,
                "slow path of {} at bytecode {} is unreachable on this platform",
                opcode, bytecode_offset
            ),
            JitError::UnlinkedJump { label } => write!(f, "jump to label {} was never linked", label),
            JitError::BranchOutOfRange { label } => {
                write!(f, "branch to label {} is out of rel32 range", label)
            }
            JitError::CounterOutOfRange { bytecode_offset } => {
                write!(f, "no profiling counter for bytecode {}", bytecode_offset)
            }
            JitError::InvalidJumpTarget {
                bytecode_offset,
                target,
            } => write!(f, "invalid jump target {} at bytecode {}", target, bytecode_offset),
            JitError::UnknownConstant {
                bytecode_offset,
                register,
            } => write!(f, "unknown constant {} at bytecode {}", register, bytecode_offset),
            JitError::InvalidRegister {
                bytecode_offset,
                register,
            } => write!(f, "invalid register {} at bytecode {}", register, bytecode_offset),
        }
    }
}

impl std::error::Error for JitError {}
