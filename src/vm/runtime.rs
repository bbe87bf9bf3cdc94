//! Generic runtime operations called from slow paths.

use super::heap::Heap;
use super::value::Value;
use std::cmp::Ordering;
use std::fmt;

/// Generic operations reachable from generated code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuntimeOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    BitAnd,
    LShift,
    RShift,
    URShift,
    Negate,
    Inc,
    Dec,
    Unsigned,
    CompareLess,
    CompareLessEq,
    CompareGreater,
    CompareGreaterEq,
}

impl RuntimeOp {
    pub const COUNT: usize = 17;

    pub const ALL: [RuntimeOp; Self::COUNT] = [
        RuntimeOp::Add,
        RuntimeOp::Sub,
        RuntimeOp::Mul,
        RuntimeOp::Div,
        RuntimeOp::Mod,
        RuntimeOp::BitAnd,
        RuntimeOp::LShift,
        RuntimeOp::RShift,
        RuntimeOp::URShift,
        RuntimeOp::Negate,
        RuntimeOp::Inc,
        RuntimeOp::Dec,
        RuntimeOp::Unsigned,
        RuntimeOp::CompareLess,
        RuntimeOp::CompareLessEq,
        RuntimeOp::CompareGreater,
        RuntimeOp::CompareGreaterEq,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            RuntimeOp::Add => "add",
            RuntimeOp::Sub => "sub",
            RuntimeOp::Mul => "mul",
            RuntimeOp::Div => "div",
            RuntimeOp::Mod => "mod",
            RuntimeOp::BitAnd => "bitand",
            RuntimeOp::LShift => "lshift",
            RuntimeOp::RShift => "rshift",
            RuntimeOp::URShift => "urshift",
            RuntimeOp::Negate => "negate",
            RuntimeOp::Inc => "inc",
            RuntimeOp::Dec => "dec",
            RuntimeOp::Unsigned => "unsigned",
            RuntimeOp::CompareLess => "compare_less",
            RuntimeOp::CompareLessEq => "compare_lesseq",
            RuntimeOp::CompareGreater => "compare_greater",
            RuntimeOp::CompareGreaterEq => "compare_greatereq",
        }
    }

    /// Comparisons return a 0/1 flag rather than an encoded value.
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            RuntimeOp::CompareLess
                | RuntimeOp::CompareLessEq
                | RuntimeOp::CompareGreater
                | RuntimeOp::CompareGreaterEq
        )
    }
}

impl fmt::Display for RuntimeOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The runtime side of a slow-path call.
///
/// Generated code passes two encoded operands (`undefined` as the second for
/// unary operations) and the bytecode offset. Arithmetic returns an encoded
/// value; comparisons return 0 or 1.
pub trait RuntimeBridge {
    fn call(&mut self, op: RuntimeOp, lhs: Value, rhs: Value, bytecode_offset: u32) -> u64;

    /// Memory visible to generated code.
    fn heap(&self) -> &Heap;
}

/// Addresses of the native entry points for each operation.
///
/// The embedder fills these in; unset entries lower to a call through zero.
#[derive(Debug, Clone, Default)]
pub struct OperationTable {
    entries: [u64; RuntimeOp::COUNT],
}

impl OperationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(mut self, op: RuntimeOp, address: u64) -> Self {
        self.entries[op.index()] = address;
        self
    }

    pub fn address(&self, op: RuntimeOp) -> u64 {
        self.entries[op.index()]
    }
}

/// Reference implementation of the generic arithmetic semantics.
#[derive(Debug, Default)]
pub struct GenericRuntime {
    heap: Heap,
}

impl GenericRuntime {
    pub fn new() -> Self {
        Self { heap: Heap::new() }
    }

    pub fn with_heap(heap: Heap) -> Self {
        Self { heap }
    }

    pub fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    pub fn to_number(&self, value: Value) -> f64 {
        if let Some(n) = value.as_number() {
            return n;
        }
        if let Some(b) = value.as_bool() {
            return if b { 1.0 } else { 0.0 };
        }
        if value.is_null() {
            return 0.0;
        }
        match self.heap.string_text(value) {
            Some(text) => string_to_number(&text),
            None => f64::NAN,
        }
    }

    pub fn to_int32(&self, value: Value) -> i32 {
        match value.as_int32() {
            Some(n) => n,
            None => double_to_int32(self.to_number(value)),
        }
    }

    pub fn to_uint32(&self, value: Value) -> u32 {
        self.to_int32(value) as u32
    }

    pub fn to_display_string(&self, value: Value) -> String {
        if let Some(n) = value.as_int32() {
            return n.to_string();
        }
        if let Some(d) = value.as_double() {
            return number_to_string(d);
        }
        if let Some(text) = self.heap.string_text(value) {
            return text;
        }
        value.to_string()
    }

    fn add(&mut self, lhs: Value, rhs: Value) -> Value {
        if self.heap.is_string(lhs) || self.heap.is_string(rhs) {
            let mut text = self.to_display_string(lhs);
            text.push_str(&self.to_display_string(rhs));
            return self.heap.alloc_string(&text);
        }
        Value::number(self.to_number(lhs) + self.to_number(rhs))
    }

    fn compare(&self, lhs: Value, rhs: Value) -> Option<Ordering> {
        if let (Some(a), Some(b)) = (self.heap.string_text(lhs), self.heap.string_text(rhs)) {
            return Some(a.encode_utf16().cmp(b.encode_utf16()));
        }
        self.to_number(lhs).partial_cmp(&self.to_number(rhs))
    }

    /// Evaluate an operation without going through generated code.
    pub fn evaluate(&mut self, op: RuntimeOp, lhs: Value, rhs: Value) -> u64 {
        let num = |rt: &Self, v: Value| rt.to_number(v);
        let shift = |rt: &Self, v: Value| rt.to_uint32(v) & 0x1f;
        let result = match op {
            RuntimeOp::Add => self.add(lhs, rhs),
            RuntimeOp::Sub => Value::number(num(self, lhs) - num(self, rhs)),
            RuntimeOp::Mul => Value::number(num(self, lhs) * num(self, rhs)),
            RuntimeOp::Div => Value::number(num(self, lhs) / num(self, rhs)),
            RuntimeOp::Mod => Value::number(num(self, lhs) % num(self, rhs)),
            RuntimeOp::BitAnd => Value::int32(self.to_int32(lhs) & self.to_int32(rhs)),
            RuntimeOp::LShift => Value::int32(self.to_int32(lhs).wrapping_shl(shift(self, rhs))),
            RuntimeOp::RShift => Value::int32(self.to_int32(lhs) >> shift(self, rhs)),
            // The unsigned result is reinterpreted; a following `unsigned`
            // restores the full range.
            RuntimeOp::URShift => Value::int32((self.to_uint32(lhs) >> shift(self, rhs)) as i32),
            RuntimeOp::Negate => Value::number(-num(self, lhs)),
            RuntimeOp::Inc => Value::number(num(self, lhs) + 1.0),
            RuntimeOp::Dec => Value::number(num(self, lhs) - 1.0),
            RuntimeOp::Unsigned => Value::number(self.to_uint32(lhs) as f64),
            RuntimeOp::CompareLess => return self.compare(lhs, rhs).is_some_and(Ordering::is_lt) as u64,
            RuntimeOp::CompareLessEq => return self.compare(lhs, rhs).is_some_and(Ordering::is_le) as u64,
            RuntimeOp::CompareGreater => return self.compare(lhs, rhs).is_some_and(Ordering::is_gt) as u64,
            RuntimeOp::CompareGreaterEq => return self.compare(lhs, rhs).is_some_and(Ordering::is_ge) as u64,
        };
        result.bits()
    }
}

impl RuntimeBridge for GenericRuntime {
    fn call(&mut self, op: RuntimeOp, lhs: Value, rhs: Value, bytecode_offset: u32) -> u64 {
        tracing::trace!(%op, %lhs, %rhs, bytecode_offset, "runtime call");
        self.evaluate(op, lhs, rhs)
    }

    fn heap(&self) -> &Heap {
        &self.heap
    }
}

/// Modular conversion of a double to int32.
pub fn double_to_int32(d: f64) -> i32 {
    if !d.is_finite() {
        return 0;
    }
    let truncated = d.trunc();
    let modulo = truncated.rem_euclid(4294967296.0);
    modulo as u64 as u32 as i32
}

fn string_to_number(text: &str) -> f64 {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return 0.0;
    }
    match trimmed {
        "Infinity" | "+Infinity" => f64::INFINITY,
        "-Infinity" => f64::NEG_INFINITY,
        _ => {
            if let Some(hex) = trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")) {
                return u64::from_str_radix(hex, 16).map_or(f64::NAN, |n| n as f64);
            }
            // Rust accepts spellings like "inf" and "nan" that are not numbers here.
            if trimmed.chars().any(|c| c.is_ascii_alphabetic() && c != 'e' && c != 'E') {
                return f64::NAN;
            }
            trimmed.parse::<f64>().unwrap_or(f64::NAN)
        }
    }
}

fn number_to_string(d: f64) -> String {
    if d.is_nan() {
        "NaN".to_string()
    } else if d.is_infinite() {
        if d > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if d == 0.0 {
        "0".to_string()
    } else {
        d.to_string()
    }
}
