use std::fmt;

/// High 16 bits set on every int32; any number has at least one of them set.
pub const TAG_TYPE_NUMBER: u64 = 0xFFFF_0000_0000_0000;

/// Added to raw double bits so that doubles never collide with int32 or cells.
pub const DOUBLE_ENCODE_OFFSET: u64 = 1 << 48;

/// Set on the non-cell immediates (null, undefined, booleans).
pub const TAG_BIT_OTHER: u64 = 0x2;
pub const TAG_BIT_BOOL: u64 = 0x4;
pub const TAG_BIT_UNDEFINED: u64 = 0x8;

/// A value is a cell iff none of these bits are set.
pub const TAG_MASK: u64 = TAG_TYPE_NUMBER | TAG_BIT_OTHER;

pub const VALUE_NULL: u64 = TAG_BIT_OTHER;
pub const VALUE_UNDEFINED: u64 = TAG_BIT_OTHER | TAG_BIT_UNDEFINED;
pub const VALUE_FALSE: u64 = TAG_BIT_OTHER | TAG_BIT_BOOL;
pub const VALUE_TRUE: u64 = TAG_BIT_OTHER | TAG_BIT_BOOL | 1;

const PURE_NAN: u64 = 0x7FF8_0000_0000_0000;

// Decoding a double is adding TAG_TYPE_NUMBER, encoding is subtracting it.
const _: () = assert!(TAG_TYPE_NUMBER.wrapping_add(DOUBLE_ENCODE_OFFSET) == 0);

/// A 64-bit tagged value.
///
/// - int32: `TAG_TYPE_NUMBER | payload`
/// - double: raw bits + `DOUBLE_ENCODE_OFFSET`
/// - cell: a heap address with the top 16 bits and `TAG_BIT_OTHER` clear
/// - null / undefined / true / false: small immediates with `TAG_BIT_OTHER` set
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Value(u64);

impl Value {
    pub const NULL: Value = Value(VALUE_NULL);
    pub const UNDEFINED: Value = Value(VALUE_UNDEFINED);
    pub const TRUE: Value = Value(VALUE_TRUE);
    pub const FALSE: Value = Value(VALUE_FALSE);

    pub const fn from_bits(bits: u64) -> Self {
        Value(bits)
    }

    pub const fn bits(self) -> u64 {
        self.0
    }

    pub const fn int32(n: i32) -> Self {
        Value(TAG_TYPE_NUMBER | (n as u32 as u64))
    }

    /// Encode a double. NaNs are purified so that no payload can reach the int range.
    pub fn double(d: f64) -> Self {
        let bits = if d.is_nan() { PURE_NAN } else { d.to_bits() };
        Value(bits.wrapping_add(DOUBLE_ENCODE_OFFSET))
    }

    /// Encode a number, preferring int32 when the value is exactly one.
    /// Negative zero stays a double.
    pub fn number(d: f64) -> Self {
        let n = d as i32;
        if n as f64 == d && !(n == 0 && d.is_sign_negative()) {
            Value::int32(n)
        } else {
            Value::double(d)
        }
    }

    pub fn boolean(b: bool) -> Self {
        if b { Value::TRUE } else { Value::FALSE }
    }

    /// Wrap a cell address.
    pub fn cell(addr: u64) -> Self {
        debug_assert_eq!(addr & TAG_MASK, 0, "cell address overlaps tag bits");
        Value(addr)
    }

    pub const fn is_int32(self) -> bool {
        self.0 >= TAG_TYPE_NUMBER
    }

    pub const fn is_number(self) -> bool {
        self.0 & TAG_TYPE_NUMBER != 0
    }

    pub const fn is_double(self) -> bool {
        self.is_number() && !self.is_int32()
    }

    pub const fn is_cell(self) -> bool {
        self.0 & TAG_MASK == 0 && self.0 != 0
    }

    pub const fn is_null(self) -> bool {
        self.0 == VALUE_NULL
    }

    pub const fn is_undefined(self) -> bool {
        self.0 == VALUE_UNDEFINED
    }

    pub const fn is_bool(self) -> bool {
        self.0 & !1 == VALUE_FALSE
    }

    pub fn as_int32(self) -> Option<i32> {
        if self.is_int32() {
            Some(self.0 as u32 as i32)
        } else {
            None
        }
    }

    pub fn as_double(self) -> Option<f64> {
        if self.is_double() {
            Some(f64::from_bits(self.0.wrapping_add(TAG_TYPE_NUMBER)))
        } else {
            None
        }
    }

    /// Numeric value of an int32 or double.
    pub fn as_number(self) -> Option<f64> {
        match self.as_int32() {
            Some(n) => Some(n as f64),
            None => self.as_double(),
        }
    }

    pub fn as_bool(self) -> Option<bool> {
        if self.is_bool() {
            Some(self.0 & 1 == 1)
        } else {
            None
        }
    }

    pub fn as_cell(self) -> Option<u64> {
        if self.is_cell() { Some(self.0) } else { None }
    }

    /// Get the type name of this value.
    pub fn type_name(self) -> &'static str {
        if self.is_int32() {
            "int32"
        } else if self.is_number() {
            "double"
        } else if self.is_cell() {
            "cell"
        } else if self.is_bool() {
            "boolean"
        } else if self.is_null() {
            "null"
        } else if self.is_undefined() {
            "undefined"
        } else {
            "empty"
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(n) = self.as_int32() {
            write!(f, "Int32({})", n)
        } else if let Some(d) = self.as_double() {
            write!(f, "Double({:?})", d)
        } else if let Some(b) = self.as_bool() {
            write!(f, "Bool({})", b)
        } else if self.is_null() {
            write!(f, "Null")
        } else if self.is_undefined() {
            write!(f, "Undefined")
        } else if self.is_cell() {
            write!(f, "Cell({:#x})", self.0)
        } else {
            write!(f, "Value({:#x})", self.0)
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(n) = self.as_int32() {
            write!(f, "{}", n)
        } else if let Some(d) = self.as_double() {
            if d == 0.0 && d.is_sign_negative() {
                write!(f, "-0")
            } else {
                write!(f, "{}", d)
            }
        } else if let Some(b) = self.as_bool() {
            write!(f, "{}", b)
        } else if self.is_null() {
            write!(f, "null")
        } else if self.is_undefined() {
            write!(f, "undefined")
        } else {
            write!(f, "<cell {:#x}>", self.0)
        }
    }
}
