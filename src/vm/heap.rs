//! String cells for the runtime and for generated code.
//!
//! The heap hands out synthetic addresses that satisfy the cell encoding
//! (top 16 bits and `TAG_BIT_OTHER` clear). Generated code reads cells only
//! through the fixed `StringCellHeader` layout below.

use super::value::Value;
use std::collections::{BTreeMap, HashMap};
use std::mem::offset_of;

/// Kind tag of a string cell.
pub const STRING_KIND: u32 = 1;
/// Kind tag of a non-string cell.
pub const OBJECT_KIND: u32 = 2;

/// Header of every cell. Strings point `data` at their UTF-16 code units;
/// a null `data` marks an unresolved rope.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StringCellHeader {
    pub kind: u32,
    pub length: u32,
    pub data: u64,
}

pub const CELL_KIND_OFFSET: i32 = offset_of!(StringCellHeader, kind) as i32;
pub const STRING_LENGTH_OFFSET: i32 = offset_of!(StringCellHeader, length) as i32;
pub const STRING_DATA_OFFSET: i32 = offset_of!(StringCellHeader, data) as i32;

const HEAP_BASE: u64 = 0x1000_0000;
const CELL_ALIGN: u64 = 16;

#[derive(Debug, Clone, PartialEq)]
enum CellBody {
    Flat(String),
    Rope(Value, Value),
    Object,
}

/// A simulated cell heap.
#[derive(Debug)]
pub struct Heap {
    regions: BTreeMap<u64, Vec<u8>>,
    cells: HashMap<u64, CellBody>,
    next: u64,
}

impl Heap {
    pub fn new() -> Self {
        Self {
            regions: BTreeMap::new(),
            cells: HashMap::new(),
            next: HEAP_BASE,
        }
    }

    fn reserve(&mut self, bytes: Vec<u8>) -> u64 {
        let addr = self.next;
        let size = (bytes.len() as u64).max(1);
        self.next += size.div_ceil(CELL_ALIGN) * CELL_ALIGN;
        self.regions.insert(addr, bytes);
        addr
    }

    fn alloc_cell(&mut self, header: StringCellHeader, body: CellBody) -> Value {
        let mut bytes = Vec::with_capacity(16);
        bytes.extend_from_slice(&header.kind.to_le_bytes());
        bytes.extend_from_slice(&header.length.to_le_bytes());
        bytes.extend_from_slice(&header.data.to_le_bytes());
        let addr = self.reserve(bytes);
        self.cells.insert(addr, body);
        Value::cell(addr)
    }

    /// Allocate a flat string.
    pub fn alloc_string(&mut self, text: &str) -> Value {
        let units: Vec<u16> = text.encode_utf16().collect();
        let chars: Vec<u8> = units.iter().flat_map(|u| u.to_le_bytes()).collect();
        let data = self.reserve(chars);
        let header = StringCellHeader {
            kind: STRING_KIND,
            length: units.len() as u32,
            data,
        };
        self.alloc_cell(header, CellBody::Flat(text.to_string()))
    }

    /// Allocate an unresolved concatenation of two strings.
    pub fn alloc_rope(&mut self, left: Value, right: Value) -> Option<Value> {
        let length = self.string_length(left)? + self.string_length(right)?;
        let header = StringCellHeader {
            kind: STRING_KIND,
            length,
            data: 0,
        };
        Some(self.alloc_cell(header, CellBody::Rope(left, right)))
    }

    /// Allocate a cell that is not a string.
    pub fn alloc_object(&mut self) -> Value {
        let header = StringCellHeader {
            kind: OBJECT_KIND,
            length: 0,
            data: 0,
        };
        self.alloc_cell(header, CellBody::Object)
    }

    pub fn is_string(&self, value: Value) -> bool {
        value
            .as_cell()
            .and_then(|addr| self.cells.get(&addr))
            .is_some_and(|body| !matches!(body, CellBody::Object))
    }

    fn string_length(&self, value: Value) -> Option<u32> {
        let addr = value.as_cell()?;
        match self.cells.get(&addr)? {
            CellBody::Object => None,
            _ => self.load32(addr + STRING_LENGTH_OFFSET as u64),
        }
    }

    /// Resolve the text of a string cell, flattening ropes.
    pub fn string_text(&self, value: Value) -> Option<String> {
        let addr = value.as_cell()?;
        match self.cells.get(&addr)? {
            CellBody::Flat(text) => Some(text.clone()),
            CellBody::Rope(left, right) => {
                let mut text = self.string_text(*left)?;
                text.push_str(&self.string_text(*right)?);
                Some(text)
            }
            CellBody::Object => None,
        }
    }

    fn read(&self, addr: u64, width: usize) -> Option<&[u8]> {
        let (base, bytes) = self.regions.range(..=addr).next_back()?;
        let start = (addr - base) as usize;
        bytes.get(start..start.checked_add(width)?)
    }

    pub fn load64(&self, addr: u64) -> Option<u64> {
        let bytes = self.read(addr, 8)?;
        Some(u64::from_le_bytes(bytes.try_into().ok()?))
    }

    pub fn load32(&self, addr: u64) -> Option<u32> {
        let bytes = self.read(addr, 4)?;
        Some(u32::from_le_bytes(bytes.try_into().ok()?))
    }

    pub fn load16(&self, addr: u64) -> Option<u16> {
        let bytes = self.read(addr, 2)?;
        Some(u16::from_le_bytes(bytes.try_into().ok()?))
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}
