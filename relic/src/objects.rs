//! Record types for the table-shaped and buffer-shaped segment kinds.

use crate::{EntryTable, Value};

/// A runtime copy of a script object. The species points back at the class
/// object it was cloned from; the variable cells are owned by the clone.
#[derive(Debug, Clone, Default)]
pub struct CloneEntry {
    pub species: Value,
    pub vars: Vec<Value>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ListEntry {
    pub first: Value,
    pub last: Value,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NodeEntry {
    pub pred: Value,
    pub succ: Value,
    pub key: Value,
    pub value: Value,
}

/// An opaque block of engine-side memory scripts hold by handle only.
#[derive(Debug, Clone, Default)]
pub struct HunkEntry {
    pub data: Vec<u8>,
    pub kind: &'static str,
}

/// A fixed-size byte array. Byte-addressable: a pointer whose offset selects
/// this entry dereferences to the whole buffer.
#[derive(Debug, Clone, Default)]
pub struct ByteArrayEntry {
    pub data: Vec<u8>,
}

impl ByteArrayEntry {
    pub fn resize(&mut self, size: usize) {
        self.data.resize(size, 0);
    }
}

#[derive(Debug, Clone, Default)]
pub struct BitmapEntry {
    width: u16,
    height: u16,
    origin_x: i16,
    origin_y: i16,
    skip_color: u8,
    data: Vec<u8>,
}

impl BitmapEntry {
    pub fn create(
        &mut self,
        width: u16,
        height: u16,
        skip_color: u8,
        origin_x: i16,
        origin_y: i16,
    ) {
        self.width = width;
        self.height = height;
        self.origin_x = origin_x;
        self.origin_y = origin_y;
        self.skip_color = skip_color;
        self.data = vec![skip_color; width as usize * height as usize];
    }

    pub fn width(&self) -> u16 {
        self.width
    }

    pub fn height(&self) -> u16 {
        self.height
    }

    pub fn origin(&self) -> (i16, i16) {
        (self.origin_x, self.origin_y)
    }

    pub fn skip_color(&self) -> u8 {
        self.skip_color
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

/// An ad-hoc scratch buffer handed out to kernel code, carrying a label for
/// directory dumps.
#[derive(Debug, Default)]
pub struct DynMem {
    pub data: Vec<u8>,
    pub description: String,
}

impl DynMem {
    pub fn new(size: usize, description: &str) -> Self {
        Self {
            data: vec![0; size],
            description: description.to_owned(),
        }
    }
}

/// The execution stack: cell-addressed, byte offsets in pointers.
#[derive(Debug, Default)]
pub struct DataStack {
    pub cells: Vec<Value>,
}

impl DataStack {
    pub fn new(capacity: usize, filler: u8) -> Self {
        Self {
            cells: vec![Value::new(0, filler as u16); capacity],
        }
    }

    pub fn capacity(&self) -> usize {
        self.cells.len()
    }
}

/// A script's locals block. Lives in its own segment so the script image and
/// its variables can be torn down independently.
#[derive(Debug, Default)]
pub struct LocalVariables {
    pub script_number: u16,
    pub locals: Vec<Value>,
}

impl LocalVariables {
    pub fn new(script_number: u16, locals: Vec<Value>) -> Self {
        Self {
            script_number,
            locals,
        }
    }
}

pub type CloneTable = EntryTable<CloneEntry>;
pub type ListTable = EntryTable<ListEntry>;
pub type NodeTable = EntryTable<NodeEntry>;
pub type HunkTable = EntryTable<HunkEntry>;
pub type ByteArrayTable = EntryTable<ByteArrayEntry>;
pub type BitmapTable = EntryTable<BitmapEntry>;
