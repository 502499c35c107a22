//! Script segments: a compiled script image, its parsed object records, and
//! the locker reference count that keeps it resident.

use ahash::RandomState;
use bitflags::bitflags;
use std::collections::HashMap;

use crate::SegmentId;

bitflags! {
    /// How a script-segment request should treat a script that is not
    /// resident yet.
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct ScriptLoadFlags: u8 {
        /// Instantiate the script if it is not loaded.
        const LOAD = 1 << 0;
        /// Take an extra locker on the script once resident.
        const LOCK = 1 << 1;
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ObjectKind {
    Object,
    Class,
}

impl Default for ObjectKind {
    fn default() -> Self {
        ObjectKind::Object
    }
}

/// One object or class record as parsed out of a script image by the loader.
/// Records are kept in file order; the superclass reference is a class
/// number, not an address.
#[derive(Debug, Clone, Default)]
pub struct ObjectRecord {
    pub offset: u16,
    pub kind: ObjectKind,
    /// The class number this record defines, when `kind` is `Class`.
    pub class_number: Option<u16>,
    pub super_class: Option<u16>,
    pub name: Option<String>,
}

#[derive(Debug, Default)]
pub struct Script {
    number: u16,
    buf: Vec<u8>,
    locals_segment: SegmentId,
    records: Vec<ObjectRecord>,
    by_offset: HashMap<u16, usize, RandomState>,
    lockers: u32,
    marked_deleted: bool,
}

impl Script {
    pub fn new(number: u16) -> Self {
        Self {
            number,
            ..Self::default()
        }
    }

    /// Installs a freshly loaded image, replacing whatever was here. The
    /// script comes out of a load with exactly one locker.
    pub fn load(&mut self, bytecode: Vec<u8>, records: Vec<ObjectRecord>) {
        self.by_offset = records
            .iter()
            .enumerate()
            .map(|(idx, rec)| (rec.offset, idx))
            .collect();
        self.buf = bytecode;
        self.records = records;
        self.lockers = 1;
        self.marked_deleted = false;
        self.locals_segment = 0;
    }

    pub fn number(&self) -> u16 {
        self.number
    }

    pub fn buf(&self) -> &[u8] {
        &self.buf
    }

    pub fn buf_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    pub fn buf_size(&self) -> usize {
        self.buf.len()
    }

    pub fn locals_segment(&self) -> SegmentId {
        self.locals_segment
    }

    pub fn set_locals_segment(&mut self, segment: SegmentId) {
        self.locals_segment = segment;
    }

    pub fn lockers(&self) -> u32 {
        self.lockers
    }

    pub fn increment_lockers(&mut self) {
        self.lockers += 1;
    }

    /// Lockers never go below zero; legacy scripts over-release.
    pub fn decrement_lockers(&mut self) {
        if self.lockers > 0 {
            self.lockers -= 1;
        }
    }

    pub fn mark_deleted(&mut self) {
        self.marked_deleted = true;
    }

    pub fn is_marked_deleted(&self) -> bool {
        self.marked_deleted
    }

    /// File-ordered object and class records.
    pub fn records(&self) -> &[ObjectRecord] {
        &self.records
    }

    pub fn record_at_offset(&self, offset: u16) -> Option<&ObjectRecord> {
        self.by_offset.get(&offset).map(|&idx| &self.records[idx])
    }

    pub fn offset_is_object(&self, offset: u16) -> bool {
        self.by_offset.contains_key(&offset)
    }
}
