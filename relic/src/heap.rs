//! The segment directory: an indexed collection of typed segments plus the
//! allocation, teardown and dereference protocol over them.
//!
//! Slot 0 is a permanent sentinel so that segment 0 never resolves; freed
//! identifiers are reused by a linear scan from 1. Out-of-range and stale
//! pointers are tolerated with a diagnostic because legacy scripts probe
//! invalid addresses, both intentionally and by historical accident.

use ahash::RandomState;
use log::warn;
use std::collections::HashMap;

use crate::error::HeapError;
use crate::lifecycle::Class;
use crate::loader::{parse_class_index, ScriptLoader};
use crate::objects::{
    BitmapEntry, BitmapTable, ByteArrayEntry, ByteArrayTable, CloneEntry, CloneTable, DataStack,
    DynMem, HunkEntry, HunkTable, ListEntry, ListTable, NodeEntry, NodeTable,
};
use crate::view::{View, ViewMut};
use crate::{AddressingMode, Segment, SegmentId, SegmentKind, Value};

#[derive(Debug, Clone, Default)]
pub struct HeapCreateInfo {
    pub addressing: AddressingMode,
    /// Old-generation content walks superclass chains on unload.
    pub legacy_unload: bool,
    /// Which half of a cell holds the first byte of a character pair.
    pub big_endian: bool,
    /// Byte pattern fresh stacks are filled with; defaults to `b's'`.
    pub stack_filler: Option<u8>,
}

pub struct Heap {
    pub(crate) heap: Vec<Option<Segment>>,
    pub(crate) info: HeapCreateInfo,
    pub(crate) loader: Box<dyn ScriptLoader>,
    pub(crate) script_seg_map: HashMap<u16, SegmentId, RandomState>,
    pub(crate) class_table: Vec<Class>,

    clones_seg: SegmentId,
    lists_seg: SegmentId,
    nodes_seg: SegmentId,
    hunks_seg: SegmentId,
    arrays_seg: SegmentId,
    bitmaps_seg: SegmentId,

    save_dir_ptr: Value,
    parser_ptr: Value,
}

impl Heap {
    /// Builds the directory and the class table. The class index resource is
    /// the one thing construction cannot proceed without.
    pub fn new(info: HeapCreateInfo, loader: Box<dyn ScriptLoader>) -> Result<Self, HeapError> {
        let index = loader.class_index().ok_or(HeapError::MissingClassIndex)?;
        let class_table = parse_class_index(&index)?
            .into_iter()
            .map(Class::unresolved)
            .collect();

        Ok(Self {
            heap: vec![None],
            info,
            loader,
            script_seg_map: HashMap::default(),
            class_table,
            clones_seg: 0,
            lists_seg: 0,
            nodes_seg: 0,
            hunks_seg: 0,
            arrays_seg: 0,
            bitmaps_seg: 0,
            save_dir_ptr: Value::NULL,
            parser_ptr: Value::NULL,
        })
    }

    /// Tears down every segment and starts over with the same loader. Class
    /// table entries keep their owners but lose their resolved addresses.
    pub fn reset(&mut self) {
        for id in 1..self.heap.len() as SegmentId {
            if self.heap[id as usize].is_some() {
                self.deallocate(id);
            }
        }
        self.heap.clear();
        self.heap.push(None);

        self.clones_seg = 0;
        self.lists_seg = 0;
        self.nodes_seg = 0;
        self.hunks_seg = 0;
        self.arrays_seg = 0;
        self.bitmaps_seg = 0;
        self.save_dir_ptr = Value::NULL;
        self.parser_ptr = Value::NULL;

        for class in &mut self.class_table {
            class.reg = Value::NULL;
        }
    }

    #[inline]
    pub(crate) fn actual_segment(&self, segment: SegmentId) -> SegmentId {
        self.info.addressing.actual_segment(segment)
    }

    // Linear scan from 1. Churn is small enough that this stays cheap, and
    // it is what gives freed identifiers back in slot order.
    fn find_free_segment(&self) -> SegmentId {
        let mut seg = 1;
        while seg < self.heap.len() && self.heap[seg].is_some() {
            seg += 1;
        }
        assert!(seg < SegmentId::MAX as usize, "segment directory exhausted");
        seg as SegmentId
    }

    pub fn alloc_segment(&mut self, segment: Segment) -> SegmentId {
        let id = self.find_free_segment();
        if id as usize == self.heap.len() {
            self.heap.push(None);
        }
        self.heap[id as usize] = Some(segment);
        id
    }

    /// Destroys a segment. Deallocating an identifier that was never
    /// allocated, or one already freed, is a programming error and panics.
    pub fn deallocate(&mut self, segment: SegmentId) {
        let actual = self.actual_segment(segment);
        if actual < 1 || actual as usize >= self.heap.len() {
            panic!("attempt to deallocate invalid segment id {segment:#06x}");
        }
        let Some(removed) = self.heap[actual as usize].take() else {
            panic!("attempt to deallocate already freed segment {segment:#06x}");
        };

        if actual == self.clones_seg {
            self.clones_seg = 0;
        } else if actual == self.lists_seg {
            self.lists_seg = 0;
        } else if actual == self.nodes_seg {
            self.nodes_seg = 0;
        } else if actual == self.hunks_seg {
            self.hunks_seg = 0;
        } else if actual == self.arrays_seg {
            self.arrays_seg = 0;
        } else if actual == self.bitmaps_seg {
            self.bitmaps_seg = 0;
        }

        if let Segment::Script(script) = &removed {
            self.script_seg_map.remove(&script.number());
            let locals = script.locals_segment();
            if locals != 0 {
                // The locals block can already be gone: scripts keep their
                // segment id across reload cycles but get a fresh locals
                // segment each time, and a smaller recycled id is torn down
                // before the script itself.
                let idx = self.actual_segment(locals) as usize;
                if idx < self.heap.len()
                    && matches!(self.heap[idx], Some(Segment::Locals(_)))
                {
                    self.deallocate(locals);
                }
            }
        }
    }

    /// Deferred sweep over scripts that were fully unlocked and marked
    /// deleted. Returns how many segments were reclaimed.
    pub fn reclaim_deleted(&mut self) -> usize {
        let dead: Vec<SegmentId> = self
            .segments()
            .filter_map(|(id, segment)| match segment {
                Segment::Script(script)
                    if script.is_marked_deleted() && script.lockers() == 0 =>
                {
                    Some(id)
                }
                _ => None,
            })
            .collect();
        let count = dead.len();
        for id in dead {
            self.deallocate(id);
        }
        count
    }

    pub(crate) fn segment_obj(&self, segment: SegmentId) -> Option<&Segment> {
        let actual = self.actual_segment(segment);
        if actual < 1 || actual as usize >= self.heap.len() {
            return None;
        }
        self.heap[actual as usize].as_ref()
    }

    pub(crate) fn segment_obj_mut(&mut self, segment: SegmentId) -> Option<&mut Segment> {
        let actual = self.actual_segment(segment);
        if actual < 1 || actual as usize >= self.heap.len() {
            return None;
        }
        self.heap[actual as usize].as_mut()
    }

    pub fn segment_kind(&self, segment: SegmentId) -> SegmentKind {
        self.segment_obj(segment)
            .map_or(SegmentKind::Invalid, Segment::kind)
    }

    pub fn get_segment(&self, segment: SegmentId, kind: SegmentKind) -> Option<&Segment> {
        self.segment_obj(segment).filter(|seg| seg.kind() == kind)
    }

    pub fn get_segment_mut(
        &mut self,
        segment: SegmentId,
        kind: SegmentKind,
    ) -> Option<&mut Segment> {
        self.segment_obj_mut(segment)
            .filter(|seg| seg.kind() == kind)
    }

    /// First segment of the given kind, or 0. Used to find well-known
    /// singletons such as the data stack.
    pub fn find_segment_by_type(&self, kind: SegmentKind) -> SegmentId {
        self.segments()
            .find(|(_, segment)| segment.kind() == kind)
            .map_or(0, |(id, _)| id)
    }

    /// Live segments in identifier order. External serializers walk the heap
    /// through this.
    pub fn segments(&self) -> impl Iterator<Item = (SegmentId, &Segment)> {
        self.heap
            .iter()
            .enumerate()
            .filter_map(|(id, slot)| slot.as_ref().map(|segment| (id as SegmentId, segment)))
    }

    // -- dereference protocol ------------------------------------------------

    /// Resolves a pointer into a typed view. Null, out-of-range and stale
    /// pointers degrade to `None` with a diagnostic; legacy content does
    /// this on purpose and the session must keep running.
    pub fn deref(&self, at: Value) -> Option<View<'_>> {
        let Some(segment) = self.segment_obj(at.segment()) else {
            warn!("attempt to dereference invalid pointer {at}");
            return None;
        };
        let view = segment.dereference(at.offset());
        if view.is_none() {
            warn!("attempt to dereference {at} outside its segment");
        }
        view
    }

    pub fn deref_mut(&mut self, at: Value) -> Option<ViewMut<'_>> {
        if self.segment_obj(at.segment()).is_none() {
            warn!("attempt to dereference invalid pointer {at}");
            return None;
        }
        let segment = self.segment_obj_mut(at.segment())?;
        let view = segment.dereference_mut(at.offset());
        if view.is_none() {
            warn!("attempt to dereference {at} outside its segment");
        }
        view
    }

    /// `count` bytes of raw storage, or `None` with a diagnostic when the
    /// pointer resolves to the wrong kind or the range overruns the segment.
    pub fn deref_bytes(&self, at: Value, count: usize) -> Option<&[u8]> {
        match self.deref(at)? {
            View::Raw(bytes) => {
                if count > bytes.len() {
                    warn!("attempt to read {count} bytes past the end of segment at {at}");
                    return None;
                }
                Some(&bytes[..count])
            }
            View::Cells { .. } => {
                warn!("pointer {at} resolves to cell storage, expected raw bytes");
                None
            }
        }
    }

    pub fn deref_bytes_mut(&mut self, at: Value, count: usize) -> Option<&mut [u8]> {
        match self.deref_mut(at)? {
            ViewMut::Raw(bytes) => {
                if count > bytes.len() {
                    warn!("attempt to write {count} bytes past the end of segment at {at}");
                    return None;
                }
                Some(&mut bytes[..count])
            }
            ViewMut::Cells { .. } => {
                warn!("pointer {at} resolves to cell storage, expected raw bytes");
                None
            }
        }
    }

    /// `count` cells of tagged storage. A mid-cell pointer cannot be read at
    /// cell granularity and degrades to `None`.
    pub fn deref_cells(&self, at: Value, count: usize) -> Option<&[Value]> {
        match self.deref(at)? {
            View::Cells { cells, skip_byte } => {
                if skip_byte {
                    warn!("unaligned cell read at {at}");
                    return None;
                }
                if count > cells.len() {
                    warn!("attempt to read {count} cells past the end of segment at {at}");
                    return None;
                }
                Some(&cells[..count])
            }
            View::Raw(_) => {
                warn!("pointer {at} resolves to raw bytes, expected cell storage");
                None
            }
        }
    }

    pub fn deref_cells_mut(&mut self, at: Value, count: usize) -> Option<&mut [Value]> {
        match self.deref_mut(at)? {
            ViewMut::Cells { cells, skip_byte } => {
                if skip_byte {
                    warn!("unaligned cell write at {at}");
                    return None;
                }
                if count > cells.len() {
                    warn!("attempt to write {count} cells past the end of segment at {at}");
                    return None;
                }
                Some(&mut cells[..count])
            }
            ViewMut::Raw(_) => {
                warn!("pointer {at} resolves to raw bytes, expected cell storage");
                None
            }
        }
    }

    /// The bytes of a zero-terminated string in raw storage, terminator
    /// excluded. Unterminated strings run to the segment end.
    pub fn deref_cstring(&self, at: Value) -> Option<&[u8]> {
        match self.deref(at)? {
            View::Raw(bytes) => {
                let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
                Some(&bytes[..end])
            }
            View::Cells { .. } => {
                warn!("pointer {at} resolves to cell storage, expected a string");
                None
            }
        }
    }

    // -- table-shaped allocation ---------------------------------------------

    pub fn allocate_clone(&mut self) -> Value {
        if self.clones_seg == 0 {
            self.clones_seg = self.alloc_segment(Segment::Clones(CloneTable::new()));
        }
        let seg = self.clones_seg;
        let Some(Segment::Clones(table)) = self.heap[seg as usize].as_mut() else {
            panic!("clone table segment {seg} vanished");
        };
        Value::new(seg, table.alloc_entry())
    }

    pub fn lookup_clone(&mut self, at: Value) -> Option<&mut CloneEntry> {
        match self.segment_obj_mut(at.segment()) {
            Some(Segment::Clones(table)) => match table.get_mut(at.offset()) {
                Some(entry) => Some(entry),
                None => {
                    warn!("attempt to use a discarded clone handle {at}");
                    None
                }
            },
            _ => {
                warn!("attempt to use {at} as a clone");
                None
            }
        }
    }

    pub fn allocate_list(&mut self) -> Value {
        if self.lists_seg == 0 {
            self.lists_seg = self.alloc_segment(Segment::Lists(ListTable::new()));
        }
        let seg = self.lists_seg;
        let Some(Segment::Lists(table)) = self.heap[seg as usize].as_mut() else {
            panic!("list table segment {seg} vanished");
        };
        Value::new(seg, table.alloc_entry())
    }

    pub fn lookup_list(&mut self, at: Value) -> Option<&mut ListEntry> {
        match self.segment_obj_mut(at.segment()) {
            Some(Segment::Lists(table)) => match table.get_mut(at.offset()) {
                Some(entry) => Some(entry),
                None => {
                    warn!("attempt to use a discarded list handle {at}");
                    None
                }
            },
            _ => {
                warn!("attempt to use {at} as a list");
                None
            }
        }
    }

    pub fn allocate_node(&mut self) -> Value {
        if self.nodes_seg == 0 {
            self.nodes_seg = self.alloc_segment(Segment::Nodes(NodeTable::new()));
        }
        let seg = self.nodes_seg;
        let Some(Segment::Nodes(table)) = self.heap[seg as usize].as_mut() else {
            panic!("node table segment {seg} vanished");
        };
        Value::new(seg, table.alloc_entry())
    }

    /// Allocates and initializes a fresh list node in one step.
    pub fn new_node(&mut self, value: Value, key: Value) -> Value {
        let at = self.allocate_node();
        let node = self
            .lookup_node(at)
            .expect("freshly allocated node must resolve");
        node.pred = Value::NULL;
        node.succ = Value::NULL;
        node.key = key;
        node.value = value;
        at
    }

    /// Null handles resolve to `None` without complaint; scripts pass them
    /// to mean "end of list".
    pub fn lookup_node(&mut self, at: Value) -> Option<&mut NodeEntry> {
        if at.is_null() {
            return None;
        }
        match self.segment_obj_mut(at.segment()) {
            Some(Segment::Nodes(table)) => match table.get_mut(at.offset()) {
                Some(entry) => Some(entry),
                None => {
                    warn!("attempt to use a discarded node handle {at}");
                    None
                }
            },
            _ => {
                warn!("attempt to use {at} as a node");
                None
            }
        }
    }

    pub fn allocate_hunk(&mut self, kind: &'static str, size: usize) -> Value {
        if self.hunks_seg == 0 {
            self.hunks_seg = self.alloc_segment(Segment::Hunks(HunkTable::new()));
        }
        let seg = self.hunks_seg;
        let Some(Segment::Hunks(table)) = self.heap[seg as usize].as_mut() else {
            panic!("hunk table segment {seg} vanished");
        };
        let offset = table.alloc_entry();
        let hunk = table.at_mut(offset);
        hunk.data = vec![0; size];
        hunk.kind = kind;
        Value::new(seg, offset)
    }

    pub fn free_hunk(&mut self, at: Value) {
        if at.is_null() {
            warn!("attempt to free a hunk through a null handle");
            return;
        }
        match self.segment_obj_mut(at.segment()) {
            Some(Segment::Hunks(table)) => table.free_entry(at.offset()),
            _ => warn!("attempt to free a hunk through {at}"),
        }
    }

    /// `None` for stale handles; that happens routinely around load and
    /// quit, and is not an error.
    pub fn hunk_data(&mut self, at: Value) -> Option<&mut HunkEntry> {
        match self.segment_obj_mut(at.segment()) {
            Some(Segment::Hunks(table)) => table.get_mut(at.offset()),
            _ => None,
        }
    }

    pub fn allocate_array(&mut self, size: usize) -> Value {
        if self.arrays_seg == 0 {
            self.arrays_seg = self.alloc_segment(Segment::Arrays(ByteArrayTable::new()));
        }
        let seg = self.arrays_seg;
        let Some(Segment::Arrays(table)) = self.heap[seg as usize].as_mut() else {
            panic!("byte array table segment {seg} vanished");
        };
        let offset = table.alloc_entry();
        table.at_mut(offset).resize(size);
        Value::new(seg, offset)
    }

    pub fn lookup_array(&mut self, at: Value) -> Option<&mut ByteArrayEntry> {
        match self.segment_obj_mut(at.segment()) {
            Some(Segment::Arrays(table)) => match table.get_mut(at.offset()) {
                Some(entry) => Some(entry),
                None => {
                    warn!("attempt to use a discarded byte array handle {at}");
                    None
                }
            },
            _ => {
                warn!("attempt to use {at} as a byte array");
                None
            }
        }
    }

    /// Freeing a null array handle is silently ignored, matching the memory
    /// manager the scripts were written against.
    pub fn free_array(&mut self, at: Value) {
        if at.is_null() {
            return;
        }
        match self.segment_obj_mut(at.segment()) {
            Some(Segment::Arrays(table)) => table.free_entry(at.offset()),
            _ => warn!("attempt to free {at} as a byte array"),
        }
    }

    pub fn is_array(&self, at: Value) -> bool {
        self.arrays_seg != 0 && self.actual_segment(at.segment()) == self.arrays_seg
    }

    pub fn allocate_bitmap(
        &mut self,
        width: u16,
        height: u16,
        skip_color: u8,
        origin_x: i16,
        origin_y: i16,
    ) -> Value {
        if self.bitmaps_seg == 0 {
            self.bitmaps_seg = self.alloc_segment(Segment::Bitmaps(BitmapTable::new()));
        }
        let seg = self.bitmaps_seg;
        let Some(Segment::Bitmaps(table)) = self.heap[seg as usize].as_mut() else {
            panic!("bitmap table segment {seg} vanished");
        };
        let offset = table.alloc_entry();
        table
            .at_mut(offset)
            .create(width, height, skip_color, origin_x, origin_y);
        Value::new(seg, offset)
    }

    pub fn lookup_bitmap(&mut self, at: Value) -> Option<&mut BitmapEntry> {
        match self.segment_obj_mut(at.segment()) {
            Some(Segment::Bitmaps(table)) => match table.get_mut(at.offset()) {
                Some(entry) => Some(entry),
                None => {
                    warn!("attempt to use a discarded bitmap handle {at}");
                    None
                }
            },
            _ => {
                warn!("attempt to use {at} as a bitmap");
                None
            }
        }
    }

    pub fn free_bitmap(&mut self, at: Value) {
        match self.segment_obj_mut(at.segment()) {
            Some(Segment::Bitmaps(table)) => table.free_entry(at.offset()),
            _ => warn!("attempt to free {at} as a bitmap"),
        }
    }

    // -- buffer-shaped allocation --------------------------------------------

    pub fn allocate_stack(&mut self, capacity: usize) -> Value {
        let filler = self.info.stack_filler.unwrap_or(b's');
        let seg = self.alloc_segment(Segment::Stack(DataStack::new(capacity, filler)));
        Value::new(seg, 0)
    }

    /// One scratch buffer, one segment. The label shows up in directory
    /// dumps and diagnostics.
    pub fn alloc_dynmem(&mut self, size: usize, description: &str) -> (Value, &mut [u8]) {
        let seg = self.alloc_segment(Segment::Dynamic(DynMem::new(size, description)));
        let Some(Segment::Dynamic(mem)) = self.heap[seg as usize].as_mut() else {
            panic!("dynamic buffer segment {seg} vanished");
        };
        (Value::new(seg, 0), &mut mem.data)
    }

    /// `false` when the pointer does not name a live dynamic buffer; legacy
    /// scripts double-free these and expect to be told, not killed.
    pub fn free_dynmem(&mut self, at: Value) -> bool {
        let actual = self.actual_segment(at.segment());
        if actual < 1
            || actual as usize >= self.heap.len()
            || !matches!(self.heap[actual as usize], Some(Segment::Dynamic(_)))
        {
            return false;
        }
        self.deallocate(at.segment());
        true
    }

    /// The save-dir and parser buffers live in one shared dynamic segment,
    /// for compatibility with content that assumes they are adjacent.
    pub fn init_sys_strings(&mut self) {
        let (addr, _) = self.alloc_dynmem(512, "system strings");
        self.save_dir_ptr = addr;
        self.parser_ptr = Value::new(addr.segment(), 256);
    }

    pub fn save_dir_ptr(&self) -> Value {
        self.save_dir_ptr
    }

    pub fn parser_ptr(&self) -> Value {
        self.parser_ptr
    }

    // -- object lookups ------------------------------------------------------

    pub fn object_name(&self, at: Value) -> Option<&str> {
        match self.segment_obj(at.segment())? {
            Segment::Clones(table) => table.get(at.offset())?.name.as_deref(),
            Segment::Script(script) => script.record_at_offset(at.offset())?.name.as_deref(),
            _ => None,
        }
    }

    /// Scans every script and the clone table for objects with the given
    /// name, in segment order.
    pub fn find_objects_by_name(&self, name: &str) -> Vec<Value> {
        let mut result = Vec::new();
        for (id, segment) in self.segments() {
            match segment {
                Segment::Script(script) => {
                    for record in script.records() {
                        if record.name.as_deref() == Some(name) {
                            result.push(Value::new(id, record.offset));
                        }
                    }
                }
                Segment::Clones(table) => {
                    for (idx, clone) in table.iter() {
                        if clone.name.as_deref() == Some(name) {
                            result.push(Value::new(id, idx));
                        }
                    }
                }
                _ => {}
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::ScriptImage;

    struct NullLoader;

    impl ScriptLoader for NullLoader {
        fn class_index(&self) -> Option<Vec<u8>> {
            Some(Vec::new())
        }
        fn load(&self, _: u16) -> Option<ScriptImage> {
            None
        }
    }

    fn heap() -> Heap {
        Heap::new(HeapCreateInfo::default(), Box::new(NullLoader)).unwrap()
    }

    #[test]
    fn slot_zero_is_never_assigned() {
        let mut heap = heap();
        let first = heap.allocate_stack(4);
        assert_eq!(first.segment(), 1, "allocation starts past the sentinel");
        assert!(heap.deref(Value::new(0, 0)).is_none());
    }

    #[test]
    fn freed_identifiers_are_reused_in_slot_order() {
        let mut heap = heap();
        let a = heap.allocate_stack(4).segment();
        let b = heap.allocate_stack(4).segment();
        assert!(a < b);

        heap.deallocate(a);
        let c = heap.allocate_stack(4).segment();
        assert_eq!(c, a, "the freed id comes back before a fresh one");

        let d = heap.allocate_stack(4).segment();
        assert_eq!(d, b + 1, "only then does the directory grow");
    }

    #[test]
    fn dereference_tolerates_bad_pointers() {
        let mut heap = heap();
        let live = heap.allocate_stack(4);
        heap.deallocate(live.segment());

        assert!(heap.deref(Value::NULL).is_none(), "null pointer");
        assert!(heap.deref(Value::new(0, 12)).is_none(), "plain number");
        assert!(heap.deref(Value::new(200, 0)).is_none(), "past the directory");
        assert!(heap.deref(live).is_none(), "freed slot");
    }

    #[test]
    #[should_panic(expected = "invalid segment id")]
    fn deallocating_an_unissued_identifier_is_fatal() {
        let mut heap = heap();
        heap.deallocate(200);
    }

    #[test]
    #[should_panic(expected = "already freed")]
    fn double_deallocate_is_fatal() {
        let mut heap = heap();
        let seg = heap.allocate_stack(4).segment();
        heap.deallocate(seg);
        heap.deallocate(seg);
    }

    #[test]
    fn typed_lookup_filters_on_kind() {
        let mut heap = heap();
        let stack = heap.allocate_stack(4).segment();
        assert!(heap.get_segment(stack, SegmentKind::Stack).is_some());
        assert!(heap.get_segment(stack, SegmentKind::Dynamic).is_none());
        assert_eq!(heap.segment_kind(stack), SegmentKind::Stack);
        assert_eq!(heap.segment_kind(99), SegmentKind::Invalid);
    }

    #[test]
    fn find_segment_by_type_locates_singletons() {
        let mut heap = heap();
        assert_eq!(heap.find_segment_by_type(SegmentKind::Stack), 0);
        heap.alloc_dynmem(4, "first");
        let stack = heap.allocate_stack(4).segment();
        assert_eq!(heap.find_segment_by_type(SegmentKind::Stack), stack);
    }

    #[test]
    fn masked_addressing_resolves_decorated_segments() {
        let mut heap = Heap::new(
            HeapCreateInfo {
                addressing: AddressingMode::Masked14,
                ..Default::default()
            },
            Box::new(NullLoader),
        )
        .unwrap();
        let seg = heap.allocate_stack(4).segment();
        let decorated = Value::new(seg | 0x4000, 0);
        assert!(heap.deref(decorated).is_some(), "high bits are masked off");
        assert_eq!(heap.segment_kind(seg | 0x8000), SegmentKind::Stack);
        heap.deallocate(seg | 0xc000);
        assert_eq!(heap.segment_kind(seg), SegmentKind::Invalid);
    }

    #[test]
    fn full_addressing_takes_segments_verbatim() {
        let mut heap = heap();
        let seg = heap.allocate_stack(4).segment();
        assert!(heap.deref(Value::new(seg | 0x4000, 0)).is_none());
    }

    #[test]
    fn dynmem_lifecycle() {
        let mut heap = heap();
        let (addr, buf) = heap.alloc_dynmem(16, "scratch");
        assert_eq!(buf.len(), 16);
        assert!(buf.iter().all(|&b| b == 0), "fresh buffers are zeroed");

        assert!(heap.free_dynmem(addr));
        assert!(!heap.free_dynmem(addr), "second free reports failure");
        assert!(heap.deref(addr).is_none());
    }

    #[test]
    fn free_dynmem_rejects_other_segment_kinds() {
        let mut heap = heap();
        let stack = heap.allocate_stack(4);
        assert!(!heap.free_dynmem(stack));
        assert_eq!(heap.segment_kind(stack.segment()), SegmentKind::Stack);
    }

    #[test]
    fn table_allocations_share_one_segment_per_kind() {
        let mut heap = heap();
        let a = heap.allocate_list();
        let b = heap.allocate_list();
        assert_eq!(a.segment(), b.segment());
        assert_ne!(a.offset(), b.offset());

        let c = heap.allocate_clone();
        assert_ne!(c.segment(), a.segment(), "each kind gets its own table");
    }

    #[test]
    fn node_allocation_initializes_links() {
        let mut heap = heap();
        let key = Value::new(0, 7);
        let value = Value::new(0, 9);
        let at = heap.new_node(value, key);

        let node = heap.lookup_node(at).unwrap();
        assert!(node.pred.is_null());
        assert!(node.succ.is_null());
        assert_eq!(node.key, key);
        assert_eq!(node.value, value);

        assert!(heap.lookup_node(Value::NULL).is_none(), "null is not an error");
    }

    #[test]
    fn lookups_reject_wrong_kinds_and_stale_entries() {
        let mut heap = heap();
        let list = heap.allocate_list();
        assert!(heap.lookup_node(list).is_none(), "a list is not a node");
        assert!(heap.lookup_list(list).is_some());

        let Some(Segment::Lists(table)) = heap.segment_obj_mut(list.segment()) else {
            panic!("list table expected");
        };
        table.free_entry(list.offset());
        assert!(heap.lookup_list(list).is_none(), "freed entry is stale");
    }

    #[test]
    fn hunks_hold_opaque_engine_memory() {
        let mut heap = heap();
        let at = heap.allocate_hunk("save game", 32);
        {
            let hunk = heap.hunk_data(at).unwrap();
            assert_eq!(hunk.kind, "save game");
            assert_eq!(hunk.data.len(), 32);
            hunk.data[0] = 0xfe;
        }
        heap.free_hunk(at);
        assert!(heap.hunk_data(at).is_none(), "stale handles read as gone");
        heap.free_hunk(Value::NULL);
    }

    #[test]
    fn byte_arrays_are_pointer_addressable() {
        let mut heap = heap();
        let at = heap.allocate_array(6);
        assert!(heap.is_array(at));
        assert!(!heap.is_array(Value::new(0x7f, 0)));

        heap.lookup_array(at).unwrap().data[5] = 9;
        assert_eq!(heap.deref_bytes(at, 6).unwrap()[5], 9);

        heap.free_array(at);
        assert!(heap.lookup_array(at).is_none());
        heap.free_array(Value::NULL);
    }

    #[test]
    fn bitmaps_expose_their_pixel_data() {
        let mut heap = heap();
        let at = heap.allocate_bitmap(4, 3, 0x0f, -1, 2);
        let bitmap = heap.lookup_bitmap(at).unwrap();
        assert_eq!(bitmap.width(), 4);
        assert_eq!(bitmap.height(), 3);
        assert_eq!(bitmap.origin(), (-1, 2));
        assert!(bitmap.data().iter().all(|&px| px == 0x0f));

        match heap.deref(at) {
            Some(View::Raw(bytes)) => assert_eq!(bytes.len(), 12),
            other => panic!("expected raw pixels, got {other:?}"),
        }
        heap.free_bitmap(at);
        assert!(heap.lookup_bitmap(at).is_none());
    }

    #[test]
    fn accessor_kind_mismatches_degrade_to_none() {
        let mut heap = heap();
        let stack = heap.allocate_stack(4);
        let (mem, _) = heap.alloc_dynmem(8, "bytes");

        assert!(heap.deref_bytes(stack, 1).is_none(), "cells are not bytes");
        assert!(heap.deref_cells(mem, 1).is_none(), "bytes are not cells");
        assert!(heap.deref_cstring(stack).is_none());
        assert!(heap.deref_bytes(mem, 9).is_none(), "count past the bound");
        assert!(heap.deref_cells(stack, 5).is_none(), "count past the bound");
        assert!(
            heap.deref_cells(stack.with_offset(1), 1).is_none(),
            "mid-cell pointers cannot be read at cell granularity"
        );
    }

    #[test]
    fn cstring_reads_stop_at_the_terminator() {
        let mut heap = heap();
        let (mem, buf) = heap.alloc_dynmem(8, "text");
        buf[..4].copy_from_slice(b"ab\0d");
        assert_eq!(heap.deref_cstring(mem).unwrap(), b"ab");
        assert_eq!(
            heap.deref_cstring(mem.with_offset(3)).unwrap(),
            b"d",
            "unterminated tail runs to the segment end is bounded by the zero fill"
        );
    }

    #[test]
    fn sys_strings_live_in_one_shared_buffer() {
        let mut heap = heap();
        heap.init_sys_strings();
        let save_dir = heap.save_dir_ptr();
        let parser = heap.parser_ptr();
        assert_eq!(save_dir.segment(), parser.segment());
        assert_eq!(parser.offset(), save_dir.offset() + 256);

        heap.strcpy_from(save_dir, b"/saves");
        heap.strcpy_from(parser, b"look at door");
        assert_eq!(heap.get_string(save_dir), "/saves");
        assert_eq!(heap.get_string(parser), "look at door");
    }

    #[test]
    fn reset_returns_the_directory_to_its_initial_state() {
        let mut heap = heap();
        heap.allocate_stack(4);
        heap.allocate_clone();
        heap.allocate_hunk("tmp", 8);
        heap.init_sys_strings();

        heap.reset();
        assert_eq!(heap.segments().count(), 0);
        assert!(heap.save_dir_ptr().is_null());

        // Singleton caches were dropped with their segments; allocation
        // rebuilds them from scratch.
        let clone = heap.allocate_clone();
        assert_eq!(clone.segment(), 1);
    }

    #[test]
    fn deallocating_a_singleton_table_clears_its_cache() {
        let mut heap = heap();
        let a = heap.allocate_clone();
        heap.deallocate(a.segment());
        let b = heap.allocate_clone();
        assert!(heap.lookup_clone(b).is_some(), "cache was rebuilt, not dangling");
    }

    #[test]
    fn object_names_resolve_through_clones() {
        let mut heap = heap();
        let at = heap.allocate_clone();
        heap.lookup_clone(at).unwrap().name = Some("ego".to_owned());

        assert_eq!(heap.object_name(at), Some("ego"));
        assert_eq!(heap.find_objects_by_name("ego"), vec![at]);
        assert!(heap.find_objects_by_name("missing").is_empty());
    }
}
