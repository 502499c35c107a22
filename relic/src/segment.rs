//! The closed set of segment kinds and their dereference behavior.

use crate::objects::{
    BitmapTable, ByteArrayTable, CloneTable, DataStack, DynMem, HunkTable, ListTable,
    LocalVariables, NodeTable,
};
use crate::view::{View, ViewMut};
use crate::{Script, Value};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SegmentKind {
    Invalid,
    Script,
    Clones,
    Lists,
    Nodes,
    Hunks,
    Dynamic,
    Arrays,
    Bitmaps,
    Stack,
    Locals,
}

/// One typed region of the virtual heap. Table-shaped variants wrap an entry
/// table; buffer-shaped variants own their storage directly.
#[derive(Debug)]
pub enum Segment {
    Script(Script),
    Clones(CloneTable),
    Lists(ListTable),
    Nodes(NodeTable),
    Hunks(HunkTable),
    Dynamic(DynMem),
    Arrays(ByteArrayTable),
    Bitmaps(BitmapTable),
    Stack(DataStack),
    Locals(LocalVariables),
}

impl Segment {
    pub fn kind(&self) -> SegmentKind {
        match self {
            Segment::Script(_) => SegmentKind::Script,
            Segment::Clones(_) => SegmentKind::Clones,
            Segment::Lists(_) => SegmentKind::Lists,
            Segment::Nodes(_) => SegmentKind::Nodes,
            Segment::Hunks(_) => SegmentKind::Hunks,
            Segment::Dynamic(_) => SegmentKind::Dynamic,
            Segment::Arrays(_) => SegmentKind::Arrays,
            Segment::Bitmaps(_) => SegmentKind::Bitmaps,
            Segment::Stack(_) => SegmentKind::Stack,
            Segment::Locals(_) => SegmentKind::Locals,
        }
    }

    /// Resolves an offset inside this segment. Returns `None` when the
    /// offset is out of range or the segment kind is not addressable memory
    /// (clones, lists, nodes and hunks are reached through their own typed
    /// accessors, never through pointer arithmetic).
    pub fn dereference(&self, offset: u16) -> Option<View<'_>> {
        match self {
            Segment::Script(script) => raw_view(script.buf(), offset),
            Segment::Dynamic(mem) => raw_view(&mem.data, offset),
            Segment::Stack(stack) => cell_view(&stack.cells, offset),
            Segment::Locals(locals) => cell_view(&locals.locals, offset),
            // The offset selects a table entry; the whole entry is the view.
            Segment::Arrays(table) => table.get(offset).map(|entry| View::Raw(&entry.data)),
            Segment::Bitmaps(table) => table.get(offset).map(|entry| View::Raw(entry.data())),
            _ => None,
        }
    }

    pub fn dereference_mut(&mut self, offset: u16) -> Option<ViewMut<'_>> {
        match self {
            Segment::Script(script) => raw_view_mut(script.buf_mut(), offset),
            Segment::Dynamic(mem) => raw_view_mut(&mut mem.data, offset),
            Segment::Stack(stack) => cell_view_mut(&mut stack.cells, offset),
            Segment::Locals(locals) => cell_view_mut(&mut locals.locals, offset),
            Segment::Arrays(table) => table
                .get_mut(offset)
                .map(|entry| ViewMut::Raw(&mut entry.data)),
            Segment::Bitmaps(table) => table
                .get_mut(offset)
                .map(|entry| ViewMut::Raw(entry.data_mut())),
            _ => None,
        }
    }
}

fn raw_view(data: &[u8], offset: u16) -> Option<View<'_>> {
    let offset = offset as usize;
    if offset > data.len() {
        return None;
    }
    Some(View::Raw(&data[offset..]))
}

fn raw_view_mut(data: &mut [u8], offset: u16) -> Option<ViewMut<'_>> {
    let offset = offset as usize;
    if offset > data.len() {
        return None;
    }
    Some(ViewMut::Raw(&mut data[offset..]))
}

// Cell segments carry byte offsets in pointers: cell index is offset / 2 and
// an odd offset lands mid-cell.
fn cell_view(cells: &[Value], offset: u16) -> Option<View<'_>> {
    let offset = offset as usize;
    if offset > cells.len() * 2 {
        return None;
    }
    Some(View::Cells {
        cells: &cells[offset / 2..],
        skip_byte: offset & 1 == 1,
    })
}

fn cell_view_mut(cells: &mut [Value], offset: u16) -> Option<ViewMut<'_>> {
    let offset = offset as usize;
    if offset > cells.len() * 2 {
        return None;
    }
    Some(ViewMut::Cells {
        cells: &mut cells[offset / 2..],
        skip_byte: offset & 1 == 1,
    })
}
