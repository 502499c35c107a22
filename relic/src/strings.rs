//! Cross-representation string and byte primitives.
//!
//! Cell-addressed storage keeps each textual byte in half of a tagged cell,
//! with the tag half normally zero. Every bulk operation therefore branches
//! on the representation of both endpoints independently: raw to raw, raw to
//! cells, cells to raw, cells to cells.

use log::warn;

use crate::view::{View, ViewMut};
use crate::{Heap, Value};

// Which half of a cell a byte index selects depends on the parity of the
// index (after the mid-cell skip) and the configured byte order.
fn get_char(cells: &[Value], skip_byte: bool, big_endian: bool, index: usize) -> u8 {
    let index = index + skip_byte as usize;
    let val = cells[index / 2];

    // Scripts are known to read from uninitialized temp-variable space; a
    // tag of 0xffff past the first two bytes is that, and is tolerated
    // silently. Anything else tagged is worth a diagnostic.
    if val.segment() != 0 && !(val.segment() == 0xffff && index > 1) {
        warn!("attempt to read a character from non-raw data");
    }

    let mut odd = index & 1 == 1;
    if big_endian {
        odd = !odd;
    }
    if odd {
        (val.offset() >> 8) as u8
    } else {
        (val.offset() & 0xff) as u8
    }
}

fn set_char(cells: &mut [Value], skip_byte: bool, big_endian: bool, index: usize, byte: u8) {
    let index = index + skip_byte as usize;
    let val = &mut cells[index / 2];
    val.set_segment(0);

    let mut odd = index & 1 == 1;
    if big_endian {
        odd = !odd;
    }
    if odd {
        val.set_offset((val.offset() & 0x00ff) | ((byte as u16) << 8));
    } else {
        val.set_offset((val.offset() & 0xff00) | byte as u16);
    }
}

fn cell_byte_capacity(cells_len: usize, skip_byte: bool) -> usize {
    (cells_len * 2).saturating_sub(skip_byte as usize)
}

impl Heap {
    /// Copies a zero-terminated string into heap storage, at most `n` bytes.
    ///
    /// `src` is the string contents without terminator; the copy writes one.
    /// For raw destinations the remainder up to `n` is zero-padded, unless
    /// `n` is `usize::MAX`, the "unbounded" sentinel used for plain strcpy.
    pub fn strncpy_from(&mut self, dest: Value, src: &[u8], n: usize) {
        let big_endian = self.info.big_endian;
        let Some(view) = self.deref_mut(dest) else {
            warn!("attempt to strncpy to invalid pointer {dest}");
            return;
        };
        match view {
            ViewMut::Raw(bytes) => {
                let zero_pad = n != usize::MAX;
                let limit = n.min(bytes.len());
                let mut written = 0;
                while written < limit {
                    let b = src.get(written).copied().unwrap_or(0);
                    bytes[written] = b;
                    written += 1;
                    if b == 0 {
                        break;
                    }
                }
                if zero_pad {
                    while written < limit {
                        bytes[written] = 0;
                        written += 1;
                    }
                }
            }
            ViewMut::Cells { cells, skip_byte } => {
                let cap = cell_byte_capacity(cells.len(), skip_byte);
                let limit = n.min(cap);
                for i in 0..limit {
                    let b = src.get(i).copied().unwrap_or(0);
                    set_char(cells, skip_byte, big_endian, i, b);
                    if b == 0 {
                        break;
                    }
                }
                // Terminate when the destination has room past the copy.
                if cap > n {
                    set_char(cells, skip_byte, big_endian, n, 0);
                }
            }
        }
    }

    pub fn strcpy_from(&mut self, dest: Value, src: &[u8]) {
        self.strncpy_from(dest, src, usize::MAX);
    }

    /// String copy between two heap pointers, at most `n` bytes.
    pub fn strncpy(&mut self, dest: Value, src: Value, n: usize) {
        if src.is_null() {
            // A null source clears the destination instead.
            if n > 0 {
                self.strcpy_from(dest, b"");
            }
            return;
        }

        let Some((buf, src_is_raw)) = self.read_string_bytes(src, n) else {
            warn!("attempt to strncpy from invalid pointer {src}");
            if n > 0 {
                self.strcpy_from(dest, b"");
            }
            return;
        };

        if src_is_raw {
            self.strncpy_from(dest, &buf, n);
            return;
        }

        // A cell-addressed source copies without padding; that asymmetry is
        // what the scripts were written against.
        let big_endian = self.info.big_endian;
        let Some(view) = self.deref_mut(dest) else {
            warn!("attempt to strncpy to invalid pointer {dest}");
            return;
        };
        match view {
            ViewMut::Raw(bytes) => {
                let limit = n.min(bytes.len());
                for i in 0..limit {
                    let b = buf.get(i).copied().unwrap_or(0);
                    bytes[i] = b;
                    if b == 0 {
                        break;
                    }
                }
            }
            ViewMut::Cells { cells, skip_byte } => {
                let limit = n.min(cell_byte_capacity(cells.len(), skip_byte));
                for i in 0..limit {
                    let b = buf.get(i).copied().unwrap_or(0);
                    set_char(cells, skip_byte, big_endian, i, b);
                    if b == 0 {
                        break;
                    }
                }
            }
        }
    }

    pub fn strcpy(&mut self, dest: Value, src: Value) {
        self.strncpy(dest, src, usize::MAX);
    }

    /// Plain byte copy from host memory, no terminator semantics. Refuses
    /// with a diagnostic if the destination cannot hold the whole slice.
    pub fn memcpy_in(&mut self, dest: Value, src: &[u8]) {
        let big_endian = self.info.big_endian;
        let n = src.len();
        let Some(view) = self.deref_mut(dest) else {
            warn!("attempt to memcpy to invalid pointer {dest}");
            return;
        };
        if n > view.byte_size() {
            warn!("attempt to memcpy {n} bytes past the end of segment at {dest}");
            return;
        }
        match view {
            ViewMut::Raw(bytes) => bytes[..n].copy_from_slice(src),
            ViewMut::Cells { cells, skip_byte } => {
                for (i, &b) in src.iter().enumerate() {
                    set_char(cells, skip_byte, big_endian, i, b);
                }
            }
        }
    }

    /// Plain byte copy between two heap pointers. Both bounds are checked up
    /// front; any violation refuses the whole copy.
    pub fn memcpy(&mut self, dest: Value, src: Value, n: usize) {
        let Some(buf) = self.read_raw_bytes(src, n) else {
            return;
        };
        self.memcpy_in(dest, &buf);
    }

    /// Plain byte copy out of the heap into host memory.
    pub fn memcpy_out(&self, dest: &mut [u8], src: Value) {
        let Some(buf) = self.read_raw_bytes(src, dest.len()) else {
            return;
        };
        dest.copy_from_slice(&buf);
    }

    /// String length at `at`. Raw strings are not guaranteed to be
    /// terminated, so the scan stops at the segment end.
    pub fn strlen(&self, at: Value) -> usize {
        if at.is_null() {
            return 0;
        }
        let Some(view) = self.deref(at) else {
            warn!("attempt to take the length of invalid pointer {at}");
            return 0;
        };
        match view {
            View::Raw(bytes) => bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len()),
            View::Cells { cells, skip_byte } => {
                let cap = cell_byte_capacity(cells.len(), skip_byte);
                let mut len = 0;
                while len < cap && get_char(cells, skip_byte, self.info.big_endian, len) != 0 {
                    len += 1;
                }
                len
            }
        }
    }

    /// The string at `at` as owned text. Invalid pointers read as empty.
    pub fn get_string(&self, at: Value) -> String {
        if at.is_null() {
            return String::new();
        }
        let Some((bytes, _)) = self.read_string_bytes(at, usize::MAX) else {
            warn!("attempt to read a string from invalid pointer {at}");
            return String::new();
        };
        String::from_utf8_lossy(&bytes).into_owned()
    }

    /// C-style three-way comparison between two heap strings.
    pub fn strcmp(&self, left: Value, right: Value) -> i32 {
        let a = self
            .read_string_bytes(left, usize::MAX)
            .map(|(bytes, _)| bytes)
            .unwrap_or_default();
        let b = self
            .read_string_bytes(right, usize::MAX)
            .map(|(bytes, _)| bytes)
            .unwrap_or_default();

        for (&x, &y) in a.iter().zip(b.iter()) {
            if x != y {
                return x as i32 - y as i32;
            }
        }
        a.len() as i32 - b.len() as i32
    }

    // String bytes at `src` up to `n`, terminator excluded, plus whether the
    // source was raw. None when the pointer does not resolve.
    fn read_string_bytes(&self, src: Value, n: usize) -> Option<(Vec<u8>, bool)> {
        match self.deref(src)? {
            View::Raw(bytes) => {
                let limit = n.min(bytes.len());
                let end = bytes[..limit]
                    .iter()
                    .position(|&b| b == 0)
                    .unwrap_or(limit);
                Some((bytes[..end].to_vec(), true))
            }
            View::Cells { cells, skip_byte } => {
                let limit = n.min(cell_byte_capacity(cells.len(), skip_byte));
                let mut out = Vec::new();
                for i in 0..limit {
                    let b = get_char(cells, skip_byte, self.info.big_endian, i);
                    if b == 0 {
                        break;
                    }
                    out.push(b);
                }
                Some((out, false))
            }
        }
    }

    // Exactly `n` bytes at `src`, embedded zeros included. None, with a
    // diagnostic, on an invalid pointer or a bound overrun.
    fn read_raw_bytes(&self, src: Value, n: usize) -> Option<Vec<u8>> {
        let Some(view) = self.deref(src) else {
            warn!("attempt to memcpy from invalid pointer {src}");
            return None;
        };
        if n > view.byte_size() {
            warn!("attempt to memcpy {n} bytes past the end of segment at {src}");
            return None;
        }
        match view {
            View::Raw(bytes) => Some(bytes[..n].to_vec()),
            View::Cells { cells, skip_byte } => Some(
                (0..n)
                    .map(|i| get_char(cells, skip_byte, self.info.big_endian, i))
                    .collect(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::{ScriptImage, ScriptLoader};
    use crate::HeapCreateInfo;

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

    fn heap_with(info: HeapCreateInfo) -> Heap {
        Heap::new(info, Box::new(NullLoader)).unwrap()
    }

    #[test]
    fn raw_round_trip() {
        let mut heap = heap();
        let (dest, _) = heap.alloc_dynmem(32, "text");
        heap.strcpy_from(dest, b"hello");
        assert_eq!(heap.get_string(dest), "hello");
        assert_eq!(heap.strlen(dest), 5);

        heap.strcpy_from(dest, b"x");
        assert_eq!(heap.get_string(dest), "x");
        assert_eq!(heap.strlen(dest), 1);
    }

    #[test]
    fn cell_round_trip() {
        let mut heap = heap();
        let stack = heap.allocate_stack(16);
        heap.strcpy_from(stack, b"hello");
        assert_eq!(heap.get_string(stack), "hello");
        assert_eq!(heap.strlen(stack), 5);
    }

    #[test]
    fn cell_round_trip_at_odd_offset() {
        let mut heap = heap();
        let stack = heap.allocate_stack(16);
        let dest = stack.with_offset(3);
        heap.strcpy_from(dest, b"mid");
        assert_eq!(heap.get_string(dest), "mid");
        assert_eq!(heap.strlen(dest), 3);
    }

    #[test]
    fn empty_string_round_trip() {
        let mut heap = heap();
        let (dest, _) = heap.alloc_dynmem(8, "text");
        heap.strcpy_from(dest, b"");
        assert_eq!(heap.get_string(dest), "");
        assert_eq!(heap.strlen(dest), 0);

        let stack = heap.allocate_stack(4);
        heap.strcpy_from(stack, b"");
        assert_eq!(heap.get_string(stack), "");
    }

    #[test]
    fn copy_truncates_at_destination_bound() {
        let mut heap = heap();
        let (dest, _) = heap.alloc_dynmem(4, "small");
        // One byte longer than the destination: must truncate, not overrun.
        heap.strcpy_from(dest, b"abcd");
        assert_eq!(heap.get_string(dest), "abcd", "unterminated string runs to the bound");
        assert_eq!(heap.strlen(dest), 4);

        let stack = heap.allocate_stack(2);
        heap.strcpy_from(stack, b"abcd");
        assert_eq!(heap.get_string(stack), "abcd");
    }

    #[test]
    fn bounded_copy_zero_pads_raw_destinations() {
        let mut heap = heap();
        let (dest, buf) = heap.alloc_dynmem(8, "padded");
        buf.fill(0xaa);
        heap.strncpy_from(dest, b"ab", 6);
        let bytes = heap.deref_bytes(dest, 8).unwrap();
        assert_eq!(bytes, &[b'a', b'b', 0, 0, 0, 0, 0xaa, 0xaa]);
    }

    #[test]
    fn unbounded_copy_does_not_pad() {
        let mut heap = heap();
        let (dest, buf) = heap.alloc_dynmem(8, "unpadded");
        buf.fill(0xaa);
        heap.strcpy_from(dest, b"ab");
        let bytes = heap.deref_bytes(dest, 8).unwrap();
        assert_eq!(bytes, &[b'a', b'b', 0, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa]);
    }

    #[test]
    fn pointer_copy_crosses_representations() {
        let mut heap = heap();
        let (raw, _) = heap.alloc_dynmem(16, "raw");
        let cells = heap.allocate_stack(16);
        heap.strcpy_from(raw, b"transit");

        heap.strcpy(cells, raw);
        assert_eq!(heap.get_string(cells), "transit");

        let (raw_back, _) = heap.alloc_dynmem(16, "raw back");
        heap.strcpy(raw_back, cells);
        assert_eq!(heap.get_string(raw_back), "transit");
    }

    #[test]
    fn null_source_clears_the_destination() {
        let mut heap = heap();
        let (dest, _) = heap.alloc_dynmem(8, "text");
        heap.strcpy_from(dest, b"stale");
        heap.strncpy(dest, Value::NULL, 8);
        assert_eq!(heap.get_string(dest), "");
    }

    #[test]
    fn memcpy_preserves_embedded_zeros() {
        let mut heap = heap();
        let cells = heap.allocate_stack(8);
        heap.memcpy_in(cells, &[1, 0, 2, 0, 3]);

        let (raw, _) = heap.alloc_dynmem(5, "sink");
        heap.memcpy(raw, cells, 5);
        assert_eq!(heap.deref_bytes(raw, 5).unwrap(), &[1, 0, 2, 0, 3]);

        let mut out = [0u8; 5];
        heap.memcpy_out(&mut out, raw);
        assert_eq!(out, [1, 0, 2, 0, 3]);
    }

    #[test]
    fn memcpy_refuses_bound_violations() {
        let mut heap = heap();
        let (dest, buf) = heap.alloc_dynmem(4, "bounded");
        buf.fill(0x11);
        heap.memcpy_in(dest, &[0u8; 5]);
        assert_eq!(
            heap.deref_bytes(dest, 4).unwrap(),
            &[0x11; 4],
            "an oversized copy must be refused entirely"
        );

        let (src, _) = heap.alloc_dynmem(2, "short");
        heap.memcpy(dest, src, 3);
        assert_eq!(heap.deref_bytes(dest, 4).unwrap(), &[0x11; 4]);
    }

    #[test]
    fn scratch_buffer_strlen_scenario() {
        let mut heap = heap();
        let (scratch, _) = heap.alloc_dynmem(512, "scratch");
        heap.memcpy_in(scratch, b"0123456789");
        assert_eq!(heap.strlen(scratch), 10, "byte 10 is still zero");

        let buf = heap.deref_bytes_mut(scratch, 512).unwrap();
        buf.fill(b'x');
        assert_eq!(heap.strlen(scratch), 512, "unterminated scan stops at the bound");
    }

    #[test]
    fn strcmp_orders_across_representations() {
        let mut heap = heap();
        let (a, _) = heap.alloc_dynmem(8, "a");
        let b = heap.allocate_stack(8);
        heap.strcpy_from(a, b"abc");
        heap.strcpy_from(b, b"abc");
        assert_eq!(heap.strcmp(a, b), 0);

        heap.strcpy_from(b, b"abd");
        assert!(heap.strcmp(a, b) < 0);
        assert!(heap.strcmp(b, a) > 0);

        heap.strcpy_from(b, b"ab");
        assert!(heap.strcmp(a, b) > 0, "prefix orders before the longer string");
    }

    #[test]
    fn big_endian_sessions_flip_the_half_cell_order() {
        let mut heap = heap_with(HeapCreateInfo {
            big_endian: true,
            ..Default::default()
        });
        let stack = heap.allocate_stack(4);
        heap.strcpy_from(stack, b"hi");
        let cells = heap.deref_cells(stack, 2).unwrap();
        assert_eq!(cells[0].offset(), (b'h' as u16) << 8 | b'i' as u16);
        assert_eq!(heap.get_string(stack), "hi");
    }

    #[test]
    fn little_endian_sessions_keep_the_low_half_first() {
        let mut heap = heap();
        let stack = heap.allocate_stack(4);
        heap.strcpy_from(stack, b"hi");
        let cells = heap.deref_cells(stack, 2).unwrap();
        assert_eq!(cells[0].offset(), (b'i' as u16) << 8 | b'h' as u16);
    }
}
