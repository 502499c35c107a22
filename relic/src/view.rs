//! Dereference results.
//!
//! A view is the typed resolution of a tagged pointer: either a raw byte
//! slice or a slice of tagged cells. The slice length is the remaining
//! addressable space from the requested offset to the segment end, so bound
//! checks are ordinary slice-length comparisons. `skip_byte` marks a byte
//! granular view into cell storage that starts mid-cell.

use crate::Value;

#[derive(Debug)]
pub enum View<'a> {
    Raw(&'a [u8]),
    Cells { cells: &'a [Value], skip_byte: bool },
}

#[derive(Debug)]
pub enum ViewMut<'a> {
    Raw(&'a mut [u8]),
    Cells {
        cells: &'a mut [Value],
        skip_byte: bool,
    },
}

impl View<'_> {
    #[inline]
    pub fn is_raw(&self) -> bool {
        matches!(self, View::Raw(_))
    }

    /// Remaining addressable units: bytes for raw views, cells otherwise.
    pub fn max_size(&self) -> usize {
        match self {
            View::Raw(bytes) => bytes.len(),
            View::Cells { cells, .. } => cells.len(),
        }
    }

    /// How many bytes can be synthesized from this view.
    pub fn byte_size(&self) -> usize {
        match self {
            View::Raw(bytes) => bytes.len(),
            View::Cells { cells, skip_byte } => {
                (cells.len() * 2).saturating_sub(*skip_byte as usize)
            }
        }
    }
}

impl ViewMut<'_> {
    #[inline]
    pub fn is_raw(&self) -> bool {
        matches!(self, ViewMut::Raw(_))
    }

    pub fn byte_size(&self) -> usize {
        match self {
            ViewMut::Raw(bytes) => bytes.len(),
            ViewMut::Cells { cells, skip_byte } => {
                (cells.len() * 2).saturating_sub(*skip_byte as usize)
            }
        }
    }
}
