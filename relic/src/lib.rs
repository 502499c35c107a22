mod error;
mod heap;
mod lifecycle;
mod loader;
mod objects;
mod script;
mod segment;
mod strings;
mod table;
mod tagged;
mod view;

pub use error::HeapError;
pub use heap::{Heap, HeapCreateInfo};
pub use lifecycle::Class;
pub use loader::{ScriptImage, ScriptLoader};
pub use objects::*;
pub use script::{ObjectKind, ObjectRecord, Script, ScriptLoadFlags};
pub use segment::{Segment, SegmentKind};
pub use table::EntryTable;
pub use tagged::{AddressingMode, SegmentId, Value};
pub use view::{View, ViewMut};
