//! Script lifecycle and class resolution.
//!
//! Scripts are kept resident by a locker count. Unlocking to zero does not
//! free anything by itself: the script is marked deleted, stays resolvable
//! for lookups, and is collected later by the directory's reclaim sweep.
//! Old-generation content additionally unlocks the whole superclass chain
//! when a script goes away.

use ahash::RandomState;
use log::{debug, warn};
use std::collections::HashSet;

use crate::loader::ScriptImage;
use crate::objects::LocalVariables;
use crate::script::{Script, ScriptLoadFlags};
use crate::{Heap, Segment, SegmentId, Value};

/// One class table entry: the script that defines the class and, once that
/// script is resident, the class object's address. The address starts null
/// and is re-resolved lazily after the owner is uninstantiated.
#[derive(Debug, Copy, Clone)]
pub struct Class {
    pub script: u16,
    pub reg: Value,
}

impl Class {
    pub(crate) fn unresolved(script: u16) -> Self {
        Self {
            script,
            reg: Value::NULL,
        }
    }
}

impl Heap {
    pub fn class_count(&self) -> usize {
        self.class_table.len()
    }

    pub fn class(&self, class_number: u16) -> Option<&Class> {
        self.class_table.get(class_number as usize)
    }

    /// The segment a script currently lives in, or 0 when not resident.
    pub fn script_segment(&self, script_number: u16) -> SegmentId {
        self.script_seg_map
            .get(&script_number)
            .copied()
            .unwrap_or(0)
    }

    /// Segment lookup with optional load and an optional extra locker.
    pub fn script_segment_load(
        &mut self,
        script_number: u16,
        flags: ScriptLoadFlags,
    ) -> SegmentId {
        if flags.contains(ScriptLoadFlags::LOAD) {
            self.instantiate(script_number);
        }
        let segment = self.script_segment(script_number);
        if segment > 0 && flags.contains(ScriptLoadFlags::LOCK) {
            self.get_script_mut(segment).increment_lockers();
        }
        segment
    }

    /// Fatal on anything that is not a live script segment; soft paths use
    /// `script_if_loaded`.
    pub fn get_script(&self, segment: SegmentId) -> &Script {
        match self.segment_obj(segment) {
            Some(Segment::Script(script)) => script,
            Some(other) => panic!(
                "segment {segment:#06x} holds a {:?} segment, not a script",
                other.kind()
            ),
            None => panic!("script segment {segment:#06x} is not in memory"),
        }
    }

    pub fn get_script_mut(&mut self, segment: SegmentId) -> &mut Script {
        match self.segment_obj_mut(segment) {
            Some(Segment::Script(script)) => script,
            Some(other) => {
                let kind = other.kind();
                panic!("segment {segment:#06x} holds a {kind:?} segment, not a script")
            }
            None => panic!("script segment {segment:#06x} is not in memory"),
        }
    }

    pub fn script_if_loaded(&self, segment: SegmentId) -> Option<&Script> {
        match self.segment_obj(segment) {
            Some(Segment::Script(script)) => Some(script),
            _ => None,
        }
    }

    pub fn script_if_loaded_mut(&mut self, segment: SegmentId) -> Option<&mut Script> {
        match self.segment_obj_mut(segment) {
            Some(Segment::Script(script)) => Some(script),
            _ => None,
        }
    }

    /// Makes a script resident and takes a locker on it.
    ///
    /// Re-entry on a loaded script just adds a locker. A script that was
    /// marked deleted keeps its segment id but is reloaded from scratch,
    /// with a fresh locals segment.
    pub fn instantiate(&mut self, script_number: u16) -> SegmentId {
        let mut segment = self.script_segment(script_number);
        match self.script_if_loaded(segment).map(Script::is_marked_deleted) {
            Some(false) => {
                self.get_script_mut(segment).increment_lockers();
                return segment;
            }
            Some(true) => {
                let locals = self.get_script(segment).locals_segment();
                if locals != 0 {
                    let idx = self.actual_segment(locals) as usize;
                    if idx < self.heap.len()
                        && matches!(self.heap[idx], Some(Segment::Locals(_)))
                    {
                        self.deallocate(locals);
                    }
                }
            }
            None => {
                segment = self.alloc_segment(Segment::Script(Script::new(script_number)));
                self.script_seg_map.insert(script_number, segment);
            }
        }

        let Some(image) = self.loader.load(script_number) else {
            panic!("script {script_number} not found in the resource set");
        };
        self.install_image(segment, image);
        segment
    }

    fn install_image(&mut self, segment: SegmentId, image: ScriptImage) {
        let ScriptImage {
            bytecode,
            locals,
            objects,
        } = image;

        let locals_segment = if locals.is_empty() {
            0
        } else {
            let number = self.get_script(segment).number();
            self.alloc_segment(Segment::Locals(LocalVariables::new(number, locals)))
        };

        let script = self.get_script_mut(segment);
        script.load(bytecode, objects);
        script.set_locals_segment(locals_segment);

        // Class records resolve their table entries as a side effect of the
        // load; that is what lets class_address retry after instantiating.
        let defined: Vec<(u16, u16)> = self
            .get_script(segment)
            .records()
            .iter()
            .filter_map(|record| record.class_number.map(|n| (n, record.offset)))
            .collect();
        for (class_number, offset) in defined {
            match self.class_table.get_mut(class_number as usize) {
                Some(class) => class.reg = Value::new(segment, offset),
                None => {
                    warn!("script declares class {class_number} outside the class table")
                }
            }
        }
    }

    /// Releases one locker. Requests against scripts that are not resident,
    /// or already marked deleted, are ordinary no-ops.
    pub fn uninstantiate(&mut self, script_number: u16) {
        let mut walked: HashSet<u16, RandomState> = HashSet::default();
        self.uninstantiate_inner(script_number, &mut walked);
    }

    fn uninstantiate_inner(
        &mut self,
        script_number: u16,
        walked: &mut HashSet<u16, RandomState>,
    ) {
        let segment = self.script_segment(script_number);
        let Some(script) = self.script_if_loaded_mut(segment) else {
            return;
        };
        if script.is_marked_deleted() {
            return;
        }

        script.decrement_lockers();
        if script.lockers() > 0 {
            return;
        }

        // Force re-resolution of every class this segment was serving.
        for class in &mut self.class_table {
            if class.reg.segment() == segment {
                class.reg = Value::NULL;
            }
        }

        if self.info.legacy_unload {
            // A superclass chain that loops back into a script mid-teardown
            // is broken content; the guard turns unbounded recursion into a
            // reported data error.
            assert!(
                walked.insert(script_number),
                "superclass chain of script {script_number} is cyclic"
            );
            self.unlock_superclasses(script_number, walked);
        }

        let script = self.get_script_mut(segment);
        if script.lockers() == 0 {
            script.mark_deleted();
            debug!("unloaded script {script_number}");
        }
    }

    // One pass over the script's records in file order, unlocking every
    // superclass owned by another script.
    fn unlock_superclasses(
        &mut self,
        script_number: u16,
        walked: &mut HashSet<u16, RandomState>,
    ) {
        let segment = self.script_segment(script_number);
        let supers: Vec<u16> = self
            .get_script(segment)
            .records()
            .iter()
            .filter_map(|record| record.super_class)
            .collect();

        for super_class in supers {
            let owner = match self.class_table.get(super_class as usize) {
                Some(class) => class.script,
                None => {
                    warn!(
                        "script {script_number} references superclass {super_class} outside the class table"
                    );
                    continue;
                }
            };
            if owner == script_number {
                // A class chaining to its own script drops one more locker
                // and does not recurse.
                self.get_script_mut(segment).decrement_lockers();
            } else {
                self.uninstantiate_inner(owner, walked);
            }
        }
    }

    /// Resolves a class number to the address of its class object.
    ///
    /// A resolved entry referenced from a foreign segment takes an extra
    /// locker on the owner. An unresolved entry instantiates the owner and
    /// retries; if that still does not resolve it, the content is broken,
    /// unless the caller asked not to load at all (then null).
    pub fn class_address(
        &mut self,
        class_number: u16,
        flags: ScriptLoadFlags,
        caller_segment: SegmentId,
    ) -> Value {
        if class_number == 0xffff {
            return Value::NULL;
        }
        let Some(class) = self.class_table.get(class_number as usize).copied() else {
            panic!(
                "attempt to resolve class {class_number:#x}, which does not exist (max {})",
                self.class_table.len()
            );
        };

        if class.reg.segment() == 0 {
            self.script_segment_load(class.script, flags);
            let resolved = self.class_table[class_number as usize].reg;
            if resolved.segment() == 0 {
                if !flags.contains(ScriptLoadFlags::LOAD) {
                    return Value::NULL;
                }
                panic!(
                    "instantiating script {} did not resolve class {class_number}",
                    class.script
                );
            }
            resolved
        } else {
            if caller_segment != class.reg.segment() {
                self.get_script_mut(class.reg.segment()).increment_lockers();
            }
            class.reg
        }
    }

    pub fn deallocate_script(&mut self, script_number: u16) {
        let segment = self.script_segment(script_number);
        self.deallocate(segment);
    }
}
