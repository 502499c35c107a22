use relic::{
    Heap, HeapCreateInfo, ObjectKind, ObjectRecord, ScriptImage, ScriptLoader, ScriptLoadFlags,
    Segment, Value,
};
use std::collections::HashMap;

// A small in-memory resource set: script 100 defines the root class, script
// 110 defines a door class on top of it plus one object instance.
struct DemoLoader {
    scripts: HashMap<u16, ScriptImage>,
}

impl DemoLoader {
    fn new() -> Self {
        let mut scripts = HashMap::new();
        scripts.insert(
            100,
            ScriptImage {
                bytecode: vec![0; 96],
                locals: vec![Value::NULL; 8],
                objects: vec![ObjectRecord {
                    offset: 16,
                    kind: ObjectKind::Class,
                    class_number: Some(0),
                    super_class: None,
                    name: Some("Obj".to_owned()),
                }],
            },
        );
        scripts.insert(
            110,
            ScriptImage {
                bytecode: vec![0; 128],
                locals: vec![Value::NULL; 4],
                objects: vec![
                    ObjectRecord {
                        offset: 24,
                        kind: ObjectKind::Class,
                        class_number: Some(1),
                        super_class: Some(0),
                        name: Some("Door".to_owned()),
                    },
                    ObjectRecord {
                        offset: 64,
                        kind: ObjectKind::Object,
                        class_number: None,
                        super_class: Some(1),
                        name: Some("frontDoor".to_owned()),
                    },
                ],
            },
        );
        Self { scripts }
    }
}

impl ScriptLoader for DemoLoader {
    fn class_index(&self) -> Option<Vec<u8>> {
        let mut bytes = Vec::new();
        for script in [100u16, 110] {
            bytes.extend_from_slice(&[0, 0]);
            bytes.extend_from_slice(&script.to_le_bytes());
        }
        Some(bytes)
    }

    fn load(&self, script_number: u16) -> Option<ScriptImage> {
        self.scripts.get(&script_number).cloned()
    }
}

fn dump(heap: &Heap) {
    for (id, segment) in heap.segments() {
        let detail = match segment {
            Segment::Script(script) => format!(
                "script {} ({} bytes, lockers {}{})",
                script.number(),
                script.buf_size(),
                script.lockers(),
                if script.is_marked_deleted() {
                    ", deleted"
                } else {
                    ""
                }
            ),
            Segment::Dynamic(mem) => {
                format!("dynmem \"{}\" ({} bytes)", mem.description, mem.data.len())
            }
            other => format!("{:?}", other.kind()),
        };
        println!("  {id:04x}: {detail}");
    }
}

fn main() {
    env_logger::init();

    let mut heap =
        Heap::new(HeapCreateInfo::default(), Box::new(DemoLoader::new())).expect("class index");
    heap.init_sys_strings();

    let door_seg = heap.instantiate(110);
    let door_class = heap.class_address(1, ScriptLoadFlags::LOAD, door_seg);
    let root_class = heap.class_address(0, ScriptLoadFlags::LOAD, door_seg);
    println!("Door resolves to {door_class}, its root class to {root_class}");
    println!(
        "frontDoor found at {:?}",
        heap.find_objects_by_name("frontDoor")
    );

    let (scratch, _) = heap.alloc_dynmem(64, "scratch");
    heap.strcpy_from(scratch, b"a string in heap memory");
    let stack = heap.allocate_stack(32);
    heap.strcpy(stack, scratch);
    println!("round-tripped through the stack: {:?}", heap.get_string(stack));

    println!("segment directory:");
    dump(&heap);

    heap.uninstantiate(110);
    let reclaimed = heap.reclaim_deleted();
    println!("after unloading script 110 ({reclaimed} segment reclaimed):");
    dump(&heap);
}
