use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use sda_jdwp::consts::tag;
use sda_jdwp::{JdwpWriter, ObjectId};

use crate::error::{ProtocolError, ProtocolResult};
use crate::runtime::{ObjectKind, ObjectRef, Runtime};

/// Number of heap-id allocations between sweeps for collected referents.
const COMPACT_INTERVAL: u32 = 256;

struct Inner {
    next_id: ObjectId,
    id_to_object: HashMap<ObjectId, ObjectRef>,
    object_to_id: HashMap<ObjectRef, ObjectId>,
    allocations_since_compact: u32,
}

impl Inner {
    fn remove(&mut self, id: ObjectId) {
        if let Some(object) = self.id_to_object.remove(&id) {
            if self.object_to_id.get(&object) == Some(&id) {
                self.object_to_id.remove(&object);
            }
        }
    }
}

/// Maps wire object ids to debuggee objects and back.
///
/// * `0` is null.
/// * Negative ids name read-only image objects. They are derived from the
///   runtime's stable index and never stored.
/// * Positive ids are allocated from a counter on first sight and held weakly:
///   the runtime reports liveness, and entries whose referent has been
///   collected are dropped the next time they are looked up.
///
/// One registry exists per debugger session.
pub struct IdentityRegistry {
    runtime: Arc<dyn Runtime>,
    inner: Mutex<Inner>,
}

impl IdentityRegistry {
    pub fn new(runtime: Arc<dyn Runtime>) -> Self {
        Self {
            runtime,
            inner: Mutex::new(Inner {
                next_id: 1,
                id_to_object: HashMap::new(),
                object_to_id: HashMap::new(),
                allocations_since_compact: 0,
            }),
        }
    }

    pub fn id_for(&self, object: Option<ObjectRef>) -> ObjectId {
        let Some(object) = object else {
            return 0;
        };

        if let Some(index) = self.runtime.rom_index(object) {
            assert!(index > 0, "read-only object index must be positive");
            return -(index as ObjectId);
        }

        let mut inner = self.inner.lock();
        if let Some(&id) = inner.object_to_id.get(&object) {
            return id;
        }

        let id = inner.next_id;
        assert!(id < ObjectId::MAX, "object id space exhausted");
        inner.next_id = id + 1;
        let previous = inner.id_to_object.insert(id, object);
        debug_assert!(previous.is_none());
        inner.object_to_id.insert(object, id);

        inner.allocations_since_compact += 1;
        if inner.allocations_since_compact >= COMPACT_INTERVAL {
            self.compact_locked(&mut inner);
        }
        id
    }

    /// Resolves an id. `Ok(None)` is the null object.
    pub fn object_for(&self, id: ObjectId) -> ProtocolResult<Option<ObjectRef>> {
        if id == 0 {
            return Ok(None);
        }
        if id < 0 {
            return self
                .runtime
                .rom_object(id.unsigned_abs())
                .map(Some)
                .ok_or(ProtocolError::InvalidObject(id));
        }

        let mut inner = self.inner.lock();
        let Some(&object) = inner.id_to_object.get(&id) else {
            return Err(ProtocolError::InvalidObject(id));
        };
        if !self.runtime.is_alive(object) {
            inner.remove(id);
            tracing::debug!(target: "sda.identity", object_id = id, "purged collected object");
            return Err(ProtocolError::InvalidObject(id));
        }
        Ok(Some(object))
    }

    pub fn thread_for(&self, id: ObjectId) -> ProtocolResult<ObjectRef> {
        self.narrow(id, ObjectKind::Thread, |id| {
            ProtocolError::InvalidThread(format!("object {id} is not a thread"))
        })
    }

    pub fn string_for(&self, id: ObjectId) -> ProtocolResult<ObjectRef> {
        self.narrow(id, ObjectKind::String, ProtocolError::InvalidString)
    }

    /// Resolves a class object by its object id.
    ///
    /// Reference type ids are a separate namespace, see [`crate::classes::ClassTable`].
    pub fn class_for(&self, id: ObjectId) -> ProtocolResult<ObjectRef> {
        self.narrow(id, ObjectKind::Class, ProtocolError::InvalidClass)
    }

    fn narrow(
        &self,
        id: ObjectId,
        kind: ObjectKind,
        mismatch: impl FnOnce(ObjectId) -> ProtocolError,
    ) -> ProtocolResult<ObjectRef> {
        match self.object_for(id)? {
            Some(object) if self.runtime.object_kind(object) == kind => Ok(object),
            _ => Err(mismatch(id)),
        }
    }

    pub fn tag_for(&self, object: Option<ObjectRef>) -> u8 {
        object
            .map(|object| self.runtime.object_kind(object).tag())
            .unwrap_or(tag::OBJECT)
    }

    /// Writes the object's type tag followed by its id.
    pub fn write_tagged(&self, w: &mut JdwpWriter, object: Option<ObjectRef>) {
        let tag = self.tag_for(object);
        w.write_tagged_object_id(tag, self.id_for(object));
    }

    /// Drops the mapping of an object the runtime reports as collected.
    pub fn object_collected(&self, object: ObjectRef) {
        let mut inner = self.inner.lock();
        if let Some(id) = inner.object_to_id.get(&object).copied() {
            inner.remove(id);
        }
    }

    /// Sweeps every entry whose referent is no longer alive.
    pub fn compact(&self) {
        let mut inner = self.inner.lock();
        self.compact_locked(&mut inner);
    }

    fn compact_locked(&self, inner: &mut Inner) {
        inner.allocations_since_compact = 0;
        let dead: Vec<ObjectId> = inner
            .id_to_object
            .iter()
            .filter(|(_, object)| !self.runtime.is_alive(**object))
            .map(|(id, _)| *id)
            .collect();
        for id in &dead {
            inner.remove(*id);
        }
        if !dead.is_empty() {
            tracing::debug!(target: "sda.identity", purged = dead.len(), "compacted object table");
        }
    }

    /// Number of live heap mappings currently held.
    pub fn len(&self) -> usize {
        self.inner.lock().id_to_object.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeRuntime;

    fn registry() -> (Arc<FakeRuntime>, IdentityRegistry) {
        let runtime = Arc::new(FakeRuntime::new());
        let registry = IdentityRegistry::new(runtime.clone());
        (runtime, registry)
    }

    #[test]
    fn null_maps_to_zero_both_ways() {
        let (_rt, registry) = registry();
        assert_eq!(registry.id_for(None), 0);
        assert_eq!(registry.object_for(0), Ok(None));
    }

    #[test]
    fn heap_ids_are_positive_increasing_and_stable() {
        let (rt, registry) = registry();
        let a = rt.add_object(ObjectKind::Object);
        let b = rt.add_object(ObjectKind::Object);
        let c = rt.add_object(ObjectKind::Object);

        let ida = registry.id_for(Some(a));
        let idb = registry.id_for(Some(b));
        let idc = registry.id_for(Some(c));
        assert_eq!((ida, idb, idc), (1, 2, 3));
        assert_eq!(registry.id_for(Some(b)), idb);

        for (id, object) in [(ida, a), (idb, b), (idc, c)] {
            assert_eq!(registry.object_for(id), Ok(Some(object)));
        }
    }

    #[test]
    fn rom_objects_get_negative_stable_ids_without_storage() {
        let (rt, registry) = registry();
        let rom = rt.add_rom_object(ObjectKind::String, 17);

        assert_eq!(registry.id_for(Some(rom)), -17);
        assert_eq!(registry.id_for(Some(rom)), -17);
        assert!(registry.is_empty());
        assert_eq!(registry.object_for(-17), Ok(Some(rom)));
        assert_eq!(registry.object_for(-18), Err(ProtocolError::InvalidObject(-18)));
    }

    #[test]
    fn collected_object_purges_once_and_stays_gone() {
        let (rt, registry) = registry();
        let obj = rt.add_object(ObjectKind::Object);
        let id = registry.id_for(Some(obj));

        rt.collect(obj);
        assert_eq!(registry.object_for(id), Err(ProtocolError::InvalidObject(id)));
        assert!(registry.is_empty());
        assert_eq!(registry.object_for(id), Err(ProtocolError::InvalidObject(id)));
        assert!(registry.is_empty());
    }

    #[test]
    fn unknown_positive_id_is_invalid() {
        let (_rt, registry) = registry();
        assert_eq!(registry.object_for(42), Err(ProtocolError::InvalidObject(42)));
    }

    #[test]
    fn narrowing_rejects_wrong_kinds() {
        let (rt, registry) = registry();
        let thread = rt.add_thread("main");
        let string = rt.add_string("hello");
        let tid = registry.id_for(Some(thread));
        let sid = registry.id_for(Some(string));

        assert_eq!(registry.thread_for(tid), Ok(thread));
        assert_eq!(registry.string_for(sid), Ok(string));
        assert!(matches!(registry.thread_for(sid), Err(ProtocolError::InvalidThread(_))));
        assert_eq!(registry.string_for(tid), Err(ProtocolError::InvalidString(tid)));
        assert_eq!(registry.class_for(tid), Err(ProtocolError::InvalidClass(tid)));
        assert!(matches!(registry.thread_for(0), Err(ProtocolError::InvalidThread(_))));
        assert_eq!(registry.thread_for(99), Err(ProtocolError::InvalidObject(99)));
    }

    #[test]
    fn write_tagged_uses_runtime_kind() {
        let (rt, registry) = registry();
        let thread = rt.add_thread("worker");
        let mut w = JdwpWriter::new();
        registry.write_tagged(&mut w, Some(thread));
        registry.write_tagged(&mut w, None);
        assert_eq!(w.into_vec(), vec![b't', 0, 0, 0, 1, b'L', 0, 0, 0, 0]);
    }

    #[test]
    fn compaction_drops_dead_entries_without_touching_live_ones() {
        let (rt, registry) = registry();
        let live = rt.add_object(ObjectKind::Object);
        let dead = rt.add_object(ObjectKind::Object);
        let live_id = registry.id_for(Some(live));
        registry.id_for(Some(dead));
        rt.collect(dead);

        registry.compact();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.object_for(live_id), Ok(Some(live)));

        // Ids are never reused after a purge.
        let fresh = rt.add_object(ObjectKind::Object);
        assert_eq!(registry.id_for(Some(fresh)), 3);
    }
}
