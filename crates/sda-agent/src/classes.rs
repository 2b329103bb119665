use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use sda_jdwp::{JdwpWriter, Location, ReferenceTypeId};

use crate::error::{ProtocolError, ProtocolResult};
use crate::runtime::{ExecutionPoint, ObjectRef, Runtime};

#[derive(Default)]
struct Tables {
    classes: Vec<ObjectRef>,
    ids: HashMap<ObjectRef, ReferenceTypeId>,
}

impl Tables {
    fn insert(&mut self, class: ObjectRef) -> ReferenceTypeId {
        if let Some(&id) = self.ids.get(&class) {
            return id;
        }
        self.classes.push(class);
        let id = self.classes.len() as ReferenceTypeId;
        self.ids.insert(class, id);
        id
    }
}

/// Reference type ids for loaded classes.
///
/// The table is seeded from the runtime's loaded classes the first time an id
/// is requested; classes seen later are appended. Ids start at 1 and are
/// never reused.
pub struct ClassTable {
    runtime: Arc<dyn Runtime>,
    tables: Mutex<Option<Tables>>,
}

impl ClassTable {
    pub fn new(runtime: Arc<dyn Runtime>) -> Self {
        Self {
            runtime,
            tables: Mutex::new(None),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.tables.lock().is_some()
    }

    pub fn initialize(&self) {
        let mut tables = self.tables.lock();
        self.ensure(&mut tables);
    }

    fn ensure<'a>(&self, tables: &'a mut Option<Tables>) -> &'a mut Tables {
        tables.get_or_insert_with(|| {
            let mut fresh = Tables::default();
            for class in self.runtime.loaded_classes() {
                fresh.insert(class);
            }
            tracing::debug!(target: "sda.classes", classes = fresh.classes.len(), "built class table");
            fresh
        })
    }

    pub fn id_for_class(&self, class: ObjectRef) -> ReferenceTypeId {
        let mut tables = self.tables.lock();
        self.ensure(&mut tables).insert(class)
    }

    /// Looks up a class by reference type id.
    ///
    /// # Panics
    ///
    /// Panics if called before the table has been built.
    pub fn class_for_id(&self, id: ReferenceTypeId) -> ProtocolResult<ObjectRef> {
        let tables = self.tables.lock();
        let tables = tables
            .as_ref()
            .unwrap_or_else(|| panic!("class id {id} queried before the class table was built"));
        usize::try_from(id)
            .ok()
            .and_then(|id| id.checked_sub(1))
            .and_then(|index| tables.classes.get(index).copied())
            .ok_or(ProtocolError::InvalidClass(id))
    }

    pub fn all_classes(&self) -> Vec<(ReferenceTypeId, ObjectRef)> {
        let mut tables = self.tables.lock();
        // Pick up classes loaded since the table was built.
        let tables = self.ensure(&mut tables);
        for class in self.runtime.loaded_classes() {
            tables.insert(class);
        }
        tables
            .classes
            .iter()
            .enumerate()
            .map(|(index, class)| (index as ReferenceTypeId + 1, *class))
            .collect()
    }

    pub fn location_for(&self, point: ExecutionPoint) -> Location {
        let class = self.runtime.defining_class(point.method);
        Location {
            type_tag: self.runtime.class_type_tag(class),
            class_id: self.id_for_class(class),
            method_id: self.runtime.method_id(class, point.method),
            index: point.offset,
        }
    }

    pub fn write_location(&self, w: &mut JdwpWriter, point: Option<ExecutionPoint>) {
        match point {
            Some(point) => w.write_location(&self.location_for(point)),
            None => w.write_location(&Location::NULL),
        }
    }

    /// Writes `refTypeTag, typeID, signature, status` for one class.
    pub fn write_class_info(&self, w: &mut JdwpWriter, class: ObjectRef) {
        w.write_u8(self.runtime.class_type_tag(class));
        w.write_reference_type_id(self.id_for_class(class));
        w.write_string(&self.runtime.class_signature(class));
        w.write_i32(self.runtime.class_status(class));
    }
}
