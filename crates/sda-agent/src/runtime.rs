//! Interfaces the agent consumes from the managed runtime.
//!
//! The managed heap is opaque to the agent: objects, classes and threads are
//! only reachable through [`ObjectRef`] handles, and every question about them
//! is answered by the [`Runtime`] implementation.

use std::sync::Arc;

use sda_jdwp::MethodId;

use crate::event::DebugEvent;

/// Opaque handle to an object in the debuggee heap.
///
/// Classes and threads are objects too; which kind a handle denotes is
/// reported by [`Runtime::object_kind`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectRef(pub u64);

/// Opaque handle to a method body.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodRef(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObjectKind {
    Object,
    Array,
    String,
    Thread,
    ThreadGroup,
    ClassLoader,
    Class,
}

impl ObjectKind {
    pub fn tag(self) -> u8 {
        use sda_jdwp::consts::tag;
        match self {
            ObjectKind::Object => tag::OBJECT,
            ObjectKind::Array => tag::ARRAY,
            ObjectKind::String => tag::STRING,
            ObjectKind::Thread => tag::THREAD,
            ObjectKind::ThreadGroup => tag::THREAD_GROUP,
            ObjectKind::ClassLoader => tag::CLASS_LOADER,
            ObjectKind::Class => tag::CLASS_OBJECT,
        }
    }
}

/// A bytecode position inside a method body.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ExecutionPoint {
    pub method: MethodRef,
    pub offset: u64,
}

/// A resolved breakpoint pushed to the runtime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Breakpoint {
    pub method: MethodRef,
    pub offset: u64,
}

/// Single-step state installed on a thread.
///
/// The offsets come from the debug proxy, which owns the line tables; the
/// runtime stops the thread when it reaches one of them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PendingStep {
    pub start: ExecutionPoint,
    pub target_offset: i64,
    pub duplicate_offset: i64,
    pub after_duplicate_offset: i64,
    pub size: i32,
    pub depth: i32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IsolateState {
    /// Created but `start()` has not been called yet.
    New,
    Running,
    Hibernated,
    Exited,
}

/// Callback the runtime invokes from application threads when a debug event
/// occurs. The call may block until the agent has processed the event.
pub trait DebugHook: Send + Sync {
    fn notify(&self, event: DebugEvent);

    /// Whether events passed to [`DebugHook::notify`] are still processed.
    fn is_active(&self) -> bool {
        true
    }
}

/// Everything the agent needs from the managed runtime hosting the debuggee.
pub trait Runtime: Send + Sync {
    // Objects.

    /// Stable index of a read-only image object, or `None` for heap objects.
    /// Indices are strictly positive.
    fn rom_index(&self, object: ObjectRef) -> Option<u32>;
    fn rom_object(&self, index: u32) -> Option<ObjectRef>;
    /// Whether the referent of a handle is still reachable.
    fn is_alive(&self, object: ObjectRef) -> bool;
    fn object_kind(&self, object: ObjectRef) -> ObjectKind;
    fn class_of(&self, object: ObjectRef) -> ObjectRef;
    fn string_value(&self, object: ObjectRef) -> Option<String>;

    // Classes.

    fn loaded_classes(&self) -> Vec<ObjectRef>;
    /// Binary name, e.g. `com.example.Foo`.
    fn class_name(&self, class: ObjectRef) -> String;
    /// Type signature, e.g. `Lcom/example/Foo;`.
    fn class_signature(&self, class: ObjectRef) -> String;
    fn class_type_tag(&self, class: ObjectRef) -> u8;
    fn class_status(&self, class: ObjectRef) -> i32;
    /// `base.isAssignableFrom(class)`.
    fn is_assignable(&self, base: ObjectRef, class: ObjectRef) -> bool;
    fn is_instance(&self, class: ObjectRef, object: ObjectRef) -> bool;

    // Methods.

    fn defining_class(&self, method: MethodRef) -> ObjectRef;
    fn method_id(&self, class: ObjectRef, method: MethodRef) -> MethodId;
    fn method_body(&self, class: ObjectRef, method: MethodId) -> Option<MethodRef>;

    // Threads.

    /// Live threads of the debuggee isolate.
    fn threads(&self) -> Vec<ObjectRef>;
    fn thread_name(&self, thread: ObjectRef) -> String;
    fn thread_status(&self, thread: ObjectRef) -> i32;
    /// Increments the thread's debugger suspend count.
    fn suspend_thread(&self, thread: ObjectRef);
    /// Decrements the thread's debugger suspend count; the thread runs again at zero.
    fn resume_thread(&self, thread: ObjectRef);
    fn suspend_count(&self, thread: ObjectRef) -> u32;
    fn execution_point(&self, thread: ObjectRef) -> Option<ExecutionPoint>;
    fn pending_step(&self, thread: ObjectRef) -> Option<PendingStep>;
    fn set_step(&self, thread: ObjectRef, step: PendingStep);
    fn clear_step(&self, thread: ObjectRef);

    // Isolate.

    fn isolate_state(&self) -> IsolateState;
    fn start(&self);
    fn exit(&self, code: i32);
    fn exit_code(&self) -> i32;
    /// Replaces the complete breakpoint set. An empty slice clears it.
    fn update_breakpoints(&self, breakpoints: &[Breakpoint]);
    fn set_debug_hook(&self, hook: Option<Arc<dyn DebugHook>>);

    fn debuggee_alive(&self) -> bool {
        !matches!(self.isolate_state(), IsolateState::Exited)
    }
}
