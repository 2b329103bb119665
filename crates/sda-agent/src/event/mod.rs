//! Event requests, matching and notification.

use sda_jdwp::consts::{event_kind, suspend_policy};

use crate::runtime::{ExecutionPoint, ObjectRef};

mod catalog;
mod modifier;
mod notifier;
mod request;

pub use catalog::{EventCatalog, MatchedRequests};
pub use modifier::{ClassPattern, Modifier};
pub use notifier::EventDispatcher;
pub use request::EventRequest;

/// Event kinds a debugger may request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    SingleStep,
    Breakpoint,
    FramePop,
    Exception,
    UserDefined,
    ThreadStart,
    ThreadEnd,
    ClassPrepare,
    ClassUnload,
    ClassLoad,
    FieldAccess,
    FieldModification,
    ExceptionCatch,
    MethodEntry,
    MethodExit,
    VmStart,
    VmDeath,
}

impl EventKind {
    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            event_kind::SINGLE_STEP => EventKind::SingleStep,
            event_kind::BREAKPOINT => EventKind::Breakpoint,
            event_kind::FRAME_POP => EventKind::FramePop,
            event_kind::EXCEPTION => EventKind::Exception,
            event_kind::USER_DEFINED => EventKind::UserDefined,
            event_kind::THREAD_START => EventKind::ThreadStart,
            event_kind::THREAD_END => EventKind::ThreadEnd,
            event_kind::CLASS_PREPARE => EventKind::ClassPrepare,
            event_kind::CLASS_UNLOAD => EventKind::ClassUnload,
            event_kind::CLASS_LOAD => EventKind::ClassLoad,
            event_kind::FIELD_ACCESS => EventKind::FieldAccess,
            event_kind::FIELD_MODIFICATION => EventKind::FieldModification,
            event_kind::EXCEPTION_CATCH => EventKind::ExceptionCatch,
            event_kind::METHOD_ENTRY => EventKind::MethodEntry,
            event_kind::METHOD_EXIT => EventKind::MethodExit,
            event_kind::VM_START => EventKind::VmStart,
            event_kind::VM_DEATH => EventKind::VmDeath,
            _ => return None,
        })
    }

    pub fn code(self) -> u8 {
        match self {
            EventKind::SingleStep => event_kind::SINGLE_STEP,
            EventKind::Breakpoint => event_kind::BREAKPOINT,
            EventKind::FramePop => event_kind::FRAME_POP,
            EventKind::Exception => event_kind::EXCEPTION,
            EventKind::UserDefined => event_kind::USER_DEFINED,
            EventKind::ThreadStart => event_kind::THREAD_START,
            EventKind::ThreadEnd => event_kind::THREAD_END,
            EventKind::ClassPrepare => event_kind::CLASS_PREPARE,
            EventKind::ClassUnload => event_kind::CLASS_UNLOAD,
            EventKind::ClassLoad => event_kind::CLASS_LOAD,
            EventKind::FieldAccess => event_kind::FIELD_ACCESS,
            EventKind::FieldModification => event_kind::FIELD_MODIFICATION,
            EventKind::ExceptionCatch => event_kind::EXCEPTION_CATCH,
            EventKind::MethodEntry => event_kind::METHOD_ENTRY,
            EventKind::MethodExit => event_kind::METHOD_EXIT,
            EventKind::VmStart => event_kind::VM_START,
            EventKind::VmDeath => event_kind::VM_DEATH,
        }
    }

    /// Kinds the runtime can actually raise. Requests for the others are
    /// accepted so they can be cleared later, but never fire.
    pub fn is_supported(self) -> bool {
        matches!(
            self,
            EventKind::SingleStep
                | EventKind::Breakpoint
                | EventKind::Exception
                | EventKind::ThreadStart
                | EventKind::ThreadEnd
                | EventKind::ClassPrepare
                | EventKind::VmStart
                | EventKind::VmDeath
        )
    }
}

/// How much of the debuggee is suspended when an event fires.
///
/// Ordered by scope so the aggregate over several requests is their maximum.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SuspendPolicy {
    #[default]
    None,
    EventThread,
    All,
}

impl SuspendPolicy {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            suspend_policy::NONE => Some(SuspendPolicy::None),
            suspend_policy::EVENT_THREAD => Some(SuspendPolicy::EventThread),
            suspend_policy::ALL => Some(SuspendPolicy::All),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        match self {
            SuspendPolicy::None => suspend_policy::NONE,
            SuspendPolicy::EventThread => suspend_policy::EVENT_THREAD,
            SuspendPolicy::All => suspend_policy::ALL,
        }
    }
}

/// An event raised by the runtime.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DebugEvent {
    pub kind: EventKind,
    /// The reporting thread. For thread start/end this is the thread that
    /// started or ended.
    pub thread: Option<ObjectRef>,
    pub detail: EventDetail,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EventDetail {
    None,
    /// The class being prepared.
    Class(ObjectRef),
    /// Breakpoint hit or step completed at this point.
    Location(ExecutionPoint),
    Exception {
        location: ExecutionPoint,
        exception: ObjectRef,
        catch_location: Option<ExecutionPoint>,
    },
}

impl DebugEvent {
    pub fn vm_start(thread: Option<ObjectRef>) -> Self {
        Self {
            kind: EventKind::VmStart,
            thread,
            detail: EventDetail::None,
        }
    }

    pub fn vm_death() -> Self {
        Self {
            kind: EventKind::VmDeath,
            thread: None,
            detail: EventDetail::None,
        }
    }

    pub fn thread_start(thread: ObjectRef) -> Self {
        Self {
            kind: EventKind::ThreadStart,
            thread: Some(thread),
            detail: EventDetail::None,
        }
    }

    pub fn thread_end(thread: ObjectRef) -> Self {
        Self {
            kind: EventKind::ThreadEnd,
            thread: Some(thread),
            detail: EventDetail::None,
        }
    }

    pub fn class_prepare(thread: Option<ObjectRef>, class: ObjectRef) -> Self {
        Self {
            kind: EventKind::ClassPrepare,
            thread,
            detail: EventDetail::Class(class),
        }
    }

    pub fn breakpoint(thread: ObjectRef, location: ExecutionPoint) -> Self {
        Self {
            kind: EventKind::Breakpoint,
            thread: Some(thread),
            detail: EventDetail::Location(location),
        }
    }

    pub fn single_step(thread: ObjectRef, location: ExecutionPoint) -> Self {
        Self {
            kind: EventKind::SingleStep,
            thread: Some(thread),
            detail: EventDetail::Location(location),
        }
    }

    pub fn exception(
        thread: ObjectRef,
        location: ExecutionPoint,
        exception: ObjectRef,
        catch_location: Option<ExecutionPoint>,
    ) -> Self {
        Self {
            kind: EventKind::Exception,
            thread: Some(thread),
            detail: EventDetail::Exception {
                location,
                exception,
                catch_location,
            },
        }
    }

    /// Location the event happened at, if it carries one.
    pub fn location(&self) -> Option<ExecutionPoint> {
        match self.detail {
            EventDetail::Location(location) => Some(location),
            EventDetail::Exception { location, .. } => Some(location),
            _ => None,
        }
    }
}
