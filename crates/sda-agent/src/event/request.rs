use sda_jdwp::consts::tag;
use sda_jdwp::{JdwpWriter, Location, ObjectId};

use super::modifier::MatchContext;
use super::{DebugEvent, EventDetail, EventKind, Modifier, SuspendPolicy};
use crate::runtime::ObjectRef;

/// A registered event request.
///
/// Requests with id `0` are installed by the agent itself at session start
/// and cannot be cleared by the debugger.
#[derive(Debug)]
pub struct EventRequest {
    pub id: i32,
    pub kind: EventKind,
    pub suspend_policy: SuspendPolicy,
    pub modifiers: Vec<Modifier>,
    /// Thread being stepped, for single-step requests.
    pub(crate) step_thread: Option<ObjectRef>,
}

impl EventRequest {
    pub fn new(id: i32, kind: EventKind, suspend_policy: SuspendPolicy, modifiers: Vec<Modifier>) -> Self {
        Self {
            id,
            kind,
            suspend_policy,
            modifiers,
            step_thread: None,
        }
    }

    pub fn implicit(kind: EventKind, suspend_policy: SuspendPolicy) -> Self {
        Self::new(0, kind, suspend_policy, Vec::new())
    }

    pub fn is_implicit(&self) -> bool {
        self.id == 0
    }

    pub fn step_modifier(&self) -> Option<(ObjectId, i32, i32)> {
        self.modifiers.iter().find_map(|modifier| match modifier {
            Modifier::Step {
                thread,
                size,
                depth,
            } => Some((*thread, *size, *depth)),
            _ => None,
        })
    }

    pub fn locations(&self) -> impl Iterator<Item = &Location> {
        self.modifiers.iter().filter_map(|modifier| match modifier {
            Modifier::LocationOnly { location } => Some(location),
            _ => None,
        })
    }

    /// Whether this request is interested in events of `event_kind` at all.
    pub(crate) fn match_kind(&self, event_kind: EventKind, cx: &MatchContext<'_>) -> bool {
        match self.kind {
            EventKind::Breakpoint | EventKind::SingleStep => {
                matches!(event_kind, EventKind::Breakpoint | EventKind::SingleStep)
            }
            // The isolate dies with its last thread.
            EventKind::VmDeath => {
                event_kind == EventKind::VmDeath
                    || (event_kind == EventKind::ThreadEnd && cx.runtime.threads().len() <= 1)
            }
            kind if !kind.is_supported() => false,
            kind => kind == event_kind,
        }
    }

    pub(crate) fn matches(&self, event: &DebugEvent, cx: &MatchContext<'_>) -> bool {
        self.match_kind(event.kind, cx)
            && self
                .modifiers
                .iter()
                .all(|modifier| modifier.matches(self.kind, event, cx))
    }

    /// Appends this request's part of a composite event packet.
    pub(crate) fn write_event(&self, w: &mut JdwpWriter, event: &DebugEvent, cx: &MatchContext<'_>) {
        w.write_u8(self.kind.code());
        w.write_i32(self.id);

        let thread_id = cx.identity.id_for(event.thread);
        match self.kind {
            EventKind::ClassPrepare => {
                w.write_object_id(thread_id);
                match event.detail {
                    EventDetail::Class(class) => cx.classes.write_class_info(w, class),
                    _ => {
                        debug_assert!(false, "class prepare event without a class");
                        w.write_u8(0);
                        w.write_reference_type_id(0);
                        w.write_string("");
                        w.write_i32(0);
                    }
                }
            }
            EventKind::Breakpoint | EventKind::SingleStep => {
                w.write_object_id(thread_id);
                cx.classes.write_location(w, event.location());
            }
            EventKind::ThreadStart | EventKind::ThreadEnd => {
                w.write_object_id(thread_id);
                if self.is_implicit() {
                    let (status, suspend_count, name) = match event.thread {
                        Some(thread) => (
                            cx.runtime.thread_status(thread),
                            cx.runtime.suspend_count(thread) as i32,
                            cx.runtime.thread_name(thread),
                        ),
                        None => (0, 0, String::new()),
                    };
                    w.write_i32(status);
                    w.write_i32(suspend_count);
                    w.write_string(&name);
                }
            }
            EventKind::VmStart => {
                w.write_object_id(thread_id);
                if self.is_implicit() {
                    // Lets the proxy replay class prepare events for everything already loaded.
                    let classes = cx.classes.all_classes();
                    w.write_i32(classes.len() as i32);
                    for (_, class) in classes {
                        cx.classes.write_class_info(w, class);
                    }
                }
            }
            EventKind::Exception => {
                w.write_object_id(thread_id);
                match &event.detail {
                    EventDetail::Exception {
                        location,
                        exception,
                        catch_location,
                    } => {
                        cx.classes.write_location(w, Some(*location));
                        w.write_tagged_object_id(tag::OBJECT, cx.identity.id_for(Some(*exception)));
                        cx.classes.write_location(w, *catch_location);
                    }
                    _ => {
                        debug_assert!(false, "exception event without exception detail");
                        w.write_location(&Location::NULL);
                        w.write_tagged_object_id(tag::OBJECT, 0);
                        w.write_location(&Location::NULL);
                    }
                }
            }
            EventKind::VmDeath => {}
            other => {
                // `match_kind` never accepts these.
                debug_assert!(false, "unsupported event kind {other:?} matched");
            }
        }
    }
}
